//! Stateless pagination over cached artifacts.
//!
//! The caller owns the scroll cursor (`skip`) but does not know how long the
//! content is; the artifact header knows the length but must never change
//! the caller's cursor behind its back. Two phases bridge that:
//!
//! - [`seek`] turns a cursor delta into the skip of the next render request.
//!   Large forward jumps become a sentinel skip far past any real content.
//! - [`Pager::peek`] renders a request. When the skip is past the end
//!   (sentinel or not) it answers with [`PeekOutcome::Redirect`] carrying the
//!   corrected request instead of rendering something the caller did not ask
//!   for.

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use log::{debug, warn};

use crate::coordinator::{Coordinator, Ensured, Request, WaitOutcome};
use crate::error::{Error, Result};
use crate::header::{HEADER_LINES, read_header};
use crate::lock::{DirLock, LockManager};

/// Deltas beyond this (either direction) are jumps, not scrolls.
pub const DEFAULT_JUMP_THRESHOLD: u64 = 999;

/// Offset added to the cursor for "jump to end". Far beyond any realistic
/// line count, and `cursor + BIG_SENTINEL + 1` still fits comfortably in u64.
pub const BIG_SENTINEL: u64 = 1 << 40;

/// Phase 1: the skip value for the single render request that follows a
/// scroll of `units` lines from `cursor`.
pub fn seek(cursor: u64, units: i64, threshold: u64) -> u64 {
    let magnitude = units.unsigned_abs();
    if units < 0 && magnitude > threshold {
        0
    } else if units > 0 && magnitude > threshold {
        cursor.saturating_add(BIG_SENTINEL).saturating_add(1)
    } else if units < 0 {
        cursor.saturating_sub(magnitude)
    } else {
        cursor.saturating_add(magnitude)
    }
}

pub fn is_sentinel(skip: u64) -> bool {
    skip > BIG_SENTINEL
}

/// The skip a request must be redirected to, or `None` if `skip` can be
/// rendered as is.
pub fn clamp(skip: u64, total: u64, limit: u64) -> Option<u64> {
    let max_skip = total.saturating_sub(limit);
    // A sentinel is only meaningful while it is unambiguously past the end.
    let sentinel = is_sentinel(skip) && total <= BIG_SENTINEL;
    (sentinel || skip > max_skip).then_some(max_skip)
}

/// Content lines `[skip, skip + limit)` of `artifact`, header excluded.
/// Invalid UTF-8 is replaced rather than rejected.
pub fn read_window(artifact: &Path, skip: u64, limit: u64) -> Result<Vec<String>> {
    let slice_err = |source| Error::ReadSliceError {
        path: artifact.to_path_buf(),
        source,
    };
    let mut reader = BufReader::new(File::open(artifact).map_err(slice_err)?);
    let mut buf = Vec::new();
    let mut index: u64 = 0;
    let first = HEADER_LINES as u64 + skip;
    let end = first.saturating_add(limit);
    let mut lines = Vec::new();
    while index < end {
        buf.clear();
        if reader.read_until(b'\n', &mut buf).map_err(slice_err)? == 0 {
            break;
        }
        if index >= first {
            if buf.last() == Some(&b'\n') {
                buf.pop();
            }
            lines.push(String::from_utf8_lossy(&buf).into_owned());
        }
        index += 1;
    }
    Ok(lines)
}

/// A render request: what to show and from which content line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeekRequest {
    pub request: Request,
    pub skip: u64,
}

impl PeekRequest {
    pub fn new(request: Request, skip: u64) -> Self {
        Self { request, skip }
    }

    /// Same request, different cursor.
    pub fn at(&self, skip: u64) -> Self {
        Self {
            request: self.request.clone(),
            skip,
        }
    }

    fn limit(&self) -> u64 {
        u64::from(self.request.height)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Window {
    pub skip: u64,
    /// Total content lines, when the header could be read.
    pub total: Option<u64>,
    pub lines: Vec<String>,
}

#[derive(Debug)]
pub enum PeekOutcome {
    Window(Window),
    /// Nothing rendered; re-dispatch this request instead.
    Redirect(PeekRequest),
    /// Someone else is still generating; try again later.
    Pending,
    Failed(Error),
}

impl PeekOutcome {
    /// The user-visible message for outcomes that carry no content.
    pub fn render_message(&self) -> Option<String> {
        match self {
            PeekOutcome::Pending => {
                Some("[peekcache] pending: preview is still being generated".into())
            }
            PeekOutcome::Failed(e) => Some(format!("[peekcache] {}: {e}", e.class())),
            PeekOutcome::Window(_) | PeekOutcome::Redirect(_) => None,
        }
    }
}

/// Host-facing entry points: preload, seek and peek.
pub struct Pager<L: LockManager = DirLock> {
    coordinator: Coordinator<L>,
    jump_threshold: u64,
}

impl<L: LockManager> Pager<L> {
    pub fn new(coordinator: Coordinator<L>, jump_threshold: u64) -> Self {
        Self {
            coordinator,
            jump_threshold,
        }
    }

    pub fn coordinator(&self) -> &Coordinator<L> {
        &self.coordinator
    }

    /// Ensure a fresh artifact exists. Produces no output.
    pub fn preload(&self, req: &Request) -> Result<Ensured> {
        self.coordinator.ensure(req)
    }

    /// Phase 1: the one render request to dispatch for scrolling `units`.
    pub fn seek(&self, current: &PeekRequest, units: i64) -> PeekRequest {
        let skip = seek(current.skip, units, self.jump_threshold);
        debug!("pager: seek {} by {units} -> {skip}", current.skip);
        current.at(skip)
    }

    /// Phase 2: render `req`, or say how it must be re-dispatched.
    pub fn peek(&self, req: &PeekRequest) -> PeekOutcome {
        let artifact = match self.ready_artifact(&req.request) {
            Ok(Some(path)) => path,
            Ok(None) => return PeekOutcome::Pending,
            Err(e) if e.is_retryable() => return PeekOutcome::Pending,
            Err(e) => return PeekOutcome::Failed(e),
        };

        let limit = req.limit();
        let total = match read_header(&artifact) {
            Ok(header) => {
                if let Some(max_skip) = clamp(req.skip, header.line_count, limit) {
                    debug!(
                        "pager: skip {} past end (total={}, limit={limit}), redirect to {max_skip}",
                        req.skip, header.line_count
                    );
                    return PeekOutcome::Redirect(req.at(max_skip));
                }
                Some(header.line_count)
            }
            Err(e) => {
                warn!("pager: cannot clamp, rendering unclamped: {e}");
                None
            }
        };

        match read_window(&artifact, req.skip, limit) {
            Ok(lines) => PeekOutcome::Window(Window {
                skip: req.skip,
                total,
                lines,
            }),
            Err(e) => PeekOutcome::Failed(e),
        }
    }

    /// Path of a usable artifact, generating it when nobody else is.
    /// `Ok(None)` means another producer is still at work.
    fn ready_artifact(&self, req: &Request) -> Result<Option<std::path::PathBuf>> {
        let paths = self.coordinator.paths(req)?;
        if self.coordinator.is_fresh(req)? {
            return Ok(Some(paths.artifact));
        }
        if self.coordinator.lock_held(req)? {
            match self.coordinator.wait_fresh(req)? {
                WaitOutcome::Fresh => return Ok(Some(paths.artifact)),
                WaitOutcome::TimedOut => return Ok(None),
                WaitOutcome::Unlocked => {}
            }
        }
        Ok(Some(self.coordinator.ensure(req)?.artifact))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const T: u64 = DEFAULT_JUMP_THRESHOLD;

    #[test]
    fn small_scrolls() {
        assert_eq!(seek(10, 5, T), 15);
        assert_eq!(seek(10, -5, T), 5);
        assert_eq!(seek(3, -5, T), 0);
        assert_eq!(seek(7, 0, T), 7);
    }

    #[test]
    fn threshold_is_exclusive() {
        assert_eq!(seek(0, 999, T), 999);
        assert_eq!(seek(2000, -999, T), 1001);
    }

    #[test]
    fn jump_to_top() {
        assert_eq!(seek(1234, -10_000, T), 0);
        assert_eq!(seek(0, i64::MIN, T), 0);
    }

    #[test]
    fn jump_to_end_is_sentinel() {
        let skip = seek(0, 10_000, T);
        assert_eq!(skip, BIG_SENTINEL + 1);
        assert!(is_sentinel(skip));
        assert!(is_sentinel(seek(1950, 10_000, T)));
        assert!(!is_sentinel(seek(1950, 10, T)));
    }

    #[test]
    fn sentinel_saturates() {
        assert_eq!(seek(u64::MAX - 3, 10_000, T), u64::MAX);
    }

    #[test]
    fn clamp_cases() {
        assert_eq!(clamp(0, 2000, 50), None);
        assert_eq!(clamp(1950, 2000, 50), None);
        assert_eq!(clamp(1951, 2000, 50), Some(1950));
        assert_eq!(clamp(BIG_SENTINEL + 1, 2000, 50), Some(1950));
        // shorter than the viewport: everything from the top
        assert_eq!(clamp(5, 10, 50), Some(0));
        assert_eq!(clamp(0, 10, 50), None);
    }

    #[test]
    fn window_slices_after_header() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a");
        std::fs::write(&path, "cat {file}\n4\n80\nl0\nl1\nl2\nl3").unwrap();
        assert_eq!(read_window(&path, 1, 2).unwrap(), ["l1", "l2"]);
        assert_eq!(read_window(&path, 2, 10).unwrap(), ["l2", "l3"]);
        assert!(read_window(&path, 9, 10).unwrap().is_empty());
    }

    #[test]
    fn window_is_lossy() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a");
        std::fs::write(&path, b"r\n1\n80\n\xff ok\n").unwrap();
        assert_eq!(read_window(&path, 0, 1).unwrap(), ["\u{fffd} ok"]);
    }

    #[test]
    fn missing_artifact_is_read_slice_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = read_window(&dir.path().join("gone"), 0, 1).unwrap_err();
        assert!(matches!(err, Error::ReadSliceError { .. }));
    }

    #[test]
    fn messages() {
        assert!(PeekOutcome::Pending.render_message().unwrap().contains("pending"));
        let failed = PeekOutcome::Failed(Error::generation("exit 1"));
        assert_eq!(
            failed.render_message().unwrap(),
            "[peekcache] generate-failed: generation failed: exit 1"
        );
    }
}
