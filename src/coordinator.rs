//! Cache coordinator: fast-path reuse, locking, generation, atomic publish.
//!
//! No state is kept between calls. Everything another caller needs to know
//! (is an artifact there, is it current, is someone producing it) is a
//! filesystem fact: artifact existence and mtime, the header, and the lock
//! directory.
//!
//! ```text
//!   request ──fresh?──yes──────────────────────────────▶ FRESH
//!      │no
//!      ▼
//!   acquire lock ──timeout──────────────────────────────▶ FAILED(LockTimeout)
//!      │
//!      ▼
//!   fresh now? ──yes── release ─────────────────────────▶ FRESH
//!      │no
//!      ▼
//!   GENERATING: recipe → <artifact>.tmp → rename → release → verify
//!      │                                               ├─▶ FRESH
//!      └─ failure: remove tmp + artifact, release ─────┴─▶ FAILED(..)
//! ```

use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::{Duration, Instant};

use log::{debug, info, warn};

use crate::error::{Error, Result};
use crate::freshness::is_fresh;
use crate::header::{Header, count_lines, parse_header, patch_line_count, read_header, write_header};
use crate::identity::FileIdentity;
use crate::key::{CachePaths, PathResolver};
use crate::lock::{DirLock, LockGuard, LockManager};
use crate::recipe;

/// What the caller wants cached.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    pub identity: FileIdentity,
    pub width: u16,
    pub height: u16,
    /// Explicit recipe for this call. When absent, the recipe recorded in the
    /// existing artifact is reused.
    pub recipe: Option<String>,
}

impl Request {
    pub fn new(identity: FileIdentity, width: u16, height: u16) -> Self {
        Self {
            identity,
            width,
            height,
            recipe: None,
        }
    }

    pub fn with_recipe(mut self, recipe: impl Into<String>) -> Self {
        self.recipe = Some(recipe.into());
        self
    }

    fn explicit_recipe(&self) -> Option<&str> {
        self.recipe.as_deref().filter(|r| !r.is_empty())
    }
}

/// Polling bounds. The lock poll is tight; the freshness poll is looser
/// because it waits on a whole generation rather than a handover.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timing {
    pub lock_timeout: Duration,
    pub lock_poll: Duration,
    pub wait_timeout: Duration,
    pub wait_poll: Duration,
}

impl Default for Timing {
    fn default() -> Self {
        Self {
            lock_timeout: Duration::from_millis(5000),
            lock_poll: Duration::from_millis(20),
            wait_timeout: Duration::from_millis(3000),
            wait_poll: Duration::from_millis(100),
        }
    }
}

/// A usable artifact.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ensured {
    pub artifact: PathBuf,
    pub header: Header,
    /// Whether this call ran the recipe.
    pub generated: bool,
}

/// Result of waiting on someone else's generation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitOutcome {
    Fresh,
    /// The lock went away but the artifact is still not usable.
    Unlocked,
    TimedOut,
}

pub struct Coordinator<L: LockManager = DirLock> {
    resolver: PathResolver,
    timing: Timing,
    locks: L,
}

impl Coordinator<DirLock> {
    pub fn new(resolver: PathResolver, timing: Timing) -> Self {
        Self::with_lock_manager(resolver, timing, DirLock::new())
    }
}

impl<L: LockManager> Coordinator<L> {
    pub fn with_lock_manager(resolver: PathResolver, timing: Timing, locks: L) -> Self {
        Self {
            resolver,
            timing,
            locks,
        }
    }

    pub fn timing(&self) -> &Timing {
        &self.timing
    }

    pub fn paths(&self, req: &Request) -> Result<CachePaths> {
        self.resolver.resolve(&req.identity, req.width, req.height)
    }

    pub fn is_fresh(&self, req: &Request) -> Result<bool> {
        let paths = self.paths(req)?;
        Ok(is_fresh(req.identity.real_path(), &paths.artifact, req.width))
    }

    pub fn lock_held(&self, req: &Request) -> Result<bool> {
        Ok(self.locks.is_held(&self.paths(req)?.lock))
    }

    /// Make sure a fresh artifact exists for `req`, generating it if needed.
    pub fn ensure(&self, req: &Request) -> Result<Ensured> {
        let paths = self.paths(req)?;
        let source = req.identity.real_path();

        if let Some(header) = self.fresh_header(source, &paths.artifact, req.width) {
            debug!("coordinator: fast path {}", paths.artifact.display());
            return Ok(Ensured {
                artifact: paths.artifact,
                header,
                generated: false,
            });
        }

        let started = Instant::now();
        if !self
            .locks
            .acquire(&paths.lock, self.timing.lock_timeout, self.timing.lock_poll)?
        {
            warn!("coordinator: lock timeout on {}", paths.lock.display());
            return Err(Error::LockTimeout {
                lock: paths.lock,
                waited_ms: started.elapsed().as_millis(),
            });
        }
        let guard = LockGuard::held(&self.locks, &paths.lock);

        // Another producer may have published while we were waiting.
        if let Some(header) = self.fresh_header(source, &paths.artifact, req.width) {
            debug!("coordinator: fresh after wait {}", paths.artifact.display());
            guard.release();
            return Ok(Ensured {
                artifact: paths.artifact,
                header,
                generated: false,
            });
        }

        let recipe = match req.explicit_recipe() {
            Some(r) => r.to_string(),
            None => match read_header(&paths.artifact) {
                Ok(h) => {
                    info!("coordinator: reusing recorded recipe for {}", req.identity);
                    h.recipe
                }
                Err(e) => {
                    debug!("coordinator: no recorded recipe: {e}");
                    return Err(Error::NoRecipe {
                        identity: req.identity.to_string(),
                    });
                }
            },
        };

        let gen_start = Instant::now();
        if let Err(e) = self.generate(&paths, req, &recipe) {
            warn!("coordinator: generation failed for {}: {e}", req.identity);
            remove_quietly(&paths.tmp);
            remove_quietly(&paths.artifact);
            return Err(e);
        }
        if let Err(e) = std::fs::rename(&paths.tmp, &paths.artifact) {
            warn!("coordinator: publish failed for {}: {e}", req.identity);
            remove_quietly(&paths.tmp);
            remove_quietly(&paths.artifact);
            return Err(Error::generation(format!(
                "failed to publish {}: {e}",
                paths.artifact.display()
            )));
        }
        guard.release();
        info!(
            "coordinator: published {} in {:.1}ms",
            paths.artifact.display(),
            gen_start.elapsed().as_secs_f64() * 1000.0
        );

        match read_header(&paths.artifact) {
            Ok(header) => Ok(Ensured {
                artifact: paths.artifact,
                header,
                generated: true,
            }),
            Err(e) => {
                remove_quietly(&paths.artifact);
                Err(Error::CorruptWrite {
                    path: paths.artifact,
                    reason: e.to_string(),
                })
            }
        }
    }

    /// Poll (loosely) until someone else's generation makes `req` fresh.
    pub fn wait_fresh(&self, req: &Request) -> Result<WaitOutcome> {
        let paths = self.paths(req)?;
        let source = req.identity.real_path();
        let started = Instant::now();
        loop {
            if is_fresh(source, &paths.artifact, req.width) {
                return Ok(WaitOutcome::Fresh);
            }
            if !self.locks.is_held(&paths.lock) {
                // The producer may have published just before releasing.
                return Ok(if is_fresh(source, &paths.artifact, req.width) {
                    WaitOutcome::Fresh
                } else {
                    WaitOutcome::Unlocked
                });
            }
            if started.elapsed() >= self.timing.wait_timeout {
                debug!("coordinator: still generating {}", paths.artifact.display());
                return Ok(WaitOutcome::TimedOut);
            }
            thread::sleep(self.timing.wait_poll);
        }
    }

    /// Remove the artifact and any leftover lock or temp file for `req`.
    /// Manual recovery for a lock left behind by a crashed producer.
    pub fn clear(&self, req: &Request) -> Result<()> {
        let paths = self.paths(req)?;
        remove_quietly(&paths.artifact);
        remove_quietly(&paths.tmp);
        self.locks.release(&paths.lock);
        info!("coordinator: cleared {}", paths.artifact.display());
        Ok(())
    }

    fn fresh_header(&self, source: Option<&Path>, artifact: &Path, width: u16) -> Option<Header> {
        if !is_fresh(source, artifact, width) {
            return None;
        }
        read_header(artifact).ok()
    }

    /// Write header + recipe output into `paths.tmp`. The recipe appends to
    /// the same open file behind a header with a zero count, which is patched
    /// once the output is counted.
    fn generate(&self, paths: &CachePaths, req: &Request, recipe: &str) -> Result<()> {
        let mut file = File::options()
            .create(true)
            .truncate(true)
            .read(true)
            .write(true)
            .open(&paths.tmp)
            .map_err(|e| Error::io(&paths.tmp, e))?;
        write_header(&mut file, recipe, 0, req.width)?;

        let stdout = file.try_clone().map_err(|e| Error::io(&paths.tmp, e))?;
        recipe::run_into(
            recipe,
            &req.identity.source_string(),
            req.width,
            req.height,
            stdout,
        )?;

        let count = {
            use std::io::{Seek, SeekFrom};
            (&file)
                .seek(SeekFrom::Start(0))
                .map_err(|e| Error::io(&paths.tmp, e))?;
            let mut reader = BufReader::new(&file);
            parse_header(&mut reader, &paths.tmp)?;
            count_lines(&mut reader).map_err(|e| Error::io(&paths.tmp, e))?
        };
        if count == 0 {
            return Err(Error::generation("recipe produced no output"));
        }
        patch_line_count(&mut file, recipe, count).map_err(|e| Error::io(&paths.tmp, e))?;
        file.sync_all().map_err(|e| Error::io(&paths.tmp, e))?;
        debug!("coordinator: generated {count} lines into {}", paths.tmp.display());
        Ok(())
    }
}

fn remove_quietly(path: &Path) {
    if let Err(e) = std::fs::remove_file(path)
        && e.kind() != std::io::ErrorKind::NotFound
    {
        debug!("coordinator: failed to remove {}: {e}", path.display());
    }
}
