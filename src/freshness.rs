//! Reuse predicate for existing artifacts.
//!
//! Height is part of the cache key but not of freshness: content is wrapped
//! to a width and only paginated by height.

use std::path::Path;

use log::debug;

use crate::header::read_header;

/// An artifact is fresh iff it exists, is not older than its source, and was
/// generated for `width`. A source without readable metadata (a virtual
/// identity, or a file that vanished) only gets the other two checks.
pub fn is_fresh(source: Option<&Path>, artifact: &Path, width: u16) -> bool {
    let Ok(artifact_meta) = std::fs::metadata(artifact) else {
        return false;
    };

    let source_mtime =
        source.and_then(|s| std::fs::metadata(s).and_then(|m| m.modified()).ok());
    if let (Some(src), Ok(art)) = (source_mtime, artifact_meta.modified())
        && art < src
    {
        debug!("freshness: {} older than source", artifact.display());
        return false;
    }

    match read_header(artifact) {
        Ok(header) if header.width == width => true,
        Ok(header) => {
            debug!(
                "freshness: {} generated at width {}, want {width}",
                artifact.display(),
                header.width
            );
            false
        }
        Err(e) => {
            debug!("freshness: {e}");
            false
        }
    }
}
