//! Cache key derivation and on-disk layout.
//!
//! One artifact per (source, width, height). The lock directory and the
//! in-flight temp file sit next to the artifact as `<artifact>.lock` and
//! `<artifact>.tmp`.

use std::path::{Path, PathBuf};

use log::debug;
use sha2::{Digest, Sha256};

use crate::error::{Error, Result};
use crate::identity::FileIdentity;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub source: String,
    pub width: u16,
    pub height: u16,
}

impl CacheKey {
    pub fn new(identity: &FileIdentity, width: u16, height: u16) -> Self {
        Self {
            source: identity.source_string(),
            width,
            height,
        }
    }

    /// Lowercase hex SHA-256 over `source \0 width \0 height`.
    pub fn digest(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.source.as_bytes());
        hasher.update([0]);
        hasher.update(self.width.to_string().as_bytes());
        hasher.update([0]);
        hasher.update(self.height.to_string().as_bytes());
        hex::encode(hasher.finalize())
    }
}

/// Every path belonging to one cache key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachePaths {
    pub artifact: PathBuf,
    pub lock: PathBuf,
    pub tmp: PathBuf,
}

impl CachePaths {
    fn for_artifact(artifact: PathBuf) -> Self {
        let with_suffix = |suffix: &str| {
            let mut s = artifact.clone().into_os_string();
            s.push(suffix);
            PathBuf::from(s)
        };
        Self {
            lock: with_suffix(".lock"),
            tmp: with_suffix(".tmp"),
            artifact,
        }
    }
}

/// Maps keys to paths under the cache root. A resolver without a root means
/// the caching substrate is disabled.
#[derive(Debug, Clone)]
pub struct PathResolver {
    root: Option<PathBuf>,
}

impl PathResolver {
    pub fn new(root: Option<PathBuf>) -> Self {
        Self { root }
    }

    pub fn root(&self) -> Option<&Path> {
        self.root.as_deref()
    }

    pub fn resolve(&self, identity: &FileIdentity, width: u16, height: u16) -> Result<CachePaths> {
        let root = self
            .root
            .as_deref()
            .ok_or_else(|| Error::caching_unavailable("no cache root configured"))?;
        std::fs::create_dir_all(root).map_err(|e| {
            Error::caching_unavailable(format!("cannot create {}: {e}", root.display()))
        })?;
        let key = CacheKey::new(identity, width, height);
        let paths = CachePaths::for_artifact(root.join(key.digest()));
        debug!(
            "key: {} ({}x{}) -> {}",
            key.source,
            width,
            height,
            paths.artifact.display()
        );
        Ok(paths)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn digest_differs_by_dimension() {
        let id = FileIdentity::parse("/a/b.txt");
        let a = CacheKey::new(&id, 80, 24).digest();
        let b = CacheKey::new(&id, 120, 24).digest();
        let c = CacheKey::new(&id, 80, 40).digest();
        assert_ne!(a, b);
        assert_ne!(a, c);
        assert_ne!(b, c);
        assert_eq!(a.len(), 64);
    }

    #[test]
    fn digest_is_stable() {
        let id = FileIdentity::parse("/a/b.txt");
        assert_eq!(
            CacheKey::new(&id, 80, 24).digest(),
            CacheKey::new(&id, 80, 24).digest()
        );
    }

    #[test]
    fn digest_separates_fields() {
        // "1" + "23" must not collide with "12" + "3".
        let a = CacheKey {
            source: "x".into(),
            width: 1,
            height: 23,
        };
        let b = CacheKey {
            source: "x".into(),
            width: 12,
            height: 3,
        };
        assert_ne!(a.digest(), b.digest());
    }

    #[test]
    fn search_view_shares_key_with_real_path() {
        let real = FileIdentity::parse("/home/me/a.txt");
        let view = FileIdentity::parse("search://needle//home/me/a.txt");
        assert_eq!(CacheKey::new(&real, 80, 24), CacheKey::new(&view, 80, 24));
    }

    #[test]
    fn sidecar_paths() {
        let dir = tempfile::tempdir().unwrap();
        let resolver = PathResolver::new(Some(dir.path().join("cache")));
        let paths = resolver
            .resolve(&FileIdentity::parse("/a/b.txt"), 80, 24)
            .unwrap();
        assert!(dir.path().join("cache").is_dir());
        assert_eq!(
            paths.lock.to_string_lossy(),
            format!("{}.lock", paths.artifact.display())
        );
        assert_eq!(
            paths.tmp.to_string_lossy(),
            format!("{}.tmp", paths.artifact.display())
        );
    }

    #[test]
    fn disabled_root_is_caching_unavailable() {
        let resolver = PathResolver::new(None);
        let err = resolver
            .resolve(&FileIdentity::parse("/a"), 80, 24)
            .unwrap_err();
        assert!(matches!(err, Error::CachingUnavailable { .. }));
    }

    #[test]
    fn uncreatable_root_is_caching_unavailable() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("file");
        std::fs::write(&blocker, "x").unwrap();
        let resolver = PathResolver::new(Some(blocker.join("cache")));
        let err = resolver
            .resolve(&FileIdentity::parse("/a"), 80, 24)
            .unwrap_err();
        assert!(matches!(err, Error::CachingUnavailable { .. }));
    }
}
