//! File identity normalization.
//!
//! The host may hand us identities that point into synthetic views, e.g.
//! `search://needle//home/me/notes.md` for a hit listed in a search result.
//! Recipes and cache keys always want the underlying real path; when no real
//! path can be recovered the original string is used verbatim.
//!
//! Plain paths are made absolute against the current directory when parsed,
//! so `notes.txt` typed in two directories names two different entries.

use std::fmt;
use std::path::{Path, PathBuf};

/// Virtual schemes whose frame wraps a real absolute path.
const PATH_BACKED_SCHEMES: &[&str] = &["search"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FileIdentity {
    Real(PathBuf),
    Virtual {
        /// The identity string exactly as the host supplied it.
        raw: String,
        scheme: String,
        frame: String,
        target: String,
    },
}

impl FileIdentity {
    /// Parse an identity string. Anything without a `scheme://` prefix is a
    /// plain filesystem path.
    pub fn parse(s: &str) -> Self {
        let Some((scheme, rest)) = s.split_once("://") else {
            return FileIdentity::Real(absolute_or_raw(s));
        };
        if scheme.is_empty() || !scheme.chars().all(|c| c.is_ascii_alphanumeric() || c == '-') {
            return FileIdentity::Real(absolute_or_raw(s));
        }
        // `<frame>//<target>`: the target keeps its leading `/`.
        let (frame, target) = match rest.find("//") {
            Some(i) => (&rest[..i], &rest[i + 1..]),
            None => (rest, ""),
        };
        FileIdentity::Virtual {
            raw: s.to_string(),
            scheme: scheme.to_string(),
            frame: frame.to_string(),
            target: target.to_string(),
        }
    }

    /// The underlying real filesystem path, if there is one.
    pub fn real_path(&self) -> Option<&Path> {
        match self {
            FileIdentity::Real(p) => Some(p),
            FileIdentity::Virtual { scheme, target, .. } => {
                let target = Path::new(target);
                (PATH_BACKED_SCHEMES.contains(&scheme.as_str()) && target.is_absolute())
                    .then_some(target)
            }
        }
    }

    /// String form passed to recipes and hashed into cache keys.
    pub fn source_string(&self) -> String {
        match (self.real_path(), self) {
            (Some(p), _) => p.to_string_lossy().into_owned(),
            (None, FileIdentity::Virtual { raw, .. }) => raw.clone(),
            (None, FileIdentity::Real(p)) => p.to_string_lossy().into_owned(),
        }
    }
}

/// `s` as an absolute path without touching the filesystem. Falls back to
/// the raw string when the current directory is unavailable.
fn absolute_or_raw(s: &str) -> PathBuf {
    std::path::absolute(s).unwrap_or_else(|_| PathBuf::from(s))
}

impl fmt::Display for FileIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FileIdentity::Real(p) => write!(f, "{}", p.display()),
            FileIdentity::Virtual { raw, .. } => f.write_str(raw),
        }
    }
}
