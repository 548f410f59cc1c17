use std::path::PathBuf;
use std::time::Duration;

use log::{debug, info};
use serde::Deserialize;

use crate::coordinator::Timing;
use crate::paginate::DEFAULT_JUMP_THRESHOLD;
use crate::recipe::Rules;

// ---------------------------------------------------------------------------
// ConfigFile: deserialized from TOML (all fields optional)
// ---------------------------------------------------------------------------

#[derive(Default, Deserialize)]
#[serde(default)]
pub struct ConfigFile {
    pub cache_dir: Option<PathBuf>,
    pub enabled: Option<bool>,
    #[serde(default)]
    pub lock: LockConfigFile,
    #[serde(default)]
    pub wait: WaitConfigFile,
    #[serde(default)]
    pub paging: PagingConfigFile,
    #[serde(default, rename = "rule")]
    pub rules: Vec<RuleConfigFile>,
}

#[derive(Default, Deserialize)]
#[serde(default)]
pub struct LockConfigFile {
    pub timeout_ms: Option<u64>,
    pub poll_ms: Option<u64>,
    pub stale_after_ms: Option<u64>,
}

#[derive(Default, Deserialize)]
#[serde(default)]
pub struct WaitConfigFile {
    pub timeout_ms: Option<u64>,
    pub poll_ms: Option<u64>,
}

#[derive(Default, Deserialize)]
#[serde(default)]
pub struct PagingConfigFile {
    pub jump_threshold: Option<u64>,
}

#[derive(Deserialize)]
pub struct RuleConfigFile {
    pub pattern: String,
    pub run: String,
}

// ---------------------------------------------------------------------------
// Config: resolved (all fields concrete)
// ---------------------------------------------------------------------------

pub struct Config {
    /// `None` when caching is disabled or no root could be determined.
    pub cache_dir: Option<PathBuf>,
    pub timing: Timing,
    pub stale_lock_after: Option<Duration>,
    pub jump_threshold: u64,
    pub rules: Rules,
}

impl ConfigFile {
    /// Merge CLI values (overwrites non-None fields).
    pub fn merge_cli(&mut self, cache_dir: Option<PathBuf>, lock_timeout_ms: Option<u64>) {
        if let Some(ref v) = cache_dir {
            debug!("config: CLI override cache_dir={}", v.display());
            self.cache_dir = cache_dir;
        }
        if let Some(v) = lock_timeout_ms {
            debug!("config: CLI override lock.timeout_ms={v}");
            self.lock.timeout_ms = lock_timeout_ms;
        }
    }

    /// Resolve to a Config by applying defaults to missing fields.
    pub fn resolve(self) -> anyhow::Result<Config> {
        let defaults = Timing::default();
        let ms = |v: Option<u64>, d: Duration| v.map(Duration::from_millis).unwrap_or(d);

        let cache_dir = if self.enabled.unwrap_or(true) {
            self.cache_dir.or_else(default_cache_dir)
        } else {
            None
        };

        let rules = Rules::new(
            self.rules
                .iter()
                .map(|r| (r.pattern.as_str(), r.run.as_str())),
        )
        .map_err(|e| anyhow::anyhow!("invalid [[rule]] pattern: {e}"))?;

        let config = Config {
            cache_dir,
            timing: Timing {
                lock_timeout: ms(self.lock.timeout_ms, defaults.lock_timeout),
                lock_poll: ms(self.lock.poll_ms, defaults.lock_poll),
                wait_timeout: ms(self.wait.timeout_ms, defaults.wait_timeout),
                wait_poll: ms(self.wait.poll_ms, defaults.wait_poll),
            },
            stale_lock_after: self.lock.stale_after_ms.map(Duration::from_millis),
            jump_threshold: self.paging.jump_threshold.unwrap_or(DEFAULT_JUMP_THRESHOLD),
            rules,
        };
        info!(
            "config: resolved cache_dir={}, lock_timeout={}ms, lock_poll={}ms, \
             wait_timeout={}ms, wait_poll={}ms, stale_lock_after={}, \
             jump_threshold={}, rules={}",
            config
                .cache_dir
                .as_ref()
                .map_or_else(|| "<disabled>".to_string(), |p| p.display().to_string()),
            config.timing.lock_timeout.as_millis(),
            config.timing.lock_poll.as_millis(),
            config.timing.wait_timeout.as_millis(),
            config.timing.wait_poll.as_millis(),
            config
                .stale_lock_after
                .map_or_else(|| "never".to_string(), |d| format!("{}ms", d.as_millis())),
            config.jump_threshold,
            config.rules.len(),
        );
        Ok(config)
    }
}

/// Resolve the XDG cache root for peekcache.
fn default_cache_dir() -> Option<PathBuf> {
    let cache_home = std::env::var_os("XDG_CACHE_HOME")
        .map(PathBuf::from)
        .or_else(|| std::env::var_os("HOME").map(|h| PathBuf::from(h).join(".cache")))?;
    Some(cache_home.join("peekcache"))
}

/// Resolve the XDG config path for peekcache.
fn config_path() -> Option<PathBuf> {
    let config_dir = std::env::var_os("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .or_else(|| std::env::var_os("HOME").map(|h| PathBuf::from(h).join(".config")))?;
    Some(config_dir.join("peekcache").join("config.toml"))
}

/// Load config file. Returns `ConfigFile::default()` if no file exists.
/// Returns an error if the file exists but cannot be parsed.
pub fn load_config() -> anyhow::Result<ConfigFile> {
    let path = match config_path() {
        Some(p) => p,
        None => {
            info!("config: no HOME or XDG_CONFIG_HOME set, using defaults");
            return Ok(ConfigFile::default());
        }
    };
    debug!("config: looking for {}", path.display());
    match std::fs::read_to_string(&path) {
        Ok(text) => {
            info!("config: loaded from {}", path.display());
            let cfg: ConfigFile = toml::from_str(&text)
                .map_err(|e| anyhow::anyhow!("failed to parse {}: {e}", path.display()))?;
            Ok(cfg)
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            info!("config: {} not found, using defaults", path.display());
            Ok(ConfigFile::default())
        }
        Err(e) => Err(anyhow::anyhow!("failed to read {}: {e}", path.display())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_toml() {
        let cfg: ConfigFile = toml::from_str("cache_dir = \"/c\"").unwrap();
        let resolved = cfg.resolve().unwrap();
        assert_eq!(resolved.cache_dir, Some(PathBuf::from("/c")));
        assert_eq!(resolved.timing, Timing::default());
        assert_eq!(resolved.stale_lock_after, None);
        assert_eq!(resolved.jump_threshold, DEFAULT_JUMP_THRESHOLD);
        assert!(resolved.rules.is_empty());
    }

    #[test]
    fn partial_toml() {
        let text = r#"
            cache_dir = "/var/cache/pc"
            [lock]
            timeout_ms = 250
            stale_after_ms = 60000
            [paging]
            jump_threshold = 50
        "#;
        let cfg: ConfigFile = toml::from_str(text).unwrap();
        let resolved = cfg.resolve().unwrap();
        assert_eq!(resolved.timing.lock_timeout, Duration::from_millis(250));
        assert_eq!(resolved.stale_lock_after, Some(Duration::from_secs(60)));
        assert_eq!(resolved.jump_threshold, 50);
        // Defaults for unspecified fields
        assert_eq!(resolved.timing.lock_poll, Duration::from_millis(20));
        assert_eq!(resolved.timing.wait_poll, Duration::from_millis(100));
    }

    #[test]
    fn rules_in_order() {
        let text = r#"
            cache_dir = "/c"
            [[rule]]
            pattern = '\.md$'
            run = "glow -w $PEEKCACHE_WIDTH {file}"
            [[rule]]
            pattern = '.*'
            run = "cat {file}"
        "#;
        let cfg: ConfigFile = toml::from_str(text).unwrap();
        let resolved = cfg.resolve().unwrap();
        assert_eq!(
            resolved.rules.select("/x/a.md"),
            Some("glow -w $PEEKCACHE_WIDTH {file}")
        );
        assert_eq!(resolved.rules.select("/x/a.rs"), Some("cat {file}"));
    }

    #[test]
    fn bad_rule_pattern() {
        let text = r#"
            [[rule]]
            pattern = "("
            run = "cat {file}"
        "#;
        let cfg: ConfigFile = toml::from_str(text).unwrap();
        assert!(cfg.resolve().is_err());
    }

    #[test]
    fn disabled_has_no_root() {
        let cfg: ConfigFile = toml::from_str("enabled = false\ncache_dir = \"/c\"").unwrap();
        assert_eq!(cfg.resolve().unwrap().cache_dir, None);
    }

    #[test]
    fn invalid_toml() {
        let text = "this is not valid toml [[[";
        let result = toml::from_str::<ConfigFile>(text);
        assert!(result.is_err());
    }

    #[test]
    fn cli_overrides() {
        let mut cfg: ConfigFile =
            toml::from_str("cache_dir = \"/a\"\n[lock]\ntimeout_ms = 10").unwrap();
        cfg.merge_cli(Some(PathBuf::from("/b")), None);
        let resolved = cfg.resolve().unwrap();
        assert_eq!(resolved.cache_dir, Some(PathBuf::from("/b"))); // CLI wins
        assert_eq!(resolved.timing.lock_timeout, Duration::from_millis(10)); // config kept
    }
}
