//! Recipe templates: substitution, selection and execution.
//!
//! A recipe is a single shell command line. Every [`PLACEHOLDER`] in it is
//! replaced with the shell-quoted source path; the viewport size reaches the
//! process through `PEEKCACHE_WIDTH` / `PEEKCACHE_HEIGHT`.

use std::fs::File;
use std::os::unix::process::ExitStatusExt;
use std::process::{Command, ExitStatus, Stdio};

use log::{debug, info};
use nix::sys::signal::Signal;
use regex::Regex;

use crate::error::{Error, Result};

pub const PLACEHOLDER: &str = "{file}";

pub const ENV_WIDTH: &str = "PEEKCACHE_WIDTH";
pub const ENV_HEIGHT: &str = "PEEKCACHE_HEIGHT";

/// Substitute the quoted `source` for every placeholder in `recipe`.
pub fn render(recipe: &str, source: &str) -> Result<String> {
    let quoted = shlex::try_quote(source)
        .map_err(|e| Error::generation(format!("cannot quote {source:?}: {e}")))?;
    Ok(recipe.replace(PLACEHOLDER, &quoted))
}

/// Run `recipe` against `source` with stdout going to `stdout`.
///
/// Spawn failure, wait failure, a non-zero exit and death by signal are all
/// reported as [`Error::GenerationError`].
pub fn run_into(recipe: &str, source: &str, width: u16, height: u16, stdout: File) -> Result<()> {
    let command = render(recipe, source)?;
    debug!("recipe: sh -c {command:?} ({width}x{height})");

    let child = Command::new("sh")
        .arg("-c")
        .arg(&command)
        .env(ENV_WIDTH, width.to_string())
        .env(ENV_HEIGHT, height.to_string())
        .stdin(Stdio::null())
        .stdout(Stdio::from(stdout))
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|e| Error::generation(format!("failed to spawn sh: {e}")))?;

    let output = child
        .wait_with_output()
        .map_err(|e| Error::generation(format!("failed to wait for recipe: {e}")))?;

    if output.status.success() {
        info!("recipe: finished {command:?}");
        return Ok(());
    }

    let stderr = String::from_utf8_lossy(&output.stderr);
    let last = stderr.lines().rev().find(|l| !l.trim().is_empty()).unwrap_or("");
    let mut message = describe_status(output.status);
    if !last.is_empty() {
        message.push_str(": ");
        message.push_str(last.trim());
    }
    Err(Error::generation(message))
}

fn describe_status(status: ExitStatus) -> String {
    if let Some(code) = status.code() {
        return format!("recipe exited with status {code}");
    }
    match status.signal().map(Signal::try_from) {
        Some(Ok(sig)) => format!("recipe killed by {}", sig.as_str()),
        Some(Err(_)) | None => format!("recipe terminated abnormally ({status})"),
    }
}

/// One `[[rule]]` entry: recipes chosen by matching the source path.
#[derive(Debug, Clone)]
pub struct Rule {
    pattern: Regex,
    run: String,
}

#[derive(Debug, Clone, Default)]
pub struct Rules {
    rules: Vec<Rule>,
}

impl Rules {
    pub fn new<'a, I>(entries: I) -> std::result::Result<Self, regex::Error>
    where
        I: IntoIterator<Item = (&'a str, &'a str)>,
    {
        let rules = entries
            .into_iter()
            .map(|(pattern, run)| -> std::result::Result<Rule, regex::Error> {
                Ok(Rule {
                    pattern: Regex::new(pattern)?,
                    run: run.to_string(),
                })
            })
            .collect::<std::result::Result<Vec<_>, regex::Error>>()?;
        Ok(Self { rules })
    }

    /// First recipe whose pattern matches `source`.
    pub fn select(&self, source: &str) -> Option<&str> {
        self.rules
            .iter()
            .find(|r| r.pattern.is_match(source))
            .map(|r| r.run.as_str())
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run_to_string(recipe: &str, source: &str) -> String {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("out");
        run_into(recipe, source, 80, 24, File::create(&out).unwrap()).unwrap();
        std::fs::read_to_string(&out).unwrap()
    }

    #[test]
    fn quoted_path_reaches_process_intact() {
        let weird = "/tmp/a b's $HOME;`x`.txt";
        assert_eq!(run_to_string("printf '%s' {file}", weird), weird);
    }

    #[test]
    fn every_placeholder_replaced() {
        let cmd = render("diff {file} {file}", "/x").unwrap();
        assert!(!cmd.contains(PLACEHOLDER));
        assert_eq!(run_to_string("printf '%s|' {file} {file}", "/x"), "/x|/x|");
    }

    #[test]
    fn nul_in_path_rejected() {
        let err = render("cat {file}", "/tmp/a\0b").unwrap_err();
        assert!(matches!(err, Error::GenerationError { .. }));
    }

    #[test]
    fn runs_with_env() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("out");
        let file = File::create(&out).unwrap();
        run_into(
            "printf '%s %s\\n' \"$PEEKCACHE_WIDTH\" \"$PEEKCACHE_HEIGHT\"",
            "/unused",
            80,
            24,
            file,
        )
        .unwrap();
        assert_eq!(std::fs::read_to_string(&out).unwrap(), "80 24\n");
    }

    #[test]
    fn failure_reports_stderr() {
        let dir = tempfile::tempdir().unwrap();
        let file = File::create(dir.path().join("out")).unwrap();
        let err = run_into("echo broken >&2; exit 3", "/unused", 80, 24, file).unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("status 3"), "{msg}");
        assert!(msg.contains("broken"), "{msg}");
    }

    #[test]
    fn signal_named() {
        let dir = tempfile::tempdir().unwrap();
        let file = File::create(dir.path().join("out")).unwrap();
        let err = run_into("kill -9 $$", "/unused", 80, 24, file).unwrap_err();
        assert!(err.to_string().contains("SIGKILL"), "{err}");
    }

    #[test]
    fn first_matching_rule_wins() {
        let rules = Rules::new([
            (r"\.md$", "glow {file}"),
            (r".*", "cat {file}"),
        ])
        .unwrap();
        assert_eq!(rules.select("/a/readme.md"), Some("glow {file}"));
        assert_eq!(rules.select("/a/main.rs"), Some("cat {file}"));
        assert_eq!(rules.len(), 2);
    }

    #[test]
    fn no_rules_no_recipe() {
        assert_eq!(Rules::default().select("/a"), None);
        assert!(Rules::default().is_empty());
    }

    #[test]
    fn bad_pattern() {
        assert!(Rules::new([("(", "cat {file}")]).is_err());
    }
}
