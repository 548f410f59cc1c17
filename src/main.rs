use std::io::Write;
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use log::{error, info};

use peekcache::config::{self, Config};
use peekcache::key::PathResolver;
use peekcache::lock::DirLock;
use peekcache::paginate;
use peekcache::watch::SourceWatcher;
use peekcache::{Coordinator, FileIdentity, Pager, PeekOutcome, PeekRequest, Request};

/// Exit status telling the host to re-dispatch with the printed skip.
const EXIT_REDIRECT: u8 = 3;

/// Quiet period after a write before `preload --watch` re-runs the recipe.
const WATCH_SETTLE: Duration = Duration::from_millis(200);

#[derive(Parser)]
#[command(
    name = "peekcache",
    version = env!("PEEKCACHE_LONG_VERSION"),
    about = "Cached, paginated file previews driven by shell recipes"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Log output file path (logs go to stderr via RUST_LOG otherwise)
    #[arg(long, global = true)]
    log: Option<PathBuf>,

    /// Cache root (overrides config and XDG default)
    #[arg(long, global = true)]
    cache_dir: Option<PathBuf>,

    /// Give up on a contended lock after this many milliseconds
    #[arg(long, global = true)]
    lock_timeout_ms: Option<u64>,
}

#[derive(Args)]
struct Target {
    /// File to preview (plain path or a virtual identity such as search://q//path)
    file: String,

    /// Viewport width in columns
    #[arg(long)]
    width: u16,

    /// Viewport height in lines
    #[arg(long)]
    height: u16,

    /// Recipe to run; `{file}` is replaced with the quoted path
    #[arg(long)]
    recipe: Option<String>,
}

#[derive(Subcommand)]
enum Command {
    /// Make sure a fresh cache entry exists (no output)
    Preload {
        #[command(flatten)]
        target: Target,

        /// Keep running and re-warm whenever the file changes
        #[arg(long)]
        watch: bool,
    },
    /// Translate a scroll delta into the skip of the next peek
    Seek {
        /// Current cursor
        #[arg(long)]
        skip: u64,

        /// Lines to scroll (negative scrolls up)
        #[arg(long, allow_hyphen_values = true)]
        units: i64,
    },
    /// Print the window starting at `--skip`, generating the entry if needed
    Peek {
        #[command(flatten)]
        target: Target,

        #[arg(long, default_value_t = 0)]
        skip: u64,

        /// Follow a redirect instead of reporting it
        #[arg(long)]
        follow: bool,
    },
    /// Remove the cache entry plus any leftover lock or temp file
    Clear {
        #[command(flatten)]
        target: Target,
    },
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    if let Some(log_path) = &cli.log {
        match std::fs::File::create(log_path) {
            Ok(file) => env_logger::Builder::from_default_env()
                .target(env_logger::Target::Pipe(Box::new(file)))
                .init(),
            Err(e) => {
                eprintln!("Error: failed to open log file {}: {e}", log_path.display());
                return ExitCode::FAILURE;
            }
        }
    } else {
        env_logger::init();
    }

    // Load config file and merge CLI overrides
    let mut cfg = match config::load_config() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Error: {e:#}");
            return ExitCode::FAILURE;
        }
    };
    cfg.merge_cli(cli.cache_dir, cli.lock_timeout_ms);
    let config = match cfg.resolve() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Error: {e:#}");
            return ExitCode::FAILURE;
        }
    };

    match run(cli.command, &config) {
        Ok(code) => code,
        Err(e) => {
            eprintln!("Error: {e:#}");
            ExitCode::FAILURE
        }
    }
}

fn run(command: Command, config: &Config) -> Result<ExitCode> {
    let pager = build_pager(config);
    match command {
        Command::Preload { target, watch } => cmd_preload(&pager, config, &target, watch),
        Command::Seek { skip, units } => {
            println!("{}", paginate::seek(skip, units, config.jump_threshold));
            Ok(ExitCode::SUCCESS)
        }
        Command::Peek {
            target,
            skip,
            follow,
        } => cmd_peek(&pager, config, &target, skip, follow),
        Command::Clear { target } => {
            pager.coordinator().clear(&request(config, &target))?;
            Ok(ExitCode::SUCCESS)
        }
    }
}

fn build_pager(config: &Config) -> Pager {
    let coordinator = Coordinator::with_lock_manager(
        PathResolver::new(config.cache_dir.clone()),
        config.timing,
        DirLock::with_stale_after(config.stale_lock_after),
    );
    Pager::new(coordinator, config.jump_threshold)
}

/// Build the request, picking a recipe from `[[rule]]` when none was given.
fn request(config: &Config, target: &Target) -> Request {
    let identity = FileIdentity::parse(&target.file);
    let recipe = target
        .recipe
        .clone()
        .or_else(|| config.rules.select(&identity.source_string()).map(str::to_string));
    let req = Request::new(identity, target.width, target.height);
    match recipe {
        Some(r) => req.with_recipe(r),
        None => req,
    }
}

fn cmd_preload(pager: &Pager, config: &Config, target: &Target, watch: bool) -> Result<ExitCode> {
    let req = request(config, target);
    let ok = preload_once(pager, &req);
    if !watch {
        return Ok(if ok { ExitCode::SUCCESS } else { ExitCode::FAILURE });
    }

    let path = req
        .identity
        .real_path()
        .with_context(|| format!("{} has no real path to watch", req.identity))?
        .to_path_buf();
    let watcher = SourceWatcher::new(&path, WATCH_SETTLE)
        .with_context(|| format!("failed to watch {}", path.display()))?;
    info!("preload: watching {}", watcher.source().display());
    loop {
        if watcher.next_change(Duration::from_secs(3600)) {
            info!("preload: {} changed, re-warming", watcher.source().display());
            preload_once(pager, &req);
        }
    }
}

fn preload_once(pager: &Pager, req: &Request) -> bool {
    let started = Instant::now();
    match pager.preload(req) {
        Ok(ensured) => {
            info!(
                "preload: {} ready ({} lines, generated={}) in {:.1}ms",
                req.identity,
                ensured.header.line_count,
                ensured.generated,
                started.elapsed().as_secs_f64() * 1000.0
            );
            true
        }
        Err(e) => {
            error!("preload: {} failed: {e}", req.identity);
            false
        }
    }
}

fn cmd_peek(
    pager: &Pager,
    config: &Config,
    target: &Target,
    skip: u64,
    follow: bool,
) -> Result<ExitCode> {
    let req = PeekRequest::new(request(config, target), skip);
    let mut outcome = pager.peek(&req);
    if follow && let PeekOutcome::Redirect(next) = &outcome {
        let next = next.clone();
        info!("peek: following redirect {} -> {}", req.skip, next.skip);
        outcome = pager.peek(&next);
    }

    let mut out = std::io::stdout().lock();
    match outcome {
        PeekOutcome::Window(window) => {
            for line in &window.lines {
                writeln!(out, "{line}")?;
            }
            Ok(ExitCode::SUCCESS)
        }
        PeekOutcome::Redirect(next) => {
            writeln!(out, "redirect {}", next.skip)?;
            Ok(ExitCode::from(EXIT_REDIRECT))
        }
        other => {
            if let Some(msg) = other.render_message() {
                writeln!(out, "{msg}")?;
            }
            Ok(ExitCode::SUCCESS)
        }
    }
}
