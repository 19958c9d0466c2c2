//! CLI entry point for tooldetect.
//!
//! This binary wraps the detection engine with a marker-file predicate: a
//! directory is an installation when a given relative path exists inside it.
//!
//! # Usage
//!
//! ```bash
//! tooldetect [OPTIONS] --marker <RELPATH> <COMMAND>
//!
//! # Find a JDK under JAVA_HOME or next to javac on PATH
//! tooldetect --marker release --env JAVA_HOME --exe javac --depth 1 scan
//!
//! # Keep watching and print every change as a JSON line
//! tooldetect --marker bin/adb --path ~/Android/Sdk watch --redetect
//! ```

#![deny(clippy::all)]
#![warn(missing_docs)]

use std::io::Write;
use std::time::Duration;

use camino::{Utf8Path, Utf8PathBuf};
use clap::{Parser, Subcommand};
use color_eyre::eyre::{WrapErr, eyre};
use serde_json::{Value, json};
use td_core::Config;
use td_detect::{DetectEngine, DetectEvent, DetectOptions, EngineOptions, SyncCheck};
use tracing::{debug, info};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

// =============================================================================
// CLI ARGUMENT TYPES
// =============================================================================

/// Detects tool installations by looking for a marker file.
///
/// Search locations come from `--path`, environment variables naming
/// directories, and the directory of an executable found on `PATH`.
#[derive(Parser)]
#[command(name = "tooldetect", version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Command to execute.
    #[command(subcommand)]
    command: Commands,

    /// Path, relative to a candidate directory, that marks an installation.
    #[arg(short, long, global = true, env = "TOOLDETECT_MARKER")]
    marker: Option<Utf8PathBuf>,

    /// Directory to search. May be repeated.
    #[arg(short, long = "path", global = true)]
    paths: Vec<Utf8PathBuf>,

    /// How many levels below each search path to descend.
    #[arg(short, long, global = true)]
    depth: Option<u32>,

    /// Collect every installation instead of stopping at the first.
    #[arg(long, global = true)]
    multiple: bool,

    /// Environment variable holding a search path. May be repeated.
    #[arg(short, long = "env", global = true)]
    envs: Vec<String>,

    /// Executable whose directory on `PATH` is searched.
    #[arg(long, global = true)]
    exe: Option<String>,

    /// JSON configuration file; flags override its engine settings.
    #[arg(short, long, global = true, env = "TOOLDETECT_CONFIG")]
    config: Option<Utf8PathBuf>,

    /// Enable verbose logging (debug level).
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Disable colored output.
    #[arg(long, global = true)]
    no_color: bool,
}

/// Available subcommands.
#[derive(Subcommand)]
enum Commands {
    /// Scan once and print the results as JSON.
    Scan {
        /// Ignore cached results.
        #[arg(short, long)]
        force: bool,
    },

    /// Print results as JSON lines until interrupted.
    Watch {
        /// Also watch inside matched installations.
        #[arg(long)]
        redetect: bool,

        /// Debounce window in milliseconds.
        #[arg(long)]
        debounce_ms: Option<u64>,
    },
}

// =============================================================================
// INITIALIZATION FUNCTIONS
// =============================================================================

/// Initializes the tracing subscriber for logging.
///
/// Respects `RUST_LOG` if set. Otherwise uses `debug` with `--verbose` and
/// `info` by default, with `notify` filtered to `warn`. Logs go to stderr so
/// stdout stays valid JSON.
fn init_tracing(verbose: bool, no_color: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        let level = if verbose { "debug" } else { "info" };
        EnvFilter::new(format!("{level},notify=warn"))
    });

    let use_ansi = !no_color && std::env::var("NO_COLOR").is_err();

    tracing_subscriber::registry()
        .with(
            fmt::layer()
                .with_target(false)
                .with_ansi(use_ansi)
                .with_writer(std::io::stderr),
        )
        .with(filter)
        .init();
}

/// Builds a [`Config`] from the optional file and CLI overrides.
///
/// # Errors
///
/// Returns an error if the file cannot be loaded or the merged settings are
/// invalid.
fn build_config(cli: &Cli) -> color_eyre::Result<Config> {
    let mut config = match &cli.config {
        Some(path) => Config::load(path)
            .wrap_err_with(|| format!("Failed to load configuration from {path}"))?,
        None => Config::default(),
    };

    let engine = &mut config.engine;
    engine.paths.extend(cli.paths.iter().cloned());
    engine.env.extend(cli.envs.iter().cloned());
    if let Some(depth) = cli.depth {
        engine.depth = depth;
    }
    if cli.exe.is_some() {
        engine.exe.clone_from(&cli.exe);
    }
    engine.multiple |= cli.multiple;
    engine.validate()?;

    if let Commands::Watch {
        redetect,
        debounce_ms,
    } = &cli.command
    {
        config.watch.redetect |= *redetect;
        if let Some(ms) = debounce_ms {
            config.watch.debounce_ms = *ms;
        }
    }

    Ok(config)
}

/// Returns a predicate matching directories that contain `marker`.
fn marker_check(
    marker: Utf8PathBuf,
) -> SyncCheck<impl Fn(&Utf8Path) -> anyhow::Result<Option<Value>> + Send + Sync> {
    SyncCheck::new(move |dir: &Utf8Path| -> anyhow::Result<Option<Value>> {
        let found = dir.join(&marker).try_exists()?;
        Ok(found.then(|| {
            json!({
                "id": dir.as_str(),
                "path": dir.as_str(),
                "marker": marker.as_str(),
            })
        }))
    })
}

/// Creates the engine for `config` and `--marker`.
///
/// # Errors
///
/// Returns an error if the marker is missing or absolute, or the engine
/// rejects the options.
fn create_engine(cli: &Cli, config: &Config) -> color_eyre::Result<DetectEngine> {
    let marker = cli
        .marker
        .clone()
        .ok_or_else(|| eyre!("--marker is required"))?;
    if marker.as_str().is_empty() || marker.is_absolute() {
        return Err(eyre!("--marker must be a non-empty relative path: {marker}"));
    }

    let options = EngineOptions::from_settings(&config.engine, marker_check(marker))
        .with_watch_config(&config.watch);
    debug!(options = ?options, "Engine options");
    Ok(DetectEngine::new(options)?)
}

// =============================================================================
// COMMAND IMPLEMENTATIONS
// =============================================================================

/// Runs a one-shot detection and prints the results.
///
/// # Errors
///
/// Returns an error if detection fails or stdout cannot be written.
async fn run_scan(engine: &DetectEngine, force: bool) -> color_eyre::Result<()> {
    info!("Starting scan");

    let results = engine
        .detect_once(DetectOptions {
            force,
            ..DetectOptions::default()
        })
        .await?;

    let stdout = std::io::stdout();
    let mut handle = stdout.lock();
    writeln!(handle, "{}", serde_json::to_string_pretty(&results.value())?)?;
    Ok(())
}

/// Watches for changes, printing each results event as one JSON line.
///
/// # Errors
///
/// Returns an error if detection fails or stdout cannot be written.
async fn run_watch(engine: &DetectEngine, config: &Config) -> color_eyre::Result<()> {
    info!(
        redetect = config.watch.redetect,
        debounce = ?Duration::from_millis(config.watch.debounce_ms),
        "Starting watch"
    );

    let mut handle = engine.detect(DetectOptions {
        redetect: config.watch.redetect,
        ..DetectOptions::watching()
    });

    loop {
        tokio::select! {
            signal = tokio::signal::ctrl_c() => {
                signal?;
                info!("Interrupted, shutting down");
                break;
            }
            event = handle.recv() => match event {
                Some(DetectEvent::Results(results)) => {
                    let stdout = std::io::stdout();
                    let mut out = stdout.lock();
                    writeln!(out, "{}", serde_json::to_string(&results.value())?)?;
                    out.flush()?;
                }
                Some(DetectEvent::Ready) => info!("Initial scan complete"),
                Some(DetectEvent::Error(err)) => return Err(eyre!("Detection failed: {err}")),
                None => break,
            },
        }
    }

    handle.stop();
    Ok(())
}

// =============================================================================
// MAIN ENTRY POINT
// =============================================================================

/// Application entry point.
#[tokio::main]
async fn main() -> color_eyre::Result<()> {
    color_eyre::install()?;

    let cli = Cli::parse();
    init_tracing(cli.verbose, cli.no_color);

    let config = build_config(&cli)?;
    let engine = create_engine(&cli, &config)?;

    match &cli.command {
        Commands::Scan { force } => run_scan(&engine, *force).await,
        Commands::Watch { .. } => run_watch(&engine, &config).await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_flags_override_defaults() {
        let cli = Cli::try_parse_from([
            "tooldetect",
            "--marker",
            "bin/adb",
            "--path",
            "/opt/sdk",
            "--env",
            "ANDROID_HOME",
            "--depth",
            "2",
            "--multiple",
            "watch",
            "--redetect",
            "--debounce-ms",
            "100",
        ])
        .unwrap();
        let config = build_config(&cli).unwrap();

        assert_eq!(config.engine.paths, vec![Utf8PathBuf::from("/opt/sdk")]);
        assert_eq!(config.engine.env, vec!["ANDROID_HOME".to_owned()]);
        assert_eq!(config.engine.depth, 2);
        assert!(config.engine.multiple);
        assert!(config.watch.redetect);
        assert_eq!(config.watch.debounce_ms, 100);
    }

    #[test]
    fn test_empty_exe_rejected() {
        let cli = Cli::try_parse_from(["tooldetect", "--exe", "", "scan"]).unwrap();
        assert!(build_config(&cli).is_err());
    }

    #[test]
    fn test_absolute_marker_rejected() {
        let cli = Cli::try_parse_from(["tooldetect", "--marker", "/etc/passwd", "scan"]).unwrap();
        let config = build_config(&cli).unwrap();
        assert!(create_engine(&cli, &config).is_err());
    }
}
