mod cli;

use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use barfeat_rs::intraday::run_aggregate;
use barfeat_rs::run_selection;
use barfeat_rs::sources::run_merge;
use cli::{Cli, Commands};
use suites_rs::prepare_features;
use tracing::info;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

fn open_log_writer(path: &Path) -> Result<File> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .with_context(|| format!("Unable to create log directory {}", parent.display()))?;
    }
    OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("Unable to open log file {}", path.display()))
}

/// Console logging, plus an ANSI-free copy appended to `log_file` when one is
/// given. Keep the returned guard alive until exit or buffered lines are lost.
fn init_tracing(log_file: Option<&Path>) -> Result<Option<WorkerGuard>> {
    let filter = EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new("info"))?;
    let (file_layer, guard) = match log_file {
        Some(path) => {
            let (writer, guard) = tracing_appender::non_blocking(open_log_writer(path)?);
            let layer = fmt::layer().with_ansi(false).with_writer(writer);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer())
        .with(file_layer)
        .try_init()
        .context("Unable to install the tracing subscriber")?;
    Ok(guard)
}

fn log_invocation(log_file: Option<&PathBuf>) {
    let cwd = std::env::current_dir().ok();
    let argv: Vec<String> = std::env::args_os()
        .map(|arg| arg.to_string_lossy().into_owned())
        .collect();

    info!("==================== new barfeat_cli run ====================");
    info!(
        version = env!("CARGO_PKG_VERSION"),
        cwd = ?cwd,
        log_file = ?log_file,
        argv = ?argv,
        "barfeat_cli invoked"
    );
    if argv.len() >= 2 {
        info!(
            "cargo_repro_command=cargo run --release -p barfeat_cli -- {}",
            argv[1..].join(" ")
        );
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_file = cli.command.log_file();
    let _log_guard = init_tracing(log_file.as_deref())?;
    log_invocation(log_file.as_ref());

    match cli.command {
        Commands::Features(args) => {
            let config = args.into_config()?;
            let path = prepare_features(&config)?;
            info!(path = %path.display(), "Feature panel ready");
        }
        Commands::Select(args) => {
            let config = args.into_config()?;
            let report = run_selection(&config)?;
            info!(
                retained = report.retained.len(),
                audited = report.columns.len(),
                config_hash = report.config_hash.as_deref().unwrap_or_default(),
                "Selection finished"
            );
        }
        Commands::Aggregate(args) => {
            let config = args.into_config()?;
            let path = run_aggregate(&config)?;
            info!(path = %path.display(), "Daily RTH bars ready");
        }
        Commands::Merge(args) => {
            let config = args.into_config()?;
            let path = run_merge(&config)?;
            info!(path = %path.display(), "Merged panel ready");
        }
    }
    Ok(())
}
