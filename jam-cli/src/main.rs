use anyhow::{Context, Result};
use clap::Parser;
use jam_core::plugin::host_directory;
use jam_core::settings::LoggingSettings;
use jam_core::{Host, NativeLoader, SettingsManager, TracingSink};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tracing::info;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "rjam")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "jam host - loads the control plugin next to this executable and runs it once")]
struct Args {
    /// Load settings from a specific TOML file
    #[arg(long, value_name = "PATH")]
    settings: Option<PathBuf>,

    /// Log level or filter directive, overrides the settings file
    #[arg(long, value_name = "LEVEL")]
    log_level: Option<String>,
}

fn main() -> ExitCode {
    let args = Args::parse();

    match run(args) {
        Ok(code) => code,
        Err(e) => {
            eprintln!("rjam: {e:#}");
            ExitCode::from(1)
        }
    }
}

fn run(args: Args) -> Result<ExitCode> {
    let manager = SettingsManager::load_or_default(args.settings.as_deref())?;
    let settings = manager.settings();
    setup_tracing(&settings.logging, args.log_level.as_deref())?;

    info!(
        "Host startup: settings={:?}, address={}",
        manager.path(),
        settings.invoke.address
    );

    let dir = host_directory()?;
    let host = Host::new(NativeLoader, TracingSink::shared(), settings.invoke.clone());
    let outcome = host.run(&dir);

    info!("Host finished: success={}", outcome.is_success());
    Ok(ExitCode::from(outcome.exit_code()))
}

fn setup_tracing(logging: &LoggingSettings, log_level: Option<&str>) -> Result<()> {
    use tracing_subscriber::fmt;

    let level = log_level.unwrap_or(&logging.level);
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .with_context(|| format!("Invalid log level {level:?}"))?;

    let file_layer = match &logging.file {
        Some(path) => Some(
            fmt::layer()
                .with_writer(open_log_file(path)?)
                .with_ansi(false)
                .with_target(true)
                .with_file(true)
                .with_line_number(true),
        ),
        None => None,
    };

    tracing_subscriber::registry()
        .with(
            fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(true)
                .with_thread_ids(false),
        )
        .with(file_layer)
        .with(filter)
        .init();

    if let Some(path) = &logging.file {
        info!("Tracing initialized to {:?}", path);
    }
    Ok(())
}

fn open_log_file(path: &Path) -> Result<std::fs::File> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create log directory {parent:?}"))?;
    }

    std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("Failed to open log file {path:?}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parses_flags() {
        let args = Args::try_parse_from([
            "rjam",
            "--settings",
            "/etc/jam/settings.toml",
            "--log-level",
            "debug",
        ])
        .unwrap();

        assert_eq!(args.settings, Some(PathBuf::from("/etc/jam/settings.toml")));
        assert_eq!(args.log_level.as_deref(), Some("debug"));
    }

    #[test]
    fn test_rejects_search_path() {
        assert!(Args::try_parse_from(["rjam", "--plugin-dir", "/tmp"]).is_err());
    }
}
