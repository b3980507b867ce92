//! Diagnostics for the CLI.
//!
//! stdout carries events and log bytes, so diagnostics go to stderr or, with
//! `--log-file`, to a JSON lines file.

use std::error::Error;
use std::path::{Path, PathBuf};

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt as _;
use tracing_subscriber::util::SubscriberInitExt as _;

/// Directive used when neither a flag nor the environment picks one.
const DEFAULT_DIRECTIVE: &str = "warn";

#[derive(clap::Args, Debug, Clone, Default)]
pub struct LogArgs {
    /// More diagnostics: -v info, -vv debug, -vvv trace (overrides TFE_LOG_LEVEL)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// No diagnostics at all
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    pub quiet: bool,

    /// Write diagnostics as JSON lines to this file instead of stderr
    #[arg(long, env = "TFE_JSON_LOG_PATH", global = true)]
    pub log_file: Option<PathBuf>,
}

/// Installs the global subscriber.
///
/// The returned guard flushes the file writer on drop and must live until
/// the command finishes.
pub fn init(args: &LogArgs) -> Result<Option<WorkerGuard>, Box<dyn Error>> {
    if args.quiet {
        return Ok(None);
    }
    let directive = filter_directive(args.verbose, configured_directive());
    let filter = EnvFilter::try_new(&directive)
        .map_err(|e| format!("invalid log filter {directive:?}: {e}"))?;

    let Some(path) = &args.log_file else {
        let console = tracing_subscriber::fmt::layer()
            .compact()
            .with_target(false)
            .with_writer(std::io::stderr);
        tracing_subscriber::registry()
            .with(filter)
            .with(console)
            .try_init()?;
        return Ok(None);
    };

    let (dir, file_name) = split_log_path(path)?;
    std::fs::create_dir_all(&dir)
        .map_err(|e| format!("cannot create log directory {}: {e}", dir.display()))?;
    let (writer, guard) =
        tracing_appender::non_blocking(tracing_appender::rolling::never(dir, file_name));
    let json = tracing_subscriber::fmt::layer()
        .json()
        .with_current_span(true)
        .with_span_list(true)
        .with_writer(writer);
    tracing_subscriber::registry()
        .with(filter)
        .with(json)
        .try_init()?;
    Ok(Some(guard))
}

/// `TFE_LOG_LEVEL`, then `RUST_LOG`.
fn configured_directive() -> Option<String> {
    std::env::var("TFE_LOG_LEVEL")
        .ok()
        .or_else(|| std::env::var("RUST_LOG").ok())
}

fn filter_directive(verbose: u8, configured: Option<String>) -> String {
    match verbose {
        0 => configured
            .filter(|directive| !directive.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_DIRECTIVE.to_string()),
        1 => "info".to_string(),
        2 => "debug".to_string(),
        _ => "trace".to_string(),
    }
}

fn split_log_path(path: &Path) -> Result<(PathBuf, String), String> {
    let file_name = path
        .file_name()
        .and_then(|name| name.to_str())
        .ok_or_else(|| format!("log file path has no file name: {}", path.display()))?;
    let dir = path
        .parent()
        .filter(|parent| !parent.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    Ok((dir.to_path_buf(), file_name.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flags_override_the_environment() {
        assert_eq!(filter_directive(0, None), "warn");
        assert_eq!(filter_directive(0, Some("  ".into())), "warn");
        assert_eq!(
            filter_directive(0, Some("tfe_client=debug".into())),
            "tfe_client=debug"
        );
        assert_eq!(filter_directive(1, Some("error".into())), "info");
        assert_eq!(filter_directive(2, None), "debug");
        assert_eq!(filter_directive(7, None), "trace");
    }

    #[test]
    fn log_path_splits_into_directory_and_file() {
        assert_eq!(
            split_log_path(Path::new("logs/watch.jsonl")).expect("split"),
            (PathBuf::from("logs"), "watch.jsonl".to_string())
        );
        assert_eq!(
            split_log_path(Path::new("watch.jsonl")).expect("split"),
            (PathBuf::from("."), "watch.jsonl".to_string())
        );
        assert!(split_log_path(Path::new("/")).is_err());
    }

    #[test]
    fn quiet_installs_nothing() {
        let args = LogArgs {
            quiet: true,
            ..LogArgs::default()
        };
        assert!(init(&args).expect("init").is_none());
    }
}
