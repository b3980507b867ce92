//! `tfe-watch`: follow TFE events and plan/apply logs from the terminal.
//!
//! Reads `TFE_TOKEN` and `TFE_ADDRESS` from the environment (or a `.env` file).

mod logging;

use std::process::ExitCode;

use clap::{Parser, Subcommand};
use tfe_client::{Client, ClientError, JobKind, LogReadError};
use tokio::io::AsyncWriteExt as _;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

#[derive(Parser)]
#[command(name = "tfe-watch")]
#[command(about = "Follow TFE events and job logs", version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    #[command(flatten)]
    log: logging::LogArgs,
}

#[derive(Subcommand)]
enum Commands {
    /// Print events as they arrive, one per line
    Events {
        /// Subscriber identifier
        #[arg(long, default_value = "tfe-watch")]
        id: String,
    },

    /// Stream a plan's log until the plan finishes
    PlanLogs {
        /// Plan ID
        id: String,
    },

    /// Stream an apply's log until the apply finishes
    ApplyLogs {
        /// Apply ID
        id: String,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    let _log_guard = match logging::init(&cli.log) {
        Ok(guard) => guard,
        Err(err) => {
            eprintln!("tfe-watch: {err}");
            return ExitCode::from(2);
        }
    };

    let client = match Client::from_env() {
        Ok(client) => client,
        Err(err) => {
            eprintln!("tfe-watch: {err}");
            return ExitCode::from(2);
        }
    };

    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!(event = "cli.interrupted", domain = "cli");
            on_signal.cancel();
        }
    });

    let result = match cli.command {
        Commands::Events { id } => watch_events(&client, &id, cancel).await,
        Commands::PlanLogs { id } => follow_logs(&client, JobKind::Plan, &id, cancel).await,
        Commands::ApplyLogs { id } => follow_logs(&client, JobKind::Apply, &id, cancel).await,
    };
    match result {
        Ok(code) => code,
        Err(err) => {
            eprintln!("tfe-watch: {err}");
            ExitCode::FAILURE
        }
    }
}

async fn watch_events(
    client: &Client,
    id: &str,
    cancel: CancellationToken,
) -> Result<ExitCode, Box<dyn std::error::Error>> {
    let mut subscription = client.events().subscribe(id).await?;
    let mut stdout = tokio::io::stdout();
    let code = loop {
        let event = tokio::select! {
            _ = cancel.cancelled() => break ExitCode::from(130),
            event = subscription.recv() => event,
        };
        let Some(event) = event else {
            break ExitCode::SUCCESS;
        };
        if let Some(failure) = event.failure() {
            warn!(event = "cli.stream_failed", domain = "cli", code = %failure.kind);
            eprintln!("tfe-watch: {failure}");
            break ExitCode::FAILURE;
        }
        let line = format!("{}\t{}\n", event.kind, event.payload);
        stdout.write_all(line.as_bytes()).await?;
        stdout.flush().await?;
    };
    subscription.close().await?;
    Ok(code)
}

async fn follow_logs(
    client: &Client,
    kind: JobKind,
    id: &str,
    cancel: CancellationToken,
) -> Result<ExitCode, Box<dyn std::error::Error>> {
    let jobs = match kind {
        JobKind::Plan => client.plans(),
        JobKind::Apply => client.applies(),
    };
    let mut reader = match jobs.logs(id, cancel).await {
        Ok(reader) => reader,
        Err(ClientError::Cancelled) => return Ok(ExitCode::from(130)),
        Err(err) => return Err(err.into()),
    };
    let mut stdout = tokio::io::stdout();
    loop {
        match reader.read_chunk().await {
            Ok(Some(chunk)) => {
                stdout.write_all(&chunk).await?;
                stdout.flush().await?;
            }
            Ok(None) => return Ok(ExitCode::SUCCESS),
            Err(LogReadError::Cancelled) => return Ok(ExitCode::from(130)),
            Err(err) => return Err(err.into()),
        }
    }
}
