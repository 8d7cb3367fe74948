//! presente - command line client for the Presente school-management API.
//!
//! Signs in, lists the students linked to the account and shows subjects
//! and classes for the selected student.

mod commands;

use std::io;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use presente_core::Config;

/// Log file name prefix inside the cache directory
const LOG_FILE: &str = "presente.log";

#[derive(Parser)]
#[command(name = "presente", version, about = "Presente school-management client")]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Override the API base URL for this run.
    #[arg(long, global = true)]
    api_url: Option<String>,
}

#[derive(Subcommand)]
enum Command {
    /// Sign in and store the session.
    Login {
        #[arg(short, long)]
        email: Option<String>,
    },
    /// Create an account.
    Register,
    /// Sign out and clear stored credentials.
    Logout,
    /// Show the current session and selected student.
    Status,
    /// List the students linked to the account.
    Profiles,
    /// Select a student by id.
    Select {
        #[arg(required_unless_present = "clear")]
        id: Option<String>,
        /// Clear the selection instead.
        #[arg(long, conflicts_with = "id")]
        clear: bool,
    },
    /// Show a subject for the selected student.
    Subject { id: String },
    /// List the classes of a subject on a date.
    Classes {
        subject: String,
        /// Date as YYYY-MM-DD (defaults to today).
        #[arg(long)]
        date: Option<String>,
    },
}

/// Initialize the tracing subscriber for logging.
///
/// Logs go to stderr and to a daily file in the cache directory. The
/// returned guard flushes the file writer when dropped.
fn init_tracing(config: &Config) -> Option<WorkerGuard> {
    // Use RUST_LOG env var to control log level (e.g., RUST_LOG=debug)
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));

    let (file_layer, guard) = match config.cache_dir() {
        Ok(dir) => {
            let appender = tracing_appender::rolling::daily(dir, LOG_FILE);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = fmt::layer().with_writer(writer).with_ansi(false);
            (Some(layer), Some(guard))
        }
        Err(_) => (None, None),
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(io::stderr))
        .with(file_layer)
        .with(filter)
        .init();

    guard
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (silently ignore if not found)
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();
    let mut config = Config::load()?;
    if let Some(url) = cli.api_url {
        config.api_base_url = url;
    }

    let _log_guard = init_tracing(&config);
    info!(api = %config.api_base_url, storage = %config.storage, "presente starting");

    let provider = commands::start(&config).await?;

    match cli.command {
        Command::Login { email } => commands::login(&provider, &mut config, email).await,
        Command::Register => commands::register(&provider).await,
        Command::Logout => commands::logout(&provider).await,
        Command::Status => commands::status(&provider),
        Command::Profiles => commands::profiles(&provider).await,
        Command::Select { id, clear } => {
            let id = if clear { None } else { id };
            commands::select(&provider, id.as_deref()).await
        }
        Command::Subject { id } => commands::subject(&provider, &id).await,
        Command::Classes { subject, date } => {
            commands::classes(&provider, &subject, date.as_deref()).await
        }
    }
}
