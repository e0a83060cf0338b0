//! rxscan - command-line front end for the prescription analysis service.
//!
//! Upload a prescription image, read back the structured result (patient,
//! medications, warnings) and browse past analyses.

mod commands;
mod render;

use std::io;
use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use commands::App;

/// rxscan - prescription image analysis
#[derive(Parser, Debug)]
#[command(name = "rxscan")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Base URL of the analysis service
    #[arg(long, global = true, env = "RXSCAN_API_URL")]
    api_url: Option<String>,

    /// Also write logs to this file
    #[arg(long, global = true)]
    log_file: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Create an account, then log in
    Register {
        /// Username (prompted if omitted)
        username: Option<String>,
    },

    /// Log in and store the session credentials
    Login {
        /// Username (defaults to RXSCAN_USERNAME or the last one used)
        username: Option<String>,
    },

    /// Forget the stored credentials and cached records
    Logout,

    /// Show the current account
    Whoami,

    /// Show API endpoint and authentication status
    Status,

    /// Upload a prescription image for analysis
    Scan {
        /// Image file (png, jpg, gif, bmp, webp, tiff, heic)
        file: PathBuf,
        /// Print the raw record as JSON
        #[arg(long)]
        json: bool,
    },

    /// List past analyses
    History {
        /// Use the local cache instead of the service
        #[arg(long)]
        offline: bool,
        /// Print the raw records as JSON
        #[arg(long)]
        json: bool,
    },

    /// Show one or more past analyses
    Show {
        /// Record ids
        #[arg(required = true)]
        ids: Vec<i64>,
        /// Use the local cache instead of the service
        #[arg(long)]
        offline: bool,
        /// Print the raw records as JSON
        #[arg(long)]
        json: bool,
    },

    /// Print the machine-readable structured data of an analysis
    Structured {
        /// Record id
        id: i64,
    },
}

/// Initialize the tracing subscriber for logging.
/// RUST_LOG wins over -v; the returned guard flushes the log file on drop.
fn init_tracing(verbose: u8, log_file: Option<&PathBuf>) -> Result<Option<WorkerGuard>> {
    let level = match verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let (file_layer, guard) = match log_file {
        Some(path) => {
            let dir = path
                .parent()
                .filter(|p| !p.as_os_str().is_empty())
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("."));
            let name = path
                .file_name()
                .ok_or_else(|| anyhow::anyhow!("Invalid log file path: {}", path.display()))?;
            std::fs::create_dir_all(&dir)?;
            let appender = tracing_appender::rolling::never(dir, name);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            (
                Some(fmt::layer().with_ansi(false).with_writer(writer)),
                Some(guard),
            )
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(io::stderr))
        .with(file_layer)
        .with(filter)
        .init();

    Ok(guard)
}

#[tokio::main]
async fn main() {
    // Load .env file if present (silently ignore if not found)
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();

    let _guard = match init_tracing(cli.verbose, cli.log_file.as_ref()) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("Error: failed to initialize logging: {:#}", e);
            std::process::exit(2);
        }
    };

    if let Err(e) = run(cli).await {
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<()> {
    let mut app = App::new(cli.api_url)?;
    info!(api_url = %app.client.base_url(), "rxscan starting");

    let result = match cli.command {
        Commands::Register { username } => app.register(username).await,
        Commands::Login { username } => app.login(username).await,
        Commands::Logout => app.logout(),
        Commands::Whoami => app.whoami().await,
        Commands::Status => app.status(),
        Commands::Scan { file, json } => app.scan(&file, json).await,
        Commands::History { offline, json } => app.history(offline, json).await,
        Commands::Show { ids, offline, json } => app.show(&ids, offline, json).await,
        Commands::Structured { id } => app.structured(id).await,
    };

    // The client never navigates; the front end reacts to the expiry signal
    if let Some(reason) = app.session_expired() {
        eprintln!("Session expired ({}). Please run `rxscan login`.", reason);
    }

    result
}
