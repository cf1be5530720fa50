//! compassd — the Compass daemon.
//!
//! Single binary that assembles the formation subsystems:
//! - State store (redb)
//! - Webhook dispatcher (HTTP transport with retries)
//! - Constraint engine
//! - Formation orchestrator + pending-assignment sweeper
//! - REST API and status callback endpoint
//!
//! # Usage
//!
//! ```text
//! compassd serve --config /etc/compass/compass.toml --port 8080
//! compassd check-config --config /etc/compass/compass.toml
//! ```

mod server;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use compass_core::CompassConfig;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "compassd", about = "Compass formation orchestration daemon")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Serve the REST API and run the background sweeper.
    Serve {
        /// Path to compass.toml. Defaults apply when omitted.
        #[arg(long)]
        config: Option<PathBuf>,

        /// Port to listen on; overrides `server.port`.
        #[arg(long)]
        port: Option<u16>,

        /// Data directory; overrides `server.data_dir`.
        #[arg(long)]
        data_dir: Option<PathBuf>,

        /// Emit logs as JSON lines.
        #[arg(long)]
        json_logs: bool,
    },
    /// Validate a configuration file and print it with defaults filled in.
    CheckConfig {
        #[arg(long)]
        config: PathBuf,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Command::Serve {
            config,
            port,
            data_dir,
            json_logs,
        } => {
            init_tracing(json_logs);
            let mut config = match config {
                Some(path) => CompassConfig::from_file(&path)?,
                None => CompassConfig::default(),
            };
            if let Some(port) = port {
                config.server.port = port;
            }
            if let Some(data_dir) = data_dir {
                config.server.data_dir = data_dir;
            }
            server::run(config).await
        }
        Command::CheckConfig { config } => {
            let config = CompassConfig::from_file(&config)?;
            print!("{}", config.to_toml_string()?);
            Ok(())
        }
    }
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,compassd=debug,compass=debug"));
    if json {
        tracing_subscriber::fmt().json().with_env_filter(filter).init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}
