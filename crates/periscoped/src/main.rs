//! periscoped: the Periscope metadata control plane daemon.
//!
//! Single binary that assembles:
//! - State store (redb)
//! - Agent registry with expiry reaping
//! - Metadata service (schemas, agent health, update streams, tracepoints)
//! - HTTP API
//!
//! # Usage
//!
//! ```text
//! periscoped serve --config /etc/periscope/periscope.toml --listen 0.0.0.0:50400
//! ```

mod config;
mod control_plane;

use std::net::SocketAddr;
use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};
use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::config::DaemonConfig;

#[derive(Parser)]
#[command(name = "periscoped", about = "Periscope metadata control plane")]
struct Cli {
    /// Log output format.
    #[arg(long, value_enum, default_value_t = LogFormat::Text, global = true)]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Command,
}

#[derive(Clone, Copy, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
enum Command {
    /// Run the control plane.
    Serve {
        /// Path to periscope.toml. Defaults apply when omitted.
        #[arg(long)]
        config: Option<PathBuf>,

        /// Address to listen on (overrides `server.listen`).
        #[arg(long)]
        listen: Option<SocketAddr>,

        /// Data directory for persistent state (overrides `storage.data_dir`).
        #[arg(long)]
        data_dir: Option<PathBuf>,

        /// Keep all state in memory (overrides `storage.in_memory`).
        #[arg(long)]
        in_memory: bool,
    },

    /// Validate a configuration file and print the resolved settings.
    CheckConfig {
        #[arg(long)]
        config: PathBuf,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_format);

    match cli.command {
        Command::Serve {
            config,
            listen,
            data_dir,
            in_memory,
        } => {
            let mut config = match config {
                Some(path) => DaemonConfig::from_file(&path)?,
                None => DaemonConfig::default(),
            };
            if let Some(listen) = listen {
                config.server.listen = listen.to_string();
            }
            if let Some(data_dir) = data_dir {
                config.storage.data_dir = data_dir;
            }
            if in_memory {
                config.storage.in_memory = true;
            }

            let settings = config.settings()?;
            control_plane::run_control_plane(settings).await
        }
        Command::CheckConfig { config } => {
            let settings = DaemonConfig::from_file(&config)?.settings()?;
            info!(path = ?config, "configuration is valid");
            println!("{settings:#?}");
            Ok(())
        }
    }
}

fn init_tracing(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,periscoped=debug,periscope=debug"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    match format {
        LogFormat::Text => builder.init(),
        LogFormat::Json => builder.json().init(),
    }
}
