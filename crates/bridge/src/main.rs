//! termbridge
//!
//! WebSocket-to-PTY terminal bridge.

use std::path::PathBuf;

use anyhow::Context;
use bridge::config::Config;
use bridge::logging;
use bridge::server::BridgeServer;
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;

/// termbridge - one shell per WebSocket connection.
#[derive(Parser, Debug)]
#[command(name = "termbridge")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Path to configuration file
    #[arg(short, long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Subcommand to execute (defaults to `serve`)
    #[command(subcommand)]
    pub command: Option<Commands>,
}

/// Available commands.
#[derive(Subcommand, Debug, Clone)]
pub enum Commands {
    /// Accept connections and bridge them to shells
    Serve {
        /// Port to listen on (default: 3001)
        #[arg(long, short, value_name = "PORT")]
        port: Option<u16>,

        /// IP address to bind
        #[arg(long, short, value_name = "ADDR")]
        bind: Option<String>,
    },

    /// Print the effective configuration as TOML
    Config {
        /// Write it to this file instead of stdout
        #[arg(long, short, value_name = "FILE")]
        output: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => Config::load(path)?,
        None => Config::load_default()?,
    };
    config.apply_env_overrides();

    let command = cli.command.clone().unwrap_or(Commands::Serve {
        port: None,
        bind: None,
    });

    match command {
        Commands::Serve { port, bind } => {
            if let Some(port) = port {
                config.server.port = port;
            }
            if let Some(bind) = bind {
                config.server.bind = bind;
            }

            let _log_guard = logging::init(&config.log, cli.verbose)?;
            tracing::info!("termbridge starting...");
            if let Some(path) = &cli.config {
                tracing::info!("Using config file: {:?}", path);
            }

            config.validate()?;
            serve(config).await?;
        }
        Commands::Config { output } => match output {
            Some(path) => {
                config.save(&path)?;
                println!("Configuration written to {}", path.display());
            }
            None => print!("{}", config.to_toml()?),
        },
    }

    Ok(())
}

async fn serve(config: Config) -> anyhow::Result<()> {
    let server = BridgeServer::bind(&config)
        .await
        .context("Failed to start listener")?;

    let shutdown = CancellationToken::new();
    let signal_token = shutdown.clone();
    tokio::spawn(async move {
        match wait_for_shutdown_signal().await {
            Ok(()) => tracing::info!("Received shutdown signal"),
            Err(e) => tracing::error!(error = %e, "Failed to listen for shutdown signals"),
        }
        signal_token.cancel();
    });

    server.run(shutdown).await?;
    tracing::info!("termbridge stopped");
    Ok(())
}

/// Wait for a shutdown signal (SIGTERM or SIGINT).
#[cfg(unix)]
async fn wait_for_shutdown_signal() -> std::io::Result<()> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigterm = signal(SignalKind::terminate())?;
    let mut sigint = signal(SignalKind::interrupt())?;

    tokio::select! {
        _ = sigterm.recv() => {
            tracing::info!("Received SIGTERM");
        }
        _ = sigint.recv() => {
            tracing::info!("Received SIGINT");
        }
    }
    Ok(())
}

/// Wait for ctrl-c.
#[cfg(not(unix))]
async fn wait_for_shutdown_signal() -> std::io::Result<()> {
    tokio::signal::ctrl_c().await
}
