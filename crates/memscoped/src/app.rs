//! Command-line entry point for the `memscoped` binary.
//!
//! # Usage
//!
//! ```bash
//! # Listen with defaults (0.0.0.0:11037)
//! memscoped
//!
//! # Custom port and key, events as JSON lines on stdout
//! memscoped --port 4000 --challenge-key 0x1122334455667788 --json
//!
//! # Enable debug logging
//! RUST_LOG=memscoped=debug memscoped
//! ```
//!
//! # Signal Handling
//!
//! - SIGTERM/SIGINT: stop the server and exit

use std::io::Write;
use std::net::IpAddr;
use std::path::PathBuf;
use std::process;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use memscope_core::{elevate, platform_memory, ConversionRegistry};

use crate::config::{parse_challenge_key, ConfigError, ServerConfig};
use crate::registry::{spawn_registry, RegistryHandle, WatchEvent};
use crate::server::MemscopeServer;

/// memscope daemon - live memory watches and logs from instrumented processes
#[derive(Parser, Debug, Default)]
#[command(name = "memscoped", version, about)]
pub struct Args {
    /// Config file (defaults to $MEMSCOPE_CONFIG, then the user config dir)
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Port to listen on
    #[arg(short, long)]
    pub port: Option<u16>,

    /// Key clients must send first (decimal or 0x-prefixed hex)
    #[arg(long, value_parser = parse_key_arg)]
    pub challenge_key: Option<u64>,

    /// Address to bind
    #[arg(long)]
    pub bind: Option<IpAddr>,

    /// Print every event as one JSON line on stdout
    #[arg(long)]
    pub json: bool,
}

fn parse_key_arg(s: &str) -> Result<u64, String> {
    parse_challenge_key(s).map_err(|e| e.to_string())
}

impl Args {
    /// Builds the effective config: file, then environment, then flags.
    pub fn resolve_config(&self) -> Result<ServerConfig, ConfigError> {
        let mut config = ServerConfig::load(self.config.as_deref())?;
        config.apply_env()?;
        self.apply_flags(&mut config);
        Ok(config)
    }

    fn apply_flags(&self, config: &mut ServerConfig) {
        if let Some(port) = self.port {
            config.port = port;
        }
        if let Some(key) = self.challenge_key {
            config.challenge_key = key;
        }
        if let Some(bind) = self.bind {
            config.bind_address = bind;
        }
    }
}

/// Parses arguments and runs the server until a shutdown signal.
pub fn run() -> Result<()> {
    let args = Args::parse();
    run_server(args)
}

#[tokio::main]
async fn run_server(args: Args) -> Result<()> {
    // Logs go to stderr so --json output stays parseable
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            EnvFilter::from_default_env()
                .add_directive("memscoped=info".parse()?)
                .add_directive("memscope_core=info".parse()?)
                .add_directive("memscope_protocol=info".parse()?),
        )
        .init();

    info!(
        version = env!("CARGO_PKG_VERSION"),
        pid = process::id(),
        "memscope daemon starting"
    );

    let config = args
        .resolve_config()
        .context("Failed to load configuration")?;

    elevate();

    let registry = spawn_registry(ConversionRegistry::new(), config.event_capacity);
    let cancel_token = CancellationToken::new();

    if args.json {
        spawn_event_printer(&registry, cancel_token.clone());
    }

    let server = Arc::new(
        MemscopeServer::bind(config, registry, platform_memory())
            .await
            .context("Failed to start server")?,
    );

    let stopper = Arc::clone(&server);
    let shutdown_token = cancel_token.clone();
    tokio::spawn(async move {
        if let Err(e) = wait_for_shutdown_signal().await {
            error!(error = %e, "Error waiting for shutdown signal");
        }
        info!("Shutdown signal received");
        stopper.stop();
        shutdown_token.cancel();
    });

    if let Err(e) = server.run().await {
        error!(error = %e, "Server error");
        return Err(e.into());
    }

    cancel_token.cancel();
    info!("memscope daemon stopped");
    Ok(())
}

/// Prints each registry event as a JSON line until cancelled.
fn spawn_event_printer(registry: &RegistryHandle, cancel_token: CancellationToken) {
    let mut events = registry.subscribe();

    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = cancel_token.cancelled() => break,

                result = events.recv() => match result {
                    Ok(event) => print_event(&event),
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        warn!(skipped = n, "Event printer lagged, skipped events");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                },
            }
        }
    });
}

fn print_event(event: &WatchEvent) {
    match serde_json::to_string(event) {
        Ok(json) => {
            let mut stdout = std::io::stdout().lock();
            if let Err(e) = writeln!(stdout, "{json}").and_then(|()| stdout.flush()) {
                warn!(error = %e, "Failed to write event");
            }
        }
        Err(e) => error!(error = %e, event = event.kind(), "Failed to serialize event"),
    }
}

/// Waits for a shutdown signal (SIGTERM or SIGINT).
async fn wait_for_shutdown_signal() -> Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let mut sigterm = signal(SignalKind::terminate())?;
        let mut sigint = signal(SignalKind::interrupt())?;

        tokio::select! {
            _ = sigterm.recv() => {
                info!("Received SIGTERM");
            }
            _ = sigint.recv() => {
                info!("Received SIGINT");
            }
        }
    }

    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await?;
        info!("Received Ctrl+C");
    }

    Ok(())
}
