//! EmberKV server entry point.
//!
//! Loads the snapshot, starts the expiry sweeper, and accepts connections
//! until an interrupt or terminate signal arrives. On a signal the store is
//! saved, the sweeper is stopped, and the process exits with status 1.

use anyhow::Context;
use emberkv::commands::CommandHandler;
use emberkv::connection::handle_connection;
use emberkv::persistence::{Snapshotter, DEFAULT_SNAPSHOT_PATH};
use emberkv::storage::start_expiry_sweeper;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::signal;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

/// Server configuration
struct Config {
    host: String,
    port: u16,
    /// Snapshot file read at startup and written on SAVE and shutdown
    snapshot: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: emberkv::DEFAULT_HOST.to_string(),
            port: emberkv::DEFAULT_PORT,
            snapshot: DEFAULT_SNAPSHOT_PATH.to_string(),
        }
    }
}

impl Config {
    /// Parse configuration from command-line arguments
    fn from_args() -> Self {
        let mut config = Config::default();
        let mut args = std::env::args().skip(1);

        while let Some(arg) = args.next() {
            match arg.as_str() {
                "--host" | "-h" => config.host = required_value(&mut args, "--host"),
                "--port" | "-p" => {
                    config.port = required_value(&mut args, "--port")
                        .parse()
                        .unwrap_or_else(|_| {
                            eprintln!("Error: invalid port number");
                            std::process::exit(1);
                        });
                }
                "--snapshot" | "-s" => config.snapshot = required_value(&mut args, "--snapshot"),
                "--help" => {
                    print_help();
                    std::process::exit(0);
                }
                "--version" | "-v" => {
                    println!("EmberKV version {}", emberkv::VERSION);
                    std::process::exit(0);
                }
                _ => {
                    eprintln!("Unknown argument: {}", arg);
                    print_help();
                    std::process::exit(1);
                }
            }
        }

        config
    }

    fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

fn required_value(args: &mut impl Iterator<Item = String>, flag: &str) -> String {
    args.next().unwrap_or_else(|| {
        eprintln!("Error: {} requires a value", flag);
        std::process::exit(1);
    })
}

fn print_help() {
    println!(
        r#"
EmberKV - In-Memory Key-Value Server

USAGE:
    emberkv [OPTIONS]

OPTIONS:
    -h, --host <HOST>        Host to bind to (default: {host})
    -p, --port <PORT>        Port to listen on (default: {port})
    -s, --snapshot <PATH>    Snapshot file (default: {snapshot})
    -v, --version            Print version information
        --help               Print this help message

LOGGING:
    Set RUST_LOG to change verbosity, e.g. RUST_LOG=emberkv=debug

CONNECTING:
    $ redis-cli -p {port}
    127.0.0.1:{port}> SET name "Ariz" EX 60
    OK
    127.0.0.1:{port}> GET name
    "Ariz"
"#,
        host = emberkv::DEFAULT_HOST,
        port = emberkv::DEFAULT_PORT,
        snapshot = DEFAULT_SNAPSHOT_PATH,
    );
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::from_args();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    info!(version = emberkv::VERSION, "EmberKV starting");

    // A corrupt snapshot is moved aside; one that can't be read at all stops
    // startup so the next save doesn't replace it.
    let snapshotter = Arc::new(Snapshotter::new(&config.snapshot));
    let store = Arc::new(
        snapshotter
            .load_or_set_aside()
            .with_context(|| format!("failed to load snapshot {}", config.snapshot))?,
    );

    let sweeper = start_expiry_sweeper(Arc::clone(&store));

    let listener = TcpListener::bind(config.bind_address()).await?;
    info!(address = %config.bind_address(), "Ready to accept connections");

    let handler = CommandHandler::new(Arc::clone(&store), Arc::clone(&snapshotter));

    tokio::select! {
        _ = accept_loop(listener, handler) => {}
        signal = shutdown_signal() => {
            info!(signal, "Shutdown signal received, saving snapshot before exit");
        }
    }

    if let Err(e) = Arc::clone(&snapshotter)
        .save_in_background(Arc::clone(&store))
        .await
    {
        error!(path = %config.snapshot, error = %e, "Failed to save snapshot on shutdown");
    }
    sweeper.shutdown().await;

    info!("Server shutdown complete");
    std::process::exit(1);
}

async fn accept_loop(listener: TcpListener, handler: CommandHandler) {
    loop {
        match listener.accept().await {
            Ok((stream, addr)) => {
                tokio::spawn(handle_connection(stream, addr, handler.clone()));
            }
            Err(e) => {
                error!(error = %e, "Failed to accept connection");
            }
        }
    }
}

/// Resolves with the name of the first interrupt or terminate signal.
async fn shutdown_signal() -> &'static str {
    let interrupt = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = interrupt => "SIGINT",
        _ = terminate => "SIGTERM",
    }
}
