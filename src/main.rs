//! SSH gate - Entry point
//!
//! Parses CLI arguments, loads host and authorized keys, then serves until
//! SIGINT or SIGTERM requests a graceful shutdown.

use clap::Parser;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use ssh_gate::config::{Args, Config};
use ssh_gate::error::Result;
use ssh_gate::server::Server;
use ssh_gate::ssh::GreetingHandler;

#[tokio::main]
async fn main() -> Result<()> {
    // Logs go to stderr; RUST_LOG overrides the default level
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    let config = Config::from_args(args)?;

    info!("SSH gate v{} starting...", env!("CARGO_PKG_VERSION"));
    info!(
        "Handshake timeout: {}, Max connections: {}",
        config
            .handshake_timeout
            .map_or("none".to_string(), |t| format!("{}s", t.as_secs())),
        config
            .max_connections
            .map_or("unlimited".to_string(), |n| n.to_string())
    );

    let mut server = Server::with_options(GreetingHandler::new(), config.serve_options());

    for path in &config.host_keys {
        let raw = tokio::fs::read(path).await?;
        if server.add_host_key(&raw) {
            info!("Loaded host key {}", path.display());
        } else {
            warn!("Skipping host key {}", path.display());
        }
    }

    for path in &config.authorized_keys {
        let raw = tokio::fs::read(path).await?;
        match server.add_authorized_keys(&raw) {
            Ok(added) => info!("Loaded {} authorized key(s) from {}", added, path.display()),
            Err(e) => warn!("{}: {}", path.display(), e),
        }
    }

    let shutdown = server.shutdown_token();

    // Spawn a task to handle shutdown signals
    let shutdown_handle = tokio::spawn(async move {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Received SIGINT (Ctrl+C), shutting down...");
            }
            _ = terminate() => {
                info!("Received SIGTERM, shutting down...");
            }
        }

        shutdown.cancel();
    });

    let result = server.listen_and_serve(config.port).await;

    shutdown_handle.abort();

    if let Err(ref e) = result {
        error!("Server error: {}", e);
    }
    info!("SSH gate stopped");

    result
}

async fn terminate() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!("Failed to register SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    }
    #[cfg(not(unix))]
    {
        std::future::pending::<()>().await;
    }
}
