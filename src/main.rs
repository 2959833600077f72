//! ackline server
//!
//! Loads `server.toml` (or the file given with `--config`), starts the
//! listener, and serves clients until SIGINT/SIGTERM, then drains.

use ackline::config::{ServerArgs, ServerConfig, ServerSettings};
use ackline::logging;
use ackline::server::{shutdown_signal, DrainOutcome, Listener};
use anyhow::Context;
use clap::Parser;
use tracing::{info, warn};

fn print_banner(settings: &ServerSettings, bound: std::net::SocketAddr) {
    println!(
        r#"
ackline server v{}
──────────────────────────────────────────────────────────────
Listening on {}
Maximum connections: {}
Buffer size: {} bytes

Use Ctrl+C to shutdown gracefully.
"#,
        ackline::VERSION,
        bound,
        settings.max_connections,
        settings.buffer_size
    );
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = ServerArgs::parse();
    let (config, source) =
        ServerConfig::load(args.config.as_deref()).context("failed to load configuration")?;

    logging::init(&config.logging).context("failed to set up logging")?;
    source.log();

    let listener = Listener::start(&config.server)
        .await
        .context("failed to start server")?;
    print_banner(&config.server, listener.local_addr());

    shutdown_signal()
        .await
        .context("failed to install signal handlers")?;

    match listener.stop().await {
        DrainOutcome::Complete => info!("Server shutdown complete"),
        DrainOutcome::ForceClosed(n) => {
            warn!(force_closed = n, "Server shutdown complete, some connections were cut off")
        }
        DrainOutcome::Aborted => warn!("Server shutdown complete after accept loop failure"),
    }

    Ok(())
}
