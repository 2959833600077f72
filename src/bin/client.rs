//! ackline client
//!
//! USAGE:
//!     ackline-client [interactive|automated] [--config <FILE>]
//!
//! Automated mode (the default) sends a fixed three-message sequence.
//! Interactive mode sends one message per line typed on stdin; `info` sends
//! the system information line and `quit` exits.

use ackline::client::{ClientError, Session, SystemInfo};
use ackline::config::{ClientArgs, ClientConfig, ClientMode};
use ackline::logging;
use ackline::protocol::Acknowledgment;
use anyhow::Context;
use clap::Parser;
use std::io::Write;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{error, info, warn};

/// Pause between the steps of the automated sequence
const STEP_PAUSE: Duration = Duration::from_secs(1);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = ClientArgs::parse();
    let (config, source) =
        ClientConfig::load(args.config.as_deref()).context("failed to load configuration")?;

    logging::init(&config.logging).context("failed to set up logging")?;
    source.log();

    let mode = match args.mode.as_deref() {
        None => ClientMode::default(),
        Some(raw) => raw.parse().unwrap_or_else(|e| {
            warn!(error = %e, "Usage: ackline-client [interactive|automated]; defaulting to automated");
            ClientMode::Automated
        }),
    };

    let mut session = Session::from_settings(&config.client);

    let result = tokio::select! {
        result = run(mode, &mut session) => result,
        _ = tokio::signal::ctrl_c() => {
            info!("Interrupted by user");
            Ok(())
        }
    };

    session.close().await;
    result
}

async fn run(mode: ClientMode, session: &mut Session) -> anyhow::Result<()> {
    match mode {
        ClientMode::Automated => run_automated(session).await,
        ClientMode::Interactive => run_interactive(session).await,
    }
}

async fn run_automated(session: &mut Session) -> anyhow::Result<()> {
    info!("Starting automated mode");

    let steps = [
        "Client started".to_string(),
        SystemInfo::collect().to_string(),
        "Client automated sequence completed".to_string(),
    ];

    for (i, message) in steps.iter().enumerate() {
        if i > 0 {
            tokio::time::sleep(STEP_PAUSE).await;
        }
        send_logged(session, message).await?;
    }

    info!("Automated mode completed");
    Ok(())
}

async fn run_interactive(session: &mut Session) -> anyhow::Result<()> {
    info!("Starting interactive mode");
    println!("ackline client - interactive mode");
    println!("Type 'quit' to exit, 'info' to send system info, or any message to send");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        print!("\nEnter message (or command): ");
        std::io::stdout().flush()?;

        let Some(line) = lines.next_line().await? else {
            break;
        };
        let input = line.trim();

        let ack = match input.to_ascii_lowercase().as_str() {
            "quit" => break,
            "" => {
                println!("Please enter a message or command");
                continue;
            }
            "info" => send_logged(session, &SystemInfo::collect().to_string()).await?,
            _ => send_logged(session, input).await?,
        };

        match ack {
            Some(ack) => println!("{}", ack),
            None => println!("Message was not delivered, see log for details"),
        }
    }

    info!("Exiting interactive mode");
    Ok(())
}

/// Sends one message. Only an exhausted connection ends the session;
/// any other failure is logged and the session continues.
async fn send_logged(
    session: &mut Session,
    message: &str,
) -> anyhow::Result<Option<Acknowledgment>> {
    match session.send(message).await {
        Ok(ack) => {
            info!(ack = %ack, "Message acknowledged");
            Ok(Some(ack))
        }
        Err(e @ ClientError::ConnectionExhausted { .. }) => {
            Err(e).context("could not reach the server")
        }
        Err(e) => {
            error!(error = %e, "Failed to send message");
            Ok(None)
        }
    }
}
