//! TCP Listener
//!
//! Accepts connections and enforces the concurrency ceiling.
//!
//! ## Accept Loop
//!
//! ```text
//! loop {
//!     permit = reserve a free slot      <── queued clients wait in the
//!     conn   = accept()                     kernel backlog meanwhile
//!     spawn ConnectionHandler(conn, permit.activate())
//! }
//! ```
//!
//! The loop never waits on a handler: it only waits for a slot, and a slot
//! frees the moment any handler ends. Connections over the ceiling are
//! therefore queued, never dropped.
//!
//! ## Shutdown
//!
//! [`Listener::stop`] flips the shared shutdown flag. The accept loop exits
//! and drops the listening socket; every handler blocked on a read wakes
//! up, closes its socket and releases its slot. Handlers still running when
//! the shutdown timeout expires are aborted.

use crate::config::ServerSettings;
use crate::connection::handler::wait_for_shutdown;
use crate::connection::{handle_connection, ConnectionSlots, ConnectionStats};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, error, info, warn};

/// Pause after a failed accept so a persistent error (e.g. EMFILE) does not spin
const ACCEPT_ERROR_DELAY: Duration = Duration::from_millis(100);

/// How the handlers ended during [`Listener::stop`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DrainOutcome {
    /// Every handler finished within the shutdown timeout
    Complete,
    /// This many handlers were still running and got aborted
    ForceClosed(usize),
    /// The accept loop itself panicked or was cancelled
    Aborted,
}

/// A running server.
///
/// Dropping it without calling [`stop`](Listener::stop) aborts the accept
/// loop and every handler immediately.
pub struct Listener {
    local_addr: SocketAddr,
    slots: Arc<ConnectionSlots>,
    stats: Arc<ConnectionStats>,
    shutdown_tx: watch::Sender<bool>,
    accept_task: Option<JoinHandle<DrainOutcome>>,
}

impl Listener {
    /// Binds to `settings.host:settings.port` and starts accepting.
    ///
    /// Fails with [`ServerError::Bind`] if the address is unavailable.
    pub async fn start(settings: &ServerSettings) -> Result<Self, ServerError> {
        let addr = settings.bind_address();
        let listener = TcpListener::bind(&addr)
            .await
            .map_err(|source| ServerError::Bind {
                addr: addr.clone(),
                source,
            })?;
        let local_addr = listener
            .local_addr()
            .map_err(|source| ServerError::Bind { addr, source })?;

        info!(
            address = %local_addr,
            max_connections = settings.max_connections,
            buffer_size = settings.buffer_size,
            "Server listening"
        );

        let slots = Arc::new(ConnectionSlots::new(settings.max_connections));
        let stats = Arc::new(ConnectionStats::new());
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let accept_loop = AcceptLoop {
            listener,
            slots: Arc::clone(&slots),
            stats: Arc::clone(&stats),
            buffer_size: settings.buffer_size,
            shutdown_timeout: settings.shutdown_timeout(),
            shutdown: shutdown_rx,
            handlers: JoinSet::new(),
        };

        Ok(Self {
            local_addr,
            slots,
            stats,
            shutdown_tx,
            accept_task: Some(tokio::spawn(accept_loop.run())),
        })
    }

    /// The bound address (useful with port 0).
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Number of handlers currently holding a slot.
    pub fn active_connections(&self) -> usize {
        self.slots.active()
    }

    pub fn slots(&self) -> &Arc<ConnectionSlots> {
        &self.slots
    }

    pub fn stats(&self) -> &Arc<ConnectionStats> {
        &self.stats
    }

    /// Stops accepting, signals every handler to close, and waits for them.
    ///
    /// Returns once all slots are released; handlers that outlive the
    /// shutdown timeout are force-closed.
    pub async fn stop(mut self) -> DrainOutcome {
        info!("Stopping listener");
        let _ = self.shutdown_tx.send(true);

        let Some(task) = self.accept_task.take() else {
            return DrainOutcome::Complete;
        };

        match task.await {
            Ok(outcome) => outcome,
            Err(e) => {
                error!(error = %e, "Accept loop failed");
                DrainOutcome::Aborted
            }
        }
    }
}

impl Drop for Listener {
    fn drop(&mut self) {
        if let Some(task) = self.accept_task.take() {
            let _ = self.shutdown_tx.send(true);
            task.abort();
        }
    }
}

/// State owned by the accept task.
struct AcceptLoop {
    listener: TcpListener,
    slots: Arc<ConnectionSlots>,
    stats: Arc<ConnectionStats>,
    buffer_size: usize,
    shutdown_timeout: Duration,
    shutdown: watch::Receiver<bool>,
    handlers: JoinSet<()>,
}

impl AcceptLoop {
    async fn run(mut self) -> DrainOutcome {
        loop {
            self.reap_finished();

            if self.slots.available() == 0 {
                debug!(
                    capacity = self.slots.capacity(),
                    "Connection ceiling reached, queueing new clients"
                );
            }

            // Reserved, not yet active: the count only covers running handlers
            let permit = tokio::select! {
                biased;
                _ = wait_for_shutdown(&mut self.shutdown) => break,
                permit = self.slots.reserve() => match permit {
                    Some(permit) => permit,
                    None => break,
                },
            };

            let accepted = tokio::select! {
                biased;
                _ = wait_for_shutdown(&mut self.shutdown) => break,
                accepted = self.listener.accept() => accepted,
            };

            match accepted {
                Ok((stream, addr)) => {
                    let slot = permit.activate();
                    debug!(client = %addr, active = self.slots.active(), "Accepted connection");
                    self.handlers.spawn(handle_connection(
                        stream,
                        addr,
                        slot,
                        self.buffer_size,
                        self.shutdown.clone(),
                        Arc::clone(&self.stats),
                    ));
                }
                Err(e) => {
                    let err = ServerError::Accept(e);
                    error!(error = %err, "Failed to accept connection");
                    drop(permit);
                    tokio::time::sleep(ACCEPT_ERROR_DELAY).await;
                }
            }
        }

        // Stop accepting before draining
        let Self {
            listener,
            slots,
            mut handlers,
            shutdown_timeout,
            ..
        } = self;
        drop(listener);
        slots.close();
        info!("Listener closed, no longer accepting connections");

        drain(&mut handlers, shutdown_timeout).await
    }

    /// Collects handlers that already finished, logging panics.
    fn reap_finished(&mut self) {
        while let Some(result) = self.handlers.try_join_next() {
            if let Err(e) = result {
                if e.is_panic() {
                    error!(error = %e, "Connection handler panicked");
                }
            }
        }
    }
}

/// Waits for all handlers, aborting the rest once the timeout expires.
async fn drain(handlers: &mut JoinSet<()>, timeout: Duration) -> DrainOutcome {
    let active = handlers.len();
    if active > 0 {
        info!(active, timeout = ?timeout, "Waiting for active connections to close");
    }

    let joined = tokio::time::timeout(timeout, async {
        while handlers.join_next().await.is_some() {}
    })
    .await;

    match joined {
        Ok(()) => {
            info!("All connections closed");
            DrainOutcome::Complete
        }
        Err(_) => {
            let remaining = handlers.len();
            warn!(remaining, "Shutdown timeout reached, force-closing connections");
            handlers.shutdown().await;
            DrainOutcome::ForceClosed(remaining)
        }
    }
}

/// Server-level errors.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    /// Could not bind or listen; fatal at startup
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        source: std::io::Error,
    },

    /// A single accept failed; the loop keeps going
    #[error("accept failed: {0}")]
    Accept(std::io::Error),
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
    use tokio::net::TcpStream;

    fn settings(max_connections: usize) -> ServerSettings {
        ServerSettings {
            host: "127.0.0.1".into(),
            port: 0,
            max_connections,
            buffer_size: 1024,
            shutdown_timeout_ms: 1_000,
        }
    }

    async fn connect(listener: &Listener) -> BufReader<TcpStream> {
        BufReader::new(TcpStream::connect(listener.local_addr()).await.unwrap())
    }

    async fn roundtrip(client: &mut BufReader<TcpStream>, msg: &str) -> String {
        client
            .get_mut()
            .write_all(format!("{}\n", msg).as_bytes())
            .await
            .unwrap();
        let mut line = String::new();
        tokio::time::timeout(Duration::from_secs(2), client.read_line(&mut line))
            .await
            .unwrap()
            .unwrap();
        line
    }

    async fn wait_for_active(listener: &Listener, expected: usize) {
        tokio::time::timeout(Duration::from_secs(2), async {
            while listener.active_connections() != expected {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn test_hello_then_disconnect() {
        let listener = Listener::start(&settings(5)).await.unwrap();
        let mut client = connect(&listener).await;

        assert_eq!(roundtrip(&mut client, "hello").await, "Server received: hello\n");
        wait_for_active(&listener, 1).await;

        drop(client);
        wait_for_active(&listener, 0).await;
        assert_eq!(listener.stop().await, DrainOutcome::Complete);
    }

    #[tokio::test]
    async fn test_idle_listener_has_no_active_connections() {
        let listener = Listener::start(&settings(5)).await.unwrap();
        // Let the accept loop reserve its slot and park in accept()
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(listener.active_connections(), 0);

        let client = connect(&listener).await;
        wait_for_active(&listener, 1).await;
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(listener.active_connections(), 1);

        drop(client);
        tokio::time::timeout(Duration::from_secs(2), listener.slots().wait_idle())
            .await
            .unwrap();
        assert_eq!(listener.active_connections(), 0);
        assert_eq!(listener.slots().available(), 4);

        listener.stop().await;
    }

    #[tokio::test]
    async fn test_bind_error_when_address_taken() {
        let first = Listener::start(&settings(1)).await.unwrap();
        let taken = ServerSettings {
            port: first.local_addr().port(),
            ..settings(1)
        };

        let err = Listener::start(&taken).await.err().unwrap();
        assert!(matches!(err, ServerError::Bind { .. }));
    }

    #[tokio::test]
    async fn test_clients_served_concurrently() {
        let listener = Listener::start(&settings(3)).await.unwrap();
        let mut clients = Vec::new();
        for _ in 0..3 {
            clients.push(connect(&listener).await);
        }
        wait_for_active(&listener, 3).await;

        // Answer in reverse order: nobody waits on an earlier client
        for (i, client) in clients.iter_mut().enumerate().rev() {
            let msg = format!("client {}", i);
            assert_eq!(
                roundtrip(client, &msg).await,
                format!("Server received: {}\n", msg)
            );
        }
    }

    #[tokio::test]
    async fn test_over_ceiling_is_queued() {
        let listener = Listener::start(&settings(1)).await.unwrap();

        let mut first = connect(&listener).await;
        assert_eq!(roundtrip(&mut first, "first").await, "Server received: first\n");

        let mut second = connect(&listener).await;
        second.get_mut().write_all(b"second\n").await.unwrap();

        let mut line = String::new();
        let early =
            tokio::time::timeout(Duration::from_millis(300), second.read_line(&mut line)).await;
        assert!(early.is_err(), "second client served above the ceiling");
        assert_eq!(listener.active_connections(), 1);

        drop(first);
        tokio::time::timeout(Duration::from_secs(2), second.read_line(&mut line))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(line, "Server received: second\n");
        assert_eq!(listener.active_connections(), 1);
    }

    #[tokio::test]
    async fn test_stop_closes_idle_clients() {
        let listener = Listener::start(&settings(5)).await.unwrap();
        let mut a = connect(&listener).await;
        let mut b = connect(&listener).await;
        wait_for_active(&listener, 2).await;

        let slots = Arc::clone(listener.slots());
        let outcome = tokio::time::timeout(Duration::from_secs(3), listener.stop())
            .await
            .unwrap();
        assert_eq!(outcome, DrainOutcome::Complete);
        assert_eq!(slots.active(), 0);

        for client in [&mut a, &mut b] {
            let mut buf = [0u8; 8];
            let n = client.get_mut().read(&mut buf).await.unwrap_or(0);
            assert_eq!(n, 0);
        }
    }

    #[tokio::test]
    async fn test_stop_refuses_new_connections() {
        let listener = Listener::start(&settings(5)).await.unwrap();
        let addr = listener.local_addr();
        listener.stop().await;

        assert!(TcpStream::connect(addr).await.is_err());
    }

    #[tokio::test]
    async fn test_stats_accumulate() {
        let listener = Listener::start(&settings(2)).await.unwrap();
        let mut client = connect(&listener).await;
        roundtrip(&mut client, "a").await;
        roundtrip(&mut client, "b").await;

        let stats = listener.stats();
        assert_eq!(
            stats
                .connections_accepted
                .load(std::sync::atomic::Ordering::Relaxed),
            1
        );
        assert_eq!(
            stats
                .messages_processed
                .load(std::sync::atomic::Ordering::Relaxed),
            2
        );
    }
}
