//! Client Session
//!
//! Ties the connection manager and the message sender together for the
//! lifetime of one client run. The session connects lazily on the first
//! message and keeps the connection for every later one.
//!
//! When a send fails with a recoverable error (transport failure, timeout,
//! or an acknowledgment that does not match) the session drops the broken
//! connection, asks the manager for a new one, and resends the message once.
//! A [`ClientError::ConnectionExhausted`] is never retried here: it ends the
//! session.

use crate::client::error::ClientError;
use crate::client::manager::ConnectionManager;
use crate::client::sender::MessageSender;
use crate::config::ClientSettings;
use crate::protocol::Acknowledgment;
use std::time::Duration;
use tracing::{info, warn};

/// Payload used by [`Session::test_connection`]
pub const CONNECTION_TEST: &str = "CONNECTION_TEST";

pub struct Session {
    manager: ConnectionManager,
    read_timeout: Duration,
    max_message: usize,
    sender: Option<MessageSender>,
}

impl Session {
    pub fn new(manager: ConnectionManager, read_timeout: Duration, max_message: usize) -> Self {
        Self {
            manager,
            read_timeout,
            max_message,
            sender: None,
        }
    }

    pub fn from_settings(settings: &ClientSettings) -> Self {
        Self::new(
            ConnectionManager::from_settings(settings),
            settings.read_timeout(),
            settings.buffer_size,
        )
    }

    pub fn is_connected(&self) -> bool {
        self.sender.is_some()
    }

    /// Sends one message, reconnecting once if the connection broke.
    ///
    /// An empty message is a valid empty line and gets acknowledged like
    /// any other.
    pub async fn send(&mut self, message: &str) -> Result<Acknowledgment, ClientError> {
        match self.try_send(message).await {
            Err(e) if e.is_recoverable() => {
                warn!(error = %e, "Send failed, reconnecting");
                self.try_send(message).await
            }
            result => result,
        }
    }

    /// Sends the connection test payload.
    pub async fn test_connection(&mut self) -> Result<Acknowledgment, ClientError> {
        info!(server = %self.manager.target(), "Testing connection");
        self.send(CONNECTION_TEST).await
    }

    /// Closes the current connection, if any.
    pub async fn close(&mut self) {
        if let Some(sender) = self.sender.take() {
            sender.close().await;
            info!("Connection closed");
        }
    }

    async fn try_send(&mut self, message: &str) -> Result<Acknowledgment, ClientError> {
        let sender = match self.sender.take() {
            Some(sender) => sender,
            None => {
                let connection = self.manager.connect().await?;
                MessageSender::new(connection, self.read_timeout, self.max_message)
            }
        };
        let sender = self.sender.insert(sender);

        let result = sender.send(message).await;
        if matches!(&result, Err(e) if e.is_recoverable()) {
            // The stream may hold a late reply or be half-closed; never reuse it
            self.sender = None;
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::manager::{Backoff, RetryPolicy};
    use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
    use tokio::net::TcpListener;

    fn session_for(port: u16, attempts: u32) -> Session {
        let manager = ConnectionManager::new(
            "127.0.0.1",
            port,
            Duration::from_secs(2),
            RetryPolicy::new(attempts, Backoff::Fixed(Duration::from_millis(20))),
        );
        Session::new(manager, Duration::from_secs(2), 1024)
    }

    /// Acknowledges the first `per_connection` lines of every connection,
    /// then hangs up.
    async fn flaky_server(per_connection: usize) -> u16 {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                let mut reader = BufReader::new(stream);
                let mut served = 0;
                let mut line = String::new();
                while served < per_connection
                    && reader.read_line(&mut line).await.unwrap_or(0) > 0
                {
                    let reply = format!("Server received: {}\n", line.trim_end());
                    let _ = reader.get_mut().write_all(reply.as_bytes()).await;
                    served += 1;
                    line.clear();
                }
            }
        });

        port
    }

    #[tokio::test]
    async fn test_lazy_connect_and_reuse() {
        let port = flaky_server(usize::MAX).await;
        let mut session = session_for(port, 1);
        assert!(!session.is_connected());

        session.send("a").await.unwrap();
        assert!(session.is_connected());
        session.send("b").await.unwrap();

        session.close().await;
        assert!(!session.is_connected());
    }

    #[tokio::test]
    async fn test_reconnects_after_server_hangs_up() {
        let port = flaky_server(1).await;
        let mut session = session_for(port, 3);

        assert_eq!(session.send("first").await.unwrap().echoed(), Some("first"));
        // The server dropped the first connection; this goes over a new one
        assert_eq!(session.send("second").await.unwrap().echoed(), Some("second"));
    }

    #[tokio::test]
    async fn test_exhausted_when_server_absent() {
        let port = {
            let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
            listener.local_addr().unwrap().port()
        };
        let mut session = session_for(port, 2);

        let err = session.test_connection().await.unwrap_err();
        assert!(matches!(err, ClientError::ConnectionExhausted { attempts: 2, .. }));
        assert!(!session.is_connected());
    }

    #[tokio::test]
    async fn test_empty_message_acknowledged() {
        let port = flaky_server(usize::MAX).await;
        let mut session = session_for(port, 1);

        let ack = session.send("").await.unwrap();
        assert_eq!(ack, Acknowledgment::Received(String::new()));
        assert_eq!(session.send("after").await.unwrap().echoed(), Some("after"));
    }
}
