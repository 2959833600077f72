//! Connection Manager
//!
//! Obtains a usable connection to the server, retrying transient failures.
//!
//! ## Retry Loop
//!
//! ```text
//! attempt 1 ──fail──> sleep(backoff(1)) ──> attempt 2 ──fail──> ... ──> attempt k ──fail──> ConnectionExhausted
//!     │                                         │                           │
//!     └──ok──> Connection                       └──ok──> Connection         └──ok──> Connection
//! ```
//!
//! With `max_attempts = k` exactly `k` attempts are made and `k - 1` delays
//! are slept. Each attempt (name resolution plus TCP connect) is bounded by
//! the connect timeout, so the whole sequence is bounded too. Dropping the
//! future returned by [`ConnectionManager::connect`] cancels it, including a
//! pending backoff sleep.

use crate::client::error::ClientError;
use crate::config::ClientSettings;
use std::io;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::{lookup_host, TcpStream};
use tracing::{debug, error, info, warn};

/// Delay inserted between failed connection attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backoff {
    /// The same delay before every retry
    Fixed(Duration),

    /// `step * n` before retry `n`
    Linear(Duration),

    /// Doubling from `initial`, never above `max`
    Exponential { initial: Duration, max: Duration },
}

impl Backoff {
    /// Delay to sleep before retry number `retry` (1-based).
    ///
    /// # Example
    /// ```
    /// use ackline::client::Backoff;
    /// use std::time::Duration;
    ///
    /// let backoff = Backoff::Exponential {
    ///     initial: Duration::from_millis(100),
    ///     max: Duration::from_millis(300),
    /// };
    /// assert_eq!(backoff.delay_for(1), Duration::from_millis(100));
    /// assert_eq!(backoff.delay_for(2), Duration::from_millis(200));
    /// assert_eq!(backoff.delay_for(3), Duration::from_millis(300));
    /// ```
    pub fn delay_for(&self, retry: u32) -> Duration {
        let retry = retry.max(1);
        match *self {
            Backoff::Fixed(delay) => delay,
            Backoff::Linear(step) => step.saturating_mul(retry),
            Backoff::Exponential { initial, max } => {
                let factor = 2u32.checked_pow(retry - 1).unwrap_or(u32::MAX);
                initial.saturating_mul(factor).min(max)
            }
        }
    }
}

/// How many attempts to make and how long to wait between them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    max_attempts: u32,
    backoff: Backoff,
}

impl RetryPolicy {
    /// Creates a policy making at most `max_attempts` attempts (at least one).
    pub fn new(max_attempts: u32, backoff: Backoff) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            backoff,
        }
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    pub fn backoff(&self) -> Backoff {
        self.backoff
    }
}

/// Progress through one connection-establishment sequence.
///
/// Lives only for the duration of a single [`ConnectionManager::connect`] call.
#[derive(Debug)]
pub struct RetryState {
    attempts: u32,
    max_attempts: u32,
    current_delay: Duration,
    backoff: Backoff,
}

impl RetryState {
    pub fn new(policy: &RetryPolicy) -> Self {
        Self {
            attempts: 0,
            max_attempts: policy.max_attempts,
            current_delay: Duration::ZERO,
            backoff: policy.backoff,
        }
    }

    /// Records the start of an attempt and returns its number (1-based).
    pub fn begin_attempt(&mut self) -> u32 {
        self.attempts += 1;
        self.attempts
    }

    /// After a failure: the delay before the next attempt, or `None` when
    /// the attempts are used up.
    pub fn next_delay(&mut self) -> Option<Duration> {
        if self.attempts >= self.max_attempts {
            return None;
        }
        self.current_delay = self.backoff.delay_for(self.attempts);
        Some(self.current_delay)
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    pub fn current_delay(&self) -> Duration {
        self.current_delay
    }
}

/// An open connection to the server.
#[derive(Debug)]
pub struct Connection {
    stream: TcpStream,
    peer: SocketAddr,
    attempts: u32,
}

impl Connection {
    pub fn peer_addr(&self) -> SocketAddr {
        self.peer
    }

    /// How many attempts it took to establish this connection.
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub(crate) fn into_stream(self) -> TcpStream {
        self.stream
    }
}

/// Establishes connections to one server address.
#[derive(Debug, Clone)]
pub struct ConnectionManager {
    host: String,
    port: u16,
    connect_timeout: Duration,
    policy: RetryPolicy,
}

impl ConnectionManager {
    pub fn new(
        host: impl Into<String>,
        port: u16,
        connect_timeout: Duration,
        policy: RetryPolicy,
    ) -> Self {
        Self {
            host: host.into(),
            port,
            connect_timeout,
            policy,
        }
    }

    pub fn from_settings(settings: &ClientSettings) -> Self {
        Self::new(
            settings.server_host.clone(),
            settings.server_port,
            settings.connect_timeout(),
            settings.retry_policy(),
        )
    }

    /// The `host:port` this manager connects to.
    pub fn target(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Connects, retrying with backoff until the policy is exhausted.
    pub async fn connect(&self) -> Result<Connection, ClientError> {
        let target = self.target();
        let mut state = RetryState::new(&self.policy);

        loop {
            let attempt = state.begin_attempt();
            debug!(server = %target, attempt, max_attempts = state.max_attempts(), "Connecting");

            match self.attempt(&target).await {
                Ok((stream, peer)) => {
                    info!(
                        server = %peer,
                        attempt,
                        max_attempts = state.max_attempts(),
                        "Connected to server"
                    );
                    return Ok(Connection {
                        stream,
                        peer,
                        attempts: attempt,
                    });
                }
                Err(e) => {
                    warn!(
                        server = %target,
                        attempt,
                        max_attempts = state.max_attempts(),
                        error = %e,
                        "Connection attempt failed"
                    );

                    match state.next_delay() {
                        Some(delay) => {
                            info!(delay_ms = delay.as_millis() as u64, "Retrying after backoff");
                            tokio::time::sleep(delay).await;
                        }
                        None => {
                            error!(server = %target, attempts = attempt, "All connection attempts failed");
                            return Err(ClientError::ConnectionExhausted {
                                attempts: attempt,
                                source: e,
                            });
                        }
                    }
                }
            }
        }
    }

    /// One bounded attempt: resolve the target and try each address.
    async fn attempt(&self, target: &str) -> io::Result<(TcpStream, SocketAddr)> {
        let connect = async {
            let mut last_err = None;
            for addr in lookup_host(target).await? {
                match TcpStream::connect(addr).await {
                    Ok(stream) => {
                        stream.set_nodelay(true)?;
                        return Ok((stream, addr));
                    }
                    Err(e) => last_err = Some(e),
                }
            }
            Err(last_err.unwrap_or_else(|| {
                io::Error::new(io::ErrorKind::NotFound, "address resolved to no hosts")
            }))
        };

        match tokio::time::timeout(self.connect_timeout, connect).await {
            Ok(result) => result,
            Err(_) => Err(io::Error::new(
                io::ErrorKind::TimedOut,
                format!("connection timed out after {:?}", self.connect_timeout),
            )),
        }
    }
}
