//! Client configuration types.
//!
//! [`ClientConfig`] holds every runtime setting of a [`SocketClient`].  It is
//! built from defaults, from the [`ClientConfig::legacy`] preset, or from a
//! TOML file via [`ConfigFile`](crate::ConfigFile); the domain layer itself
//! never reads files or environment variables.
//!
//! [`SocketClient`]: crate::SocketClient

use std::fmt;
use std::time::Duration;

use qalink_core::{CorrelationMode, Framing};

/// Host the backend listens on by default.
pub const DEFAULT_HOST: &str = "127.0.0.1";

/// Port the backend listens on by default.
pub const DEFAULT_PORT: u16 = 54321;

/// Pause between a disconnect and the next connection attempt.
pub const DEFAULT_RECONNECT_DELAY: Duration = Duration::from_secs(2);

/// Upper bound on a single TCP handshake.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Largest chunk handed up from a single socket read.
pub const MAX_READ_SIZE: usize = 65_536;

/// A host name or address plus a TCP port.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Endpoint {
    pub host: String,
    pub port: u16,
}

impl Endpoint {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }
}

impl Default for Endpoint {
    fn default() -> Self {
        Self::new(DEFAULT_HOST, DEFAULT_PORT)
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// Which reconnect policy to build and with which parameters.
#[derive(Debug, Clone, PartialEq)]
pub enum ReconnectConfig {
    /// Wait the same `delay` before every attempt.
    Fixed {
        delay: Duration,
        /// `None` retries forever.
        max_attempts: Option<u32>,
    },
    /// Delay grows by `multiplier` per attempt, capped at `max`, reduced by up
    /// to `jitter` (a fraction in `0.0..=1.0`).
    Exponential {
        initial: Duration,
        max: Duration,
        multiplier: f64,
        jitter: f64,
        max_attempts: Option<u32>,
    },
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        ReconnectConfig::Fixed {
            delay: DEFAULT_RECONNECT_DELAY,
            max_attempts: None,
        }
    }
}

impl ReconnectConfig {
    /// Checks the parameters for values no policy can work with.
    ///
    /// # Errors
    ///
    /// Returns a human-readable description of the first invalid parameter.
    pub fn validate(&self) -> Result<(), String> {
        match self {
            ReconnectConfig::Fixed { .. } => Ok(()),
            ReconnectConfig::Exponential {
                initial,
                max,
                multiplier,
                jitter,
                ..
            } => {
                if !multiplier.is_finite() || *multiplier < 1.0 {
                    return Err(format!("multiplier must be >= 1.0, got {multiplier}"));
                }
                if !(0.0..=1.0).contains(jitter) {
                    return Err(format!("jitter must be within 0.0..=1.0, got {jitter}"));
                }
                if initial > max {
                    return Err(format!(
                        "initial delay {initial:?} exceeds maximum delay {max:?}"
                    ));
                }
                Ok(())
            }
        }
    }
}

/// All runtime configuration for one client.
///
/// # Example
///
/// ```rust
/// use qalink_client::ClientConfig;
///
/// let cfg = ClientConfig::default();
/// assert_eq!(cfg.endpoint.port, 54321);
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct ClientConfig {
    /// Where to connect.
    pub endpoint: Endpoint,

    /// How messages are delimited on the byte stream, in both directions.
    pub framing: Framing,

    /// How replies are matched to pending requests.
    pub correlation: CorrelationMode,

    /// Upper bound on one TCP handshake.  An attempt that exceeds it fails
    /// with [`ConnectionError::ConnectTimeout`](crate::ConnectionError).
    pub connect_timeout: Duration,

    /// Fail a request with [`ClientError::Timeout`](crate::ClientError) if no
    /// reply arrives within this time.  `None` waits indefinitely.
    pub request_timeout: Option<Duration>,

    /// Reconnect scheduling after a connection ends.
    pub reconnect: ReconnectConfig,
}

impl Default for ClientConfig {
    /// | Field           | Default                   |
    /// |-----------------|---------------------------|
    /// | endpoint        | `127.0.0.1:54321`         |
    /// | framing         | 4-byte length prefix      |
    /// | correlation     | tagged (`request_id`)     |
    /// | connect_timeout | 10 seconds                |
    /// | request_timeout | none                      |
    /// | reconnect       | fixed 2 s, unlimited      |
    fn default() -> Self {
        Self {
            endpoint: Endpoint::default(),
            framing: Framing::default(),
            correlation: CorrelationMode::default(),
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            request_timeout: None,
            reconnect: ReconnectConfig::default(),
        }
    }
}

impl ClientConfig {
    /// Settings that talk to a backend speaking bare JSON with no framing and
    /// answering strictly in order.
    ///
    /// Replies that the kernel coalesces into one read, or splits across two,
    /// are not handled correctly in this mode.
    pub fn legacy() -> Self {
        Self {
            framing: Framing::Raw,
            correlation: CorrelationMode::Fifo,
            ..Self::default()
        }
    }

    pub fn with_endpoint(mut self, host: impl Into<String>, port: u16) -> Self {
        self.endpoint = Endpoint::new(host, port);
        self
    }
}
