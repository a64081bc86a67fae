//! Error types for meshgate.
//!
//! Failures are classified at the boundary where they happen. Configuration
//! problems are fatal at startup, connect problems feed the reconnect cycle,
//! relay problems go back to whoever tried to send, and contract violations
//! abort construction of the interface.

use std::io;
use thiserror::Error;

/// Invalid or unusable configuration. Fatal at startup, never retried.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid connection type '{0}' (expected 'serial' or 'tcp')")]
    InvalidMode(String),

    #[error("invalid host '{host}': {reason}")]
    InvalidHost { host: String, reason: &'static str },

    #[error("invalid port {0} (expected 1-65535)")]
    InvalidPort(i64),

    #[error("invalid bitrate {0} (expected a positive integer)")]
    InvalidBitrate(i64),

    #[error("no serial port configured and none detected")]
    NoPortDetected,

    #[error("failed to read config file: {0}")]
    Read(String),

    #[error("failed to parse config file: {0}")]
    Parse(String),
}

/// A connect attempt failed. Always transient: drives the backoff cycle.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConnectError {
    /// Device or socket is held by another process or session.
    #[error("resource busy: {0}")]
    ResourceBusy(String),

    #[error("connect timed out after {0:?}")]
    Timeout(std::time::Duration),

    /// Remote end refused, e.g. meshtasticd already serving another client.
    #[error("connection refused: {0}")]
    Refused(String),

    /// Device missing or some other I/O failure while opening.
    #[error("transport unavailable: {0}")]
    Unavailable(String),

    /// Link opened but the radio did not accept the stream handshake.
    #[error("handshake failed: {0}")]
    Handshake(String),
}

impl ConnectError {
    /// Classify an I/O error raised while opening a link.
    pub fn from_io(err: &io::Error, timeout: std::time::Duration) -> Self {
        match err.kind() {
            io::ErrorKind::ConnectionRefused => Self::Refused(err.to_string()),
            io::ErrorKind::TimedOut => Self::Timeout(timeout),
            io::ErrorKind::AddrInUse => Self::ResourceBusy(err.to_string()),
            _ if err.raw_os_error() == Some(EBUSY) => Self::ResourceBusy(err.to_string()),
            _ => Self::Unavailable(err.to_string()),
        }
    }
}

// errno for "Device or resource busy" on Linux and the BSDs.
const EBUSY: i32 = 16;

/// Outbound frame could not be handed to the radio. Never retried here.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RelayError {
    #[error("not connected")]
    NotConnected,

    #[error("transport error: {0}")]
    TransportError(String),

    #[error("circuit breaker open, radio unresponsive")]
    CircuitOpen,

    #[error("payload of {len} bytes exceeds limit of {max}")]
    PayloadTooLarge { len: usize, max: usize },
}

/// Internal invariant broken while assembling the interface.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("interface contract violation: {0}")]
pub struct ContractViolation(pub String);

/// Errors that stop the interface from starting. Connect and relay errors
/// never get here: the former are retried, the latter go to the sender.
#[derive(Error, Debug)]
pub enum Error {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Contract(#[from] ContractViolation),
}

/// Convenience type alias for Results using our Error type.
pub type Result<T> = std::result::Result<T, Error>;
