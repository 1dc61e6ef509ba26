//! # Error Handling
//!
//! Error types shared by every relay component.
//!
//! ## Error Categories:
//! - **Fatal startup errors** (`Config`, `Connect`, `Timeout`): propagated up to `main`,
//!   which exits so the process supervisor can restart it
//! - **Transient errors** (`Protocol`, `Sink`): logged by the loop that hit them,
//!   the loop keeps running
//! - **Transport termination** (`Transport`): ends the owning loop, reported as a
//!   [`Termination`](crate::transport::Termination) event
//! - **`QueueClosed`**: a producer tried to push after shutdown closed the queue

use std::fmt;

/// Error type for the relay core.
#[derive(Debug)]
pub enum RelayError {
    /// Configuration file, environment variable or validation problems
    Config(String),

    /// The initial connection to an endpoint could not be established
    Connect {
        endpoint: String,
        reason: String,
    },

    /// A connect or handshake step did not finish in time
    Timeout(&'static str),

    /// The websocket transport failed after the connection was up
    Transport(String),

    /// An inbound message could not be decoded, or an outbound one encoded
    Protocol(String),

    /// Push into a queue that has been closed
    QueueClosed,

    /// The voice sink rejected a frame
    Sink(String),

    /// Local I/O failure (frame dump file, stdin)
    Io(std::io::Error),
}

impl fmt::Display for RelayError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RelayError::Config(msg) => write!(f, "Configuration error: {}", msg),
            RelayError::Connect { endpoint, reason } => {
                write!(f, "Failed to connect to {}: {}", endpoint, reason)
            }
            RelayError::Timeout(step) => write!(f, "Timed out waiting for {}", step),
            RelayError::Transport(msg) => write!(f, "Transport error: {}", msg),
            RelayError::Protocol(msg) => write!(f, "Protocol error: {}", msg),
            RelayError::QueueClosed => write!(f, "Queue is closed"),
            RelayError::Sink(msg) => write!(f, "Voice sink error: {}", msg),
            RelayError::Io(err) => write!(f, "I/O error: {}", err),
        }
    }
}

impl std::error::Error for RelayError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            RelayError::Io(err) => Some(err),
            _ => None,
        }
    }
}

/// Websocket errors surface once a connection exists, so they map to `Transport`.
/// Initial connect failures are wrapped as `Connect` by the transport module instead.
impl From<tokio_tungstenite::tungstenite::Error> for RelayError {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        RelayError::Transport(err.to_string())
    }
}

impl From<serde_json::Error> for RelayError {
    fn from(err: serde_json::Error) -> Self {
        RelayError::Protocol(format!("JSON error: {}", err))
    }
}

impl From<config::ConfigError> for RelayError {
    fn from(err: config::ConfigError) -> Self {
        RelayError::Config(err.to_string())
    }
}

impl From<std::io::Error> for RelayError {
    fn from(err: std::io::Error) -> Self {
        RelayError::Io(err)
    }
}

/// Shorthand for results that use [`RelayError`].
pub type RelayResult<T> = Result<T, RelayError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_messages() {
        let err = RelayError::Connect {
            endpoint: "ws://localhost:9000/cmd".to_string(),
            reason: "connection refused".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "Failed to connect to ws://localhost:9000/cmd: connection refused"
        );
        assert_eq!(
            RelayError::Timeout("control handshake").to_string(),
            "Timed out waiting for control handshake"
        );
    }

    #[test]
    fn test_json_error_becomes_protocol_error() {
        let parse = serde_json::from_str::<serde_json::Value>("{not json");
        let err: RelayError = parse.unwrap_err().into();
        assert!(matches!(err, RelayError::Protocol(_)));
    }
}
