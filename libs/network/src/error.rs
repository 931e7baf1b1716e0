//! Transport Error Types
//!
//! Error handling for endpoint parsing, socket setup and frame exchange.
//! Receive timeouts are a distinct variant so callers can retry them without
//! string matching.

use thiserror::Error;

/// Main transport error type
#[derive(Error, Debug)]
pub enum TransportError {
    /// Malformed binding string
    #[error("Invalid address '{binding}': {reason}")]
    InvalidAddress { binding: String, reason: String },

    /// Context or socket could not be created
    #[error("Transport unavailable: {message}")]
    TransportUnavailable {
        message: String,
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Endpoint could not be bound
    #[error("Bind failed on {location}: {source}")]
    BindFailed {
        location: String,
        source: std::io::Error,
    },

    /// Endpoint could not be connected to
    #[error("Connect failed to {location}: {message}")]
    ConnectFailed {
        location: String,
        message: String,
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// No frame arrived within the receive timeout
    #[error("Receive timed out after {timeout_ms}ms")]
    ReceiveTimedOut { timeout_ms: u64 },

    /// Outbound queue stayed full for the whole send timeout
    #[error("Send timed out after {timeout_ms}ms")]
    SendTimedOut { timeout_ms: u64 },

    /// Operation on a closed socket or context
    #[error("Socket closed")]
    Closed,

    /// Operation not offered by this socket kind
    #[error("Operation '{operation}' not supported by {kind} sockets")]
    Unsupported {
        operation: &'static str,
        kind: &'static str,
    },

    /// Peer connection errors
    #[error("Connection error: {message} (peer: {peer:?})")]
    Connection { message: String, peer: Option<u64> },

    /// Framing and payload decoding errors
    #[error("Protocol error: {message}")]
    Protocol {
        message: String,
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Generic I/O errors
    #[error("I/O error: {message}")]
    Io {
        message: String,
        source: std::io::Error,
    },
}

/// Result type alias for transport operations
pub type Result<T> = std::result::Result<T, TransportError>;

impl TransportError {
    /// Create an invalid address error
    pub fn invalid_address(binding: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidAddress {
            binding: binding.into(),
            reason: reason.into(),
        }
    }

    /// Create a transport unavailable error
    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::TransportUnavailable {
            message: message.into(),
            source: None,
        }
    }

    /// Create a transport unavailable error with source
    pub fn unavailable_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::TransportUnavailable {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Create a bind error
    pub fn bind_failed(location: impl Into<String>, source: std::io::Error) -> Self {
        Self::BindFailed {
            location: location.into(),
            source,
        }
    }

    /// Create a connect error
    pub fn connect_failed(location: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ConnectFailed {
            location: location.into(),
            message: message.into(),
            source: None,
        }
    }

    /// Create a connect error with source
    pub fn connect_failed_with_source(
        location: impl Into<String>,
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::ConnectFailed {
            location: location.into(),
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Create a receive timeout error
    pub fn receive_timed_out(timeout: std::time::Duration) -> Self {
        Self::ReceiveTimedOut {
            timeout_ms: timeout.as_millis() as u64,
        }
    }

    /// Create a send timeout error
    pub fn send_timed_out(timeout: std::time::Duration) -> Self {
        Self::SendTimedOut {
            timeout_ms: timeout.as_millis() as u64,
        }
    }

    /// Create an unsupported operation error
    pub fn unsupported(operation: &'static str, kind: &'static str) -> Self {
        Self::Unsupported { operation, kind }
    }

    /// Create a connection error
    pub fn connection(message: impl Into<String>, peer: Option<u64>) -> Self {
        Self::Connection {
            message: message.into(),
            peer,
        }
    }

    /// Create a protocol error
    pub fn protocol(message: impl Into<String>) -> Self {
        Self::Protocol {
            message: message.into(),
            source: None,
        }
    }

    /// Create a protocol error with source
    pub fn protocol_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Protocol {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// True for the expected, retryable "nothing arrived in time" condition
    pub fn is_timeout(&self) -> bool {
        matches!(self, TransportError::ReceiveTimedOut { .. })
    }

    /// Check if this is a retryable error
    pub fn is_retryable(&self) -> bool {
        match self {
            TransportError::ReceiveTimedOut { .. } => true,
            TransportError::SendTimedOut { .. } => true,
            TransportError::Connection { .. } => true,
            TransportError::ConnectFailed { .. } => true,
            TransportError::Io { .. } => true,
            TransportError::TransportUnavailable { .. } => false,
            TransportError::InvalidAddress { .. } => false,
            TransportError::BindFailed { .. } => false,
            TransportError::Closed => false,
            TransportError::Unsupported { .. } => false,
            TransportError::Protocol { .. } => false,
        }
    }

    /// Get error category for logging
    pub fn category(&self) -> &'static str {
        match self {
            TransportError::InvalidAddress { .. } => "invalid_address",
            TransportError::TransportUnavailable { .. } => "transport_unavailable",
            TransportError::BindFailed { .. } => "bind_failed",
            TransportError::ConnectFailed { .. } => "connect_failed",
            TransportError::ReceiveTimedOut { .. } => "receive_timeout",
            TransportError::SendTimedOut { .. } => "send_timeout",
            TransportError::Closed => "closed",
            TransportError::Unsupported { .. } => "unsupported",
            TransportError::Connection { .. } => "connection",
            TransportError::Protocol { .. } => "protocol",
            TransportError::Io { .. } => "io",
        }
    }
}

/// Convert standard I/O errors to transport errors
impl From<std::io::Error> for TransportError {
    fn from(error: std::io::Error) -> Self {
        TransportError::Io {
            message: error.to_string(),
            source: error,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_timeout_is_distinguishable() {
        let err = TransportError::receive_timed_out(Duration::from_millis(250));
        assert!(err.is_timeout());
        assert!(err.is_retryable());
        assert_eq!(err.category(), "receive_timeout");
        assert_eq!(err.to_string(), "Receive timed out after 250ms");

        assert!(!TransportError::Closed.is_timeout());
        assert!(!TransportError::protocol("bad frame").is_timeout());
    }

    #[test]
    fn test_setup_errors_are_fatal() {
        assert!(!TransportError::invalid_address("abc123", "missing scheme").is_retryable());
        assert!(!TransportError::unavailable("no runtime").is_retryable());
        let bind = TransportError::bind_failed(
            "ipc:///tmp/x.ipc",
            std::io::Error::new(std::io::ErrorKind::AddrInUse, "in use"),
        );
        assert!(!bind.is_retryable());
        assert_eq!(bind.category(), "bind_failed");
    }

    #[test]
    fn test_every_constructed_variant_has_a_category() {
        let categories: Vec<&str> = [
            TransportError::invalid_address("x", "y"),
            TransportError::unavailable("no runtime"),
            TransportError::connect_failed("tcp://127.0.0.1:1", "refused"),
            TransportError::receive_timed_out(Duration::from_millis(1)),
            TransportError::send_timed_out(Duration::from_millis(1)),
            TransportError::Closed,
            TransportError::unsupported("receive", "push"),
            TransportError::connection("reset", Some(3)),
            TransportError::protocol("bad frame"),
        ]
        .iter()
        .map(TransportError::category)
        .collect();

        assert_eq!(
            categories,
            [
                "invalid_address",
                "transport_unavailable",
                "connect_failed",
                "receive_timeout",
                "send_timeout",
                "closed",
                "unsupported",
                "connection",
                "protocol",
            ]
        );
    }

    #[test]
    fn test_io_error_conversion() {
        let io_err = std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "test");
        let transport_err = TransportError::from(io_err);

        match transport_err {
            TransportError::Io { message, .. } => {
                assert!(message.contains("test"));
            }
            _ => panic!("Expected Io error"),
        }
    }
}
