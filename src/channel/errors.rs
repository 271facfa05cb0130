//! # Secure Channel Error Types
//!
//! `Closed` is the normal end-of-life signal for a channel: loops that see it
//! stop quietly. Everything else is a per-frame or startup fault.

use thiserror::Error;

/// Errors raised by a [`MessageTransport`](super::MessageTransport)
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("Transport closed")]
    Closed,

    #[error("Transport connect failed: {address}: {message}")]
    Connect { address: String, message: String },

    #[error("Transport I/O error: {message}")]
    Io { message: String },

    #[error("Frame too large: {size_bytes} bytes exceeds limit of {limit_bytes} bytes")]
    FrameTooLarge {
        size_bytes: usize,
        limit_bytes: usize,
    },
}

impl TransportError {
    /// Create an I/O error
    pub fn io(message: impl Into<String>) -> Self {
        Self::Io {
            message: message.into(),
        }
    }

    /// Create a connect error
    pub fn connect(address: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Connect {
            address: address.into(),
            message: message.into(),
        }
    }
}

impl From<std::io::Error> for TransportError {
    fn from(err: std::io::Error) -> Self {
        match err.kind() {
            std::io::ErrorKind::UnexpectedEof
            | std::io::ErrorKind::BrokenPipe
            | std::io::ErrorKind::ConnectionReset
            | std::io::ErrorKind::ConnectionAborted => TransportError::Closed,
            _ => TransportError::io(err.to_string()),
        }
    }
}

/// Secure channel errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ChannelError {
    #[error("Handshake failed: {reason}")]
    HandshakeFailed { reason: String },

    #[error("Channel closed")]
    Closed,

    #[error("Replayed or reordered frame: counter {received} is not after {last_accepted}")]
    ReplayOrOrderingError { received: u64, last_accepted: u64 },

    #[error("Frame failed authentication")]
    Authentication,

    #[error("Malformed frame: {reason}")]
    MalformedFrame { reason: String },

    #[error("Send counter exhausted; the session must be re-established")]
    CounterExhausted,

    #[error("Transport error: {0}")]
    Transport(TransportError),
}

impl ChannelError {
    /// Create a handshake failure
    pub fn handshake(reason: impl Into<String>) -> Self {
        Self::HandshakeFailed {
            reason: reason.into(),
        }
    }

    /// Create a malformed frame error
    pub fn malformed(reason: impl Into<String>) -> Self {
        Self::MalformedFrame {
            reason: reason.into(),
        }
    }

    /// True when the error means the channel is gone and loops should end
    pub fn is_closed(&self) -> bool {
        matches!(
            self,
            ChannelError::Closed | ChannelError::Transport(TransportError::Closed)
        )
    }
}

impl From<TransportError> for ChannelError {
    fn from(err: TransportError) -> Self {
        match err {
            TransportError::Closed => ChannelError::Closed,
            other => ChannelError::Transport(other),
        }
    }
}

/// Result alias for channel operations
pub type ChannelResult<T> = std::result::Result<T, ChannelError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_closed_transport_maps_to_closed_channel() {
        let err: ChannelError = TransportError::Closed.into();
        assert_eq!(err, ChannelError::Closed);
        assert!(err.is_closed());
    }

    #[test]
    fn test_io_eof_maps_to_closed() {
        let io = std::io::Error::new(std::io::ErrorKind::UnexpectedEof, "eof");
        assert_eq!(TransportError::from(io), TransportError::Closed);
    }

    #[test]
    fn test_replay_error_message() {
        let err = ChannelError::ReplayOrOrderingError {
            received: 3,
            last_accepted: 5,
        };
        assert!(err.to_string().contains("counter 3"));
        assert!(!err.is_closed());
    }
}
