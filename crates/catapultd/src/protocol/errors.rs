//! Error types for request decoding and response delivery.

use std::io;

use thiserror::Error;

/// Errors surfaced while reading a request or writing a response.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// The client closed the connection without sending anything.
    #[error("got an empty message")]
    EmptyMessage,

    /// The client closed the connection before the terminating backslash.
    #[error("message ended after {received} bytes without a terminator")]
    Truncated { received: usize },

    /// The request grew beyond the accepted size.
    #[error("request too large: more than {max_size} bytes")]
    TooLarge { max_size: usize },

    /// The request body is not valid UTF-8.
    #[error("request is not valid UTF-8: {0}")]
    InvalidUtf8(#[from] std::string::FromUtf8Error),

    /// A write to the client made no progress.
    #[error("socket connection broken")]
    ConnectionBroken,

    /// IO error while reading or writing the connection.
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

impl ProtocolError {
    /// Returns `true` when the client sent something that is not a request.
    ///
    /// Malformed requests are answered with a diagnostic line; the other
    /// variants mean the connection itself is unusable.
    #[must_use]
    pub fn is_malformed(&self) -> bool {
        matches!(
            self,
            Self::EmptyMessage | Self::Truncated { .. } | Self::TooLarge { .. } | Self::InvalidUtf8(_)
        )
    }
}

impl From<ProtocolError> for io::Error {
    fn from(error: ProtocolError) -> Self {
        match error {
            ProtocolError::Io(source) => source,
            ProtocolError::ConnectionBroken => {
                Self::new(io::ErrorKind::WriteZero, ProtocolError::ConnectionBroken)
            }
            other => Self::new(io::ErrorKind::InvalidData, other),
        }
    }
}
