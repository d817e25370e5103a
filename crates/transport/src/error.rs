//! Transport failure surface

use thiserror::Error;

#[derive(Error, Debug)]
pub enum TransportError {
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    #[error("Connection refused: {0}")]
    ConnectionRefused(String),

    #[error("Handshake failed: {0}")]
    HandshakeFailed(String),

    #[error("Connection closed")]
    ConnectionClosed,

    #[error("Connection reset: {0}")]
    ConnectionReset(String),

    #[error("Invalid frame: {0}")]
    InvalidFrame(String),

    #[error("Message of {size} bytes exceeds limit of {limit}")]
    FrameTooLarge { size: usize, limit: usize },

    #[error("Operation timed out")]
    Timeout,

    #[error("TLS error: {0}")]
    TlsError(String),
}

impl TransportError {
    /// Map an I/O error encountered mid-stream
    ///
    /// A clean EOF is a close; everything else is a reset.
    pub(crate) fn from_io(err: std::io::Error) -> Self {
        use std::io::ErrorKind;

        match err.kind() {
            ErrorKind::UnexpectedEof | ErrorKind::BrokenPipe => Self::ConnectionClosed,
            ErrorKind::ConnectionReset | ErrorKind::ConnectionAborted => {
                Self::ConnectionReset(err.to_string())
            }
            ErrorKind::TimedOut | ErrorKind::WouldBlock => Self::Timeout,
            _ => Self::ConnectionReset(err.to_string()),
        }
    }

    /// Whether the transport is unusable after this error
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::ConnectionClosed
                | Self::ConnectionReset(_)
                | Self::InvalidFrame(_)
                | Self::FrameTooLarge { .. }
        )
    }
}
