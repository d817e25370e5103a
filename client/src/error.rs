//! Unified error surface of the client crate

use chromite_protocol::{CdpError, CdpErrorKind, ProtocolError};
use chromite_transport::TransportError;
use thiserror::Error;

use crate::launcher::LaunchError;

pub type Result<T> = std::result::Result<T, Error>;

/// Anything a client operation can fail with
///
/// Transport and protocol errors pass through unchanged; CDP errors carry
/// the wire code, message, and optional data. The core never retries.
#[derive(Error, Debug)]
pub enum Error {
    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    #[error(transparent)]
    Cdp(#[from] CdpError),

    #[error(transparent)]
    Launch(#[from] LaunchError),
}

impl Error {
    /// The connection is permanently dead
    pub fn is_closed(&self) -> bool {
        matches!(
            self,
            Error::Transport(TransportError::ConnectionClosed)
                | Error::Transport(TransportError::ConnectionReset(_))
        )
    }

    /// The call timed out; the connection remains usable
    pub fn is_timeout(&self) -> bool {
        matches!(self, Error::Transport(TransportError::Timeout))
    }

    /// The browser rejected the command; `None` for non-CDP failures
    pub fn cdp_kind(&self) -> Option<CdpErrorKind> {
        match self {
            Error::Cdp(e) => Some(e.kind),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classification_helpers() {
        let closed = Error::from(TransportError::ConnectionClosed);
        assert!(closed.is_closed());
        assert!(!closed.is_timeout());

        let timeout = Error::from(TransportError::Timeout);
        assert!(timeout.is_timeout());
        assert!(!timeout.is_closed());

        let cdp = Error::from(CdpError {
            kind: CdpErrorKind::MethodNotFound,
            code: -32601,
            message: "Method not found".to_string(),
            data: None,
        });
        assert_eq!(cdp.cdp_kind(), Some(CdpErrorKind::MethodNotFound));
        assert!(!cdp.is_closed());
    }
}
