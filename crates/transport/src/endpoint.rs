//! DevTools endpoint addresses
//!
//! Chrome hands out two URL shapes:
//! - `ws://<host>:<port>/devtools/browser/<guid>` for the browser itself
//! - `ws://<host>:<port>/devtools/page/<targetId>` for a single page
//!
//! Pipe-mode launches have no URL; their endpoint is the descriptor pair
//! inherited across the `--remote-debugging-pipe` spawn.

use crate::error::TransportError;

/// Addressable target of a connection; exactly one scheme per value
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Endpoint {
    /// A `ws://` or `wss://` URL
    Ws(WsEndpoint),

    /// A pre-opened read/write descriptor pair
    Pipe(PipeEndpoint),
}

impl Endpoint {
    /// Parse a `ws://` or `wss://` URL
    pub fn parse(url: &str) -> Result<Self, TransportError> {
        WsEndpoint::parse(url).map(Self::Ws)
    }
}

/// Parsed WebSocket endpoint
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WsEndpoint {
    /// `wss://` vs `ws://`
    pub secure: bool,

    pub host: String,

    pub port: u16,

    /// Absolute path, `/` when the URL has none
    pub path: String,
}

impl WsEndpoint {
    /// Parse a `ws://` or `wss://` URL
    ///
    /// The port defaults to 80 (`ws`) or 443 (`wss`) when omitted.
    pub fn parse(url: &str) -> Result<Self, TransportError> {
        let (secure, rest) = if let Some(rest) = url.strip_prefix("ws://") {
            (false, rest)
        } else if let Some(rest) = url.strip_prefix("wss://") {
            (true, rest)
        } else {
            return Err(TransportError::InvalidUrl(format!(
                "expected ws:// or wss:// scheme in '{}'",
                url
            )));
        };

        let (authority, path) = match rest.find('/') {
            Some(idx) => (&rest[..idx], &rest[idx..]),
            None => (rest, "/"),
        };

        if authority.is_empty() {
            return Err(TransportError::InvalidUrl(format!("no host in '{}'", url)));
        }

        let (host, port) = match authority.rsplit_once(':') {
            Some((host, port_str)) if !host.is_empty() => {
                let port: u16 = port_str.parse().map_err(|_| {
                    TransportError::InvalidUrl(format!("invalid port '{}' in '{}'", port_str, url))
                })?;
                (host.to_string(), port)
            }
            Some(_) => {
                return Err(TransportError::InvalidUrl(format!("no host in '{}'", url)));
            }
            None => {
                let default = if secure { 443 } else { 80 };
                (authority.to_string(), default)
            }
        };

        Ok(Self {
            secure,
            host,
            port,
            path: path.to_string(),
        })
    }

    /// `host:port` for TCP connect and the Host header
    pub fn authority(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Reassemble the URL
    pub fn url(&self) -> String {
        let scheme = if self.secure { "wss" } else { "ws" };
        format!("{}://{}:{}{}", scheme, self.host, self.port, self.path)
    }
}

/// The parent ends of a `--remote-debugging-pipe` launch
///
/// Raw descriptors, meaningful on unix. Opening a transport over them
/// takes ownership of both; the endpoint value must not be reused after
/// that.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PipeEndpoint {
    /// We read browser output here (peer of the child's fd 4)
    pub read_fd: i32,

    /// We write commands here (peer of the child's fd 3)
    pub write_fd: i32,
}
