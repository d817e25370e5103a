//! Chromite Transport - duplex message channels to a DevTools endpoint
//!
//! This crate provides:
//! - RFC 6455 WebSocket client (handshake, framing, masking, reassembly)
//! - NUL-delimited pipe transport for `--remote-debugging-pipe` mode
//! - Endpoint URL parsing
//! - Optional TLS via rustls
//!
//! Both transports deliver whole UTF-8 message payloads in order and split
//! into a clonable sender half and a receiver half so one reader task and
//! many writers can share the channel.

mod endpoint;
mod error;
mod frame;
mod handshake;
mod pipe;
mod tls;
mod ws;

pub use endpoint::*;
pub use error::*;
pub use frame::*;
pub use handshake::*;
pub use pipe::*;
pub use tls::*;
pub use ws::*;

use async_trait::async_trait;

/// Write half of a transport; shared by concurrent callers
#[async_trait]
pub trait TransportTx: Send + Sync {
    /// Queue one whole message for transmission
    async fn send(&self, msg: &str) -> Result<(), TransportError>;

    /// Initiate an orderly shutdown; idempotent, best-effort
    async fn close(&self) -> Result<(), TransportError>;
}

/// Read half of a transport; owned by a single reader loop
#[async_trait]
pub trait TransportRx: Send {
    /// Receive the next whole message
    async fn recv(&mut self) -> Result<String, TransportError>;
}
