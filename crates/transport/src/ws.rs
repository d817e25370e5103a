//! WebSocket client transport
//!
//! One TCP (or TLS) stream carrying RFC 6455 frames. Outbound messages go
//! out as single masked TEXT frames; inbound frames are reassembled into
//! whole messages with PING answered inline. `split` yields a clonable
//! sender half and a receiver half; the receiver keeps its own handle on
//! the shared writer so PONG and CLOSE replies serialize with caller
//! writes.

use std::sync::Arc;

use async_trait::async_trait;
use bytes::BytesMut;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tracing::{debug, trace, warn};

use crate::endpoint::WsEndpoint;
use crate::error::TransportError;
use crate::frame::{FrameDecoder, MessageAssembler, OpCode, encode_client_frame};
use crate::{TransportRx, TransportTx, handshake, tls};

/// Default cap on a reassembled inbound message (16 MiB)
pub const DEFAULT_MAX_MESSAGE_SIZE: usize = 16 * 1024 * 1024;

/// WebSocket transport configuration
#[derive(Debug, Clone)]
pub struct WsConfig {
    /// Abort the connection on inbound messages larger than this
    pub max_message_size: usize,

    /// Extra PEM root certificates for `wss://` endpoints
    pub extra_roots: Vec<std::path::PathBuf>,
}

impl Default for WsConfig {
    fn default() -> Self {
        Self {
            max_message_size: DEFAULT_MAX_MESSAGE_SIZE,
            extra_roots: Vec::new(),
        }
    }
}

trait Stream: AsyncRead + AsyncWrite + Unpin + Send {}
impl<T: AsyncRead + AsyncWrite + Unpin + Send> Stream for T {}

type BoxStream = Box<dyn Stream>;

/// Serialized access to the write half; at most one frame mid-transmission
struct FrameWriter {
    io: WriteHalf<BoxStream>,
    closed: bool,
}

impl FrameWriter {
    async fn write_frame(&mut self, opcode: OpCode, payload: &[u8]) -> Result<(), TransportError> {
        if self.closed {
            return Err(TransportError::ConnectionClosed);
        }

        let frame = encode_client_frame(opcode, payload, true);
        self.io
            .write_all(&frame)
            .await
            .map_err(TransportError::from_io)?;
        self.io.flush().await.map_err(TransportError::from_io)
    }

    /// Send CLOSE (status 1000) once; later writes fail with `ConnectionClosed`
    async fn write_close(&mut self) -> Result<(), TransportError> {
        if self.closed {
            return Ok(());
        }
        let result = self.write_frame(OpCode::Close, &1000u16.to_be_bytes()).await;
        self.closed = true;
        result
    }
}

/// A connected WebSocket channel
pub struct WsTransport {
    sender: WsSender,
    receiver: WsReceiver,
}

impl WsTransport {
    /// Open TCP (and TLS for `wss://`), perform the upgrade, wrap the stream
    pub async fn connect(endpoint: &WsEndpoint, config: WsConfig) -> Result<Self, TransportError> {
        let tcp = TcpStream::connect(endpoint.authority()).await.map_err(|e| {
            TransportError::ConnectionRefused(format!("{}: {}", endpoint.authority(), e))
        })?;
        tcp.set_nodelay(true).ok();

        let mut stream: BoxStream = if endpoint.secure {
            Box::new(tls::wrap_tls(tcp, &endpoint.host, &config.extra_roots).await?)
        } else {
            Box::new(tcp)
        };

        handshake::upgrade(&mut stream, endpoint).await?;
        debug!("connected to {}", endpoint.url());

        Ok(Self::from_upgraded_box(stream, config))
    }

    /// Wrap a stream that has already completed the upgrade
    ///
    /// Used by tests to drive the framing layer over in-memory pipes.
    pub fn from_upgraded<S>(stream: S, config: WsConfig) -> Self
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        Self::from_upgraded_box(Box::new(stream), config)
    }

    fn from_upgraded_box(stream: BoxStream, config: WsConfig) -> Self {
        let (read, write) = tokio::io::split(stream);
        let writer = Arc::new(Mutex::new(FrameWriter {
            io: write,
            closed: false,
        }));

        let sender = WsSender {
            writer: writer.clone(),
        };
        let receiver = WsReceiver {
            io: read,
            buf: BytesMut::with_capacity(8 * 1024),
            decoder: FrameDecoder::new(config.max_message_size),
            assembler: MessageAssembler::new(config.max_message_size),
            writer,
        };

        Self { sender, receiver }
    }

    pub async fn send(&self, msg: &str) -> Result<(), TransportError> {
        self.sender.send(msg).await
    }

    pub async fn recv(&mut self) -> Result<String, TransportError> {
        self.receiver.recv_message().await
    }

    pub async fn close(&self) -> Result<(), TransportError> {
        self.sender.close().await
    }

    /// Split into the shared sender half and the reader-loop half
    pub fn split(self) -> (WsSender, WsReceiver) {
        (self.sender, self.receiver)
    }
}

/// Write half; cheap to clone, internally serialized
#[derive(Clone)]
pub struct WsSender {
    writer: Arc<Mutex<FrameWriter>>,
}

#[async_trait]
impl TransportTx for WsSender {
    async fn send(&self, msg: &str) -> Result<(), TransportError> {
        trace!("send {} bytes", msg.len());
        let mut writer = self.writer.lock().await;
        writer.write_frame(OpCode::Text, msg.as_bytes()).await
    }

    async fn close(&self) -> Result<(), TransportError> {
        let mut writer = self.writer.lock().await;
        writer.write_close().await
    }
}

/// Read half; owned by a single reader loop
pub struct WsReceiver {
    io: ReadHalf<BoxStream>,
    buf: BytesMut,
    decoder: FrameDecoder,
    assembler: MessageAssembler,
    writer: Arc<Mutex<FrameWriter>>,
}

impl WsReceiver {
    async fn recv_message(&mut self) -> Result<String, TransportError> {
        loop {
            let frame = self.next_frame().await?;

            match frame.opcode {
                OpCode::Text | OpCode::Binary | OpCode::Continuation => {
                    if let Some((_, payload)) = self.assembler.push(frame)? {
                        let text = String::from_utf8(payload).map_err(|_| {
                            TransportError::InvalidFrame(
                                "message payload is not UTF-8".to_string(),
                            )
                        })?;
                        trace!("recv {} bytes", text.len());
                        return Ok(text);
                    }
                }
                OpCode::Ping => {
                    trace!("ping ({} bytes), answering", frame.payload.len());
                    let mut writer = self.writer.lock().await;
                    if let Err(e) = writer.write_frame(OpCode::Pong, &frame.payload).await {
                        // A failed reply surfaces on the next read anyway
                        warn!("failed to answer ping: {}", e);
                    }
                }
                OpCode::Pong => {}
                OpCode::Close => {
                    debug!("close frame from server");
                    let mut writer = self.writer.lock().await;
                    let _ = writer.write_close().await;
                    return Err(TransportError::ConnectionClosed);
                }
            }
        }
    }

    async fn next_frame(&mut self) -> Result<crate::frame::Frame, TransportError> {
        loop {
            if let Some(frame) = self.decoder.decode(&mut self.buf)? {
                return Ok(frame);
            }

            let n = tokio::io::AsyncReadExt::read_buf(&mut self.io, &mut self.buf)
                .await
                .map_err(TransportError::from_io)?;
            if n == 0 {
                return Err(TransportError::ConnectionClosed);
            }
        }
    }
}

#[async_trait]
impl TransportRx for WsReceiver {
    async fn recv(&mut self) -> Result<String, TransportError> {
        self.recv_message().await
    }
}
