//! Pipe transport for `--remote-debugging-pipe` mode
//!
//! Chrome speaks NUL-terminated UTF-8 records over two inherited file
//! descriptors; no framing, no masking. Generic over the handle types so
//! tests drive it with in-memory pipes.

use std::sync::Arc;

use async_trait::async_trait;
use bytes::{Buf, BytesMut};
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::sync::Mutex;
use tracing::trace;

use crate::error::TransportError;
use crate::{TransportRx, TransportTx};

struct PipeWriter<W> {
    io: W,
    closed: bool,
}

/// A connected pipe channel
pub struct PipeTransport<R, W> {
    sender: PipeSender<W>,
    receiver: PipeReceiver<R>,
}

impl<R, W> PipeTransport<R, W>
where
    R: AsyncRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send,
{
    pub fn new(read: R, write: W) -> Self {
        Self {
            sender: PipeSender {
                writer: Arc::new(Mutex::new(PipeWriter {
                    io: write,
                    closed: false,
                })),
            },
            receiver: PipeReceiver {
                io: read,
                buf: BytesMut::with_capacity(8 * 1024),
            },
        }
    }

    pub async fn send(&self, msg: &str) -> Result<(), TransportError> {
        self.sender.send(msg).await
    }

    pub async fn recv(&mut self) -> Result<String, TransportError> {
        self.receiver.recv_record().await
    }

    pub async fn close(&self) -> Result<(), TransportError> {
        self.sender.close().await
    }

    /// Split into the shared sender half and the reader-loop half
    pub fn split(self) -> (PipeSender<W>, PipeReceiver<R>) {
        (self.sender, self.receiver)
    }
}

#[cfg(unix)]
impl PipeTransport<tokio::net::unix::pipe::Receiver, tokio::net::unix::pipe::Sender> {
    /// Wrap the descriptor pair of a pipe endpoint
    ///
    /// Takes ownership of both descriptors; on failure they are closed.
    pub fn open(endpoint: &crate::endpoint::PipeEndpoint) -> Result<Self, TransportError> {
        use std::os::fd::{FromRawFd, OwnedFd};

        let read = unsafe { OwnedFd::from_raw_fd(endpoint.read_fd) };
        let write = unsafe { OwnedFd::from_raw_fd(endpoint.write_fd) };

        let reader = tokio::net::unix::pipe::Receiver::from_owned_fd(read)
            .map_err(TransportError::from_io)?;
        let writer = tokio::net::unix::pipe::Sender::from_owned_fd(write)
            .map_err(TransportError::from_io)?;

        Ok(Self::new(reader, writer))
    }
}

/// Write half; cheap to clone, internally serialized
pub struct PipeSender<W> {
    writer: Arc<Mutex<PipeWriter<W>>>,
}

impl<W> Clone for PipeSender<W> {
    fn clone(&self) -> Self {
        Self {
            writer: self.writer.clone(),
        }
    }
}

#[async_trait]
impl<W> TransportTx for PipeSender<W>
where
    W: AsyncWrite + Unpin + Send,
{
    async fn send(&self, msg: &str) -> Result<(), TransportError> {
        trace!("send {} bytes", msg.len());
        let mut writer = self.writer.lock().await;
        if writer.closed {
            return Err(TransportError::ConnectionClosed);
        }

        writer
            .io
            .write_all(msg.as_bytes())
            .await
            .map_err(TransportError::from_io)?;
        writer
            .io
            .write_all(&[0x00])
            .await
            .map_err(TransportError::from_io)?;
        writer.io.flush().await.map_err(TransportError::from_io)
    }

    async fn close(&self) -> Result<(), TransportError> {
        let mut writer = self.writer.lock().await;
        if writer.closed {
            return Ok(());
        }
        writer.closed = true;
        writer.io.shutdown().await.map_err(TransportError::from_io)
    }
}

/// Read half; owned by a single reader loop
pub struct PipeReceiver<R> {
    io: R,
    buf: BytesMut,
}

impl<R> PipeReceiver<R>
where
    R: AsyncRead + Unpin + Send,
{
    async fn recv_record(&mut self) -> Result<String, TransportError> {
        loop {
            if let Some(pos) = self.buf.iter().position(|&b| b == 0x00) {
                let record = self.buf.split_to(pos).to_vec();
                self.buf.advance(1);
                let text = String::from_utf8(record).map_err(|_| {
                    TransportError::InvalidFrame("pipe record is not UTF-8".to_string())
                })?;
                trace!("recv {} bytes", text.len());
                return Ok(text);
            }

            let n = tokio::io::AsyncReadExt::read_buf(&mut self.io, &mut self.buf)
                .await
                .map_err(TransportError::from_io)?;
            if n == 0 {
                // EOF, whether clean or mid-record
                return Err(TransportError::ConnectionClosed);
            }
        }
    }
}

#[async_trait]
impl<R> TransportRx for PipeReceiver<R>
where
    R: AsyncRead + Unpin + Send,
{
    async fn recv(&mut self) -> Result<String, TransportError> {
        self.recv_record().await
    }
}
