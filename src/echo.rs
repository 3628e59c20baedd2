//! The bundled echo example: a length-prefixed message codec and a
//! connection handler that echoes every message back to the peer.
//!
//! A message on the wire is an 8-byte little-endian length followed by that
//! many payload bytes.

use crate::shutdown::Shutdown;
use crate::{Error, Result};
use bytes::{Buf, Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufWriter};
use tokio::net::TcpStream;
use tracing::{debug, error};

const DEFAULT_BUFFER_SIZE: usize = 16 * 1024;

const LEN_PREFIX_SIZE: usize = std::mem::size_of::<u64>();

/// Longest payload the codec accepts. A larger length prefix is treated as
/// a protocol error rather than an allocation request.
pub const MAX_MESSAGE_LEN: u64 = 64 * 1024 * 1024;

/// Sends and receives length-prefixed messages over a stream.
///
/// Reads are buffered until a full message is available; writes go through
/// a buffered writer and are flushed per message.
#[derive(Debug)]
pub struct EchoStream<S> {
    stream: BufWriter<S>,
    buffer: BytesMut,
}

impl<S: AsyncRead + AsyncWrite + Unpin> EchoStream<S> {
    pub fn new(stream: S) -> Self {
        Self {
            stream: BufWriter::new(stream),
            buffer: BytesMut::with_capacity(DEFAULT_BUFFER_SIZE),
        }
    }

    /// Read a single message from the stream.
    ///
    /// Waits until a full message has been buffered. Returns `Ok(None)` on a
    /// clean end-of-stream between messages; a peer that disappears halfway
    /// through one is an error. Cancellation-safe: an interrupted read
    /// leaves the buffered bytes in place for the next call.
    pub async fn read_message(&mut self) -> Result<Option<Bytes>> {
        loop {
            if let Some(message) = self.parse_message()? {
                debug!(len = message.len(), "message received");
                return Ok(Some(message));
            }

            if 0 == self.stream.read_buf(&mut self.buffer).await? {
                if self.buffer.is_empty() {
                    return Ok(None);
                } else {
                    error!("connection was closed mid message");
                    return Err(Error::Io(std::io::Error::new(
                        std::io::ErrorKind::ConnectionReset,
                        "connection was closed mid message",
                    )));
                }
            }
        }
    }

    /// Tries to assemble a message from the buffered data.
    fn parse_message(&mut self) -> Result<Option<Bytes>> {
        if self.buffer.len() < LEN_PREFIX_SIZE {
            return Ok(None);
        }

        let mut prefix = [0u8; LEN_PREFIX_SIZE];
        prefix.copy_from_slice(&self.buffer[..LEN_PREFIX_SIZE]);
        let len = u64::from_le_bytes(prefix);

        if len > MAX_MESSAGE_LEN {
            return Err(Error::Protocol(format!(
                "message length {len} exceeds the maximum of {MAX_MESSAGE_LEN}"
            )));
        }
        let len = len as usize;

        if self.buffer.len() < LEN_PREFIX_SIZE + len {
            // Reserve the rest of the message up front so the remaining
            // reads land in an already sized buffer.
            self.buffer
                .reserve(LEN_PREFIX_SIZE + len - self.buffer.len());
            return Ok(None);
        }

        self.buffer.advance(LEN_PREFIX_SIZE);
        Ok(Some(self.buffer.split_to(len).freeze()))
    }

    /// Write a message to the stream: length prefix, payload, flush.
    pub async fn write_message(&mut self, payload: &[u8]) -> Result<()> {
        self.stream.write_u64_le(payload.len() as u64).await?;
        self.stream.write_all(payload).await?;
        self.stream.flush().await?;

        Ok(())
    }
}

/// The bundled connection handler: echoes every message back to the peer.
///
/// Each payload is also printed to standard output. Runs until the peer
/// closes the connection or the shutdown signal fires; errors are logged
/// and end the connection without propagating.
pub async fn echo(socket: TcpStream, mut shutdown: Shutdown) {
    let mut messages = EchoStream::new(socket);

    if let Err(err) = echo_messages(&mut messages, &mut shutdown).await {
        error!(cause = %err, "echo: connection error");
    }
}

async fn echo_messages<S>(messages: &mut EchoStream<S>, shutdown: &mut Shutdown) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    while !shutdown.is_shutdown() {
        let maybe_message = tokio::select! {
            received = messages.read_message() => received?,
            _ = shutdown.recv() => return Ok(()),
        };

        let Some(message) = maybe_message else {
            return Ok(());
        };

        println!("{}", String::from_utf8_lossy(&message));
        messages.write_message(&message).await?;
    }

    Ok(())
}
