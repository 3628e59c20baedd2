//! A minimal client for the echo example.

use crate::echo::EchoStream;
use crate::{Error, Result};
use bytes::Bytes;
use tokio::net::{TcpStream, ToSocketAddrs};
use tracing::debug;

/// Established connection with an echo server.
///
/// Backed by a single `TcpStream`, with one message in flight at a time.
#[derive(Debug)]
pub struct EchoClient {
    messages: EchoStream<TcpStream>,
}

impl EchoClient {
    /// Establish a connection with the echo server located at `addr`.
    ///
    /// `addr` may be any type that can be asynchronously converted to a
    /// `SocketAddr`, including strings; the `ToSocketAddrs` trait here is
    /// the Tokio version, not the `std` one.
    pub async fn connect(addr: impl ToSocketAddrs) -> Result<Self> {
        let socket = TcpStream::connect(addr).await?;

        Ok(EchoClient {
            messages: EchoStream::new(socket),
        })
    }

    /// Send `payload` as one message and wait for the server's echo.
    pub async fn roundtrip(&mut self, payload: &[u8]) -> Result<Bytes> {
        self.messages.write_message(payload).await?;
        debug!(len = payload.len(), "message sent");

        match self.messages.read_message().await? {
            Some(echoed) => Ok(echoed),
            None => Err(Error::Io(std::io::Error::new(
                std::io::ErrorKind::ConnectionReset,
                "connection closed by server",
            ))),
        }
    }

    /// Wait until the server closes the connection.
    ///
    /// A message arriving while waiting is unexpected and reported as a
    /// protocol error.
    pub async fn closed(mut self) -> Result<()> {
        match self.messages.read_message().await? {
            None => Ok(()),
            Some(_) => Err(Error::Protocol(
                "unexpected message while waiting for close".to_string(),
            )),
        }
    }
}
