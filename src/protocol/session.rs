//! One control-channel connection and its byte counters.
//!
//! Created on accept (or connect), dropped when the command completes or the
//! peer goes away. Never reused across connections.

use std::io;
use std::net::SocketAddr;
use tokio::io::{AsyncRead, AsyncWrite, BufStream};
use tokio::net::TcpStream;

use crate::error::{Result, StoreError};
use crate::protocol::framing::{self, Transfer, MAX_LINE_LEN};
use crate::protocol::response::Response;

pub struct Session<S> {
    stream: BufStream<S>,
    peer: String,
    bytes_sent: u64,
    bytes_received: u64,
}

impl Session<TcpStream> {
    pub async fn connect(addr: SocketAddr) -> io::Result<Self> {
        let stream = TcpStream::connect(addr).await?;
        stream.set_nodelay(true)?;
        Ok(Self::new(stream, addr.to_string()))
    }
}

impl<S: AsyncRead + AsyncWrite + Unpin> Session<S> {
    pub fn new(stream: S, peer: impl Into<String>) -> Self {
        Self {
            stream: BufStream::new(stream),
            peer: peer.into(),
            bytes_sent: 0,
            bytes_received: 0,
        }
    }

    pub fn peer(&self) -> &str {
        &self.peer
    }

    pub fn bytes_sent(&self) -> u64 {
        self.bytes_sent
    }

    pub fn bytes_received(&self) -> u64 {
        self.bytes_received
    }

    /// Next command line, or `None` once the peer closed the connection.
    pub async fn read_command(&mut self) -> Result<Option<String>> {
        let line = framing::read_line(&mut self.stream, MAX_LINE_LEN).await?;
        if let Some(l) = &line {
            self.bytes_received += l.len() as u64 + 1;
        }
        Ok(line)
    }

    pub async fn send_command(&mut self, line: &str) -> Result<()> {
        framing::write_line(&mut self.stream, line).await?;
        self.bytes_sent += line.len() as u64 + 1;
        Ok(())
    }

    pub async fn reply(&mut self, response: &Response) -> Result<()> {
        response.write(&mut self.stream).await?;
        self.bytes_sent += response.payload.len() as u64;
        Ok(())
    }

    pub async fn read_reply(&mut self) -> Result<Response> {
        let response = Response::read(&mut self.stream).await?;
        self.bytes_received += response.payload.len() as u64;
        Ok(response)
    }

    pub async fn send_size(&mut self, size: u64) -> Result<()> {
        framing::write_size(&mut self.stream, size).await?;
        self.bytes_sent += size_line_len(size);
        Ok(())
    }

    /// A size line that does not parse leaves the body unframed, so it
    /// surfaces as [`StoreError::Desync`].
    pub async fn read_size(&mut self) -> Result<u64> {
        let size = framing::read_size(&mut self.stream)
            .await
            .map_err(StoreError::desync)?;
        self.bytes_received += size_line_len(size);
        Ok(size)
    }

    pub async fn send_ack(&mut self) -> Result<()> {
        framing::send_ack(&mut self.stream).await?;
        self.bytes_sent += framing::ACK.len() as u64;
        Ok(())
    }

    pub async fn expect_ack(&mut self) -> Result<()> {
        framing::expect_ack(&mut self.stream)
            .await
            .map_err(StoreError::desync)?;
        self.bytes_received += framing::ACK.len() as u64;
        Ok(())
    }

    /// Receive exactly `size` body bytes into `dest`.
    pub async fn recv_body<W>(&mut self, dest: &mut W, size: u64, chunk_size: usize) -> Transfer
    where
        W: AsyncWrite + Unpin,
    {
        let t = framing::copy_body(&mut self.stream, dest, size, chunk_size).await;
        self.bytes_received += t.received;
        t
    }

    /// Stream `size` body bytes read from `src`. The size line must already
    /// have been sent.
    pub async fn send_body<R>(&mut self, src: &mut R, size: u64, chunk_size: usize) -> Transfer
    where
        R: AsyncRead + Unpin,
    {
        let t = framing::copy_body(src, &mut self.stream, size, chunk_size).await;
        self.bytes_sent += t.sent;
        t
    }
}

/// Pipe `size` body bytes from one session to another without buffering the
/// whole body, counting each side independently.
pub async fn relay_body<A, B>(
    from: &mut Session<A>,
    to: &mut Session<B>,
    size: u64,
    chunk_size: usize,
) -> Transfer
where
    A: AsyncRead + AsyncWrite + Unpin,
    B: AsyncRead + AsyncWrite + Unpin,
{
    let t = framing::copy_body(&mut from.stream, &mut to.stream, size, chunk_size).await;
    from.bytes_received += t.received;
    to.bytes_sent += t.sent;
    t
}

/// Digits plus the delimiter.
fn size_line_len(size: u64) -> u64 {
    size.to_string().len() as u64 + 1
}
