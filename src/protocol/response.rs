//! Reply envelope: `STATUS <len>\n<payload>`.
//!
//! `OK` and `ERR` carry a human-readable message (or a file listing);
//! `DATA` announces that a size-prefixed body follows the envelope.

use anyhow::Context;
use bytes::{BufMut, Bytes, BytesMut};
use std::fmt;
use tokio::io::{AsyncBufRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::{Result, StoreError};
use crate::protocol::framing::read_line;

/// Maximum payload size (16MB) - prevents OOM from corrupted headers
pub const MAX_PAYLOAD_SIZE: usize = 16 * 1024 * 1024;

/// `DATA ` + 8 digits + newline fits comfortably
const MAX_HEADER_LEN: usize = 32;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Ok,
    Err,
    Data,
}

impl Status {
    pub fn as_str(&self) -> &'static str {
        match self {
            Status::Ok => "OK",
            Status::Err => "ERR",
            Status::Data => "DATA",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "OK" => Some(Status::Ok),
            "ERR" => Some(Status::Err),
            "DATA" => Some(Status::Data),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    pub status: Status,
    pub payload: Bytes,
}

impl Response {
    pub fn new(status: Status, payload: impl Into<Bytes>) -> Self {
        Self {
            status,
            payload: payload.into(),
        }
    }

    pub fn ok(message: impl Into<String>) -> Self {
        Self::new(Status::Ok, message.into())
    }

    pub fn err(message: impl Into<String>) -> Self {
        Self::new(Status::Err, message.into())
    }

    /// Announce a body; `name` tells the receiver what is coming.
    pub fn data(name: impl Into<String>) -> Self {
        Self::new(Status::Data, name.into())
    }

    pub fn is_ok(&self) -> bool {
        self.status == Status::Ok
    }

    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.payload).into_owned()
    }

    /// Turn an `ERR` reply into [`StoreError::Remote`].
    pub fn into_result(self) -> Result<Self> {
        match self.status {
            Status::Err => Err(StoreError::Remote(self.text())),
            _ => Ok(self),
        }
    }

    pub fn encode(&self) -> Bytes {
        let header = format!("{} {}\n", self.status.as_str(), self.payload.len());
        let mut buf = BytesMut::with_capacity(header.len() + self.payload.len());
        buf.put_slice(header.as_bytes());
        buf.put_slice(&self.payload);
        buf.freeze()
    }

    pub async fn write<W: AsyncWrite + Unpin>(&self, w: &mut W) -> Result<()> {
        w.write_all(&self.encode())
            .await
            .map_err(StoreError::Transport)?;
        w.flush().await.map_err(StoreError::Transport)
    }

    pub async fn read<R: AsyncBufRead + Unpin>(r: &mut R) -> Result<Self> {
        let header = read_line(r, MAX_HEADER_LEN).await?.ok_or_else(|| {
            StoreError::Transport(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                "connection closed before reply",
            ))
        })?;
        let (status, len) = parse_header(&header)
            .map_err(|e| StoreError::Protocol(format!("{:#}", e)))?;

        let mut payload = vec![0u8; len];
        r.read_exact(&mut payload)
            .await
            .map_err(StoreError::Transport)?;
        Ok(Self::new(status, payload))
    }
}

fn parse_header(header: &str) -> anyhow::Result<(Status, usize)> {
    let (status, len) = header
        .split_once(' ')
        .with_context(|| format!("Malformed reply header {:?}", header))?;
    let status =
        Status::parse(status).with_context(|| format!("Unknown reply status {:?}", status))?;
    let len: usize = len
        .parse()
        .with_context(|| format!("Invalid reply length {:?}", len))?;
    if len > MAX_PAYLOAD_SIZE {
        anyhow::bail!(
            "Reply size {} exceeds maximum allowed size {}",
            len,
            MAX_PAYLOAD_SIZE
        );
    }
    Ok((status, len))
}

impl fmt::Display for Response {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.status.as_str(), self.text())
    }
}
