//! Length-prefixed file body framing.
//!
//! Wire format: `<decimal size>\n`, then (uploads only) the literal `ACK`
//! from the receiver, then exactly `size` raw bytes.
//! The size line is newline-terminated and read until the delimiter, so it
//! does not depend on how TCP segments the stream.

use tokio::io::{
    AsyncBufRead, AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt,
};

use crate::error::{Result, StoreError};

/// Acknowledgment sent by an upload receiver before the body flows
pub const ACK: &[u8; 3] = b"ACK";

/// Chunk size for client-facing transfers
pub const CLIENT_CHUNK_SIZE: usize = 8 * 1024; // 8KB

/// Chunk size for node-to-node transfers
pub const NODE_CHUNK_SIZE: usize = 64 * 1024; // 64KB

/// Maximum length of a control line
pub const MAX_LINE_LEN: usize = 8 * 1024;

/// u64::MAX has 20 decimal digits
const MAX_SIZE_DIGITS: usize = 20;

// =============================================================================
// Lines
// =============================================================================

/// Read one `\n`-terminated line of at most `limit` bytes.
///
/// Returns `None` on a clean EOF before any byte arrived.
pub async fn read_line<R: AsyncBufRead + Unpin>(r: &mut R, limit: usize) -> Result<Option<String>> {
    let mut buf = Vec::with_capacity(64);
    let n = (&mut *r)
        .take(limit as u64 + 1)
        .read_until(b'\n', &mut buf)
        .await
        .map_err(StoreError::Transport)?;

    if n == 0 {
        return Ok(None);
    }
    if buf.last() != Some(&b'\n') {
        if buf.len() > limit {
            return Err(StoreError::Protocol(format!(
                "Line exceeds {} bytes",
                limit
            )));
        }
        return Err(StoreError::Transport(std::io::Error::new(
            std::io::ErrorKind::UnexpectedEof,
            "connection closed mid-line",
        )));
    }

    buf.pop();
    if buf.last() == Some(&b'\r') {
        buf.pop();
    }
    String::from_utf8(buf)
        .map(Some)
        .map_err(|_| StoreError::Protocol("Invalid UTF-8 in control line".to_string()))
}

pub async fn write_line<W: AsyncWrite + Unpin>(w: &mut W, line: &str) -> Result<()> {
    let mut out = Vec::with_capacity(line.len() + 1);
    out.extend_from_slice(line.as_bytes());
    out.push(b'\n');
    w.write_all(&out).await.map_err(StoreError::Transport)?;
    w.flush().await.map_err(StoreError::Transport)
}

// =============================================================================
// Size prefix and ACK
// =============================================================================

pub async fn write_size<W: AsyncWrite + Unpin>(w: &mut W, size: u64) -> Result<()> {
    write_line(w, &size.to_string()).await
}

pub async fn read_size<R: AsyncBufRead + Unpin>(r: &mut R) -> Result<u64> {
    let line = read_line(r, MAX_SIZE_DIGITS).await?.ok_or_else(|| {
        StoreError::Transport(std::io::Error::new(
            std::io::ErrorKind::UnexpectedEof,
            "connection closed before file size",
        ))
    })?;
    if line.is_empty() || !line.bytes().all(|b| b.is_ascii_digit()) {
        return Err(StoreError::Protocol(format!("Invalid file size {:?}", line)));
    }
    line.parse::<u64>()
        .map_err(|_| StoreError::Protocol(format!("Invalid file size {:?}", line)))
}

pub async fn send_ack<W: AsyncWrite + Unpin>(w: &mut W) -> Result<()> {
    w.write_all(ACK).await.map_err(StoreError::Transport)?;
    w.flush().await.map_err(StoreError::Transport)
}

pub async fn expect_ack<R: AsyncRead + Unpin>(r: &mut R) -> Result<()> {
    let mut buf = [0u8; 3];
    r.read_exact(&mut buf).await.map_err(StoreError::Transport)?;
    if &buf != ACK {
        return Err(StoreError::Protocol(format!(
            "Expected ACK, got {:?}",
            String::from_utf8_lossy(&buf)
        )));
    }
    Ok(())
}

// =============================================================================
// Body
// =============================================================================

/// Byte counters of one body transfer, kept independently per side.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Transfer {
    pub expected: u64,
    pub received: u64,
    pub sent: u64,
    /// Set when either side failed rather than reaching `expected`
    pub aborted: bool,
}

impl Transfer {
    pub fn is_complete(&self) -> bool {
        !self.aborted && self.received == self.expected && self.sent == self.expected
    }

    pub fn check(&self) -> Result<()> {
        if self.is_complete() {
            Ok(())
        } else {
            Err(StoreError::Incomplete {
                expected: self.expected,
                transferred: self.received.min(self.sent),
            })
        }
    }
}

/// Copy up to `expected` bytes from `r` to `w` in `chunk_size` pieces.
///
/// Stops early when a read returns zero bytes (peer closed) or either side
/// fails; the returned counters tell how far it got. Never reads past
/// `expected`, so whatever follows the body stays in the stream.
pub async fn copy_body<R, W>(r: &mut R, w: &mut W, expected: u64, chunk_size: usize) -> Transfer
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut t = Transfer {
        expected,
        ..Default::default()
    };
    let mut buf = vec![0u8; chunk_size.min(expected.max(1) as usize)];

    while t.received < expected {
        let want = (expected - t.received).min(buf.len() as u64) as usize;
        let n = match r.read(&mut buf[..want]).await {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) => {
                tracing::debug!("Body read failed after {} bytes: {}", t.received, e);
                t.aborted = true;
                break;
            }
        };
        t.received += n as u64;

        if let Err(e) = w.write_all(&buf[..n]).await {
            tracing::debug!("Body write failed after {} bytes: {}", t.sent, e);
            t.aborted = true;
            break;
        }
        t.sent += n as u64;
    }

    if let Err(e) = w.flush().await {
        tracing::debug!("Body flush failed: {}", e);
        t.aborted = true;
    }
    t
}

/// Send `size` then the body read from `r`. No ACK handshake.
pub async fn send_body<R, W>(r: &mut R, w: &mut W, size: u64, chunk_size: usize) -> Result<Transfer>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    write_size(w, size).await?;
    let t = copy_body(r, w, size, chunk_size).await;
    t.check()?;
    Ok(t)
}

/// Receive a size line then the body into `w`. No ACK handshake.
pub async fn recv_body<R, W>(r: &mut R, w: &mut W, chunk_size: usize) -> Result<Transfer>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let size = read_size(r).await?;
    let t = copy_body(r, w, size, chunk_size).await;
    t.check()?;
    Ok(t)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{duplex, BufReader};

    #[tokio::test]
    async fn test_size_line_split_across_writes() {
        let (mut a, b) = duplex(64);
        let mut reader = BufReader::new(b);

        let writer = tokio::spawn(async move {
            a.write_all(b"12").await.unwrap();
            a.flush().await.unwrap();
            tokio::task::yield_now().await;
            a.write_all(b"345\nrest").await.unwrap();
        });

        assert_eq!(read_size(&mut reader).await.unwrap(), 12345);
        writer.await.unwrap();

        let mut rest = [0u8; 4];
        reader.read_exact(&mut rest).await.unwrap();
        assert_eq!(&rest, b"rest");
    }

    #[tokio::test]
    async fn test_read_size_rejects_garbage() {
        let mut input: &[u8] = b"12a\n";
        assert!(matches!(
            read_size(&mut input).await,
            Err(StoreError::Protocol(_))
        ));

        let mut input: &[u8] = b"-5\n";
        assert!(read_size(&mut input).await.is_err());

        let mut input: &[u8] = b"123456789012345678901234\n";
        assert!(matches!(
            read_size(&mut input).await,
            Err(StoreError::Protocol(_))
        ));

        let mut input: &[u8] = b"";
        assert!(matches!(
            read_size(&mut input).await,
            Err(StoreError::Transport(_))
        ));
    }

    #[tokio::test]
    async fn test_read_line_limits() {
        let mut input: &[u8] = b"dfile ~/smain/a.c\r\nnext\n";
        assert_eq!(
            read_line(&mut input, MAX_LINE_LEN).await.unwrap().as_deref(),
            Some("dfile ~/smain/a.c")
        );
        assert_eq!(
            read_line(&mut input, MAX_LINE_LEN).await.unwrap().as_deref(),
            Some("next")
        );
        assert_eq!(read_line(&mut input, MAX_LINE_LEN).await.unwrap(), None);

        let mut input: &[u8] = b"toolong\n";
        assert!(matches!(
            read_line(&mut input, 3).await,
            Err(StoreError::Protocol(_))
        ));
    }

    #[tokio::test]
    async fn test_ack() {
        let mut out = Vec::new();
        send_ack(&mut out).await.unwrap();
        assert_eq!(out, b"ACK");

        let mut input: &[u8] = b"ACK";
        expect_ack(&mut input).await.unwrap();

        let mut input: &[u8] = b"NAK";
        assert!(expect_ack(&mut input).await.is_err());
    }

    #[tokio::test]
    async fn test_body_sizes_around_chunk_boundary() {
        for size in [
            0usize,
            1,
            CLIENT_CHUNK_SIZE - 1,
            CLIENT_CHUNK_SIZE,
            CLIENT_CHUNK_SIZE + 1,
            3 * CLIENT_CHUNK_SIZE + 17,
        ] {
            let body: Vec<u8> = (0..size).map(|i| (i % 251) as u8).collect();

            let mut wire = Vec::new();
            let sent = send_body(&mut body.as_slice(), &mut wire, size as u64, CLIENT_CHUNK_SIZE)
                .await
                .unwrap();
            assert_eq!(sent.sent, size as u64);

            let mut out = Vec::new();
            let mut reader = BufReader::new(wire.as_slice());
            let got = recv_body(&mut reader, &mut out, CLIENT_CHUNK_SIZE)
                .await
                .unwrap();
            assert!(got.is_complete());
            assert_eq!(out, body, "size {}", size);
        }
    }

    #[tokio::test]
    async fn test_short_body_is_incomplete() {
        let mut input: &[u8] = b"10\nabcd";
        let mut out = Vec::new();
        let err = recv_body(&mut input, &mut out, CLIENT_CHUNK_SIZE)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            StoreError::Incomplete {
                expected: 10,
                transferred: 4
            }
        ));
        assert_eq!(out, b"abcd");
    }

    #[tokio::test]
    async fn test_copy_body_leaves_trailing_bytes() {
        let mut input: &[u8] = b"helloOK 0\n";
        let mut out = Vec::new();
        let t = copy_body(&mut input, &mut out, 5, 2).await;
        assert!(t.is_complete());
        assert_eq!(out, b"hello");
        assert_eq!(input, b"OK 0\n");
    }
}
