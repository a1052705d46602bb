//! Error types shared by every node role.
//!
//! Handlers convert these into `ERR` replies at the connection boundary;
//! nothing propagates past a connection worker.

use std::io;
use std::path::{Path, PathBuf};

use crate::router::NodeId;

pub type Result<T> = std::result::Result<T, StoreError>;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Malformed or unknown command, or a frame that does not parse
    #[error("{0}")]
    Protocol(String),

    /// Missing or invalid command arguments
    #[error("Invalid {verb} command: {reason}")]
    Usage { verb: &'static str, reason: String },

    #[error("Path error for {path}: {reason}")]
    Path { path: String, reason: String },

    #[error("Unsupported file extension: {0}")]
    UnsupportedExtension(String),

    #[error("File {0} already exists")]
    AlreadyExists(String),

    /// Local filesystem failure, carrying the OS reason
    #[error("{op} {path}: {source}")]
    Io {
        op: &'static str,
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// Byte-count mismatch on any leg of a streamed body
    #[error("Incomplete transfer: {transferred}/{expected} bytes")]
    Incomplete { expected: u64, transferred: u64 },

    /// Bad framing inside a body exchange; the rest of the stream is unreadable
    #[error("{0}")]
    Desync(String),

    /// Could not connect, send to, or receive from a specialized node
    #[error("Forwarding to {node} failed: {reason}")]
    Forward { node: NodeId, reason: String },

    /// An `ERR` reply produced by the peer
    #[error("{0}")]
    Remote(String),

    /// Failure on the peer socket itself
    #[error("Connection error: {0}")]
    Transport(#[source] io::Error),

    #[error("Archive error: {0}")]
    Archive(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl StoreError {
    pub fn io(op: &'static str, path: impl AsRef<Path>, source: io::Error) -> Self {
        StoreError::Io {
            op,
            path: path.as_ref().to_path_buf(),
            source,
        }
    }

    pub fn path(path: impl AsRef<Path>, reason: impl Into<String>) -> Self {
        StoreError::Path {
            path: path.as_ref().display().to_string(),
            reason: reason.into(),
        }
    }

    pub fn forward(node: NodeId, reason: impl ToString) -> Self {
        StoreError::Forward {
            node,
            reason: reason.to_string(),
        }
    }

    /// Framing errors met mid-exchange leave the stream unreadable.
    pub fn desync(self) -> Self {
        match self {
            StoreError::Protocol(reason) => StoreError::Desync(reason),
            other => other,
        }
    }

    /// Whether the connection is still in sync after this error, so that an
    /// `ERR` reply can be written and the next command read.
    pub fn keeps_connection(&self) -> bool {
        !matches!(
            self,
            StoreError::Transport(_) | StoreError::Incomplete { .. } | StoreError::Desync(_)
        )
    }
}

impl From<toml::de::Error> for StoreError {
    fn from(e: toml::de::Error) -> Self {
        StoreError::Config(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stream_errors_drop_connection() {
        let e = StoreError::Incomplete {
            expected: 10,
            transferred: 4,
        };
        assert!(!e.keeps_connection());
        assert_eq!(e.to_string(), "Incomplete transfer: 4/10 bytes");

        let e = StoreError::Transport(io::Error::from(io::ErrorKind::BrokenPipe));
        assert!(!e.keeps_connection());
    }

    #[test]
    fn test_bad_size_line_drops_connection() {
        let e = StoreError::Protocol("Line exceeds 20 bytes".into()).desync();
        assert!(matches!(e, StoreError::Desync(_)));
        assert!(!e.keeps_connection());
        assert_eq!(e.to_string(), "Line exceeds 20 bytes");

        let e = StoreError::AlreadyExists("a.c".into()).desync();
        assert!(e.keeps_connection());
    }

    #[test]
    fn test_reply_errors_keep_connection() {
        assert!(StoreError::AlreadyExists("a.c".into()).keeps_connection());
        assert!(StoreError::forward(NodeId::Pdf, "connection refused").keeps_connection());
        assert_eq!(
            StoreError::forward(NodeId::Pdf, "connection refused").to_string(),
            "Forwarding to spdf failed: connection refused"
        );
    }

    #[test]
    fn test_io_error_includes_reason() {
        let e = StoreError::io(
            "open",
            "/tmp/missing.c",
            io::Error::from(io::ErrorKind::NotFound),
        );
        let msg = e.to_string();
        assert!(msg.starts_with("open /tmp/missing.c: "));
        assert!(e.keeps_connection());
    }
}
