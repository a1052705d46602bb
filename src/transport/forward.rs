//! Front-door side of the node protocol.
//!
//! Every operation opens a fresh connection, issues one command and reads
//! the node's answer. Nothing is pooled or retried: a failure aborts only
//! the attempt that hit it.

use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;
use tokio::io::AsyncRead;
use tokio::net::TcpStream;

use crate::error::{Result, StoreError};
use crate::protocol::{NodeCommand, Response, Session, Status, NODE_CHUNK_SIZE};
use crate::router::NodeId;

/// How long to wait for a node to accept a connection
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// A node connection positioned at the first byte of an announced body.
pub struct IncomingBody {
    pub session: Session<TcpStream>,
    /// Name carried by the node's `DATA` reply
    pub name: String,
    pub size: u64,
}

#[derive(Debug, Clone, Copy)]
pub struct NodeClient {
    node: NodeId,
    addr: SocketAddr,
}

impl NodeClient {
    pub fn new(node: NodeId, addr: SocketAddr) -> Self {
        Self { node, addr }
    }

    pub fn node(&self) -> NodeId {
        self.node
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Hand a local file body to the node under `dir/name`.
    ///
    /// Returns the node's confirmation message. A refusal before the body
    /// (the node already holds the name, say) is [`StoreError::Remote`];
    /// once the body has gone out, any failure is a [`StoreError::Forward`].
    pub async fn store<R>(&self, name: &str, dir: &Path, src: &mut R, size: u64) -> Result<String>
    where
        R: AsyncRead + Unpin + Send,
    {
        let command = NodeCommand::Store {
            name: name.to_string(),
            dir: path_arg(dir)?,
        };
        let mut session = self.open(&command).await?;

        let ready = self.read_reply(&mut session).await?.into_result()?;
        tracing::debug!("{} ready for {}: {}", self.node, name, ready.text());

        session
            .send_size(size)
            .await
            .map_err(|e| self.failed(e))?;
        let t = session.send_body(src, size, NODE_CHUNK_SIZE).await;
        t.check().map_err(|e| self.failed(e))?;

        let done = self
            .read_reply(&mut session)
            .await?
            .into_result()
            .map_err(|e| StoreError::forward(self.node, e))?;
        Ok(done.text())
    }

    /// Ask the node for a file. An `ERR` reply comes back as
    /// [`StoreError::Remote`] carrying the node's reason.
    pub async fn fetch(&self, path: &Path) -> Result<IncomingBody> {
        let command = NodeCommand::Get {
            path: path_arg(path)?,
        };
        self.open_body(&command).await
    }

    pub async fn remove(&self, path: &Path) -> Result<String> {
        let command = NodeCommand::Remove {
            path: path_arg(path)?,
        };
        let mut session = self.open(&command).await?;
        let reply = self.read_reply(&mut session).await?.into_result()?;
        Ok(reply.text())
    }

    /// File names the node holds in `dir`; empty when it has none.
    pub async fn list(&self, dir: &Path) -> Result<Vec<String>> {
        let command = NodeCommand::List {
            dir: path_arg(dir)?,
        };
        let mut session = self.open(&command).await?;
        let reply = self.read_reply(&mut session).await?.into_result()?;
        Ok(reply
            .text()
            .lines()
            .filter(|l| !l.is_empty())
            .map(str::to_string)
            .collect())
    }

    /// Ask the node to bundle its whole root and stream the archive back.
    pub async fn archive(&self) -> Result<IncomingBody> {
        self.open_body(&NodeCommand::Archive).await
    }

    async fn open(&self, command: &NodeCommand) -> Result<Session<TcpStream>> {
        let mut session = match tokio::time::timeout(CONNECT_TIMEOUT, Session::connect(self.addr)).await
        {
            Ok(Ok(s)) => s,
            Ok(Err(e)) => {
                return Err(StoreError::forward(
                    self.node,
                    format!("cannot connect to {}: {}", self.addr, e),
                ))
            }
            Err(_) => {
                return Err(StoreError::forward(
                    self.node,
                    format!("timed out connecting to {}", self.addr),
                ))
            }
        };

        tracing::debug!("-> {} {}", self.node, command.to_line());
        session
            .send_command(&command.to_line())
            .await
            .map_err(|e| self.failed(e))?;
        Ok(session)
    }

    async fn open_body(&self, command: &NodeCommand) -> Result<IncomingBody> {
        let mut session = self.open(command).await?;
        let reply = self.read_reply(&mut session).await?.into_result()?;
        if reply.status != Status::Data {
            return Err(StoreError::forward(
                self.node,
                format!("expected a data reply, got {}", reply),
            ));
        }
        let size = session.read_size().await.map_err(|e| self.failed(e))?;
        Ok(IncomingBody {
            session,
            name: reply.text(),
            size,
        })
    }

    async fn read_reply(&self, session: &mut Session<TcpStream>) -> Result<Response> {
        session.read_reply().await.map_err(|e| self.failed(e))
    }

    /// Anything that breaks the node connection becomes a forwarding error.
    /// The client connection is unaffected by it.
    fn failed(&self, e: StoreError) -> StoreError {
        match e {
            StoreError::Remote(_) | StoreError::Forward { .. } => e,
            other => StoreError::forward(self.node, other),
        }
    }
}

/// Node commands carry absolute paths as text.
fn path_arg(path: &Path) -> Result<String> {
    path.to_str()
        .map(str::to_string)
        .ok_or_else(|| StoreError::path(path, "Path is not valid UTF-8"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    async fn dead_addr() -> SocketAddr {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);
        addr
    }

    #[tokio::test]
    async fn test_unreachable_node_is_forward_error() {
        let client = NodeClient::new(NodeId::Pdf, dead_addr().await);
        let err = client.list(Path::new("/h/spdf")).await.unwrap_err();
        assert!(matches!(err, StoreError::Forward { node: NodeId::Pdf, .. }));
        assert!(err.keeps_connection());

        let mut body: &[u8] = b"data";
        let err = client
            .store("a.pdf", Path::new("/h/spdf"), &mut body, 4)
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Forward { .. }));
    }

    #[tokio::test]
    async fn test_list_splits_lines() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (stream, peer) = listener.accept().await.unwrap();
            let mut session = Session::new(stream, peer.to_string());
            let line = session.read_command().await.unwrap().unwrap();
            assert_eq!(line, "list /h/stext/docs");
            session
                .reply(&Response::ok("a.txt\nb.txt\n"))
                .await
                .unwrap();
        });

        let client = NodeClient::new(NodeId::Text, addr);
        let names = client.list(Path::new("/h/stext/docs")).await.unwrap();
        assert_eq!(names, vec!["a.txt", "b.txt"]);
    }

    #[tokio::test]
    async fn test_fetch_error_carries_node_reason() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (stream, peer) = listener.accept().await.unwrap();
            let mut session = Session::new(stream, peer.to_string());
            session.read_command().await.unwrap().unwrap();
            session
                .reply(&Response::err("stat /h/spdf/x.pdf: No such file or directory"))
                .await
                .unwrap();
        });

        let client = NodeClient::new(NodeId::Pdf, addr);
        match client.fetch(Path::new("/h/spdf/x.pdf")).await {
            Err(StoreError::Remote(reason)) => assert!(reason.contains("No such file")),
            Err(e) => panic!("unexpected error: {}", e),
            Ok(_) => panic!("fetch of a missing file succeeded"),
        }
    }

    #[tokio::test]
    async fn test_fetch_positions_at_body() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (stream, peer) = listener.accept().await.unwrap();
            let mut session = Session::new(stream, peer.to_string());
            session.read_command().await.unwrap().unwrap();
            session.reply(&Response::data("r.pdf")).await.unwrap();
            session.send_size(5).await.unwrap();
            let t = session.send_body(&mut &b"hello"[..], 5, NODE_CHUNK_SIZE).await;
            assert!(t.is_complete());
        });

        let client = NodeClient::new(NodeId::Pdf, addr);
        let mut incoming = client.fetch(Path::new("/h/spdf/r.pdf")).await.unwrap();
        assert_eq!(incoming.name, "r.pdf");
        assert_eq!(incoming.size, 5);
        let mut out = Vec::new();
        let t = incoming
            .session
            .recv_body(&mut out, incoming.size, NODE_CHUNK_SIZE)
            .await;
        assert!(t.is_complete());
        assert_eq!(out, b"hello");
    }

    #[tokio::test]
    async fn test_store_streams_after_ready() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let node = tokio::spawn(async move {
            let (stream, peer) = listener.accept().await.unwrap();
            let mut session = Session::new(stream, peer.to_string());
            let line = session.read_command().await.unwrap().unwrap();
            assert_eq!(line, "store n.txt /h/stext/a b");
            session.reply(&Response::ok("ready")).await.unwrap();
            let size = session.read_size().await.unwrap();
            let mut out = Vec::new();
            assert!(session
                .recv_body(&mut out, size, NODE_CHUNK_SIZE)
                .await
                .is_complete());
            session.reply(&Response::ok("File n.txt stored")).await.unwrap();
            out
        });

        let client = NodeClient::new(NodeId::Text, addr);
        let mut body: &[u8] = b"some text";
        let msg = client
            .store("n.txt", Path::new("/h/stext/a b"), &mut body, 9)
            .await
            .unwrap();
        assert_eq!(msg, "File n.txt stored");
        assert_eq!(node.await.unwrap(), b"some text");
    }

    #[tokio::test]
    async fn test_store_failure_after_body_is_forward_error() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (stream, peer) = listener.accept().await.unwrap();
            let mut session = Session::new(stream, peer.to_string());
            session.read_command().await.unwrap();
            session.reply(&Response::ok("ready")).await.unwrap();
            let size = session.read_size().await.unwrap();
            session
                .recv_body(&mut tokio::io::sink(), size, NODE_CHUNK_SIZE)
                .await;
            session.reply(&Response::err("sync failed")).await.unwrap();
        });

        let client = NodeClient::new(NodeId::Pdf, addr);
        let mut body: &[u8] = b"%PDF";
        let err = client
            .store("a.pdf", Path::new("/h/spdf"), &mut body, 4)
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Forward { node: NodeId::Pdf, .. }));
        assert!(err.to_string().ends_with("sync failed"));
    }

    #[tokio::test]
    async fn test_store_refusal_is_remote() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (stream, peer) = listener.accept().await.unwrap();
            let mut session = Session::new(stream, peer.to_string());
            session.read_command().await.unwrap();
            session
                .reply(&Response::err("File a.pdf already exists"))
                .await
                .unwrap();
        });

        let client = NodeClient::new(NodeId::Pdf, addr);
        let mut body: &[u8] = b"%PDF";
        let err = client
            .store("a.pdf", Path::new("/h/spdf"), &mut body, 4)
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Remote(ref r) if r == "File a.pdf already exists"));
    }
}
