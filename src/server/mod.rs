//! Listening side of every node role.
//!
//! [`serve`] accepts forever and spawns one isolated worker per connection.
//! A worker reads a command line, hands it to the role's [`Handler`] and turns
//! any error the handler returns into an `ERR` reply. Errors that leave the
//! stream out of sync close the connection instead.

pub mod front;
pub mod node;

use async_trait::async_trait;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tracing::Instrument;

use crate::archive::Bundler;
use crate::config::ClusterConfig;
use crate::error::{Result, StoreError};
use crate::path::extension_of;
use crate::protocol::{Response, Session};
use crate::router::NodeId;

pub use front::FrontDoor;
pub use node::NodeServer;

#[async_trait]
pub trait Handler: Send + Sync + 'static {
    fn role(&self) -> NodeId;

    /// Front-door connections carry many commands; node connections one.
    fn persistent(&self) -> bool;

    /// Run one command to completion, replies included.
    ///
    /// An error is reported to the peer by the caller, so a handler must not
    /// have written a final reply when it returns one.
    async fn handle(&self, line: &str, session: &mut Session<TcpStream>) -> Result<()>;
}

/// Accept loop. Only returns if the listener itself cannot be queried.
pub async fn serve<H: Handler>(listener: TcpListener, handler: Arc<H>) -> Result<()> {
    let local = listener.local_addr().map_err(StoreError::Transport)?;
    tracing::info!("{} listening on {}", handler.role(), local);

    loop {
        match listener.accept().await {
            Ok((stream, peer)) => {
                let handler = handler.clone();
                let span = tracing::info_span!("conn", peer = %peer, role = %handler.role());
                tokio::spawn(
                    async move {
                        if let Err(e) = stream.set_nodelay(true) {
                            tracing::debug!("set_nodelay failed: {}", e);
                        }
                        run_connection(handler, Session::new(stream, peer.to_string())).await;
                    }
                    .instrument(span),
                );
            }
            Err(e) => {
                // e.g. EMFILE; back off instead of spinning
                tracing::warn!("accept failed: {}", e);
                tokio::time::sleep(Duration::from_millis(100)).await;
            }
        }
    }
}

/// Build the handler for `role` and serve it on `listener`.
pub async fn run(
    config: &ClusterConfig,
    role: NodeId,
    listener: TcpListener,
    bundler: Arc<dyn Bundler>,
) -> Result<()> {
    match role {
        NodeId::Main => serve(listener, Arc::new(FrontDoor::new(config, bundler).await?)).await,
        node => serve(listener, Arc::new(NodeServer::new(config, node, bundler).await?)).await,
    }
}

async fn run_connection<H: Handler>(handler: Arc<H>, mut session: Session<TcpStream>) {
    tracing::debug!("connected");

    loop {
        let line = match session.read_command().await {
            Ok(Some(line)) => line,
            Ok(None) => break,
            Err(e) => {
                // the rest of an overlong line is still in the stream
                tracing::warn!("{}", e);
                if e.keeps_connection() {
                    let _ = session.reply(&Response::err(e.to_string())).await;
                }
                break;
            }
        };

        tracing::info!("<- {}", line);
        match handler.handle(&line, &mut session).await {
            Ok(()) => {}
            Err(e) if e.keeps_connection() => {
                tracing::warn!("{} failed: {}", verb_of(&line), e);
                if let Err(reply_err) = session.reply(&Response::err(e.to_string())).await {
                    tracing::debug!("could not report error: {}", reply_err);
                    break;
                }
            }
            Err(e) => {
                tracing::warn!(
                    "{} failed, closing connection: {} (sent {} bytes, received {} bytes)",
                    verb_of(&line),
                    e,
                    session.bytes_sent(),
                    session.bytes_received()
                );
                // the peer is still waiting on a reply; anything after it is unread
                if let StoreError::Desync(_) = e {
                    let _ = session.reply(&Response::err(e.to_string())).await;
                }
                break;
            }
        }

        if !handler.persistent() {
            break;
        }
    }

    tracing::debug!(
        "disconnected (sent {} bytes, received {} bytes)",
        session.bytes_sent(),
        session.bytes_received()
    );
}

fn verb_of(line: &str) -> &str {
    line.split_whitespace().next().unwrap_or("command")
}

/// Names of the regular files in `dir` carrying `extension`, sorted.
/// A missing directory lists as empty.
pub(crate) async fn list_dir(dir: &Path, extension: &str) -> Result<Vec<String>> {
    let mut entries = match tokio::fs::read_dir(dir).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(StoreError::io("opendir", dir, e)),
    };

    let mut names = Vec::new();
    while let Some(entry) = entries
        .next_entry()
        .await
        .map_err(|e| StoreError::io("readdir", dir, e))?
    {
        let is_file = entry
            .file_type()
            .await
            .map(|t| t.is_file())
            .unwrap_or(false);
        if !is_file {
            continue;
        }
        if let Some(name) = entry.file_name().to_str() {
            if extension_of(name) == Some(extension) {
                names.push(name.to_string());
            }
        }
    }
    names.sort();
    Ok(names)
}

/// Listing payload: one name per line.
pub(crate) fn join_names(names: &[String]) -> String {
    let mut out = String::new();
    for name in names {
        out.push_str(name);
        out.push('\n');
    }
    out
}
