//! Front-door command handlers.
//!
//! Files with the local extension live under the front-door root; the
//! others are routed to their node with the root segment of every path
//! rewritten on the way.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs::{File, OpenOptions};
use tokio::net::TcpStream;

use crate::archive::Bundler;
use crate::config::ClusterConfig;
use crate::error::{Result, StoreError};
use crate::path::{ensure_dir, ensure_within, PathResolver};
use crate::protocol::{
    relay_body, FrontCommand, Response, Session, Transfer, CLIENT_CHUNK_SIZE,
};
use crate::router::{NodeId, Router};
use crate::server::{join_names, list_dir, Handler};
use crate::transport::NodeClient;

/// Suffix given to an upload that ended short
pub const PARTIAL_SUFFIX: &str = ".partial";

pub struct FrontDoor {
    router: Router,
    resolver: PathResolver,
    root: PathBuf,
    archive_dir: PathBuf,
    bundler: Arc<dyn Bundler>,
}

impl FrontDoor {
    pub async fn new(config: &ClusterConfig, bundler: Arc<dyn Bundler>) -> Result<Self> {
        let resolver = config.resolver()?;
        let root = resolver.resolve(&config.main.root)?;
        let archive_dir = match &config.archive_dir {
            Some(dir) => resolver.resolve(dir)?,
            None => root.clone(),
        };
        ensure_dir(&root).await?;

        Ok(Self {
            router: Router::from_config(config)?,
            resolver,
            root,
            archive_dir,
            bundler,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn node(&self, node: NodeId) -> NodeClient {
        NodeClient::new(node, self.router.addr(node))
    }

    /// Resolve a client path and make sure it stays in the front-door tree.
    fn client_path(&self, logical: &str) -> Result<PathBuf> {
        let path = self.resolver.resolve(logical)?;
        ensure_within(&self.root, &path)?;
        Ok(path)
    }

    async fn upload(
        &self,
        session: &mut Session<TcpStream>,
        name: &str,
        dir: &str,
    ) -> Result<()> {
        // unroutable names are refused before anything touches the disk
        let node = self.router.node_for_path(name)?;
        let dir = self.client_path(dir)?;
        ensure_dir(&dir).await?;

        let dest = dir.join(name);
        let mut file = match OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&dest)
            .await
        {
            Ok(f) => f,
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                return Err(StoreError::AlreadyExists(name.to_string()))
            }
            Err(e) => return Err(StoreError::io("create", &dest, e)),
        };

        let received = receive_upload(session, &mut file).await;
        let synced = file.sync_all().await;
        drop(file);

        let t = match received {
            Ok(t) => t,
            Err(e) => {
                // no body byte arrived, so there is nothing worth keeping
                discard(&dest).await;
                return Err(e);
            }
        };
        if let Err(e) = t.check() {
            flag_partial(&dest).await;
            return Err(e);
        }
        synced.map_err(|e| StoreError::io("sync", &dest, e))?;
        let size = t.received;
        tracing::info!("received {} ({} bytes)", dest.display(), t.received);

        if node == NodeId::Main {
            return session
                .reply(&Response::ok(format!("File {} stored", name)))
                .await;
        }

        let remote_dir = self.router.rewrite(&dir, node);
        let mut src = File::open(&dest)
            .await
            .map_err(|e| StoreError::io("open", &dest, e))?;
        match self.node(node).store(name, &remote_dir, &mut src, size).await {
            Ok(message) => {
                drop(src);
                if let Err(e) = tokio::fs::remove_file(&dest).await {
                    tracing::warn!("stored on {} but could not remove {}: {}", node, dest.display(), e);
                }
                tracing::info!("forwarded {} to {}", name, node);
                session.reply(&Response::ok(message)).await
            }
            Err(e @ StoreError::Forward { .. }) => {
                tracing::warn!("kept local copy {} after failed forward", dest.display());
                Err(e)
            }
            Err(e) => {
                // the node answered and refused; a local copy would shadow the name
                drop(src);
                discard(&dest).await;
                Err(e)
            }
        }
    }

    async fn download(&self, session: &mut Session<TcpStream>, logical: &str) -> Result<()> {
        let node = self.router.node_for_path(logical)?;
        let path = self.client_path(logical)?;
        let name = file_name(&path)?;

        let t = if node == NodeId::Main {
            let (mut file, size) = open_sized(&path).await?;
            session.reply(&Response::data(name)).await?;
            session.send_size(size).await?;
            session.send_body(&mut file, size, CLIENT_CHUNK_SIZE).await
        } else {
            let mut incoming = self.node(node).fetch(&self.router.rewrite(&path, node)).await?;
            session.reply(&Response::data(name)).await?;
            session.send_size(incoming.size).await?;
            relay(&mut incoming.session, session, incoming.size, node).await
        };
        t.check()?;

        session
            .reply(&Response::ok(format!("Transferred {} bytes", t.sent)))
            .await
    }

    async fn remove(&self, logical: &str) -> Result<String> {
        let node = self.router.node_for_path(logical)?;
        let path = self.client_path(logical)?;

        if node == NodeId::Main {
            tokio::fs::remove_file(&path)
                .await
                .map_err(|e| StoreError::io("remove", &path, e))?;
            return Ok(format!("File {} removed", file_name(&path)?));
        }
        self.node(node).remove(&self.router.rewrite(&path, node)).await
    }

    /// Local names first, then each node's in a fixed order.
    async fn display(&self, logical: &str) -> Result<Vec<String>> {
        let dir = self.client_path(logical)?;
        let mut names = list_dir(&dir, self.router.extension(NodeId::Main)).await?;
        for node in Router::REMOTE_NODES {
            let remote = self.node(node).list(&self.router.rewrite(&dir, node)).await?;
            names.extend(remote);
        }
        Ok(names)
    }

    async fn archive(&self, session: &mut Session<TcpStream>, extension: &str) -> Result<()> {
        let node = self.router.node_for(extension)?;
        let ext = self.router.extension(node);

        if node == NodeId::Main {
            ensure_dir(&self.archive_dir).await?;
            let dest = self.archive_dir.join(format!("{}.tar", ext));
            self.bundler
                .bundle(&self.root, ext, &dest)
                .await
                .map_err(|e| StoreError::Archive(format!("{:#}", e)))?;
            tracing::info!("archive written to {}", dest.display());
            return session
                .reply(&Response::ok(format!("Archive created at {}", dest.display())))
                .await;
        }

        let mut incoming = self.node(node).archive().await?;
        if incoming.size == 0 {
            return Err(StoreError::Archive(format!("{} sent an empty archive", node)));
        }
        session.reply(&Response::data(format!("{}.tar", ext))).await?;
        session.send_size(incoming.size).await?;
        let t = relay(&mut incoming.session, session, incoming.size, node).await;
        t.check()?;

        session
            .reply(&Response::ok(format!("Transferred {} bytes", t.sent)))
            .await
    }
}

#[async_trait]
impl Handler for FrontDoor {
    fn role(&self) -> NodeId {
        NodeId::Main
    }

    fn persistent(&self) -> bool {
        true
    }

    async fn handle(&self, line: &str, session: &mut Session<TcpStream>) -> Result<()> {
        match line.parse::<FrontCommand>()? {
            FrontCommand::Upload { name, dir } => self.upload(session, &name, &dir).await,
            FrontCommand::Download { path } => self.download(session, &path).await,
            FrontCommand::Remove { path } => {
                let message = self.remove(&path).await?;
                session.reply(&Response::ok(message)).await
            }
            FrontCommand::Display { dir } => {
                let names = self.display(&dir).await?;
                session.reply(&Response::ok(join_names(&names))).await
            }
            FrontCommand::Archive { extension } => self.archive(session, &extension).await,
        }
    }
}

/// Client half of an upload once the destination exists: ready, size, ACK, body.
async fn receive_upload(session: &mut Session<TcpStream>, file: &mut File) -> Result<Transfer> {
    session.reply(&Response::ok("ready")).await?;
    let size = session.read_size().await?;
    session.send_ack().await?;
    Ok(session.recv_body(file, size, CLIENT_CHUNK_SIZE).await)
}

/// Pipe a node body to the client, logging both counters when they disagree.
async fn relay(
    from: &mut Session<TcpStream>,
    to: &mut Session<TcpStream>,
    size: u64,
    node: NodeId,
) -> Transfer {
    let t = relay_body(from, to, size, CLIENT_CHUNK_SIZE).await;
    if !t.is_complete() {
        tracing::warn!(
            "relay from {} ended early: {} bytes from node, {} bytes to client, {} expected",
            node,
            t.received,
            t.sent,
            t.expected
        );
    }
    t
}

async fn open_sized(path: &Path) -> Result<(File, u64)> {
    let file = File::open(path)
        .await
        .map_err(|e| StoreError::io("open", path, e))?;
    let meta = file
        .metadata()
        .await
        .map_err(|e| StoreError::io("stat", path, e))?;
    if !meta.is_file() {
        return Err(StoreError::path(path, "Not a regular file"));
    }
    Ok((file, meta.len()))
}

fn file_name(path: &Path) -> Result<String> {
    path.file_name()
        .and_then(|n| n.to_str())
        .map(str::to_string)
        .ok_or_else(|| StoreError::path(path, "Path has no file name"))
}

async fn discard(dest: &Path) {
    if let Err(e) = tokio::fs::remove_file(dest).await {
        tracing::warn!("could not remove {}: {}", dest.display(), e);
    }
}

/// Rename a short upload so it cannot pass for a complete file.
async fn flag_partial(dest: &Path) {
    let mut flagged = dest.as_os_str().to_owned();
    flagged.push(PARTIAL_SUFFIX);
    match tokio::fs::rename(dest, &flagged).await {
        Ok(()) => tracing::warn!("incomplete upload kept as {}", Path::new(&flagged).display()),
        Err(e) => tracing::warn!("could not flag incomplete upload {}: {}", dest.display(), e),
    }
}
