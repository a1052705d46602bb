//! Specialized node: a leaf store for one extension.
//!
//! Paths arrive already rewritten by the front-door. The node only checks
//! that they stay under its own root and never forwards anything.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs::{File, OpenOptions};
use tokio::net::TcpStream;

use crate::archive::Bundler;
use crate::config::ClusterConfig;
use crate::error::{Result, StoreError};
use crate::path::{ensure_dir, ensure_within, extension_of, PathResolver};
use crate::protocol::{NodeCommand, Response, Session, NODE_CHUNK_SIZE};
use crate::router::NodeId;
use crate::server::{join_names, list_dir, Handler};

pub struct NodeServer {
    node: NodeId,
    resolver: PathResolver,
    root: PathBuf,
    extension: String,
    bundler: Arc<dyn Bundler>,
}

impl NodeServer {
    pub async fn new(config: &ClusterConfig, node: NodeId, bundler: Arc<dyn Bundler>) -> Result<Self> {
        if node == NodeId::Main {
            return Err(StoreError::Config(
                "smain is the front-door, not a storage node".to_string(),
            ));
        }
        let resolver = config.resolver()?;
        let root = resolver.resolve(&config.node(node).root)?;
        ensure_dir(&root).await?;

        Ok(Self {
            node,
            resolver,
            root,
            extension: config.node(node).extension.clone(),
            bundler,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn local_path(&self, raw: &str) -> Result<PathBuf> {
        let path = self.resolver.resolve(raw)?;
        ensure_within(&self.root, &path)?;
        Ok(path)
    }

    async fn store(&self, session: &mut Session<TcpStream>, name: &str, dir: &str) -> Result<()> {
        if extension_of(name) != Some(self.extension.as_str()) {
            return Err(StoreError::UnsupportedExtension(format!(
                "{} does not store {}",
                self.node, name
            )));
        }
        let dir = self.local_path(dir)?;
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

        session.reply(&Response::ok("ready")).await?;
        let received = match session.read_size().await {
            Ok(size) => Ok(session.recv_body(&mut file, size, NODE_CHUNK_SIZE).await),
            Err(e) => Err(e),
        };
        let synced = file.sync_all().await;
        drop(file);

        let stored = received.and_then(|t| {
            t.check()?;
            synced.map_err(|e| StoreError::io("sync", &dest, e))?;
            Ok(t)
        });
        let t = match stored {
            Ok(t) => t,
            Err(e) => {
                // a short store is useless to the front-door, which still has its copy
                if let Err(rm) = tokio::fs::remove_file(&dest).await {
                    tracing::warn!("could not remove incomplete {}: {}", dest.display(), rm);
                }
                return Err(e);
            }
        };

        tracing::info!("stored {} ({} bytes)", dest.display(), t.received);
        session
            .reply(&Response::ok(format!("File {} stored on {}", name, self.node)))
            .await
    }

    async fn get(&self, session: &mut Session<TcpStream>, raw: &str) -> Result<()> {
        let path = self.local_path(raw)?;
        let meta = tokio::fs::metadata(&path)
            .await
            .map_err(|e| StoreError::io("stat", &path, e))?;
        if !meta.is_file() {
            return Err(StoreError::path(&path, "Not a regular file"));
        }
        let mut file = File::open(&path)
            .await
            .map_err(|e| StoreError::io("open", &path, e))?;
        let name = path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or_default()
            .to_string();

        session.reply(&Response::data(name)).await?;
        session.send_size(meta.len()).await?;
        session
            .send_body(&mut file, meta.len(), NODE_CHUNK_SIZE)
            .await
            .check()
    }

    async fn remove(&self, raw: &str) -> Result<String> {
        let path = self.local_path(raw)?;
        tokio::fs::remove_file(&path)
            .await
            .map_err(|e| StoreError::io("remove", &path, e))?;
        tracing::info!("removed {}", path.display());
        let name = path.file_name().unwrap_or_default().to_string_lossy();
        Ok(format!("File {} removed from {}", name, self.node))
    }

    async fn archive(&self, session: &mut Session<TcpStream>) -> Result<()> {
        // removed when dropped
        let archive = tempfile::Builder::new()
            .prefix(&format!("{}-", self.node))
            .suffix(".tar")
            .tempfile()
            .map_err(|e| StoreError::Archive(format!("Cannot create temporary archive: {}", e)))?;

        self.bundler
            .bundle(&self.root, &self.extension, archive.path())
            .await
            .map_err(|e| StoreError::Archive(format!("{:#}", e)))?;

        let mut file = File::open(archive.path())
            .await
            .map_err(|e| StoreError::io("open", archive.path(), e))?;
        let size = file
            .metadata()
            .await
            .map_err(|e| StoreError::io("stat", archive.path(), e))?
            .len();

        session
            .reply(&Response::data(format!("{}.tar", self.extension)))
            .await?;
        session.send_size(size).await?;
        let t = session.send_body(&mut file, size, NODE_CHUNK_SIZE).await;
        tracing::info!("streamed {} byte archive", t.sent);
        t.check()
    }
}

#[async_trait]
impl Handler for NodeServer {
    fn role(&self) -> NodeId {
        self.node
    }

    fn persistent(&self) -> bool {
        false
    }

    async fn handle(&self, line: &str, session: &mut Session<TcpStream>) -> Result<()> {
        match line.parse::<NodeCommand>()? {
            NodeCommand::Store { name, dir } => self.store(session, &name, &dir).await,
            NodeCommand::Get { path } => self.get(session, &path).await,
            NodeCommand::Remove { path } => {
                let message = self.remove(&path).await?;
                session.reply(&Response::ok(message)).await
            }
            NodeCommand::List { dir } => {
                let dir = self.local_path(&dir)?;
                let names = list_dir(&dir, &self.extension).await?;
                session.reply(&Response::ok(join_names(&names))).await
            }
            NodeCommand::Archive => self.archive(session).await,
        }
    }
}
