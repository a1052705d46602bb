//! Client side of the front-door protocol.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use tokio::fs::File;
use tokio::net::TcpStream;

use crate::error::{Result, StoreError};
use crate::path::is_plain_file_name;
use crate::protocol::{FrontCommand, Response, Session, Status, CLIENT_CHUNK_SIZE};
use crate::router::Router;

/// What a `dtar` request produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ArchiveOutcome {
    /// The archive was streamed back and saved here
    Saved(PathBuf),
    /// The front-door kept the archive on its own disk
    Kept(String),
}

/// One front-door connection, reused across commands.
pub struct Client {
    session: Session<TcpStream>,
}

impl Client {
    pub async fn connect(addr: SocketAddr) -> Result<Self> {
        let session = Session::connect(addr)
            .await
            .map_err(StoreError::Transport)?;
        Ok(Self { session })
    }

    /// Upload `local` into the remote directory `dir`.
    pub async fn upload(&mut self, local: &Path, dir: &str) -> Result<String> {
        let name = local
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| StoreError::path(local, "Path has no file name"))?;
        let mut file = File::open(local)
            .await
            .map_err(|e| StoreError::io("open", local, e))?;
        let size = file
            .metadata()
            .await
            .map_err(|e| StoreError::io("stat", local, e))?
            .len();

        let command = FrontCommand::Upload {
            name: name.to_string(),
            dir: dir.to_string(),
        };
        self.session.send_command(&command.to_line()).await?;
        self.session.read_reply().await?.into_result()?;

        self.session.send_size(size).await?;
        self.session.expect_ack().await?;
        self.session
            .send_body(&mut file, size, CLIENT_CHUNK_SIZE)
            .await
            .check()?;

        Ok(self.session.read_reply().await?.into_result()?.text())
    }

    /// Download `path` into `out_dir`, returning the saved file.
    pub async fn download(&mut self, path: &str, out_dir: &Path) -> Result<PathBuf> {
        let command = FrontCommand::Download {
            path: path.to_string(),
        };
        self.session.send_command(&command.to_line()).await?;
        let reply = self.session.read_reply().await?.into_result()?;
        if reply.status != Status::Data {
            return Err(StoreError::Protocol(format!(
                "Expected a file, got {}",
                reply
            )));
        }
        self.receive_file(&reply, out_dir).await
    }

    pub async fn remove(&mut self, path: &str) -> Result<String> {
        let command = FrontCommand::Remove {
            path: path.to_string(),
        };
        self.simple(&command).await.map(|r| r.text())
    }

    /// Aggregated listing: local names first, then each node's.
    pub async fn display(&mut self, dir: &str) -> Result<Vec<String>> {
        let command = FrontCommand::Display {
            dir: dir.to_string(),
        };
        let reply = self.simple(&command).await?;
        Ok(reply
            .text()
            .lines()
            .filter(|l| !l.is_empty())
            .map(str::to_string)
            .collect())
    }

    pub async fn archive(&mut self, extension: &str, out_dir: &Path) -> Result<ArchiveOutcome> {
        let command = FrontCommand::Archive {
            extension: extension.to_string(),
        };
        self.session.send_command(&command.to_line()).await?;
        let reply = self.session.read_reply().await?.into_result()?;
        match reply.status {
            Status::Data => Ok(ArchiveOutcome::Saved(
                self.receive_file(&reply, out_dir).await?,
            )),
            _ => Ok(ArchiveOutcome::Kept(reply.text())),
        }
    }

    async fn simple(&mut self, command: &FrontCommand) -> Result<Response> {
        self.session.send_command(&command.to_line()).await?;
        self.session.read_reply().await?.into_result()
    }

    /// Body announced by `announce`, then the trailing confirmation.
    async fn receive_file(&mut self, announce: &Response, out_dir: &Path) -> Result<PathBuf> {
        let name = announce.text();
        if !is_plain_file_name(&name) {
            return Err(StoreError::Protocol(format!(
                "Refusing file name {:?}",
                name
            )));
        }
        let size = self.session.read_size().await?;

        let dest = out_dir.join(&name);
        let mut file = File::create(&dest)
            .await
            .map_err(|e| StoreError::io("create", &dest, e))?;
        let t = self.session.recv_body(&mut file, size, CLIENT_CHUNK_SIZE).await;
        drop(file);

        let outcome = match t.check() {
            Ok(()) => self
                .session
                .read_reply()
                .await
                .and_then(Response::into_result),
            Err(e) => Err(e),
        };
        if let Err(e) = outcome {
            let _ = tokio::fs::remove_file(&dest).await;
            return Err(e);
        }
        Ok(dest)
    }
}

/// Checks run before a command is sent: remote paths must sit under
/// `prefix` (the front-door root as clients write it, e.g. `~/smain`) and
/// name a routable extension.
pub fn validate(command: &FrontCommand, router: &Router, prefix: &str) -> Result<()> {
    let under_prefix = |verb: &'static str, path: &str| {
        let path = path.trim_end_matches('/');
        let ok = path == prefix
            || path
                .strip_prefix(prefix)
                .map_or(false, |rest| rest.starts_with('/'));
        if ok {
            Ok(())
        } else {
            Err(StoreError::Usage {
                verb,
                reason: format!("path must start with {}", prefix),
            })
        }
    };

    match command {
        FrontCommand::Upload { name, dir } => {
            router.node_for_path(name)?;
            under_prefix("ufile", dir)
        }
        FrontCommand::Download { path } => {
            router.node_for_path(path)?;
            under_prefix("dfile", path)
        }
        FrontCommand::Remove { path } => {
            router.node_for_path(path)?;
            under_prefix("rmfile", path)
        }
        FrontCommand::Display { dir } => under_prefix("display", dir),
        FrontCommand::Archive { extension } => router.node_for(extension).map(|_| ()),
    }
}

/// The file named in `ufile` must exist locally.
pub fn validate_local_file(path: &Path) -> Result<()> {
    let meta = std::fs::metadata(path).map_err(|e| StoreError::io("stat", path, e))?;
    if meta.is_file() {
        Ok(())
    } else {
        Err(StoreError::path(path, "Not a regular file"))
    }
}
