//! Cluster configuration: addresses, roots and extensions of the three nodes.
//!
//! Merge order: built-in defaults, then the TOML file, then environment
//! variables (`SPLITSTORE_HOME`, `SPLITSTORE_MAIN_ADDR`, `SPLITSTORE_TEXT_ADDR`,
//! `SPLITSTORE_PDF_ADDR`). CLI flags are applied last by the binary.

use serde::Deserialize;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use crate::error::{Result, StoreError};
use crate::path::PathResolver;
use crate::router::NodeId;

/// One node's identity on the network and on disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeConfig {
    pub addr: SocketAddr,
    /// Logical root, e.g. `~/spdf`. Its last component is the node's
    /// root-distinguishing segment.
    pub root: String,
    /// Extension owned by the node, without the dot.
    pub extension: String,
}

impl NodeConfig {
    fn new(port: u16, root: &str, extension: &str) -> Self {
        Self {
            addr: SocketAddr::from(([127, 0, 0, 1], port)),
            root: root.to_string(),
            extension: extension.to_string(),
        }
    }

    /// Last component of the root.
    pub fn segment(&self) -> Option<&str> {
        Path::new(self.root.trim_end_matches('/'))
            .file_name()
            .and_then(|s| s.to_str())
    }
}

#[derive(Debug, Clone)]
pub struct ClusterConfig {
    /// Home directory used to expand `~`; defaults to the user's home.
    pub home: Option<PathBuf>,
    /// Where the front-door writes archives of its own extension.
    /// Defaults to the front-door root.
    pub archive_dir: Option<String>,
    pub main: NodeConfig,
    pub text: NodeConfig,
    pub pdf: NodeConfig,
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            home: None,
            archive_dir: None,
            main: NodeConfig::new(4530, "~/smain", "c"),
            text: NodeConfig::new(4532, "~/stext", "txt"),
            pdf: NodeConfig::new(4533, "~/spdf", "pdf"),
        }
    }
}

/// On-disk shape: every field optional, merged over the defaults.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct ConfigFile {
    home: Option<PathBuf>,
    archive_dir: Option<String>,
    main: Option<NodeFile>,
    text: Option<NodeFile>,
    pdf: Option<NodeFile>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct NodeFile {
    addr: Option<SocketAddr>,
    root: Option<String>,
    extension: Option<String>,
}

impl NodeFile {
    fn merge_into(self, node: &mut NodeConfig) {
        if let Some(addr) = self.addr {
            node.addr = addr;
        }
        if let Some(root) = self.root {
            node.root = root;
        }
        if let Some(ext) = self.extension {
            node.extension = ext.trim_start_matches('.').to_string();
        }
    }
}

impl ClusterConfig {
    /// Load configuration. An explicit `path` must exist; the default
    /// location is optional.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = Self::default();

        let file = match path {
            Some(p) => Some(std::fs::read_to_string(p).map_err(|e| {
                StoreError::Config(format!("Cannot read {}: {}", p.display(), e))
            })?),
            None => default_config_path()
                .filter(|p| p.exists())
                .and_then(|p| std::fs::read_to_string(p).ok()),
        };
        if let Some(text) = file {
            config.merge_toml(&text)?;
        }

        config.apply_env();
        config.validate()?;
        Ok(config)
    }

    pub fn merge_toml(&mut self, text: &str) -> Result<()> {
        let file: ConfigFile = toml::from_str(text)?;
        if file.home.is_some() {
            self.home = file.home;
        }
        if file.archive_dir.is_some() {
            self.archive_dir = file.archive_dir;
        }
        if let Some(n) = file.main {
            n.merge_into(&mut self.main);
        }
        if let Some(n) = file.text {
            n.merge_into(&mut self.text);
        }
        if let Some(n) = file.pdf {
            n.merge_into(&mut self.pdf);
        }
        Ok(())
    }

    pub fn apply_env(&mut self) {
        if let Ok(home) = std::env::var("SPLITSTORE_HOME") {
            self.home = Some(PathBuf::from(home));
        }
        for (var, id) in [
            ("SPLITSTORE_MAIN_ADDR", NodeId::Main),
            ("SPLITSTORE_TEXT_ADDR", NodeId::Text),
            ("SPLITSTORE_PDF_ADDR", NodeId::Pdf),
        ] {
            if let Ok(s) = std::env::var(var) {
                match s.parse::<SocketAddr>() {
                    Ok(addr) => self.node_mut(id).addr = addr,
                    Err(_) => tracing::warn!("Ignoring {}={}: not a socket address", var, s),
                }
            }
        }
    }

    pub fn validate(&self) -> Result<()> {
        let nodes = [&self.main, &self.text, &self.pdf];
        for node in nodes {
            if node.extension.is_empty() || node.extension.contains('.') {
                return Err(StoreError::Config(format!(
                    "Invalid extension {:?} for root {}",
                    node.extension, node.root
                )));
            }
            if node.segment().is_none() {
                return Err(StoreError::Config(format!(
                    "Root {:?} has no final path component",
                    node.root
                )));
            }
        }
        for (i, a) in nodes.iter().enumerate() {
            for b in &nodes[i + 1..] {
                if a.extension == b.extension {
                    return Err(StoreError::Config(format!(
                        "Extension {} is assigned to two nodes",
                        a.extension
                    )));
                }
                if a.segment() == b.segment() {
                    return Err(StoreError::Config(format!(
                        "Roots {} and {} share the segment {:?}",
                        a.root,
                        b.root,
                        a.segment().unwrap_or_default()
                    )));
                }
            }
        }
        Ok(())
    }

    pub fn node(&self, id: NodeId) -> &NodeConfig {
        match id {
            NodeId::Main => &self.main,
            NodeId::Text => &self.text,
            NodeId::Pdf => &self.pdf,
        }
    }

    pub fn node_mut(&mut self, id: NodeId) -> &mut NodeConfig {
        match id {
            NodeId::Main => &mut self.main,
            NodeId::Text => &mut self.text,
            NodeId::Pdf => &mut self.pdf,
        }
    }

    pub fn resolver(&self) -> Result<PathResolver> {
        match &self.home {
            Some(home) => Ok(PathResolver::new(home)),
            None => PathResolver::from_env(),
        }
    }

    /// Absolute root directory of a node.
    pub fn root_path(&self, id: NodeId) -> Result<PathBuf> {
        self.resolver()?.resolve(&self.node(id).root)
    }
}

/// `$XDG_CONFIG_HOME/splitstore/config.toml` (or the platform equivalent).
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("splitstore").join("config.toml"))
}
