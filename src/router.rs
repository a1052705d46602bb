//! Extension-based routing and cross-node path rewriting.
//!
//! Pure functions: no I/O, no failure other than an unroutable extension.

use std::ffi::OsString;
use std::fmt;
use std::net::SocketAddr;
use std::path::{Component, Path, PathBuf};

use crate::config::ClusterConfig;
use crate::error::{Result, StoreError};
use crate::path::extension_of;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, clap::ValueEnum)]
pub enum NodeId {
    /// Front-door node
    Main,
    Text,
    Pdf,
}

impl NodeId {
    pub fn as_str(&self) -> &'static str {
        match self {
            NodeId::Main => "smain",
            NodeId::Text => "stext",
            NodeId::Pdf => "spdf",
        }
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where a file with a given extension lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Placement {
    Local,
    Remote { node: NodeId, addr: SocketAddr },
}

#[derive(Debug, Clone)]
struct Route {
    node: NodeId,
    extension: String,
    segment: OsString,
    addr: SocketAddr,
}

#[derive(Debug, Clone)]
pub struct Router {
    routes: Vec<Route>,
}

impl Router {
    /// Specialized nodes in the order their listings are aggregated.
    pub const REMOTE_NODES: [NodeId; 2] = [NodeId::Pdf, NodeId::Text];

    pub fn from_config(config: &ClusterConfig) -> Result<Self> {
        let mut routes = Vec::with_capacity(3);
        for node in [NodeId::Main, NodeId::Pdf, NodeId::Text] {
            let nc = config.node(node);
            let segment = nc.segment().ok_or_else(|| {
                StoreError::Config(format!("Root {:?} has no final path component", nc.root))
            })?;
            routes.push(Route {
                node,
                extension: nc.extension.clone(),
                segment: OsString::from(segment),
                addr: nc.addr,
            });
        }
        Ok(Self { routes })
    }

    fn route(&self, node: NodeId) -> &Route {
        // from_config inserts every NodeId
        self.routes
            .iter()
            .find(|r| r.node == node)
            .unwrap_or(&self.routes[0])
    }

    /// Node owning `extension` (with or without the leading dot).
    pub fn node_for(&self, extension: &str) -> Result<NodeId> {
        let ext = extension.trim().trim_start_matches('.');
        self.routes
            .iter()
            .find(|r| r.extension == ext)
            .map(|r| r.node)
            .ok_or_else(|| StoreError::UnsupportedExtension(extension.trim().to_string()))
    }

    pub fn placement(&self, extension: &str) -> Result<Placement> {
        Ok(match self.node_for(extension)? {
            NodeId::Main => Placement::Local,
            node => Placement::Remote {
                node,
                addr: self.route(node).addr,
            },
        })
    }

    /// Node owning the file named by the final component of `path`.
    pub fn node_for_path(&self, path: &str) -> Result<NodeId> {
        match extension_of(path) {
            Some(ext) => self.node_for(ext),
            None => Err(StoreError::UnsupportedExtension(format!(
                "{} has no extension",
                path
            ))),
        }
    }

    pub fn extension(&self, node: NodeId) -> &str {
        &self.route(node).extension
    }

    pub fn addr(&self, node: NodeId) -> SocketAddr {
        self.route(node).addr
    }

    /// Replace the first component equal to the front-door segment with the
    /// segment of `node`. Paths without that component come back unchanged.
    pub fn rewrite(&self, path: &Path, node: NodeId) -> PathBuf {
        let from = &self.route(NodeId::Main).segment;
        let to = &self.route(node).segment;
        if from == to {
            return path.to_path_buf();
        }

        let mut replaced = false;
        let mut out = PathBuf::new();
        for component in path.components() {
            match component {
                Component::Normal(c) if !replaced && c == from.as_os_str() => {
                    out.push(to);
                    replaced = true;
                }
                c => out.push(c.as_os_str()),
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn router() -> Router {
        Router::from_config(&ClusterConfig::default()).unwrap()
    }

    #[test]
    fn test_node_for_extension() {
        let r = router();
        assert_eq!(r.node_for("c").unwrap(), NodeId::Main);
        assert_eq!(r.node_for(".pdf").unwrap(), NodeId::Pdf);
        assert_eq!(r.node_for("txt").unwrap(), NodeId::Text);
        assert!(matches!(
            r.node_for("md"),
            Err(StoreError::UnsupportedExtension(_))
        ));
        assert!(r.node_for("PDF").is_err());
    }

    #[test]
    fn test_placement() {
        let r = router();
        assert_eq!(r.placement("c").unwrap(), Placement::Local);
        assert_eq!(
            r.placement("txt").unwrap(),
            Placement::Remote {
                node: NodeId::Text,
                addr: "127.0.0.1:4532".parse().unwrap()
            }
        );
    }

    #[test]
    fn test_node_for_path_requires_extension() {
        let r = router();
        assert_eq!(r.node_for_path("~/smain/a/b.pdf").unwrap(), NodeId::Pdf);
        assert!(r.node_for_path("~/smain/a/Makefile").is_err());
    }

    #[test]
    fn test_rewrite_replaces_root_segment_only() {
        let r = router();
        assert_eq!(
            r.rewrite(Path::new("/home/u/smain/docs/a.pdf"), NodeId::Pdf),
            PathBuf::from("/home/u/spdf/docs/a.pdf")
        );
        assert_eq!(
            r.rewrite(Path::new("/home/u/smain/docs/a.txt"), NodeId::Text),
            PathBuf::from("/home/u/stext/docs/a.txt")
        );
        // Only whole components match, and only the first one.
        assert_eq!(
            r.rewrite(Path::new("/home/u/smain/smainfiles/smain/x.pdf"), NodeId::Pdf),
            PathBuf::from("/home/u/spdf/smainfiles/smain/x.pdf")
        );
    }

    #[test]
    fn test_rewrite_without_segment_is_noop() {
        let r = router();
        let p = Path::new("/srv/elsewhere/a.pdf");
        assert_eq!(r.rewrite(p, NodeId::Pdf), p);
        assert_eq!(r.rewrite(Path::new("/home/u/smain/a.c"), NodeId::Main), Path::new("/home/u/smain/a.c"));
    }

    proptest! {
        #[test]
        fn prop_rewrite_changes_only_the_segment(
            prefix in proptest::collection::vec("[a-z]{1,8}", 0..4),
            suffix in proptest::collection::vec("[a-z]{1,8}", 0..4),
            name in "[a-z]{1,8}\\.pdf",
        ) {
            let r = router();
            let mut input = PathBuf::from("/");
            prefix.iter().for_each(|c| input.push(c));
            input.push("smain");
            suffix.iter().for_each(|c| input.push(c));
            input.push(&name);

            let out = r.rewrite(&input, NodeId::Pdf);
            let a: Vec<_> = input.components().collect();
            let b: Vec<_> = out.components().collect();
            prop_assert_eq!(a.len(), b.len());

            let diffs: Vec<_> = a.iter().zip(&b).filter(|(x, y)| x != y).collect();
            prop_assert!(diffs.len() <= 1);
            if let Some((from, to)) = diffs.first() {
                prop_assert_eq!(from.as_os_str(), "smain");
                prop_assert_eq!(to.as_os_str(), "spdf");
            }
            // Pure: same input, same answer.
            prop_assert_eq!(out, r.rewrite(&input, NodeId::Pdf));
            prop_assert_eq!(r.node_for_path(&name).unwrap(), NodeId::Pdf);
        }
    }
}
