//! Logical path handling.
//!
//! Clients name files with paths under the front-door root, usually written
//! with the home shorthand (`~/smain/docs/a.c`). Everything is resolved to an
//! absolute path before any I/O.

use std::path::{Component, Path, PathBuf};

use crate::error::{Result, StoreError};

/// Expands `~` against a fixed home directory.
#[derive(Debug, Clone)]
pub struct PathResolver {
    home: PathBuf,
}

impl PathResolver {
    pub fn new(home: impl Into<PathBuf>) -> Self {
        Self { home: home.into() }
    }

    /// Resolver for the current user's home directory.
    pub fn from_env() -> Result<Self> {
        dirs::home_dir()
            .map(Self::new)
            .ok_or_else(|| StoreError::path("~", "Unable to determine home directory"))
    }

    pub fn home(&self) -> &Path {
        &self.home
    }

    /// Expand tilde (~) and check the result is absolute and free of `..`.
    pub fn resolve(&self, logical: &str) -> Result<PathBuf> {
        let logical = logical.trim();
        if logical.is_empty() {
            return Err(StoreError::path(logical, "Empty path"));
        }

        let expanded = if logical == "~" {
            self.home.clone()
        } else if let Some(rest) = logical.strip_prefix("~/") {
            self.home.join(rest)
        } else if logical.starts_with('~') {
            return Err(StoreError::path(logical, "Unable to expand home directory"));
        } else {
            PathBuf::from(logical)
        };

        if !expanded.is_absolute() {
            return Err(StoreError::path(logical, "Path is not absolute"));
        }
        if expanded
            .components()
            .any(|c| matches!(c, Component::ParentDir))
        {
            return Err(StoreError::path(logical, "Path traversal not allowed"));
        }

        Ok(expanded)
    }

    /// Resolve a directory and create it along with every missing ancestor.
    pub async fn resolve_dir_creating(&self, logical: &str) -> Result<PathBuf> {
        let dir = self.resolve(logical)?;
        ensure_dir(&dir).await?;
        Ok(dir)
    }
}

/// `mkdir -p`: a no-op when the directory already exists.
pub async fn ensure_dir(dir: &Path) -> Result<()> {
    tokio::fs::create_dir_all(dir)
        .await
        .map_err(|e| StoreError::path(dir, format!("Unable to create directory: {}", e)))
}

/// Suffix after the last `.` of the final component.
///
/// `None` for names without a dot, with a trailing dot, or dot-files such as
/// `.bashrc`.
pub fn extension_of(name: &str) -> Option<&str> {
    let file = name.rsplit('/').next().unwrap_or(name);
    let dot = file.rfind('.')?;
    if dot == 0 || dot + 1 == file.len() {
        return None;
    }
    Some(&file[dot + 1..])
}

/// Check that `path` lies inside `root`.
pub fn ensure_within(root: &Path, path: &Path) -> Result<()> {
    let inside = path.starts_with(root)
        && !path
            .components()
            .any(|c| matches!(c, Component::ParentDir));
    if inside {
        Ok(())
    } else {
        Err(StoreError::path(
            path,
            format!("Path is outside {}", root.display()),
        ))
    }
}

/// A single file name: no separators, not `.` or `..`.
pub fn is_plain_file_name(name: &str) -> bool {
    !name.is_empty() && name != "." && name != ".." && !name.contains('/')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_expands_home() {
        let r = PathResolver::new("/home/alice");
        assert_eq!(
            r.resolve("~/smain/docs").unwrap(),
            PathBuf::from("/home/alice/smain/docs")
        );
        assert_eq!(r.resolve("~").unwrap(), PathBuf::from("/home/alice"));
        assert_eq!(
            r.resolve("/srv/smain/a.c").unwrap(),
            PathBuf::from("/srv/smain/a.c")
        );
    }

    #[test]
    fn test_resolve_rejects_bad_paths() {
        let r = PathResolver::new("/home/alice");
        assert!(r.resolve("").is_err());
        assert!(r.resolve("smain/a.c").is_err());
        assert!(r.resolve("~bob/smain").is_err());
        assert!(r.resolve("~/smain/../etc/passwd").is_err());
    }

    #[tokio::test]
    async fn test_resolve_dir_creating_is_idempotent() {
        let temp = tempfile::tempdir().unwrap();
        let r = PathResolver::new(temp.path());

        let first = r.resolve_dir_creating("~/smain/a/b/c").await.unwrap();
        assert!(first.is_dir());
        let second = r.resolve_dir_creating("~/smain/a/b/c").await.unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_extension_of() {
        assert_eq!(extension_of("report.pdf"), Some("pdf"));
        assert_eq!(extension_of("~/smain/x/archive.tar.c"), Some("c"));
        assert_eq!(extension_of("~/smain/dir.d/README"), None);
        assert_eq!(extension_of("Makefile"), None);
        assert_eq!(extension_of("trailing."), None);
        assert_eq!(extension_of(".bashrc"), None);
    }

    #[test]
    fn test_ensure_within() {
        let root = Path::new("/home/alice/spdf");
        assert!(ensure_within(root, Path::new("/home/alice/spdf/a/b.pdf")).is_ok());
        assert!(ensure_within(root, Path::new("/home/alice/spdfx/b.pdf")).is_err());
        assert!(ensure_within(root, Path::new("/home/alice/spdf/../smain/b.pdf")).is_err());
        assert!(ensure_within(root, Path::new("/etc/passwd")).is_err());
    }

    #[test]
    fn test_plain_file_name() {
        assert!(is_plain_file_name("a.c"));
        assert!(is_plain_file_name("with space.txt"));
        assert!(!is_plain_file_name("../a.c"));
        assert!(!is_plain_file_name(".."));
        assert!(!is_plain_file_name(""));
    }
}
