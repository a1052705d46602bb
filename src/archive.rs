//! Archive bundling.
//!
//! The store never builds archives itself; it hands a directory and an
//! extension filter to a [`Bundler`] and streams whatever file comes back.

use anyhow::{Context, Result};
use async_trait::async_trait;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::process::Command;

use crate::path::extension_of;

#[async_trait]
pub trait Bundler: Send + Sync {
    /// Bundle every regular file under `root` with `extension` into `dest`.
    async fn bundle(&self, root: &Path, extension: &str, dest: &Path) -> Result<()>;
}

/// Runs the system `tar` binary.
#[derive(Debug, Clone)]
pub struct TarBundler {
    program: PathBuf,
}

impl Default for TarBundler {
    fn default() -> Self {
        Self {
            program: PathBuf::from("tar"),
        }
    }
}

impl TarBundler {
    pub fn with_program(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }
}

#[async_trait]
impl Bundler for TarBundler {
    async fn bundle(&self, root: &Path, extension: &str, dest: &Path) -> Result<()> {
        let root_buf = root.to_path_buf();
        let ext = extension.to_string();
        let files = tokio::task::spawn_blocking(move || collect_files(&root_buf, &ext))
            .await
            .context("File scan task panicked")??;

        // tar reads the member list from a file so long lists never hit ARG_MAX
        let mut list = tempfile::NamedTempFile::new().context("Failed to create file list")?;
        for f in &files {
            writeln!(list, "{}", f.display()).context("Failed to write file list")?;
        }
        list.flush()?;

        let output = Command::new(&self.program)
            .arg("-cf")
            .arg(dest)
            .arg("-C")
            .arg(root)
            .arg("-T")
            .arg(list.path())
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .output()
            .await
            .with_context(|| format!("Failed to spawn {}", self.program.display()))?;

        if !output.status.success() {
            anyhow::bail!(
                "{} exited with {}: {}",
                self.program.display(),
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            );
        }

        tracing::debug!(
            "Bundled {} .{} files from {} into {}",
            files.len(),
            extension,
            root.display(),
            dest.display()
        );
        Ok(())
    }
}

/// Relative paths of regular files under `root` carrying `extension`,
/// hidden files included, sorted.
pub fn collect_files(root: &Path, extension: &str) -> Result<Vec<PathBuf>> {
    if !root.is_dir() {
        return Ok(Vec::new());
    }

    let walker = ignore::WalkBuilder::new(root)
        .hidden(false)
        .ignore(false)
        .git_ignore(false)
        .git_global(false)
        .git_exclude(false)
        .parents(false)
        .follow_links(false)
        .build();

    let mut files = Vec::new();
    for entry in walker {
        let entry = entry.with_context(|| format!("Failed to scan {}", root.display()))?;
        if !entry.file_type().map(|t| t.is_file()).unwrap_or(false) {
            continue;
        }
        let matches = entry
            .file_name()
            .to_str()
            .and_then(extension_of)
            .map(|e| e == extension)
            .unwrap_or(false);
        if !matches {
            continue;
        }
        if let Ok(rel) = entry.path().strip_prefix(root) {
            files.push(rel.to_path_buf());
        }
    }
    files.sort();
    Ok(files)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn test_collect_files_filters_by_extension() {
        let temp = tempfile::tempdir().unwrap();
        let root = temp.path();
        fs::create_dir_all(root.join("a/b")).unwrap();
        fs::write(root.join("top.pdf"), "1").unwrap();
        fs::write(root.join("a/b/deep.pdf"), "2").unwrap();
        fs::write(root.join("a/.hidden.pdf"), "3").unwrap();
        fs::write(root.join("a/notes.txt"), "4").unwrap();
        fs::write(root.join("a/pdf"), "5").unwrap();
        // ignore files must not hide anything
        fs::write(root.join(".ignore"), "*.pdf\n").unwrap();

        let files = collect_files(root, "pdf").unwrap();
        assert_eq!(
            files,
            vec![
                PathBuf::from("a/.hidden.pdf"),
                PathBuf::from("a/b/deep.pdf"),
                PathBuf::from("top.pdf"),
            ]
        );
    }

    #[test]
    fn test_collect_files_missing_root_is_empty() {
        let temp = tempfile::tempdir().unwrap();
        assert!(collect_files(&temp.path().join("nope"), "c").unwrap().is_empty());
    }

    fn tar_available() -> bool {
        std::process::Command::new("tar")
            .arg("--version")
            .output()
            .map(|o| o.status.success())
            .unwrap_or(false)
    }

    #[tokio::test]
    async fn test_tar_bundler_creates_archive() {
        if !tar_available() {
            eprintln!("Skipping test: tar not found on PATH");
            return;
        }
        let temp = tempfile::tempdir().unwrap();
        let root = temp.path().join("spdf");
        fs::create_dir_all(root.join("docs")).unwrap();
        fs::write(root.join("docs/r.pdf"), "pdf body").unwrap();
        fs::write(root.join("docs/skip.txt"), "text").unwrap();

        let dest = temp.path().join("pdf.tar");
        TarBundler::default()
            .bundle(&root, "pdf", &dest)
            .await
            .unwrap();

        let listing = std::process::Command::new("tar")
            .arg("-tf")
            .arg(&dest)
            .output()
            .unwrap();
        let names = String::from_utf8_lossy(&listing.stdout);
        assert!(names.contains("docs/r.pdf"));
        assert!(!names.contains("skip.txt"));
    }

    #[tokio::test]
    async fn test_tar_bundler_reports_failure() {
        let temp = tempfile::tempdir().unwrap();
        let bundler = TarBundler::with_program(temp.path().join("no-such-tar"));
        let err = bundler
            .bundle(temp.path(), "c", &temp.path().join("c.tar"))
            .await
            .unwrap_err();
        assert!(format!("{:#}", err).contains("Failed to spawn"));
    }
}
