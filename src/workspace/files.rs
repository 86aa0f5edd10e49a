use serde::Serialize;
use std::io;
use std::sync::Arc;
use thiserror::Error;
use tokio::fs::{self, OpenOptions};
use tokio::io::AsyncWriteExt;
use tracing::{info, warn};

use crate::security::{PathError, PathResolver, ResolvedPath};

const BACKUP_SUFFIX: &str = ".backup";

#[derive(Debug, Error)]
pub enum WriteError {
    #[error("Target is a directory: {0}")]
    IsDirectory(String),

    #[error(transparent)]
    Path(#[from] PathError),

    #[error("Failed to write {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: io::Error,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum WriteMode {
    Write,
    Append,
}

#[derive(Debug, Clone, Serialize)]
pub struct WriteOutcome {
    pub file: String,
    pub mode: WriteMode,
    pub backup: Option<String>,
    pub bytes_written: usize,
}

/// Writes text into the workspace with an optional sibling backup
#[derive(Debug, Clone)]
pub struct FileWriter {
    resolver: Arc<PathResolver>,
}

impl FileWriter {
    pub fn new(resolver: Arc<PathResolver>) -> Self {
        Self { resolver }
    }

    /// Write or append `text` to `file`. With `backup`, an existing file is
    /// first copied to `<file>.backup` and restored from it if the write
    /// fails.
    pub async fn write(&self, file: &str, text: &str, append: bool, backup: bool) -> Result<WriteOutcome, WriteError> {
        let target = self.resolver.resolve_writable(file)?;
        if target.is_dir() {
            return Err(WriteError::IsDirectory(target.workspace_relative_path));
        }

        let backup_path = if backup && target.exists() {
            Some(self.make_backup(&target).await?)
        } else {
            None
        };

        let mode = if append { WriteMode::Append } else { WriteMode::Write };
        if let Err(source) = write_text(&target, text, mode).await {
            if let Some(saved) = &backup_path {
                if let Err(e) = fs::copy(&saved.canonical_absolute_path, &target.canonical_absolute_path).await {
                    warn!(file = %target.workspace_relative_path, error = %e, "failed to restore backup");
                }
            }
            return Err(WriteError::Io {
                path: target.workspace_relative_path,
                source,
            });
        }

        info!(file = %target.workspace_relative_path, mode = ?mode, bytes = text.len(), "file written");
        Ok(WriteOutcome {
            file: target.workspace_relative_path,
            mode,
            backup: backup_path.map(|b| b.workspace_relative_path),
            bytes_written: text.len(),
        })
    }

    async fn make_backup(&self, target: &ResolvedPath) -> Result<ResolvedPath, WriteError> {
        let name = format!("{}{}", target.workspace_relative_path, BACKUP_SUFFIX);
        let backup = self.resolver.resolve_writable(&name)?;

        fs::copy(&target.canonical_absolute_path, &backup.canonical_absolute_path)
            .await
            .map_err(|source| WriteError::Io {
                path: backup.workspace_relative_path.clone(),
                source,
            })?;
        Ok(backup)
    }
}

async fn write_text(target: &ResolvedPath, text: &str, mode: WriteMode) -> io::Result<()> {
    let path = &target.canonical_absolute_path;
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).await?;
    }

    match mode {
        WriteMode::Write => fs::write(path, text.as_bytes()).await,
        WriteMode::Append => {
            let mut file = OpenOptions::new().create(true).append(true).open(path).await?;
            file.write_all(text.as_bytes()).await?;
            file.flush().await
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn writer() -> (TempDir, FileWriter) {
        let temp = TempDir::new().unwrap();
        let resolver = Arc::new(PathResolver::new(temp.path()).unwrap());
        (temp, FileWriter::new(resolver))
    }

    #[tokio::test]
    async fn test_write_new_file_creates_parents() {
        let (temp, writer) = writer();
        let outcome = writer.write("docs/notes/todo.md", "hello", false, true).await.unwrap();

        assert_eq!(outcome.file, "docs/notes/todo.md");
        assert_eq!(outcome.mode, WriteMode::Write);
        assert_eq!(outcome.backup, None);
        assert_eq!(outcome.bytes_written, 5);
        assert_eq!(std::fs::read_to_string(temp.path().join("docs/notes/todo.md")).unwrap(), "hello");
    }

    #[tokio::test]
    async fn test_overwrite_keeps_backup() {
        let (temp, writer) = writer();
        std::fs::write(temp.path().join("a.txt"), "old").unwrap();

        let outcome = writer.write("a.txt", "new", false, true).await.unwrap();
        assert_eq!(outcome.backup.as_deref(), Some("a.txt.backup"));
        assert_eq!(std::fs::read_to_string(temp.path().join("a.txt")).unwrap(), "new");
        assert_eq!(std::fs::read_to_string(temp.path().join("a.txt.backup")).unwrap(), "old");
    }

    #[tokio::test]
    async fn test_append() {
        let (temp, writer) = writer();
        std::fs::write(temp.path().join("log.txt"), "one\n").unwrap();

        let outcome = writer.write("log.txt", "two\n", true, false).await.unwrap();
        assert_eq!(outcome.mode, WriteMode::Append);
        assert_eq!(outcome.backup, None);
        assert_eq!(std::fs::read_to_string(temp.path().join("log.txt")).unwrap(), "one\ntwo\n");
    }

    #[tokio::test]
    async fn test_bytes_written_counts_utf8() {
        let (_temp, writer) = writer();
        let outcome = writer.write("u.txt", "héllo", false, false).await.unwrap();
        assert_eq!(outcome.bytes_written, 6);
    }

    #[tokio::test]
    async fn test_escape_leaves_filesystem_untouched() {
        let (temp, writer) = writer();
        let err = writer.write("../../../etc/passwd", "pwned", false, true).await.unwrap_err();

        assert!(matches!(err, WriteError::Path(ref e) if e.is_security_violation()));
        assert_eq!(std::fs::read_dir(temp.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn test_protected_target_rejected() {
        let (temp, writer) = writer();
        let err = writer.write(".env", "SECRET=1", false, false).await.unwrap_err();
        assert!(matches!(err, WriteError::Path(PathError::Protected { .. })));
        assert!(!temp.path().join(".env").exists());
    }

    #[tokio::test]
    async fn test_directory_target_rejected() {
        let (temp, writer) = writer();
        std::fs::create_dir(temp.path().join("src")).unwrap();
        assert!(matches!(
            writer.write("src", "x", false, false).await,
            Err(WriteError::IsDirectory(_))
        ));
    }
}
