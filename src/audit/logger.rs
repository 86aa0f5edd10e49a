use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::io;
use std::path::{Path, PathBuf};
use tokio::fs::{self, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use uuid::Uuid;

/// Upper bound for the `input` field
pub const MAX_INPUT_CHARS: usize = 4096;

/// Upper bound for the `detail` field
pub const MAX_DETAIL_CHARS: usize = 2000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuditStatus {
    Success,
    Blocked,
    Timeout,
    Error,
}

impl fmt::Display for AuditStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            AuditStatus::Success => "SUCCESS",
            AuditStatus::Blocked => "BLOCKED",
            AuditStatus::Timeout => "TIMEOUT",
            AuditStatus::Error => "ERROR",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditAction {
    OpenFile,
    WriteFile,
    ApplyDiff,
    Exec,
}

/// One line of the audit log
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditRecord {
    pub timestamp: DateTime<Utc>,
    pub correlation_id: Uuid,
    pub actor: String,
    pub action: AuditAction,
    pub input: String,
    pub status: AuditStatus,
    pub detail: String,
}

impl AuditRecord {
    pub fn new(
        correlation_id: Uuid,
        actor: impl Into<String>,
        action: AuditAction,
        input: &str,
        status: AuditStatus,
        detail: &str,
    ) -> Self {
        Self {
            timestamp: Utc::now(),
            correlation_id,
            actor: actor.into(),
            action,
            input: bounded(input, MAX_INPUT_CHARS),
            status,
            detail: bounded(detail, MAX_DETAIL_CHARS),
        }
    }
}

/// Truncate to `max` characters on a char boundary
pub fn bounded(text: &str, max: usize) -> String {
    match text.char_indices().nth(max) {
        Some((idx, _)) => format!("{}...[truncated]", &text[..idx]),
        None => text.to_string(),
    }
}

/// Append-only JSON-lines audit sink.
///
/// A single file handle behind an async mutex serializes concurrent writers,
/// so records never interleave. Rotation is left to external tooling.
#[derive(Debug)]
pub struct AuditLog {
    path: PathBuf,
    file: Mutex<fs::File>,
}

impl AuditLog {
    /// Open (or create) the log in append mode
    pub async fn open<P: AsRef<Path>>(path: P) -> io::Result<Self> {
        let path = path.as_ref().to_path_buf();

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).await?;
            }
        }

        let mut options = OpenOptions::new();
        options.create(true).append(true);
        #[cfg(unix)]
        options.mode(0o600);

        let file = options.open(&path).await?;
        Ok(Self {
            path,
            file: Mutex::new(file),
        })
    }

    /// Default location: ~/.config/workgate/audit.log
    pub fn default_path() -> io::Result<PathBuf> {
        let home = std::env::var("HOME").map_err(|_| {
            io::Error::new(io::ErrorKind::NotFound, "HOME environment variable not set")
        })?;

        Ok(PathBuf::from(home)
            .join(".config")
            .join("workgate")
            .join("audit.log"))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one record and flush before returning
    pub async fn record(&self, record: &AuditRecord) -> io::Result<()> {
        let mut line = serde_json::to_string(record).map_err(io::Error::other)?;
        line.push('\n');

        let mut file = self.file.lock().await;
        file.write_all(line.as_bytes()).await?;
        file.flush().await?;
        Ok(())
    }
}

/// Parse an audit log back into records
pub async fn read_records<P: AsRef<Path>>(path: P) -> io::Result<Vec<AuditRecord>> {
    let content = fs::read_to_string(path).await?;
    content
        .lines()
        .filter(|line| !line.trim().is_empty())
        .map(|line| serde_json::from_str(line).map_err(io::Error::other))
        .collect()
}
