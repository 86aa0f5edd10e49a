use serde::Serialize;
use std::fmt;
use std::io;
use thiserror::Error;

// Import module-level errors for GatewayError
use crate::audit::AuditStatus;
use crate::config::settings::ConfigError;
use crate::exec::ExecError;
use crate::patch::PatchError;
use crate::security::{PathError, RuleSetError, ValidationError};
use crate::workspace::{EditorError, WriteError};

/// Machine-readable failure category carried by every error response and
/// mirrored in the audit record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    ValidationBlocked,
    PathSecurityViolation,
    Timeout,
    SpawnFailure,
    PatchBothFailed,
    NotFound,
    EditorUnavailable,
    InvalidRequest,
    IoError,
    ConfigError,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::ValidationBlocked => "validation_blocked",
            ErrorKind::PathSecurityViolation => "path_security_violation",
            ErrorKind::Timeout => "timeout",
            ErrorKind::SpawnFailure => "spawn_failure",
            ErrorKind::PatchBothFailed => "patch_both_failed",
            ErrorKind::NotFound => "not_found",
            ErrorKind::EditorUnavailable => "editor_unavailable",
            ErrorKind::InvalidRequest => "invalid_request",
            ErrorKind::IoError => "io_error",
            ErrorKind::ConfigError => "config_error",
        }
    }

    pub fn http_status(&self) -> u16 {
        match self {
            ErrorKind::ValidationBlocked | ErrorKind::PathSecurityViolation => 403,
            ErrorKind::NotFound => 404,
            ErrorKind::InvalidRequest => 400,
            ErrorKind::PatchBothFailed => 422,
            ErrorKind::EditorUnavailable => 503,
            ErrorKind::Timeout => 504,
            ErrorKind::SpawnFailure | ErrorKind::IoError | ErrorKind::ConfigError => 500,
        }
    }

    pub fn audit_status(&self) -> AuditStatus {
        match self {
            ErrorKind::ValidationBlocked | ErrorKind::PathSecurityViolation => AuditStatus::Blocked,
            ErrorKind::Timeout => AuditStatus::Timeout,
            _ => AuditStatus::Error,
        }
    }

    /// Process exit code for the CLI
    pub fn exit_code(&self) -> i32 {
        match self {
            ErrorKind::ValidationBlocked | ErrorKind::PathSecurityViolation => 2,
            ErrorKind::Timeout => 124,
            _ => 1,
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Top-level gateway error that wraps all module-specific errors
///
/// Every module error converts into GatewayError via `From`, so request
/// handlers can use `?` and still classify the failure through
/// [`GatewayError::kind`].
#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("Path error: {0}")]
    Path(#[from] PathError),

    #[error("Execution error: {0}")]
    Exec(#[from] ExecError),

    #[error("Patch error: {0}")]
    Patch(#[from] PatchError),

    #[error("Editor error: {0}")]
    Editor(#[from] EditorError),

    #[error("Write error: {0}")]
    Write(#[from] WriteError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Rule set error: {0}")]
    Rules(#[from] RuleSetError),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

fn path_kind(error: &PathError) -> ErrorKind {
    match error {
        e if e.is_security_violation() => ErrorKind::PathSecurityViolation,
        PathError::NotFound(_) => ErrorKind::NotFound,
        PathError::Invalid(_) => ErrorKind::InvalidRequest,
        PathError::InvalidRoot(_) => ErrorKind::ConfigError,
        _ => ErrorKind::IoError,
    }
}

impl GatewayError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            GatewayError::Validation(_) => ErrorKind::ValidationBlocked,
            GatewayError::Path(e) => path_kind(e),
            GatewayError::Exec(ExecError::Spawn { .. }) => ErrorKind::SpawnFailure,
            GatewayError::Exec(ExecError::Wait(_)) => ErrorKind::IoError,
            GatewayError::Patch(e) => match e {
                PatchError::EmptyDiff => ErrorKind::InvalidRequest,
                PatchError::BaseNotDirectory(_) => ErrorKind::NotFound,
                PatchError::Path(p) => path_kind(p),
                PatchError::BothFailed(_) => ErrorKind::PatchBothFailed,
                PatchError::Staging(_) => ErrorKind::IoError,
            },
            GatewayError::Editor(e) => match e {
                EditorError::Unavailable(_) => ErrorKind::EditorUnavailable,
                EditorError::TimedOut(_) => ErrorKind::Timeout,
                EditorError::Failed { .. } => ErrorKind::SpawnFailure,
                EditorError::Exec(ExecError::Spawn { .. }) => ErrorKind::SpawnFailure,
                EditorError::Exec(ExecError::Wait(_)) => ErrorKind::IoError,
            },
            GatewayError::Write(e) => match e {
                WriteError::IsDirectory(_) => ErrorKind::InvalidRequest,
                WriteError::Path(p) => path_kind(p),
                WriteError::Io { .. } => ErrorKind::IoError,
            },
            GatewayError::Config(_) | GatewayError::Rules(_) => ErrorKind::ConfigError,
            GatewayError::InvalidRequest(_) => ErrorKind::InvalidRequest,
            GatewayError::Io(_) => ErrorKind::IoError,
        }
    }

    /// The rule pattern or stage that produced the failure, when known
    pub fn stage(&self) -> Option<String> {
        match self {
            GatewayError::Validation(e) => e.rule().map(|r| format!("rule:{}", r)),
            GatewayError::Patch(PatchError::BothFailed(_)) => Some("patch:failed".to_string()),
            GatewayError::Patch(PatchError::Path(_)) => Some("patch:targets".to_string()),
            _ => None,
        }
    }
}

/// Result type for gateway operations
pub type GatewayResult<T> = std::result::Result<T, GatewayError>;
