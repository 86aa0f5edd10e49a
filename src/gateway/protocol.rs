//! JSON request and response bodies for the gateway endpoints.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::audit::AuditStatus;
use crate::error::{ErrorKind, GatewayError};
use crate::diagnostics::ErrorTranslator;
use crate::exec::ExecutionResult;
use crate::patch::{PatchAttempt, PatchError, PatchMethod};
use crate::tools::ToolStatus;
use crate::workspace::WriteOutcome;

fn default_true() -> bool {
    true
}

fn default_base() -> String {
    ".".to_string()
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct OpenFileRequest {
    pub file: String,
    #[serde(default)]
    pub line: Option<u32>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct WriteFileRequest {
    pub file: String,
    pub text: String,
    #[serde(default)]
    pub append: bool,
    #[serde(default = "default_true")]
    pub backup: bool,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ApplyDiffRequest {
    #[serde(default = "default_base")]
    pub base: String,
    pub diff: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ExecRequest {
    pub cmd: String,
    /// Seconds; tightened to the rule and global limits
    #[serde(default)]
    pub timeout: Option<u64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct OpenFileResponse {
    pub success: bool,
    pub correlation_id: Uuid,
    pub editor: String,
    pub file: String,
    pub line: Option<u32>,
}

#[derive(Debug, Clone, Serialize)]
pub struct WriteFileResponse {
    pub success: bool,
    pub correlation_id: Uuid,
    #[serde(flatten)]
    pub outcome: WriteOutcome,
}

#[derive(Debug, Clone, Serialize)]
pub struct ApplyDiffResponse {
    pub success: bool,
    pub correlation_id: Uuid,
    pub method: Option<PatchMethod>,
    pub base: String,
    pub targets: Vec<String>,
    pub attempts: Vec<PatchAttempt>,
    pub hints: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ExecResponse {
    pub success: bool,
    pub correlation_id: Uuid,
    pub status: AuditStatus,
    pub command: String,
    pub rule: String,
    pub timeout_ms: u64,
    #[serde(flatten)]
    pub result: ExecutionResult,
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthTools {
    pub git: ToolStatus,
    pub patch: ToolStatus,
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub editor: Option<String>,
    pub tools: HealthTools,
    pub workspace_root: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ServiceInfo {
    pub service: &'static str,
    pub version: &'static str,
    pub status: &'static str,
    pub endpoints: Vec<&'static str>,
}

impl ServiceInfo {
    pub fn current() -> Self {
        Self {
            service: "workgate",
            version: env!("CARGO_PKG_VERSION"),
            status: "running",
            endpoints: vec![
                "GET /",
                "GET /health",
                "POST /open-file",
                "POST /write-file",
                "POST /apply-diff",
                "POST /exec",
            ],
        }
    }
}

/// Body of every error response
#[derive(Debug, Clone, Serialize)]
pub struct ErrorBody {
    pub success: bool,
    pub correlation_id: Uuid,
    pub error: ErrorKind,
    /// Same text as the audit record detail
    pub reason: String,
    pub message: String,
    pub suggestion: Option<String>,
    pub stage: Option<String>,
    /// Both tools' output when a diff could not be applied
    #[serde(skip_serializing_if = "Option::is_none")]
    pub attempts: Option<Vec<PatchAttempt>>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub hints: Vec<String>,
}

impl ErrorBody {
    pub fn from_error(correlation_id: Uuid, error: &GatewayError) -> Self {
        let translated = ErrorTranslator::translate(error);
        let (attempts, hints) = match error {
            GatewayError::Patch(PatchError::BothFailed(report)) => (
                Some(report.attempts.clone()),
                ErrorTranslator::patch_hints(report),
            ),
            _ => (None, Vec::new()),
        };

        Self {
            success: false,
            correlation_id,
            error: error.kind(),
            reason: translated.raw_error,
            message: translated.simple_message,
            suggestion: translated.suggestion,
            stage: error.stage(),
            attempts,
            hints,
        }
    }
}
