use serde::Serialize;

use crate::audit::logger::bounded;
use crate::error::{ErrorKind, GatewayError};
use crate::patch::{PatchError, PatchReport};

/// Upper bound for the raw error text surfaced to callers
pub const MAX_RAW_ERROR_CHARS: usize = 2000;

#[derive(Debug, Clone, Serialize)]
pub struct UserFriendlyError {
    pub simple_message: String,
    pub suggestion: Option<String>,
    pub raw_error: String,
}

pub struct ErrorTranslator;

impl ErrorTranslator {
    /// Translate a GatewayError into a bounded, user-facing message
    pub fn translate(error: &GatewayError) -> UserFriendlyError {
        let raw_error = bounded(&error.to_string(), MAX_RAW_ERROR_CHARS);

        let (simple_message, suggestion) = match error.kind() {
            ErrorKind::ValidationBlocked => (
                "Command rejected by the command policy.".to_string(),
                Some("Run `workgate rules` to see which commands are allowed.".to_string()),
            ),
            ErrorKind::PathSecurityViolation => (
                "Path is outside the workspace or protected.".to_string(),
                Some("Use a path relative to the workspace root; credential and lock files cannot be written.".to_string()),
            ),
            ErrorKind::Timeout => (
                "Operation timed out.".to_string(),
                Some("Pass a smaller workload or a longer timeout within the rule limit.".to_string()),
            ),
            ErrorKind::SpawnFailure => (
                "External tool could not be run.".to_string(),
                Some("Check that the tool is installed and on PATH.".to_string()),
            ),
            ErrorKind::PatchBothFailed => {
                let hints = match error {
                    GatewayError::Patch(PatchError::BothFailed(report)) => Self::patch_hints(report),
                    _ => Vec::new(),
                };
                (
                    "Neither git apply nor patch could apply the diff.".to_string(),
                    hints.into_iter().next(),
                )
            }
            ErrorKind::NotFound => (
                "File or directory not found in the workspace.".to_string(),
                None,
            ),
            ErrorKind::EditorUnavailable => (
                "No editor is available.".to_string(),
                Some("Install `code` or `cursor`, or set [editor] command in the config file.".to_string()),
            ),
            ErrorKind::InvalidRequest => ("Request is invalid.".to_string(), None),
            ErrorKind::IoError => (
                "I/O error occurred.".to_string(),
                Some("Check file permissions and disk space".to_string()),
            ),
            ErrorKind::ConfigError => (
                "Configuration error occurred.".to_string(),
                Some("Check your config file at ~/.config/workgate/config.toml".to_string()),
            ),
        };

        UserFriendlyError {
            simple_message,
            suggestion,
            raw_error,
        }
    }

    /// Self-correction hints from both tools' diagnostics
    pub fn patch_hints(report: &PatchReport) -> Vec<String> {
        let text = report
            .attempts
            .iter()
            .filter(|a| !a.success)
            .map(|a| a.diagnostics().to_lowercase())
            .collect::<Vec<_>>()
            .join("\n");

        let mut hints = Vec::new();
        let mut hint = |message: &str| {
            if !hints.iter().any(|h: &String| h == message) {
                hints.push(message.to_string());
            }
        };

        let missing_file = text.contains("can't find file to patch")
            || text.contains("no such file")
            || text.contains("does not exist in index");
        if missing_file {
            let prefixed = report
                .targets
                .iter()
                .any(|t| t.starts_with("a/") || t.starts_with("b/"));
            if prefixed {
                hint("A file named in the diff does not exist under the base directory. Check the base and the paths.");
            } else {
                hint("Paths lack a/ and b/ prefixes; both tools strip one leading component (-p1). Regenerate the diff with prefixes.");
            }
        }

        if text.contains("reversed (or previously applied)")
            || text.contains("already exists in working directory")
            || text.contains("already applied")
        {
            hint("The diff appears to be applied already.");
        }

        if text.contains("patch does not apply")
            || (text.contains("hunk #") && text.contains("failed"))
            || text.contains("while searching for")
        {
            hint("Context lines do not match the current file. Regenerate the diff against the current content.");
        }

        if text.contains("corrupt patch")
            || text.contains("only garbage")
            || text.contains("malformed patch")
            || text.contains("no valid patches")
        {
            hint("The diff is malformed. Check hunk headers and that every line starts with ' ', '+' or '-'.");
        }

        hints
    }
}
