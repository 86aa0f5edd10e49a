use async_trait::async_trait;
use serde::Serialize;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{info, warn};

use crate::exec::{ExecLimits, run_bounded};
use crate::patch::machine::{PatchEvent, PatchMethod, PatchState};
use crate::patch::targets;
use crate::security::{self, PathError, PathResolver, ResolvedPath};

const PATCH_OUTPUT_CAP: usize = 64 * 1024;

#[derive(Debug, Error)]
pub enum PatchError {
    #[error("Diff is empty")]
    EmptyDiff,

    #[error("Patch base must be an existing directory: {0}")]
    BaseNotDirectory(String),

    #[error("Patch target rejected: {0}")]
    Path(#[from] PathError),

    #[error("Both git apply and patch failed")]
    BothFailed(Box<PatchReport>),

    #[error("Failed to stage diff: {0}")]
    Staging(#[from] io::Error),
}

/// One stage's outcome
#[derive(Debug, Clone, Serialize)]
pub struct PatchAttempt {
    pub method: PatchMethod,
    pub success: bool,
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
    pub timed_out: bool,
}

impl PatchAttempt {
    /// Attempt that never produced a process (tool missing, spawn error)
    pub fn spawn_failed(method: PatchMethod, error: impl std::fmt::Display) -> Self {
        Self {
            method,
            success: false,
            exit_code: None,
            stdout: String::new(),
            stderr: format!("failed to run {}: {}", method.program(), error),
            timed_out: false,
        }
    }

    /// The tool's own failure text. GNU patch reports rejected hunks on
    /// stdout, so fall back to it when stderr is empty.
    pub fn diagnostics(&self) -> &str {
        if self.stderr.trim().is_empty() {
            &self.stdout
        } else {
            &self.stderr
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct PatchReport {
    pub success: bool,
    pub method: Option<PatchMethod>,
    pub base: String,
    pub targets: Vec<String>,
    pub attempts: Vec<PatchAttempt>,
}

impl PatchReport {
    pub fn attempt(&self, method: PatchMethod) -> Option<&PatchAttempt> {
        self.attempts.iter().find(|a| a.method == method)
    }
}

/// Runs one fallback stage against a staged diff file
#[async_trait]
pub trait PatchTool: Send + Sync {
    async fn apply(&self, method: PatchMethod, patch_file: &Path, base: &Path) -> PatchAttempt;
}

/// `git apply` and GNU `patch` through the bounded executor
#[derive(Debug, Clone)]
pub struct SystemPatchTool {
    env: Vec<(String, String)>,
    timeout: Duration,
}

impl SystemPatchTool {
    pub fn new(timeout: Duration) -> Self {
        Self {
            env: security::sanitized_env(),
            timeout,
        }
    }

    fn limits(&self) -> ExecLimits {
        ExecLimits {
            timeout: self.timeout,
            max_output_size: PATCH_OUTPUT_CAP,
        }
    }

    async fn run(&self, method: PatchMethod, args: &[String], base: &Path, env: &[(String, String)]) -> PatchAttempt {
        match run_bounded(method.program(), args, base, env, self.limits()).await {
            Ok(result) => PatchAttempt {
                method,
                success: result.success(),
                exit_code: result.exit_code,
                stdout: result.stdout,
                stderr: result.stderr,
                timed_out: result.timed_out,
            },
            Err(e) => PatchAttempt::spawn_failed(method, e),
        }
    }

    async fn git_apply(&self, patch_file: &Path, base: &Path) -> PatchAttempt {
        // Stop repository discovery at the base so paths stay relative to it
        let mut env = self.env.clone();
        if let Some(parent) = base.parent() {
            env.push((
                "GIT_CEILING_DIRECTORIES".to_string(),
                parent.display().to_string(),
            ));
        }

        let args = vec![
            "apply".to_string(),
            "--verbose".to_string(),
            patch_file.display().to_string(),
        ];
        self.run(PatchMethod::Git, &args, base, &env).await
    }

    async fn line_patch(&self, patch_file: &Path, base: &Path) -> PatchAttempt {
        let file = patch_file.display().to_string();
        let mut args = vec![
            "-p1".to_string(),
            "--batch".to_string(),
            "--forward".to_string(),
            "--dry-run".to_string(),
            "-i".to_string(),
            file,
        ];

        // Dry run first so a rejected diff leaves no partial hunks behind
        let dry_run = self.run(PatchMethod::Patch, &args, base, &self.env).await;
        if !dry_run.success {
            return dry_run;
        }

        args.retain(|a| a != "--dry-run");
        self.run(PatchMethod::Patch, &args, base, &self.env).await
    }
}

#[async_trait]
impl PatchTool for SystemPatchTool {
    async fn apply(&self, method: PatchMethod, patch_file: &Path, base: &Path) -> PatchAttempt {
        match method {
            PatchMethod::Git => self.git_apply(patch_file, base).await,
            PatchMethod::Patch => self.line_patch(patch_file, base).await,
        }
    }
}

/// Applies unified diffs inside the workspace with the two-stage fallback
pub struct PatchApplier {
    resolver: Arc<PathResolver>,
    tool: Arc<dyn PatchTool>,
}

impl PatchApplier {
    pub fn new(resolver: Arc<PathResolver>, tool: Arc<dyn PatchTool>) -> Self {
        Self { resolver, tool }
    }

    /// Resolve the base directory
    pub fn resolve_base(&self, base: &str) -> Result<ResolvedPath, PatchError> {
        let base = if base.trim().is_empty() { "." } else { base };
        let resolved = self.resolver.resolve(base)?;
        if !resolved.is_dir() {
            return Err(PatchError::BaseNotDirectory(resolved.workspace_relative_path));
        }
        Ok(resolved)
    }

    /// Confine every file the diff names, both as written and with one
    /// leading component stripped
    pub fn check_targets(&self, base: &ResolvedPath, diff: &str) -> Result<Vec<String>, PatchError> {
        let named = targets::extract(diff);

        for target in &named {
            if Path::new(target).is_absolute() {
                return Err(PatchError::Path(PathError::Escape(target.clone())));
            }

            let resolved = self.resolver.resolve_from(base, target)?;
            PathResolver::ensure_writable(resolved)?;

            if let Some(stripped) = targets::strip_one(target) {
                let resolved = self.resolver.resolve_from(base, stripped)?;
                PathResolver::ensure_writable(resolved)?;
            }
        }

        Ok(named)
    }

    /// Validate, stage and apply a diff. The staged file is removed on every
    /// path out of this function.
    pub async fn apply(&self, base: &str, diff: &str) -> Result<PatchReport, PatchError> {
        if diff.trim().is_empty() {
            return Err(PatchError::EmptyDiff);
        }

        let base = self.resolve_base(base)?;
        let named = self.check_targets(&base, diff)?;

        let staged = stage(diff)?;
        let base_path: PathBuf = base.canonical_absolute_path.clone();

        let mut attempts = Vec::with_capacity(2);
        let mut state = PatchState::Start.next(PatchEvent::Begin);
        while let Some(method) = state.method() {
            let attempt = self.tool.apply(method, staged.path(), &base_path).await;
            let event = if attempt.success {
                PatchEvent::Succeeded
            } else {
                warn!(method = %method, exit_code = ?attempt.exit_code, "patch stage failed");
                PatchEvent::Failed
            };
            attempts.push(attempt);
            state = state.next(event);
        }

        if let Err(e) = staged.close() {
            warn!(error = %e, "failed to remove staged diff");
        }

        let method = match state {
            PatchState::Done(method) => Some(method),
            _ => None,
        };
        let report = PatchReport {
            success: method.is_some(),
            method,
            base: base.workspace_relative_path,
            targets: named,
            attempts,
        };

        match method {
            Some(method) => {
                info!(method = %method, base = %report.base, "diff applied");
                Ok(report)
            }
            None => Err(PatchError::BothFailed(Box::new(report))),
        }
    }
}

fn stage(diff: &str) -> io::Result<tempfile::NamedTempFile> {
    let mut file = tempfile::Builder::new()
        .prefix("workgate-")
        .suffix(".patch")
        .tempfile()?;
    file.write_all(diff.as_bytes())?;
    if !diff.ends_with('\n') {
        file.write_all(b"\n")?;
    }
    file.flush()?;
    Ok(file)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use tempfile::TempDir;

    /// Scripted tool: records the staged file and returns fixed outcomes
    struct ScriptedTool {
        outcomes: Vec<(PatchMethod, bool)>,
        seen: Mutex<Vec<(PatchMethod, PathBuf, String)>>,
    }

    impl ScriptedTool {
        fn new(outcomes: Vec<(PatchMethod, bool)>) -> Self {
            Self {
                outcomes,
                seen: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl PatchTool for ScriptedTool {
        async fn apply(&self, method: PatchMethod, patch_file: &Path, _base: &Path) -> PatchAttempt {
            let content = std::fs::read_to_string(patch_file).unwrap_or_default();
            self.seen
                .lock()
                .unwrap()
                .push((method, patch_file.to_path_buf(), content));

            let success = self
                .outcomes
                .iter()
                .find(|(m, _)| *m == method)
                .map(|(_, ok)| *ok)
                .unwrap_or(false);

            PatchAttempt {
                method,
                success,
                exit_code: Some(if success { 0 } else { 1 }),
                stdout: String::new(),
                stderr: if success {
                    String::new()
                } else {
                    format!("{} rejected the diff", method)
                },
                timed_out: false,
            }
        }
    }

    const DIFF: &str = "--- a/hello.txt\n+++ b/hello.txt\n@@ -1 +1 @@\n-hello\n+world\n";

    fn setup(tool: Arc<ScriptedTool>) -> (TempDir, PatchApplier) {
        let temp = TempDir::new().unwrap();
        std::fs::write(temp.path().join("hello.txt"), "hello\n").unwrap();
        let resolver = Arc::new(PathResolver::new(temp.path()).unwrap());
        (temp, PatchApplier::new(resolver, tool))
    }

    #[tokio::test]
    async fn test_git_success_skips_patch() {
        let tool = Arc::new(ScriptedTool::new(vec![(PatchMethod::Git, true)]));
        let (_temp, applier) = setup(Arc::clone(&tool));

        let report = applier.apply(".", DIFF).await.unwrap();
        assert!(report.success);
        assert_eq!(report.method, Some(PatchMethod::Git));
        assert_eq!(report.attempts.len(), 1);
        assert_eq!(tool.seen.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_fallback_to_patch() {
        let tool = Arc::new(ScriptedTool::new(vec![
            (PatchMethod::Git, false),
            (PatchMethod::Patch, true),
        ]));
        let (_temp, applier) = setup(tool);

        let report = applier.apply(".", DIFF).await.unwrap();
        assert_eq!(report.method, Some(PatchMethod::Patch));
        assert_eq!(report.attempts.len(), 2);
        assert!(!report.attempts[0].success);
    }

    #[tokio::test]
    async fn test_both_failed_keeps_both_diagnostics() {
        let tool = Arc::new(ScriptedTool::new(vec![]));
        let (_temp, applier) = setup(tool);

        let err = applier.apply(".", DIFF).await.unwrap_err();
        let PatchError::BothFailed(report) = err else {
            panic!("expected BothFailed");
        };
        assert_eq!(report.attempt(PatchMethod::Git).unwrap().stderr, "git rejected the diff");
        assert_eq!(report.attempt(PatchMethod::Patch).unwrap().stderr, "patch rejected the diff");
    }

    #[tokio::test]
    async fn test_staged_file_removed_and_newline_added() {
        let tool = Arc::new(ScriptedTool::new(vec![(PatchMethod::Git, true)]));
        let (_temp, applier) = setup(Arc::clone(&tool));

        let diff = DIFF.trim_end();
        applier.apply(".", diff).await.unwrap();

        let seen = tool.seen.lock().unwrap();
        let (_, staged, content) = &seen[0];
        assert!(content.ends_with('\n'));
        assert!(!staged.exists());
    }

    #[tokio::test]
    async fn test_staged_file_removed_on_failure() {
        let tool = Arc::new(ScriptedTool::new(vec![]));
        let (_temp, applier) = setup(Arc::clone(&tool));

        let _ = applier.apply(".", DIFF).await;
        for (_, staged, _) in tool.seen.lock().unwrap().iter() {
            assert!(!staged.exists());
        }
    }

    #[tokio::test]
    async fn test_escaping_target_rejected_before_any_tool() {
        let tool = Arc::new(ScriptedTool::new(vec![(PatchMethod::Git, true)]));
        let (_temp, applier) = setup(Arc::clone(&tool));

        let diff = "--- a/../../etc/passwd\n+++ b/../../etc/passwd\n@@ -1 +1 @@\n-x\n+y\n";
        let err = applier.apply(".", diff).await.unwrap_err();
        assert!(matches!(err, PatchError::Path(ref e) if e.is_security_violation()));
        assert!(tool.seen.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_protected_target_rejected() {
        let tool = Arc::new(ScriptedTool::new(vec![(PatchMethod::Git, true)]));
        let (_temp, applier) = setup(Arc::clone(&tool));

        let diff = "--- a/.env\n+++ b/.env\n@@ -1 +1 @@\n-A=1\n+A=2\n";
        let err = applier.apply(".", diff).await.unwrap_err();
        assert!(matches!(err, PatchError::Path(PathError::Protected { .. })));
        assert!(tool.seen.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_absolute_target_rejected() {
        let tool = Arc::new(ScriptedTool::new(vec![(PatchMethod::Git, true)]));
        let (_temp, applier) = setup(tool);

        let diff = "--- /etc/hosts\n+++ /etc/hosts\n@@ -1 +1 @@\n-x\n+y\n";
        assert!(matches!(
            applier.apply(".", diff).await,
            Err(PatchError::Path(PathError::Escape(_)))
        ));
    }

    #[tokio::test]
    async fn test_base_must_be_directory() {
        let tool = Arc::new(ScriptedTool::new(vec![(PatchMethod::Git, true)]));
        let (_temp, applier) = setup(tool);

        assert!(matches!(
            applier.apply("hello.txt", DIFF).await,
            Err(PatchError::BaseNotDirectory(_))
        ));
        assert!(matches!(
            applier.apply("../..", DIFF).await,
            Err(PatchError::Path(_))
        ));
    }

    #[tokio::test]
    async fn test_empty_diff_rejected() {
        let tool = Arc::new(ScriptedTool::new(vec![(PatchMethod::Git, true)]));
        let (_temp, applier) = setup(tool);
        assert!(matches!(applier.apply(".", "  \n").await, Err(PatchError::EmptyDiff)));
    }

    #[test]
    fn test_diagnostics_falls_back_to_stdout() {
        let attempt = PatchAttempt {
            method: PatchMethod::Patch,
            success: false,
            exit_code: Some(1),
            stdout: "Hunk #1 FAILED at 1.".to_string(),
            stderr: String::new(),
            timed_out: false,
        };
        assert_eq!(attempt.diagnostics(), "Hunk #1 FAILED at 1.");
    }
}
