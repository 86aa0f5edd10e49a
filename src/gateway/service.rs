use std::sync::Arc;
use std::time::Duration;
use tracing::error;
use uuid::Uuid;

use crate::audit::{AuditAction, AuditLog, AuditRecord, AuditStatus};
use crate::config::Settings;
use crate::diagnostics::ErrorTranslator;
use crate::error::{GatewayError, GatewayResult};
use crate::exec::{CommandRunner, ProcessExecutor};
use crate::gateway::protocol::{
    ApplyDiffRequest, ApplyDiffResponse, ExecRequest, ExecResponse, HealthResponse, HealthTools,
    OpenFileRequest, OpenFileResponse, WriteFileRequest, WriteFileResponse,
};
use crate::patch::{PatchApplier, PatchTool, SystemPatchTool, targets};
use crate::security::{self, CommandValidator, PathError, PathResolver};
use crate::tools::probe_tool;
use crate::workspace::{EditorLauncher, FileWriter};

/// Actor recorded when the caller does not identify itself
pub const DEFAULT_ACTOR: &str = "controller";

/// Per-request identity carried into the audit record
#[derive(Debug, Clone)]
pub struct RequestContext {
    pub correlation_id: Uuid,
    pub actor: String,
}

impl RequestContext {
    pub fn new(actor: impl Into<String>) -> Self {
        Self {
            correlation_id: Uuid::new_v4(),
            actor: actor.into(),
        }
    }
}

impl Default for RequestContext {
    fn default() -> Self {
        Self::new(DEFAULT_ACTOR)
    }
}

/// Composes validation, execution, patching and auditing.
///
/// Every operation validates first, performs its side effect only on allow,
/// and appends exactly one audit record before returning, whatever the
/// outcome. All state is read-only after construction, so one instance is
/// shared across concurrent requests.
pub struct Gateway {
    settings: Arc<Settings>,
    validator: Arc<CommandValidator>,
    resolver: Arc<PathResolver>,
    runner: Arc<dyn CommandRunner>,
    patcher: PatchApplier,
    writer: FileWriter,
    editor: EditorLauncher,
    audit: AuditLog,
    env: Vec<(String, String)>,
}

impl Gateway {
    /// Build a gateway with the builtin rules and the system tools
    pub async fn new(settings: Settings) -> GatewayResult<Self> {
        let validator = CommandValidator::builtin()?;
        let env = security::sanitized_env();
        let runner: Arc<dyn CommandRunner> = Arc::new(ProcessExecutor::with_env(
            settings.shell.clone(),
            &settings.workspace_root,
            env.clone(),
        ));
        let patch_tool: Arc<dyn PatchTool> = Arc::new(SystemPatchTool::new(settings.patch_timeout));
        Self::with_components(settings, validator, runner, patch_tool).await
    }

    /// Build a gateway around caller-supplied components
    pub async fn with_components(
        settings: Settings,
        validator: CommandValidator,
        runner: Arc<dyn CommandRunner>,
        patch_tool: Arc<dyn PatchTool>,
    ) -> GatewayResult<Self> {
        // Open first so the log file exists when it is added to the protected set
        let audit = AuditLog::open(&settings.audit_log_path).await?;
        let resolver = Arc::new(
            PathResolver::new(&settings.workspace_root)?.with_protected_path(audit.path()),
        );

        let env = security::sanitized_env();
        let editor = EditorLauncher::with_env(
            settings.editor_command.clone(),
            &settings.workspace_root,
            settings.editor_timeout,
            env.clone(),
        );

        Ok(Self {
            patcher: PatchApplier::new(Arc::clone(&resolver), patch_tool),
            writer: FileWriter::new(Arc::clone(&resolver)),
            settings: Arc::new(settings),
            validator: Arc::new(validator),
            resolver,
            runner,
            editor,
            audit,
            env,
        })
    }

    /// Replace the editor launcher
    pub fn with_editor(mut self, editor: EditorLauncher) -> Self {
        self.editor = editor;
        self
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn validator(&self) -> &CommandValidator {
        &self.validator
    }

    pub fn resolver(&self) -> &PathResolver {
        &self.resolver
    }

    pub fn audit_log(&self) -> &AuditLog {
        &self.audit
    }

    /// Append one audit record. A sink failure is logged and never turns a
    /// finished operation into an error.
    async fn record_audit(&self, ctx: &RequestContext, action: AuditAction, input: &str, status: AuditStatus, detail: &str) {
        let record = AuditRecord::new(ctx.correlation_id, ctx.actor.clone(), action, input, status, detail);
        if let Err(e) = self.audit.record(&record).await {
            error!(
                correlation_id = %ctx.correlation_id,
                error = %e,
                path = %self.audit.path().display(),
                "failed to write audit record"
            );
        }
    }

    async fn audit_failure(&self, ctx: &RequestContext, action: AuditAction, input: &str, err: &GatewayError) {
        let status = err.kind().audit_status();
        if matches!(
            err,
            GatewayError::Path(_) | GatewayError::Write(_) | GatewayError::Patch(_)
        ) && status == AuditStatus::Blocked
        {
            error!(correlation_id = %ctx.correlation_id, input = %input, error = %err, "path security violation");
        }
        let detail = ErrorTranslator::translate(err).raw_error;
        self.record_audit(ctx, action, input, status, &detail).await;
    }

    /// Audit a request that never reached an operation (unparseable body)
    pub async fn record_rejected(&self, ctx: &RequestContext, action: AuditAction, detail: &str) -> GatewayError {
        let err = GatewayError::InvalidRequest(detail.to_string());
        self.audit_failure(ctx, action, "", &err).await;
        err
    }

    pub async fn open_file(&self, ctx: &RequestContext, req: &OpenFileRequest) -> GatewayResult<OpenFileResponse> {
        let result = self.open_file_inner(ctx, req).await;
        match &result {
            Ok(resp) => {
                let detail = format!("opened in {}", resp.editor);
                self.record_audit(ctx, AuditAction::OpenFile, &req.file, AuditStatus::Success, &detail)
                    .await;
            }
            Err(e) => self.audit_failure(ctx, AuditAction::OpenFile, &req.file, e).await,
        }
        result
    }

    async fn open_file_inner(&self, ctx: &RequestContext, req: &OpenFileRequest) -> GatewayResult<OpenFileResponse> {
        let target = self.resolver.resolve(&req.file)?;
        if !target.exists() {
            return Err(PathError::NotFound(target.workspace_relative_path).into());
        }

        let opened = self.editor.open(&target, req.line).await?;
        Ok(OpenFileResponse {
            success: true,
            correlation_id: ctx.correlation_id,
            editor: opened.editor,
            file: opened.file,
            line: opened.line,
        })
    }

    pub async fn write_file(&self, ctx: &RequestContext, req: &WriteFileRequest) -> GatewayResult<WriteFileResponse> {
        let result = self
            .writer
            .write(&req.file, &req.text, req.append, req.backup)
            .await
            .map_err(GatewayError::from);

        match &result {
            Ok(outcome) => {
                let detail = format!("{:?} {} bytes", outcome.mode, outcome.bytes_written).to_lowercase();
                self.record_audit(ctx, AuditAction::WriteFile, &req.file, AuditStatus::Success, &detail)
                    .await;
            }
            Err(e) => self.audit_failure(ctx, AuditAction::WriteFile, &req.file, e).await,
        }

        result.map(|outcome| WriteFileResponse {
            success: true,
            correlation_id: ctx.correlation_id,
            outcome,
        })
    }

    pub async fn apply_diff(&self, ctx: &RequestContext, req: &ApplyDiffRequest) -> GatewayResult<ApplyDiffResponse> {
        let input = format!("base={} targets={}", req.base, targets::extract(&req.diff).join(","));
        let result = self
            .patcher
            .apply(&req.base, &req.diff)
            .await
            .map_err(GatewayError::from);

        match &result {
            Ok(report) => {
                let detail = match report.method {
                    Some(method) => format!("applied via {}", method),
                    None => "applied".to_string(),
                };
                self.record_audit(ctx, AuditAction::ApplyDiff, &input, AuditStatus::Success, &detail)
                    .await;
            }
            Err(e) => self.audit_failure(ctx, AuditAction::ApplyDiff, &input, e).await,
        }

        result.map(|report| {
            // Non-empty only when git apply failed and patch took over
            let hints = ErrorTranslator::patch_hints(&report);
            ApplyDiffResponse {
                success: true,
                correlation_id: ctx.correlation_id,
                method: report.method,
                base: report.base,
                targets: report.targets,
                attempts: report.attempts,
                hints,
            }
        })
    }

    /// Validate and run a command. A process that ran, whatever its exit
    /// status, is an `Ok` response; only blocked commands and spawn
    /// failures are errors.
    pub async fn exec(&self, ctx: &RequestContext, req: &ExecRequest) -> GatewayResult<ExecResponse> {
        let decision = self.validator.validate(&req.cmd);
        let input = decision.normalized_command.clone();

        let result = self.exec_inner(ctx, decision, req.timeout).await;
        match &result {
            Ok(resp) => {
                let detail = match (resp.status, resp.result.exit_code) {
                    (AuditStatus::Timeout, _) => format!("timed out after {}ms", resp.timeout_ms),
                    (_, Some(code)) => format!("exit {} in {}ms", code, resp.result.duration.as_millis()),
                    (_, None) => "terminated by signal".to_string(),
                };
                self.record_audit(ctx, AuditAction::Exec, &input, resp.status, &detail).await;
            }
            Err(e) => self.audit_failure(ctx, AuditAction::Exec, &input, e).await,
        }
        result
    }

    async fn exec_inner(
        &self,
        ctx: &RequestContext,
        decision: security::ValidationDecision,
        requested_timeout: Option<u64>,
    ) -> GatewayResult<ExecResponse> {
        let allowed = decision
            .into_allowed()?
            .clamp_timeout(requested_timeout.map(Duration::from_secs), self.settings.max_timeout)
            .clamp_output(self.settings.max_output_bytes);

        let result = self.runner.run(&allowed).await?;

        let status = if result.timed_out {
            AuditStatus::Timeout
        } else if result.exit_code == Some(0) {
            AuditStatus::Success
        } else {
            AuditStatus::Error
        };

        Ok(ExecResponse {
            success: status == AuditStatus::Success,
            correlation_id: ctx.correlation_id,
            status,
            command: allowed.command().to_string(),
            rule: allowed.rule_pattern().to_string(),
            timeout_ms: allowed.timeout().as_millis() as u64,
            result,
        })
    }

    /// Editor and tool availability; not audited
    pub async fn health(&self) -> HealthResponse {
        let root = &self.settings.workspace_root;
        let (git, patch) = tokio::join!(
            probe_tool("git", root, &self.env),
            probe_tool("patch", root, &self.env)
        );
        let editor = self.editor.detect().map(|(name, _)| name);

        let status = if editor.is_some() && git.available {
            "healthy"
        } else {
            "degraded"
        };

        HealthResponse {
            status: status.to_string(),
            editor,
            tools: HealthTools { git, patch },
            workspace_root: root.display().to_string(),
        }
    }
}
