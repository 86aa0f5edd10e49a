#![allow(dead_code)]

use async_trait::async_trait;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tempfile::TempDir;

use workgate::audit::{AuditRecord, read_records};
use workgate::exec::{CommandRunner, ExecError, ExecutionResult, ProcessExecutor};
use workgate::patch::SystemPatchTool;
use workgate::security::{AllowedCommand, Rule, RuleSet};
use workgate::{CommandValidator, Config, Gateway, Settings};

/// A workspace plus a separate directory holding the audit log
pub struct TestWorkspace {
    pub workspace: TempDir,
    pub state: TempDir,
}

impl TestWorkspace {
    pub fn new() -> Self {
        Self {
            workspace: TempDir::new().unwrap(),
            state: TempDir::new().unwrap(),
        }
    }

    pub fn root(&self) -> PathBuf {
        self.workspace.path().canonicalize().unwrap()
    }

    pub fn audit_path(&self) -> PathBuf {
        self.state.path().join("audit.log")
    }

    pub fn settings(&self) -> Settings {
        let mut config = Config::default();
        config.audit.log_path = Some(self.audit_path());
        config.editor.command = Some("workgate-test-no-such-editor".to_string());
        Settings::resolve_with(&config, Some(self.workspace.path().to_path_buf())).unwrap()
    }

    pub fn write(&self, rel: &str, contents: &str) {
        let path = self.workspace.path().join(rel);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        fs::write(path, contents).unwrap();
    }

    pub fn read(&self, rel: &str) -> String {
        fs::read_to_string(self.workspace.path().join(rel)).unwrap()
    }

    pub async fn records(&self) -> Vec<AuditRecord> {
        read_records(self.audit_path()).await.unwrap()
    }
}

/// Gateway whose only rule admits anything starting with `sleep`, run
/// through a real shell, so tests can start long-lived process groups
pub async fn sleeper_gateway(ws: &TestWorkspace, timeout_secs: u64) -> Gateway {
    let rules = RuleSet::from_ordered(vec![Rule::allow(r"^sleep\s", "test sleeper", timeout_secs)]).unwrap();
    let settings = ws.settings();
    let runner = Arc::new(ProcessExecutor::new("sh", &settings.workspace_root));
    Gateway::with_components(
        settings,
        CommandValidator::new(rules),
        runner,
        Arc::new(SystemPatchTool::new(Duration::from_secs(5))),
    )
    .await
    .unwrap()
}

/// True once `pid` has exited. Children of a killed shell may linger as
/// zombies until reaped.
#[cfg(target_os = "linux")]
pub fn is_gone(pid: i32) -> bool {
    match fs::read_to_string(format!("/proc/{}/stat", pid)) {
        Ok(stat) => stat
            .rsplit_once(')')
            .map(|(_, rest)| rest.trim_start().starts_with('Z'))
            .unwrap_or(false),
        Err(_) => true,
    }
}

/// Runner that never spawns anything and counts how often it was asked to
pub struct SpyRunner {
    calls: AtomicUsize,
}

impl SpyRunner {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            calls: AtomicUsize::new(0),
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CommandRunner for SpyRunner {
    async fn run(&self, _command: &AllowedCommand) -> Result<ExecutionResult, ExecError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(ExecutionResult {
            exit_code: Some(0),
            stdout: String::new(),
            stderr: String::new(),
            duration: Duration::from_millis(1),
            timed_out: false,
            stdout_truncated: false,
            stderr_truncated: false,
        })
    }
}

pub fn tool_available(name: &str) -> bool {
    Command::new(name)
        .arg("--version")
        .output()
        .map(|o| o.status.success())
        .unwrap_or(false)
}

/// Snapshot of every regular file under `root`, sorted by relative path
pub fn snapshot(root: &Path) -> Vec<(String, Vec<u8>)> {
    let mut files = Vec::new();
    collect(root, root, &mut files);
    files.sort();
    files
}

fn collect(root: &Path, dir: &Path, out: &mut Vec<(String, Vec<u8>)>) {
    for entry in fs::read_dir(dir).unwrap() {
        let path = entry.unwrap().path();
        if path.is_dir() {
            collect(root, &path, out);
        } else {
            let rel = path.strip_prefix(root).unwrap().display().to_string();
            out.push((rel, fs::read(&path).unwrap()));
        }
    }
}
