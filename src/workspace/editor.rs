use serde::Serialize;
use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tracing::info;

use crate::exec::{ExecError, ExecLimits, run_bounded};
use crate::security::{self, ResolvedPath};

/// Editors probed on PATH, in order
pub const EDITOR_CANDIDATES: &[&str] = &["code", "cursor"];

const EDITOR_OUTPUT_CAP: usize = 16 * 1024;

#[derive(Debug, Error)]
pub enum EditorError {
    #[error("No editor detected (tried: {0})")]
    Unavailable(String),

    #[error("Editor '{editor}' failed with exit code {exit_code:?}: {stderr}")]
    Failed {
        editor: String,
        exit_code: Option<i32>,
        stderr: String,
    },

    #[error("Editor '{0}' did not return within the timeout")]
    TimedOut(String),

    #[error(transparent)]
    Exec(#[from] ExecError),
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct OpenedFile {
    pub editor: String,
    pub file: String,
    pub line: Option<u32>,
}

/// Locate an executable on a PATH-style search list. Names containing a
/// separator are checked as given.
pub fn find_in_path(program: &str, path_var: Option<&OsStr>) -> Option<PathBuf> {
    if program.contains(std::path::MAIN_SEPARATOR) {
        let candidate = PathBuf::from(program);
        return is_executable(&candidate).then_some(candidate);
    }

    let path_var = path_var?;
    std::env::split_paths(path_var)
        .map(|dir| dir.join(program))
        .find(|candidate| is_executable(candidate))
}

#[cfg(unix)]
fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;
    path.metadata()
        .map(|m| m.is_file() && m.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

#[cfg(not(unix))]
fn is_executable(path: &Path) -> bool {
    path.is_file()
}

/// Opens workspace files in the local editor
#[derive(Debug, Clone)]
pub struct EditorLauncher {
    command: Option<String>,
    env: Vec<(String, String)>,
    workdir: PathBuf,
    timeout: Duration,
}

impl EditorLauncher {
    pub fn new<P: AsRef<Path>>(command: Option<String>, workdir: P, timeout: Duration) -> Self {
        Self::with_env(command, workdir, timeout, security::sanitized_env())
    }

    pub fn with_env<P: AsRef<Path>>(
        command: Option<String>,
        workdir: P,
        timeout: Duration,
        env: Vec<(String, String)>,
    ) -> Self {
        Self {
            command,
            env: security::filter_env(env),
            workdir: workdir.as_ref().to_path_buf(),
            timeout,
        }
    }

    fn search_path(&self) -> Option<&OsStr> {
        self.env
            .iter()
            .find(|(k, _)| k == "PATH")
            .map(|(_, v)| OsStr::new(v.as_str()))
    }

    /// The configured editor, or the first candidate found on PATH
    pub fn detect(&self) -> Option<(String, PathBuf)> {
        match &self.command {
            Some(command) => find_in_path(command, self.search_path()).map(|p| (command.clone(), p)),
            None => EDITOR_CANDIDATES.iter().find_map(|name| {
                find_in_path(name, self.search_path()).map(|p| (name.to_string(), p))
            }),
        }
    }

    /// `-g file:line` when a line is given, the bare file otherwise
    pub fn build_args(target: &Path, line: Option<u32>) -> Vec<String> {
        match line.filter(|l| *l > 0) {
            Some(line) => vec!["-g".to_string(), format!("{}:{}", target.display(), line)],
            None => vec![target.display().to_string()],
        }
    }

    pub async fn open(&self, target: &ResolvedPath, line: Option<u32>) -> Result<OpenedFile, EditorError> {
        let Some((name, program)) = self.detect() else {
            let tried = match &self.command {
                Some(command) => command.clone(),
                None => EDITOR_CANDIDATES.join(", "),
            };
            return Err(EditorError::Unavailable(tried));
        };

        let line = line.filter(|l| *l > 0);
        let args = Self::build_args(&target.canonical_absolute_path, line);
        let limits = ExecLimits {
            timeout: self.timeout,
            max_output_size: EDITOR_OUTPUT_CAP,
        };

        let program = program.display().to_string();
        let result = run_bounded(&program, &args, &self.workdir, &self.env, limits).await?;

        if result.timed_out {
            return Err(EditorError::TimedOut(name));
        }
        if !result.success() {
            return Err(EditorError::Failed {
                editor: name,
                exit_code: result.exit_code,
                stderr: result.stderr.trim().to_string(),
            });
        }

        info!(editor = %name, file = %target.workspace_relative_path, line = ?line, "file opened in editor");
        Ok(OpenedFile {
            editor: name,
            file: target.workspace_relative_path.clone(),
            line,
        })
    }
}
