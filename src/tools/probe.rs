use serde::Serialize;
use std::path::Path;
use std::time::Duration;

use crate::exec::{ExecLimits, run_bounded};
use crate::workspace::find_in_path;

const PROBE_TIMEOUT: Duration = Duration::from_secs(5);
const PROBE_OUTPUT_CAP: usize = 4 * 1024;

/// Version reported by an external tool
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct ToolVersion {
    pub major: u32,
    pub minor: u32,
    pub patch: u32,
}

impl ToolVersion {
    /// Parse the first dotted version token, e.g. "git version 2.39.2",
    /// "GNU patch 2.7.6" or "1.85.0" on the first line of `code --version`
    pub fn parse(output: &str) -> Option<Self> {
        let token = output
            .split_whitespace()
            .find(|t| t.starts_with(|c: char| c.is_ascii_digit()) && t.contains('.'))?;

        let nums: Vec<&str> = token.split('.').collect();
        let major = nums.first()?.parse::<u32>().ok()?;
        let minor = nums.get(1)?.parse::<u32>().ok()?;
        // Allow patch version to have non-numeric suffixes
        let patch = nums
            .get(2)
            .map(|p| {
                p.chars()
                    .take_while(|c| c.is_ascii_digit())
                    .collect::<String>()
                    .parse::<u32>()
                    .unwrap_or(0)
            })
            .unwrap_or(0);

        Some(ToolVersion { major, minor, patch })
    }
}

impl std::fmt::Display for ToolVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

/// Availability of one external tool
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ToolStatus {
    pub name: String,
    pub available: bool,
    pub version: Option<String>,
}

impl ToolStatus {
    fn missing(name: &str) -> Self {
        Self {
            name: name.to_string(),
            available: false,
            version: None,
        }
    }
}

/// Look a tool up on the sanitized PATH and ask it for its version
pub async fn probe_tool(name: &str, workdir: &Path, env: &[(String, String)]) -> ToolStatus {
    let search = env
        .iter()
        .find(|(k, _)| k == "PATH")
        .map(|(_, v)| std::ffi::OsStr::new(v.as_str()));
    let Some(program) = find_in_path(name, search) else {
        return ToolStatus::missing(name);
    };

    let limits = ExecLimits {
        timeout: PROBE_TIMEOUT,
        max_output_size: PROBE_OUTPUT_CAP,
    };
    let args = vec!["--version".to_string()];
    let version = match run_bounded(&program.display().to_string(), &args, workdir, env, limits).await {
        Ok(result) if result.success() => ToolVersion::parse(&result.stdout).map(|v| v.to_string()),
        _ => None,
    };

    ToolStatus {
        name: name.to_string(),
        available: true,
        version,
    }
}
