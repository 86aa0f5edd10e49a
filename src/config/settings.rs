use serde::{Deserialize, Serialize};
use std::fs;
use std::net::IpAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

use crate::audit::AuditLog;
use crate::security::rules::DEFAULT_MAX_OUTPUT_BYTES;

/// Environment variable that overrides `[workspace] root`
pub const WORKSPACE_ROOT_ENV: &str = "WORKSPACE_ROOT";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    ReadError(#[from] std::io::Error),

    #[error("Failed to parse config file: {0}")]
    ParseError(#[from] toml::de::Error),

    #[error("Failed to serialize config: {0}")]
    SerializeError(#[from] toml::ser::Error),

    #[error("Config directory not found")]
    DirectoryNotFound,

    #[error("Invalid config value: {0}")]
    InvalidValue(String),

    #[error("Workspace root is not usable: {0}")]
    InvalidWorkspace(String),
}

#[derive(Debug, Deserialize, Serialize, Clone, Default, PartialEq)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub workspace: WorkspaceConfig,
    pub exec: ExecConfig,
    pub patch: PatchConfig,
    pub editor: EditorConfig,
    pub audit: AuditConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
#[serde(default)]
pub struct ServerConfig {
    pub bind: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1".to_string(),
            port: 9009,
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone, Default, PartialEq)]
#[serde(default)]
pub struct WorkspaceConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub root: Option<PathBuf>,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
#[serde(default)]
pub struct ExecConfig {
    /// Ceiling applied on top of every rule timeout
    pub max_timeout_seconds: u64,
    /// Ceiling applied on top of every rule output cap
    pub max_output_bytes: usize,
    pub shell: String,
}

impl Default for ExecConfig {
    fn default() -> Self {
        Self {
            max_timeout_seconds: 120,
            max_output_bytes: DEFAULT_MAX_OUTPUT_BYTES,
            shell: "sh".to_string(),
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
#[serde(default)]
pub struct PatchConfig {
    pub timeout_seconds: u64,
}

impl Default for PatchConfig {
    fn default() -> Self {
        Self { timeout_seconds: 30 }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
#[serde(default)]
pub struct EditorConfig {
    /// Explicit editor binary; detected from PATH when unset
    #[serde(skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,
    pub timeout_seconds: u64,
}

impl Default for EditorConfig {
    fn default() -> Self {
        Self {
            command: None,
            timeout_seconds: 10,
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone, Default, PartialEq)]
#[serde(default)]
pub struct AuditConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub log_path: Option<PathBuf>,
}

#[derive(Debug, Deserialize, Serialize, Clone, Copy, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Pretty,
        }
    }
}

/// True for loopback addresses and "localhost"
pub fn is_loopback_bind(bind: &str) -> bool {
    if bind.eq_ignore_ascii_case("localhost") {
        return true;
    }
    bind.trim_start_matches('[')
        .trim_end_matches(']')
        .parse::<IpAddr>()
        .map(|ip| ip.is_loopback())
        .unwrap_or(false)
}

impl Config {
    /// Get the config directory path
    pub fn config_dir() -> Result<PathBuf, ConfigError> {
        let home = std::env::var("HOME").map_err(|_| ConfigError::DirectoryNotFound)?;
        Ok(PathBuf::from(home).join(".config").join("workgate"))
    }

    /// Get the config file path
    pub fn config_path() -> Result<PathBuf, ConfigError> {
        Ok(Self::config_dir()?.join("config.toml"))
    }

    /// Load the default config file, falling back to defaults when absent
    pub fn load() -> Result<Self, ConfigError> {
        let path = Self::config_path()?;
        if !path.exists() {
            let config = Self::default();
            config.validate()?;
            return Ok(config);
        }
        Self::load_from(&path)
    }

    /// Load an explicit config file; it must exist
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let contents = fs::read_to_string(path)?;
        Self::parse(&contents)
    }

    pub fn parse(contents: &str) -> Result<Self, ConfigError> {
        let config: Config = toml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to file
    pub fn save_to(&self, path: &Path) -> Result<(), ConfigError> {
        // Validate before saving
        self.validate()?;

        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir)?;
        }

        let contents = toml::to_string_pretty(self)?;
        fs::write(path, contents)?;

        // Set permissions to 600 (owner read/write only)
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mut perms = fs::metadata(path)?.permissions();
            perms.set_mode(0o600);
            fs::set_permissions(path, perms)?;
        }

        Ok(())
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !is_loopback_bind(&self.server.bind) {
            return Err(ConfigError::InvalidValue(format!(
                "bind address '{}' is not a loopback address",
                self.server.bind
            )));
        }

        if self.exec.max_timeout_seconds == 0 {
            return Err(ConfigError::InvalidValue(
                "max_timeout_seconds must be greater than 0".to_string(),
            ));
        }

        if self.exec.max_output_bytes == 0 {
            return Err(ConfigError::InvalidValue(
                "max_output_bytes must be greater than 0".to_string(),
            ));
        }

        if self.exec.shell.trim().is_empty() {
            return Err(ConfigError::InvalidValue("shell must not be empty".to_string()));
        }

        if self.patch.timeout_seconds == 0 {
            return Err(ConfigError::InvalidValue(
                "patch timeout_seconds must be greater than 0".to_string(),
            ));
        }

        if self.editor.timeout_seconds == 0 {
            return Err(ConfigError::InvalidValue(
                "editor timeout_seconds must be greater than 0".to_string(),
            ));
        }

        if let Some(command) = &self.editor.command {
            if command.trim().is_empty() {
                return Err(ConfigError::InvalidValue(
                    "editor command must not be empty".to_string(),
                ));
            }
        }

        Ok(())
    }
}

/// Resolved, immutable runtime configuration
#[derive(Debug, Clone)]
pub struct Settings {
    pub workspace_root: PathBuf,
    pub bind: String,
    pub port: u16,
    pub max_timeout: Duration,
    pub max_output_bytes: usize,
    pub shell: String,
    pub patch_timeout: Duration,
    pub editor_command: Option<String>,
    pub editor_timeout: Duration,
    pub audit_log_path: PathBuf,
    pub log_level: String,
    pub log_format: LogFormat,
}

impl Settings {
    /// Resolve once at startup: `WORKSPACE_ROOT` wins over the config file,
    /// the current directory is the last resort
    pub fn resolve(config: &Config) -> Result<Self, ConfigError> {
        let from_env = std::env::var_os(WORKSPACE_ROOT_ENV)
            .filter(|v| !v.is_empty())
            .map(PathBuf::from);
        Self::resolve_with(config, from_env)
    }

    pub fn resolve_with(config: &Config, workspace_override: Option<PathBuf>) -> Result<Self, ConfigError> {
        config.validate()?;

        let requested = match workspace_override.or_else(|| config.workspace.root.clone()) {
            Some(root) => root,
            None => std::env::current_dir()?,
        };
        let workspace_root = fs::canonicalize(&requested)
            .map_err(|e| ConfigError::InvalidWorkspace(format!("{}: {}", requested.display(), e)))?;
        if !workspace_root.is_dir() {
            return Err(ConfigError::InvalidWorkspace(format!(
                "{} is not a directory",
                workspace_root.display()
            )));
        }

        let audit_log_path = match &config.audit.log_path {
            Some(path) => path.clone(),
            None => AuditLog::default_path().map_err(|_| ConfigError::DirectoryNotFound)?,
        };

        Ok(Self {
            workspace_root,
            bind: config.server.bind.clone(),
            port: config.server.port,
            max_timeout: Duration::from_secs(config.exec.max_timeout_seconds),
            max_output_bytes: config.exec.max_output_bytes,
            shell: config.exec.shell.clone(),
            patch_timeout: Duration::from_secs(config.patch.timeout_seconds),
            editor_command: config.editor.command.clone(),
            editor_timeout: Duration::from_secs(config.editor.timeout_seconds),
            audit_log_path,
            log_level: config.logging.level.clone(),
            log_format: config.logging.format,
        })
    }

    /// Address string for the listener, bracketing IPv6 literals
    pub fn listen_addr(&self) -> String {
        if self.bind.contains(':') && !self.bind.starts_with('[') {
            format!("[{}]:{}", self.bind, self.port)
        } else {
            format!("{}:{}", self.bind, self.port)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.server.bind, "127.0.0.1");
        assert_eq!(config.server.port, 9009);
        assert_eq!(config.exec.max_timeout_seconds, 120);
        assert_eq!(config.exec.shell, "sh");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let config = Config::parse("[server]\nport = 9100\n\n[logging]\nformat = \"json\"\n").unwrap();
        assert_eq!(config.server.port, 9100);
        assert_eq!(config.server.bind, "127.0.0.1");
        assert_eq!(config.logging.format, LogFormat::Json);
        assert_eq!(config.patch.timeout_seconds, 30);
    }

    #[test]
    fn test_validate_rejects_public_bind() {
        let mut config = Config::default();
        config.server.bind = "0.0.0.0".to_string();
        assert!(matches!(config.validate(), Err(ConfigError::InvalidValue(_))));
    }

    #[test]
    fn test_loopback_binds() {
        assert!(is_loopback_bind("127.0.0.1"));
        assert!(is_loopback_bind("127.0.0.2"));
        assert!(is_loopback_bind("::1"));
        assert!(is_loopback_bind("[::1]"));
        assert!(is_loopback_bind("localhost"));
        assert!(!is_loopback_bind("0.0.0.0"));
        assert!(!is_loopback_bind("192.168.1.10"));
        assert!(!is_loopback_bind("example.com"));
    }

    #[test]
    fn test_validate_zero_values() {
        let mut config = Config::default();
        config.exec.max_timeout_seconds = 0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.exec.max_output_bytes = 0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.patch.timeout_seconds = 0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.editor.command = Some("  ".to_string());
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_save_and_load_roundtrip() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("conf").join("config.toml");

        let mut config = Config::default();
        config.server.port = 9200;
        config.editor.command = Some("code".to_string());
        config.save_to(&path).unwrap();

        let loaded = Config::load_from(&path).unwrap();
        assert_eq!(loaded, config);

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = fs::metadata(&path).unwrap().permissions().mode();
            assert_eq!(mode & 0o777, 0o600);
        }
    }

    #[test]
    fn test_load_from_missing_file_errors() {
        let temp = TempDir::new().unwrap();
        assert!(matches!(
            Config::load_from(&temp.path().join("missing.toml")),
            Err(ConfigError::ReadError(_))
        ));
    }

    #[test]
    fn test_settings_override_wins() {
        let workspace = TempDir::new().unwrap();
        let other = TempDir::new().unwrap();

        let mut config = Config::default();
        config.workspace.root = Some(other.path().to_path_buf());
        config.audit.log_path = Some(workspace.path().join("audit.log"));

        let settings = Settings::resolve_with(&config, Some(workspace.path().to_path_buf())).unwrap();
        assert_eq!(settings.workspace_root, fs::canonicalize(workspace.path()).unwrap());
        assert_eq!(settings.max_timeout, Duration::from_secs(120));
        assert_eq!(settings.listen_addr(), "127.0.0.1:9009");
    }

    #[test]
    fn test_settings_reject_missing_root() {
        let temp = TempDir::new().unwrap();
        let mut config = Config::default();
        config.audit.log_path = Some(temp.path().join("audit.log"));

        let result = Settings::resolve_with(&config, Some(temp.path().join("nope")));
        assert!(matches!(result, Err(ConfigError::InvalidWorkspace(_))));
    }

    #[test]
    fn test_listen_addr_ipv6() {
        let temp = TempDir::new().unwrap();
        let mut config = Config::default();
        config.server.bind = "::1".to_string();
        config.audit.log_path = Some(temp.path().join("audit.log"));

        let settings = Settings::resolve_with(&config, Some(temp.path().to_path_buf())).unwrap();
        assert_eq!(settings.listen_addr(), "[::1]:9009");
    }
}
