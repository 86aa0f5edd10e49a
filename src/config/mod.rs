pub mod settings;

pub use settings::{
    AuditConfig, Config, ConfigError, EditorConfig, ExecConfig, LogFormat, LoggingConfig,
    PatchConfig, ServerConfig, Settings, WorkspaceConfig, is_loopback_bind,
};
