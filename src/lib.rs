pub mod audit;
pub mod config;
pub mod diagnostics;
pub mod error;
pub mod exec;
pub mod gateway;
pub mod logging;
pub mod patch;
pub mod security;
pub mod tools;
pub mod workspace;

// Re-export commonly used types for convenience
pub use config::{Config, Settings};
pub use error::{ErrorKind, GatewayError, GatewayResult};
pub use gateway::{Gateway, RequestContext};
pub use security::{CommandValidator, PathResolver, RuleSet};
