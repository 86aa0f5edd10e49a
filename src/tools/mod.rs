pub mod probe;

pub use probe::{ToolStatus, ToolVersion, probe_tool};
