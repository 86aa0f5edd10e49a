pub mod applier;
pub mod machine;
pub mod targets;

pub use applier::{PatchApplier, PatchAttempt, PatchError, PatchReport, PatchTool, SystemPatchTool};
pub use machine::{PatchEvent, PatchMethod, PatchState};
