pub mod editor;
pub mod files;

pub use editor::{EDITOR_CANDIDATES, EditorError, EditorLauncher, OpenedFile, find_in_path};
pub use files::{FileWriter, WriteError, WriteMode, WriteOutcome};
