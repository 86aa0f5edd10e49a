//! Two-stage patch fallback as an explicit state machine.
//!
//! ```text
//! Start --begin--> TryGit --ok--> Done(Git)
//!                    |
//!                  fail
//!                    v
//!                 TryPatch --ok--> Done(Patch)
//!                    |
//!                  fail
//!                    v
//!                  Failed
//! ```
//!
//! The machine only decides which tool runs next; spawning lives in
//! [`crate::patch::applier`].

use serde::{Deserialize, Serialize};
use std::fmt;

/// External tool used for one stage
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PatchMethod {
    /// `git apply`, merge-aware
    Git,
    /// GNU `patch -p1`, line based
    Patch,
}

impl PatchMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            PatchMethod::Git => "git",
            PatchMethod::Patch => "patch",
        }
    }

    /// Binary that implements this stage
    pub fn program(&self) -> &'static str {
        match self {
            PatchMethod::Git => "git",
            PatchMethod::Patch => "patch",
        }
    }
}

impl fmt::Display for PatchMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PatchState {
    Start,
    TryGit,
    TryPatch,
    Done(PatchMethod),
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PatchEvent {
    Begin,
    Succeeded,
    Failed,
}

impl PatchState {
    /// Pure transition function. Events that do not apply to a state leave
    /// it unchanged; terminal states absorb everything.
    pub fn next(self, event: PatchEvent) -> PatchState {
        match (self, event) {
            (PatchState::Start, PatchEvent::Begin) => PatchState::TryGit,
            (PatchState::TryGit, PatchEvent::Succeeded) => PatchState::Done(PatchMethod::Git),
            (PatchState::TryGit, PatchEvent::Failed) => PatchState::TryPatch,
            (PatchState::TryPatch, PatchEvent::Succeeded) => PatchState::Done(PatchMethod::Patch),
            (PatchState::TryPatch, PatchEvent::Failed) => PatchState::Failed,
            (state, _) => state,
        }
    }

    /// Tool to run while in this state
    pub fn method(self) -> Option<PatchMethod> {
        match self {
            PatchState::TryGit => Some(PatchMethod::Git),
            PatchState::TryPatch => Some(PatchMethod::Patch),
            _ => None,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, PatchState::Done(_) | PatchState::Failed)
    }
}
