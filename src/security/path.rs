//! Workspace path confinement.
//!
//! Every path the gateway touches goes through [`PathResolver`]. Requested
//! paths are joined to the workspace root (when relative), canonicalized with
//! symlinks resolved, and re-checked for containment. Paths that do not exist
//! yet are resolved through their deepest existing ancestor; the missing tail
//! may only contain plain names.

use std::ffi::OsString;
use std::fs;
use std::io;
use std::path::{Component, Path, PathBuf};
use thiserror::Error;
use tracing::error;

/// Directory names that are never writable, wherever they appear
const PROTECTED_DIRS: &[&str] = &[".git", ".ssh", ".gnupg", ".aws", ".kube", ".docker"];

/// File names that are never writable: credentials and dependency lock files
const PROTECTED_FILES: &[&str] = &[
    ".env",
    ".netrc",
    ".npmrc",
    ".pypirc",
    ".git-credentials",
    "credentials",
    "credentials.json",
    "id_rsa",
    "id_dsa",
    "id_ecdsa",
    "id_ed25519",
    "Cargo.lock",
    "package-lock.json",
    "yarn.lock",
    "pnpm-lock.yaml",
    "poetry.lock",
    "Pipfile.lock",
    "Gemfile.lock",
    "composer.lock",
    "uv.lock",
];

/// File name suffixes of key material
const PROTECTED_SUFFIXES: &[&str] = &[".pem", ".key", ".p12", ".pfx"];

#[derive(Debug, Error)]
pub enum PathError {
    #[error("Path escapes the workspace root: {0}")]
    Escape(String),

    #[error("Symlink target escapes the workspace root: {0}")]
    SymlinkEscape(String),

    #[error("Dangling symlink cannot be resolved: {0}")]
    DanglingSymlink(String),

    #[error("Path is protected ({reason}): {path}")]
    Protected { path: String, reason: String },

    #[error("Invalid path: {0}")]
    Invalid(String),

    #[error("Path not found: {0}")]
    NotFound(String),

    #[error("Workspace root is not usable: {0}")]
    InvalidRoot(String),

    #[error("I/O error resolving path: {0}")]
    Io(#[from] io::Error),
}

impl PathError {
    /// True for escape attempts and protected targets
    pub fn is_security_violation(&self) -> bool {
        matches!(
            self,
            PathError::Escape(_)
                | PathError::SymlinkEscape(_)
                | PathError::DanglingSymlink(_)
                | PathError::Protected { .. }
        )
    }
}

/// A path proven to live inside the workspace root
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedPath {
    pub canonical_absolute_path: PathBuf,
    pub workspace_relative_path: String,
    pub is_protected: bool,
    pub protected_reason: Option<String>,
}

impl ResolvedPath {
    pub fn as_path(&self) -> &Path {
        &self.canonical_absolute_path
    }

    pub fn exists(&self) -> bool {
        self.canonical_absolute_path.exists()
    }

    pub fn is_dir(&self) -> bool {
        self.canonical_absolute_path.is_dir()
    }
}

#[derive(Debug, Clone)]
pub struct PathResolver {
    root: PathBuf,
    extra_protected: Vec<PathBuf>,
}

impl PathResolver {
    /// Create a resolver for an existing directory
    pub fn new<P: AsRef<Path>>(workspace_root: P) -> Result<Self, PathError> {
        let requested = workspace_root.as_ref();
        let root = fs::canonicalize(requested)
            .map_err(|e| PathError::InvalidRoot(format!("{}: {}", requested.display(), e)))?;

        if !root.is_dir() {
            return Err(PathError::InvalidRoot(format!(
                "{} is not a directory",
                root.display()
            )));
        }

        Ok(Self {
            root,
            extra_protected: Vec::new(),
        })
    }

    /// Protect one more absolute path (e.g. the audit log when it lives
    /// inside the workspace)
    pub fn with_protected_path<P: AsRef<Path>>(mut self, path: P) -> Self {
        let path = path.as_ref();
        let resolved = canonicalize_lenient(path).unwrap_or_else(|_| path.to_path_buf());
        self.extra_protected.push(resolved);
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolve a path relative to the workspace root
    pub fn resolve(&self, requested: &str) -> Result<ResolvedPath, PathError> {
        self.resolve_against(&self.root, requested)
    }

    /// Resolve a path relative to an already confined directory
    pub fn resolve_from(&self, base: &ResolvedPath, requested: &str) -> Result<ResolvedPath, PathError> {
        self.resolve_against(&base.canonical_absolute_path, requested)
    }

    /// Resolve a path that is about to be written
    pub fn resolve_writable(&self, requested: &str) -> Result<ResolvedPath, PathError> {
        let resolved = self.resolve(requested)?;
        Self::ensure_writable(resolved)
    }

    /// Reject protected targets
    pub fn ensure_writable(resolved: ResolvedPath) -> Result<ResolvedPath, PathError> {
        if let Some(reason) = resolved.protected_reason.clone() {
            error!(
                path = %resolved.workspace_relative_path,
                reason = %reason,
                "write to protected path rejected"
            );
            return Err(PathError::Protected {
                path: resolved.workspace_relative_path,
                reason,
            });
        }
        Ok(resolved)
    }

    fn resolve_against(&self, base: &Path, requested: &str) -> Result<ResolvedPath, PathError> {
        if requested.trim().is_empty() {
            return Err(PathError::Invalid("empty path".to_string()));
        }
        if requested.contains('\0') {
            return Err(PathError::Invalid("path contains a NUL byte".to_string()));
        }

        let requested_path = Path::new(requested);
        let candidate = if requested_path.is_absolute() {
            requested_path.to_path_buf()
        } else {
            base.join(requested_path)
        };

        let canonical = match canonicalize_lenient(&candidate) {
            Ok(canonical) => canonical,
            Err(PathError::DanglingSymlink(_)) => {
                error!(requested = %requested, "dangling symlink rejected");
                return Err(PathError::DanglingSymlink(requested.to_string()));
            }
            Err(PathError::Escape(_)) => {
                error!(requested = %requested, "path escape attempt");
                return Err(PathError::Escape(requested.to_string()));
            }
            Err(e) => return Err(e),
        };

        if !canonical.starts_with(&self.root) {
            // Lexically inside but physically outside means a symlink did it
            if lexical_normalize(&candidate).starts_with(&self.root) {
                error!(requested = %requested, resolved = %canonical.display(), "symlink escape attempt");
                return Err(PathError::SymlinkEscape(requested.to_string()));
            }
            error!(requested = %requested, resolved = %canonical.display(), "path escape attempt");
            return Err(PathError::Escape(requested.to_string()));
        }

        let relative = canonical
            .strip_prefix(&self.root)
            .map_err(|_| PathError::Escape(requested.to_string()))?;
        let workspace_relative_path = if relative.as_os_str().is_empty() {
            ".".to_string()
        } else {
            relative
                .components()
                .map(|c| c.as_os_str().to_string_lossy().into_owned())
                .collect::<Vec<_>>()
                .join("/")
        };

        let protected_reason = self.protected_reason(&canonical, relative);

        Ok(ResolvedPath {
            canonical_absolute_path: canonical,
            workspace_relative_path,
            is_protected: protected_reason.is_some(),
            protected_reason,
        })
    }

    /// Match whole path segments against the deny-lists
    fn protected_reason(&self, canonical: &Path, relative: &Path) -> Option<String> {
        if self.extra_protected.iter().any(|p| p == canonical) {
            return Some("gateway-owned file".to_string());
        }

        for component in relative.components() {
            let Component::Normal(segment) = component else {
                continue;
            };
            let segment = segment.to_string_lossy();
            if let Some(reason) = segment_reason(&segment) {
                return Some(reason.to_string());
            }
        }
        None
    }
}

/// Deny-list check for a single path segment
pub fn segment_reason(segment: &str) -> Option<&'static str> {
    if PROTECTED_DIRS.contains(&segment) {
        return Some("sensitive directory");
    }
    if segment.ends_with(".lock") || segment.ends_with("-lock.json") || segment.ends_with("-lock.yaml") {
        return Some("lock file");
    }
    if PROTECTED_FILES.contains(&segment) {
        return Some("credential file");
    }
    if segment.starts_with(".env.") {
        return Some("credential file");
    }
    if PROTECTED_SUFFIXES.iter().any(|suffix| segment.ends_with(suffix)) {
        return Some("key material");
    }
    None
}

/// Canonicalize the deepest existing ancestor and re-attach the missing tail.
/// The tail may only contain plain names; a dangling symlink anywhere on the
/// way is an error because its target cannot be checked.
fn canonicalize_lenient(path: &Path) -> Result<PathBuf, PathError> {
    let mut existing = path.to_path_buf();
    let mut tail: Vec<OsString> = Vec::new();

    loop {
        match fs::canonicalize(&existing) {
            Ok(mut canonical) => {
                for name in tail.iter().rev() {
                    canonical.push(name);
                }
                return Ok(canonical);
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                if fs::symlink_metadata(&existing).is_ok() {
                    return Err(PathError::DanglingSymlink(existing.display().to_string()));
                }

                match existing.components().next_back() {
                    Some(Component::Normal(name)) => {
                        tail.push(name.to_os_string());
                    }
                    Some(Component::CurDir) => {}
                    Some(Component::ParentDir) => {
                        // ".." over a directory that does not exist
                        return Err(PathError::Escape(path.display().to_string()));
                    }
                    _ => return Err(PathError::NotFound(path.display().to_string())),
                }

                if !existing.pop() {
                    return Err(PathError::NotFound(path.display().to_string()));
                }
            }
            Err(e) => return Err(PathError::Io(e)),
        }
    }
}

/// Resolve "." and ".." without touching the filesystem
fn lexical_normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::ParentDir => {
                out.pop();
            }
            Component::CurDir => {}
            other => out.push(other.as_os_str()),
        }
    }
    out
}
