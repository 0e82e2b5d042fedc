//! Typed error sum for gitp.
//!
//! Mirrors the shape of `spec.md` §7: each variant is a class of failure a
//! caller might want to branch on (exit code, retry, "tell the user to pass
//! --force"), everything else rides along as an `anyhow::Error` context
//! chain the way lower-level plumbing already reports failures.

use std::fmt;
use std::path::PathBuf;

/// A gitp-specific error. The CLI layer matches on [`GitpError::kind`] to
/// pick a process exit code; everything else prints the `Display` chain.
#[derive(Debug)]
pub enum GitpError {
    /// Bad CLI invocation: missing argument, unknown path, conflicting flags.
    Usage(String),
    /// A precondition the operation requires was not met: uncommitted
    /// changes, nested manifest conflict, missing `--force`.
    Precondition(String),
    /// The underlying VCS command failed or returned unparsable output.
    Vcs(String),
    /// A manifest or stash file could not be parsed.
    Parse(String),
    /// Lock server protocol violation, timeout, or connection failure.
    Lock(String),
    /// Filesystem operation failed (permissions, missing parent, etc).
    Fs { path: PathBuf, source: std::io::Error },
}

impl GitpError {
    pub fn usage(msg: impl Into<String>) -> Self {
        GitpError::Usage(msg.into())
    }

    pub fn precondition(msg: impl Into<String>) -> Self {
        GitpError::Precondition(msg.into())
    }

    pub fn vcs(msg: impl Into<String>) -> Self {
        GitpError::Vcs(msg.into())
    }

    pub fn parse(msg: impl Into<String>) -> Self {
        GitpError::Parse(msg.into())
    }

    pub fn lock(msg: impl Into<String>) -> Self {
        GitpError::Lock(msg.into())
    }

    pub fn fs(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        GitpError::Fs { path: path.into(), source }
    }

    /// Process exit code, per `spec.md` §6's exit code table.
    pub fn exit_code(&self) -> i32 {
        match self {
            GitpError::Usage(_) => 2,
            GitpError::Precondition(_) => 3,
            GitpError::Vcs(_) => 4,
            GitpError::Parse(_) => 5,
            GitpError::Lock(_) => 6,
            GitpError::Fs { .. } => 7,
        }
    }
}

impl fmt::Display for GitpError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GitpError::Usage(msg) => write!(f, "usage error: {msg}"),
            GitpError::Precondition(msg) => write!(f, "precondition failed: {msg}"),
            GitpError::Vcs(msg) => write!(f, "vcs error: {msg}"),
            GitpError::Parse(msg) => write!(f, "parse error: {msg}"),
            GitpError::Lock(msg) => write!(f, "lock error: {msg}"),
            GitpError::Fs { path, source } => {
                write!(f, "filesystem error at {}: {source}", path.display())
            }
        }
    }
}

impl std::error::Error for GitpError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            GitpError::Fs { source, .. } => Some(source),
            _ => None,
        }
    }
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, anyhow::Error>;

/// Pull the leaf [`GitpError`] out of an `anyhow` chain, if one is there.
///
/// `main.rs` uses this to choose an exit code; everything in between just
/// propagates with `?` and `.context(...)`.
pub fn downcast(err: &anyhow::Error) -> Option<&GitpError> {
    err.chain().find_map(|e| e.downcast_ref::<GitpError>())
}
