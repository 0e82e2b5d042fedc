//! Process-wide state, made explicit.
//!
//! The original implementation kept verbosity, color policy, and a manifest
//! cache as module-level globals. Per the redesign guidance this threads a
//! single [`Context`] value through instead: commands take `&Context`
//! rather than reaching into statics.

use std::io::IsTerminal;
use std::path::{Path, PathBuf};

use crate::manifest::Store;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Verbosity {
    Quiet,
    Normal,
    Verbose,
    Debug,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColorMode {
    Auto,
    Always,
    Never,
}

impl ColorMode {
    pub fn resolve(self) -> bool {
        match self {
            ColorMode::Always => true,
            ColorMode::Never => false,
            ColorMode::Auto => std::io::stdout().is_terminal(),
        }
    }
}

/// Carries the bits of state that used to be process globals.
pub struct Context {
    pub verbosity: Verbosity,
    pub color: ColorMode,
    pub force: bool,
    /// The directory `gitp` was invoked from, before any `cd` to a repo root.
    pub invocation_dir: PathBuf,
    pub manifests: Store,
}

impl Context {
    pub fn new(verbosity: Verbosity, color: ColorMode, force: bool) -> std::io::Result<Self> {
        Ok(Context {
            verbosity,
            color,
            force,
            invocation_dir: std::env::current_dir()?,
            manifests: Store::new(),
        })
    }

    pub fn use_color(&self) -> bool {
        self.color.resolve()
    }

    /// Path to the manifest file that governs `dir`, i.e. `dir/.gitp_manifest`.
    pub fn manifest_path(&self, dir: &Path) -> PathBuf {
        dir.join(".gitp_manifest")
    }
}
