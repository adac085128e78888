//! Top-level error taxonomy. Each component owns a typed error enum; this
//! module aggregates them behind `RunError`.

use std::path::PathBuf;
use thiserror::Error;

use crate::backend::BackendError;
use crate::config::ConfigError;
use crate::discovery::DiscoveryError;
use crate::filter::FilterError;
use crate::graph::DependencyError;
use crate::hooks::HookError;
use crate::process::CommandError;

/// A position inside a configuration file, attached to parse/eval errors so
/// they can be reported the way a compiler reports them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourcePos {
    pub file: PathBuf,
    pub line: usize,
    pub column: usize,
}

impl std::fmt::Display for SourcePos {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}:{}", self.file.display(), self.line, self.column)
    }
}

/// Errors surfaced while running the engine subprocess for a unit (C9).
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("engine init failed for {unit}: {source}")]
    Init { unit: PathBuf, #[source] source: CommandError },

    #[error("engine plan failed for {unit}: {source}")]
    Plan { unit: PathBuf, #[source] source: CommandError },

    #[error("engine apply failed for {unit}: {source}")]
    Apply { unit: PathBuf, #[source] source: CommandError },

    #[error("module {unit} is protected (prevent_destroy = true)")]
    ModuleIsProtected { unit: PathBuf },

    #[error("backend not defined for {unit}")]
    BackendNotDefined { unit: PathBuf },

    #[error("module not found at {unit}")]
    ModuleNotFound { unit: PathBuf },

    #[error("authentication failure while running engine for {unit}: {raw_message}")]
    AuthenticationFailure { unit: PathBuf, raw_message: String },

    #[error("engine command failed for {unit}: {source}")]
    Other { unit: PathBuf, #[source] source: CommandError },
}

/// The run-wide error type. Every component error converts into this via
/// `#[from]`.
#[derive(Debug, Error)]
pub enum RunError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Discovery(#[from] DiscoveryError),

    #[error(transparent)]
    Filter(#[from] FilterError),

    #[error(transparent)]
    Dependency(#[from] DependencyError),

    #[error(transparent)]
    Backend(#[from] BackendError),

    #[error(transparent)]
    Hook(#[from] HookError),

    #[error(transparent)]
    Engine(#[from] EngineError),

    #[error("run cancelled")]
    Cancelled,

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Process exit codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitCode {
    Success = 0,
    RunFailure = 1,
    ConfigError = 2,
    ExternalDependencyDeclined = 3,
}

impl RunError {
    /// Classifies this error into one of the process exit codes.
    pub fn exit_code(&self) -> ExitCode {
        match self {
            RunError::Config(_) | RunError::Filter(_) => ExitCode::ConfigError,
            RunError::Dependency(DependencyError::ExternalDependencyDeclined(_)) => {
                ExitCode::ExternalDependencyDeclined
            }
            _ => ExitCode::RunFailure,
        }
    }
}
