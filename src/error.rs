//! Unified error type hierarchy for the KernelSU CI builder
//!
//! Provides structured error handling with ConfigError, BuildError,
//! PatchError, ValidationError, and the top-level AppError used by the binaries.
//!
//! Library code returns these as values. Only the binaries decide to
//! terminate the process, via [`AppError::exit_code`].

use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Configuration errors: always fatal, never retried.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("No clang version mapping found for kernel version: {kernel_version} (available: {})", .available.join(", "))]
    UnknownToolchainVersion {
        kernel_version: String,
        available: Vec<String>,
    },

    #[error("Could not find valid prebuilt clang for version {version}; checked: {}", format_paths(.checked))]
    ToolchainNotFound {
        version: String,
        checked: Vec<PathBuf>,
    },

    #[error("Invalid kernel branch name: {0}")]
    MalformedVersionIdentifier(String),

    #[error("Invalid value for {field}: {value}")]
    InvalidValue { field: String, value: String },

    #[error("Path does not exist: {}", .0.display())]
    PathNotFound(PathBuf),

    #[error("Invalid settings file: {0}")]
    InvalidSettings(String),

    #[error("IO error during config operations: {0}")]
    IoError(#[from] io::Error),
}

/// Errors raised while driving external build tools.
#[derive(Error, Debug)]
pub enum BuildError {
    #[error("Command failed with exit code {code:?}: {command}")]
    ExternalToolFailure {
        command: String,
        code: Option<i32>,
        output: String,
    },

    #[error("Failed to execute '{command}': {source}")]
    Spawn {
        command: String,
        #[source]
        source: io::Error,
    },

    #[error("Build interrupted")]
    Interrupted,

    #[error("Git operation failed: {0}")]
    Git(String),

    #[error("Download failed: {0}")]
    Fetch(String),

    #[error("IO error during build: {0}")]
    IoError(#[from] io::Error),
}

/// Text patching errors. Restore failures are never reported through this type.
#[derive(Error, Debug)]
pub enum PatchError {
    #[error("Invalid regex pattern: {0}")]
    RegexInvalid(String),

    #[error("Failed to patch {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Build result validation errors.
#[derive(Error, Debug)]
pub enum ValidationError {
    #[error("Required artifact missing: {}", .0.display())]
    ArtifactMissing(PathBuf),
}

/// Top-level error for the command line entry points.
#[derive(Error, Debug)]
pub enum AppError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Build(#[from] BuildError),

    #[error(transparent)]
    Patch(#[from] PatchError),

    #[error(transparent)]
    Validation(#[from] ValidationError),
}

impl AppError {
    /// Process exit code for this error.
    ///
    /// External tool failures propagate the tool's own exit code verbatim.
    /// A tool killed by a signal has no code and maps to 1.
    pub fn exit_code(&self) -> i32 {
        match self {
            AppError::Build(BuildError::ExternalToolFailure { code, .. }) => code.unwrap_or(1),
            AppError::Build(BuildError::Interrupted) => 130,
            _ => 1,
        }
    }
}

impl From<io::Error> for AppError {
    fn from(e: io::Error) -> Self {
        AppError::Build(BuildError::IoError(e))
    }
}

fn format_paths(paths: &[PathBuf]) -> String {
    paths
        .iter()
        .map(|p| p.display().to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

/// Top-level result type for the binaries.
pub type Result<T> = std::result::Result<T, AppError>;
