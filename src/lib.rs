//! KernelSU CI Builder
//!
//! Builds the KernelSU loadable module and GKI/AVD kernels with the driver
//! integrated, and assembles signed boot images from the resulting kernels.
//!
//! The crate is organized into functional modules:
//! - **error**: Unified error type hierarchy
//! - **models**: Core data structures and types
//! - **config**: Settings loading and input validation
//! - **kernel**: Source tree operations (versions, toolchains, patches, git, integration)
//! - **orchestrator**: External tool execution and the build-mode driver
//! - **bootimg**: Boot image assembly
//! - **log_collector**: `log` sink with optional file persistence

// Core foundational modules
pub mod error;
pub mod models;

pub mod config;
pub mod kernel;
pub mod orchestrator;
pub mod bootimg;

pub mod log_collector;

// Re-export the log crate for macro usage
pub use log;

pub use log_collector::LogCollector;

// ============================================================================
// PUBLIC RE-EXPORTS FOR CONVENIENCE
// ============================================================================

pub use error::{
    AppError, BuildError, ConfigError, PatchError, Result, ValidationError,
};

pub use models::{Arch, BuildConfig, BuildMode, BuildType};

pub use config::{load_settings, Settings};

pub use orchestrator::{BuildOrchestrator, BuildSummary, ProcessRunner, ToolRunner};

pub use bootimg::{AssemblerTools, BootImageAssembler, Compressor};
