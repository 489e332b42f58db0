//! Kernel Source Tree Module
//!
//! Everything that reads or mutates an Android kernel checkout:
//! - Branch version parsing and comparison
//! - Prebuilt clang discovery
//! - Reversible workaround patches
//! - Git operations (restore, snapshot, clone)
//! - Driver integration into the drivers manifests

pub mod git;
pub mod integrator;
pub mod patcher;
pub mod toolchain;
pub mod version;

pub use git::{GitError, GitManager};
pub use integrator::{integrate, Integration};
pub use patcher::{MatchedCandidate, PatchGuard, PatchRecord, TextPatch};
pub use toolchain::{ToolchainLocation, ToolchainLocator};
pub use version::{compare_kernel_version, compare_versions, extract_kernel_version};
