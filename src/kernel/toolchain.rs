//! Prebuilt clang discovery inside an Android kernel checkout.
//!
//! The clang revision is looked up by kernel branch, then checked under each
//! candidate base directory in priority order:
//! `<kernel>/<base>/clang/host/linux-x86/clang-<rev>/bin/clang[.exe]`

use crate::error::ConfigError;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Executable names accepted inside a toolchain bin directory
const CLANG_BINARIES: &[&str] = &["clang", "clang.exe"];

/// A resolved toolchain
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolchainLocation {
    /// Absolute path to the toolchain's `bin` directory
    pub bin_dir: PathBuf,
    /// Clang revision used to find it, e.g. `r536225`
    pub version: String,
}

/// Maps kernel branches to toolchain revisions and finds them on disk
#[derive(Debug, Clone)]
pub struct ToolchainLocator {
    versions: BTreeMap<String, String>,
    base_dirs: Vec<String>,
}

impl ToolchainLocator {
    pub fn new(versions: BTreeMap<String, String>, base_dirs: Vec<String>) -> Self {
        ToolchainLocator {
            versions,
            base_dirs,
        }
    }

    /// Build a locator from loaded settings
    pub fn from_settings(settings: &crate::config::Settings) -> Self {
        Self::new(
            settings.clang_versions.clone(),
            settings.toolchain_base_dirs.clone(),
        )
    }

    /// Look up the clang revision for a kernel branch.
    pub fn toolchain_version(&self, kernel_version: &str) -> Result<&str, ConfigError> {
        match self.versions.get(kernel_version) {
            Some(version) => {
                log::info!(
                    "[Toolchain] Kernel version {} mapped to clang version: {}",
                    kernel_version,
                    version
                );
                Ok(version)
            }
            None => {
                log::error!(
                    "[Toolchain] No clang version mapping found for kernel version: {}",
                    kernel_version
                );
                Err(ConfigError::UnknownToolchainVersion {
                    kernel_version: kernel_version.to_string(),
                    available: self.versions.keys().cloned().collect(),
                })
            }
        }
    }

    /// Candidate bin directories for a revision, in search order
    pub fn candidates(&self, kernel_source: &Path, version: &str) -> Vec<PathBuf> {
        self.base_dirs
            .iter()
            .map(|base| {
                kernel_source
                    .join(base)
                    .join("clang")
                    .join("host")
                    .join("linux-x86")
                    .join(format!("clang-{}", version))
                    .join("bin")
            })
            .collect()
    }

    /// Resolve the toolchain for `kernel_version` under `kernel_source`.
    ///
    /// Returns the first candidate that exists and contains a clang
    /// executable. When none qualifies, the error lists every path checked.
    pub fn locate(
        &self,
        kernel_source: &Path,
        kernel_version: &str,
    ) -> Result<ToolchainLocation, ConfigError> {
        let version = self.toolchain_version(kernel_version)?.to_string();
        let mut checked = Vec::new();

        for bin_dir in self.candidates(kernel_source, &version) {
            checked.push(bin_dir.clone());

            if !bin_dir.is_dir() {
                log::warn!("[Toolchain] Clang path does not exist: {}", bin_dir.display());
                continue;
            }

            if CLANG_BINARIES.iter().any(|name| bin_dir.join(name).exists()) {
                log::info!("[Toolchain] Found prebuilt clang at: {}", bin_dir.display());
                return Ok(ToolchainLocation { bin_dir, version });
            }
            log::warn!("[Toolchain] Clang binary not found in: {}", bin_dir.display());
        }

        log::error!(
            "[Toolchain] Could not find valid prebuilt clang for version {}",
            version
        );
        Err(ConfigError::ToolchainNotFound { version, checked })
    }
}
