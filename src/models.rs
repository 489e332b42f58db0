//! Core data structures shared by the build driver and the boot image assembler.

use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};

/// Target CPU architecture
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum Arch {
    #[value(name = "aarch64")]
    Aarch64,
    #[value(name = "x86_64")]
    X86_64,
}

impl Arch {
    pub fn as_str(&self) -> &'static str {
        match self {
            Arch::Aarch64 => "aarch64",
            Arch::X86_64 => "x86_64",
        }
    }

    /// Value of `ARCH` for kbuild
    pub fn kernel_arch(&self) -> &'static str {
        match self {
            Arch::Aarch64 => "arm64",
            Arch::X86_64 => "x86_64",
        }
    }

    /// Value of `CROSS_COMPILE` for kbuild
    pub fn cross_compile(&self) -> &'static str {
        match self {
            Arch::Aarch64 => "aarch64-linux-gnu-",
            Arch::X86_64 => "x86_64-linux-gnu-",
        }
    }
}

impl fmt::Display for Arch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Kernel flavour to build
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum BuildType {
    /// Generic Kernel Image
    Gki,
    /// Android virtual device kernel
    Avd,
}

impl BuildType {
    pub fn as_str(&self) -> &'static str {
        match self {
            BuildType::Gki => "gki",
            BuildType::Avd => "avd",
        }
    }
}

impl fmt::Display for BuildType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which stages to run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum BuildMode {
    /// Integrate the driver and build the full kernel
    Gki,
    /// Build only the loadable module
    Lkm,
    /// Build the loadable module, then the full kernel
    #[value(name = "lkm-gki")]
    LkmGki,
}

impl BuildMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            BuildMode::Gki => "gki",
            BuildMode::Lkm => "lkm",
            BuildMode::LkmGki => "lkm-gki",
        }
    }

    pub fn builds_module(&self) -> bool {
        matches!(self, BuildMode::Lkm | BuildMode::LkmGki)
    }

    pub fn builds_kernel(&self) -> bool {
        matches!(self, BuildMode::Gki | BuildMode::LkmGki)
    }
}

impl fmt::Display for BuildMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Immutable build configuration.
///
/// Only [`crate::config::validator::build_config`] constructs this, after every
/// path has been made absolute and checked. Fields are private so the value
/// stays read-only once built.
#[derive(Debug, Clone)]
pub struct BuildConfig {
    pub(crate) arch: Arch,
    pub(crate) build_type: BuildType,
    pub(crate) build_mode: BuildMode,
    pub(crate) debug: bool,
    pub(crate) kernel_version: String,
    pub(crate) kernel_source: PathBuf,
    pub(crate) module_source: PathBuf,
    pub(crate) output_dir: PathBuf,
    pub(crate) legacy_config: Option<String>,
}

impl BuildConfig {
    pub fn arch(&self) -> Arch {
        self.arch
    }

    pub fn build_type(&self) -> BuildType {
        self.build_type
    }

    pub fn build_mode(&self) -> BuildMode {
        self.build_mode
    }

    pub fn debug(&self) -> bool {
        self.debug
    }

    /// Kernel branch identifier, e.g. `android-16.1-6.12`
    pub fn kernel_version(&self) -> &str {
        &self.kernel_version
    }

    pub fn kernel_source(&self) -> &Path {
        &self.kernel_source
    }

    pub fn module_source(&self) -> &Path {
        &self.module_source
    }

    /// Per-build-type output directory (`<outpath>/gki` or `<outpath>/avd`)
    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    pub fn legacy_config(&self) -> Option<&str> {
        self.legacy_config.as_deref()
    }

    /// `<kernel>/common`, the kbuild tree used by every make invocation
    pub fn kbuild_dir(&self) -> PathBuf {
        self.kernel_source.join("common")
    }

    /// `<module>/kernel`, the kernel-facing part of the module source
    pub fn module_kernel_dir(&self) -> PathBuf {
        self.module_source.join("kernel")
    }
}
