//! Kernel build backend selection.
//!
//! Trees that still ship `build/build.sh` are built with the legacy script;
//! everything else goes through the hermetic `tools/bazel` build. The bazel
//! flag vocabulary changed at 6.12, so the destination flag and LTO mode are
//! picked from the branch version.

use crate::error::{ConfigError, Result};
use crate::kernel::version::compare_kernel_version;
use crate::models::{BuildConfig, BuildType};
use crate::orchestrator::executor::{BuildEnvironment, Invocation, ToolRunner};
use std::cmp::Ordering;
use std::path::Path;

/// Legacy entry point, relative to the kernel root
pub const LEGACY_BUILD_SCRIPT: &str = "build/build.sh";

/// Bazel wrapper, relative to the kernel root
pub const MODERN_BUILD_TOOL: &str = "tools/bazel";

/// First kernel version built with `--lto=none --destdir`
pub const DESTDIR_MIN_VERSION: &str = "6.12";

const LEGACY_CC: &str = "/usr/bin/ccache clang";
const LEGACY_LTO: &str = "thin";

/// The two kernel build procedures
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backend {
    /// `bash build/build.sh`
    Legacy,
    /// `tools/bazel run`
    Modern,
}

impl Backend {
    /// Legacy if and only if the legacy entry script exists
    pub fn detect(kernel_source: &Path) -> Self {
        if kernel_source.join(LEGACY_BUILD_SCRIPT).exists() {
            Backend::Legacy
        } else {
            Backend::Modern
        }
    }
}

/// Flags that differ between bazel kernel build generations
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ModernFlags {
    pub lto: &'static str,
    pub dest_flag: &'static str,
}

impl ModernFlags {
    pub fn for_version(kernel_version: &str) -> std::result::Result<Self, ConfigError> {
        let flags = match compare_kernel_version(kernel_version, DESTDIR_MIN_VERSION)? {
            Ordering::Less => ModernFlags {
                lto: "--lto=thin",
                dest_flag: "--dist_dir",
            },
            Ordering::Equal | Ordering::Greater => ModernFlags {
                lto: "--lto=none",
                dest_flag: "--destdir",
            },
        };
        Ok(flags)
    }
}

/// Bazel target for the build type and architecture
pub fn modern_target(config: &BuildConfig) -> String {
    match config.build_type() {
        BuildType::Avd => format!(
            "//common-modules/virtual-device:virtual_device_{}_dist",
            config.arch()
        ),
        BuildType::Gki => format!("//common:kernel_{}_dist", config.arch()),
    }
}

/// `BUILD_CONFIG` for the legacy script: the override, or the GKI config for the arch
pub fn legacy_build_config(config: &BuildConfig) -> String {
    config
        .legacy_config()
        .map(str::to_string)
        .unwrap_or_else(|| format!("common/build.config.gki.{}", config.arch()))
}

/// Compose the kernel build invocation for `backend`
pub fn invocation(
    backend: Backend,
    config: &BuildConfig,
    disk_cache: &str,
    base_env: BuildEnvironment,
) -> std::result::Result<Invocation, ConfigError> {
    let out = config.output_dir().display().to_string();

    let invocation = match backend {
        Backend::Legacy => {
            let env = base_env
                .with("BUILD_CONFIG", legacy_build_config(config))
                .with("CC", LEGACY_CC)
                .with("DIST_DIR", out)
                .with("LTO", LEGACY_LTO);
            Invocation::new("bash", config.kernel_source())
                .arg(LEGACY_BUILD_SCRIPT)
                .env(env)
        }
        Backend::Modern => {
            let flags = ModernFlags::for_version(config.kernel_version())?;
            let bazel = config.kernel_source().join(MODERN_BUILD_TOOL);
            Invocation::new(bazel.display().to_string(), config.kernel_source())
                .args([
                    "run".to_string(),
                    format!("--disk_cache={}", disk_cache),
                    "--config=fast".to_string(),
                    "--config=stamp".to_string(),
                    "--verbose_failures".to_string(),
                    flags.lto.to_string(),
                    modern_target(config),
                    "--".to_string(),
                    format!("{}={}", flags.dest_flag, out),
                ])
                .env(base_env)
        }
    };
    Ok(invocation)
}

/// Build the kernel with whichever backend the tree supports
pub async fn build_kernel<R: ToolRunner>(
    runner: &R,
    config: &BuildConfig,
    disk_cache: &str,
) -> Result<Backend> {
    let backend = Backend::detect(config.kernel_source());
    log::info!(
        "[Backend] Building kernel {} with {:?} backend",
        config.kernel_version(),
        backend
    );

    let invocation = invocation(backend, config, disk_cache, BuildEnvironment::inherited())?;
    runner.run(&invocation).await?;

    log::info!("[Backend] Kernel build finished");
    Ok(backend)
}
