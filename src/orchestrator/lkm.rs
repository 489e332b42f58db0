//! Standalone KernelSU loadable module build.
//!
//! Builds `kernelsu.ko` against a configured but unbuilt kernel tree. Two
//! workaround patches are held for the duration of the compile steps and
//! restored when their guards drop, on success, failure or cancellation.

use crate::error::{Result, ValidationError};
use crate::kernel::patcher::{PatchGuard, SKIP_CHECK_EXPORTS, SKIP_CHECK_SYMBOL};
use crate::kernel::toolchain::{ToolchainLocation, ToolchainLocator};
use crate::models::BuildConfig;
use crate::orchestrator::executor::{BuildEnvironment, Invocation, ToolRunner};
use std::fs;
use std::path::{Path, PathBuf};

/// Artifact produced in the module's kernel directory
pub const MODULE_ARTIFACT: &str = "kernelsu.ko";
/// Subdirectory of the build output holding module artifacts
pub const LKM_OUTPUT_DIR: &str = "lkm";

/// File name of the copied module for a kernel branch
pub fn output_name(kernel_version: &str) -> String {
    format!("{}_kernelsu.ko", kernel_version.replace('/', "_"))
}

pub struct ModuleBuildPipeline<'a, R: ToolRunner> {
    runner: &'a R,
    config: &'a BuildConfig,
    locator: &'a ToolchainLocator,
}

impl<'a, R: ToolRunner> ModuleBuildPipeline<'a, R> {
    pub fn new(runner: &'a R, config: &'a BuildConfig, locator: &'a ToolchainLocator) -> Self {
        ModuleBuildPipeline {
            runner,
            config,
            locator,
        }
    }

    /// Environment for every module build step, layered over `base`
    pub fn environment(&self, base: BuildEnvironment, toolchain: &ToolchainLocation) -> BuildEnvironment {
        let arch = self.config.arch();
        base.with("CONFIG_KSU", "m")
            .with("CC", "clang")
            .with("KDIR", self.config.kbuild_dir().display().to_string())
            .with("LLVM", "1")
            .with("LLVM_IAS", "1")
            .prepend_path(&toolchain.bin_dir)
            .with("CLANG_PREBUILT_BIN", toolchain.bin_dir.display().to_string())
            .with("ARCH", arch.kernel_arch())
            .with("CROSS_COMPILE", arch.cross_compile())
    }

    /// Build, copy and strip the module. Returns the stripped copy.
    pub async fn run(&self) -> Result<PathBuf> {
        let kdir = self.config.kbuild_dir();
        let module_dir = self.config.module_kernel_dir();
        log::info!("[LKM] Building LKM in {}", module_dir.display());

        let toolchain = self
            .locator
            .locate(self.config.kernel_source(), self.config.kernel_version())?;
        let env = self.environment(BuildEnvironment::inherited(), &toolchain);
        log::info!("[LKM] KDIR={}", kdir.display());
        log::info!(
            "[LKM] ARCH={} CROSS_COMPILE={}",
            self.config.arch().kernel_arch(),
            self.config.arch().cross_compile()
        );

        log::info!("[LKM] Generating kernel config with gki_defconfig");
        self.runner
            .run(&Invocation::new("make", &kdir).arg("gki_defconfig").env(env.clone()))
            .await?;

        self.build_patched(&kdir, &module_dir, &env).await?;

        let artifact = module_dir.join(MODULE_ARTIFACT);
        if !artifact.is_file() {
            log::error!("[LKM] LKM build failed: {} not found", artifact.display());
            return Err(ValidationError::ArtifactMissing(artifact).into());
        }
        log::info!("[LKM] LKM built successfully: {}", artifact.display());

        let out_dir = self.config.output_dir().join(LKM_OUTPUT_DIR);
        fs::create_dir_all(&out_dir)?;
        let output = out_dir.join(output_name(self.config.kernel_version()));
        fs::copy(&artifact, &output)?;

        log::info!("[LKM] Stripping debug symbols from {}", output.display());
        self.runner
            .run(
                &Invocation::new("llvm-strip", &out_dir)
                    .arg("-d")
                    .arg(output.display().to_string())
                    .env(env),
            )
            .await?;

        let size = fs::metadata(&output)?.len();
        log::info!("[LKM] LKM copied to {} ({} bytes)", output.display(), size);
        Ok(output)
    }

    /// Compile steps under both workaround patches.
    async fn build_patched(&self, kdir: &Path, module_dir: &Path, env: &BuildEnvironment) -> Result<()> {
        let _makefile = PatchGuard::apply(&module_dir.join("Makefile"), &SKIP_CHECK_SYMBOL)?;
        let _modpost = PatchGuard::apply(
            &kdir.join("scripts").join("mod").join("modpost.c"),
            &SKIP_CHECK_EXPORTS,
        )?;

        let in_kdir = |target: &str| Invocation::new("make", kdir).arg(target).env(env.clone());
        let selinux = kdir.join("security").join("selinux").join("include");

        self.runner
            .run_best_effort(&Invocation::new("make", module_dir).arg("clean").env(env.clone()))
            .await;
        self.runner.run(&in_kdir("modules_prepare")).await?;
        self.runner.run(&in_kdir("scripts")).await?;
        self.runner
            .run(
                &Invocation::new("genheaders", kdir)
                    .arg(selinux.join("flask.h").display().to_string())
                    .arg(selinux.join("av_permissions.h").display().to_string())
                    .env(env.clone()),
            )
            .await?;
        self.runner
            .run(&Invocation::new("make", module_dir).env(env.clone()))
            .await?;
        self.runner
            .run_best_effort(&Invocation::new("ls", module_dir).arg("-al").env(env.clone()))
            .await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_output_name_is_filesystem_safe() {
        assert_eq!(output_name("android-16.1-6.12"), "android-16.1-6.12_kernelsu.ko");
        assert_eq!(output_name("refs/heads/android14-6.1"), "refs_heads_android14-6.1_kernelsu.ko");
    }
}
