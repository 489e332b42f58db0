//! Build Orchestration: the build-mode driver.
//!
//! `lkm` builds the loadable module only. `gki` integrates the driver,
//! snapshots the tree, builds the kernel and, for GKI builds, packages it.
//! `lkm-gki` runs the module build first, then the `gki` sequence.

pub mod backend;
pub mod executor;
pub mod lkm;
pub mod reporter;

pub use backend::Backend;
pub use executor::{BuildEnvironment, Invocation, ProcessRunner, ToolOutput, ToolRunner};
pub use lkm::ModuleBuildPipeline;
pub use reporter::{GithubEnvReporter, NoopReporter, OutputReporter};

use crate::config::Settings;
use crate::error::{BuildError, Result, ValidationError};
use crate::kernel::git::GitManager;
use crate::kernel::integrator::{self, Integration};
use crate::kernel::toolchain::ToolchainLocator;
use crate::models::{BuildConfig, BuildType};
use std::fs;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// Major version folded into the module version code
pub const KSU_VER_MAJOR: usize = 3;

const SNAPSHOT_MESSAGE: &str = "Add KernelSU";
const BOT_NAME: &str = "KernelSUBot";
const BOT_EMAIL: &str = "bot@kernelsu.org";
const ANYKERNEL_DIR: &str = "AnyKernel3";

/// Version code for a module repository with `commit_count` commits
pub fn ksu_version_code(commit_count: usize) -> usize {
    commit_count + 10000 * KSU_VER_MAJOR
}

/// Count commits in the module repository and derive its version code
pub fn calculate_ksu_version(module_source: &Path) -> std::result::Result<usize, BuildError> {
    let count = GitManager::discover(module_source)?.commit_count()?;
    let version = ksu_version_code(count);
    log::info!("[Build] KernelSU version code: {}", version);
    Ok(version)
}

/// What a run produced
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BuildSummary {
    pub ksu_version: usize,
    pub module: Option<PathBuf>,
    pub backend: Option<Backend>,
    pub anykernel: Option<PathBuf>,
}

pub struct BuildOrchestrator<'a, R: ToolRunner> {
    runner: &'a R,
    config: &'a BuildConfig,
    settings: &'a Settings,
    reporter: &'a dyn OutputReporter,
    outpath: PathBuf,
}

impl<'a, R: ToolRunner> BuildOrchestrator<'a, R> {
    pub fn new(
        runner: &'a R,
        config: &'a BuildConfig,
        settings: &'a Settings,
        reporter: &'a dyn OutputReporter,
        outpath: impl Into<PathBuf>,
    ) -> Self {
        BuildOrchestrator {
            runner,
            config,
            settings,
            reporter,
            outpath: outpath.into(),
        }
    }

    /// Run every stage selected by the build mode, in order.
    pub async fn run(&self) -> Result<BuildSummary> {
        let mut summary = BuildSummary {
            ksu_version: calculate_ksu_version(self.config.module_source())?,
            ..BuildSummary::default()
        };
        self.reporter
            .record("ksu_version", &summary.ksu_version.to_string())?;

        let mode = self.config.build_mode();
        log::info!("[Build] Build mode: {}", mode);

        if mode.builds_module() {
            log::info!("[Build] ===== Build KernelSU LKM =====");
            let locator = ToolchainLocator::from_settings(self.settings);
            let pipeline = ModuleBuildPipeline::new(self.runner, self.config, &locator);
            summary.module = Some(pipeline.run().await?);
        }

        if mode.builds_kernel() {
            log::info!("[Build] ===== Setup KernelSU =====");
            self.setup_kernelsu().await?;

            log::info!("[Build] ===== Make working directory clean =====");
            self.snapshot_workspace().await?;

            log::info!("[Build] ===== Build kernel =====");
            let backend =
                backend::build_kernel(self.runner, self.config, &self.settings.disk_cache).await?;
            summary.backend = Some(backend);

            if self.config.build_type() == BuildType::Gki {
                log::info!("[Build] ===== Prepare GKI kernel artifacts =====");
                summary.anykernel = Some(package_anykernel(
                    self.config.output_dir(),
                    &self.settings.anykernel_url,
                )?);
            }
        }

        log_output_tree(&self.outpath)?;
        Ok(summary)
    }

    async fn setup_kernelsu(&self) -> Result<()> {
        if integrator::integrate(self.config)? == Integration::Linked {
            self.repo_status().await;
        }
        Ok(())
    }

    /// Commit the integrated tree so the kernel build sees a clean checkout.
    async fn snapshot_workspace(&self) -> Result<()> {
        let git = GitManager::discover(self.config.kbuild_dir()).map_err(BuildError::from)?;
        git.commit_all(SNAPSHOT_MESSAGE, BOT_NAME, BOT_EMAIL)
            .map_err(BuildError::from)?;
        self.repo_status().await;
        Ok(())
    }

    async fn repo_status(&self) {
        let status = Invocation::new("repo", self.config.kernel_source()).arg("status");
        self.runner.run_best_effort(&status).await;
    }
}

/// Clone the AnyKernel3 template into `<out>/AnyKernel3` and drop `Image` in.
pub fn package_anykernel(out: &Path, url: &str) -> Result<PathBuf> {
    let image = out.join("Image");
    if !image.is_file() {
        log::error!("[Build] Kernel image missing: {}", image.display());
        return Err(ValidationError::ArtifactMissing(image).into());
    }

    let target = out.join(ANYKERNEL_DIR);
    if target.exists() {
        fs::remove_dir_all(&target)?;
    }
    GitManager::clone(url, &target).map_err(BuildError::from)?;

    let dot_git = target.join(".git");
    if dot_git.exists() {
        fs::remove_dir_all(&dot_git)?;
    }
    fs::copy(&image, target.join("Image"))?;
    log::info!("[Build] AnyKernel3 prepared at {}", target.display());
    Ok(target)
}

/// Every regular file below `root` with its size, sorted by path
pub fn collect_output_tree(root: &Path) -> std::io::Result<Vec<(PathBuf, u64)>> {
    let mut files = Vec::new();
    for entry in WalkDir::new(root) {
        let entry = entry?;
        if !entry.file_type().is_file() {
            continue;
        }
        let size = entry.metadata()?.len();
        let rel = entry
            .path()
            .strip_prefix(root)
            .map(Path::to_path_buf)
            .unwrap_or_else(|_| entry.path().to_path_buf());
        files.push((rel, size));
    }
    files.sort();
    Ok(files)
}

fn human_size(bytes: u64) -> String {
    const UNITS: &[&str] = &["B", "K", "M", "G"];
    let mut size = bytes as f64;
    let mut unit = 0;
    while size >= 1024.0 && unit < UNITS.len() - 1 {
        size /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{}{}", bytes, UNITS[0])
    } else {
        format!("{:.1}{}", size, UNITS[unit])
    }
}

fn log_output_tree(root: &Path) -> std::io::Result<()> {
    log::info!("[Build] Output tree below {}:", root.display());
    for (path, size) in collect_output_tree(root)? {
        log::info!("[Build]   [{:>7}] {}", human_size(size), path.display());
    }
    Ok(())
}
