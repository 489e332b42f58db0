//! Input validation and BuildConfig construction.

use crate::error::ConfigError;
use crate::models::{Arch, BuildConfig, BuildMode, BuildType};
use std::fs;
use std::path::{Path, PathBuf};

/// Raw, unvalidated build inputs as they come off the command line
#[derive(Debug, Clone)]
pub struct BuildInputs {
    pub arch: Arch,
    pub build_type: BuildType,
    pub build_mode: BuildMode,
    pub debug: bool,
    pub kernel_version: String,
    pub workspace: PathBuf,
    pub kernel_source: PathBuf,
    pub module_source: PathBuf,
    pub outpath: PathBuf,
    pub legacy_config: Option<String>,
}

/// Resolve `target` against `base`.
///
/// Absolute targets are returned unchanged. The base itself must exist.
pub fn path_to_absolute(base: &Path, target: &Path) -> Result<PathBuf, ConfigError> {
    if !base.exists() {
        return Err(ConfigError::PathNotFound(base.to_path_buf()));
    }
    if target.is_absolute() {
        return Ok(target.to_path_buf());
    }
    let joined = base.join(target);
    if joined.is_absolute() {
        Ok(joined)
    } else {
        Ok(std::env::current_dir()?.join(joined))
    }
}

fn existing_dir(base: &Path, target: &Path) -> Result<PathBuf, ConfigError> {
    let path = path_to_absolute(base, target)?;
    if !path.is_dir() {
        return Err(ConfigError::PathNotFound(path));
    }
    Ok(path)
}

/// Validate inputs and build the immutable configuration.
///
/// Returns the configuration together with the top-level output path
/// (`outpath`); the configuration's own output directory is the
/// build-type subdirectory below it, created here.
pub fn build_config(inputs: BuildInputs) -> Result<(BuildConfig, PathBuf), ConfigError> {
    if inputs.kernel_version.trim().is_empty() {
        return Err(ConfigError::InvalidValue {
            field: "kernel-version".to_string(),
            value: inputs.kernel_version,
        });
    }

    let kernel_source = existing_dir(&inputs.workspace, &inputs.kernel_source)?;
    let module_source = existing_dir(&inputs.workspace, &inputs.module_source)?;
    let outpath = path_to_absolute(&inputs.workspace, &inputs.outpath)?;

    let output_dir = outpath.join(inputs.build_type.as_str());
    fs::create_dir_all(&output_dir)?;

    log::info!("[Config] Kernel branch: {}", inputs.kernel_version);
    log::info!("[Config] Kernel source at: {}", kernel_source.display());
    log::info!("[Config] Module source at: {}", module_source.display());
    log::info!("[Config] Build output path is: {}", output_dir.display());

    let config = BuildConfig {
        arch: inputs.arch,
        build_type: inputs.build_type,
        build_mode: inputs.build_mode,
        debug: inputs.debug,
        kernel_version: inputs.kernel_version,
        kernel_source,
        module_source,
        output_dir,
        legacy_config: inputs.legacy_config,
    };
    Ok((config, outpath))
}
