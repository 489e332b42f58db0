//! Settings file loader.
//!
//! Settings are optional. Every key in the TOML file overrides a built-in
//! default; `clang_versions` entries are merged into the built-in table.

use crate::error::ConfigError;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

/// Default bazel disk cache used by the modern backend
pub const DEFAULT_DISK_CACHE: &str = "/home/runner/.cache/bazel";

/// Packaging repository cloned next to GKI kernel images
pub const DEFAULT_ANYKERNEL_URL: &str = "https://github.com/Kernel-SU/AnyKernel3";

/// Candidate base directories for prebuilt toolchains, in priority order
pub const DEFAULT_TOOLCHAIN_BASE_DIRS: &[&str] = &["prebuilts", "prebuilts-master"];

/// Kernel branch → clang revision, as listed in each branch's build.config.constants
pub const DEFAULT_CLANG_VERSIONS: &[(&str, &str)] = &[
    ("android12-5.10", "r416183b"),
    ("android-14-6.1", "r487747"),
    ("android-15-6.6-a64", "r510928"),
    ("android-15-6.6-x64", "r510928"),
    ("android-16.1-6.12", "r536225"),
];

/// Resolved builder settings
#[derive(Debug, Clone, PartialEq)]
pub struct Settings {
    pub disk_cache: String,
    pub anykernel_url: String,
    pub toolchain_base_dirs: Vec<String>,
    pub clang_versions: BTreeMap<String, String>,
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            disk_cache: DEFAULT_DISK_CACHE.to_string(),
            anykernel_url: DEFAULT_ANYKERNEL_URL.to_string(),
            toolchain_base_dirs: DEFAULT_TOOLCHAIN_BASE_DIRS
                .iter()
                .map(|s| s.to_string())
                .collect(),
            clang_versions: DEFAULT_CLANG_VERSIONS
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        }
    }
}

/// On-disk shape: everything optional
#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct SettingsFile {
    disk_cache: Option<String>,
    anykernel_url: Option<String>,
    toolchain_base_dirs: Option<Vec<String>>,
    clang_versions: BTreeMap<String, String>,
}

impl Settings {
    fn merge(mut self, file: SettingsFile) -> Self {
        if let Some(cache) = file.disk_cache {
            self.disk_cache = cache;
        }
        if let Some(url) = file.anykernel_url {
            self.anykernel_url = url;
        }
        if let Some(dirs) = file.toolchain_base_dirs {
            self.toolchain_base_dirs = dirs;
        }
        self.clang_versions.extend(file.clang_versions);
        self
    }
}

/// Per-user settings path: ~/.config/ksu-kbuild/settings.toml
pub fn get_global_settings_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("ksu-kbuild").join("settings.toml"))
}

/// Parse settings from TOML text, merged over the defaults.
pub fn parse_settings(content: &str) -> Result<Settings, ConfigError> {
    let file: SettingsFile =
        toml::from_str(content).map_err(|e| ConfigError::InvalidSettings(e.to_string()))?;

    if let Some(dirs) = &file.toolchain_base_dirs {
        if dirs.is_empty() {
            return Err(ConfigError::InvalidSettings(
                "toolchain_base_dirs must not be empty".to_string(),
            ));
        }
    }

    Ok(Settings::default().merge(file))
}

/// Load settings.
///
/// An explicit path must exist. Without one, the per-user settings file is
/// used when present, otherwise the built-in defaults.
pub fn load_settings(path: Option<&Path>) -> Result<Settings, ConfigError> {
    let path = match path {
        Some(p) => {
            if !p.exists() {
                return Err(ConfigError::PathNotFound(p.to_path_buf()));
            }
            p.to_path_buf()
        }
        None => match get_global_settings_path() {
            Some(p) if p.exists() => p,
            _ => {
                log::debug!("[Config] No settings file, using built-in defaults");
                return Ok(Settings::default());
            }
        },
    };

    log::info!("[Config] Loading settings from {}", path.display());
    let content = fs::read_to_string(&path)?;
    parse_settings(&content)
}
