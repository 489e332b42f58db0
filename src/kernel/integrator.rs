//! Links the KernelSU driver into an Android kernel tree.
//!
//! The mutations made here persist as part of the prepared tree; they are
//! snapshotted into a commit afterwards rather than reverted.

use crate::error::BuildError;
use crate::models::BuildConfig;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::Path;

/// Driver directory relative to the kernel root
pub const KERNEL_DRIVERS_REL_PATH: &str = "common/drivers";
/// Name of the linked driver inside the drivers directory
pub const KSU_DRIVER_NAME: &str = "kernelsu";

const MAKEFILE_WIRING: &str = "\nobj-$(CONFIG_KSU) += kernelsu/\n";
const KCONFIG_SOURCE: &str = "source \"drivers/kernelsu/Kconfig\"\n";
const DEBUG_CCFLAGS: &str = "ccflags-y += -DCONFIG_KSU_DEBUG";

/// What [`integrate`] did to the tree
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Integration {
    /// Driver linked and manifests updated
    Linked,
    /// A driver entry was already present; nothing was touched
    AlreadyPresent,
}

/// Link the module's `kernel/` directory into `common/drivers/kernelsu` and
/// wire it into the drivers Makefile and Kconfig.
pub fn integrate(config: &BuildConfig) -> Result<Integration, BuildError> {
    let drivers_dir = config.kernel_source().join(KERNEL_DRIVERS_REL_PATH);
    let driver_path = drivers_dir.join(KSU_DRIVER_NAME);

    // symlink_metadata so a dangling link still counts as present
    if fs::symlink_metadata(&driver_path).is_ok() {
        log::warn!(
            "[Integrator] Found ksu driver at {}, skipping setup",
            driver_path.display()
        );
        return Ok(Integration::AlreadyPresent);
    }

    log::info!(
        "[Integrator] Linking KernelSU driver to {}",
        drivers_dir.display()
    );
    link_dir(&config.module_kernel_dir(), &driver_path)?;

    log::info!("[Integrator] Adding KernelSU driver to Makefile");
    wire_makefile(&drivers_dir.join("Makefile"))?;

    log::info!("[Integrator] Adding KernelSU driver to Kconfig");
    wire_kconfig(&drivers_dir.join("Kconfig"))?;

    if config.debug() {
        log::info!("[Integrator] Enabling debug features for KernelSU");
        enable_debug(&config.module_kernel_dir().join("Kbuild"))?;
    }

    log::info!("[Integrator] KernelSU setup done");
    Ok(Integration::Linked)
}

#[cfg(unix)]
fn link_dir(source: &Path, link: &Path) -> std::io::Result<()> {
    std::os::unix::fs::symlink(source, link)
}

#[cfg(windows)]
fn link_dir(source: &Path, link: &Path) -> std::io::Result<()> {
    std::os::windows::fs::symlink_dir(source, link)
}

fn append(path: &Path, text: &str) -> std::io::Result<()> {
    let mut file = OpenOptions::new().append(true).open(path)?;
    file.write_all(text.as_bytes())
}

fn wire_makefile(path: &Path) -> std::io::Result<()> {
    let content = fs::read_to_string(path)?;
    if content.contains(KSU_DRIVER_NAME) {
        log::info!("[Integrator] Makefile already references kernelsu");
        return Ok(());
    }
    append(path, MAKEFILE_WIRING)
}

fn wire_kconfig(path: &Path) -> std::io::Result<()> {
    let content = fs::read_to_string(path)?;
    if let Some(updated) = insert_before_last_endmenu(&content) {
        fs::write(path, updated)?;
    }
    Ok(())
}

/// Insert the kernelsu `source` line before the last `endmenu`.
///
/// `None` when any line already mentions kernelsu or there is no `endmenu`.
fn insert_before_last_endmenu(content: &str) -> Option<String> {
    let lines: Vec<&str> = content.split_inclusive('\n').collect();
    if lines.iter().any(|line| line.contains(KSU_DRIVER_NAME)) {
        return None;
    }

    let Some(pos) = lines.iter().rposition(|line| line.trim() == "endmenu") else {
        log::warn!("[Integrator] No endmenu marker in Kconfig, leaving it unchanged");
        return None;
    };

    let mut out = String::with_capacity(content.len() + KCONFIG_SOURCE.len());
    for line in &lines[..pos] {
        out.push_str(line);
    }
    out.push_str(KCONFIG_SOURCE);
    for line in &lines[pos..] {
        out.push_str(line);
    }
    Some(out)
}

fn enable_debug(kbuild: &Path) -> std::io::Result<()> {
    let content = fs::read_to_string(kbuild)?;
    if content.contains(DEBUG_CCFLAGS) {
        log::warn!(
            "[Integrator] {} already defines CONFIG_KSU_DEBUG, not appending again",
            kbuild.display()
        );
        return Ok(());
    }
    append(kbuild, &format!("\n{}\n", DEBUG_CCFLAGS))
}
