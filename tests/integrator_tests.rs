mod common;

use common::{Workspace, DRIVERS_KCONFIG, DRIVERS_MAKEFILE};
use ksu_kbuild::config::build_config;
use ksu_kbuild::kernel::{integrate, Integration};
use ksu_kbuild::{BuildMode, BuildType};
use std::fs;

fn read(path: &std::path::Path) -> String {
    fs::read_to_string(path).unwrap()
}

#[test]
fn test_integrate_links_and_wires_manifests() {
    let ws = Workspace::new();
    let (config, _) = ws.config(BuildMode::Gki, BuildType::Gki);

    assert_eq!(integrate(&config).unwrap(), Integration::Linked);

    let drivers = ws.kdir().join("drivers");
    let link = drivers.join("kernelsu");
    assert!(fs::symlink_metadata(&link).unwrap().file_type().is_symlink());
    assert_eq!(fs::read_link(&link).unwrap(), ws.module_kernel());

    assert_eq!(
        read(&drivers.join("Makefile")),
        format!("{}\nobj-$(CONFIG_KSU) += kernelsu/\n", DRIVERS_MAKEFILE)
    );
    assert_eq!(
        read(&drivers.join("Kconfig")),
        "menu \"Device Drivers\"\n\
source \"drivers/base/Kconfig\"\n\
source \"drivers/usb/Kconfig\"\n\
source \"drivers/kernelsu/Kconfig\"\n\
endmenu\n"
    );
}

#[test]
fn test_integrate_is_idempotent() {
    let ws = Workspace::new();
    let (config, _) = ws.config(BuildMode::Gki, BuildType::Gki);
    let drivers = ws.kdir().join("drivers");

    integrate(&config).unwrap();
    let makefile = read(&drivers.join("Makefile"));
    let kconfig = read(&drivers.join("Kconfig"));

    assert_eq!(integrate(&config).unwrap(), Integration::AlreadyPresent);
    assert_eq!(read(&drivers.join("Makefile")), makefile);
    assert_eq!(read(&drivers.join("Kconfig")), kconfig);
}

#[cfg(unix)]
#[test]
fn test_dangling_link_counts_as_present() {
    let ws = Workspace::new();
    let (config, _) = ws.config(BuildMode::Gki, BuildType::Gki);
    let drivers = ws.kdir().join("drivers");
    std::os::unix::fs::symlink(ws.root().join("gone"), drivers.join("kernelsu")).unwrap();

    assert_eq!(integrate(&config).unwrap(), Integration::AlreadyPresent);
    assert_eq!(read(&drivers.join("Makefile")), DRIVERS_MAKEFILE);
    assert_eq!(read(&drivers.join("Kconfig")), DRIVERS_KCONFIG);
}

#[test]
fn test_existing_wiring_not_duplicated() {
    let ws = Workspace::new();
    let drivers = ws.kdir().join("drivers");
    let wired = format!("{}obj-$(CONFIG_KSU) += kernelsu/\n", DRIVERS_MAKEFILE);
    fs::write(drivers.join("Makefile"), &wired).unwrap();
    let (config, _) = ws.config(BuildMode::Gki, BuildType::Gki);

    integrate(&config).unwrap();
    assert_eq!(read(&drivers.join("Makefile")), wired);
}

#[cfg(unix)]
#[test]
fn test_debug_flag_appended_once() {
    let ws = Workspace::new();
    let mut inputs = ws.inputs(BuildMode::Gki, BuildType::Gki);
    inputs.debug = true;
    let (config, _) = build_config(inputs).unwrap();
    let kbuild = ws.module_kernel().join("Kbuild");

    integrate(&config).unwrap();
    assert!(read(&kbuild).ends_with("\nccflags-y += -DCONFIG_KSU_DEBUG\n"));

    // A fresh tree pointing at the same module source
    fs::remove_file(ws.kdir().join("drivers/kernelsu")).unwrap();
    integrate(&config).unwrap();
    assert_eq!(read(&kbuild).matches("-DCONFIG_KSU_DEBUG").count(), 1);
}
