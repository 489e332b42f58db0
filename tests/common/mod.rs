//! Fixtures shared by the integration tests.

#![allow(dead_code)]

use ksu_kbuild::config::{build_config, BuildInputs};
use ksu_kbuild::orchestrator::{Invocation, ToolOutput, ToolRunner};
use ksu_kbuild::{Arch, BuildConfig, BuildError, BuildMode, BuildType};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

pub const KSU_MAKEFILE: &str = "obj-m += kernelsu.o\n\
all: check_symbol\n\
\tmake -C $(KDIR) M=$(PWD) modules\n\
\t./check_symbol kernelsu.ko $(KDIR)/vmlinux \n\
\n\
check_symbol: tools/check_symbol.c\n\
\t$(HOSTCC) -o $@ $<\n\
\n\
clean:\n\
\tmake -C $(KDIR) M=$(PWD) clean\n\
\trm check_symbol\n";

pub const MODPOST_C: &str = "static void check_module(struct module *mod)\n\
{\n\
\tif (!mod->is_vmlinux)\n\
\t\tcheck_exports(mod);   \n\
}\n";

pub const DRIVERS_MAKEFILE: &str = "obj-y += base/\nobj-$(CONFIG_USB) += usb/\n";

pub const DRIVERS_KCONFIG: &str = "menu \"Device Drivers\"\n\
source \"drivers/base/Kconfig\"\n\
source \"drivers/usb/Kconfig\"\n\
endmenu\n";

pub const CLANG_REV: &str = "r536225";

/// Initialize a repository at `dir` with `files` committed
pub fn init_repo(dir: &Path, files: &[(&str, &str)]) -> git2::Repository {
    fs::create_dir_all(dir).expect("Failed to create repo dir");
    let repo = git2::Repository::init(dir).expect("Failed to init repo");
    {
        let mut index = repo.index().expect("Failed to get index");
        for (name, content) in files {
            let path = dir.join(name);
            fs::create_dir_all(path.parent().unwrap()).unwrap();
            fs::write(&path, content).expect("Failed to write file");
            index.add_path(Path::new(name)).expect("Failed to add file");
        }
        index.write().expect("Failed to write index");
        let tree_id = index.write_tree().expect("Failed to write tree");
        let tree = repo.find_tree(tree_id).expect("Failed to find tree");
        let sig = git2::Signature::now("Test User", "test@example.com").unwrap();
        repo.commit(Some("HEAD"), &sig, &sig, "Initial commit", &tree, &[])
            .expect("Failed to commit");
    }
    repo
}

/// A kernel checkout (`kernel/`, with `common/` under git and a prebuilt
/// clang) and a KernelSU checkout (`KernelSU/`, under git) in one workspace.
pub struct Workspace {
    pub dir: tempfile::TempDir,
}

impl Workspace {
    pub fn new() -> Self {
        let dir = tempfile::tempdir().expect("Failed to create temp dir");
        let root = dir.path();

        init_repo(
            &root.join("kernel/common"),
            &[
                ("scripts/mod/modpost.c", MODPOST_C),
                ("drivers/Makefile", DRIVERS_MAKEFILE),
                ("drivers/Kconfig", DRIVERS_KCONFIG),
            ],
        );
        let clang_bin = root
            .join("kernel/prebuilts/clang/host/linux-x86")
            .join(format!("clang-{}", CLANG_REV))
            .join("bin");
        fs::create_dir_all(&clang_bin).unwrap();
        fs::write(clang_bin.join("clang"), "").unwrap();

        init_repo(
            &root.join("KernelSU"),
            &[
                ("kernel/Makefile", KSU_MAKEFILE),
                ("kernel/Kbuild", "obj-$(CONFIG_KSU) += kernelsu.o\n"),
                ("kernel/Kconfig", "config KSU\n\ttristate \"KernelSU\"\n"),
            ],
        );

        Workspace { dir }
    }

    pub fn root(&self) -> &Path {
        self.dir.path()
    }

    pub fn kernel(&self) -> PathBuf {
        self.root().join("kernel")
    }

    pub fn kdir(&self) -> PathBuf {
        self.kernel().join("common")
    }

    pub fn module_kernel(&self) -> PathBuf {
        self.root().join("KernelSU/kernel")
    }

    pub fn clang_bin(&self) -> PathBuf {
        self.kernel()
            .join("prebuilts/clang/host/linux-x86")
            .join(format!("clang-{}", CLANG_REV))
            .join("bin")
    }

    pub fn inputs(&self, mode: BuildMode, build_type: BuildType) -> BuildInputs {
        BuildInputs {
            arch: Arch::Aarch64,
            build_type,
            build_mode: mode,
            debug: false,
            kernel_version: "android-16.1-6.12".to_string(),
            workspace: self.root().to_path_buf(),
            kernel_source: PathBuf::from("kernel"),
            module_source: PathBuf::from("KernelSU"),
            outpath: PathBuf::from("KernelSUbuild"),
            legacy_config: None,
        }
    }

    pub fn config(&self, mode: BuildMode, build_type: BuildType) -> (BuildConfig, PathBuf) {
        build_config(self.inputs(mode, build_type)).expect("Failed to build config")
    }
}

type Predicate = Box<dyn Fn(&Invocation) -> bool + Send + Sync>;
type Hook = Box<dyn Fn(&Invocation) + Send + Sync>;

/// Records invocations instead of running them.
///
/// Every call succeeds unless it matches the failure predicate, in which case
/// it exits with the configured code, or the hang predicate, in which case it
/// never completes.
#[derive(Default)]
pub struct ScriptedRunner {
    calls: Mutex<Vec<Invocation>>,
    failure: Option<(Predicate, i32)>,
    hang: Option<Predicate>,
    hook: Option<Hook>,
}

impl ScriptedRunner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_when(
        mut self,
        predicate: impl Fn(&Invocation) -> bool + Send + Sync + 'static,
        code: i32,
    ) -> Self {
        self.failure = Some((Box::new(predicate), code));
        self
    }

    pub fn hang_when(mut self, predicate: impl Fn(&Invocation) -> bool + Send + Sync + 'static) -> Self {
        self.hang = Some(Box::new(predicate));
        self
    }

    /// Run `hook` on every call before deciding its outcome
    pub fn on_call(mut self, hook: impl Fn(&Invocation) + Send + Sync + 'static) -> Self {
        self.hook = Some(Box::new(hook));
        self
    }

    pub fn calls(&self) -> Vec<Invocation> {
        self.calls.lock().unwrap().clone()
    }

    pub fn command_lines(&self) -> Vec<String> {
        self.calls().iter().map(Invocation::command_line).collect()
    }
}

impl ToolRunner for ScriptedRunner {
    async fn run_unchecked(&self, invocation: &Invocation) -> Result<ToolOutput, BuildError> {
        self.calls.lock().unwrap().push(invocation.clone());
        if let Some(hook) = &self.hook {
            hook(invocation);
        }
        if let Some(hang) = &self.hang {
            if hang(invocation) {
                std::future::pending::<()>().await;
            }
        }
        if let Some((predicate, code)) = &self.failure {
            if predicate(invocation) {
                return Ok(ToolOutput {
                    code: Some(*code),
                    output: format!("{}: scripted failure", invocation.program),
                });
            }
        }
        Ok(ToolOutput {
            code: Some(0),
            output: String::new(),
        })
    }
}

/// The final module compile: bare `make` in the module directory
pub fn is_module_make(invocation: &Invocation) -> bool {
    invocation.program == "make"
        && invocation.args.is_empty()
        && invocation.cwd.ends_with("KernelSU/kernel")
}
