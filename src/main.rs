use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use log::LevelFilter;

use ksu_kbuild::config::{self, BuildInputs};
use ksu_kbuild::orchestrator::reporter::reporter_for;
use ksu_kbuild::{
    AppError, Arch, BuildError, BuildMode, BuildOrchestrator, BuildType, LogCollector,
    ProcessRunner,
};

/// Build Kernel / LKM for KernelSU.
#[derive(Debug, Parser)]
#[command(name = "ksu-kbuild", version, about)]
struct Cli {
    /// Target architecture
    #[arg(long, value_enum)]
    arch: Arch,

    /// Kernel flavour to build
    #[arg(long, value_enum)]
    buildtype: BuildType,

    /// Stages to run
    #[arg(long, value_enum)]
    buildmode: BuildMode,

    /// BUILD_CONFIG for trees built with build/build.sh
    #[arg(long)]
    build_legacy_cfg: Option<String>,

    /// Enable KernelSU debug features
    #[arg(long)]
    debug: bool,

    /// Append build outputs as key=value lines to this file
    #[arg(long)]
    github_env_file: Option<PathBuf>,

    /// Output directory, relative to the workspace
    #[arg(long, default_value = "KernelSUbuild")]
    outpath: PathBuf,

    /// Android kernel checkout, relative to the workspace
    #[arg(long)]
    kernel_source_path: PathBuf,

    /// KernelSU checkout, relative to the workspace
    #[arg(long)]
    ksu_source_path: PathBuf,

    /// Kernel branch, e.g. android-16.1-6.12
    #[arg(long)]
    kernel_version: String,

    /// Root that relative paths are resolved against
    #[arg(long)]
    workspace: PathBuf,

    /// Settings file (defaults to the per-user config file when present)
    #[arg(long)]
    settings: Option<PathBuf>,

    /// Also write logs to a session file in this directory
    #[arg(long)]
    log_dir: Option<PathBuf>,

    /// Debug-level logging
    #[arg(long)]
    verbose: bool,
}

async fn run(cli: Cli) -> ksu_kbuild::Result<()> {
    let settings = config::load_settings(cli.settings.as_deref())?;
    let reporter = reporter_for(cli.github_env_file.as_deref());

    let (build_config, outpath) = config::build_config(BuildInputs {
        arch: cli.arch,
        build_type: cli.buildtype,
        build_mode: cli.buildmode,
        debug: cli.debug,
        kernel_version: cli.kernel_version,
        workspace: cli.workspace,
        kernel_source: cli.kernel_source_path,
        module_source: cli.ksu_source_path,
        outpath: cli.outpath,
        legacy_config: cli.build_legacy_cfg,
    })?;

    let runner = ProcessRunner;
    let orchestrator =
        BuildOrchestrator::new(&runner, &build_config, &settings, reporter.as_ref(), outpath);

    // Dropping the pipeline on Ctrl-C unwinds every patch guard it holds.
    tokio::select! {
        result = orchestrator.run() => {
            let summary = result?;
            log::info!("[Main] Build finished: {:?}", summary);
            Ok(())
        }
        _ = tokio::signal::ctrl_c() => {
            log::warn!("[Main] Interrupted, restoring patched files");
            Err(BuildError::Interrupted.into())
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let level = if cli.verbose { LevelFilter::Debug } else { LevelFilter::Info };
    let collector = match LogCollector::new(cli.log_dir.as_deref(), "kbuild", level) {
        Ok(collector) => collector,
        Err(e) => {
            eprintln!("[Main] ERROR: LogCollector initialization failed: {}", e);
            return ExitCode::FAILURE;
        }
    };
    if let Err(e) = collector.install() {
        eprintln!("[Main] WARNING: {}", e);
    }

    let result = run(cli).await;
    if let Err(e) = &result {
        log::error!("[Main] {}", e);
    }
    let _ = collector.flush_blocking();

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => exit_code(&e),
    }
}

fn exit_code(e: &AppError) -> ExitCode {
    ExitCode::from(u8::try_from(e.exit_code()).unwrap_or(1))
}
