use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use log::LevelFilter;

use ksu_kbuild::bootimg::needs_prebuilt_ramdisk;
use ksu_kbuild::{
    AssemblerTools, BootImageAssembler, BuildError, Compressor, ConfigError, LogCollector,
    ProcessRunner,
};

/// Create boot images for KernelSU.
#[derive(Debug, Parser)]
#[command(name = "ksu-bootimg", version, about)]
struct Cli {
    /// Android version tag, e.g. a12 or a13
    #[arg(long)]
    android_version: String,

    /// gzip executable; compress in process when omitted
    #[arg(long)]
    gzip: Option<PathBuf>,

    /// mkbootimg executable
    #[arg(long)]
    mkbootimg: PathBuf,

    /// avbtool executable
    #[arg(long)]
    avbtool: PathBuf,

    /// unpack_bootimg executable (required for a12)
    #[arg(long)]
    unpack_bootimg: Option<PathBuf>,

    /// AVB signing key
    #[arg(long)]
    avb_key: PathBuf,

    /// Directory holding the Image* directories
    #[arg(long, default_value = ".")]
    workdir: PathBuf,

    /// Also write logs to a session file in this directory
    #[arg(long)]
    log_dir: Option<PathBuf>,

    /// Debug-level logging
    #[arg(long)]
    verbose: bool,
}

async fn run(cli: Cli) -> ksu_kbuild::Result<()> {
    if needs_prebuilt_ramdisk(&cli.android_version) && cli.unpack_bootimg.is_none() {
        return Err(ConfigError::InvalidValue {
            field: "unpack-bootimg".to_string(),
            value: format!("required for Android version {}", cli.android_version),
        }
        .into());
    }

    let tools = AssemblerTools {
        gzip: cli.gzip.map_or(Compressor::Builtin, Compressor::External),
        mkbootimg: cli.mkbootimg,
        avbtool: cli.avbtool,
        unpack_bootimg: cli.unpack_bootimg,
        avb_key: cli.avb_key,
    };
    let runner = ProcessRunner;
    let assembler = BootImageAssembler::new(&runner, &tools, &cli.android_version);

    tokio::select! {
        result = assembler.run(&cli.workdir) => {
            let uploads = result?;
            log::info!("[Main] {} boot image(s) ready for upload", uploads.len());
            Ok(())
        }
        _ = tokio::signal::ctrl_c() => {
            log::warn!("[Main] Interrupted");
            Err(BuildError::Interrupted.into())
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let level = if cli.verbose { LevelFilter::Debug } else { LevelFilter::Info };
    let collector = match LogCollector::new(cli.log_dir.as_deref(), "bootimg", level) {
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
        Err(e) => ExitCode::from(u8::try_from(e.exit_code()).unwrap_or(1)),
    }
}
