//! Boot image assembly from built kernel images.
//!
//! Every `Image*` directory in the working directory holds one kernel build.
//! For each, boot images are packed from the raw, gzip and lz4 kernels,
//! signed with an AVB hash footer, then gzip-compressed under a name that
//! embeds the directory's suffix so uploads from all directories are distinct.

pub mod ramdisk;

pub use ramdisk::RamdiskSource;

use crate::error::{BuildError, ConfigError, Result, ValidationError};
use crate::orchestrator::collect_output_tree;
use crate::orchestrator::executor::{Invocation, ToolRunner};
use flate2::{Compression, GzBuilder};
use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

/// Directories with kernel images start with this
pub const IMAGE_DIR_PREFIX: &str = "Image";

/// AVB partition size for `boot`
pub const BOOT_PARTITION_SIZE: u64 = 64 * 1024 * 1024;

const HEADER_VERSION: &str = "4";
const AVB_ALGORITHM: &str = "SHA256_RSA2048";
const A12_OS_VERSION: &str = "12.0.0";

/// Kernel image → boot image it is packed into
pub const VARIANTS: &[(&str, &str)] = &[
    ("Image", "boot.img"),
    ("Image.gz", "boot-gz.img"),
    ("Image.lz4", "boot-lz4.img"),
];

/// gzip implementation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Compressor {
    /// An external gzip binary
    External(PathBuf),
    /// In-process gzip, no timestamp or name in the header
    Builtin,
}

impl Compressor {
    /// `gzip -n [-k] -f -9 <file>` in `dir`
    pub async fn compress<R: ToolRunner>(
        &self,
        runner: &R,
        dir: &Path,
        file: &str,
        keep: bool,
    ) -> std::result::Result<PathBuf, BuildError> {
        let output = dir.join(format!("{}.gz", file));
        match self {
            Compressor::External(gzip) => {
                let mut inv = Invocation::new(gzip.display().to_string(), dir).arg("-n");
                if keep {
                    inv = inv.arg("-k");
                }
                runner.run(&inv.args(["-f", "-9", file])).await?;
            }
            Compressor::Builtin => {
                let source = dir.join(file);
                let mut input = BufReader::new(File::open(&source)?);
                let mut encoder =
                    GzBuilder::new().write(BufWriter::new(File::create(&output)?), Compression::best());
                std::io::copy(&mut input, &mut encoder)?;
                encoder.finish()?.flush()?;
                if !keep {
                    fs::remove_file(&source)?;
                }
                log::info!("[Bootimg] Compressed {} in process", source.display());
            }
        }
        Ok(output)
    }
}

/// External tools and signing key for assembly
#[derive(Debug, Clone)]
pub struct AssemblerTools {
    pub gzip: Compressor,
    pub mkbootimg: PathBuf,
    pub avbtool: PathBuf,
    pub unpack_bootimg: Option<PathBuf>,
    pub avb_key: PathBuf,
}

/// Directory name without the `Image-` prefix
pub fn image_suffix(dir_name: &str) -> &str {
    dir_name.strip_prefix("Image-").unwrap_or(dir_name)
}

/// Last `_`-separated token of the suffix, e.g. `2024-03`
pub fn patch_level(suffix: &str) -> &str {
    suffix.rsplit('_').next().unwrap_or(suffix)
}

/// Whether the Android version tag needs a prebuilt ramdisk
pub fn needs_prebuilt_ramdisk(android_version: &str) -> bool {
    android_version.contains("a12")
}

/// One `Image*` directory and the boot images built from it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageVariant {
    pub dir: PathBuf,
    pub suffix: String,
    pub title: String,
    pub boot_images: Vec<String>,
}

impl ImageVariant {
    pub fn new(dir: &Path) -> Self {
        let name = dir
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let suffix = image_suffix(&name).to_string();
        ImageVariant {
            dir: dir.to_path_buf(),
            title: format!("kernel-aarch64-{}", suffix),
            suffix,
            boot_images: Vec::new(),
        }
    }

    /// Upload name of a compressed boot image
    pub fn upload_name(&self, boot_image: &str) -> String {
        format!("{}-{}.gz", self.suffix, boot_image)
    }
}

pub struct BootImageAssembler<'a, R: ToolRunner> {
    runner: &'a R,
    tools: &'a AssemblerTools,
    android_version: String,
    ramdisk: RamdiskSource,
    client: reqwest::Client,
}

impl<'a, R: ToolRunner> BootImageAssembler<'a, R> {
    pub fn new(runner: &'a R, tools: &'a AssemblerTools, android_version: &str) -> Self {
        BootImageAssembler {
            runner,
            tools,
            android_version: android_version.to_string(),
            ramdisk: RamdiskSource::default(),
            client: reqwest::Client::new(),
        }
    }

    pub fn with_ramdisk_source(mut self, source: RamdiskSource) -> Self {
        self.ramdisk = source;
        self
    }

    /// `Image*` directories below `workdir`, sorted by name
    pub fn discover(workdir: &Path) -> std::io::Result<Vec<PathBuf>> {
        let mut dirs: Vec<PathBuf> = fs::read_dir(workdir)?
            .filter_map(|entry| entry.ok())
            .filter(|entry| {
                entry.file_name().to_string_lossy().starts_with(IMAGE_DIR_PREFIX)
                    && entry.path().is_dir()
            })
            .map(|entry| entry.path())
            .collect();
        dirs.sort();
        Ok(dirs)
    }

    /// Assemble every image directory in `workdir`. Returns the upload files.
    pub async fn run(&self, workdir: &Path) -> Result<Vec<PathBuf>> {
        log::info!("[Bootimg] ===== Create boot images =====");
        if needs_prebuilt_ramdisk(&self.android_version) && self.tools.unpack_bootimg.is_none() {
            return Err(ConfigError::InvalidValue {
                field: "unpack-bootimg".to_string(),
                value: format!("required for {}", self.android_version),
            }
            .into());
        }

        let mut uploads = Vec::new();
        for dir in Self::discover(workdir)? {
            let variant = self.assemble(&dir).await?;
            uploads.extend(
                variant
                    .boot_images
                    .iter()
                    .map(|img| variant.dir.join(variant.upload_name(img))),
            );
        }
        Ok(uploads)
    }

    /// Build, sign and compress the boot images of one directory.
    pub async fn assemble(&self, dir: &Path) -> Result<ImageVariant> {
        let mut variant = ImageVariant::new(dir);
        log::info!("[Bootimg] ----- Building {} -----", dir.display());
        log::info!("[Bootimg] title: {}", variant.title);

        let ramdisk_args = if needs_prebuilt_ramdisk(&self.android_version) {
            self.prepare_ramdisk(&variant).await?
        } else {
            Vec::new()
        };

        if dir.join("Image").is_file() {
            log::info!("[Bootimg] Building Image.gz");
            self.tools.gzip.compress(self.runner, dir, "Image", true).await?;
        }

        for &(kernel, boot_image) in VARIANTS {
            if !dir.join(kernel).is_file() {
                log::warn!("[Bootimg] Skipping {} as {} does not exist", boot_image, kernel);
                continue;
            }
            log::info!("[Bootimg] Building {}", boot_image);
            self.runner
                .run(
                    &Invocation::new(self.tools.mkbootimg.display().to_string(), dir)
                        .args(["--header_version", HEADER_VERSION, "--kernel", kernel])
                        .args(["--output", boot_image])
                        .args(ramdisk_args.iter().cloned()),
                )
                .await?;
            self.runner
                .run(
                    &Invocation::new(self.tools.avbtool.display().to_string(), dir)
                        .args(["add_hash_footer", "--partition_name", "boot"])
                        .arg("--partition_size")
                        .arg(BOOT_PARTITION_SIZE.to_string())
                        .args(["--algorithm", AVB_ALGORITHM])
                        .arg("--key")
                        .arg(self.tools.avb_key.display().to_string())
                        .args(["--image", boot_image]),
                )
                .await?;
            variant.boot_images.push(boot_image.to_string());
        }

        if variant.boot_images.is_empty() {
            return Err(ValidationError::ArtifactMissing(dir.join("Image")).into());
        }

        log::info!("[Bootimg] Compressing images");
        for boot_image in &variant.boot_images {
            let compressed = self.tools.gzip.compress(self.runner, dir, boot_image, false).await?;
            fs::rename(&compressed, dir.join(variant.upload_name(boot_image)))?;
        }

        log::info!("[Bootimg] Images to upload:");
        for (path, size) in collect_output_tree(dir)? {
            if path.extension().is_some_and(|ext| ext == "gz") {
                log::info!("[Bootimg]   {} ({} bytes)", path.display(), size);
            }
        }
        Ok(variant)
    }

    /// Fetch and unpack the certified boot image, returning mkbootimg ramdisk args.
    async fn prepare_ramdisk(&self, variant: &ImageVariant) -> Result<Vec<String>> {
        let level = patch_level(&variant.suffix).to_string();
        log::info!("[Bootimg] patch level: {}", level);

        let unpack = self.tools.unpack_bootimg.as_ref().ok_or_else(|| ConfigError::InvalidValue {
            field: "unpack-bootimg".to_string(),
            value: format!("required for {}", self.android_version),
        })?;

        log::info!("[Bootimg] Downloading prebuilt ramdisk");
        let boot_img = self.ramdisk.fetch(&self.client, &level, &variant.dir).await?;

        log::info!("[Bootimg] Unpacking prebuilt {}", boot_img.display());
        self.runner
            .run(
                &Invocation::new(unpack.display().to_string(), &variant.dir)
                    .arg(format!("--boot_img={}", boot_img.display()))
                    .arg(format!("--out={}", variant.dir.join("out").display())),
            )
            .await?;
        fs::remove_file(&boot_img)?;

        Ok(vec![
            "--ramdisk".to_string(),
            "out/ramdisk".to_string(),
            "--os_version".to_string(),
            A12_OS_VERSION.to_string(),
            "--os_patch_level".to_string(),
            level,
        ])
    }
}
