//! Prebuilt GKI ramdisk retrieval for Android 12 boot images.
//!
//! The certified boot image matching the kernel's patch level is preferred.
//! When a HEAD preflight says it is unavailable, a fixed known-good release
//! is used instead; the downstream steps are identical either way.

use crate::error::BuildError;
use std::fs::{self, File};
use std::io::{BufReader, Write};
use std::path::{Path, PathBuf};

/// Certified boot image archive, keyed by patch level
pub const PRIMARY_URL_TEMPLATE: &str =
    "https://dl.google.com/android/gki/gki-certified-boot-android12-5.10-{patch_level}_r1.zip";

/// Known-good archive used when the patch-level archive is unavailable
pub const FALLBACK_URL: &str =
    "https://dl.google.com/android/gki/gki-certified-boot-android12-5.10-2023-01_r1.zip";

/// Local name of the downloaded archive
pub const ARCHIVE_NAME: &str = "gki-kernel.zip";

/// Where ramdisk archives come from
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RamdiskSource {
    primary_template: String,
    fallback_url: String,
}

impl Default for RamdiskSource {
    fn default() -> Self {
        RamdiskSource::new(PRIMARY_URL_TEMPLATE, FALLBACK_URL)
    }
}

impl RamdiskSource {
    /// `primary_template` may contain `{patch_level}`
    pub fn new(primary_template: impl Into<String>, fallback_url: impl Into<String>) -> Self {
        RamdiskSource {
            primary_template: primary_template.into(),
            fallback_url: fallback_url.into(),
        }
    }

    pub fn primary_url(&self, patch_level: &str) -> String {
        self.primary_template.replace("{patch_level}", patch_level)
    }

    pub fn fallback_url(&self) -> &str {
        &self.fallback_url
    }

    /// Primary URL if its HEAD preflight succeeds, otherwise the fallback.
    pub async fn resolve(&self, client: &reqwest::Client, patch_level: &str) -> String {
        let primary = self.primary_url(patch_level);
        match client.head(&primary).send().await {
            Ok(response) if response.status().is_success() => {
                log::info!("[Ramdisk] Using {}", primary);
                primary
            }
            Ok(response) => {
                log::warn!(
                    "[Ramdisk] {} returned {}, using {}",
                    primary,
                    response.status(),
                    self.fallback_url
                );
                self.fallback_url.clone()
            }
            Err(e) => {
                log::warn!(
                    "[Ramdisk] HEAD {} failed ({}), using {}",
                    primary,
                    e,
                    self.fallback_url
                );
                self.fallback_url.clone()
            }
        }
    }

    /// Download and extract the archive for `patch_level` into `dir`.
    ///
    /// The archive itself is deleted afterwards. Returns the extracted
    /// `boot*.img`.
    pub async fn fetch(
        &self,
        client: &reqwest::Client,
        patch_level: &str,
        dir: &Path,
    ) -> Result<PathBuf, BuildError> {
        let url = self.resolve(client, patch_level).await;
        let archive = dir.join(ARCHIVE_NAME);

        download(client, &url, &archive).await?;
        extract_zip(&archive, dir)?;
        fs::remove_file(&archive)?;

        find_boot_image(dir)?.ok_or_else(|| {
            BuildError::Fetch(format!("No boot*.img found in archive from {}", url))
        })
    }
}

/// Stream `url` into `dest`. Any non-success status is fatal.
pub async fn download(client: &reqwest::Client, url: &str, dest: &Path) -> Result<(), BuildError> {
    log::info!("[Ramdisk] Downloading {}", url);

    let fetch_err = |e: reqwest::Error| BuildError::Fetch(format!("{}: {}", url, e));
    let mut response = client
        .get(url)
        .send()
        .await
        .and_then(reqwest::Response::error_for_status)
        .map_err(fetch_err)?;

    let mut file = File::create(dest)?;
    let mut written = 0u64;
    while let Some(chunk) = response.chunk().await.map_err(fetch_err)? {
        file.write_all(&chunk)?;
        written += chunk.len() as u64;
    }
    file.flush()?;

    log::info!("[Ramdisk] Downloaded {} bytes to {}", written, dest.display());
    Ok(())
}

/// Extract every entry of `archive` below `dest`
pub fn extract_zip(archive: &Path, dest: &Path) -> Result<(), BuildError> {
    let zip_err = |e: zip::result::ZipError| {
        BuildError::Fetch(format!("Failed to read {}: {}", archive.display(), e))
    };

    let file = File::open(archive)?;
    let mut zip = zip::ZipArchive::new(BufReader::new(file)).map_err(zip_err)?;

    for i in 0..zip.len() {
        let mut entry = zip.by_index(i).map_err(zip_err)?;
        let Some(name) = entry.enclosed_name() else {
            log::warn!("[Ramdisk] Skipping unsafe entry {}", entry.name());
            continue;
        };
        let out_path = dest.join(name);

        if entry.is_dir() {
            fs::create_dir_all(&out_path)?;
            continue;
        }
        if let Some(parent) = out_path.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut out = File::create(&out_path)?;
        std::io::copy(&mut entry, &mut out)?;
        log::debug!("[Ramdisk] Extracted {}", out_path.display());
    }
    Ok(())
}

/// First `boot*.img` directly inside `dir`, by name
pub fn find_boot_image(dir: &Path) -> std::io::Result<Option<PathBuf>> {
    let mut images: Vec<PathBuf> = fs::read_dir(dir)?
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| path.is_file() && is_boot_image(path))
        .collect();
    images.sort();
    Ok(images.into_iter().next())
}

pub(crate) fn is_boot_image(path: &Path) -> bool {
    path.file_name()
        .and_then(|n| n.to_str())
        .is_some_and(|n| n.starts_with("boot") && n.ends_with(".img"))
}
