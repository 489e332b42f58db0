//! Recording build outputs for the CI system.

use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};

/// Sink for `key=value` build outputs
pub trait OutputReporter {
    fn record(&self, key: &str, value: &str) -> std::io::Result<()>;
}

/// Appends `key=value` lines to a GitHub Actions environment file
#[derive(Debug, Clone)]
pub struct GithubEnvReporter {
    path: PathBuf,
}

impl GithubEnvReporter {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        GithubEnvReporter { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl OutputReporter for GithubEnvReporter {
    fn record(&self, key: &str, value: &str) -> std::io::Result<()> {
        log::info!(
            "[Reporter] Writing {}={} to {}",
            key,
            value,
            self.path.display()
        );
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        writeln!(file, "{}={}", key, value)
    }
}

/// Used when no env file is configured
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopReporter;

impl OutputReporter for NoopReporter {
    fn record(&self, key: &str, value: &str) -> std::io::Result<()> {
        log::debug!("[Reporter] No output file configured, dropping {}={}", key, value);
        Ok(())
    }
}

/// Pick the reporter for an optional env file path
pub fn reporter_for(path: Option<&Path>) -> Box<dyn OutputReporter> {
    match path {
        Some(path) => Box::new(GithubEnvReporter::new(path)),
        None => Box::new(NoopReporter),
    }
}
