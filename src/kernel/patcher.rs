//! Reversible text patches for build-control files.
//!
//! A [`TextPatch`] is a two-candidate rewrite strategy: a primary shape
//! (one or more rewrites applied together) and an optional fallback that is
//! tried only when the primary shape matches nothing. [`apply`] reports which
//! candidate fired in the returned [`PatchRecord`].
//!
//! Restoration goes through version control ([`GitManager::restore_path`]),
//! never by writing captured text back, so the file comes back byte-exact.
//! [`PatchGuard`] ties the restore to scope: it runs when the guard is
//! dropped, whether the protected region returned, failed or was cancelled.

use crate::error::PatchError;
use crate::kernel::git::GitManager;
use once_cell::sync::Lazy;
use regex::Regex;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

/// `all: check_symbol` → `all:` plus removal of the check_symbol recipe lines.
///
/// Used on the module Makefile: check_symbol needs a linked vmlinux that a
/// standalone module build never produces.
pub static SKIP_CHECK_SYMBOL: Lazy<TextPatch> = Lazy::new(|| {
    TextPatch::new(
        "skip check_symbol",
        vec![
            Rewrite::new(r"(?m)^all:\s*check_symbol", "all:"),
            Rewrite::new(
                r"(?m)^[ \t]*\./check_symbol kernelsu\.ko \$\(KDIR\)/vmlinux[ \t]*\n?",
                "",
            ),
            Rewrite::new(r"\trm check_symbol\n", ""),
        ]
        .into_iter()
        .collect::<Result<Vec<_>, _>>()
        .expect("Invalid check_symbol regex"),
        None,
    )
});

/// Comments out `check_exports(mod);` in scripts/mod/modpost.c.
///
/// Primary shape is the call on its own line; the fallback handles the call
/// sharing a line with other code. Already commented calls match neither.
pub static SKIP_CHECK_EXPORTS: Lazy<TextPatch> = Lazy::new(|| {
    TextPatch::new(
        "skip check_exports",
        vec![Rewrite::new(r"(?m)^(\s*)check_exports\(mod\);", "${1}//check_exports(mod);")
            .expect("Invalid check_exports regex")],
        Some(
            Rewrite::new(r"(^|[^/])(check_exports\(mod\);)", "${1}//${2}")
                .expect("Invalid check_exports fallback regex"),
        ),
    )
});

/// A single regex substitution
#[derive(Debug, Clone)]
pub struct Rewrite {
    regex: Regex,
    replacement: String,
}

impl Rewrite {
    /// `replacement` uses `regex` expansion syntax (`${1}`)
    pub fn new(pattern: &str, replacement: &str) -> Result<Self, PatchError> {
        let regex = Regex::new(pattern)
            .map_err(|e| PatchError::RegexInvalid(format!("{}: {}", pattern, e)))?;
        Ok(Rewrite {
            regex,
            replacement: replacement.to_string(),
        })
    }

    fn apply(&self, content: &str) -> (String, usize) {
        let count = self.regex.find_iter(content).count();
        if count == 0 {
            return (content.to_string(), 0);
        }
        let rewritten = self
            .regex
            .replace_all(content, self.replacement.as_str())
            .into_owned();
        (rewritten, count)
    }
}

/// Which candidate of a [`TextPatch`] matched
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchedCandidate {
    /// Primary shape matched this many times
    Primary(usize),
    /// Primary missed; fallback matched this many times
    Fallback(usize),
    /// Neither matched, or the target file is absent
    None,
}

/// Two-candidate rewrite strategy
#[derive(Debug, Clone)]
pub struct TextPatch {
    name: String,
    primary: Vec<Rewrite>,
    fallback: Option<Rewrite>,
}

impl TextPatch {
    pub fn new(name: &str, primary: Vec<Rewrite>, fallback: Option<Rewrite>) -> Self {
        TextPatch {
            name: name.to_string(),
            primary,
            fallback,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Rewrite `content` in memory and report which candidate fired.
    pub fn rewrite(&self, content: &str) -> (String, MatchedCandidate) {
        let mut current = content.to_string();
        let mut total = 0;
        for rewrite in &self.primary {
            let (next, count) = rewrite.apply(&current);
            current = next;
            total += count;
        }
        if total > 0 {
            return (current, MatchedCandidate::Primary(total));
        }

        if let Some(fallback) = &self.fallback {
            let (next, count) = fallback.apply(content);
            if count > 0 {
                return (next, MatchedCandidate::Fallback(count));
            }
        }

        (content.to_string(), MatchedCandidate::None)
    }
}

/// Outcome of one [`apply`] call, consumed by exactly one [`restore`]
#[derive(Debug)]
pub struct PatchRecord {
    path: PathBuf,
    original: Option<String>,
    candidate: MatchedCandidate,
}

impl PatchRecord {
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Content before the patch; `None` when the file was absent
    pub fn original(&self) -> Option<&str> {
        self.original.as_deref()
    }

    pub fn candidate(&self) -> MatchedCandidate {
        self.candidate
    }

    pub fn file_absent(&self) -> bool {
        self.original.is_none()
    }

    /// Whether the file on disk was actually changed
    pub fn applied(&self) -> bool {
        self.candidate != MatchedCandidate::None
    }
}

/// Apply `patch` to the file at `path`.
///
/// A missing file is not an error: not every tree needs every workaround.
/// The returned record is inert in that case, and also when nothing matched.
pub fn apply(path: &Path, patch: &TextPatch) -> Result<PatchRecord, PatchError> {
    let original = match fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) if e.kind() == ErrorKind::NotFound => {
            log::warn!("[Patcher] {} not found, skipping {}", path.display(), patch.name());
            return Ok(PatchRecord {
                path: path.to_path_buf(),
                original: None,
                candidate: MatchedCandidate::None,
            });
        }
        Err(source) => {
            return Err(PatchError::Io {
                path: path.to_path_buf(),
                source,
            })
        }
    };

    let (patched, candidate) = patch.rewrite(&original);
    match candidate {
        MatchedCandidate::None => {
            log::warn!(
                "[Patcher] No match for {} in {}, leaving file untouched",
                patch.name(),
                path.display()
            );
        }
        MatchedCandidate::Primary(count) | MatchedCandidate::Fallback(count) => {
            fs::write(path, &patched).map_err(|source| PatchError::Io {
                path: path.to_path_buf(),
                source,
            })?;
            log::info!(
                "[Patcher] Applied {} to {} ({:?}, {} occurrence(s))",
                patch.name(),
                path.display(),
                candidate,
                count
            );
        }
    }

    Ok(PatchRecord {
        path: path.to_path_buf(),
        original: Some(original),
        candidate,
    })
}

/// Revert a patch through version control.
///
/// Inert records are a no-op. Failures are logged and swallowed: a lost
/// revert must never mask the result of the build it was protecting.
pub fn restore(record: PatchRecord) {
    if !record.applied() {
        log::debug!(
            "[Patcher] [RESTORE] Nothing to restore for {}",
            record.path.display()
        );
        return;
    }

    log::info!("[Patcher] [RESTORE] Restoring original {}", record.path.display());
    let result = GitManager::discover(&record.path).and_then(|git| git.restore_path(&record.path));
    if let Err(e) = result {
        log::error!(
            "[Patcher] [RESTORE] Failed to restore {}: {}",
            record.path.display(),
            e
        );
    }
}

/// Scope-bound patch: applied on construction, restored on drop
#[derive(Debug)]
pub struct PatchGuard {
    record: Option<PatchRecord>,
}

impl PatchGuard {
    pub fn apply(path: &Path, patch: &TextPatch) -> Result<Self, PatchError> {
        let record = apply(path, patch)?;
        Ok(PatchGuard {
            record: Some(record),
        })
    }

    pub fn record(&self) -> Option<&PatchRecord> {
        self.record.as_ref()
    }

    /// Restore now instead of at end of scope
    pub fn finish(mut self) {
        if let Some(record) = self.record.take() {
            restore(record);
        }
    }
}

impl Drop for PatchGuard {
    fn drop(&mut self) {
        if let Some(record) = self.record.take() {
            restore(record);
        }
    }
}
