//! Kernel version extraction and comparison for branch-style identifiers.
//!
//! Branch names look like `android12-5.10` or `android-16.1-6.12`. The kernel
//! version is the first `<major>.<minor>` that directly follows a digit and a
//! hyphen, so the Android release number (`16.1`) is never picked up.

use crate::error::ConfigError;
use once_cell::sync::Lazy;
use regex::Regex;
use std::cmp::Ordering;

static BRANCH_VERSION_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"[0-9]-([0-9]+\.[0-9]+)").expect("Invalid branch version regex")
});

/// Extract the kernel version (`major.minor`) from a branch identifier.
///
/// # Errors
/// `ConfigError::MalformedVersionIdentifier` if the identifier has no version
/// following a digit-hyphen marker.
pub fn extract_kernel_version(branch: &str) -> Result<&str, ConfigError> {
    BRANCH_VERSION_REGEX
        .captures(branch)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str())
        .ok_or_else(|| ConfigError::MalformedVersionIdentifier(branch.to_string()))
}

/// Compare two dotted version strings component by component.
///
/// Missing trailing components compare as zero, so `6.12` equals `6.12.0`
/// and is less than `6.12.1`.
pub fn compare_versions(left: &str, right: &str) -> Result<Ordering, ConfigError> {
    let left = parse_components(left)?;
    let right = parse_components(right)?;

    let len = left.len().max(right.len());
    for i in 0..len {
        let l = left.get(i).copied().unwrap_or(0);
        let r = right.get(i).copied().unwrap_or(0);
        match l.cmp(&r) {
            Ordering::Equal => continue,
            decided => return Ok(decided),
        }
    }
    Ok(Ordering::Equal)
}

/// Compare the kernel version embedded in `branch` against `target` (`"major.minor"`).
///
/// ```
/// use std::cmp::Ordering;
/// use ksu_kbuild::kernel::version::compare_kernel_version;
///
/// assert_eq!(compare_kernel_version("android-16.1-6.12", "6.12").unwrap(), Ordering::Equal);
/// assert_eq!(compare_kernel_version("android12-5.10", "6.12").unwrap(), Ordering::Less);
/// ```
pub fn compare_kernel_version(branch: &str, target: &str) -> Result<Ordering, ConfigError> {
    let version = extract_kernel_version(branch)?;
    let ordering = compare_versions(version, target)?;
    log::debug!(
        "[Version] {} (kernel {}) vs {} -> {:?}",
        branch,
        version,
        target,
        ordering
    );
    Ok(ordering)
}

/// Signed form of [`compare_kernel_version`]: 1, 0 or -1.
pub fn compare_kernel_version_signed(branch: &str, target: &str) -> Result<i32, ConfigError> {
    Ok(match compare_kernel_version(branch, target)? {
        Ordering::Greater => 1,
        Ordering::Equal => 0,
        Ordering::Less => -1,
    })
}

fn parse_components(version: &str) -> Result<Vec<u64>, ConfigError> {
    version
        .split('.')
        .map(|part| {
            part.parse::<u64>()
                .map_err(|_| ConfigError::MalformedVersionIdentifier(version.to_string()))
        })
        .collect()
}
