//! Locked-profile cloning.
//!
//! Chrome refuses to share a user-data-dir between two live processes.
//! When the requested profile is already held by a running instance we
//! clone only the authentication-relevant files into a fresh temp
//! directory so the new process starts with the user's cookies and
//! storage without ever contending for the original profile's lock.

use std::path::Path;

use tempfile::TempDir;
use tracing::{debug, warn};

use pagelens_core_types::CoreError;

/// Lock markers Chrome leaves in a profile root while it is in use.
const LOCK_MARKERS: &[&str] = &["SingletonLock", "SingletonSocket", "SingletonCookie", "lockfile"];

/// Files copied from the profile root.
const ROOT_FILES: &[&str] = &["Local State"];

/// Files and directories copied from the `Default/` profile.
const DEFAULT_ENTRIES: &[&str] = &[
    "Cookies",
    "Cookies-journal",
    "Login Data",
    "Login Data-journal",
    "Preferences",
    "Secure Preferences",
    "Local Storage",
    "Network/Cookies",
];

pub fn is_profile_locked(profile_dir: &Path) -> bool {
    LOCK_MARKERS
        .iter()
        .any(|marker| profile_dir.join(marker).exists())
}

/// Clone the authentication-relevant slice of `profile_dir` into a fresh
/// temp directory. Missing entries are skipped; an unreadable entry is
/// logged and skipped rather than failing the launch.
pub fn clone_locked_profile(profile_dir: &Path) -> Result<TempDir, CoreError> {
    let temp = TempDir::new()
        .map_err(|err| CoreError::launch(format!("failed to create temp profile: {err}")))?;

    for name in ROOT_FILES {
        copy_entry(&profile_dir.join(name), &temp.path().join(name));
    }

    let default_src = profile_dir.join("Default");
    let default_dst = temp.path().join("Default");
    if default_src.is_dir() {
        for name in DEFAULT_ENTRIES {
            copy_entry(&default_src.join(name), &default_dst.join(name));
        }
    }

    debug!(
        target: "browser-watchdog",
        src = %profile_dir.display(),
        dst = %temp.path().display(),
        "cloned locked profile"
    );
    Ok(temp)
}

fn copy_entry(src: &Path, dst: &Path) {
    if !src.exists() {
        return;
    }
    let result = if src.is_dir() {
        copy_dir(src, dst)
    } else {
        std::fs::create_dir_all(dst.parent().unwrap_or(dst))
            .and_then(|_| std::fs::copy(src, dst).map(|_| ()))
    };
    if let Err(err) = result {
        warn!(
            target: "browser-watchdog",
            src = %src.display(),
            ?err,
            "skipping unreadable profile entry"
        );
    }
}

fn copy_dir(src: &Path, dst: &Path) -> std::io::Result<()> {
    std::fs::create_dir_all(dst)?;
    for entry in std::fs::read_dir(src)? {
        let entry = entry?;
        let target = dst.join(entry.file_name());
        if entry.file_type()?.is_dir() {
            copy_dir(&entry.path(), &target)?;
        } else {
            std::fs::copy(entry.path(), &target)?;
        }
    }
    Ok(())
}
