//! Browser executable resolution.

use std::env;
use std::path::PathBuf;

use which::which;

use pagelens_core_types::CoreError;

/// Resolve a usable browser executable.
///
/// Order: explicit path, `PAGELENS_CHROME` env override, `which` lookup of
/// well-known names, per-OS install locations. Exhausting all of them is a
/// fatal launch failure; installing a browser is outside this system's
/// responsibility, so the error carries a remediation hint instead.
pub fn resolve_executable(explicit: Option<&PathBuf>) -> Result<PathBuf, CoreError> {
    if let Some(path) = explicit {
        if path.exists() {
            return Ok(path.clone());
        }
        return Err(CoreError::launch(format!(
            "configured browser executable not found at {}",
            path.display()
        )));
    }

    if let Ok(raw) = env::var("PAGELENS_CHROME") {
        let trimmed = raw.trim();
        if !trimmed.is_empty() {
            let candidate = PathBuf::from(trimmed);
            if candidate.exists() {
                return Ok(candidate);
            }
        }
    }

    for name in executable_names() {
        if let Ok(path) = which(name) {
            return Ok(path);
        }
    }

    for candidate in os_install_paths() {
        if candidate.exists() {
            return Ok(candidate);
        }
    }

    Err(CoreError::launch(
        "no Chrome/Chromium executable found; install one or set PAGELENS_CHROME",
    ))
}

pub(crate) fn executable_names() -> &'static [&'static str] {
    #[cfg(target_os = "windows")]
    {
        &["chrome.exe", "chromium.exe", "msedge.exe"]
    }

    #[cfg(any(target_os = "macos", target_os = "linux", target_os = "freebsd"))]
    {
        &[
            "google-chrome-stable",
            "google-chrome",
            "chromium",
            "chromium-browser",
        ]
    }

    #[cfg(not(any(
        target_os = "windows",
        target_os = "macos",
        target_os = "linux",
        target_os = "freebsd"
    )))]
    {
        &["chrome"]
    }
}

fn os_install_paths() -> Vec<PathBuf> {
    #[cfg(target_os = "windows")]
    {
        let mut paths = Vec::new();
        for key in ["PROGRAMFILES", "PROGRAMFILES(X86)", "LOCALAPPDATA"] {
            if let Ok(value) = env::var(key) {
                let trimmed = value.trim();
                if !trimmed.is_empty() {
                    let root = PathBuf::from(trimmed);
                    paths.push(root.join("Google/Chrome/Application/chrome.exe"));
                    paths.push(root.join("Chromium/Application/chrome.exe"));
                    paths.push(root.join("Microsoft/Edge/Application/msedge.exe"));
                }
            }
        }
        paths
    }

    #[cfg(target_os = "macos")]
    {
        vec![
            PathBuf::from("/Applications/Google Chrome.app/Contents/MacOS/Google Chrome"),
            PathBuf::from("/Applications/Chromium.app/Contents/MacOS/Chromium"),
        ]
    }

    #[cfg(any(target_os = "linux", target_os = "freebsd"))]
    {
        vec![
            PathBuf::from("/usr/bin/google-chrome-stable"),
            PathBuf::from("/usr/bin/google-chrome"),
            PathBuf::from("/usr/bin/chromium-browser"),
            PathBuf::from("/usr/bin/chromium"),
        ]
    }

    #[cfg(not(any(
        target_os = "windows",
        target_os = "macos",
        target_os = "linux",
        target_os = "freebsd"
    )))]
    {
        Vec::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn explicit_path_wins() {
        let dir = tempdir().unwrap();
        let exe = dir.path().join("my-browser");
        fs::write(&exe, b"").unwrap();
        let resolved = resolve_executable(Some(&exe)).unwrap();
        assert_eq!(resolved, exe);
    }

    #[test]
    fn missing_explicit_path_is_fatal() {
        let err = resolve_executable(Some(&PathBuf::from("/definitely/not/here"))).unwrap_err();
        assert!(err.is_fatal());
    }
}
