//! Browser executable discovery

use std::path::PathBuf;

use tracing::debug;

use crate::launcher::LaunchError;

#[cfg(target_os = "linux")]
const CANDIDATES: &[&str] = &[
    "/usr/bin/google-chrome",
    "/usr/bin/google-chrome-stable",
    "/usr/bin/chromium",
    "/usr/bin/chromium-browser",
    "/snap/bin/chromium",
];

#[cfg(target_os = "macos")]
const CANDIDATES: &[&str] = &[
    "/Applications/Google Chrome.app/Contents/MacOS/Google Chrome",
    "/Applications/Chromium.app/Contents/MacOS/Chromium",
];

#[cfg(target_os = "windows")]
const CANDIDATES: &[&str] = &[
    r"C:\Program Files\Google\Chrome\Application\chrome.exe",
    r"C:\Program Files (x86)\Google\Chrome\Application\chrome.exe",
    r"C:\Program Files\Chromium\Application\chrome.exe",
    r"C:\Program Files (x86)\Chromium\Application\chrome.exe",
];

#[cfg(not(any(target_os = "linux", target_os = "macos", target_os = "windows")))]
const CANDIDATES: &[&str] = &[];

/// Locate a Chrome or Chromium binary
///
/// The `CHROME` environment variable wins when it points at an existing
/// file; otherwise the platform's usual install locations are probed in
/// order.
pub fn find_chrome() -> Result<PathBuf, LaunchError> {
    if let Ok(path) = std::env::var("CHROME") {
        let path = PathBuf::from(path);
        if path.exists() {
            debug!("using browser from CHROME: {}", path.display());
            return Ok(path);
        }
    }

    for candidate in CANDIDATES {
        let path = PathBuf::from(candidate);
        if path.exists() {
            debug!("found browser at {}", path.display());
            return Ok(path);
        }
    }

    Err(LaunchError::ChromeNotFound)
}
