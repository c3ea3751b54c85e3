//! Registers the host with browsers the `native_messaging` crate does not
//! know about (Chrome for Testing, Chromium snap, Brave nightly).

use std::path::{Path, PathBuf};
use std::{fs, io};

/// NativeMessagingHosts directories relative to the user's home.
#[cfg(target_os = "linux")]
const EXTRA_CHROMIUM_DIRS: &[&str] = &[
    ".config/google-chrome-for-testing/NativeMessagingHosts",
    "snap/chromium/common/chromium/NativeMessagingHosts",
    ".config/BraveSoftware/Brave-Browser-Nightly/NativeMessagingHosts",
];

#[cfg(target_os = "macos")]
const EXTRA_CHROMIUM_DIRS: &[&str] = &[
    "Library/Application Support/Google/Chrome for Testing/NativeMessagingHosts",
    "Library/Application Support/BraveSoftware/Brave-Browser-Nightly/NativeMessagingHosts",
];

#[cfg(target_os = "windows")]
const EXTRA_CHROMIUM_DIRS: &[&str] = &[];

/// Copies the Chrome manifest written by `native_messaging::install` into
/// every extra directory. Returns the manifests written.
pub fn install_extra(host_name: &str) -> io::Result<Vec<PathBuf>> {
    let home = match dirs::home_dir() {
        Some(h) => h,
        None => return Ok(Vec::new()),
    };

    let source = chrome_manifest_path(&home, host_name);
    if !source.exists() {
        return Ok(Vec::new());
    }

    let manifest = fs::read(&source)?;
    let mut written = Vec::new();
    for target in manifest_paths(&home, host_name) {
        let dir = match target.parent() {
            Some(dir) => dir,
            None => continue,
        };
        if let Err(e) = fs::create_dir_all(dir) {
            log::warn!("Could not create {}: {}", dir.display(), e);
            continue;
        }
        fs::write(&target, &manifest)?;
        written.push(target);
    }
    Ok(written)
}

/// Removes the manifests `install_extra` wrote. Returns the files removed.
pub fn uninstall_extra(host_name: &str) -> io::Result<Vec<PathBuf>> {
    let home = match dirs::home_dir() {
        Some(h) => h,
        None => return Ok(Vec::new()),
    };

    let mut removed = Vec::new();
    for target in manifest_paths(&home, host_name) {
        if target.exists() {
            fs::remove_file(&target)?;
            removed.push(target);
        }
    }
    Ok(removed)
}

fn manifest_paths(home: &Path, host_name: &str) -> Vec<PathBuf> {
    EXTRA_CHROMIUM_DIRS
        .iter()
        .map(|dir| home.join(dir).join(format!("{host_name}.json")))
        .collect()
}

#[cfg(target_os = "linux")]
fn chrome_manifest_path(home: &Path, host_name: &str) -> PathBuf {
    home.join(".config/google-chrome/NativeMessagingHosts")
        .join(format!("{host_name}.json"))
}

#[cfg(target_os = "macos")]
fn chrome_manifest_path(home: &Path, host_name: &str) -> PathBuf {
    home.join("Library/Application Support/Google/Chrome/NativeMessagingHosts")
        .join(format!("{host_name}.json"))
}

// Chrome on Windows registers hosts in the registry; there is no file to copy.
#[cfg(target_os = "windows")]
fn chrome_manifest_path(home: &Path, host_name: &str) -> PathBuf {
    home.join(format!("{host_name}.json"))
}
