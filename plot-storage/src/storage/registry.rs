//! Discovery of mounted volumes under the mount root.
//!
//! A volume is a directory below the root that sits on a different device
//! than its parent. Its usable capacity is what the filesystem reports as
//! available, minus the configured reserved threshold, minus a fixed
//! worst-case reservation for every in-flight `.tmp` file found on it.

use std::fs;
use std::io;
use std::os::unix::fs::MetadataExt;
use std::path::Path;

use nix::sys::statvfs::statvfs;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::storage::volume::Volume;

/// Extension appended to a destination file while it is being transferred.
pub const TEMP_FILE_EXT: &str = "tmp";

/// Capacity held back for every `.tmp` file on a volume. A transfer may grow
/// to the full size of a plot before it completes, so this is sized for the
/// largest plot rather than the current file length.
pub const TEMP_FILE_RESERVATION: u64 = 101 * 1024 * 1024 * 1024;

/// Filesystem facts the registry needs about a candidate directory.
pub trait VolumeProbe: Send + Sync {
    /// Whether `path` is the root of a mounted filesystem.
    fn is_mount_point(&self, path: &Path) -> io::Result<bool>;

    /// Bytes available to unprivileged writers on the filesystem holding `path`.
    fn available_bytes(&self, path: &Path) -> io::Result<u64>;
}

/// Probe backed by `stat(2)` and `statvfs(2)`.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemProbe;

impl VolumeProbe for SystemProbe {
    fn is_mount_point(&self, path: &Path) -> io::Result<bool> {
        let meta = fs::metadata(path)?;
        let parent = match path.parent() {
            Some(parent) => fs::metadata(parent)?,
            None => return Ok(true),
        };
        Ok(meta.dev() != parent.dev() || meta.ino() == parent.ino())
    }

    fn available_bytes(&self, path: &Path) -> io::Result<u64> {
        let stat = statvfs(path)?;
        #[allow(clippy::unnecessary_cast)]
        let (blocks, fragment) = (stat.blocks_available() as u64, stat.fragment_size() as u64);
        Ok(blocks.saturating_mul(fragment))
    }
}

pub fn is_temp_file(path: &Path) -> bool {
    path.extension().is_some_and(|ext| ext == TEMP_FILE_EXT)
}

/// Walks `root` and returns every mount point below it, sorted by descending
/// path. Mount points are not descended into.
pub fn scan_volumes(root: &Path, reserved: u64, probe: &dyn VolumeProbe) -> Vec<Volume> {
    let mut volumes = Vec::new();
    let mut entries = WalkDir::new(root).min_depth(1).into_iter();

    while let Some(entry) = entries.next() {
        let entry = match entry {
            Ok(entry) => entry,
            Err(err) => {
                debug!("skipping unreadable entry under {}: {err}", root.display());
                continue;
            }
        };
        if !entry.file_type().is_dir() {
            continue;
        }

        match probe.is_mount_point(entry.path()) {
            Ok(true) => entries.skip_current_dir(),
            Ok(false) => continue,
            Err(err) => {
                debug!("cannot stat {}: {err}", entry.path().display());
                continue;
            }
        }

        let path = entry.into_path();
        let free = match probe.available_bytes(&path) {
            Ok(free) => free,
            Err(err) => {
                warn!("cannot read capacity of {}: {err}", path.display());
                continue;
            }
        };
        let available = free
            .saturating_sub(reserved)
            .saturating_sub(pending_reservation(&path));
        debug!("found volume {} with {available} bytes available", path.display());
        volumes.push(Volume::new(path, available));
    }

    volumes.sort_by(|a, b| b.path.cmp(&a.path));
    volumes
}

/// Worst-case bytes still to be written by the `.tmp` files under `volume`.
pub fn pending_reservation(volume: &Path) -> u64 {
    let count = WalkDir::new(volume)
        .into_iter()
        .filter_map(Result::ok)
        .filter(|entry| entry.file_type().is_file() && is_temp_file(entry.path()))
        .count() as u64;
    count.saturating_mul(TEMP_FILE_RESERVATION)
}

/// Removes every `.tmp` file under `root`, returning how many were removed.
///
/// Runs once at startup, before the first scan: a `.tmp` file that survives a
/// restart belongs to a transfer that will never finish.
pub fn purge_temp_files(root: &Path) -> usize {
    let mut removed = 0;
    for entry in WalkDir::new(root).into_iter().filter_map(Result::ok) {
        if !entry.file_type().is_file() || !is_temp_file(entry.path()) {
            continue;
        }
        match fs::remove_file(entry.path()) {
            Ok(()) => {
                info!("removed stale temporary file {}", entry.path().display());
                removed += 1;
            }
            Err(err) => warn!("failed to remove {}: {err}", entry.path().display()),
        }
    }
    removed
}
