use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tracing::{debug, info};
use walkdir::WalkDir;

use crate::storage::registry::{self, VolumeProbe};
use crate::storage::volume::{Volume, VolumeInfo};

/// Picks the volume a plot is written to and tracks which volumes are busy.
///
/// Every read or write of the volume list and of the busy counters happens
/// under one lock. The lock is never held across a transfer: callers hold a
/// [`VolumeLease`] instead, which gives the slot back when dropped.
///
/// All methods do blocking filesystem walks and must be called from a
/// blocking context.
pub struct VolumeAllocator {
    mount_root: PathBuf,
    reserved: u64,
    probe: Arc<dyn VolumeProbe>,
    state: Mutex<AllocatorState>,
}

#[derive(Default)]
struct AllocatorState {
    volumes: Vec<Volume>,
    cursor: usize,
    /// Busy counters of volumes that vanished while a transfer held them.
    parked: HashMap<PathBuf, u8>,
}

impl VolumeAllocator {
    pub fn new(mount_root: impl Into<PathBuf>, reserved: u64, probe: Arc<dyn VolumeProbe>) -> Self {
        VolumeAllocator {
            mount_root: mount_root.into(),
            reserved,
            probe,
            state: Mutex::new(AllocatorState::default()),
        }
    }

    pub fn mount_root(&self) -> &Path {
        &self.mount_root
    }

    /// Removes leftover `.tmp` files. Must run before the first [`refresh`](Self::refresh).
    pub fn purge_temp_files(&self) -> usize {
        registry::purge_temp_files(&self.mount_root)
    }

    /// Rescans the mount root. Busy state follows the volume path.
    pub fn refresh(&self) {
        let scanned = registry::scan_volumes(&self.mount_root, self.reserved, self.probe.as_ref());
        self.lock().merge(scanned);
    }

    /// Selects a volume for a plot needing `min_bytes`.
    ///
    /// A volume that already holds a directory ending in `affinity` is returned
    /// whatever its load or free space, and without taking its slot. Otherwise
    /// the next idle volume with enough space, in round-robin order, is
    /// reserved.
    pub fn acquire(self: &Arc<Self>, affinity: Option<&str>, min_bytes: u64) -> Option<VolumeLease> {
        self.refresh();

        let affinity = affinity.filter(|dir| !dir.is_empty()).map(Path::new);
        let selected = self.lock().select(affinity, min_bytes, self.reserved);
        match selected {
            Some((path, reserved)) => {
                info!(
                    "selected volume {} for {:?} (reserved slot: {reserved})",
                    path.display(),
                    affinity
                );
                Some(VolumeLease {
                    allocator: Arc::clone(self),
                    path,
                    reserved,
                })
            }
            None => {
                info!("no volume available for {:?} needing {min_bytes} bytes", affinity);
                None
            }
        }
    }

    /// Gives back one slot of the volume at `path`. Unknown paths are ignored.
    pub fn release(&self, path: &Path) {
        let mut state = self.lock();
        if let Some(volume) = state.volumes.iter_mut().find(|v| v.path == path) {
            volume.dec_task();
            return;
        }

        let drained = match state.parked.get_mut(path) {
            Some(tasks) => {
                *tasks = tasks.saturating_sub(1);
                *tasks == 0
            }
            None => false,
        };
        if drained {
            state.parked.remove(path);
        }
    }

    pub fn snapshot(&self) -> Vec<VolumeInfo> {
        self.lock().volumes.iter().map(Volume::info).collect()
    }

    fn lock(&self) -> MutexGuard<'_, AllocatorState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl AllocatorState {
    fn merge(&mut self, scanned: Vec<Volume>) {
        let mut previous: HashMap<PathBuf, u8> = self
            .volumes
            .drain(..)
            .map(|volume| (volume.path.clone(), volume.tasks()))
            .collect();

        let volumes = scanned
            .into_iter()
            .map(|volume| {
                let tasks = previous
                    .remove(&volume.path)
                    .or_else(|| self.parked.remove(&volume.path))
                    .unwrap_or(0);
                volume.with_tasks(tasks)
            })
            .collect();

        for (path, tasks) in previous {
            if tasks > 0 {
                info!("volume {} vanished with {tasks} running transfer(s)", path.display());
                self.parked.insert(path, tasks);
            } else {
                info!("volume {} vanished", path.display());
            }
        }
        self.volumes = volumes;
    }

    /// Returns the chosen path and whether its slot was taken.
    fn select(&mut self, affinity: Option<&Path>, min_bytes: u64, reserved: u64) -> Option<(PathBuf, bool)> {
        let len = self.volumes.len();
        if len == 0 {
            return None;
        }
        let start = self.cursor % len;
        let rotation = || (0..len).map(move |i| (start + i) % len);

        let mut chosen = affinity.and_then(|fragment| {
            rotation()
                .find(|&idx| holds_directory(&self.volumes[idx].path, fragment))
                .map(|idx| (idx, false))
        });

        if chosen.is_none() {
            let floor = reserved.max(min_bytes);
            chosen = rotation()
                .find(|&idx| {
                    let volume = &self.volumes[idx];
                    if !volume.is_idle() {
                        return false;
                    }
                    if volume.available < floor {
                        debug!(
                            "{} available {} < {floor}",
                            volume.path.display(),
                            volume.available
                        );
                        return false;
                    }
                    true
                })
                .map(|idx| (idx, true));
        }

        let offset = chosen.map_or(0, |(idx, _)| (idx + len - start) % len);
        self.cursor = (start + offset + 1) % len;

        let (idx, take_slot) = chosen?;
        let volume = &mut self.volumes[idx];
        if take_slot {
            volume.inc_task();
        }
        Some((volume.path.clone(), take_slot))
    }
}

fn holds_directory(volume: &Path, fragment: &Path) -> bool {
    WalkDir::new(volume)
        .min_depth(1)
        .into_iter()
        .filter_map(Result::ok)
        .any(|entry| entry.file_type().is_dir() && entry.path().ends_with(fragment))
}

/// A volume handed out by [`VolumeAllocator::acquire`].
///
/// Dropping the lease gives the slot back if the acquisition took one.
pub struct VolumeLease {
    allocator: Arc<VolumeAllocator>,
    path: PathBuf,
    reserved: bool,
}

impl VolumeLease {
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// False for affinity hits, which do not occupy the volume's slot.
    pub fn is_reserved(&self) -> bool {
        self.reserved
    }
}

impl Drop for VolumeLease {
    fn drop(&mut self) {
        if self.reserved {
            debug!("releasing volume {}", self.path.display());
            self.allocator.release(&self.path);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;
    use std::fs;
    use std::sync::Barrier;
    use std::thread;

    use tempfile::{TempDir, tempdir};

    use super::*;
    use crate::storage::testing::FixedProbe;

    const GB: u64 = 1024 * 1024 * 1024;

    fn setup(volumes: &[(&str, u64)], reserved: u64) -> (TempDir, Arc<FixedProbe>, Arc<VolumeAllocator>) {
        let root = tempdir().unwrap();
        let mut capacities = Vec::new();
        for (name, bytes) in volumes {
            let path = root.path().join(name);
            fs::create_dir_all(&path).unwrap();
            capacities.push((path, *bytes));
        }
        let probe = Arc::new(FixedProbe::new(capacities));
        let allocator = Arc::new(VolumeAllocator::new(
            root.path(),
            reserved,
            probe.clone() as Arc<dyn VolumeProbe>,
        ));
        allocator.refresh();
        (root, probe, allocator)
    }

    fn tasks_of(allocator: &VolumeAllocator, path: &Path) -> Option<u8> {
        let path = path.display().to_string();
        allocator
            .snapshot()
            .into_iter()
            .find(|info| info.path == path)
            .map(|info| info.tasks)
    }

    #[test]
    fn test_small_volume_is_never_selected() {
        let (root, _probe, allocator) =
            setup(&[("sda", 10 * GB), ("sdb", 50 * GB), ("sdc", 100 * GB)], 5 * GB);

        let mut seen = HashSet::new();
        for _ in 0..6 {
            let lease = allocator.acquire(None, 20 * GB).unwrap();
            assert!(lease.is_reserved());
            seen.insert(lease.path().to_path_buf());
        }

        let expected: HashSet<_> = [root.path().join("sdb"), root.path().join("sdc")].into();
        assert_eq!(seen, expected);
    }

    #[test]
    fn test_busy_volume_is_skipped_until_released() {
        let (root, _probe, allocator) = setup(&[("sda", 100 * GB), ("sdb", 100 * GB)], 0);

        let first = allocator.acquire(None, GB).unwrap();
        let second = allocator.acquire(None, GB).unwrap();
        assert_ne!(first.path(), second.path());
        assert!(allocator.acquire(None, GB).is_none());

        let freed = first.path().to_path_buf();
        drop(first);
        let third = allocator.acquire(None, GB).unwrap();
        assert_eq!(third.path(), freed);
        assert!(third.path().starts_with(root.path()));
    }

    #[test]
    fn test_no_volume_when_space_is_short() {
        let (_root, _probe, allocator) = setup(&[("sda", 2 * GB)], 0);
        assert!(allocator.acquire(None, 5 * GB).is_none());
        assert_eq!(allocator.snapshot()[0].tasks, 0);
    }

    #[test]
    fn test_affinity_wins_over_load_and_capacity() {
        let (root, _probe, allocator) = setup(&[("sda", 10 * GB), ("sdb", 100 * GB)], 0);
        let sda = root.path().join("sda");

        // Occupy both volumes; sdb is first in descending order.
        let on_sdb = allocator.acquire(None, GB).unwrap();
        let on_sda = allocator.acquire(None, GB).unwrap();
        assert_eq!(on_sda.path(), sda);

        fs::create_dir_all(sda.join("gva/cluster/teamA/setX")).unwrap();

        let lease = allocator.acquire(Some("teamA/setX"), 50 * GB).unwrap();
        assert_eq!(lease.path(), sda);
        assert!(!lease.is_reserved());
        drop(lease);
        assert_eq!(tasks_of(&allocator, &sda), Some(1));

        let lease = allocator.acquire(Some("setX"), 50 * GB).unwrap();
        assert_eq!(lease.path(), sda);
        drop(on_sdb);
    }

    #[test]
    fn test_affinity_miss_falls_back_to_round_robin() {
        let (root, _probe, allocator) = setup(&[("sda", 100 * GB)], 0);
        let lease = allocator.acquire(Some("unknown"), GB).unwrap();
        assert_eq!(lease.path(), root.path().join("sda"));
        assert!(lease.is_reserved());
    }

    #[test]
    fn test_rescan_keeps_busy_state() {
        let (root, probe, allocator) = setup(&[("sda", 100 * GB), ("sdb", 100 * GB)], 0);
        let sdb = root.path().join("sdb");

        let lease = allocator.acquire(None, GB).unwrap();
        assert_eq!(lease.path(), sdb);

        allocator.refresh();
        assert_eq!(tasks_of(&allocator, &sdb), Some(1));

        probe.remove(&sdb);
        allocator.refresh();
        assert_eq!(tasks_of(&allocator, &sdb), None);
        assert_eq!(allocator.snapshot().len(), 1);

        probe.set(&sdb, 100 * GB);
        allocator.refresh();
        assert_eq!(tasks_of(&allocator, &sdb), Some(1));

        drop(lease);
        assert_eq!(tasks_of(&allocator, &sdb), Some(0));
    }

    #[test]
    fn test_release_is_floored_and_ignores_unknown_paths() {
        let (root, _probe, allocator) = setup(&[("sda", 100 * GB)], 0);
        let sda = root.path().join("sda");

        allocator.release(&sda);
        allocator.release(Path::new("/no/such/volume"));
        assert_eq!(tasks_of(&allocator, &sda), Some(0));
    }

    #[test]
    fn test_one_holder_per_volume_under_contention() {
        let (_root, _probe, allocator) = setup(&[("sda", 100 * GB)], 0);
        let barrier = Arc::new(Barrier::new(8));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let allocator = allocator.clone();
                let barrier = barrier.clone();
                thread::spawn(move || {
                    barrier.wait();
                    let lease = allocator.acquire(None, GB);
                    let won = lease.is_some();
                    // Hold the lease until every thread has tried.
                    barrier.wait();
                    won
                })
            })
            .collect();

        let winners = handles
            .into_iter()
            .map(|handle| handle.join().unwrap())
            .filter(|won| *won)
            .count();
        assert_eq!(winners, 1);
    }
}
