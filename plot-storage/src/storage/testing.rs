use std::collections::HashMap;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::storage::registry::VolumeProbe;

/// Probe that reports the listed directories as mount points with fixed capacities.
#[derive(Debug, Default)]
pub struct FixedProbe {
    capacities: Mutex<HashMap<PathBuf, u64>>,
}

impl FixedProbe {
    pub fn new<P: AsRef<Path>>(volumes: impl IntoIterator<Item = (P, u64)>) -> Self {
        let capacities = volumes
            .into_iter()
            .map(|(path, bytes)| (path.as_ref().to_path_buf(), bytes))
            .collect();
        FixedProbe {
            capacities: Mutex::new(capacities),
        }
    }

    pub fn set(&self, path: impl AsRef<Path>, bytes: u64) {
        self.capacities().insert(path.as_ref().to_path_buf(), bytes);
    }

    pub fn remove(&self, path: impl AsRef<Path>) {
        self.capacities().remove(path.as_ref());
    }

    fn capacities(&self) -> MutexGuard<'_, HashMap<PathBuf, u64>> {
        self.capacities.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl VolumeProbe for FixedProbe {
    fn is_mount_point(&self, path: &Path) -> io::Result<bool> {
        Ok(self.capacities().contains_key(path))
    }

    fn available_bytes(&self, path: &Path) -> io::Result<u64> {
        self.capacities()
            .get(path)
            .copied()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, "not a volume"))
    }
}
