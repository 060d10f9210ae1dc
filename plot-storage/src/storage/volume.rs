use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// A volume accepts at most this many concurrent transfers.
pub const MAX_CONCURRENT_TASKS: u8 = 1;

/// One mounted storage location under the mount root.
#[derive(Debug, Clone)]
pub struct Volume {
    pub path: PathBuf,
    /// Usable bytes after the reserved threshold and pending `.tmp` reservations.
    pub available: u64,
    tasks: u8,
}

impl Volume {
    pub fn new(path: impl Into<PathBuf>, available: u64) -> Self {
        Volume {
            path: path.into(),
            available,
            tasks: 0,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn tasks(&self) -> u8 {
        self.tasks
    }

    pub fn is_idle(&self) -> bool {
        self.tasks < MAX_CONCURRENT_TASKS
    }

    pub(crate) fn with_tasks(mut self, tasks: u8) -> Self {
        self.tasks = tasks.min(MAX_CONCURRENT_TASKS);
        self
    }

    pub(crate) fn inc_task(&mut self) {
        if self.tasks < MAX_CONCURRENT_TASKS {
            self.tasks += 1;
        }
    }

    pub(crate) fn dec_task(&mut self) {
        self.tasks = self.tasks.saturating_sub(1);
    }

    pub fn info(&self) -> VolumeInfo {
        VolumeInfo {
            path: self.path.display().to_string(),
            available: self.available,
            tasks: self.tasks,
            idle: self.is_idle(),
        }
    }
}

/// Serializable view of a volume, returned by `GET /api/v1/volumes`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct VolumeInfo {
    pub path: String,
    pub available: u64,
    pub tasks: u8,
    pub idle: bool,
}
