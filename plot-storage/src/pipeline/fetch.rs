use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use futures::TryStreamExt;
use reqwest::StatusCode;
use thiserror::Error;
use tokio::fs::{File, create_dir_all, rename};
use tokio::io::{AsyncWriteExt, BufWriter};
use tokio_util::io::StreamReader;
use tracing::{error, info, warn};

use crate::dispatch::TaskHandler;
use crate::domain::task::{Task, TaskRepository, TaskStatus};
use crate::storage::{PathManager, PlotSource, VolumeAllocator};

#[derive(Error, Debug)]
pub enum FetchError {
    #[error("plot url {0} has no file name")]
    InvalidSource(String),

    #[error("no suitable volume for {0}")]
    NoVolume(String),

    #[error("upstream answered {0}")]
    Status(StatusCode),

    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("volume selection did not complete: {0}")]
    Join(#[from] tokio::task::JoinError),
}

/// Handles `Todo` tasks: copies the plot onto a volume, then records
/// `Finish` or `Fail`.
pub struct FetchHandler {
    allocator: Arc<VolumeAllocator>,
    store: Arc<dyn TaskRepository>,
    client: reqwest::Client,
    paths: PathManager,
}

impl FetchHandler {
    pub fn new(
        allocator: Arc<VolumeAllocator>,
        store: Arc<dyn TaskRepository>,
        client: reqwest::Client,
    ) -> Self {
        let paths = PathManager::new(allocator.mount_root());
        FetchHandler {
            allocator,
            store,
            client,
            paths,
        }
    }

    /// Streams the plot into a `.tmp` file on the selected volume and renames
    /// it into place. Returns the final path.
    ///
    /// The volume is released and the `.tmp` file removed on every exit path.
    pub async fn fetch(&self, task: &Task) -> Result<PathBuf, FetchError> {
        let source = PlotSource::parse(&task.plot_url)
            .ok_or_else(|| FetchError::InvalidSource(task.plot_url.clone()))?;

        let allocator = self.allocator.clone();
        let affinity = source.affinity().map(str::to_owned);
        let min_bytes = task.disk_space;
        let lease = tokio::task::spawn_blocking(move || {
            allocator.acquire(affinity.as_deref(), min_bytes)
        })
        .await?
        .ok_or_else(|| FetchError::NoVolume(task.plot_url.clone()))?;

        let destination = self
            .paths
            .plot_path(lease.path(), &task.cluster_name, &source);
        let temp_path = self
            .paths
            .temp_path(lease.path(), &task.cluster_name, &source);
        info!("fetching {} into {}", task.plot_url, temp_path.display());

        if let Some(parent) = temp_path.parent() {
            create_dir_all(parent).await?;
        }
        let _temp = TempFileGuard(temp_path.clone());
        let file = File::create(&temp_path).await?;

        let response = self.client.get(&task.plot_url).send().await?;
        if response.status() != StatusCode::OK {
            return Err(FetchError::Status(response.status()));
        }

        // Convert the body stream into an `AsyncRead`.
        let body = response.bytes_stream().map_err(io::Error::other);
        let body_reader = StreamReader::new(body);
        futures::pin_mut!(body_reader);

        let mut file_writer = BufWriter::new(file);
        let copied = tokio::io::copy(&mut body_reader, &mut file_writer).await?;
        file_writer.flush().await?;
        file_writer.get_ref().sync_all().await?;
        drop(file_writer);

        rename(&temp_path, &destination).await?;
        info!(
            "stored {} ({copied} bytes) at {}",
            task.plot_url,
            destination.display()
        );
        Ok(destination)
    }
}

#[async_trait::async_trait]
impl TaskHandler for FetchHandler {
    async fn handle(&self, task: Task) -> Option<Task> {
        let status = match self.fetch(&task).await {
            Ok(_) => TaskStatus::Finish,
            Err(err) => {
                error!("failed to fetch {}: {err}", task.plot_url);
                TaskStatus::Fail
            }
        };

        match self.store.transition(&task.plot_url, status).await {
            Ok(updated) => Some(updated),
            Err(err) => {
                error!("failed to record {status} for {}: {err}", task.plot_url);
                None
            }
        }
    }
}

/// Removes the file at its path, if it still exists, when dropped.
struct TempFileGuard(PathBuf);

impl TempFileGuard {
    fn path(&self) -> &Path {
        &self.0
    }
}

impl Drop for TempFileGuard {
    fn drop(&mut self) {
        match std::fs::remove_file(self.path()) {
            Ok(()) => info!("removed temporary file {}", self.path().display()),
            Err(err) if err.kind() == io::ErrorKind::NotFound => {}
            Err(err) => warn!("failed to remove {}: {err}", self.path().display()),
        }
    }
}
