pub mod api;
pub mod client;
pub mod config;
pub mod dispatch;
pub mod domain;
pub mod error;
pub mod pipeline;
pub mod service;
pub mod storage;
pub mod utils;

use std::sync::Arc;

use tracing::{error, info};

use crate::config::Config;
use crate::dispatch::Dispatcher;
use crate::domain::task::repository::open_pool;
use crate::domain::task::{SqliteTaskRepository, TaskRepository};
use crate::storage::{VolumeAllocator, VolumeProbe};
use crate::utils::state::AppState;

const DB_MAX_CONNECTIONS: u32 = 12;

/// Opens the task store, prepares the volumes and starts the workers.
///
/// Leftover `.tmp` files are purged before the first volume scan, and tasks
/// that had not reached `Done` when the process last stopped are queued again
/// once the workers are running.
pub async fn bootstrap(config: Config, probe: Arc<dyn VolumeProbe>) -> anyhow::Result<Arc<AppState>> {
    let pool = open_pool(&config.db_path, DB_MAX_CONNECTIONS).await?;
    let task_storage: Arc<dyn TaskRepository> = Arc::new(SqliteTaskRepository::new(Arc::new(pool)));

    let allocator = Arc::new(VolumeAllocator::new(
        &config.mount_root,
        config.reserved_space,
        probe,
    ));
    {
        let allocator = allocator.clone();
        tokio::task::spawn_blocking(move || {
            let purged = allocator.purge_temp_files();
            allocator.refresh();
            info!(
                "purged {purged} temporary file(s), found {} volume(s) under {}",
                allocator.snapshot().len(),
                allocator.mount_root().display()
            );
        })
        .await?;
    }

    let client = reqwest::Client::builder().build()?;
    let handlers = pipeline::handler_table(allocator.clone(), task_storage.clone(), client);
    let (dispatcher, queue) = dispatch::channel(config.queue_size);
    queue.spawn_workers(config.workers, handlers, &dispatcher);
    info!("started {} worker(s)", config.workers);

    tokio::spawn(recover(task_storage.clone(), dispatcher.clone()));

    Ok(Arc::new(AppState::new(config, task_storage, allocator, dispatcher)))
}

async fn recover(store: Arc<dyn TaskRepository>, dispatcher: Dispatcher) {
    let tasks = match store.list_unfinished().await {
        Ok(tasks) => tasks,
        Err(err) => {
            error!("failed to load unfinished tasks: {err}");
            return;
        }
    };
    if tasks.is_empty() {
        return;
    }

    info!("resuming {} unfinished task(s)", tasks.len());
    for task in tasks {
        let plot_url = task.plot_url.clone();
        if let Err(err) = dispatcher.submit(task).await {
            error!("failed to resume {plot_url}: {err}");
            return;
        }
    }
}
