//! Bounded task queue drained by a fixed pool of workers.
//!
//! Each dequeued task is handed to the handler registered for its status. A
//! handler returns the record it left behind (after its own transition), and
//! the worker puts that record back on the queue once the handler is done, so
//! a task is never handled twice at the same time.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

use crate::domain::task::{Task, TaskStatus};
use crate::error::AppError;

#[async_trait::async_trait]
pub trait TaskHandler: Send + Sync {
    /// Drives `task` one step and returns the follow-up to dispatch, if any.
    async fn handle(&self, task: Task) -> Option<Task>;
}

/// Status to handler mapping, built once before the workers start.
pub type HandlerTable = HashMap<TaskStatus, Arc<dyn TaskHandler>>;

/// Creates a queue holding at most `capacity` pending tasks.
pub fn channel(capacity: usize) -> (Dispatcher, DispatchQueue) {
    let (tx, rx) = mpsc::channel(capacity);
    (Dispatcher { tx }, DispatchQueue { rx })
}

/// Producer side of the queue.
#[derive(Clone, Debug)]
pub struct Dispatcher {
    tx: mpsc::Sender<Task>,
}

impl Dispatcher {
    /// Waits for room in the queue, then enqueues `task`.
    pub async fn submit(&self, task: Task) -> Result<(), AppError> {
        self.tx.send(task).await.map_err(|_| AppError::QueueClosed)
    }
}

/// Consumer side of the queue.
pub struct DispatchQueue {
    rx: mpsc::Receiver<Task>,
}

impl DispatchQueue {
    /// Starts `workers` workers sharing the queue. They stop once every
    /// [`Dispatcher`] is dropped and the queue is drained.
    pub fn spawn_workers(
        self,
        workers: usize,
        handlers: HandlerTable,
        dispatcher: &Dispatcher,
    ) -> Vec<JoinHandle<()>> {
        let rx = Arc::new(Mutex::new(self.rx));
        let handlers = Arc::new(handlers);

        (0..workers)
            .map(|id| {
                let rx = rx.clone();
                let handlers = handlers.clone();
                let requeue = dispatcher.tx.downgrade();
                tokio::spawn(async move {
                    loop {
                        let next = rx.lock().await.recv().await;
                        let Some(task) = next else {
                            break;
                        };
                        if let Some(follow_up) = run(id, &handlers, task).await {
                            forward(&requeue, follow_up);
                        }
                    }
                    debug!("worker {id} stopped");
                })
            })
            .collect()
    }
}

async fn run(worker: usize, handlers: &HandlerTable, task: Task) -> Option<Task> {
    let Some(handler) = handlers.get(&task.status) else {
        error!(
            "no handler registered for status {}, dropping task {}",
            task.status, task.plot_url
        );
        return None;
    };
    debug!("worker {worker} handling {} ({})", task.plot_url, task.status);
    handler.handle(task).await
}

/// Enqueues a follow-up without making the worker wait on its own queue.
fn forward(requeue: &mpsc::WeakSender<Task>, task: Task) {
    let Some(tx) = requeue.upgrade() else {
        warn!("queue closed, dropping follow-up for {}", task.plot_url);
        return;
    };
    match tx.try_send(task) {
        Ok(()) => {}
        Err(TrySendError::Full(task)) => {
            tokio::spawn(async move {
                if let Err(err) = tx.send(task).await {
                    warn!("queue closed, dropping follow-up for {}", err.0.plot_url);
                }
            });
        }
        Err(TrySendError::Closed(task)) => {
            warn!("queue closed, dropping follow-up for {}", task.plot_url);
        }
    }
}
