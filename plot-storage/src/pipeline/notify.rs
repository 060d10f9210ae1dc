use std::sync::Arc;

use tracing::{error, info, warn};

use crate::dispatch::TaskHandler;
use crate::domain::plot_model::PlotNotice;
use crate::domain::task::{Task, TaskRepository, TaskStatus};

/// Which of the requester's callbacks a [`NotifyHandler`] calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Callback {
    Finish,
    Fail,
}

impl Callback {
    fn url(self, task: &Task) -> &str {
        match self {
            Callback::Finish => &task.finish_url,
            Callback::Fail => &task.fail_url,
        }
    }
}

/// Handles `Finish` and `Fail` tasks by posting the outcome to the
/// requester, then records `Done`.
///
/// Callbacks are sent once. If the request never completes, the task stays
/// where it is.
pub struct NotifyHandler {
    store: Arc<dyn TaskRepository>,
    client: reqwest::Client,
    callback: Callback,
}

impl NotifyHandler {
    pub fn new(store: Arc<dyn TaskRepository>, client: reqwest::Client, callback: Callback) -> Self {
        NotifyHandler {
            store,
            client,
            callback,
        }
    }
}

#[async_trait::async_trait]
impl TaskHandler for NotifyHandler {
    async fn handle(&self, task: Task) -> Option<Task> {
        let url = self.callback.url(&task);
        info!("notifying {url} that {} is {}", task.plot_url, task.status);

        let notice = PlotNotice {
            file: task.plot_url.clone(),
        };
        match self.client.post(url).json(&notice).send().await {
            Ok(response) if !response.status().is_success() => {
                warn!("callback {url} for {} answered {}", task.plot_url, response.status());
            }
            Ok(_) => {}
            Err(err) => {
                warn!(
                    "callback {url} for {} failed, task stays at {}: {err}",
                    task.plot_url, task.status
                );
                return None;
            }
        }

        if let Err(err) = self.store.transition(&task.plot_url, TaskStatus::Done).await {
            error!("failed to record done for {}: {err}", task.plot_url);
        }
        None
    }
}
