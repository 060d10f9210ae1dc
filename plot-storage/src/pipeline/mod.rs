pub mod fetch;
pub mod notify;

use std::sync::Arc;

use crate::dispatch::{HandlerTable, TaskHandler};
use crate::domain::task::{TaskRepository, TaskStatus};
use crate::storage::VolumeAllocator;

pub use fetch::{FetchError, FetchHandler};
pub use notify::{Callback, NotifyHandler};

/// `Todo` is fetched, `Finish` and `Fail` are reported. `Done` has no handler.
pub fn handler_table(
    allocator: Arc<VolumeAllocator>,
    store: Arc<dyn TaskRepository>,
    client: reqwest::Client,
) -> HandlerTable {
    let fetch: Arc<dyn TaskHandler> =
        Arc::new(FetchHandler::new(allocator, store.clone(), client.clone()));
    let finish: Arc<dyn TaskHandler> = Arc::new(NotifyHandler::new(
        store.clone(),
        client.clone(),
        Callback::Finish,
    ));
    let fail: Arc<dyn TaskHandler> = Arc::new(NotifyHandler::new(store, client, Callback::Fail));

    HandlerTable::from([
        (TaskStatus::Todo, fetch),
        (TaskStatus::Finish, finish),
        (TaskStatus::Fail, fail),
    ])
}
