use std::sync::Arc;

use crate::config::Config;
use crate::dispatch::Dispatcher;
use crate::domain::task::TaskRepository;
use crate::storage::VolumeAllocator;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub task_storage: Arc<dyn TaskRepository>,
    pub allocator: Arc<VolumeAllocator>,
    pub dispatcher: Dispatcher,
}

impl AppState {
    pub fn new(
        config: Config,
        task_storage: Arc<dyn TaskRepository>,
        allocator: Arc<VolumeAllocator>,
        dispatcher: Dispatcher,
    ) -> Self {
        AppState {
            config: Arc::new(config),
            task_storage,
            allocator,
            dispatcher,
        }
    }
}
