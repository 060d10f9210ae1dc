pub mod model;
pub mod repository;

pub use model::{Task, TaskStatus};
pub use repository::{SqliteTaskRepository, TaskRepository};
