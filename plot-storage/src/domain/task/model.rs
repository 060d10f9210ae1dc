use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::plot_model::UploadPlotInput;
use crate::error::AppError;

/// Lifecycle of a task: `Todo -> Finish | Fail -> Done`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Todo,
    Finish,
    Fail,
    Done,
}

impl TaskStatus {
    pub fn is_terminal(self) -> bool {
        self == TaskStatus::Done
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TaskStatus::Todo => "todo",
            TaskStatus::Finish => "finish",
            TaskStatus::Fail => "fail",
            TaskStatus::Done => "done",
        };
        f.write_str(name)
    }
}

/// Durable record of one plot transfer, keyed by `plot_url`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Task {
    pub plot_url: String,
    pub status: TaskStatus,
    pub cluster_name: String,
    pub finish_url: String,
    pub fail_url: String,
    pub disk_space: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Task {
    pub fn new(input: UploadPlotInput, cluster_name: impl Into<String>) -> Self {
        let now = Utc::now();
        Task {
            plot_url: input.plot_url,
            status: TaskStatus::Todo,
            cluster_name: cluster_name.into(),
            finish_url: input.finish_url,
            fail_url: input.fail_url,
            disk_space: input.disk_space,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn validate(&self) -> Result<(), AppError> {
        if self.plot_url.is_empty() {
            return Err(AppError::Validation("plot url is empty".to_string()));
        }
        if self.finish_url.is_empty() {
            return Err(AppError::Validation("finish url is empty".to_string()));
        }
        if self.fail_url.is_empty() {
            return Err(AppError::Validation("fail url is empty".to_string()));
        }
        Ok(())
    }
}
