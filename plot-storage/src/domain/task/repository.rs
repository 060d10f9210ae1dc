use std::path::Path;
use std::sync::Arc;

use chrono::Utc;
use sqlx::migrate::Migrator;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::{FromRow, SqlitePool};

use crate::domain::task::{Task, TaskStatus};
use crate::error::AppError;

type Result<T> = std::result::Result<T, AppError>;

pub static MIGRATOR: Migrator = sqlx::migrate!("./migrations");

/// Opens (creating if needed) the task database at `path` and applies migrations.
pub async fn open_pool(path: &Path, max_connections: u32) -> Result<SqlitePool> {
    let options = SqliteConnectOptions::new()
        .filename(path)
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal);
    let pool = SqlitePoolOptions::new()
        .max_connections(max_connections)
        .connect_with(options)
        .await
        .map_err(AppError::StoreUnavailable)?;
    MIGRATOR.run(&pool).await?;
    Ok(pool)
}

/// Durable mapping from plot url to task record.
///
/// Every write replaces the record under its key inside one transaction, so a
/// reader sees either the old record or the new one, never both or neither.
/// Which transitions are legal is up to the caller.
#[async_trait::async_trait]
pub trait TaskRepository: Send + Sync {
    /// Stores `task` as a fresh `Todo` record, replacing any record under the same url.
    async fn intake(&self, task: Task) -> Result<Task>;

    async fn transition(&self, plot_url: &str, status: TaskStatus) -> Result<Task>;

    async fn query_task(&self, plot_url: &str) -> Result<Task>;

    /// Every task that has not reached `Done`.
    async fn list_unfinished(&self) -> Result<Vec<Task>>;
}

#[derive(Debug, FromRow)]
struct TaskRow {
    plot_url: String,
    meta: String,
}

impl TaskRow {
    fn decode(&self) -> Result<Task> {
        Ok(serde_json::from_str(&self.meta)?)
    }
}

#[derive(Debug)]
pub struct SqliteTaskRepository {
    pub pool: Arc<SqlitePool>,
}

impl SqliteTaskRepository {
    pub fn new(pool: Arc<SqlitePool>) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl TaskRepository for SqliteTaskRepository {
    async fn intake(&self, mut task: Task) -> Result<Task> {
        task.validate()?;
        task.status = TaskStatus::Todo;
        let meta = serde_json::to_string(&task)?;

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(AppError::StoreUnavailable)?;
        sqlx::query("DELETE FROM tasks WHERE plot_url = ?")
            .bind(&task.plot_url)
            .execute(&mut *tx)
            .await?;
        sqlx::query("INSERT INTO tasks (plot_url, meta) VALUES (?, ?)")
            .bind(&task.plot_url)
            .bind(meta)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(task)
    }

    async fn transition(&self, plot_url: &str, status: TaskStatus) -> Result<Task> {
        let mut tx = self.pool.begin().await?;
        let row = sqlx::query_as::<_, TaskRow>(
            "DELETE FROM tasks WHERE plot_url = ? RETURNING plot_url, meta",
        )
        .bind(plot_url)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("task {plot_url}")))?;

        let mut task = row.decode()?;
        task.status = status;
        task.updated_at = Utc::now();
        let meta = serde_json::to_string(&task)?;

        sqlx::query("INSERT INTO tasks (plot_url, meta) VALUES (?, ?)")
            .bind(&row.plot_url)
            .bind(meta)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(task)
    }

    async fn query_task(&self, plot_url: &str) -> Result<Task> {
        sqlx::query_as::<_, TaskRow>("SELECT plot_url, meta FROM tasks WHERE plot_url = ?")
            .bind(plot_url)
            .fetch_optional(self.pool.as_ref())
            .await?
            .ok_or_else(|| AppError::NotFound(format!("task {plot_url}")))?
            .decode()
    }

    async fn list_unfinished(&self) -> Result<Vec<Task>> {
        let rows = sqlx::query_as::<_, TaskRow>("SELECT plot_url, meta FROM tasks ORDER BY plot_url")
            .fetch_all(self.pool.as_ref())
            .await?;

        let mut tasks = Vec::with_capacity(rows.len());
        for row in rows {
            match row.decode() {
                Ok(task) if !task.status.is_terminal() => tasks.push(task),
                Ok(_) => {}
                Err(err) => tracing::warn!("skipping unreadable task {}: {err}", row.plot_url),
            }
        }
        Ok(tasks)
    }
}

#[cfg(test)]
mod tests {
    use tempfile::{TempDir, tempdir};

    use super::*;
    use crate::domain::plot_model::UploadPlotInput;

    async fn repository() -> (TempDir, SqliteTaskRepository) {
        let dir = tempdir().unwrap();
        let pool = open_pool(&dir.path().join("tasks.db"), 4).await.unwrap();
        (dir, SqliteTaskRepository::new(Arc::new(pool)))
    }

    fn task(plot_url: &str, finish_url: &str) -> Task {
        let input = UploadPlotInput {
            plot_url: plot_url.to_string(),
            finish_url: finish_url.to_string(),
            fail_url: "http://cb/fail".to_string(),
            disk_space: 1 << 30,
        };
        Task::new(input, "cluster")
    }

    async fn count(repo: &SqliteTaskRepository, plot_url: &str) -> i64 {
        sqlx::query_scalar("SELECT COUNT(*) FROM tasks WHERE plot_url = ?")
            .bind(plot_url)
            .fetch_one(repo.pool.as_ref())
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_intake_round_trip() {
        let (_dir, repo) = repository().await;
        let url = "http://h/dirA/file1.dat";
        repo.intake(task(url, "http://cb/finish")).await.unwrap();

        let stored = repo.query_task(url).await.unwrap();
        assert_eq!(stored.status, TaskStatus::Todo);
        assert_eq!(stored.finish_url, "http://cb/finish");
        assert_eq!(stored.fail_url, "http://cb/fail");
        assert_eq!(stored.disk_space, 1 << 30);
        assert_eq!(stored.cluster_name, "cluster");
        assert_eq!(count(&repo, url).await, 1);
    }

    #[tokio::test]
    async fn test_reintake_overwrites() {
        let (_dir, repo) = repository().await;
        let url = "http://h/dirA/file1.dat";
        repo.intake(task(url, "http://cb/old")).await.unwrap();
        repo.transition(url, TaskStatus::Fail).await.unwrap();

        repo.intake(task(url, "http://cb/new")).await.unwrap();
        let stored = repo.query_task(url).await.unwrap();
        assert_eq!(stored.status, TaskStatus::Todo);
        assert_eq!(stored.finish_url, "http://cb/new");
        assert_eq!(count(&repo, url).await, 1);
    }

    #[tokio::test]
    async fn test_transitions_keep_one_record() {
        let (_dir, repo) = repository().await;
        let url = "http://h/dirA/file1.dat";
        let created = repo.intake(task(url, "http://cb/finish")).await.unwrap();

        let finished = repo.transition(url, TaskStatus::Finish).await.unwrap();
        assert_eq!(finished.status, TaskStatus::Finish);
        assert_eq!(finished.finish_url, created.finish_url);
        assert!(finished.updated_at >= created.updated_at);
        assert_eq!(count(&repo, url).await, 1);

        let done = repo.transition(url, TaskStatus::Done).await.unwrap();
        assert_eq!(done.status, TaskStatus::Done);
        assert_eq!(repo.query_task(url).await.unwrap().status, TaskStatus::Done);
        assert_eq!(count(&repo, url).await, 1);
    }

    #[tokio::test]
    async fn test_transition_unknown_task() {
        let (_dir, repo) = repository().await;
        let err = repo
            .transition("http://h/none", TaskStatus::Finish)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));
        assert_eq!(count(&repo, "http://h/none").await, 0);
    }

    #[tokio::test]
    async fn test_invalid_intake_is_not_stored() {
        let (_dir, repo) = repository().await;
        let url = "http://h/dirA/file1.dat";
        let err = repo.intake(task(url, "")).await.unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));
        assert!(matches!(
            repo.query_task(url).await.unwrap_err(),
            AppError::NotFound(_)
        ));
    }

    #[tokio::test]
    async fn test_list_unfinished_skips_done() {
        let (_dir, repo) = repository().await;
        for url in ["http://h/a/1", "http://h/a/2", "http://h/a/3"] {
            repo.intake(task(url, "http://cb/finish")).await.unwrap();
        }
        repo.transition("http://h/a/1", TaskStatus::Finish).await.unwrap();
        repo.transition("http://h/a/1", TaskStatus::Done).await.unwrap();
        repo.transition("http://h/a/2", TaskStatus::Fail).await.unwrap();

        let pending = repo.list_unfinished().await.unwrap();
        let summary: Vec<_> = pending
            .iter()
            .map(|t| (t.plot_url.as_str(), t.status))
            .collect();
        assert_eq!(
            summary,
            vec![("http://h/a/2", TaskStatus::Fail), ("http://h/a/3", TaskStatus::Todo)]
        );
    }

    #[tokio::test]
    async fn test_concurrent_writes_never_duplicate() {
        let (_dir, repo) = repository().await;
        let repo = Arc::new(repo);
        let url = "http://h/dirA/file1.dat";
        repo.intake(task(url, "http://cb/finish")).await.unwrap();

        let mut handles = Vec::new();
        for i in 0..16 {
            let repo = repo.clone();
            handles.push(tokio::spawn(async move {
                if i % 2 == 0 {
                    repo.intake(task(url, "http://cb/finish")).await.map(|_| ())
                } else {
                    repo.transition(url, TaskStatus::Finish).await.map(|_| ())
                }
            }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }
        assert_eq!(count(&repo, url).await, 1);
    }
}
