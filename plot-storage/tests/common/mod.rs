#![allow(dead_code)]

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::Router;
use axum::extract::{Path as UrlPath, State};
use axum::http::{StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::Json;
use tempfile::TempDir;
use tokio::net::TcpListener;

use plot_storage::config::Config;
use plot_storage::domain::plot_model::{PlotNotice, UploadPlotInput};
use plot_storage::domain::task::{Task, TaskStatus};
use plot_storage::storage::testing::FixedProbe;
use plot_storage::utils::state::AppState;
use plot_storage::{api, bootstrap, client};

pub const GB: u64 = 1024 * 1024 * 1024;

/// Serves plot files under `/files/...` and records callbacks posted to
/// `/callback/{kind}`.
#[derive(Clone, Default)]
pub struct Upstream {
    files: Arc<Mutex<HashMap<String, Vec<u8>>>>,
    notices: Arc<Mutex<Vec<(String, String)>>>,
}

impl Upstream {
    pub async fn start() -> (Upstream, String) {
        let upstream = Upstream::default();
        let app = Router::new()
            .route("/files/{*path}", get(serve_file))
            .route("/callback/{kind}", post(record_notice))
            .with_state(upstream.clone());
        let base_url = serve(app).await;
        (upstream, base_url)
    }

    pub fn put(&self, path: &str, content: &[u8]) {
        self.files
            .lock()
            .unwrap()
            .insert(path.to_string(), content.to_vec());
    }

    /// `(kind, file)` for every callback received so far.
    pub fn notices(&self) -> Vec<(String, String)> {
        self.notices.lock().unwrap().clone()
    }
}

async fn serve_file(State(upstream): State<Upstream>, uri: Uri) -> Response {
    let content = upstream.files.lock().unwrap().get(uri.path()).cloned();
    match content {
        Some(content) => (StatusCode::OK, content).into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

async fn record_notice(
    State(upstream): State<Upstream>,
    UrlPath(kind): UrlPath<String>,
    Json(notice): Json<PlotNotice>,
) -> StatusCode {
    upstream.notices.lock().unwrap().push((kind, notice.file));
    StatusCode::OK
}

async fn serve(app: Router) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{addr}")
}

/// A running service over a scratch mount root and database.
pub struct TestService {
    pub base_url: String,
    pub state: Arc<AppState>,
    pub mount_root: TempDir,
    pub data_dir: TempDir,
}

impl TestService {
    pub fn volume(&self, name: &str) -> PathBuf {
        self.mount_root.path().join(name)
    }
}

pub fn create_volumes(root: &Path, volumes: &[(&str, u64)]) -> FixedProbe {
    let mut capacities = Vec::new();
    for (name, bytes) in volumes {
        let path = root.join(name);
        std::fs::create_dir_all(&path).unwrap();
        capacities.push((path, *bytes));
    }
    FixedProbe::new(capacities)
}

pub fn test_config(mount_root: &Path, data_dir: &Path) -> Config {
    Config {
        host: "127.0.0.1".to_string(),
        port: 0,
        db_path: data_dir.join("tasks.db"),
        cluster_name: "label".to_string(),
        reserved_space: 0,
        mount_root: mount_root.to_path_buf(),
        workers: 2,
        queue_size: 16,
    }
}

pub async fn start_service(volumes: &[(&str, u64)]) -> TestService {
    let mount_root = tempfile::tempdir().unwrap();
    let data_dir = tempfile::tempdir().unwrap();
    let probe = create_volumes(mount_root.path(), volumes);
    start_service_in(mount_root, data_dir, probe).await
}

pub async fn start_service_in(mount_root: TempDir, data_dir: TempDir, probe: FixedProbe) -> TestService {
    let config = test_config(mount_root.path(), data_dir.path());
    let state = bootstrap(config, Arc::new(probe)).await.unwrap();
    let base_url = serve(api::create_router(state.clone())).await;
    TestService {
        base_url,
        state,
        mount_root,
        data_dir,
    }
}

pub fn upload_input(upstream_url: &str, plot_path: &str, finish_url: &str, fail_url: &str, disk_space: u64) -> UploadPlotInput {
    UploadPlotInput {
        plot_url: format!("{upstream_url}{plot_path}"),
        finish_url: finish_url.to_string(),
        fail_url: fail_url.to_string(),
        disk_space,
    }
}

/// Polls the status endpoint until the task reaches `status`.
pub async fn wait_for_status(base_url: &str, plot_url: &str, status: TaskStatus) -> Task {
    let http = reqwest::Client::new();
    for _ in 0..100 {
        if let Ok(task) = client::plot_status(&http, base_url, plot_url).await {
            if task.status == status {
                return task;
            }
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    panic!("{plot_url} never reached {status}");
}

/// Every file below `dir`, relative to it.
pub fn files_under(dir: &Path) -> Vec<PathBuf> {
    let mut files: Vec<PathBuf> = walkdir::WalkDir::new(dir)
        .into_iter()
        .filter_map(Result::ok)
        .filter(|entry| entry.file_type().is_file())
        .map(|entry| entry.path().strip_prefix(dir).unwrap().to_path_buf())
        .collect();
    files.sort();
    files
}
