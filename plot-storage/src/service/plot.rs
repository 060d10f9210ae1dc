use std::sync::Arc;

use axum::Json;
use axum::body::{Body, to_bytes};
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use serde::Deserialize;
use tracing::info;

use crate::domain::plot_model::UploadPlotInput;
use crate::domain::task::Task;
use crate::error::AppError;
use crate::utils::state::AppState;

/// Upper bound on an upload request body. Valid bodies are a few hundred bytes.
pub const MAX_UPLOAD_BODY: usize = 64 * 1024;

/// Accepts a plot for transfer.
///
/// The task is durable before this returns; the transfer itself runs later on
/// a worker.
pub async fn upload_plot_handler(
    State(state): State<Arc<AppState>>,
    body: Body,
) -> Result<impl IntoResponse, AppError> {
    let body = to_bytes(body, MAX_UPLOAD_BODY)
        .await
        .map_err(|err| AppError::BodyRead(err.to_string()))?;
    let input: UploadPlotInput =
        serde_json::from_slice(&body).map_err(|err| AppError::InvalidBody(err.to_string()))?;

    let task = Task::new(input, state.config.cluster_name.as_str());
    let task = state.task_storage.intake(task).await?;
    info!("accepted {} ({} bytes requested)", task.plot_url, task.disk_space);

    state.dispatcher.submit(task).await?;
    Ok(StatusCode::OK)
}

#[derive(Debug, Deserialize)]
pub struct StatusQuery {
    pub plot_url: String,
}

pub async fn get_plot_status_handler(
    State(state): State<Arc<AppState>>,
    Query(query): Query<StatusQuery>,
) -> Result<impl IntoResponse, AppError> {
    let task = state.task_storage.query_task(&query.plot_url).await?;
    Ok(Json(task))
}

pub async fn list_volumes_handler(
    State(state): State<Arc<AppState>>,
) -> Result<impl IntoResponse, AppError> {
    let allocator = state.allocator.clone();
    let volumes = tokio::task::spawn_blocking(move || allocator.snapshot()).await?;
    Ok(Json(volumes))
}
