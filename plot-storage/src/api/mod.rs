use std::sync::Arc;

use axum::Router;
use axum::routing::{get, post};
use tower_http::trace::TraceLayer;

use crate::service::plot::{get_plot_status_handler, list_volumes_handler, upload_plot_handler};
use crate::utils::state::AppState;

pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .nest("/api/v1", v1_router())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

fn v1_router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/plot/upload", post(upload_plot_handler))
        .route("/plot/status", get(get_plot_status_handler))
        .route("/volumes", get(list_volumes_handler))
}
