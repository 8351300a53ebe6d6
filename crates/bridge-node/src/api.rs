use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use serde::Serialize;
use std::sync::Arc;

use crate::metrics;
use crate::publisher::{PublisherStatus, StreamPublisher};
use crate::status::{CameraStatus, StatusBoard};

#[derive(Clone)]
pub struct ApiState {
    pub status: Arc<StatusBoard>,
    pub publisher: Arc<StreamPublisher>,
}

#[derive(Serialize)]
pub struct CamerasResponse {
    pub cameras: Vec<CameraStatus>,
    pub publisher: PublisherStatus,
}

pub fn router(state: ApiState) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/cameras", get(cameras))
        .route("/metrics", get(|| async { metrics::render() }))
        .with_state(state)
}

pub async fn healthz(State(state): State<ApiState>) -> impl IntoResponse {
    let publisher = state.publisher.status().await;
    if publisher.gave_up {
        (StatusCode::SERVICE_UNAVAILABLE, "media server failed")
    } else {
        (StatusCode::OK, "ok")
    }
}

pub async fn cameras(State(state): State<ApiState>) -> impl IntoResponse {
    let body = CamerasResponse {
        cameras: state.status.snapshot().await,
        publisher: state.publisher.status().await,
    };
    (StatusCode::OK, Json(body))
}
