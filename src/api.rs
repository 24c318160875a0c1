// src/api.rs
use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde_json::json;
use tower_http::cors::CorsLayer;
use tracing::warn;

use crate::error::PipelineError;
use crate::pipeline::Pipeline;
use crate::query::QueryInput;
use crate::store::DocumentStore;

#[derive(Clone)]
pub struct AppState {
    pub pipeline: Arc<Pipeline>,
    pub store: Arc<dyn DocumentStore>,
}

impl AppState {
    pub fn new(pipeline: Pipeline) -> Self {
        let store = pipeline.store();
        Self {
            pipeline: Arc::new(pipeline),
            store,
        }
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(|| async { "OK" }))
        .route("/festivals", post(discover))
        .route("/festivals/{id}", get(find_festival))
        .layer(CorsLayer::very_permissive())
        .with_state(state)
}

async fn discover(State(state): State<AppState>, Json(body): Json<QueryInput>) -> Response {
    match state.pipeline.run(body).await {
        Ok(outcome) => (StatusCode::OK, Json(outcome)).into_response(),
        Err(PipelineError::InvalidQuery(msg)) => {
            (StatusCode::BAD_REQUEST, Json(json!({ "error": msg }))).into_response()
        }
    }
}

async fn find_festival(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    match state.store.find_one(&id).await {
        Ok(Some(event)) => (StatusCode::OK, Json(event)).into_response(),
        Ok(None) => (
            StatusCode::NOT_FOUND,
            Json(json!({ "error": "festival not found" })),
        )
            .into_response(),
        Err(error) => {
            warn!(target: "pipeline", %id, %error, "store lookup failed");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(json!({ "error": "store unavailable" })),
            )
                .into_response()
        }
    }
}
