use axum::{http::header, response::IntoResponse, Json};
use serde_json::{json, Value};

use crate::metrics::gather_metrics;

pub async fn health() -> Json<Value> {
    Json(json!({ "status": "healthy" }))
}

pub async fn metrics() -> impl IntoResponse {
    (
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        gather_metrics(),
    )
}
