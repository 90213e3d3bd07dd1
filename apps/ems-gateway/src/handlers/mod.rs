//! Handlers 模块

pub mod control;
pub mod devices;
pub mod history;
pub mod live;
pub mod metrics;

pub use control::*;
pub use devices::*;
pub use history::*;
pub use live::*;
pub use metrics::*;

use axum::{Json, response::IntoResponse};

pub async fn health() -> impl IntoResponse {
    Json(serde_json::json!({ "ok": true }))
}
