//! 路由定义
//!
//! - 健康检查：/health
//! - 指标：/metrics
//! - 写命令：POST /api/control/write_register
//! - 历史查询：GET /api/data/history
//! - 设备与会话状态：GET /api/devices
//! - 实时推送：GET /ws/live?topic=

use super::AppState;
use super::handlers::*;
use axum::{
    Router,
    body::Body,
    http::{HeaderValue, Request},
    middleware::{self, Next},
    response::Response,
    routing::{get, post},
};
use ems_telemetry::new_request_ids;
use tower_http::trace::TraceLayer;
use tracing::Instrument;

/// 创建完整路由（含请求上下文与追踪中间件）。
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/metrics", get(get_metrics))
        .route("/api/control/write_register", post(write_register))
        .route("/api/data/history", get(get_history))
        .route("/api/devices", get(list_devices))
        .route("/ws/live", get(live_updates))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        // 注入 request_id/trace_id
        .layer(middleware::from_fn(request_context))
}

async fn request_context(mut req: Request<Body>, next: Next) -> Response {
    let ids = new_request_ids();
    let method = req.method().clone();
    let path = req.uri().path().to_string();
    req.extensions_mut().insert(ids.clone());

    let span = tracing::info_span!(
        target: "ems.http",
        "request",
        request_id = %ids.request_id,
        trace_id = %ids.trace_id,
        method = %method,
        path = %path
    );

    let mut response = next.run(req).instrument(span).await;
    response.headers_mut().insert(
        "x-request-id",
        HeaderValue::from_str(&ids.request_id).unwrap_or_else(|_| HeaderValue::from_static("")),
    );
    response.headers_mut().insert(
        "x-trace-id",
        HeaderValue::from_str(&ids.trace_id).unwrap_or_else(|_| HeaderValue::from_static("")),
    );
    response
}
