//! 网关计数器快照。
//!
//! - GET /metrics

use crate::AppState;
use api_contract::{ApiResponse, MetricsSnapshotDto};
use axum::{
    Json,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use ems_telemetry::metrics;

pub async fn get_metrics(State(state): State<AppState>) -> Response {
    let snapshot = metrics().snapshot();
    (
        StatusCode::OK,
        Json(ApiResponse::success(MetricsSnapshotDto {
            polls_issued: snapshot.polls_issued,
            polls_skipped_backoff: snapshot.polls_skipped_backoff,
            polls_skipped_queue_full: snapshot.polls_skipped_queue_full,
            reads_ok: snapshot.reads_ok,
            reads_failed: snapshot.reads_failed,
            malformed_readings: snapshot.malformed_readings,
            non_finite_values: snapshot.non_finite_values,
            points_normalized: snapshot.points_normalized,
            sink_batches_written: snapshot.sink_batches_written,
            sink_overflow_events: snapshot.sink_overflow_events,
            sink_points_dropped: snapshot.sink_points_dropped,
            sink_write_failures: snapshot.sink_write_failures,
            sink_write_latency_ms_total: snapshot.sink_write_latency_ms_total,
            sink_write_latency_ms_count: snapshot.sink_write_latency_ms_count,
            publish_failures: snapshot.publish_failures,
            commands_applied: snapshot.commands_applied,
            commands_rejected: snapshot.commands_rejected,
            commands_failed: snapshot.commands_failed,
            relay_messages_delivered: snapshot.relay_messages_delivered,
            relay_subscriber_drops: snapshot.relay_subscriber_drops,
            relay_forced_disconnects: snapshot.relay_forced_disconnects,
            relay_subscribers: state.relay.subscriber_count() as u64,
        })),
    )
        .into_response()
}
