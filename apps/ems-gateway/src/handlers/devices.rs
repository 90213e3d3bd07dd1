//! 设备列表与会话状态
//!
//! - GET /api/devices

use crate::AppState;
use api_contract::{ApiResponse, DeviceStatusDto, RegisterGroupDto};
use axum::{
    Json,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
};

pub async fn list_devices(State(state): State<AppState>) -> Response {
    let items: Vec<DeviceStatusDto> = state
        .sessions
        .iter()
        .map(|session| {
            let device = session.device();
            let snapshot = session.state();
            DeviceStatusDto {
                name: device.name.clone(),
                slave_id: device.slave_id,
                host: device.transport.host.clone(),
                port: device.transport.port,
                polling_interval_ms: device.polling_interval.as_millis() as u64,
                status: snapshot.effective_status().as_str().to_string(),
                consecutive_failures: snapshot.consecutive_failures,
                last_error: snapshot.last_error.clone(),
                last_success_ms: snapshot.last_success_ms,
                backoff_remaining_ms: snapshot
                    .backoff_remaining()
                    .map(|remaining| remaining.as_millis() as u64),
                register_groups: device
                    .groups
                    .iter()
                    .map(|group| RegisterGroupDto {
                        name: group.name.clone(),
                        register_type: group.kind.as_str().to_string(),
                        address: group.address,
                        count: group.count,
                        encoding: group.encoding.as_str().to_string(),
                    })
                    .collect(),
            }
        })
        .collect();
    (StatusCode::OK, Json(ApiResponse::success(items))).into_response()
}
