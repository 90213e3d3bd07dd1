//! 写命令
//!
//! - POST /api/control/write_register
//!
//! 状态码：applied → 200，rejected → 400，failed → 502。

use crate::AppState;
use api_contract::{WriteRegisterRequest, WriteResponse};
use axum::{
    Json,
    extract::{State, rejection::JsonRejection},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use domain::{CommandOutcome, CommandStatus};
use tracing::info;

pub async fn write_register(
    State(state): State<AppState>,
    payload: Result<Json<WriteRegisterRequest>, JsonRejection>,
) -> Response {
    let Json(request) = match payload {
        Ok(payload) => payload,
        Err(rejection) => {
            ems_telemetry::record_command_rejected();
            let outcome = CommandOutcome::rejected(rejection.body_text())
                .with_correlation_id(Some(ems_telemetry::new_correlation_id()));
            return respond(&outcome, None);
        }
    };
    let correlation_id = request
        .correlation_id
        .clone()
        .filter(|id| !id.trim().is_empty())
        .unwrap_or_else(ems_telemetry::new_correlation_id);
    let details = serde_json::to_value(&request).ok();
    info!(
        target: "ems.http",
        slave_id = request.slave_id,
        register_type = %request.register_type,
        address = request.address,
        correlation_id = %correlation_id,
        "write_register_requested"
    );

    let outcome = match request.to_command() {
        Ok(mut command) => {
            command.correlation_id = Some(correlation_id);
            state.executor.submit(command).await
        }
        Err(err) => {
            ems_telemetry::record_command_rejected();
            CommandOutcome::rejected(err.to_string()).with_correlation_id(Some(correlation_id))
        }
    };
    respond(&outcome, details)
}

fn respond(outcome: &CommandOutcome, details: Option<serde_json::Value>) -> Response {
    let status = match outcome.status {
        CommandStatus::Applied => StatusCode::OK,
        CommandStatus::Rejected => StatusCode::BAD_REQUEST,
        CommandStatus::Failed => StatusCode::BAD_GATEWAY,
    };
    (status, Json(WriteResponse::from_outcome(outcome, details))).into_response()
}
