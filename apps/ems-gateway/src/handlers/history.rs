//! 历史查询（只读，直通时序存储）
//!
//! - GET /api/data/history?start&end&device_name&slave_id&register_type&address&limit

use crate::AppState;
use crate::utils::response::{bad_request_error, storage_error};
use api_contract::{ApiResponse, HistoryQuery, LivePayload, TagsDto};
use axum::{
    Json,
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use domain::RegisterKind;
use ems_storage::HistoryFilter;

const DEFAULT_LIMIT: u32 = 1_000;
const MAX_LIMIT: u32 = 10_000;

pub async fn get_history(
    State(state): State<AppState>,
    Query(query): Query<HistoryQuery>,
) -> Response {
    let filter = match history_filter(query) {
        Ok(filter) => filter,
        Err(response) => return response,
    };
    match state.store.query(&filter).await {
        Ok(records) => {
            let items: Vec<LivePayload> = records
                .into_iter()
                .map(|record| LivePayload {
                    timestamp: record.ts_ms,
                    value: record.value.into(),
                    tags: TagsDto::from(&record.tags),
                })
                .collect();
            (StatusCode::OK, Json(ApiResponse::success(items))).into_response()
        }
        Err(err) => storage_error(err),
    }
}

fn history_filter(query: HistoryQuery) -> Result<HistoryFilter, Response> {
    if let (Some(start), Some(end)) = (query.start, query.end)
        && start > end
    {
        return Err(bad_request_error("start must not be after end"));
    }
    let register_type = query
        .register_type
        .as_deref()
        .map(str::parse::<RegisterKind>)
        .transpose()
        .map_err(bad_request_error)?;
    let device_name = query
        .device_name
        .map(|name| name.trim().to_string())
        .filter(|name| !name.is_empty());
    Ok(HistoryFilter {
        start_ms: query.start,
        end_ms: query.end,
        device_name,
        slave_id: query.slave_id,
        register_type,
        address: query.address,
        limit: query.limit.unwrap_or(DEFAULT_LIMIT).min(MAX_LIMIT),
    })
}
