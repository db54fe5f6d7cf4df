use std::time::Duration;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use serde::{Deserialize, Serialize};

use crate::core::{normalize_address, BlockEntry, TrafficStats};
use crate::error::ServiceError;
use crate::service::AppState;
use crate::utils::log_admin_event;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AddBlockRequest {
    pub client_key: String,
    pub reason: String,
    /// Omitted for a permanent block
    pub ttl_secs: Option<u64>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoveBlockResponse {
    pub client_key: String,
    pub removed: bool,
}

fn client_key(raw: &str) -> Result<String, ServiceError> {
    normalize_address(raw).ok_or_else(|| ServiceError::InvalidRequest("clientKey must not be empty".to_string()))
}

/// GET /admin/blocks: every unexpired entry, oldest first
pub async fn list_blocks(State(state): State<AppState>) -> Result<Json<Vec<BlockEntry>>, ServiceError> {
    Ok(Json(state.blocking.list_blocks().await?))
}

/// POST /admin/blocks: add or replace a manual block
pub async fn add_block(
    State(state): State<AppState>,
    Json(body): Json<AddBlockRequest>,
) -> Result<(StatusCode, Json<BlockEntry>), ServiceError> {
    let key = client_key(&body.client_key)?;
    let reason = body.reason.trim();
    if reason.is_empty() {
        return Err(ServiceError::InvalidRequest("reason must not be empty".to_string()));
    }

    let entry = state
        .blocking
        .add_block(&key, reason, body.ttl_secs.map(Duration::from_secs))
        .await?;
    log_admin_event("block_added", true, Some(&key));
    Ok((StatusCode::CREATED, Json(entry)))
}

/// DELETE /admin/blocks/:client_key: drop the entry and any local DDoS state
pub async fn remove_block(
    State(state): State<AppState>,
    Path(raw_key): Path<String>,
) -> Result<Json<RemoveBlockResponse>, ServiceError> {
    let key = client_key(&raw_key)?;
    let removed = state.blocking.remove_block(&key).await?;
    let released = state.ddos.release(&key);

    log_admin_event("block_removed", true, Some(&key));
    Ok(Json(RemoveBlockResponse {
        client_key: key,
        removed: removed || released,
    }))
}

/// GET /admin/traffic/:client_key
pub async fn traffic_stats(
    State(state): State<AppState>,
    Path(raw_key): Path<String>,
) -> Result<Json<TrafficStats>, ServiceError> {
    let key = client_key(&raw_key)?;
    Ok(Json(state.ddos.traffic_stats(&key).await?))
}
