use std::sync::Arc;
use std::time::Instant;
use axum::{
    extract::rejection::{JsonRejection, PathRejection},
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use shared::protocol::API_PREFIX;
use shared::types::{ApiResponse, StatusSnapshot, Target, TargetInput, TargetStatus};
use crate::api::error::ApiError;
use crate::cloudflare::CloudflareClient;
use crate::reconcile::{self, ReconcileReport};
use crate::store_manager::StoreHandle;

const RECENT_STATUSES: u32 = 20;
const DEFAULT_HISTORY_LIMIT: u32 = 50;
const MAX_HISTORY_LIMIT: u32 = 1000;

#[derive(Clone)]
pub struct AppState {
    pub store: StoreHandle,
    pub provider: Arc<CloudflareClient>,
    pub started_at: Instant,
}

type ApiResult<T> = Result<Json<ApiResponse<T>>, ApiError>;

// Extractor results are taken as `Result` so malformed input gets the JSON
// envelope instead of axum's plain-text rejection.
type ServerId = Result<Path<Uuid>, PathRejection>;
type ServerBody = Result<Json<TargetInput>, JsonRejection>;

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    pub status: &'static str,
    pub timestamp: DateTime<Utc>,
    pub uptime_secs: u64,
}

/// A target with its most recent snapshots, newest first
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerDetail {
    #[serde(flatten)]
    pub target: Target,
    pub statuses: Vec<StatusSnapshot>,
}

#[derive(Deserialize)]
pub struct ImportQuery {
    pub domain: Option<String>,
}

#[derive(Deserialize)]
pub struct HistoryQuery {
    pub limit: Option<u32>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route(&format!("{API_PREFIX}/servers"), get(list_servers).post(create_server))
        .route(&format!("{API_PREFIX}/servers/import"), post(import_servers))
        .route(
            &format!("{API_PREFIX}/servers/:id"),
            get(get_server).put(update_server).delete(delete_server),
        )
        .route(&format!("{API_PREFIX}/servers/:id/statuses"), get(get_statuses))
        .route(&format!("{API_PREFIX}/status"), get(get_latest_statuses))
        .with_state(state)
}

async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        timestamp: Utc::now(),
        uptime_secs: state.started_at.elapsed().as_secs(),
    })
}

async fn list_servers(State(state): State<AppState>) -> ApiResult<Vec<Target>> {
    Ok(Json(ApiResponse::ok(state.store.list().await?)))
}

async fn get_server(State(state): State<AppState>, id: ServerId) -> ApiResult<ServerDetail> {
    let Path(id) = id?;
    let target = state.store.get(id).await?.ok_or(ApiError::NotFound)?;
    let statuses = state.store.history(id, RECENT_STATUSES).await?;
    Ok(Json(ApiResponse::ok(ServerDetail { target, statuses })))
}

async fn create_server(
    State(state): State<AppState>,
    body: ServerBody,
) -> Result<(StatusCode, Json<ApiResponse<Target>>), ApiError> {
    let Json(input) = body?;
    let fields = input.validate()?;

    let record_id = state.provider.create_srv_record(&fields).await?;
    tracing::info!("Created SRV record for {} ({})", fields.dns_record, record_id);

    match state.store.create(fields, Some(record_id.clone())).await {
        Ok(target) => Ok((StatusCode::CREATED, Json(ApiResponse::ok(target)))),
        Err(e) => {
            tracing::error!("Failed to save server, removing SRV record {}", record_id);
            if let Err(cleanup) = state.provider.delete_srv_record(&record_id).await {
                tracing::error!("SRV record {} is orphaned: {}", record_id, cleanup);
            }
            Err(e.into())
        }
    }
}

async fn update_server(
    State(state): State<AppState>,
    id: ServerId,
    body: ServerBody,
) -> ApiResult<Target> {
    let Path(id) = id?;
    let Json(input) = body?;
    let fields = input.validate()?;
    let existing = state.store.get(id).await?.ok_or(ApiError::NotFound)?;

    match &existing.external_key {
        Some(key) => {
            state.provider.update_srv_record(key, &fields).await?;
            tracing::info!("Updated SRV record for {} ({})", fields.dns_record, key);
        }
        None => tracing::warn!("Server {} has no SRV record, updating locally only", id),
    }

    let target = state.store.update(id, fields).await?.ok_or(ApiError::NotFound)?;
    Ok(Json(ApiResponse::ok(target)))
}

async fn delete_server(State(state): State<AppState>, id: ServerId) -> ApiResult<()> {
    let Path(id) = id?;
    let existing = state.store.get(id).await?.ok_or(ApiError::NotFound)?;

    if let Some(key) = &existing.external_key {
        state.provider.delete_srv_record(key).await?;
        tracing::info!("Deleted SRV record for {} ({})", existing.dns_record, key);
    }

    if !state.store.delete(id).await? {
        return Err(ApiError::NotFound);
    }
    Ok(Json(ApiResponse { success: true, data: None, error: None }))
}

async fn import_servers(
    State(state): State<AppState>,
    Query(params): Query<ImportQuery>,
) -> ApiResult<ReconcileReport> {
    let domain = params.domain.as_deref().map(str::trim).filter(|d| !d.is_empty());
    let report = reconcile::import(&state.provider, &state.store, domain).await?;
    Ok(Json(ApiResponse::ok(report)))
}

async fn get_statuses(
    State(state): State<AppState>,
    id: ServerId,
    Query(params): Query<HistoryQuery>,
) -> ApiResult<Vec<StatusSnapshot>> {
    let Path(id) = id?;
    state.store.get(id).await?.ok_or(ApiError::NotFound)?;

    let limit = params.limit.unwrap_or(DEFAULT_HISTORY_LIMIT).clamp(1, MAX_HISTORY_LIMIT);
    Ok(Json(ApiResponse::ok(state.store.history(id, limit).await?)))
}

async fn get_latest_statuses(State(state): State<AppState>) -> ApiResult<Vec<TargetStatus>> {
    Ok(Json(ApiResponse::ok(state.store.latest().await?)))
}
