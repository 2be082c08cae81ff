// src/server.rs
use axum::{
    body::Bytes,
    extract::{Path, Query, State},
    http::{header::AUTHORIZATION, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use sha2::{Digest, Sha256};
use std::sync::Arc;
use thiserror::Error;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

use crate::models::{AgentMapping, MonthEntry, MonthEntryBilledType};
use crate::store::{StoreError, TimeStore};
use crate::sync::{
    error_chain, SyncError, SyncFailure, SyncOptions, SyncOrchestrator, SyncOutcome, SyncTarget,
};

pub const CRON_SECRET_HEADER: &str = "x-cron-secret";

// --- Application State ---

#[derive(Clone)]
pub struct AppState {
    pub orchestrator: SyncOrchestrator,
    pub store: Arc<dyn TimeStore>,
    /// SHA-256 of the configured cron secret; `None` leaves the trigger open.
    cron_secret_digest: Option<Arc<[u8]>>,
}

impl AppState {
    pub fn new(orchestrator: SyncOrchestrator, cron_secret: Option<&str>) -> Self {
        let store = orchestrator.store().clone();
        let cron_secret_digest: Option<Arc<[u8]>> =
            cron_secret.map(|secret| Arc::from(digest(secret)));
        if cron_secret_digest.is_none() {
            warn!("CRON_SECRET is not set; the scheduled sync trigger is unauthenticated");
        }
        Self {
            orchestrator,
            store,
            cron_secret_digest,
        }
    }

    fn cron_authorized(&self, presented: Option<&str>) -> bool {
        match (&self.cron_secret_digest, presented) {
            (None, _) => true,
            (Some(expected), Some(given)) => digest(given).as_slice() == &expected[..],
            (Some(_), None) => false,
        }
    }
}

fn digest(secret: &str) -> Vec<u8> {
    Sha256::digest(secret.as_bytes()).to_vec()
}

// --- Error Mapping ---

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Missing or invalid cron secret")]
    Unauthorized,

    #[error("{0}")]
    Sync(SyncFailure),

    #[error("Storage error")]
    Store(#[from] StoreError),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Bad request: {0}")]
    BadRequest(String),
}

impl From<SyncFailure> for AppError {
    fn from(failure: SyncFailure) -> Self {
        AppError::Sync(failure)
    }
}

pub fn sync_error_status(err: &SyncError) -> StatusCode {
    match err {
        SyncError::FiscalYearNotFound(_) | SyncError::NoFiscalYears => StatusCode::NOT_FOUND,
        SyncError::Source(_) => StatusCode::BAD_GATEWAY,
        SyncError::Storage(_) | SyncError::Fiscal(_) | SyncError::InvalidTransition { .. } => {
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        error!("Error occurred: {}", error_chain(&self));

        match self {
            AppError::Sync(ref failure) => {
                let status = sync_error_status(&failure.error);
                (status, Json(SyncOutcome::from(failure))).into_response()
            }
            AppError::Unauthorized => (
                StatusCode::UNAUTHORIZED,
                Json(json!({ "ok": false, "error": "Unauthorized" })),
            )
                .into_response(),
            AppError::Store(ref e) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "ok": false, "error": error_chain(e) })),
            )
                .into_response(),
            AppError::NotFound(ref what) => (
                StatusCode::NOT_FOUND,
                Json(json!({ "ok": false, "error": format!("Not found: {}", what) })),
            )
                .into_response(),
            AppError::BadRequest(ref msg) => (
                StatusCode::BAD_REQUEST,
                Json(json!({ "ok": false, "error": msg })),
            )
                .into_response(),
        }
    }
}

// --- Router ---

pub fn router(state: AppState) -> Router {
    let api_routes = Router::new()
        .route("/cron/sync", get(handle_cron_sync).post(handle_cron_sync))
        .route("/sync/{fiscal_year_id}", post(handle_manual_sync))
        .route(
            "/agent-mappings",
            get(handle_list_agent_mappings).put(handle_upsert_agent_mapping),
        )
        .route("/month-entries/{fiscal_year_id}", get(handle_month_entries));

    Router::new()
        .nest("/api", api_routes)
        .route("/status", get(handle_status))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

// --- Handlers ---

#[derive(Debug, Deserialize)]
pub struct CronQuery {
    pub secret: Option<String>,
}

fn presented_secret<'a>(headers: &'a HeaderMap, query: &'a CronQuery) -> Option<&'a str> {
    if let Some(value) = headers
        .get(CRON_SECRET_HEADER)
        .and_then(|v| v.to_str().ok())
    {
        return Some(value.trim());
    }
    if let Some(token) = headers
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
    {
        return Some(token.trim());
    }
    query.secret.as_deref().map(str::trim)
}

async fn handle_cron_sync(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<CronQuery>,
) -> Result<Json<SyncOutcome>, AppError> {
    if !state.cron_authorized(presented_secret(&headers, &query)) {
        return Err(AppError::Unauthorized);
    }
    info!("Scheduled sync triggered");
    let report = state
        .orchestrator
        .run(SyncTarget::Latest, SyncOptions::default())
        .await?;
    Ok(Json(SyncOutcome::from(&report)))
}

async fn handle_manual_sync(
    State(state): State<AppState>,
    Path(fiscal_year_id): Path<String>,
    body: Bytes,
) -> Result<Json<SyncOutcome>, AppError> {
    let options = if body.iter().all(u8::is_ascii_whitespace) {
        SyncOptions::default()
    } else {
        serde_json::from_slice::<SyncOptions>(&body)
            .map_err(|e| AppError::BadRequest(format!("Invalid sync options: {}", e)))?
    };
    info!("Manual sync triggered for fiscal year {}", fiscal_year_id);
    let report = state
        .orchestrator
        .run(SyncTarget::FiscalYear(fiscal_year_id), options)
        .await?;
    Ok(Json(SyncOutcome::from(&report)))
}

async fn handle_list_agent_mappings(
    State(state): State<AppState>,
) -> Result<Json<Vec<AgentMapping>>, AppError> {
    Ok(Json(state.store.agent_mappings().await?))
}

async fn handle_upsert_agent_mapping(
    State(state): State<AppState>,
    Json(mapping): Json<AgentMapping>,
) -> Result<Json<AgentMapping>, AppError> {
    let employee_id = mapping.employee_id.trim().to_string();
    let agent_id = mapping.agent_id.trim().to_string();
    if employee_id.is_empty() || agent_id.is_empty() {
        return Err(AppError::BadRequest(
            "employee_id and agent_id are required".to_string(),
        ));
    }
    let mapping = AgentMapping {
        employee_id,
        agent_id,
    };
    state.store.upsert_agent_mapping(mapping.clone()).await?;
    info!(
        "Mapped employee {} to agent {}",
        mapping.employee_id, mapping.agent_id
    );
    Ok(Json(mapping))
}

#[derive(Debug, Serialize, Deserialize)]
pub struct MonthEntriesResponse {
    pub fiscal_year_id: String,
    pub fiscal_year_label: String,
    pub month_entries: Vec<MonthEntry>,
    pub billed_types: Vec<MonthEntryBilledType>,
}

async fn handle_month_entries(
    State(state): State<AppState>,
    Path(fiscal_year_id): Path<String>,
) -> Result<Json<MonthEntriesResponse>, AppError> {
    let fiscal_year = state
        .store
        .fiscal_year(&fiscal_year_id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("fiscal year '{}'", fiscal_year_id)))?;
    let month_entries = state.store.month_entries(&fiscal_year.id).await?;
    let billed_types = state.store.billed_types(&fiscal_year.id).await?;
    Ok(Json(MonthEntriesResponse {
        fiscal_year_id: fiscal_year.id,
        fiscal_year_label: fiscal_year.label,
        month_entries,
        billed_types,
    }))
}

async fn handle_status() -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "service": env!("CARGO_PKG_NAME"),
        "version": env!("CARGO_PKG_VERSION"),
        "timestamp": chrono::Utc::now().to_rfc3339(),
    }))
}
