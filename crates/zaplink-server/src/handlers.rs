// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! HTTP handlers for the reconciliation API.
//!
//! The router exposes the reconciliation operations toward UI/API layers
//! and receives fire-and-forget status webhooks from the worker fleet. All
//! wire payloads are camelCase to match the fleet's JSON dialect.

use std::sync::Arc;

use axum::Router;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::Json;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{info, warn};
use uuid::Uuid;

use zaplink_fleet::{CreateSessionRequest, Fleet, FleetError, QrCode};
use zaplink_reconciler::{ConnectionTracker, OrphanReconciler, ReconcileError, RecoveryPoller};
use zaplink_registry::{NewInstance, Registry, RegistryError, StatusPatch};

/// Shared handler state, constructed once by the runtime.
pub struct AppState {
    /// Instance registry.
    pub registry: Arc<dyn Registry>,
    /// Worker fleet client.
    pub fleet: Arc<dyn Fleet>,
    /// Connection state tracker.
    pub tracker: ConnectionTracker,
    /// Recovery poller.
    pub poller: Arc<RecoveryPoller>,
    /// Orphan reconciler.
    pub orphan: Arc<OrphanReconciler>,
    /// URL workers push status webhooks to, wired into new sessions.
    pub webhook_url: String,
}

/// Build the API router.
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/instances", post(create_instance).get(list_instances))
        .route("/instances/status", get(all_statuses))
        .route("/instances/{id}", axum::routing::delete(delete_instance))
        .route(
            "/instances/{id}/status",
            get(get_status).post(update_status),
        )
        .route("/instances/{id}/should-retry", get(should_retry))
        .route("/instances/{id}/poll", post(poll_instance))
        .route("/instances/{id}/qr", get(qr_code))
        .route("/sync", post(trigger_sync))
        .route("/orphans", get(scan_orphans))
        .route("/orphans/adopt", post(adopt_orphan))
        .route("/health-check", get(health_check))
        .route("/webhook/status", post(webhook_status))
        .with_state(state)
}

// ============================================================================
// Error mapping
// ============================================================================

/// API-level error with an HTTP status.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// Resource does not exist.
    #[error("Not found")]
    NotFound,
    /// Request conflicts with existing state.
    #[error("Conflict: {0}")]
    Conflict(String),
    /// Request is malformed.
    #[error("Invalid request: {0}")]
    Invalid(String),
    /// The loop guard refused the operation.
    #[error("Endpoint blocked by loop guard: {0}")]
    LoopBlocked(String),
    /// The worker fleet failed or rejected the call.
    #[error("Fleet error: {0}")]
    Upstream(String),
    /// Internal failure.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self {
            ApiError::NotFound => StatusCode::NOT_FOUND,
            ApiError::Conflict(_) => StatusCode::CONFLICT,
            ApiError::Invalid(_) => StatusCode::BAD_REQUEST,
            ApiError::LoopBlocked(_) => StatusCode::TOO_MANY_REQUESTS,
            ApiError::Upstream(_) => StatusCode::BAD_GATEWAY,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        let body = Json(json!({ "success": false, "error": self.to_string() }));
        (status, body).into_response()
    }
}

impl From<RegistryError> for ApiError {
    fn from(e: RegistryError) -> Self {
        match e {
            RegistryError::NotFound(_) => ApiError::NotFound,
            RegistryError::WorkerConflict(id) => ApiError::Conflict(id),
            RegistryError::Invalid(msg) => ApiError::Invalid(msg),
            other => ApiError::Internal(other.to_string()),
        }
    }
}

impl From<FleetError> for ApiError {
    fn from(e: FleetError) -> Self {
        ApiError::Upstream(e.to_string())
    }
}

impl From<ReconcileError> for ApiError {
    fn from(e: ReconcileError) -> Self {
        match e {
            ReconcileError::LoopBlocked { endpoint } => ApiError::LoopBlocked(endpoint),
            ReconcileError::NotFound(_) => ApiError::NotFound,
            ReconcileError::NotBound(id) => {
                ApiError::Conflict(format!("instance {id} has no worker session"))
            }
            ReconcileError::OrphanGone(id) => {
                ApiError::Conflict(format!("session {id} is no longer on the fleet"))
            }
            ReconcileError::Fleet(e) => ApiError::Upstream(e.to_string()),
            ReconcileError::Registry(e) => e.into(),
            other => ApiError::Internal(other.to_string()),
        }
    }
}

// ============================================================================
// Wire types
// ============================================================================

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct CreateInstanceRequest {
    name: String,
    tenant_id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct StatusUpdateRequest {
    worker_status: String,
    #[serde(default)]
    webhook_status: Option<String>,
    #[serde(default)]
    error_message: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct AdoptRequest {
    worker_instance_id: String,
    name: String,
    tenant_id: String,
}

/// Status event pushed by a worker. Fire-and-forget: the worker does not
/// retry on failure, so ingestion must be cheap and tolerant.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct WebhookStatusEvent {
    instance_id: String,
    status: String,
    #[serde(default)]
    phone: Option<String>,
    #[serde(default)]
    profile_name: Option<String>,
    #[serde(default)]
    profile_picture_url: Option<String>,
    #[serde(default)]
    error_message: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct StatusView {
    instance_id: Uuid,
    status: String,
    retry_count: u32,
    heartbeat_active: bool,
    last_update: Option<DateTime<Utc>>,
    error_message: Option<String>,
    /// `"cache"` when served from the tracker, `"registry"` when the
    /// process has not observed this instance since startup.
    source: &'static str,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct ListParams {
    #[serde(default)]
    tenant_id: Option<String>,
}

// ============================================================================
// Handlers
// ============================================================================

async fn healthz(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    let fleet = match state.fleet.health().await {
        Ok(health) => json!({
            "online": health.success,
            "activeInstances": health.active_instances,
        }),
        Err(e) => json!({ "online": false, "error": e.to_string() }),
    };

    Json(json!({
        "status": "ok",
        "trackedInstances": state.tracker.all().len(),
        "connectedInstances": state.tracker.connected_count(),
        "fleet": fleet,
    }))
}

async fn create_instance(
    State(state): State<Arc<AppState>>,
    Json(request): Json<CreateInstanceRequest>,
) -> Result<(StatusCode, Json<zaplink_registry::InstanceRecord>), ApiError> {
    let record = state
        .registry
        .insert(NewInstance {
            tenant_id: request.tenant_id,
            name: request.name.clone(),
            worker_instance_id: None,
            connection_state: "vps_pending".to_string(),
        })
        .await?;

    // Bind the worker id before asking the fleet so that a crash between
    // the two steps leaves a record the recovery sweep can pick up.
    let worker_id = format!("zl_{}", record.id.simple());
    let record = state.registry.bind_worker(record.id, &worker_id).await?;

    let create = CreateSessionRequest {
        instance_id: worker_id.clone(),
        session_name: request.name,
        webhook_url: state.webhook_url.clone(),
    };
    let record = match state.fleet.create_instance(&create).await {
        Ok(()) => {
            info!(instance_id = %record.id, worker_instance_id = %worker_id, "Session provisioning started");
            state
                .registry
                .apply_status(record.id, StatusPatch::state("initializing"))
                .await?
        }
        Err(e) => {
            // The record stays in vps_pending; the periodic sweep retries.
            warn!(
                instance_id = %record.id,
                error = %e,
                "Fleet create failed, instance left pending for recovery"
            );
            record
        }
    };

    Ok((StatusCode::CREATED, Json(record)))
}

async fn list_instances(
    State(state): State<Arc<AppState>>,
    Query(params): Query<ListParams>,
) -> Result<Json<Vec<zaplink_registry::InstanceRecord>>, ApiError> {
    let records = state.registry.list(params.tenant_id.as_deref()).await?;
    Ok(Json(records))
}

async fn delete_instance(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, ApiError> {
    let record = state.registry.get(id).await?.ok_or(ApiError::NotFound)?;

    if let Some(worker_id) = record.worker_instance_id.as_deref() {
        // Best effort: a fleet that lost the session already is fine.
        if let Err(e) = state.fleet.delete_instance(worker_id).await {
            warn!(
                instance_id = %id,
                worker_instance_id = %worker_id,
                error = %e,
                "Fleet delete failed, removing registry record anyway"
            );
        }
    }

    state.tracker.remove(id);
    state.registry.delete(id).await?;

    Ok(StatusCode::NO_CONTENT)
}

async fn get_status(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<StatusView>, ApiError> {
    if let Some(conn) = state.tracker.get(id) {
        return Ok(Json(StatusView {
            instance_id: id,
            status: conn.status.as_str().to_string(),
            retry_count: conn.retry_count,
            heartbeat_active: conn.heartbeat_active,
            last_update: Some(conn.last_update),
            error_message: conn.error_message,
            source: "cache",
        }));
    }

    let record = state.registry.get(id).await?.ok_or(ApiError::NotFound)?;
    Ok(Json(StatusView {
        instance_id: id,
        status: record.connection_state,
        retry_count: 0,
        heartbeat_active: false,
        last_update: record.last_state_change_at,
        error_message: None,
        source: "registry",
    }))
}

async fn all_statuses(State(state): State<Arc<AppState>>) -> Json<Vec<StatusView>> {
    let views = state
        .tracker
        .all()
        .into_iter()
        .map(|(id, conn)| StatusView {
            instance_id: id,
            status: conn.status.as_str().to_string(),
            retry_count: conn.retry_count,
            heartbeat_active: conn.heartbeat_active,
            last_update: Some(conn.last_update),
            error_message: conn.error_message,
            source: "cache",
        })
        .collect();
    Json(views)
}

async fn update_status(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(request): Json<StatusUpdateRequest>,
) -> Result<Json<StatusView>, ApiError> {
    state.registry.get(id).await?.ok_or(ApiError::NotFound)?;

    let conn = state.tracker.update_status(
        id,
        &request.worker_status,
        request.webhook_status.as_deref(),
        request.error_message,
    );
    state
        .registry
        .apply_status(id, StatusPatch::state(conn.status.as_str()))
        .await?;

    Ok(Json(StatusView {
        instance_id: id,
        status: conn.status.as_str().to_string(),
        retry_count: conn.retry_count,
        heartbeat_active: conn.heartbeat_active,
        last_update: Some(conn.last_update),
        error_message: conn.error_message,
        source: "cache",
    }))
}

async fn should_retry(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<serde_json::Value>, ApiError> {
    state.registry.get(id).await?.ok_or(ApiError::NotFound)?;
    Ok(Json(json!({
        "shouldRetry": state.tracker.should_retry_connection(id)
    })))
}

async fn qr_code(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let record = state.registry.get(id).await?.ok_or(ApiError::NotFound)?;
    let worker_id = record
        .worker_instance_id
        .as_deref()
        .ok_or_else(|| ApiError::Conflict("instance has no worker session".to_string()))?;

    match state.fleet.qr_code(worker_id).await? {
        QrCode::Image(image) => Ok(Json(json!({ "qrCode": image, "waiting": false }))),
        QrCode::Waiting => Ok(Json(json!({ "qrCode": null, "waiting": true }))),
    }
}

/// Supervise one instance until its status resolves or the attempt budget
/// runs out. The cancellation token is tied to this request: a client that
/// navigates away drops the request future, which stops the poll at the
/// next backoff check.
async fn poll_instance(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<serde_json::Value>, ApiError> {
    state.registry.get(id).await?.ok_or(ApiError::NotFound)?;

    let cancel = zaplink_reconciler::CancelToken::new();
    let resolved = state.poller.poll_until_resolved(id, &cancel).await?;
    Ok(Json(json!({ "resolved": resolved })))
}

async fn trigger_sync(
    State(state): State<Arc<AppState>>,
) -> Result<Json<zaplink_reconciler::RecoveryReport>, ApiError> {
    let report = state.poller.recover_pending_instances().await?;
    Ok(Json(report))
}

async fn scan_orphans(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Vec<zaplink_reconciler::OrphanCandidate>>, ApiError> {
    let orphans = state.orphan.scan_for_orphans().await?;
    Ok(Json(orphans))
}

async fn adopt_orphan(
    State(state): State<Arc<AppState>>,
    Json(request): Json<AdoptRequest>,
) -> Result<(StatusCode, Json<zaplink_registry::InstanceRecord>), ApiError> {
    let record = state
        .orphan
        .adopt_by_worker_id(&request.worker_instance_id, &request.name, &request.tenant_id)
        .await?;
    Ok((StatusCode::CREATED, Json(record)))
}

async fn health_check(
    State(state): State<Arc<AppState>>,
) -> Result<Json<zaplink_reconciler::HealthCheckReport>, ApiError> {
    let report = state.orphan.perform_health_check().await?;
    Ok(Json(report))
}

/// Webhook ingestion feeds the same normalizer/tracker path as polling.
/// Unknown sessions are acknowledged and left for the orphan sweep; fields
/// already populated on the record (notably `phone`) are preserved by the
/// registry's set-once rule.
async fn webhook_status(
    State(state): State<Arc<AppState>>,
    Json(event): Json<WebhookStatusEvent>,
) -> Result<(StatusCode, Json<serde_json::Value>), ApiError> {
    let Some(record) = state.registry.get_by_worker_id(&event.instance_id).await? else {
        warn!(
            worker_instance_id = %event.instance_id,
            status = %event.status,
            "Webhook for unknown session, leaving for the orphan sweep"
        );
        return Ok((StatusCode::ACCEPTED, Json(json!({ "success": true }))));
    };

    let conn = state.tracker.update_status(
        record.id,
        &event.status,
        Some(&event.status),
        event.error_message,
    );

    state
        .registry
        .apply_status(
            record.id,
            StatusPatch {
                connection_state: conn.status.as_str().to_string(),
                phone: event.phone,
                profile_name: event.profile_name,
                profile_picture_ref: event.profile_picture_url,
            },
        )
        .await?;

    Ok((StatusCode::OK, Json(json!({ "success": true }))))
}
