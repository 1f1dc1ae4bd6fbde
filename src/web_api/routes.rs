//! API Routes

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{delete, get, post, put},
    Json, Router,
};
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;
use uuid::Uuid;

use crate::device_arbiter::CameraRole;
use crate::error::Error;
use crate::identity_matcher::{MatcherConfig, TUNING_KEY};
use crate::models::{ApiResponse, Identity};
use crate::state::AppState;

/// Create API router
pub fn create_router(state: AppState) -> Router {
    Router::new()
        // Health
        .route("/healthz", get(super::health_check))
        // Devices
        .route("/api/devices", get(list_devices))
        .route("/api/devices/assignments", get(get_assignments))
        .route("/api/devices/assign", post(assign_device))
        // Identities & Enrollment
        .route("/api/identities", get(list_identities))
        .route("/api/enroll", post(enroll_sample))
        .route("/api/enroll", get(enrollment_counts))
        .route("/api/enroll/:identity_id", delete(remove_enrollment))
        // Matcher
        .route("/api/matcher/state", get(matcher_state))
        .route("/api/matcher/override", post(matcher_override))
        // Settings
        .route("/api/settings/matcher", get(get_matcher_config))
        .route("/api/settings/matcher", put(update_matcher_config))
        // Shelf scan
        .route("/api/scan", get(scan_status))
        .route("/api/scan/before", post(scan_before))
        .route("/api/scan/after", post(scan_after))
        .route("/api/scan/reset", post(scan_reset))
        // Checkout candidate
        .route("/api/checkout", get(get_checkout))
        .route("/api/checkout/items", post(edit_checkout_items))
        .route("/api/checkout/identity", post(set_checkout_identity))
        .route("/api/checkout/commit", post(commit_checkout))
        .route("/api/checkout/cancel", post(cancel_checkout))
        // Server-side diff round trip
        .route("/v1/diff", post(run_diff))
        .with_state(state)
}

// ========================================
// Device Handlers
// ========================================

async fn list_devices(State(state): State<AppState>) -> impl IntoResponse {
    match state.vision.list_devices().await {
        Ok(devices) => Json(ApiResponse::success(devices)).into_response(),
        Err(e) => e.into_response(),
    }
}

async fn get_assignments(State(state): State<AppState>) -> impl IntoResponse {
    Json(ApiResponse::success(state.arbiter.assignments().await))
}

#[derive(Debug, Deserialize)]
struct AssignRequest {
    role: CameraRole,
    device_id: String,
}

async fn assign_device(
    State(state): State<AppState>,
    Json(req): Json<AssignRequest>,
) -> impl IntoResponse {
    match state.arbiter.assign(req.role, req.device_id).await {
        Ok(()) => {
            // The identity camera is held open by the sampling loop; cycle
            // it so the loop picks up the new device.
            if req.role == CameraRole::Identity {
                state.recognition.restart().await;
            }
            Json(ApiResponse::success(state.arbiter.assignments().await)).into_response()
        }
        Err(e) => e.into_response(),
    }
}

// ========================================
// Identity & Enrollment Handlers
// ========================================

async fn list_identities(State(state): State<AppState>) -> impl IntoResponse {
    match state.inventory.list_identities().await {
        Ok(identities) => Json(ApiResponse::success(identities)).into_response(),
        Err(e) => e.into_response(),
    }
}

#[derive(Debug, Deserialize)]
struct EnrollRequest {
    identity: Identity,
    /// Pre-extracted sample; when absent, one frame is captured from the
    /// identity camera instead
    embedding: Option<Vec<f32>>,
}

async fn enroll_sample(
    State(state): State<AppState>,
    Json(req): Json<EnrollRequest>,
) -> impl IntoResponse {
    let embedding = match req.embedding {
        Some(embedding) => embedding,
        None => match capture_enrollment_frame(&state).await {
            Ok(embedding) => embedding,
            Err(e) => return e.into_response(),
        },
    };

    match state.enrollment.add_sample(&req.identity, embedding).await {
        Ok(samples) => (
            StatusCode::CREATED,
            Json(ApiResponse::success(json!({
                "identity_id": req.identity.id,
                "samples": samples
            }))),
        )
            .into_response(),
        Err(e) => e.into_response(),
    }
}

/// One embedding from the identity camera, for camera-driven enrollment
async fn capture_enrollment_frame(state: &AppState) -> crate::error::Result<Vec<f32>> {
    let device_id = state
        .arbiter
        .resolve(CameraRole::Identity)
        .await
        .ok_or_else(|| Error::Validation("no identity camera assigned".into()))?;

    state
        .vision
        .sample_embedding(&device_id)
        .await?
        .ok_or_else(|| Error::Validation("no face in frame - try again".into()))
}

async fn enrollment_counts(State(state): State<AppState>) -> impl IntoResponse {
    Json(ApiResponse::success(state.enrollment.sample_counts().await))
}

async fn remove_enrollment(
    State(state): State<AppState>,
    Path(identity_id): Path<String>,
) -> impl IntoResponse {
    match state.enrollment.remove(&identity_id).await {
        Ok(()) => Json(json!({"ok": true})).into_response(),
        Err(e) => e.into_response(),
    }
}

// ========================================
// Matcher Handlers
// ========================================

async fn matcher_state(State(state): State<AppState>) -> impl IntoResponse {
    Json(ApiResponse::success(state.matcher.status().await))
}

#[derive(Debug, Deserialize)]
struct OverrideRequest {
    identity_id: String,
    /// Suppression window; defaults to the configured override window
    duration_ms: Option<u64>,
}

async fn matcher_override(
    State(state): State<AppState>,
    Json(req): Json<OverrideRequest>,
) -> impl IntoResponse {
    let identity = match find_identity(&state, &req.identity_id).await {
        Ok(identity) => identity,
        Err(e) => return e.into_response(),
    };

    let window = req
        .duration_ms
        .map(Duration::from_millis)
        .unwrap_or(state.config.override_window());
    state.matcher.override_for(window).await;
    state.assembler.override_identity(identity).await;

    Json(ApiResponse::success(state.matcher.status().await)).into_response()
}

// ========================================
// Settings Handlers
// ========================================

async fn get_matcher_config(State(state): State<AppState>) -> impl IntoResponse {
    Json(ApiResponse::success(state.matcher.status().await.config))
}

async fn update_matcher_config(
    State(state): State<AppState>,
    Json(config): Json<MatcherConfig>,
) -> impl IntoResponse {
    if let Err(e) = state.config_store.set(TUNING_KEY, &config).await {
        return e.into_response();
    }
    state.matcher.set_config(config).await;
    tracing::info!(
        match_threshold = config.match_threshold,
        consensus_count = config.consensus_count,
        "Matcher tuning updated"
    );
    Json(ApiResponse::success(config)).into_response()
}

/// Resolve an identity id against the Inventory Store
async fn find_identity(state: &AppState, identity_id: &str) -> crate::error::Result<Identity> {
    let identities = state.inventory.list_identities().await?;
    identities
        .into_iter()
        .find(|i| i.id == identity_id)
        .ok_or_else(|| Error::NotFound(format!("identity {identity_id}")))
}

// ========================================
// Shelf Scan Handlers
// ========================================

async fn scan_status(State(state): State<AppState>) -> impl IntoResponse {
    Json(ApiResponse::success(state.scanner.status().await))
}

async fn scan_before(State(state): State<AppState>) -> impl IntoResponse {
    match state.scanner.capture_before().await {
        Ok(snapshot) => Json(ApiResponse::success(snapshot)).into_response(),
        Err(e) => e.into_response(),
    }
}

async fn scan_after(State(state): State<AppState>) -> impl IntoResponse {
    match state.scanner.capture_after().await {
        Ok(outcome) => Json(ApiResponse::success(outcome)).into_response(),
        Err(e) => e.into_response(),
    }
}

async fn scan_reset(State(state): State<AppState>) -> impl IntoResponse {
    state.scanner.reset().await;
    Json(json!({"ok": true}))
}

// ========================================
// Checkout Handlers
// ========================================

async fn get_checkout(State(state): State<AppState>) -> impl IntoResponse {
    Json(ApiResponse::success(state.assembler.candidate().await))
}

#[derive(Debug, Deserialize, Default)]
struct EditItemsRequest {
    #[serde(default)]
    add: Vec<String>,
    #[serde(default)]
    remove: Vec<String>,
}

async fn edit_checkout_items(
    State(state): State<AppState>,
    Json(req): Json<EditItemsRequest>,
) -> impl IntoResponse {
    for label in req.add {
        state.assembler.add_label(label).await;
    }
    for label in &req.remove {
        state.assembler.remove_label(label).await;
    }
    Json(ApiResponse::success(state.assembler.candidate().await))
}

#[derive(Debug, Deserialize)]
struct SetIdentityRequest {
    identity_id: String,
}

async fn set_checkout_identity(
    State(state): State<AppState>,
    Json(req): Json<SetIdentityRequest>,
) -> impl IntoResponse {
    let identity = match find_identity(&state, &req.identity_id).await {
        Ok(identity) => identity,
        Err(e) => return e.into_response(),
    };

    // Manual pick suppresses the camera for the configured window so the
    // operator's choice is not immediately overwritten.
    state
        .matcher
        .override_for(state.config.override_window())
        .await;
    state.assembler.override_identity(identity).await;

    Json(ApiResponse::success(state.assembler.candidate().await)).into_response()
}

#[derive(Debug, Deserialize, Default)]
struct CommitRequest {
    note: Option<String>,
}

async fn commit_checkout(
    State(state): State<AppState>,
    Json(req): Json<CommitRequest>,
) -> impl IntoResponse {
    if req.note.is_some() {
        state.assembler.set_note(req.note).await;
    }

    match state.assembler.commit(state.inventory.as_ref()).await {
        Ok(transaction_id) => {
            state.matcher.reset().await;
            state.scanner.reset().await;
            Json(ApiResponse::success(json!({"transaction_id": transaction_id}))).into_response()
        }
        Err(e) => e.into_response(),
    }
}

async fn cancel_checkout(State(state): State<AppState>) -> impl IntoResponse {
    state.assembler.cancel().await;
    state.matcher.reset().await;
    state.scanner.reset().await;
    Json(json!({"ok": true}))
}

// ========================================
// Server Diff Round Trip
// ========================================

#[derive(Debug, Deserialize, Default)]
struct DiffRequest {
    /// Caller-supplied correlation id; generated when absent
    request_id: Option<String>,
}

async fn run_diff(
    State(state): State<AppState>,
    Json(req): Json<DiffRequest>,
) -> impl IntoResponse {
    let request_id = req
        .request_id
        .unwrap_or_else(|| Uuid::new_v4().to_string());

    tracing::info!(request_id = %request_id, "Diff round trip started");

    match state.scanner.round_trip().await {
        Ok(report) => {
            tracing::info!(
                request_id = %request_id,
                removed = report.removed_labels.len(),
                "Diff round trip complete"
            );
            Json(json!({
                "request_id": request_id,
                "removed_labels": report.removed_labels,
                "before_labels": report.before_labels,
                "after_labels": report.after_labels
            }))
            .into_response()
        }
        Err(e) => e.into_response(),
    }
}
