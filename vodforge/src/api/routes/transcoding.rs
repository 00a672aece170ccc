//! Transcoding routes.

use axum::{
    Json, Router,
    extract::{Path, State},
    routing::{delete, get, post},
};
use chrono::Utc;

use crate::api::error::{ApiError, ApiResult};
use crate::api::models::{
    ProgressResponse, ProviderFormatsResponse, SessionListResponse, SessionResponse,
    StartTranscodeRequest, StartTranscodeResponse,
};
use crate::api::server::AppState;
use crate::coordinator::CreateSessionResult;
use crate::domain::{ProviderKind, SessionStatus};
use crate::encoder::provider::ProviderInfo;

/// Create the transcoding router.
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/transcode", post(start_transcode))
        .route("/transcode/{id}", delete(stop_transcode))
        .route("/progress/{id}", get(get_progress))
        .route("/sessions", get(list_sessions))
        .route("/sessions/{id}", get(get_session))
        .route("/providers", get(list_providers))
        .route("/providers/{id}/formats", get(provider_formats))
}

#[utoipa::path(
    post,
    path = "/api/v1/transcoding/transcode",
    tag = "transcoding",
    request_body = StartTranscodeRequest,
    responses(
        (status = 200, description = "Session created or artifact found", body = StartTranscodeResponse),
        (status = 400, description = "Invalid request", body = crate::api::error::ApiErrorResponse),
        (status = 503, description = "Resource exhausted", body = crate::api::error::ApiErrorResponse)
    )
)]
pub async fn start_transcode(
    State(state): State<AppState>,
    Json(body): Json<StartTranscodeRequest>,
) -> ApiResult<Json<StartTranscodeResponse>> {
    let request = body.into_domain()?;
    let result = state.coordinator.create_session(request).await?;

    let response = match result {
        CreateSessionResult::CacheHit {
            content_hash,
            session,
            ..
        } => StartTranscodeResponse {
            session_id: session.as_ref().map(|s| s.id.clone()),
            status: SessionStatus::Complete,
            provider: session.as_ref().map(|s| s.provider.clone()),
            start_time: Utc::now(),
            content_hash,
            deduplicated: true,
        },
        CreateSessionResult::InFlight { session } => StartTranscodeResponse {
            status: session.session_status(),
            provider: Some(session.provider.clone()),
            start_time: Utc::now(),
            content_hash: session.content_hash.clone().unwrap_or_default(),
            session_id: Some(session.id),
            deduplicated: true,
        },
        CreateSessionResult::Created { session } => StartTranscodeResponse {
            status: session.session_status(),
            provider: Some(session.provider.clone()),
            start_time: Utc::now(),
            content_hash: session.content_hash.clone().unwrap_or_default(),
            session_id: Some(session.id),
            deduplicated: false,
        },
    };

    Ok(Json(response))
}

#[utoipa::path(
    delete,
    path = "/api/v1/transcoding/transcode/{id}",
    tag = "transcoding",
    params(("id" = String, Path, description = "Session ID")),
    responses(
        (status = 200, description = "Session stopped"),
        (status = 404, description = "Unknown session", body = crate::api::error::ApiErrorResponse),
        (status = 409, description = "Session already terminal", body = crate::api::error::ApiErrorResponse)
    )
)]
pub async fn stop_transcode(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<serde_json::Value>> {
    state.coordinator.stop(&id).await?;
    Ok(Json(serde_json::json!({ "sessionId": id, "status": "stopped" })))
}

#[utoipa::path(
    get,
    path = "/api/v1/transcoding/progress/{id}",
    tag = "transcoding",
    params(("id" = String, Path, description = "Session ID")),
    responses(
        (status = 200, description = "Current progress", body = ProgressResponse),
        (status = 404, description = "Unknown session", body = crate::api::error::ApiErrorResponse)
    )
)]
pub async fn get_progress(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<ProgressResponse>> {
    let session = state.coordinator.progress(&id).await?;
    Ok(Json(ProgressResponse::from(&session)))
}

#[utoipa::path(
    get,
    path = "/api/v1/transcoding/sessions",
    tag = "transcoding",
    responses((status = 200, description = "Recent sessions", body = SessionListResponse))
)]
pub async fn list_sessions(
    State(state): State<AppState>,
) -> ApiResult<Json<SessionListResponse>> {
    let sessions = state.coordinator.list_sessions(100).await?;
    let sessions: Vec<SessionResponse> = sessions.iter().map(SessionResponse::from).collect();
    let count = sessions.len();
    Ok(Json(SessionListResponse { sessions, count }))
}

#[utoipa::path(
    get,
    path = "/api/v1/transcoding/sessions/{id}",
    tag = "transcoding",
    params(("id" = String, Path, description = "Session ID")),
    responses(
        (status = 200, description = "Session detail", body = SessionResponse),
        (status = 404, description = "Unknown session", body = crate::api::error::ApiErrorResponse)
    )
)]
pub async fn get_session(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<SessionResponse>> {
    let session = state.coordinator.get_session(&id).await?;
    Ok(Json(SessionResponse::from(&session)))
}

#[utoipa::path(
    get,
    path = "/api/v1/transcoding/providers",
    tag = "transcoding",
    responses((status = 200, description = "Registered providers", body = [ProviderInfo]))
)]
pub async fn list_providers(State(state): State<AppState>) -> Json<Vec<ProviderInfo>> {
    let providers = state
        .coordinator
        .catalog()
        .all()
        .iter()
        .map(|p| p.info())
        .collect();
    Json(providers)
}

#[utoipa::path(
    get,
    path = "/api/v1/transcoding/providers/{id}/formats",
    tag = "transcoding",
    params(("id" = String, Path, description = "Provider ID")),
    responses(
        (status = 200, description = "Supported formats", body = ProviderFormatsResponse),
        (status = 404, description = "Unknown provider", body = crate::api::error::ApiErrorResponse)
    )
)]
pub async fn provider_formats(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<ProviderFormatsResponse>> {
    let kind = ProviderKind::parse(&id)
        .ok_or_else(|| ApiError::not_found(format!("provider '{id}' not found")))?;
    let provider = state
        .coordinator
        .catalog()
        .get(kind)
        .ok_or_else(|| ApiError::not_found(format!("provider '{id}' not found")))?;

    Ok(Json(ProviderFormatsResponse {
        provider_id: id,
        formats: provider.supported_formats(),
    }))
}
