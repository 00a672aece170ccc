//! Content routes: CAS file serving, metadata and statistics.

use std::path::{Component, Path as FsPath, PathBuf};

use axum::{
    Json, Router,
    extract::{Path, Request, State},
    http::header::{CACHE_CONTROL, HeaderValue},
    response::{IntoResponse, Response},
    routing::get,
};
use tower_http::services::ServeFile;
use tracing::debug;

use crate::api::error::{ApiError, ApiResult};
use crate::api::models::ContentInfoResponse;
use crate::api::server::AppState;
use crate::content::{ContentStats, is_valid_content_hash};
use crate::error::Error;

/// Cache header for immutable CAS responses.
const CACHE_FOREVER: &str = "public, max-age=31536000, immutable";

/// Cache header for in-flight scratch fallbacks, which may still change.
const CACHE_NEVER: &str = "no-store";

/// Create the content router.
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/stats", get(get_stats))
        .route("/{hash}/info", get(get_info))
        .route("/{hash}/{*path}", get(serve_file))
}

#[utoipa::path(
    get,
    path = "/api/v1/content/stats",
    tag = "content",
    responses((status = 200, description = "Store statistics", body = ContentStats))
)]
pub async fn get_stats(State(state): State<AppState>) -> Json<ContentStats> {
    Json(state.content_store.stats())
}

#[utoipa::path(
    get,
    path = "/api/v1/content/{hash}/info",
    tag = "content",
    params(("hash" = String, Path, description = "64-char content hash")),
    responses(
        (status = 200, description = "Content metadata", body = ContentInfoResponse),
        (status = 400, description = "Malformed hash", body = crate::api::error::ApiErrorResponse),
        (status = 404, description = "Unknown content", body = crate::api::error::ApiErrorResponse)
    )
)]
pub async fn get_info(
    State(state): State<AppState>,
    Path(hash): Path<String>,
) -> ApiResult<Json<ContentInfoResponse>> {
    let (metadata, _) = state.content_store.get(&hash).await?;
    Ok(Json(ContentInfoResponse { metadata }))
}

#[utoipa::path(
    get,
    path = "/api/v1/content/{hash}/{path}",
    tag = "content",
    params(
        ("hash" = String, Path, description = "64-char content hash"),
        ("path" = String, Path, description = "File path inside the content directory")
    ),
    responses(
        (status = 200, description = "File content (immutable cache)"),
        (status = 400, description = "Malformed hash or path", body = crate::api::error::ApiErrorResponse),
        (status = 404, description = "Unknown content or file", body = crate::api::error::ApiErrorResponse)
    )
)]
pub async fn serve_file(
    State(state): State<AppState>,
    Path((hash, rel_path)): Path<(String, String)>,
    request: Request,
) -> ApiResult<Response> {
    if !is_valid_content_hash(&hash) {
        return Err(ApiError::bad_request(format!(
            "invalid content hash '{hash}'"
        )));
    }

    // Published content first: immutable by construction, cache forever.
    match state.content_store.get(&hash).await {
        Ok((_, _)) => {
            let file = state.content_store.resolve_file(&hash, &rel_path)?;
            if tokio::fs::try_exists(&file).await.unwrap_or(false) {
                return serve(file, request, CACHE_FOREVER).await;
            }
        }
        Err(Error::NotFound { .. }) => {}
        Err(e) => return Err(e.into()),
    }

    // Fallback: a segment the encoder has produced but the store has not
    // ingested yet still lives in the session scratch directory. Never
    // cacheable.
    if let Some(file) = scratch_fallback(&state, &hash, &rel_path).await? {
        debug!(hash = %hash, path = %rel_path, "Serving in-flight segment from scratch");
        return serve(file, request, CACHE_NEVER).await;
    }

    Err(ApiError::not_found(format!(
        "content '{hash}' has no file '{rel_path}'"
    )))
}

/// Look for the requested file in the scratch directory of a live session
/// producing this hash.
async fn scratch_fallback(
    state: &AppState,
    hash: &str,
    rel_path: &str,
) -> ApiResult<Option<PathBuf>> {
    let sessions = state.sessions.list_by_content_hash(hash).await?;
    for session in sessions {
        if session.session_status().is_terminal() {
            continue;
        }
        let Some(dir) = &session.directory_path else {
            continue;
        };
        let Some(file) = safe_join(FsPath::new(dir), rel_path) else {
            return Err(ApiError::bad_request(format!("invalid path '{rel_path}'")));
        };
        // Segments are classified into subdirectories on ingest but are
        // written flat by the encoder; try both layouts.
        let flat = file
            .file_name()
            .map(|name| FsPath::new(dir).join(name))
            .unwrap_or_else(|| file.clone());
        for candidate in [file, flat] {
            if tokio::fs::try_exists(&candidate).await.unwrap_or(false) {
                return Ok(Some(candidate));
            }
        }
    }
    Ok(None)
}

/// Join a client path onto a base, rejecting traversal.
fn safe_join(base: &FsPath, relative: &str) -> Option<PathBuf> {
    let rel = FsPath::new(relative);
    if rel.components().any(|c| !matches!(c, Component::Normal(_))) {
        return None;
    }
    Some(base.join(rel))
}

async fn serve(path: PathBuf, request: Request, cache_control: &str) -> ApiResult<Response> {
    match ServeFile::new(&path).try_call(request).await {
        Ok(mut response) => {
            response.headers_mut().insert(
                CACHE_CONTROL,
                HeaderValue::from_str(cache_control)
                    .unwrap_or_else(|_| HeaderValue::from_static("no-store")),
            );
            Ok(response.into_response())
        }
        Err(e) => Err(ApiError::internal(format!("Failed to serve file: {e}"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_safe_join() {
        let base = FsPath::new("/data/session");
        assert_eq!(
            safe_join(base, "manifests/manifest.mpd"),
            Some(PathBuf::from("/data/session/manifests/manifest.mpd"))
        );
        assert!(safe_join(base, "../escape").is_none());
        assert!(safe_join(base, "/absolute").is_none());
        assert!(safe_join(base, "a/../b").is_none());
    }
}
