//! API route modules.

pub mod content;
pub mod health;
pub mod transcoding;

use axum::Router;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use crate::api::openapi::ApiDoc;
use crate::api::server::AppState;

/// Create the main API router with all routes.
///
/// Routes are organized as:
/// - `/api/v1/transcoding/*`: session lifecycle and providers
/// - `/api/v1/content/*`: CAS file serving, metadata and stats
/// - `/api/health/*`: liveness/readiness
/// - `/api/docs`: Swagger UI, `/api/docs/openapi.json`: OpenAPI spec
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .merge(SwaggerUi::new("/api/docs").url("/api/docs/openapi.json", ApiDoc::openapi()))
        .nest("/api/v1/transcoding", transcoding::router())
        .nest("/api/v1/content", content::router())
        .nest("/api/health", health::router())
        .with_state(state)
}
