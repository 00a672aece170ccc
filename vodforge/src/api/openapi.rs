//! OpenAPI documentation configuration.
//!
//! Configures OpenAPI 3.0 specification generation using `utoipa` and
//! serves Swagger UI for interactive API exploration.

use utoipa::OpenApi;

use crate::api::error::ApiErrorResponse;
use crate::api::models::{
    ContentInfoResponse, EncodingOptions, ProgressResponse, ProviderFormatsResponse,
    SessionListResponse, SessionResponse, StartTranscodeRequest, StartTranscodeResponse,
};
use crate::api::routes::health::LivenessResponse;
use crate::content::{ContentMetadata, ContentStats, EncodingParams, StreamingInfo, StreamingStatus};
use crate::domain::{Container, ProgressSnapshot, ProviderKind, SessionStatus, SpeedPriority};
use crate::encoder::provider::ProviderInfo;
use crate::health::{Alert, AlertSeverity, HealthReport, SessionHealth, SessionHealthSnapshot};

/// OpenAPI documentation for the vodforge API.
#[derive(OpenApi)]
#[openapi(
    info(
        title = "vodforge API",
        version = "0.1.0",
        description = "REST API for the vodforge transcoding engine. Provides endpoints for starting and monitoring transcode sessions and for serving content-addressed output.",
        license(name = "MIT OR Apache-2.0")
    ),
    paths(
        crate::api::routes::transcoding::start_transcode,
        crate::api::routes::transcoding::stop_transcode,
        crate::api::routes::transcoding::get_progress,
        crate::api::routes::transcoding::list_sessions,
        crate::api::routes::transcoding::get_session,
        crate::api::routes::transcoding::list_providers,
        crate::api::routes::transcoding::provider_formats,
        crate::api::routes::content::get_stats,
        crate::api::routes::content::get_info,
        crate::api::routes::content::serve_file,
        crate::api::routes::health::liveness,
        crate::api::routes::health::readiness,
    ),
    components(schemas(
        ApiErrorResponse,
        StartTranscodeRequest,
        StartTranscodeResponse,
        EncodingOptions,
        ProgressResponse,
        ProgressSnapshot,
        SessionResponse,
        SessionListResponse,
        SessionStatus,
        Container,
        ProviderKind,
        SpeedPriority,
        ProviderInfo,
        ProviderFormatsResponse,
        ContentInfoResponse,
        ContentMetadata,
        ContentStats,
        EncodingParams,
        StreamingInfo,
        StreamingStatus,
        HealthReport,
        SessionHealth,
        SessionHealthSnapshot,
        Alert,
        AlertSeverity,
        LivenessResponse,
    )),
    tags(
        (name = "transcoding", description = "Transcode session lifecycle and providers"),
        (name = "content", description = "Content-addressed output serving"),
        (name = "health", description = "Health check endpoints for monitoring and orchestration")
    )
)]
pub struct ApiDoc;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_openapi_document_builds() {
        let doc = ApiDoc::openapi();
        let json = doc.to_json().unwrap();
        assert!(json.contains("/api/v1/transcoding/transcode"));
        assert!(json.contains("/api/v1/content/stats"));
    }
}
