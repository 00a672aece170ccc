//! HTTP API.
//!
//! A thin translator between REST and the session coordinator. All routes
//! live under `/api/v1`; error bodies share one envelope.

pub mod error;
pub mod models;
pub mod openapi;
pub mod routes;
pub mod server;

pub use error::{ApiError, ApiResult};
pub use server::{ApiServer, ApiServerConfig, AppState};
