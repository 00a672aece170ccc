//! Database repositories.

pub mod session;

pub use session::{SessionRepository, SqlxSessionRepository};
