//! Session repository.

use async_trait::async_trait;
use chrono::Utc;
use sqlx::SqlitePool;

use crate::database::models::TranscodeSessionDbModel;
use crate::domain::{ProgressSnapshot, SessionStatus};
use crate::{Error, Result};

/// Session repository trait.
#[async_trait]
pub trait SessionRepository: Send + Sync {
    async fn create(&self, session: &TranscodeSessionDbModel) -> Result<()>;
    async fn get(&self, id: &str) -> Result<TranscodeSessionDbModel>;
    async fn find(&self, id: &str) -> Result<Option<TranscodeSessionDbModel>>;

    /// Update status and, optionally, the error message. The write is
    /// durable when this returns.
    async fn update_status(
        &self,
        id: &str,
        status: SessionStatus,
        error_message: Option<&str>,
    ) -> Result<()>;

    /// Record the session result: content hash and final directory.
    async fn update_result(
        &self,
        id: &str,
        status: SessionStatus,
        content_hash: &str,
        directory_path: &str,
    ) -> Result<()>;

    /// Record the in-flight directory for a session.
    async fn update_directory(&self, id: &str, directory_path: &str) -> Result<()>;

    /// Persist the latest progress snapshot.
    async fn update_progress(&self, id: &str, progress: &ProgressSnapshot) -> Result<()>;

    /// Sessions in a non-terminal state, oldest first.
    async fn list_active(&self) -> Result<Vec<TranscodeSessionDbModel>>;

    /// Sessions sharing a content hash, newest first.
    async fn list_by_content_hash(&self, content_hash: &str)
    -> Result<Vec<TranscodeSessionDbModel>>;

    /// Most recent sessions, newest first.
    async fn list_recent(&self, limit: i64) -> Result<Vec<TranscodeSessionDbModel>>;

    /// Delete terminal rows older than the retention period. Returns the
    /// number of rows removed.
    async fn cleanup_expired(&self, retention_days: i64) -> Result<u64>;

    /// Mark running/queued/starting rows untouched for longer than
    /// `threshold_secs` as failed. Returns the affected session ids.
    async fn cleanup_stale(&self, threshold_secs: i64) -> Result<Vec<String>>;

    /// Mark every non-terminal row as failed with the given reason.
    /// Used for crash recovery at startup. Returns the number of rows.
    async fn fail_non_terminal(&self, reason: &str) -> Result<u64>;
}

/// SQLx implementation of SessionRepository.
pub struct SqlxSessionRepository {
    pool: SqlitePool,
}

impl SqlxSessionRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

const NON_TERMINAL: &str = "('queued', 'starting', 'running')";

#[async_trait]
impl SessionRepository for SqlxSessionRepository {
    async fn create(&self, session: &TranscodeSessionDbModel) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO transcode_sessions (
                id, media_id, provider, input_path, container, enable_abr,
                seek_secs, quality, resolution, status, content_hash,
                directory_path, error_message, progress_percent, progress_fps,
                progress_speed, progress_bytes, created_at, updated_at
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&session.id)
        .bind(&session.media_id)
        .bind(&session.provider)
        .bind(&session.input_path)
        .bind(&session.container)
        .bind(session.enable_abr)
        .bind(session.seek_secs)
        .bind(session.quality)
        .bind(&session.resolution)
        .bind(&session.status)
        .bind(&session.content_hash)
        .bind(&session.directory_path)
        .bind(&session.error_message)
        .bind(session.progress_percent)
        .bind(session.progress_fps)
        .bind(session.progress_speed)
        .bind(session.progress_bytes)
        .bind(&session.created_at)
        .bind(&session.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get(&self, id: &str) -> Result<TranscodeSessionDbModel> {
        self.find(id)
            .await?
            .ok_or_else(|| Error::not_found("TranscodeSession", id))
    }

    async fn find(&self, id: &str) -> Result<Option<TranscodeSessionDbModel>> {
        let session = sqlx::query_as::<_, TranscodeSessionDbModel>(
            "SELECT * FROM transcode_sessions WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(session)
    }

    async fn update_status(
        &self,
        id: &str,
        status: SessionStatus,
        error_message: Option<&str>,
    ) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE transcode_sessions
            SET status = ?, error_message = COALESCE(?, error_message), updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(status.as_str())
        .bind(error_message)
        .bind(Utc::now().to_rfc3339())
        .bind(id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(Error::not_found("TranscodeSession", id));
        }
        Ok(())
    }

    async fn update_result(
        &self,
        id: &str,
        status: SessionStatus,
        content_hash: &str,
        directory_path: &str,
    ) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE transcode_sessions
            SET status = ?, content_hash = ?, directory_path = ?, updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(status.as_str())
        .bind(content_hash)
        .bind(directory_path)
        .bind(Utc::now().to_rfc3339())
        .bind(id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(Error::not_found("TranscodeSession", id));
        }
        Ok(())
    }

    async fn update_directory(&self, id: &str, directory_path: &str) -> Result<()> {
        sqlx::query(
            "UPDATE transcode_sessions SET directory_path = ?, updated_at = ? WHERE id = ?",
        )
        .bind(directory_path)
        .bind(Utc::now().to_rfc3339())
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn update_progress(&self, id: &str, progress: &ProgressSnapshot) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE transcode_sessions
            SET progress_percent = ?, progress_fps = ?, progress_speed = ?,
                progress_bytes = ?, updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(progress.percent)
        .bind(progress.fps)
        .bind(progress.speed)
        .bind(progress.bytes as i64)
        .bind(Utc::now().to_rfc3339())
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn list_active(&self) -> Result<Vec<TranscodeSessionDbModel>> {
        let sessions = sqlx::query_as::<_, TranscodeSessionDbModel>(&format!(
            "SELECT * FROM transcode_sessions WHERE status IN {NON_TERMINAL} ORDER BY created_at"
        ))
        .fetch_all(&self.pool)
        .await?;
        Ok(sessions)
    }

    async fn list_by_content_hash(
        &self,
        content_hash: &str,
    ) -> Result<Vec<TranscodeSessionDbModel>> {
        let sessions = sqlx::query_as::<_, TranscodeSessionDbModel>(
            "SELECT * FROM transcode_sessions WHERE content_hash = ? ORDER BY created_at DESC",
        )
        .bind(content_hash)
        .fetch_all(&self.pool)
        .await?;
        Ok(sessions)
    }

    async fn list_recent(&self, limit: i64) -> Result<Vec<TranscodeSessionDbModel>> {
        let sessions = sqlx::query_as::<_, TranscodeSessionDbModel>(
            "SELECT * FROM transcode_sessions ORDER BY created_at DESC LIMIT ?",
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(sessions)
    }

    async fn cleanup_expired(&self, retention_days: i64) -> Result<u64> {
        let cutoff = (Utc::now() - chrono::Duration::days(retention_days)).to_rfc3339();

        let result = sqlx::query(
            "DELETE FROM transcode_sessions
             WHERE status IN ('complete', 'failed', 'stopped') AND updated_at < ?",
        )
        .bind(&cutoff)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }

    async fn cleanup_stale(&self, threshold_secs: i64) -> Result<Vec<String>> {
        let cutoff = (Utc::now() - chrono::Duration::seconds(threshold_secs)).to_rfc3339();

        let stale: Vec<(String,)> = sqlx::query_as(&format!(
            "SELECT id FROM transcode_sessions WHERE status IN {NON_TERMINAL} AND updated_at < ?"
        ))
        .bind(&cutoff)
        .fetch_all(&self.pool)
        .await?;

        let ids: Vec<String> = stale.into_iter().map(|(id,)| id).collect();
        if ids.is_empty() {
            return Ok(ids);
        }

        sqlx::query(&format!(
            "UPDATE transcode_sessions
             SET status = 'failed', error_message = 'stale session timed out', updated_at = ?
             WHERE status IN {NON_TERMINAL} AND updated_at < ?"
        ))
        .bind(Utc::now().to_rfc3339())
        .bind(&cutoff)
        .execute(&self.pool)
        .await?;

        Ok(ids)
    }

    async fn fail_non_terminal(&self, reason: &str) -> Result<u64> {
        let result = sqlx::query(&format!(
            "UPDATE transcode_sessions
             SET status = 'failed', error_message = ?, updated_at = ?
             WHERE status IN {NON_TERMINAL}"
        ))
        .bind(reason)
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }
}
