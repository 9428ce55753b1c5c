//! SQLite build session store.
//!
//! Implements `BuildSessionStore` from `pagewright-core`. Sessions are stored
//! as JSON alongside a `version` column used for compare-and-swap saves. The
//! conversation log is one row per turn; its TTL lives in
//! `conversation_expiry` and is refreshed on every append.

use chrono::{Duration, Utc};
use sqlx::Row;

use pagewright_core::build::history::ConversationHistory;
use pagewright_core::build::store::BuildSessionStore;
use pagewright_types::build::BuildSession;
use pagewright_types::conversation::{ConversationTurn, TurnRole};
use pagewright_types::error::RepositoryError;
use pagewright_types::project::ProjectId;

use super::pool::DatabasePool;
use super::{format_datetime, parse_datetime};

/// SQLite-backed implementation of `BuildSessionStore`.
pub struct SqliteBuildSessionStore {
    pool: DatabasePool,
    ttl: Duration,
}

impl SqliteBuildSessionStore {
    pub fn new(pool: DatabasePool, ttl: Duration) -> Self {
        Self { pool, ttl }
    }
}

fn map_write_error(e: sqlx::Error, project_id: &ProjectId) -> RepositoryError {
    if let sqlx::Error::Database(ref db_err) = e {
        if db_err.message().contains("FOREIGN KEY") {
            tracing::debug!(%project_id, "build state written for a missing project");
            return RepositoryError::NotFound;
        }
    }
    RepositoryError::Query(e.to_string())
}

impl BuildSessionStore for SqliteBuildSessionStore {
    async fn load_session(
        &self,
        project_id: &ProjectId,
    ) -> Result<Option<BuildSession>, RepositoryError> {
        let row = sqlx::query(
            "SELECT state_json, version FROM build_sessions WHERE project_id = ? AND expires_at > ?",
        )
        .bind(project_id.to_string())
        .bind(format_datetime(&Utc::now()))
        .fetch_optional(&self.pool.reader)
        .await
        .map_err(|e| RepositoryError::Query(e.to_string()))?;

        let Some(row) = row else {
            return Ok(None);
        };

        let state_json: String = row
            .try_get("state_json")
            .map_err(|e| RepositoryError::Query(e.to_string()))?;
        let version: i64 = row
            .try_get("version")
            .map_err(|e| RepositoryError::Query(e.to_string()))?;

        let mut session: BuildSession = serde_json::from_str(&state_json)
            .map_err(|e| RepositoryError::Query(format!("invalid session JSON: {e}")))?;
        session.version = version;
        Ok(Some(session))
    }

    async fn save_session(&self, session: &BuildSession) -> Result<i64, RepositoryError> {
        let now = Utc::now();
        let next_version = session.version + 1;

        let mut stored = session.clone();
        stored.version = next_version;
        let state_json =
            serde_json::to_string(&stored).map_err(|e| RepositoryError::Query(e.to_string()))?;

        let project_id = session.project_id.to_string();
        let now_str = format_datetime(&now);
        let expires_at = format_datetime(&(now + self.ttl));

        let result = if session.version == 0 {
            // A fresh session may only replace a row that has expired.
            sqlx::query(
                "INSERT INTO build_sessions (project_id, state_json, version, expires_at, created_at, updated_at)
                 VALUES (?, ?, ?, ?, ?, ?)
                 ON CONFLICT (project_id) DO UPDATE SET
                    state_json = excluded.state_json,
                    version = excluded.version,
                    expires_at = excluded.expires_at,
                    created_at = excluded.created_at,
                    updated_at = excluded.updated_at
                 WHERE build_sessions.expires_at <= ?",
            )
            .bind(&project_id)
            .bind(&state_json)
            .bind(next_version)
            .bind(&expires_at)
            .bind(format_datetime(&session.created_at))
            .bind(&now_str)
            .bind(&now_str)
            .execute(&self.pool.writer)
            .await
        } else {
            sqlx::query(
                "UPDATE build_sessions SET state_json = ?, version = ?, expires_at = ?, updated_at = ?
                 WHERE project_id = ? AND version = ? AND expires_at > ?",
            )
            .bind(&state_json)
            .bind(next_version)
            .bind(&expires_at)
            .bind(&now_str)
            .bind(&project_id)
            .bind(session.version)
            .bind(&now_str)
            .execute(&self.pool.writer)
            .await
        };

        let result = result.map_err(|e| map_write_error(e, &session.project_id))?;
        if result.rows_affected() == 0 {
            return Err(RepositoryError::Conflict(format!(
                "session version {} for project {} is stale",
                session.version, session.project_id
            )));
        }

        Ok(next_version)
    }

    async fn delete_session(&self, project_id: &ProjectId) -> Result<(), RepositoryError> {
        sqlx::query("DELETE FROM build_sessions WHERE project_id = ?")
            .bind(project_id.to_string())
            .execute(&self.pool.writer)
            .await
            .map_err(|e| RepositoryError::Query(e.to_string()))?;
        Ok(())
    }

    async fn load_history(
        &self,
        project_id: &ProjectId,
    ) -> Result<ConversationHistory, RepositoryError> {
        let rows = sqlx::query(
            "SELECT t.role, t.content, t.created_at
             FROM conversation_turns t
             JOIN conversation_expiry e ON e.project_id = t.project_id
             WHERE t.project_id = ? AND e.expires_at > ?
             ORDER BY t.seq ASC",
        )
        .bind(project_id.to_string())
        .bind(format_datetime(&Utc::now()))
        .fetch_all(&self.pool.reader)
        .await
        .map_err(|e| RepositoryError::Query(e.to_string()))?;

        let mut turns = Vec::with_capacity(rows.len());
        for row in &rows {
            let role: String = row
                .try_get("role")
                .map_err(|e| RepositoryError::Query(e.to_string()))?;
            let content: String = row
                .try_get("content")
                .map_err(|e| RepositoryError::Query(e.to_string()))?;
            let created_at: String = row
                .try_get("created_at")
                .map_err(|e| RepositoryError::Query(e.to_string()))?;

            turns.push(ConversationTurn {
                role: role.parse::<TurnRole>().map_err(RepositoryError::Query)?,
                content,
                timestamp: parse_datetime(&created_at)?,
            });
        }

        Ok(ConversationHistory::from_turns(turns))
    }

    async fn append_history(
        &self,
        project_id: &ProjectId,
        turns: &[ConversationTurn],
    ) -> Result<(), RepositoryError> {
        let now = Utc::now();
        let id = project_id.to_string();

        let mut tx = self
            .pool
            .writer
            .begin()
            .await
            .map_err(|e| RepositoryError::Query(e.to_string()))?;

        // An expired log starts over rather than growing under a new TTL.
        sqlx::query(
            "DELETE FROM conversation_turns WHERE project_id = ?
             AND EXISTS (SELECT 1 FROM conversation_expiry WHERE project_id = ? AND expires_at <= ?)",
        )
        .bind(&id)
        .bind(&id)
        .bind(format_datetime(&now))
        .execute(&mut *tx)
        .await
        .map_err(|e| RepositoryError::Query(e.to_string()))?;

        let next_seq: i64 = sqlx::query(
            "SELECT COALESCE(MAX(seq) + 1, 0) AS next_seq FROM conversation_turns WHERE project_id = ?",
        )
        .bind(&id)
        .fetch_one(&mut *tx)
        .await
        .and_then(|row| row.try_get("next_seq"))
        .map_err(|e| RepositoryError::Query(e.to_string()))?;

        for (offset, turn) in turns.iter().enumerate() {
            sqlx::query(
                "INSERT INTO conversation_turns (project_id, seq, role, content, created_at)
                 VALUES (?, ?, ?, ?, ?)",
            )
            .bind(&id)
            .bind(next_seq + offset as i64)
            .bind(turn.role.to_string())
            .bind(&turn.content)
            .bind(format_datetime(&turn.timestamp))
            .execute(&mut *tx)
            .await
            .map_err(|e| map_write_error(e, project_id))?;
        }

        sqlx::query(
            "INSERT INTO conversation_expiry (project_id, expires_at) VALUES (?, ?)
             ON CONFLICT (project_id) DO UPDATE SET expires_at = excluded.expires_at",
        )
        .bind(&id)
        .bind(format_datetime(&(now + self.ttl)))
        .execute(&mut *tx)
        .await
        .map_err(|e| map_write_error(e, project_id))?;

        tx.commit()
            .await
            .map_err(|e| RepositoryError::Query(e.to_string()))?;

        Ok(())
    }

    async fn delete_history(&self, project_id: &ProjectId) -> Result<(), RepositoryError> {
        let id = project_id.to_string();
        let mut tx = self
            .pool
            .writer
            .begin()
            .await
            .map_err(|e| RepositoryError::Query(e.to_string()))?;

        sqlx::query("DELETE FROM conversation_turns WHERE project_id = ?")
            .bind(&id)
            .execute(&mut *tx)
            .await
            .map_err(|e| RepositoryError::Query(e.to_string()))?;
        sqlx::query("DELETE FROM conversation_expiry WHERE project_id = ?")
            .bind(&id)
            .execute(&mut *tx)
            .await
            .map_err(|e| RepositoryError::Query(e.to_string()))?;

        tx.commit()
            .await
            .map_err(|e| RepositoryError::Query(e.to_string()))?;
        Ok(())
    }

    async fn purge_expired(&self) -> Result<u64, RepositoryError> {
        let now = format_datetime(&Utc::now());
        let mut tx = self
            .pool
            .writer
            .begin()
            .await
            .map_err(|e| RepositoryError::Query(e.to_string()))?;

        let sessions = sqlx::query("DELETE FROM build_sessions WHERE expires_at <= ?")
            .bind(&now)
            .execute(&mut *tx)
            .await
            .map_err(|e| RepositoryError::Query(e.to_string()))?
            .rows_affected();

        sqlx::query(
            "DELETE FROM conversation_turns WHERE project_id IN
             (SELECT project_id FROM conversation_expiry WHERE expires_at <= ?)",
        )
        .bind(&now)
        .execute(&mut *tx)
        .await
        .map_err(|e| RepositoryError::Query(e.to_string()))?;

        let histories = sqlx::query("DELETE FROM conversation_expiry WHERE expires_at <= ?")
            .bind(&now)
            .execute(&mut *tx)
            .await
            .map_err(|e| RepositoryError::Query(e.to_string()))?
            .rows_affected();

        tx.commit()
            .await
            .map_err(|e| RepositoryError::Query(e.to_string()))?;

        if sessions + histories > 0 {
            tracing::info!(sessions, histories, "purged expired build state");
        }
        Ok(sessions + histories)
    }
}
