//! Build session persistence trait and an in-memory implementation.
//!
//! Sessions and history are keyed by project id and expire after a TTL.
//! Session saves are compare-and-swap on `BuildSession::version`: a save
//! succeeds only if the stored version still matches the one the caller
//! loaded, so two overlapping turns cannot silently overwrite each other.

use std::future::Future;

use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;

use pagewright_types::build::BuildSession;
use pagewright_types::conversation::ConversationTurn;
use pagewright_types::error::RepositoryError;
use pagewright_types::project::ProjectId;

use super::history::ConversationHistory;

/// Persistence interface for build sessions and their conversation history.
pub trait BuildSessionStore: Send + Sync {
    /// Load a live (unexpired) session.
    fn load_session(
        &self,
        project_id: &ProjectId,
    ) -> impl Future<Output = Result<Option<BuildSession>, RepositoryError>> + Send;

    /// Save a session and refresh its TTL. Returns the new version.
    ///
    /// A session with version 0 may only be inserted; any other version
    /// must match the stored one, otherwise `RepositoryError::Conflict`.
    fn save_session(
        &self,
        session: &BuildSession,
    ) -> impl Future<Output = Result<i64, RepositoryError>> + Send;

    /// No-op if the session does not exist.
    fn delete_session(
        &self,
        project_id: &ProjectId,
    ) -> impl Future<Output = Result<(), RepositoryError>> + Send;

    /// Load the full conversation log. Empty if none exists or it expired.
    fn load_history(
        &self,
        project_id: &ProjectId,
    ) -> impl Future<Output = Result<ConversationHistory, RepositoryError>> + Send;

    /// Append turns to the log and refresh its TTL.
    fn append_history(
        &self,
        project_id: &ProjectId,
        turns: &[ConversationTurn],
    ) -> impl Future<Output = Result<(), RepositoryError>> + Send;

    fn delete_history(
        &self,
        project_id: &ProjectId,
    ) -> impl Future<Output = Result<(), RepositoryError>> + Send;

    /// Remove every expired session and history. Returns how many sessions
    /// and histories were removed.
    fn purge_expired(&self) -> impl Future<Output = Result<u64, RepositoryError>> + Send;
}

struct Expiring<T> {
    value: T,
    expires_at: DateTime<Utc>,
}

impl<T> Expiring<T> {
    fn is_live(&self, now: DateTime<Utc>) -> bool {
        self.expires_at > now
    }
}

/// `DashMap`-backed store for tests and single-process use.
pub struct InMemoryBuildSessionStore {
    ttl: Duration,
    sessions: DashMap<ProjectId, Expiring<BuildSession>>,
    histories: DashMap<ProjectId, Expiring<Vec<ConversationTurn>>>,
}

impl InMemoryBuildSessionStore {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            sessions: DashMap::new(),
            histories: DashMap::new(),
        }
    }
}

impl Default for InMemoryBuildSessionStore {
    fn default() -> Self {
        Self::new(Duration::hours(24))
    }
}

impl BuildSessionStore for InMemoryBuildSessionStore {
    async fn load_session(
        &self,
        project_id: &ProjectId,
    ) -> Result<Option<BuildSession>, RepositoryError> {
        let now = Utc::now();
        Ok(self
            .sessions
            .get(project_id)
            .filter(|e| e.is_live(now))
            .map(|e| e.value.clone()))
    }

    async fn save_session(&self, session: &BuildSession) -> Result<i64, RepositoryError> {
        let now = Utc::now();
        let next_version = session.version + 1;
        let mut stored = session.clone();
        stored.version = next_version;
        let record = Expiring {
            value: stored,
            expires_at: now + self.ttl,
        };

        match self.sessions.entry(session.project_id) {
            Entry::Occupied(mut occupied) => {
                let current = occupied.get();
                let current_version = if current.is_live(now) {
                    current.value.version
                } else {
                    0
                };
                if current_version != session.version {
                    return Err(RepositoryError::Conflict(format!(
                        "session version {} is stale (stored {current_version})",
                        session.version
                    )));
                }
                occupied.insert(record);
            }
            Entry::Vacant(vacant) => {
                if session.version != 0 {
                    return Err(RepositoryError::Conflict(format!(
                        "session version {} no longer exists",
                        session.version
                    )));
                }
                vacant.insert(record);
            }
        }
        Ok(next_version)
    }

    async fn delete_session(&self, project_id: &ProjectId) -> Result<(), RepositoryError> {
        self.sessions.remove(project_id);
        Ok(())
    }

    async fn load_history(
        &self,
        project_id: &ProjectId,
    ) -> Result<ConversationHistory, RepositoryError> {
        let now = Utc::now();
        Ok(self
            .histories
            .get(project_id)
            .filter(|e| e.is_live(now))
            .map(|e| ConversationHistory::from_turns(e.value.clone()))
            .unwrap_or_default())
    }

    async fn append_history(
        &self,
        project_id: &ProjectId,
        turns: &[ConversationTurn],
    ) -> Result<(), RepositoryError> {
        let now = Utc::now();
        let mut entry = self.histories.entry(*project_id).or_insert_with(|| Expiring {
            value: Vec::new(),
            expires_at: now,
        });
        if !entry.is_live(now) {
            entry.value.clear();
        }
        entry.value.extend_from_slice(turns);
        entry.expires_at = now + self.ttl;
        Ok(())
    }

    async fn delete_history(&self, project_id: &ProjectId) -> Result<(), RepositoryError> {
        self.histories.remove(project_id);
        Ok(())
    }

    async fn purge_expired(&self) -> Result<u64, RepositoryError> {
        let now = Utc::now();
        let before = self.sessions.len() + self.histories.len();
        self.sessions.retain(|_, e| e.is_live(now));
        self.histories.retain(|_, e| e.is_live(now));
        let after = self.sessions.len() + self.histories.len();
        Ok((before - after) as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::build::session::new_build_session;
    use pagewright_types::build::BuildMode;

    #[tokio::test]
    async fn test_save_and_load_session() {
        let store = InMemoryBuildSessionStore::default();
        let mut session = new_build_session(ProjectId::new(), BuildMode::Interactive);

        session.version = store.save_session(&session).await.unwrap();
        assert_eq!(session.version, 1);

        let loaded = store.load_session(&session.project_id).await.unwrap().unwrap();
        assert_eq!(loaded, session);
    }

    #[tokio::test]
    async fn test_stale_save_conflicts() {
        let store = InMemoryBuildSessionStore::default();
        let session = new_build_session(ProjectId::new(), BuildMode::Interactive);
        store.save_session(&session).await.unwrap();

        // A second writer still holding version 0.
        let err = store.save_session(&session).await.unwrap_err();
        assert!(matches!(err, RepositoryError::Conflict(_)));
    }

    #[tokio::test]
    async fn test_save_after_delete_conflicts() {
        let store = InMemoryBuildSessionStore::default();
        let mut session = new_build_session(ProjectId::new(), BuildMode::Autonomous);
        session.version = store.save_session(&session).await.unwrap();
        store.delete_session(&session.project_id).await.unwrap();

        assert!(store.save_session(&session).await.is_err());
        assert!(store.load_session(&session.project_id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_expired_entries_are_invisible_and_purged() {
        let store = InMemoryBuildSessionStore::new(Duration::seconds(-1));
        let session = new_build_session(ProjectId::new(), BuildMode::Interactive);
        store.save_session(&session).await.unwrap();
        store
            .append_history(&session.project_id, &[ConversationTurn::user("hi")])
            .await
            .unwrap();

        assert!(store.load_session(&session.project_id).await.unwrap().is_none());
        assert!(store.load_history(&session.project_id).await.unwrap().is_empty());
        assert_eq!(store.purge_expired().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_history_appends() {
        let store = InMemoryBuildSessionStore::default();
        let id = ProjectId::new();
        store
            .append_history(&id, &[ConversationTurn::user("one")])
            .await
            .unwrap();
        store
            .append_history(&id, &[ConversationTurn::assistant("two")])
            .await
            .unwrap();

        let history = store.load_history(&id).await.unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history.turns()[1].content, "two");

        store.delete_history(&id).await.unwrap();
        assert!(store.load_history(&id).await.unwrap().is_empty());
    }
}
