use super::{ConversationSession, SessionSummary, Turn};
use crate::config::Config;
use crate::error::Result;
use crate::llm::ChatRole;
use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Storage for conversation history, injected into the orchestrator.
///
/// Persistence is up to the implementation. Concurrent runs against one
/// session are not serialized; the last append wins.
#[async_trait]
pub trait HistoryStore: Send + Sync {
    /// Resolve `id` to a live session. A missing or empty id creates a fresh
    /// one; an unknown id creates a session under that id.
    async fn get_or_create_session(&self, id: Option<&str>) -> Result<String>;

    async fn append_turn(&self, id: &str, turn: Turn) -> Result<()>;

    /// Full history, oldest first. Unknown sessions have none.
    async fn get_history(&self, id: &str) -> Result<Vec<Turn>>;

    async fn session(&self, id: &str) -> Result<Option<ConversationSession>>;

    async fn list_sessions(&self) -> Result<Vec<SessionSummary>>;

    /// Returns whether a session was removed.
    async fn delete_session(&self, id: &str) -> Result<bool>;

    /// Remove sessions idle for at least `ttl`, returning their ids.
    async fn sweep_expired(&self, ttl: Duration) -> Result<Vec<String>>;
}

#[derive(Debug, Default)]
pub struct InMemoryHistoryStore {
    sessions: RwLock<HashMap<String, ConversationSession>>,
}

impl InMemoryHistoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl HistoryStore for InMemoryHistoryStore {
    async fn get_or_create_session(&self, id: Option<&str>) -> Result<String> {
        let id = match id.map(str::trim) {
            Some(id) if !id.is_empty() => id.to_string(),
            _ => Uuid::new_v4().to_string(),
        };

        let mut sessions = self.sessions.write().await;
        match sessions.get_mut(&id) {
            Some(session) => session.last_active = Utc::now(),
            None => {
                debug!(session = %id, "creating session");
                sessions.insert(id.clone(), ConversationSession::new(id.clone()));
            }
        }
        Ok(id)
    }

    async fn append_turn(&self, id: &str, turn: Turn) -> Result<()> {
        let mut sessions = self.sessions.write().await;
        let session = sessions
            .entry(id.to_string())
            .or_insert_with(|| ConversationSession::new(id));
        if turn.role == ChatRole::Assistant {
            session.exchanges += 1;
        }
        session.last_active = Utc::now();
        session.turns.push(turn);
        Ok(())
    }

    async fn get_history(&self, id: &str) -> Result<Vec<Turn>> {
        let sessions = self.sessions.read().await;
        Ok(sessions
            .get(id)
            .map(|s| s.turns.clone())
            .unwrap_or_default())
    }

    async fn session(&self, id: &str) -> Result<Option<ConversationSession>> {
        Ok(self.sessions.read().await.get(id).cloned())
    }

    async fn list_sessions(&self) -> Result<Vec<SessionSummary>> {
        let sessions = self.sessions.read().await;
        let mut summaries: Vec<SessionSummary> = sessions.values().map(SessionSummary::from).collect();
        summaries.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        Ok(summaries)
    }

    async fn delete_session(&self, id: &str) -> Result<bool> {
        Ok(self.sessions.write().await.remove(id).is_some())
    }

    async fn sweep_expired(&self, ttl: Duration) -> Result<Vec<String>> {
        // A ttl too large to represent never expires anything.
        let Ok(ttl) = chrono::Duration::from_std(ttl) else {
            return Ok(Vec::new());
        };
        let Some(cutoff) = Utc::now().checked_sub_signed(ttl) else {
            return Ok(Vec::new());
        };

        let mut sessions = self.sessions.write().await;
        let expired: Vec<String> = sessions
            .values()
            .filter(|s| s.last_active <= cutoff)
            .map(|s| s.id.clone())
            .collect();
        for id in &expired {
            sessions.remove(id);
        }
        Ok(expired)
    }
}

/// Periodically reap idle sessions until the returned handle is aborted.
pub fn spawn_sweeper(
    store: Arc<dyn HistoryStore>,
    interval: Duration,
    ttl: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval.max(Duration::from_millis(1)));
        // The first tick completes immediately.
        ticker.tick().await;
        loop {
            ticker.tick().await;
            match store.sweep_expired(ttl).await {
                Ok(removed) if !removed.is_empty() => {
                    info!(count = removed.len(), "swept expired sessions");
                }
                Ok(_) => {}
                Err(e) => warn!(error = %e, "session sweep failed"),
            }
        }
    })
}

/// Start the sweeper with `sessions.sweep_interval` and `sessions.ttl`.
pub fn spawn_configured_sweeper(
    store: Arc<dyn HistoryStore>,
    config: &Config,
) -> Result<JoinHandle<()>> {
    let interval = config.sweep_interval()?;
    let ttl = config.session_ttl()?;
    debug!(?interval, ?ttl, "starting session sweeper");
    Ok(spawn_sweeper(store, interval, ttl))
}
