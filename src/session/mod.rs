//! Conversation sessions and their history store.

pub mod store;

pub use store::{HistoryStore, InMemoryHistoryStore, spawn_configured_sweeper, spawn_sweeper};

use crate::llm::{ChatMessage, ChatRole};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One message in a session's history. Never modified after it is appended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Turn {
    pub role: ChatRole,
    pub content: String,
    pub timestamp: DateTime<Utc>,
}

impl Turn {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::User,
            content: content.into(),
            timestamp: Utc::now(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::Assistant,
            content: content.into(),
            timestamp: Utc::now(),
        }
    }
}

impl From<&Turn> for ChatMessage {
    fn from(turn: &Turn) -> Self {
        ChatMessage {
            role: turn.role,
            content: turn.content.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationSession {
    pub id: String,
    pub turns: Vec<Turn>,
    pub created_at: DateTime<Utc>,
    pub last_active: DateTime<Utc>,
    /// Completed user/assistant exchanges.
    pub exchanges: u32,
}

impl ConversationSession {
    pub fn new(id: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            turns: Vec::new(),
            created_at: now,
            last_active: now,
            exchanges: 0,
        }
    }

    /// The most recent `n` turns, oldest first.
    pub fn recent_turns(&self, n: usize) -> &[Turn] {
        let start = self.turns.len().saturating_sub(n);
        &self.turns[start..]
    }
}

/// Listing entry for a session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionSummary {
    pub id: String,
    pub created_at: DateTime<Utc>,
    pub last_active: DateTime<Utc>,
    pub exchanges: u32,
    pub turns: usize,
}

impl From<&ConversationSession> for SessionSummary {
    fn from(session: &ConversationSession) -> Self {
        Self {
            id: session.id.clone(),
            created_at: session.created_at,
            last_active: session.last_active,
            exchanges: session.exchanges,
            turns: session.turns.len(),
        }
    }
}

/// Keep only the most recent `n` turns.
pub fn truncate_history(mut turns: Vec<Turn>, n: usize) -> Vec<Turn> {
    let excess = turns.len().saturating_sub(n);
    turns.drain(..excess);
    turns
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truncate_keeps_latest_turns() {
        let turns: Vec<Turn> = (0..25).map(|i| Turn::user(i.to_string())).collect();
        let kept = truncate_history(turns, 20);
        assert_eq!(kept.len(), 20);
        assert_eq!(kept[0].content, "5");
        assert_eq!(kept[19].content, "24");
    }

    #[test]
    fn truncate_short_history_is_untouched() {
        let turns = vec![Turn::user("a"), Turn::assistant("b")];
        assert_eq!(truncate_history(turns.clone(), 20), turns);
        assert!(truncate_history(turns, 0).is_empty());
    }

    #[test]
    fn recent_turns_slices_tail() {
        let mut session = ConversationSession::new("s");
        session.turns = vec![Turn::user("a"), Turn::assistant("b"), Turn::user("c")];
        let recent: Vec<_> = session.recent_turns(2).iter().map(|t| t.content.as_str()).collect();
        assert_eq!(recent, vec!["b", "c"]);
    }

    #[test]
    fn turn_converts_to_chat_message() {
        let message = ChatMessage::from(&Turn::assistant("hello"));
        assert_eq!(message, ChatMessage::assistant("hello"));
    }

    #[test]
    fn turn_serializes_lowercase_role() {
        let json = serde_json::to_value(Turn::user("hi")).unwrap();
        assert_eq!(json["role"], "user");
        assert!(json["timestamp"].is_string());
    }
}
