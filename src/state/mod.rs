//! Conversation state
//!
//! Each session owns a bounded window of its most recent turns. The
//! window is what the router sees as history; older turns are evicted
//! first. Stores only ever receive finished turns, so a session is never
//! partially written.

use crate::config::Settings;
use crate::models::{SessionId, Turn};
use crate::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

pub mod postgres;

pub use postgres::PostgresSessionStore;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ConversationState {
    pub session_id: SessionId,
    turns: VecDeque<Turn>,
    max_turns: usize,
    /// Turns ever committed, including evicted ones
    total_turns: u64,
    pub updated_at: DateTime<Utc>,
}

impl ConversationState {
    pub fn new(session_id: SessionId, max_turns: usize) -> Self {
        Self {
            session_id,
            turns: VecDeque::new(),
            max_turns: max_turns.max(1),
            total_turns: 0,
            updated_at: Utc::now(),
        }
    }

    /// Rebuild from persisted turns (oldest first) and the lifetime count
    pub fn restore(
        session_id: SessionId,
        max_turns: usize,
        turns: Vec<Turn>,
        total_turns: u64,
    ) -> Self {
        let mut state = Self::new(session_id, max_turns);
        for turn in turns {
            state.push(turn);
        }
        state.total_turns = total_turns.max(state.turns.len() as u64);
        state
    }

    /// Append a finished turn, returning the evicted ones
    pub fn push(&mut self, turn: Turn) -> Vec<Turn> {
        self.turns.push_back(turn);
        self.total_turns += 1;
        self.updated_at = Utc::now();

        let mut evicted = Vec::new();
        while self.turns.len() > self.max_turns {
            if let Some(oldest) = self.turns.pop_front() {
                evicted.push(oldest);
            }
        }
        evicted
    }

    /// Retained window, oldest first
    pub fn window(&mut self) -> &[Turn] {
        self.turns.make_contiguous()
    }

    pub fn turns(&self) -> impl DoubleEndedIterator<Item = &Turn> {
        self.turns.iter()
    }

    pub fn last_turn(&self) -> Option<&Turn> {
        self.turns.back()
    }

    /// Index the next utterance will carry
    pub fn next_turn_index(&self) -> u64 {
        self.total_turns
    }

    pub fn total_turns(&self) -> u64 {
        self.total_turns
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

}

/// Persistence for per-session conversation windows
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Current state; an unknown session is empty
    async fn load(&self, session_id: SessionId) -> Result<ConversationState>;

    /// Append one finished turn and return the updated state
    async fn append(&self, session_id: SessionId, turn: Turn) -> Result<ConversationState>;

    async fn clear(&self, session_id: SessionId) -> Result<()>;

    fn backend(&self) -> &'static str;
}

pub struct InMemorySessionStore {
    sessions: Arc<RwLock<HashMap<SessionId, ConversationState>>>,
    max_turns: usize,
}

impl InMemorySessionStore {
    pub fn new(max_turns: usize) -> Self {
        Self {
            sessions: Arc::new(RwLock::new(HashMap::new())),
            max_turns,
        }
    }
}

#[async_trait]
impl SessionStore for InMemorySessionStore {
    async fn load(&self, session_id: SessionId) -> Result<ConversationState> {
        let sessions = self.sessions.read().await;
        Ok(sessions
            .get(&session_id)
            .cloned()
            .unwrap_or_else(|| ConversationState::new(session_id, self.max_turns)))
    }

    async fn append(&self, session_id: SessionId, turn: Turn) -> Result<ConversationState> {
        let mut sessions = self.sessions.write().await;
        let state = sessions
            .entry(session_id)
            .or_insert_with(|| ConversationState::new(session_id, self.max_turns));

        let evicted = state.push(turn);
        if !evicted.is_empty() {
            debug!(%session_id, evicted = evicted.len(), "Evicted oldest turns");
        }

        Ok(state.clone())
    }

    async fn clear(&self, session_id: SessionId) -> Result<()> {
        self.sessions.write().await.remove(&session_id);
        Ok(())
    }

    fn backend(&self) -> &'static str {
        "in-memory"
    }
}

/// Postgres when a database URL is configured, in-memory otherwise
pub fn build_store(settings: &Settings) -> Arc<dyn SessionStore> {
    if let Some(url) = &settings.database_url {
        match PostgresSessionStore::connect_lazy(url, settings.history_turns) {
            Ok(store) => {
                info!("Session store backend: postgres");
                return Arc::new(store);
            }
            Err(error) => {
                warn!(
                    %error,
                    "Failed to initialize postgres session store, falling back to in-memory"
                );
            }
        }
    }

    info!("Session store backend: in-memory");
    Arc::new(InMemorySessionStore::new(settings.history_turns))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing;
    use uuid::Uuid;

    #[test]
    fn test_window_evicts_oldest_first() {
        let mut state = ConversationState::new(Uuid::new_v4(), 2);
        for text in ["first", "second", "third"] {
            state.push(testing::turn(text, vec![], vec![]));
        }

        let texts: Vec<_> = state
            .window()
            .iter()
            .map(|t| t.utterance.text.clone())
            .collect();
        assert_eq!(texts, vec!["second", "third"]);
        assert_eq!(state.total_turns(), 3);
        assert_eq!(state.next_turn_index(), 3);
    }

    #[test]
    fn test_restore_keeps_lifetime_count() {
        let turns = vec![
            testing::turn("a", vec![], vec![]),
            testing::turn("b", vec![], vec![]),
        ];
        let state = ConversationState::restore(Uuid::new_v4(), 8, turns, 12);
        assert_eq!(state.len(), 2);
        assert_eq!(state.total_turns(), 12);
        assert_eq!(state.last_turn().map(|t| t.utterance.text.as_str()), Some("b"));
    }

    #[tokio::test]
    async fn test_in_memory_store_round_trip() {
        let store = InMemorySessionStore::new(2);
        let session = Uuid::new_v4();

        assert!(store.load(session).await.unwrap().is_empty());

        store
            .append(session, testing::turn("one", vec![], vec![]))
            .await
            .unwrap();
        store
            .append(session, testing::turn("two", vec![], vec![]))
            .await
            .unwrap();
        let state = store
            .append(session, testing::turn("three", vec![], vec![]))
            .await
            .unwrap();

        assert_eq!(state.len(), 2);
        assert_eq!(store.load(session).await.unwrap(), state);

        // Sessions are isolated
        assert!(store.load(Uuid::new_v4()).await.unwrap().is_empty());

        store.clear(session).await.unwrap();
        assert_eq!(store.load(session).await.unwrap().total_turns(), 0);
    }

    #[test]
    fn test_build_store_defaults_to_memory() {
        let settings = Settings::default();
        assert_eq!(build_store(&settings).backend(), "in-memory");
    }
}
