use std::collections::HashMap;
use std::sync::Arc;

use cafe_core::domain::conversation::{pair_exchanges, Exchange, Turn};
use tokio::sync::{Mutex, RwLock};
use tracing::info;

/// History of one conversation.
#[derive(Debug)]
pub struct Session {
    id: String,
    turns: Mutex<Vec<Turn>>,
}

impl Session {
    fn new(id: impl Into<String>) -> Self {
        Self { id: id.into(), turns: Mutex::new(Vec::new()) }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub async fn history(&self) -> Vec<Turn> {
        self.turns.lock().await.clone()
    }

    pub async fn exchanges(&self) -> Vec<Exchange> {
        pair_exchanges(&self.turns.lock().await)
    }

    pub async fn record_exchange(&self, user: impl Into<String>, assistant: impl Into<String>) {
        let mut turns = self.turns.lock().await;
        turns.push(Turn::user(user));
        turns.push(Turn::assistant(assistant));
    }

    /// Records a user turn whose answer was withheld. No assistant turn follows it.
    pub async fn record_blocked(&self, user: impl Into<String>) {
        self.turns.lock().await.push(Turn::user(user));
    }

    pub async fn clear(&self) {
        self.turns.lock().await.clear();
        info!(event_name = "conversation.cleared", conversation_id = %self.id, "cleared conversation history");
    }

    pub async fn len(&self) -> usize {
        self.turns.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.turns.lock().await.is_empty()
    }
}

#[derive(Debug, Default)]
struct StoreInner {
    sessions: HashMap<String, Arc<Session>>,
    order: Vec<String>,
}

/// Keyed registry of live conversations. Entries stay until deleted or the process exits.
#[derive(Debug, Default)]
pub struct ConversationStore {
    inner: RwLock<StoreInner>,
}

impl ConversationStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn get(&self, id: &str) -> Option<Arc<Session>> {
        self.inner.read().await.sessions.get(id).cloned()
    }

    pub async fn get_or_create(&self, id: &str) -> Arc<Session> {
        if let Some(session) = self.get(id).await {
            return session;
        }

        let mut inner = self.inner.write().await;
        if let Some(session) = inner.sessions.get(id) {
            return Arc::clone(session);
        }
        let session = Arc::new(Session::new(id));
        inner.sessions.insert(id.to_string(), Arc::clone(&session));
        inner.order.push(id.to_string());
        info!(event_name = "conversation.created", conversation_id = %id, "created conversation");
        session
    }

    pub async fn delete(&self, id: &str) -> bool {
        let mut inner = self.inner.write().await;
        if inner.sessions.remove(id).is_none() {
            return false;
        }
        inner.order.retain(|existing| existing != id);
        info!(event_name = "conversation.deleted", conversation_id = %id, "deleted conversation");
        true
    }

    /// Ids in creation order.
    pub async fn list(&self) -> Vec<String> {
        self.inner.read().await.order.clone()
    }

    /// Empties a conversation's history, creating the conversation if needed.
    pub async fn clear(&self, id: &str) -> Arc<Session> {
        let session = self.get_or_create(id).await;
        session.clear().await;
        session
    }

    pub async fn len(&self) -> usize {
        self.inner.read().await.order.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use cafe_core::domain::conversation::{Turn, TurnRole};

    use super::ConversationStore;

    #[tokio::test]
    async fn get_or_create_returns_the_same_session() {
        let store = ConversationStore::new();

        let first = store.get_or_create("k").await;
        first.record_exchange("hi", "hello").await;
        let second = store.get_or_create("k").await;

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(second.history().await, first.history().await);
        assert_eq!(store.list().await, vec!["k".to_string()]);
    }

    #[tokio::test]
    async fn delete_then_recreate_starts_empty() {
        let store = ConversationStore::new();
        store.get_or_create("k").await.record_exchange("hi", "hello").await;

        assert!(store.delete("k").await);
        assert!(!store.delete("k").await, "second delete reports absence");
        assert!(store.get("k").await.is_none());
        assert!(store.get_or_create("k").await.is_empty().await);
    }

    #[tokio::test]
    async fn list_keeps_insertion_order_across_deletes() {
        let store = ConversationStore::new();
        for id in ["b", "a", "c"] {
            store.get_or_create(id).await;
        }
        store.delete("a").await;
        store.get_or_create("a").await;

        assert_eq!(store.list().await, vec!["b", "c", "a"]);
        assert_eq!(store.len().await, 3);
    }

    #[tokio::test]
    async fn clear_keeps_session_and_creates_missing_ones() {
        let store = ConversationStore::new();
        let session = store.get_or_create("k").await;
        session.record_exchange("hi", "hello").await;

        store.clear("k").await;
        assert!(session.is_empty().await);
        assert_eq!(store.list().await, vec!["k"]);

        store.clear("fresh").await;
        assert_eq!(store.list().await, vec!["k", "fresh"]);
    }

    #[tokio::test]
    async fn blocked_turn_leaves_unpaired_user_entry() {
        let store = ConversationStore::new();
        let session = store.get_or_create("k").await;
        session.record_exchange("hi", "hello").await;
        session.record_blocked("something harmful").await;

        let history = session.history().await;
        assert_eq!(history.len(), 3);
        assert_eq!(history.last(), Some(&Turn::user("something harmful")));
        assert_eq!(history.last().map(|turn| turn.role), Some(TurnRole::User));
        assert_eq!(session.exchanges().await.len(), 1);
    }
}
