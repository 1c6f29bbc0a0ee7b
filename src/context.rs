use std::collections::{HashMap, VecDeque};

use tokio::sync::RwLock;

use crate::types::{ChatTurn, ConversationId};

/// Exchanges (user + assistant pairs) kept per conversation.
pub const DEFAULT_MAX_PAIRS: usize = 5;

/// Short-term chat history used only to condition AI replies.
///
/// Lives in process memory and is lost on restart. Reading a window and
/// appending to it are separate steps, so two events for the same
/// conversation racing each other may both read the older window.
pub struct ContextStore {
    capacity: usize,
    windows: RwLock<HashMap<ConversationId, VecDeque<ChatTurn>>>,
}

impl ContextStore {
    pub fn new(max_pairs: usize) -> Self {
        Self {
            capacity: max_pairs.max(1) * 2,
            windows: RwLock::new(HashMap::new()),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Oldest turn first.
    pub async fn window(&self, conversation: &ConversationId) -> Vec<ChatTurn> {
        let windows = self.windows.read().await;
        windows
            .get(conversation)
            .map(|turns| turns.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub async fn append_exchange(
        &self,
        conversation: &ConversationId,
        user: impl Into<String>,
        assistant: impl Into<String>,
    ) {
        let mut windows = self.windows.write().await;
        let turns = windows.entry(conversation.clone()).or_default();
        turns.push_back(ChatTurn::user(user));
        turns.push_back(ChatTurn::assistant(assistant));
        while turns.len() > self.capacity {
            turns.pop_front();
        }
    }
}

impl Default for ContextStore {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_PAIRS)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::types::ChatRole;

    #[tokio::test]
    async fn unknown_conversation_has_empty_window() {
        let store = ContextStore::default();
        assert!(store.window(&ConversationId::new("P1", "S1")).await.is_empty());
    }

    #[tokio::test]
    async fn keeps_only_the_most_recent_five_pairs() {
        let store = ContextStore::default();
        let conv = ConversationId::new("P1", "S1");
        for i in 1..=6 {
            store
                .append_exchange(&conv, format!("question {i}"), format!("answer {i}"))
                .await;
        }

        let window = store.window(&conv).await;
        assert_eq!(window.len(), 10);
        assert_eq!(window[0], ChatTurn::user("question 2"));
        assert_eq!(window[1], ChatTurn::assistant("answer 2"));
        assert_eq!(window[9], ChatTurn::assistant("answer 6"));
        assert!(window
            .iter()
            .step_by(2)
            .all(|turn| turn.role == ChatRole::User));
    }

    #[tokio::test]
    async fn conversations_are_isolated() {
        let store = ContextStore::default();
        let a = ConversationId::new("P1", "A");
        let b = ConversationId::new("P1", "B");
        store.append_exchange(&a, "hi", "hello").await;

        assert_eq!(store.window(&a).await.len(), 2);
        assert!(store.window(&b).await.is_empty());
    }

    #[tokio::test]
    async fn concurrent_appends_never_exceed_capacity() {
        let store = Arc::new(ContextStore::default());
        let conv = ConversationId::new("P1", "S1");
        let mut handles = Vec::new();
        for i in 0..40 {
            let store = store.clone();
            let conv = conv.clone();
            handles.push(tokio::spawn(async move {
                store.append_exchange(&conv, format!("u{i}"), format!("a{i}")).await;
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        let window = store.window(&conv).await;
        assert_eq!(window.len(), store.capacity());
        assert_eq!(window[0].role, ChatRole::User);
    }
}
