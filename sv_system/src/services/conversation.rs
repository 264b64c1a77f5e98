use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

use async_trait::async_trait;
use itertools::Itertools;

use crate::data::{ChatMessage, ChatRole};
use crate::services::ConversationStore;

/// Turns kept per device before the oldest are discarded.
const MAX_TURNS: usize = 50;

/// In-memory conversation history, one bounded deque per device.
#[derive(Debug, Default)]
pub struct MemoryConversationStore {
    devices: Mutex<HashMap<String, VecDeque<ChatMessage>>>,
}

impl MemoryConversationStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ConversationStore for MemoryConversationStore {
    async fn context(&self, device_id: &str, limit: usize) -> Vec<ChatMessage> {
        let devices = self.devices.lock().expect("conversation store poisoned");
        let Some(history) = devices.get(device_id) else {
            return Vec::new();
        };
        history.iter().tail(limit).cloned().collect()
    }

    async fn add(&self, device_id: &str, role: ChatRole, content: &str) {
        let mut devices = self.devices.lock().expect("conversation store poisoned");
        let history = devices.entry(device_id.to_string()).or_default();
        history.push_back(ChatMessage {
            role,
            content: content.to_string(),
        });
        while history.len() > MAX_TURNS {
            history.pop_front();
        }
    }

    async fn clear(&self, device_id: &str) {
        let mut devices = self.devices.lock().expect("conversation store poisoned");
        devices.remove(device_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn context_returns_the_most_recent_turns() {
        let store = MemoryConversationStore::new();
        for i in 0..5 {
            store.add("dev", ChatRole::User, &format!("m{i}")).await;
        }

        let context = store.context("dev", 2).await;
        assert_eq!(context.len(), 2);
        assert_eq!(context[0].content, "m3");
        assert_eq!(context[1].content, "m4");

        store.clear("dev").await;
        assert!(store.context("dev", 10).await.is_empty());
    }
}
