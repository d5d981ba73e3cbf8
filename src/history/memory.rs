use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{ Mutex, RwLock };
use uuid::Uuid;
use log::debug;

use crate::error::ChatError;
use crate::history::ConversationStore;
use crate::models::chat::{ ChatMessage, Conversation };

struct Slot {
    conversation: Conversation,
    live: bool,
}

type SharedSlot = Arc<Mutex<Slot>>;

/// In-process store. Each conversation sits behind its own mutex so appends
/// to different conversations never contend; implicit creation is serialized
/// per user.
#[derive(Default)]
pub struct MemoryConversationStore {
    conversations: RwLock<HashMap<String, SharedSlot>>,
    user_locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl MemoryConversationStore {
    pub fn new() -> Self {
        Self::default()
    }

    async fn user_lock(&self, user_id: &str) -> Arc<Mutex<()>> {
        let mut locks = self.user_locks.lock().await;
        locks.entry(user_id.to_string()).or_default().clone()
    }

    async fn slot(&self, conversation_id: &str) -> Option<SharedSlot> {
        self.conversations.read().await.get(conversation_id).cloned()
    }

    async fn insert_new(&self, user_id: &str) -> Conversation {
        let conversation = Conversation::new(Uuid::new_v4().to_string(), user_id);
        let slot = Slot { conversation: conversation.clone(), live: true };
        self.conversations.write().await.insert(conversation.id.clone(), Arc::new(Mutex::new(slot)));
        debug!("Created conversation {} for {}", conversation.id, user_id);
        conversation
    }
}

#[async_trait]
impl ConversationStore for MemoryConversationStore {
    async fn resolve_active(&self, user_id: &str) -> Result<Conversation, ChatError> {
        let lock = self.user_lock(user_id).await;
        let _guard = lock.lock().await;

        if let Some(latest) = self.list_by_user(user_id).await?.into_iter().next() {
            return Ok(latest);
        }
        Ok(self.insert_new(user_id).await)
    }

    async fn start_new(&self, user_id: &str) -> Result<Conversation, ChatError> {
        Ok(self.insert_new(user_id).await)
    }

    async fn append(&self, conversation_id: &str, message: ChatMessage) -> Result<(), ChatError> {
        let slot = self
            .slot(conversation_id).await
            .ok_or_else(|| ChatError::NotFound(conversation_id.to_string()))?;
        let mut slot = slot.lock().await;
        if !slot.live {
            return Err(ChatError::NotFound(conversation_id.to_string()));
        }

        let conversation = &mut slot.conversation;
        let message = match conversation.last_timestamp() {
            Some(floor) => message.not_before(floor),
            None => message,
        };
        if message.timestamp > conversation.updated_at {
            conversation.updated_at = message.timestamp;
        }
        conversation.messages.push(message);
        Ok(())
    }

    async fn list_by_user(&self, user_id: &str) -> Result<Vec<Conversation>, ChatError> {
        let slots: Vec<SharedSlot> = self.conversations.read().await.values().cloned().collect();
        let mut owned = Vec::new();
        for slot in slots {
            let slot = slot.lock().await;
            if slot.live && slot.conversation.is_owned_by(user_id) {
                owned.push(slot.conversation.clone());
            }
        }
        owned.sort_by(|a, b| {
            b.updated_at
                .cmp(&a.updated_at)
                .then_with(|| b.created_at.cmp(&a.created_at))
                .then_with(|| a.id.cmp(&b.id))
        });
        Ok(owned)
    }

    async fn get_owned(
        &self,
        conversation_id: &str,
        user_id: &str
    ) -> Result<Conversation, ChatError> {
        let slot = self
            .slot(conversation_id).await
            .ok_or_else(|| ChatError::NotFound(conversation_id.to_string()))?;
        let slot = slot.lock().await;
        if !slot.live {
            return Err(ChatError::NotFound(conversation_id.to_string()));
        }
        if !slot.conversation.is_owned_by(user_id) {
            return Err(ChatError::Forbidden(conversation_id.to_string()));
        }
        Ok(slot.conversation.clone())
    }

    async fn delete_owned(&self, conversation_id: &str, user_id: &str) -> Result<(), ChatError> {
        let mut map = self.conversations.write().await;
        let slot = map
            .get(conversation_id)
            .cloned()
            .ok_or_else(|| ChatError::NotFound(conversation_id.to_string()))?;
        let mut slot = slot.lock().await;
        if !slot.conversation.is_owned_by(user_id) {
            return Err(ChatError::Forbidden(conversation_id.to_string()));
        }
        slot.live = false;
        map.remove(conversation_id);
        debug!("Deleted conversation {} of {}", conversation_id, user_id);
        Ok(())
    }

    fn backend_name(&self) -> &'static str {
        "memory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::chat::Role;
    use chrono::Duration;

    #[tokio::test]
    async fn resolve_active_creates_once_then_reuses() {
        let store = MemoryConversationStore::new();
        let first = store.resolve_active("ana").await.unwrap();
        let second = store.resolve_active("ana").await.unwrap();
        assert_eq!(first.id, second.id);
        assert_eq!(store.list_by_user("ana").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn concurrent_resolve_active_yields_single_conversation() {
        let store = Arc::new(MemoryConversationStore::new());
        let mut handles = Vec::new();
        for _ in 0..16 {
            let store = Arc::clone(&store);
            handles.push(tokio::spawn(async move { store.resolve_active("ana").await.unwrap().id }));
        }
        let mut ids = Vec::new();
        for h in handles {
            ids.push(h.await.unwrap());
        }
        ids.dedup();
        assert_eq!(ids.len(), 1);
        assert_eq!(store.list_by_user("ana").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn resolve_active_picks_most_recently_updated() {
        let store = MemoryConversationStore::new();
        let older = store.start_new("ana").await.unwrap();
        let newer = store.start_new("ana").await.unwrap();

        let mut msg = ChatMessage::user("oi");
        msg.timestamp = newer.updated_at + Duration::seconds(10);
        store.append(&older.id, msg).await.unwrap();

        assert_eq!(store.resolve_active("ana").await.unwrap().id, older.id);
        let listed: Vec<String> = store
            .list_by_user("ana").await
            .unwrap()
            .into_iter()
            .map(|c| c.id)
            .collect();
        assert_eq!(listed, vec![older.id, newer.id]);
    }

    #[tokio::test]
    async fn append_is_ordered_and_clamps_timestamps() {
        let store = MemoryConversationStore::new();
        let conv = store.start_new("ana").await.unwrap();

        let first = ChatMessage::user("primeira");
        let mut second = ChatMessage::assistant("segunda");
        second.timestamp = first.timestamp - Duration::seconds(30);
        store.append(&conv.id, first.clone()).await.unwrap();
        store.append(&conv.id, second).await.unwrap();

        let stored = store.get_owned(&conv.id, "ana").await.unwrap();
        assert_eq!(stored.messages.len(), 2);
        assert_eq!(stored.messages[0], first);
        assert_eq!(stored.messages[1].role, Role::Assistant);
        assert!(stored.messages[1].timestamp >= stored.messages[0].timestamp);
    }

    #[tokio::test]
    async fn appended_messages_never_change() {
        let store = MemoryConversationStore::new();
        let conv = store.start_new("ana").await.unwrap();
        store.append(&conv.id, ChatMessage::user("um")).await.unwrap();
        let snapshot = store.get_owned(&conv.id, "ana").await.unwrap().messages;

        store.append(&conv.id, ChatMessage::assistant("dois")).await.unwrap();
        store.append(&conv.id, ChatMessage::user("três")).await.unwrap();
        let after = store.get_owned(&conv.id, "ana").await.unwrap().messages;

        assert_eq!(after.len(), 3);
        assert_eq!(&after[..1], &snapshot[..]);
    }

    #[tokio::test]
    async fn append_to_missing_conversation_is_not_found() {
        let store = MemoryConversationStore::new();
        let err = store.append("nope", ChatMessage::user("oi")).await.unwrap_err();
        assert!(matches!(err, ChatError::NotFound(_)));
    }

    #[tokio::test]
    async fn ownership_is_isolated() {
        let store = MemoryConversationStore::new();
        let conv = store.start_new("ana").await.unwrap();

        assert!(store.list_by_user("bruno").await.unwrap().is_empty());
        assert!(matches!(
            store.get_owned(&conv.id, "bruno").await,
            Err(ChatError::Forbidden(_))
        ));
        assert!(matches!(
            store.delete_owned(&conv.id, "bruno").await,
            Err(ChatError::Forbidden(_))
        ));
        assert_eq!(store.list_by_user("ana").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn second_delete_reports_not_found() {
        let store = MemoryConversationStore::new();
        let conv = store.start_new("ana").await.unwrap();
        store.delete_owned(&conv.id, "ana").await.unwrap();
        assert!(matches!(
            store.delete_owned(&conv.id, "ana").await,
            Err(ChatError::NotFound(_))
        ));
        assert!(matches!(
            store.append(&conv.id, ChatMessage::user("oi")).await,
            Err(ChatError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn concurrent_appends_to_one_conversation_are_all_kept() {
        let store = Arc::new(MemoryConversationStore::new());
        let conv = store.start_new("ana").await.unwrap();
        let mut handles = Vec::new();
        for i in 0..20 {
            let store = Arc::clone(&store);
            let id = conv.id.clone();
            handles.push(
                tokio::spawn(async move {
                    store.append(&id, ChatMessage::user(format!("msg {}", i))).await.unwrap();
                })
            );
        }
        for h in handles {
            h.await.unwrap();
        }
        let stored = store.get_owned(&conv.id, "ana").await.unwrap();
        assert_eq!(stored.messages.len(), 20);
        assert!(stored.messages.windows(2).all(|w| w[0].timestamp <= w[1].timestamp));
    }
}
