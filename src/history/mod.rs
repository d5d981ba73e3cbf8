mod memory;
mod redis;

pub use memory::MemoryConversationStore;
pub use self::redis::RedisConversationStore;

use async_trait::async_trait;
use log::info;
use std::error::Error;
use crate::cli::Args;
use crate::error::ChatError;
use std::sync::Arc;
use crate::models::chat::{ ChatMessage, Conversation, Role };

/// Owner of every conversation record and its append-only message log.
///
/// Implementations must never hand one user's conversation to another user,
/// must serialize appends per conversation, and must not create two
/// conversations when `resolve_active` races for the same user.
#[async_trait]
pub trait ConversationStore: Send + Sync {
    /// Most recently updated conversation of `user_id`, created on demand.
    async fn resolve_active(&self, user_id: &str) -> Result<Conversation, ChatError>;

    async fn start_new(&self, user_id: &str) -> Result<Conversation, ChatError>;

    /// Appends to the log and bumps `updated_at`. The stored timestamp is
    /// clamped so it never precedes the previous message.
    async fn append(&self, conversation_id: &str, message: ChatMessage) -> Result<(), ChatError>;

    /// The user's conversations, most recently updated first.
    async fn list_by_user(&self, user_id: &str) -> Result<Vec<Conversation>, ChatError>;

    async fn get_owned(
        &self,
        conversation_id: &str,
        user_id: &str
    ) -> Result<Conversation, ChatError>;

    /// Fails with `Forbidden` for foreign conversations and `NotFound` for
    /// missing ones, including ones deleted by an earlier call.
    async fn delete_owned(&self, conversation_id: &str, user_id: &str) -> Result<(), ChatError>;

    /// Liveness check for the health endpoint.
    async fn ping(&self) -> Result<(), ChatError> {
        Ok(())
    }

    fn backend_name(&self) -> &'static str;
}

pub fn create_history_store(
    args: &Args
) -> Result<Arc<dyn ConversationStore>, Box<dyn Error + Send + Sync>> {
    match args.history_type.to_lowercase().as_str() {
        "redis" => {
            let store = RedisConversationStore::new(&args.history_host, &args.history_redis_prefix)?;
            Ok(Arc::new(store))
        }
        "memory" => Ok(Arc::new(MemoryConversationStore::new())),
        _ =>
            Err(
                Box::new(
                    std::io::Error::new(
                        std::io::ErrorKind::InvalidInput,
                        format!("Unsupported history store type: {}", args.history_type)
                    )
                )
            ),
    }
}

pub fn initialize_history_store(
    args: &Args
) -> Result<Arc<dyn ConversationStore>, Box<dyn Error + Send + Sync>> {
    info!("Chat history will be stored in: {} at {}", args.history_type, args.history_host);
    create_history_store(args)
}

pub fn format_history_for_prompt(messages: &[ChatMessage]) -> String {
    if messages.is_empty() {
        return String::new();
    }
    let mut result = String::from("Previous conversation:\n");
    for msg in messages {
        let role_display = match msg.role {
            Role::User => "User",
            Role::Assistant => "Assistant",
        };

        result.push_str(&format!("{}: {}\n", role_display, msg.content));
    }

    result
}
