use async_trait::async_trait;
use crate::models::chat::{ ChatMessage, Conversation, Role };
use crate::history::ConversationStore;
use crate::error::ChatError;
use std::collections::HashMap;
use std::error::Error;
use chrono::{ DateTime, TimeZone, Utc };
use log::{ debug, error, warn };
use once_cell::sync::Lazy;
use redis::{ Client, AsyncCommands, Script };
use serde::{ Serialize, Deserialize };
use uuid::Uuid;

/// Attempts at settling the implicit active conversation before giving up.
const RESOLVE_ATTEMPTS: usize = 3;

/// KEYS: meta, messages. ARGV: message json, key prefix, conversation id.
/// Returns the stored timestamp, or nil when the conversation is gone. The
/// index key is derived from the owner inside the script.
static APPEND_SCRIPT: Lazy<Script> = Lazy::new(|| {
    Script::new(
        r#"
local owner = redis.call('HGET', KEYS[1], 'user_id')
if not owner then
    return false
end
local msg = cjson.decode(ARGV[1])
local last = redis.call('LINDEX', KEYS[2], -1)
if last then
    local prev = cjson.decode(last).timestamp
    if prev > msg.timestamp then
        msg.timestamp = prev
    end
end
local ts = string.format('%d', msg.timestamp)
redis.call('RPUSH', KEYS[2], cjson.encode(msg))
redis.call('HSET', KEYS[1], 'updated_at', ts)
redis.call('ZADD', ARGV[2] .. 'user:' .. owner .. ':conversations', ts, ARGV[3])
return msg.timestamp
"#
    )
});

/// KEYS: meta, messages, index, marker. ARGV: user id, conversation id.
static DELETE_SCRIPT: Lazy<Script> = Lazy::new(|| {
    Script::new(
        r#"
local owner = redis.call('HGET', KEYS[1], 'user_id')
if not owner then
    return 'missing'
end
if owner ~= ARGV[1] then
    return 'forbidden'
end
redis.call('DEL', KEYS[1], KEYS[2])
redis.call('ZREM', KEYS[3], ARGV[2])
if redis.call('GET', KEYS[4]) == ARGV[2] then
    redis.call('DEL', KEYS[4])
end
return 'ok'
"#
    )
});

#[derive(Serialize, Deserialize)]
struct StoredMessage {
    role: Role,
    content: String,
    timestamp: i64,
}

impl StoredMessage {
    fn from_message(msg: &ChatMessage) -> Self {
        Self {
            role: msg.role,
            content: msg.content.clone(),
            timestamp: msg.timestamp.timestamp_millis(),
        }
    }

    fn into_message(self) -> ChatMessage {
        ChatMessage {
            role: self.role,
            content: self.content,
            timestamp: from_millis(self.timestamp),
        }
    }
}

fn from_millis(ms: i64) -> DateTime<Utc> {
    Utc.timestamp_millis_opt(ms).single().unwrap_or_default()
}

/// Durable store on Redis.
///
/// Layout, relative to the configured prefix:
/// - `conv:{id}` hash with `user_id`, `created_at`, `updated_at` (epoch ms)
/// - `conv:{id}:messages` list of JSON messages, appended with `RPUSH`
/// - `user:{user}:conversations` sorted set scored by `updated_at`
/// - `user:{user}:active` marker claimed with `SETNX` on implicit creation
///
/// Appends and deletes run as Lua scripts, so they stay atomic across
/// server instances sharing one Redis.
pub struct RedisConversationStore {
    client: Client,
    key_prefix: String,
}

impl RedisConversationStore {
    pub fn new(host: &str, key_prefix: &str) -> Result<Self, Box<dyn Error + Send + Sync>> {
        Ok(Self {
            client: Client::open(host)?,
            key_prefix: key_prefix.to_string(),
        })
    }

    async fn get_connection(&self) -> Result<redis::aio::MultiplexedConnection, redis::RedisError> {
        self.client.get_multiplexed_async_connection().await
    }

    fn meta_key(&self, conversation_id: &str) -> String {
        format!("{}conv:{}", self.key_prefix, conversation_id)
    }

    fn messages_key(&self, conversation_id: &str) -> String {
        format!("{}conv:{}:messages", self.key_prefix, conversation_id)
    }

    fn index_key(&self, user_id: &str) -> String {
        format!("{}user:{}:conversations", self.key_prefix, user_id)
    }

    fn marker_key(&self, user_id: &str) -> String {
        format!("{}user:{}:active", self.key_prefix, user_id)
    }

    async fn load(
        &self,
        conn: &mut redis::aio::MultiplexedConnection,
        conversation_id: &str
    ) -> Result<Option<Conversation>, ChatError> {
        let meta: HashMap<String, String> = conn.hgetall(self.meta_key(conversation_id)).await?;
        let Some(user_id) = meta.get("user_id") else {
            return Ok(None);
        };
        let created_at = parse_ms(meta.get("created_at"));
        let updated_at = parse_ms(meta.get("updated_at"));

        let entries: Vec<String> = conn.lrange(self.messages_key(conversation_id), 0, -1).await?;
        let mut messages = Vec::with_capacity(entries.len());
        for entry in &entries {
            match serde_json::from_str::<StoredMessage>(entry) {
                Ok(msg) => messages.push(msg.into_message()),
                Err(e) => {
                    error!("Corrupt message in conversation {}: {}", conversation_id, e);
                    return Err(ChatError::from(e));
                }
            }
        }

        Ok(
            Some(Conversation {
                id: conversation_id.to_string(),
                user_id: user_id.clone(),
                messages,
                created_at,
                updated_at,
            })
        )
    }

    async fn write_meta(
        &self,
        conn: &mut redis::aio::MultiplexedConnection,
        conversation: &Conversation
    ) -> Result<(), ChatError> {
        let created = conversation.created_at.timestamp_millis().to_string();
        let updated = conversation.updated_at.timestamp_millis().to_string();
        let fields = [
            ("user_id", conversation.user_id.as_str()),
            ("created_at", created.as_str()),
            ("updated_at", updated.as_str()),
        ];
        conn.hset_multiple::<_, _, _, ()>(self.meta_key(&conversation.id), &fields).await?;
        Ok(())
    }

    async fn index(
        &self,
        conn: &mut redis::aio::MultiplexedConnection,
        conversation: &Conversation
    ) -> Result<(), ChatError> {
        conn.zadd::<_, _, _, ()>(
            self.index_key(&conversation.user_id),
            &conversation.id,
            conversation.updated_at.timestamp_millis()
        ).await?;
        Ok(())
    }
}

fn parse_ms(raw: Option<&String>) -> DateTime<Utc> {
    raw.and_then(|s| s.parse::<i64>().ok())
        .map(from_millis)
        .unwrap_or_default()
}

#[async_trait]
impl ConversationStore for RedisConversationStore {
    async fn resolve_active(&self, user_id: &str) -> Result<Conversation, ChatError> {
        let mut conn = self.get_connection().await?;

        for _ in 0..RESOLVE_ATTEMPTS {
            let latest: Vec<String> = conn.zrevrange(self.index_key(user_id), 0, 0).await?;
            if let Some(id) = latest.first() {
                if let Some(conversation) = self.load(&mut conn, id).await? {
                    return Ok(conversation);
                }
                warn!("Dropping stale index entry {} for {}", id, user_id);
                conn.zrem::<_, _, ()>(self.index_key(user_id), id).await?;
                continue;
            }

            // The candidate record exists before the marker is claimed, so a
            // loser that reads the marker always finds a loadable conversation.
            let candidate = Conversation::new(Uuid::new_v4().to_string(), user_id);
            self.write_meta(&mut conn, &candidate).await?;
            let claimed: bool = conn.set_nx(self.marker_key(user_id), &candidate.id).await?;
            if claimed {
                self.index(&mut conn, &candidate).await?;
                debug!("Created conversation {} for {}", candidate.id, user_id);
                return Ok(candidate);
            }

            conn.del::<_, ()>(self.meta_key(&candidate.id)).await?;
            let winner: Option<String> = conn.get(self.marker_key(user_id)).await?;
            if let Some(id) = winner {
                if let Some(conversation) = self.load(&mut conn, &id).await? {
                    return Ok(conversation);
                }
            }
            warn!("Active conversation for {} vanished while resolving, retrying", user_id);
        }

        Err(ChatError::Persistence(format!("could not settle active conversation for {}", user_id)))
    }

    async fn start_new(&self, user_id: &str) -> Result<Conversation, ChatError> {
        let mut conn = self.get_connection().await?;
        let conversation = Conversation::new(Uuid::new_v4().to_string(), user_id);
        self.write_meta(&mut conn, &conversation).await?;
        self.index(&mut conn, &conversation).await?;
        Ok(conversation)
    }

    async fn append(&self, conversation_id: &str, message: ChatMessage) -> Result<(), ChatError> {
        let mut conn = self.get_connection().await?;
        let json_msg = serde_json::to_string(&StoredMessage::from_message(&message))?;

        let stored_at: Option<i64> = APPEND_SCRIPT.key(self.meta_key(conversation_id))
            .key(self.messages_key(conversation_id))
            .arg(json_msg)
            .arg(&self.key_prefix)
            .arg(conversation_id)
            .invoke_async(&mut conn).await?;

        match stored_at {
            Some(ts) => {
                debug!("Appended {} message to {} at {}", message.role, conversation_id, ts);
                Ok(())
            }
            None => Err(ChatError::NotFound(conversation_id.to_string())),
        }
    }

    async fn list_by_user(&self, user_id: &str) -> Result<Vec<Conversation>, ChatError> {
        let mut conn = self.get_connection().await?;
        let ids: Vec<String> = conn.zrevrange(self.index_key(user_id), 0, -1).await?;
        let mut conversations = Vec::with_capacity(ids.len());
        for id in ids {
            match self.load(&mut conn, &id).await? {
                Some(c) if c.is_owned_by(user_id) => conversations.push(c),
                Some(_) => warn!("Conversation {} indexed under foreign user {}", id, user_id),
                None => debug!("Skipping conversation {} deleted during listing", id),
            }
        }
        Ok(conversations)
    }

    async fn get_owned(
        &self,
        conversation_id: &str,
        user_id: &str
    ) -> Result<Conversation, ChatError> {
        let mut conn = self.get_connection().await?;
        let conversation = self
            .load(&mut conn, conversation_id).await?
            .ok_or_else(|| ChatError::NotFound(conversation_id.to_string()))?;
        if !conversation.is_owned_by(user_id) {
            return Err(ChatError::Forbidden(conversation_id.to_string()));
        }
        Ok(conversation)
    }

    async fn delete_owned(&self, conversation_id: &str, user_id: &str) -> Result<(), ChatError> {
        let mut conn = self.get_connection().await?;
        let outcome: String = DELETE_SCRIPT.key(self.meta_key(conversation_id))
            .key(self.messages_key(conversation_id))
            .key(self.index_key(user_id))
            .key(self.marker_key(user_id))
            .arg(user_id)
            .arg(conversation_id)
            .invoke_async(&mut conn).await?;

        match outcome.as_str() {
            "ok" => Ok(()),
            "forbidden" => Err(ChatError::Forbidden(conversation_id.to_string())),
            _ => Err(ChatError::NotFound(conversation_id.to_string())),
        }
    }

    async fn ping(&self) -> Result<(), ChatError> {
        let mut conn = self.get_connection().await?;
        redis::cmd("PING").query_async::<_, String>(&mut conn).await?;
        Ok(())
    }

    fn backend_name(&self) -> &'static str {
        "redis"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stored_message_keeps_role_and_millis() {
        let msg = ChatMessage::assistant("Foram 42 pedidos.");
        let stored = StoredMessage::from_message(&msg);
        let json = serde_json::to_string(&stored).unwrap();
        assert!(json.contains("\"role\":\"assistant\""));

        let back = serde_json::from_str::<StoredMessage>(&json).unwrap().into_message();
        assert_eq!(back.role, Role::Assistant);
        assert_eq!(back.timestamp.timestamp_millis(), msg.timestamp.timestamp_millis());
    }

    #[test]
    fn keys_are_prefixed_and_scoped() {
        let store = RedisConversationStore::new("redis://127.0.0.1:6379", "ambro:").unwrap();
        assert_eq!(store.meta_key("c1"), "ambro:conv:c1");
        assert_eq!(store.messages_key("c1"), "ambro:conv:c1:messages");
        assert_eq!(store.index_key("ana"), "ambro:user:ana:conversations");
        assert_eq!(store.marker_key("ana"), "ambro:user:ana:active");
    }

    // The tests below run against a live server named by REDIS_URL and are
    // skipped when it is unset. Each test works under its own key prefix.

    fn live_store() -> Option<RedisConversationStore> {
        let url = std::env::var("REDIS_URL").ok()?;
        let prefix = format!("ambro-test:{}:", Uuid::new_v4());
        Some(RedisConversationStore::new(&url, &prefix).unwrap())
    }

    #[tokio::test]
    async fn live_resolve_active_creates_once_then_reuses() {
        let Some(store) = live_store() else { return };
        let first = store.resolve_active("ana").await.unwrap();
        let second = store.resolve_active("ana").await.unwrap();
        assert_eq!(first.id, second.id);
        assert_eq!(store.list_by_user("ana").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn live_concurrent_resolve_active_yields_single_conversation() {
        let Some(store) = live_store() else { return };
        let store = std::sync::Arc::new(store);
        let mut handles = Vec::new();
        for _ in 0..16 {
            let store = store.clone();
            handles.push(tokio::spawn(async move { store.resolve_active("ana").await.unwrap().id }));
        }
        let mut ids = Vec::new();
        for h in handles {
            ids.push(h.await.unwrap());
        }
        ids.sort();
        ids.dedup();
        assert_eq!(ids.len(), 1);
        assert_eq!(store.list_by_user("ana").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn live_list_orders_by_latest_activity() {
        let Some(store) = live_store() else { return };
        let older = store.start_new("ana").await.unwrap();
        let newer = store.start_new("ana").await.unwrap();

        let mut msg = ChatMessage::user("oi");
        msg.timestamp = newer.updated_at + chrono::Duration::seconds(10);
        store.append(&older.id, msg).await.unwrap();

        let listed: Vec<String> = store
            .list_by_user("ana").await
            .unwrap()
            .into_iter()
            .map(|c| c.id)
            .collect();
        assert_eq!(listed, vec![older.id.clone(), newer.id]);
        assert_eq!(store.resolve_active("ana").await.unwrap().id, older.id);
    }

    #[tokio::test]
    async fn live_append_keeps_order_and_clamps_timestamps() {
        let Some(store) = live_store() else { return };
        let conv = store.start_new("ana").await.unwrap();

        let first = ChatMessage::user("primeira");
        let mut second = ChatMessage::assistant("segunda");
        second.timestamp = first.timestamp - chrono::Duration::seconds(30);
        store.append(&conv.id, first.clone()).await.unwrap();
        store.append(&conv.id, second).await.unwrap();

        let stored = store.get_owned(&conv.id, "ana").await.unwrap();
        assert_eq!(stored.messages.len(), 2);
        assert_eq!(stored.messages[0].content, "primeira");
        assert_eq!(stored.messages[1].role, Role::Assistant);
        assert_eq!(stored.messages[1].timestamp, stored.messages[0].timestamp);
        assert_eq!(stored.updated_at, stored.messages[1].timestamp);
    }

    #[tokio::test]
    async fn live_append_to_missing_conversation_is_not_found() {
        let Some(store) = live_store() else { return };
        let err = store.append("nope", ChatMessage::user("oi")).await.unwrap_err();
        assert!(matches!(err, ChatError::NotFound(_)));
        assert!(store.list_by_user("ana").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn live_delete_enforces_ownership_and_clears_marker() {
        let Some(store) = live_store() else { return };
        let active = store.resolve_active("ana").await.unwrap();

        assert!(matches!(
            store.delete_owned(&active.id, "bruno").await,
            Err(ChatError::Forbidden(_))
        ));
        store.delete_owned(&active.id, "ana").await.unwrap();
        assert!(matches!(
            store.delete_owned(&active.id, "ana").await,
            Err(ChatError::NotFound(_))
        ));
        assert!(matches!(
            store.append(&active.id, ChatMessage::user("oi")).await,
            Err(ChatError::NotFound(_))
        ));

        let mut conn = store.get_connection().await.unwrap();
        let marker: Option<String> = conn.get(store.marker_key("ana")).await.unwrap();
        assert_eq!(marker, None);
        let listed: Vec<String> = conn.zrange(store.index_key("ana"), 0, -1).await.unwrap();
        assert!(listed.is_empty());

        let replacement = store.resolve_active("ana").await.unwrap();
        assert_ne!(replacement.id, active.id);
    }

    #[tokio::test]
    async fn live_stale_index_entry_does_not_block_resolution() {
        let Some(store) = live_store() else { return };
        let mut conn = store.get_connection().await.unwrap();
        let far_future = Utc::now().timestamp_millis() + 1_000_000;
        conn.zadd::<_, _, _, ()>(store.index_key("ana"), "ghost", far_future).await.unwrap();

        let resolved = store.resolve_active("ana").await.unwrap();
        assert_ne!(resolved.id, "ghost");
        let listed: Vec<String> = conn.zrange(store.index_key("ana"), 0, -1).await.unwrap();
        assert_eq!(listed, vec![resolved.id]);
    }
}
