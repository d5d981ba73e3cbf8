//! One request/response cycle of the chat.
//!
//! The user message is durably appended before the agent runs, and the
//! agent's reply is appended before it is returned. The three steps are not
//! one transaction: a failure between them leaves the conversation ending on
//! an unanswered user turn, which readers display as-is.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use log::{ debug, info, warn };
use uuid::Uuid;

use crate::agent::Agent;
use crate::error::ChatError;
use crate::history::ConversationStore;
use crate::models::chat::{ ChatMessage, Conversation, MAX_USER_MESSAGE_CHARS };

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnState {
    Resolving,
    UserAppended,
    Generating,
    AssistantAppended,
    Done,
    Failed,
}

impl fmt::Display for TurnState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TurnState::Resolving => "resolving",
            TurnState::UserAppended => "user-appended",
            TurnState::Generating => "generating",
            TurnState::AssistantAppended => "assistant-appended",
            TurnState::Done => "done",
            TurnState::Failed => "failed",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TurnReply {
    pub reply_text: String,
    pub conversation_id: String,
}

/// Rejects blank messages and messages over the character limit.
pub fn validate_user_message(message: &str) -> Result<(), ChatError> {
    if message.trim().is_empty() {
        return Err(ChatError::Validation("message must not be empty".to_string()));
    }
    let len = message.chars().count();
    if len > MAX_USER_MESSAGE_CHARS {
        return Err(
            ChatError::Validation(
                format!("message has {} characters, the limit is {}", len, MAX_USER_MESSAGE_CHARS)
            )
        );
    }
    Ok(())
}

fn validate_conversation_id(id: &str) -> Result<(), ChatError> {
    Uuid::parse_str(id)
        .map(|_| ())
        .map_err(|_| ChatError::Validation(format!("'{}' is not a valid conversation id", id)))
}

pub struct TurnCoordinator {
    store: Arc<dyn ConversationStore>,
    agent: Arc<dyn Agent>,
    agent_timeout: Duration,
}

struct Progress<'a> {
    user_id: &'a str,
    state: TurnState,
}

impl Progress<'_> {
    fn advance(&mut self, next: TurnState) {
        debug!("turn[{}]: {} -> {}", self.user_id, self.state, next);
        self.state = next;
    }

    fn fail(&mut self, err: ChatError) -> ChatError {
        warn!("turn[{}]: failed while {}: {}", self.user_id, self.state, err);
        self.state = TurnState::Failed;
        err
    }
}

impl TurnCoordinator {
    pub fn new(
        store: Arc<dyn ConversationStore>,
        agent: Arc<dyn Agent>,
        agent_timeout: Duration
    ) -> Self {
        Self { store, agent, agent_timeout }
    }

    pub fn store(&self) -> &Arc<dyn ConversationStore> {
        &self.store
    }

    async fn resolve(
        &self,
        user_id: &str,
        conversation_id: Option<&str>
    ) -> Result<Conversation, ChatError> {
        match conversation_id {
            Some(id) => {
                validate_conversation_id(id)?;
                self.store.get_owned(id, user_id).await
            }
            None => self.store.resolve_active(user_id).await,
        }
    }

    async fn generate(&self, history: &[ChatMessage]) -> Result<String, ChatError> {
        let reply = tokio::time
            ::timeout(self.agent_timeout, self.agent.generate(history)).await
            .map_err(|_| {
                ChatError::Generation(
                    format!("agent did not answer within {}s", self.agent_timeout.as_secs_f32())
                )
            })?
            .map_err(|e| ChatError::Generation(e.to_string()))?;

        if reply.trim().is_empty() {
            return Err(ChatError::Generation("agent returned an empty reply".to_string()));
        }
        Ok(reply)
    }

    /// Runs one turn for `user_id`.
    ///
    /// Nothing is written when validation or conversation resolution fails.
    /// When generation fails the user message stays in the log and no
    /// assistant message is added.
    pub async fn submit(
        &self,
        user_id: &str,
        message: &str,
        conversation_id: Option<&str>
    ) -> Result<TurnReply, ChatError> {
        validate_user_message(message)?;
        let mut progress = Progress { user_id, state: TurnState::Resolving };

        let conversation = self
            .resolve(user_id, conversation_id).await
            .map_err(|e| progress.fail(e))?;

        self.store
            .append(&conversation.id, ChatMessage::user(message)).await
            .map_err(|e| progress.fail(e))?;
        progress.advance(TurnState::UserAppended);

        let history = self.store
            .get_owned(&conversation.id, user_id).await
            .map_err(|e| progress.fail(e))?
            .messages;
        progress.advance(TurnState::Generating);

        let reply_text = self.generate(&history).await.map_err(|e| progress.fail(e))?;

        self.store
            .append(&conversation.id, ChatMessage::assistant(reply_text.clone())).await
            .map_err(|e| progress.fail(e))?;
        progress.advance(TurnState::AssistantAppended);

        progress.advance(TurnState::Done);
        info!(
            "Turn completed for {} in conversation {} ({} prior messages)",
            user_id,
            conversation.id,
            history.len().saturating_sub(1)
        );
        Ok(TurnReply { reply_text, conversation_id: conversation.id })
    }
}
