use chrono::{ DateTime, Utc };
use serde::{ Serialize, Deserialize };

use crate::models::chat::{ ChatMessage, Conversation, Role };
use crate::render::{ self, RenderedMessage };

/// Uniform success envelope. Failures are produced by `ChatError`.
#[derive(Serialize, Deserialize, Debug)]
pub struct ApiResponse<T> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl<T> ApiResponse<T> {
    pub fn ok(data: T) -> Self {
        Self { success: true, data: Some(data), error: None }
    }
}

impl ApiResponse<()> {
    pub fn empty() -> Self {
        Self { success: true, data: None, error: None }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct SubmitTurnRequest {
    pub message: String,
    #[serde(default, alias = "conversationId", skip_serializing_if = "Option::is_none")]
    pub conversation_id: Option<String>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct TurnResponse {
    pub message: String,
    pub conversation_id: String,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct LoginResponse {
    pub token: String,
    pub user: String,
    pub expires_in: String,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct MeResponse {
    pub user: String,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct HealthResponse {
    pub api: String,
    pub store: String,
    pub timestamp: String,
}

/// A stored message together with its presentation.
#[derive(Serialize, Debug, Clone)]
pub struct RenderedChatMessage {
    pub role: Role,
    pub content: String,
    pub timestamp: DateTime<Utc>,
    pub rendered: RenderedMessage,
    pub html: String,
}

impl From<&ChatMessage> for RenderedChatMessage {
    fn from(message: &ChatMessage) -> Self {
        let rendered = render::render_message(&message.content);
        Self {
            role: message.role,
            content: message.content.clone(),
            timestamp: message.timestamp,
            html: rendered.to_html(),
            rendered,
        }
    }
}

#[derive(Serialize, Debug, Clone)]
pub struct RenderedConversation {
    pub id: String,
    pub messages: Vec<RenderedChatMessage>,
    pub awaiting_reply: bool,
}

impl From<&Conversation> for RenderedConversation {
    fn from(conversation: &Conversation) -> Self {
        Self {
            id: conversation.id.clone(),
            messages: conversation.messages.iter().map(RenderedChatMessage::from).collect(),
            awaiting_reply: conversation.awaiting_reply(),
        }
    }
}

/// Client-side view of a rendered conversation: the HTML of each message
/// without the block tree.
#[derive(Deserialize, Debug, Clone)]
pub struct RenderedConversationView {
    pub id: String,
    pub messages: Vec<RenderedMessageView>,
    pub awaiting_reply: bool,
}

#[derive(Deserialize, Debug, Clone)]
pub struct RenderedMessageView {
    pub role: Role,
    pub content: String,
    pub timestamp: DateTime<Utc>,
    pub html: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn submit_request_accepts_both_id_spellings() {
        let a: SubmitTurnRequest =
            serde_json::from_str(r#"{"message":"oi","conversation_id":"abc"}"#).unwrap();
        let b: SubmitTurnRequest =
            serde_json::from_str(r#"{"message":"oi","conversationId":"abc"}"#).unwrap();
        assert_eq!(a.conversation_id.as_deref(), Some("abc"));
        assert_eq!(b.conversation_id.as_deref(), Some("abc"));

        let c: SubmitTurnRequest = serde_json::from_str(r#"{"message":"oi"}"#).unwrap();
        assert!(c.conversation_id.is_none());
    }

    #[test]
    fn rendered_conversation_flags_unanswered_turn() {
        let mut conversation = Conversation::new("c1", "ana");
        conversation.messages.push(ChatMessage::user("**oi**"));
        let rendered = RenderedConversation::from(&conversation);
        assert!(rendered.awaiting_reply);
        assert!(rendered.messages[0].html.contains("<strong"));
    }

    #[test]
    fn empty_envelope_omits_data() {
        let body = serde_json::to_value(ApiResponse::empty()).unwrap();
        assert_eq!(body, serde_json::json!({ "success": true }));
    }
}
