//! HTTP client for the chat API.
//!
//! The caller owns the session. Every call that needs authentication takes
//! `&mut SessionState`, and a 401 from the server drops the session back to
//! `Anonymous` before the error is returned.

use log::{ debug, warn };
use reqwest::{ Method, StatusCode };
use serde::de::DeserializeOwned;
use serde_json::{ json, Value };
use thiserror::Error;

use crate::models::api::{
    ApiResponse,
    HealthResponse,
    LoginResponse,
    MeResponse,
    RenderedConversationView,
    TurnResponse,
};
use crate::models::chat::{ Conversation, ConversationSummary };

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    pub token: String,
    pub user: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum SessionState {
    #[default]
    Anonymous,
    Established(Session),
}

impl SessionState {
    pub fn is_established(&self) -> bool {
        matches!(self, SessionState::Established(_))
    }

    pub fn user(&self) -> Option<&str> {
        match self {
            SessionState::Established(s) => Some(s.user.as_str()),
            SessionState::Anonymous => None,
        }
    }

    fn token(&self) -> Option<&str> {
        match self {
            SessionState::Established(s) => Some(s.token.as_str()),
            SessionState::Anonymous => None,
        }
    }

    pub fn clear(&mut self) {
        *self = SessionState::Anonymous;
    }
}

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("not logged in")]
    NotLoggedIn,

    #[error("unauthorized: {0}")]
    Unauthorized(String),

    #[error("server returned {status}: {message}")]
    Api {
        status: u16,
        message: String,
    },

    #[error("response had no data")]
    EmptyResponse,
}

pub struct ApiClient {
    http: reqwest::Client,
    base_url: String,
}

impl ApiClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self::with_client(reqwest::Client::new(), base_url)
    }

    pub fn with_client(http: reqwest::Client, base_url: impl Into<String>) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Self { http, base_url }
    }

    async fn call<T: DeserializeOwned>(
        &self,
        session: &mut SessionState,
        method: Method,
        path: &str,
        body: Option<Value>,
        authenticated: bool
    ) -> Result<ApiResponse<T>, ClientError> {
        let url = format!("{}{}", self.base_url, path);
        debug!("{} {}", method, url);

        let mut request = self.http.request(method, &url);
        if authenticated {
            let token = session.token().ok_or(ClientError::NotLoggedIn)?;
            request = request.bearer_auth(token);
        }
        if let Some(body) = body {
            request = request.json(&body);
        }

        let response = request.send().await?;
        let status = response.status();
        if status.is_success() {
            return Ok(response.json::<ApiResponse<T>>().await?);
        }

        let message = response
            .json::<ApiResponse<Value>>().await
            .ok()
            .and_then(|r| r.error)
            .unwrap_or_else(|| status.to_string());

        if status == StatusCode::UNAUTHORIZED {
            if session.is_established() {
                warn!("Session rejected by server, logging out: {}", message);
            }
            session.clear();
            return Err(ClientError::Unauthorized(message));
        }
        Err(ClientError::Api { status: status.as_u16(), message })
    }

    async fn data<T: DeserializeOwned>(
        &self,
        session: &mut SessionState,
        method: Method,
        path: &str,
        body: Option<Value>
    ) -> Result<T, ClientError> {
        self.call(session, method, path, body, true).await?.data.ok_or(ClientError::EmptyResponse)
    }

    /// Logs in and replaces whatever session was held before.
    pub async fn login(
        &self,
        session: &mut SessionState,
        username: &str,
        password: &str
    ) -> Result<(), ClientError> {
        let body = json!({ "username": username, "password": password });
        let login: LoginResponse = self
            .call(session, Method::POST, "/api/auth/login", Some(body), false).await?
            .data.ok_or(ClientError::EmptyResponse)?;
        *session = SessionState::Established(Session { token: login.token, user: login.user });
        Ok(())
    }

    pub fn logout(&self, session: &mut SessionState) {
        session.clear();
    }

    pub async fn me(&self, session: &mut SessionState) -> Result<String, ClientError> {
        let me: MeResponse = self.data(session, Method::GET, "/api/auth/me", None).await?;
        Ok(me.user)
    }

    pub async fn send_message(
        &self,
        session: &mut SessionState,
        message: &str,
        conversation_id: Option<&str>
    ) -> Result<TurnResponse, ClientError> {
        let body = json!({ "message": message, "conversation_id": conversation_id });
        self.data(session, Method::POST, "/api/chat/message", Some(body)).await
    }

    pub async fn history(&self, session: &mut SessionState) -> Result<Vec<Conversation>, ClientError> {
        self.data(session, Method::GET, "/api/chat/history", None).await
    }

    pub async fn summaries(
        &self,
        session: &mut SessionState
    ) -> Result<Vec<ConversationSummary>, ClientError> {
        self.data(session, Method::GET, "/api/chat/conversations", None).await
    }

    pub async fn new_conversation(&self, session: &mut SessionState) -> Result<Conversation, ClientError> {
        self.data(session, Method::POST, "/api/chat/new", None).await
    }

    pub async fn delete_conversation(
        &self,
        session: &mut SessionState,
        conversation_id: &str
    ) -> Result<(), ClientError> {
        let path = format!("/api/chat/{}", conversation_id);
        self.call::<Value>(session, Method::DELETE, &path, None, true).await?;
        Ok(())
    }

    pub async fn render(
        &self,
        session: &mut SessionState,
        conversation_id: &str
    ) -> Result<RenderedConversationView, ClientError> {
        let path = format!("/api/chat/{}/render", conversation_id);
        self.data(session, Method::GET, &path, None).await
    }

    pub async fn health(&self) -> Result<HealthResponse, ClientError> {
        let mut anonymous = SessionState::Anonymous;
        self
            .call(&mut anonymous, Method::GET, "/api/health", None, false).await?
            .data.ok_or(ClientError::EmptyResponse)
    }
}
