use super::AppState;
use crate::auth::{ bearer_token, AuthUser };
use crate::error::ChatError;
use crate::models::api::{
    ApiResponse,
    HealthResponse,
    LoginRequest,
    LoginResponse,
    MeResponse,
    RenderedConversation,
    SubmitTurnRequest,
    TurnResponse,
};
use crate::models::chat::{ Conversation, ConversationSummary };

use axum::{
    extract::{ rejection::JsonRejection, ConnectInfo, Path, Request, State },
    http::{ header, HeaderValue, Method },
    middleware::{ self, Next },
    response::Response,
    routing::{ delete, get, post },
    Json,
    Router,
};
use chrono::Utc;
use log::{ info, warn };
use std::error::Error;
use std::net::SocketAddr;
use tower_http::cors::CorsLayer;

type ApiResult<T> = Result<Json<ApiResponse<T>>, ChatError>;

pub fn build_router(
    state: AppState,
    frontend_url: &str
) -> Result<Router, Box<dyn Error + Send + Sync>> {
    let origin = frontend_url
        .parse::<HeaderValue>()
        .map_err(|e| format!("Invalid FRONTEND_URL '{}': {}", frontend_url, e))?;

    let cors = CorsLayer::new()
        .allow_origin(origin)
        .allow_methods([Method::GET, Method::POST, Method::DELETE])
        .allow_headers([header::AUTHORIZATION, header::CONTENT_TYPE])
        .allow_credentials(true);

    let app = Router::new()
        .route("/api/chat/message", post(submit_message))
        .route("/api/chat/history", get(list_history))
        .route("/api/chat/conversations", get(list_summaries))
        .route("/api/chat/new", post(new_conversation))
        .route("/api/chat/{id}", delete(delete_conversation))
        .route("/api/chat/{id}/render", get(render_conversation))
        .route("/api/auth/login", post(login))
        .route("/api/auth/me", get(me))
        .route("/api/health", get(health))
        .layer(middleware::from_fn_with_state(state.clone(), rate_limit))
        .layer(middleware::from_fn(log_request))
        .layer(cors)
        .with_state(state);

    Ok(app)
}

async fn log_request(req: Request, next: Next) -> Response {
    info!("{} {}", req.method(), req.uri().path());
    next.run(req).await
}

/// Bucket a request is counted against: the authenticated user when the
/// bearer token verifies, otherwise the peer address.
pub fn rate_limit_key(state: &AppState, req: &Request) -> String {
    if let Some(claims) = bearer_token(req.headers()).and_then(|t| state.signer.verify(t).ok()) {
        return format!("user:{}", claims.sub);
    }
    match req.extensions().get::<ConnectInfo<SocketAddr>>() {
        Some(ConnectInfo(peer)) => format!("ip:{}", peer.ip()),
        None => "ip:unknown".to_string(),
    }
}

async fn rate_limit(
    State(state): State<AppState>,
    req: Request,
    next: Next
) -> Result<Response, ChatError> {
    let key = rate_limit_key(&state, &req);
    if state.limiter.check_key(&key).is_err() {
        warn!("Rate limit exceeded for {}", key);
        return Err(ChatError::RateLimited);
    }
    Ok(next.run(req).await)
}

fn json_body<T>(body: Result<Json<T>, JsonRejection>) -> Result<T, ChatError> {
    body.map(|Json(v)| v).map_err(|e| ChatError::Validation(e.body_text()))
}

async fn submit_message(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    body: Result<Json<SubmitTurnRequest>, JsonRejection>
) -> ApiResult<TurnResponse> {
    let req = json_body(body)?;
    let reply = state.coordinator.submit(&user, &req.message, req.conversation_id.as_deref()).await?;
    Ok(
        Json(
            ApiResponse::ok(TurnResponse {
                message: reply.reply_text,
                conversation_id: reply.conversation_id,
            })
        )
    )
}

async fn list_history(
    State(state): State<AppState>,
    AuthUser(user): AuthUser
) -> ApiResult<Vec<Conversation>> {
    let conversations = state.store().list_by_user(&user).await?;
    Ok(Json(ApiResponse::ok(conversations)))
}

async fn list_summaries(
    State(state): State<AppState>,
    AuthUser(user): AuthUser
) -> ApiResult<Vec<ConversationSummary>> {
    let summaries = state
        .store()
        .list_by_user(&user).await?
        .iter()
        .map(Conversation::summary)
        .collect();
    Ok(Json(ApiResponse::ok(summaries)))
}

async fn new_conversation(
    State(state): State<AppState>,
    AuthUser(user): AuthUser
) -> ApiResult<Conversation> {
    let conversation = state.store().start_new(&user).await?;
    info!("Started conversation {} for {}", conversation.id, user);
    Ok(Json(ApiResponse::ok(conversation)))
}

async fn delete_conversation(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Path(id): Path<String>
) -> ApiResult<()> {
    state.store().delete_owned(&id, &user).await?;
    info!("Deleted conversation {} for {}", id, user);
    Ok(Json(ApiResponse::empty()))
}

async fn render_conversation(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Path(id): Path<String>
) -> ApiResult<RenderedConversation> {
    let conversation = state.store().get_owned(&id, &user).await?;
    Ok(Json(ApiResponse::ok(RenderedConversation::from(&conversation))))
}

async fn login(
    State(state): State<AppState>,
    body: Result<Json<LoginRequest>, JsonRejection>
) -> ApiResult<LoginResponse> {
    let req = json_body(body)?;
    if req.username.trim().is_empty() || req.password.is_empty() {
        return Err(ChatError::Validation("username and password are required".to_string()));
    }
    if !state.credentials.check(&req.username, &req.password) {
        warn!("Failed login attempt for '{}'", req.username);
        return Err(ChatError::Auth("invalid credentials".to_string()));
    }

    let token = state.signer.issue(&req.username)?;
    info!("User {} logged in", req.username);
    Ok(
        Json(
            ApiResponse::ok(LoginResponse {
                token,
                user: req.username,
                expires_in: format!("{}h", state.signer.ttl_secs() / 3600),
            })
        )
    )
}

async fn me(AuthUser(user): AuthUser) -> ApiResult<MeResponse> {
    Ok(Json(ApiResponse::ok(MeResponse { user })))
}

async fn health(State(state): State<AppState>) -> Json<ApiResponse<HealthResponse>> {
    let store = match state.store().ping().await {
        Ok(()) => format!("{}: ok", state.store().backend_name()),
        Err(e) => {
            warn!("Health check: store unavailable: {}", e);
            format!("{}: unavailable", state.store().backend_name())
        }
    };
    Json(
        ApiResponse::ok(HealthResponse {
            api: "ok".to_string(),
            store,
            timestamp: Utc::now().to_rfc3339(),
        })
    )
}
