use clap::Parser;

#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    // --- History Store Args ---
    /// Conversation store type (redis, memory)
    #[arg(long, env = "HISTORY_TYPE", default_value = "redis")]
    pub history_type: String,

    /// Conversation store host endpoint (e.g., redis://127.0.0.1:6379)
    #[arg(long, env = "HISTORY_HOST", default_value = "redis://127.0.0.1:6379")]
    pub history_host: String,

    /// Prefix for Redis conversation keys.
    #[arg(long, env = "HISTORY_REDIS_PREFIX", default_value = "ambro:")]
    pub history_redis_prefix: String,

    // --- Chat LLM Provider Args ---
    /// Type of LLM provider for chat completion (ollama, openai, gemini)
    #[arg(long, env = "CHAT_LLM_TYPE", default_value = "gemini")]
    pub chat_llm_type: String,

    /// Base URL for the Chat LLM provider API (e.g., http://localhost:11434 for Ollama)
    #[arg(long, env = "CHAT_BASE_URL")] // No default, let adapters handle defaults if None
    pub chat_base_url: Option<String>,

    /// API Key for the Chat LLM provider (e.g., OpenAI, Gemini)
    #[arg(long, env = "CHAT_API_KEY", default_value = "")]
    pub chat_api_key: String,

    /// Model name for chat completion (e.g., gpt-4o, llama3, gemini-1.5-flash-latest)
    #[arg(long, env = "CHAT_MODEL")] // No default, rely on adapter defaults if None
    pub chat_model: Option<String>,

    /// Seconds to wait for the agent before the turn fails.
    #[arg(long, env = "AGENT_TIMEOUT_SECS", default_value = "60")]
    pub agent_timeout_secs: u64,

    /// Path to the prompt configuration file.
    #[arg(long, env = "PROMPTS_PATH", default_value = "json/prompts.json")]
    pub prompts_path: String,

    // --- Auth Args ---
    /// Secret used to sign bearer tokens. Must be at least 32 characters.
    #[arg(long, env = "JWT_SECRET")]
    pub jwt_secret: String,

    /// The single account allowed to log in.
    #[arg(long, env = "AUTH_USER")]
    pub auth_user: String,

    /// Hex-encoded SHA-256 digest of the account password.
    #[arg(long, env = "AUTH_PASSWORD_SHA256")]
    pub auth_password_sha256: String,

    /// Lifetime of issued tokens in hours.
    #[arg(long, env = "TOKEN_TTL_HOURS", default_value = "24")]
    pub token_ttl_hours: i64,

    // --- Server Args ---
    /// Host address and port for the HTTP API to listen on.
    #[arg(long, env = "SERVER_ADDR", default_value = "0.0.0.0:3001")]
    pub server_addr: String,

    /// Allowed CORS origin for the web client.
    #[arg(long, env = "FRONTEND_URL", default_value = "http://localhost:5173")]
    pub frontend_url: String,

    /// Requests accepted per minute across all clients.
    #[arg(long, env = "RATE_LIMIT_PER_MINUTE", default_value = "100")]
    pub rate_limit_per_minute: u32,

    /// Optional path to the TLS certificate file (PEM format). Requires --tls-key-path.
    #[arg(long, env = "TLS_CERT_PATH")]
    pub tls_cert_path: Option<String>,

    /// Optional path to the TLS private key file (PEM format). Requires --tls-cert-path.
    #[arg(long, env = "TLS_KEY_PATH")]
    pub tls_key_path: Option<String>,

    #[arg(long, env = "ENABLE_TLS", default_value = "false")]
    pub enable_tls: bool,
}

impl Args {
    pub fn validate(&self) -> Result<(), String> {
        if self.jwt_secret.len() < 32 {
            return Err("JWT_SECRET must be at least 32 characters".to_string());
        }
        if self.auth_user.trim().is_empty() {
            return Err("AUTH_USER must not be empty".to_string());
        }
        if self.auth_password_sha256.len() != 64 || hex::decode(&self.auth_password_sha256).is_err() {
            return Err("AUTH_PASSWORD_SHA256 must be a hex-encoded SHA-256 digest".to_string());
        }
        if self.token_ttl_hours <= 0 {
            return Err("TOKEN_TTL_HOURS must be positive".to_string());
        }
        if self.agent_timeout_secs == 0 {
            return Err("AGENT_TIMEOUT_SECS must be positive".to_string());
        }
        if self.rate_limit_per_minute == 0 {
            return Err("RATE_LIMIT_PER_MINUTE must be positive".to_string());
        }
        if self.enable_tls && (self.tls_cert_path.is_none() || self.tls_key_path.is_none()) {
            return Err("ENABLE_TLS requires both TLS_CERT_PATH and TLS_KEY_PATH".to_string());
        }
        Ok(())
    }
}
