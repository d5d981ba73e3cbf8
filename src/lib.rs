pub mod agent;
pub mod auth;
pub mod capture;
pub mod chart;
pub mod cli;
pub mod client;
pub mod config;
pub mod error;
pub mod history;
pub mod llm;
pub mod models;
pub mod render;
pub mod server;
pub mod turn;

use agent::LlmAgent;
use cli::Args;
use log::info;
use server::Server;
use std::error::Error;
use std::sync::Arc;
use std::time::Duration;
use turn::TurnCoordinator;

pub async fn run(args: Args) -> Result<(), Box<dyn Error + Send + Sync>> {
    args.validate()?;

    info!("--- Core Configuration ---");
    info!("Server Address: {}", args.server_addr);
    info!("Chat LLM Type: {}", args.chat_llm_type);
    info!("History Store Type: {}", args.history_type);
    info!("History Store Host: {}", args.history_host);
    info!("Prompts Path: {}", args.prompts_path);
    info!("Agent Timeout: {}s", args.agent_timeout_secs);
    info!("Allowed Origin: {}", args.frontend_url);
    info!("Rate Limit: {}/min", args.rate_limit_per_minute);
    info!("TLS Enabled: {}", args.enable_tls);
    info!("-------------------------");

    let store = history::initialize_history_store(&args)?;
    let agent = Arc::new(LlmAgent::from_args(&args)?);
    let coordinator = Arc::new(
        TurnCoordinator::new(store, agent, Duration::from_secs(args.agent_timeout_secs))
    );

    let addr = args.server_addr.clone();
    info!("Starting server on: {}", addr);
    let server = Server::new(addr, coordinator, args);
    server.run().await?;

    Ok(())
}
