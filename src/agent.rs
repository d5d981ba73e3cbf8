use crate::cli::Args;
use crate::config::prompt::{ self, PromptConfig };
use crate::history::format_history_for_prompt;
use crate::llm::LlmConfig;
use crate::llm::chat::{ ChatClient, new_client as new_chat_client };
use crate::models::chat::ChatMessage;

use async_trait::async_trait;
use log::info;
use std::error::Error;
use std::sync::Arc;

/// The external text-generation collaborator.
///
/// `history` is the whole conversation log, ending with the user turn being
/// answered.
#[async_trait]
pub trait Agent: Send + Sync {
    async fn generate(&self, history: &[ChatMessage]) -> Result<String, Box<dyn Error + Send + Sync>>;
}

/// Agent backed by a chat completion provider.
pub struct LlmAgent {
    chat_client: Arc<dyn ChatClient>,
    prompt_config: Arc<PromptConfig>,
}

impl LlmAgent {
    pub fn new(chat_client: Arc<dyn ChatClient>, prompt_config: Arc<PromptConfig>) -> Self {
        Self { chat_client, prompt_config }
    }

    pub fn from_args(args: &Args) -> Result<Self, Box<dyn Error + Send + Sync>> {
        let chat_api_key = if !args.chat_api_key.is_empty() {
            Some(args.chat_api_key.clone())
        } else {
            None
        };
        let chat_config = LlmConfig {
            llm_type: args.chat_llm_type
                .parse()
                .map_err(|e| format!("Invalid chat LLM type: {}", e))?,
            base_url: args.chat_base_url.clone(),
            api_key: chat_api_key,
            completion_model: args.chat_model.clone(),
        };
        let chat_client = new_chat_client(&chat_config)?;
        info!(
            "Chat client configured: Type={}, Model={}, BaseURL={:?}",
            args.chat_llm_type,
            chat_client.get_model(),
            chat_client.get_base_url()
        );

        let prompt_config = prompt::load_prompts(&args.prompts_path)?;
        Ok(Self::new(chat_client, prompt_config))
    }

    pub fn build_prompt(&self, history: &[ChatMessage]) -> String {
        let (latest, prior) = match history.split_last() {
            Some((latest, prior)) => (latest.content.as_str(), prior),
            None => ("", history),
        };
        let history_str = format_history_for_prompt(prior);
        let preamble = self.prompt_config.preamble();
        if history_str.is_empty() {
            format!("{}\n\nUser: {}", preamble, latest)
        } else {
            format!("{}\n\n{}\nUser: {}", preamble, history_str, latest)
        }
    }
}

#[async_trait]
impl Agent for LlmAgent {
    async fn generate(&self, history: &[ChatMessage]) -> Result<String, Box<dyn Error + Send + Sync>> {
        let prompt = self.build_prompt(history);
        let resp = self.chat_client.complete(&prompt).await?;
        Ok(resp.response)
    }
}
