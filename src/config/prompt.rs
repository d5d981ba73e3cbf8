use serde::Deserialize;
use std::error::Error;
use std::fmt;
use std::fs;
use std::io::ErrorKind;
use std::sync::Arc;
use log::{ info, warn };

const DEFAULT_SYSTEM_PROMPT: &str =
    "You are Ambro, a data assistant. Answer in the user's language, concisely, \
using markdown for structure (headings, lists, tables) when it helps.";

const DEFAULT_CHART_INSTRUCTIONS: &str =
    "When a visualization helps, emit a fenced block tagged `chart` whose body is a JSON object: \
{\"type\": \"bar\"|\"line\"|\"pie\"|\"doughnut\"|\"horizontalBar\", \"title\": string (optional), \
\"labels\": [string], \"datasets\": [{\"label\": string, \"data\": [number], \"color\": string (optional)}], \
\"options\": {\"currency\": bool, \"percentage\": bool, \"stacked\": bool, \"showLegend\": bool} (optional)}. \
Every dataset must have exactly one value per label.";

#[derive(Debug)]
pub enum PromptError {
    TemplateNotFound(String),
    IoError(std::io::Error),
    JsonError(serde_json::Error),
}

impl fmt::Display for PromptError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PromptError::TemplateNotFound(key) => write!(f, "Prompt template '{}' is empty", key),
            PromptError::IoError(e) => write!(f, "Prompt file IO error: {}", e),
            PromptError::JsonError(e) => write!(f, "Prompt JSON parsing error: {}", e),
        }
    }
}

impl Error for PromptError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            PromptError::IoError(e) => Some(e),
            PromptError::JsonError(e) => Some(e),
            _ => None,
        }
    }
}

impl From<std::io::Error> for PromptError {
    fn from(err: std::io::Error) -> Self {
        PromptError::IoError(err)
    }
}

impl From<serde_json::Error> for PromptError {
    fn from(err: serde_json::Error) -> Self {
        PromptError::JsonError(err)
    }
}

#[derive(Deserialize, Debug, Clone, PartialEq)]
pub struct PromptConfig {
    #[serde(default = "default_system_prompt")]
    pub system_prompt: String,
    #[serde(default = "default_chart_instructions")]
    pub chart_instructions: String,
}

fn default_system_prompt() -> String {
    DEFAULT_SYSTEM_PROMPT.to_string()
}

fn default_chart_instructions() -> String {
    DEFAULT_CHART_INSTRUCTIONS.to_string()
}

impl Default for PromptConfig {
    fn default() -> Self {
        Self {
            system_prompt: default_system_prompt(),
            chart_instructions: default_chart_instructions(),
        }
    }
}

impl PromptConfig {
    fn validate(&self) -> Result<(), PromptError> {
        if self.system_prompt.trim().is_empty() {
            return Err(PromptError::TemplateNotFound("system_prompt".to_string()));
        }
        Ok(())
    }

    /// System prompt followed by the chart payload contract.
    pub fn preamble(&self) -> String {
        if self.chart_instructions.trim().is_empty() {
            return self.system_prompt.clone();
        }
        format!("{}\n\n{}", self.system_prompt, self.chart_instructions)
    }
}

pub fn load_prompts_from_str(raw: &str) -> Result<PromptConfig, PromptError> {
    let config: PromptConfig = serde_json::from_str(raw)?;
    config.validate()?;
    Ok(config)
}

/// Loads the prompt file, falling back to the built-in prompts when it does
/// not exist. A file that exists but fails to parse is an error.
pub fn load_prompts(path: &str) -> Result<Arc<PromptConfig>, PromptError> {
    match fs::read_to_string(path) {
        Ok(content) => {
            let config = load_prompts_from_str(&content)?;
            info!("Loaded prompts from '{}'", path);
            Ok(Arc::new(config))
        }
        Err(e) if e.kind() == ErrorKind::NotFound => {
            warn!("Prompts file '{}' not found, using built-in prompts", path);
            Ok(Arc::new(PromptConfig::default()))
        }
        Err(e) => Err(PromptError::IoError(e)),
    }
}
