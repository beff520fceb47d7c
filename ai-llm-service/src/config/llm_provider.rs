use std::str::FromStr;

use crate::error_handler::ConfigError;

/// Represents the provider (backend) used for large language model (LLM) inference.
///
/// # Examples
///
/// ```
/// use ai_llm_service::config::llm_provider::LlmProvider;
///
/// let p: LlmProvider = "ollama".parse().unwrap();
/// assert_eq!(p, LlmProvider::Ollama);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LlmProvider {
    /// Local Ollama runtime for on-device inference.
    Ollama,
    /// OpenAI-compatible chat/embeddings API.
    OpenAI,
}

impl FromStr for LlmProvider {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "ollama" => Ok(LlmProvider::Ollama),
            "openai" | "chatgpt" => Ok(LlmProvider::OpenAI),
            other => Err(ConfigError::UnsupportedProvider(other.to_string())),
        }
    }
}
