use crate::config::llm_provider::LlmProvider;

/// Configuration for an LLM model invocation.
///
/// # Fields
///
/// - `provider`: Which LLM provider/backend to use (e.g., Ollama, OpenAI).
/// - `model`: The model identifier (e.g., `"gpt-4o-mini"`, `"qwen3:14b"`).
/// - `endpoint`: Base URL of the inference server.
/// - `api_key`: Optional API key for providers that require authentication.
/// - `max_tokens`: Maximum number of tokens to generate (if supported).
/// - `temperature`: Controls randomness (0.0 = deterministic).
/// - `top_p`: Nucleus sampling cutoff.
/// - `timeout_secs`: Optional request timeout in seconds.
///
/// # Examples
///
/// ```
/// use ai_llm_service::config::llm_model_config::LlmModelConfig;
/// use ai_llm_service::config::llm_provider::LlmProvider;
///
/// let cfg = LlmModelConfig {
///     provider: LlmProvider::OpenAI,
///     model: "gpt-4o-mini".to_string(),
///     endpoint: "https://api.openai.com".to_string(),
///     api_key: Some("sk-...".to_string()),
///     max_tokens: Some(2048),
///     temperature: Some(0.2),
///     top_p: None,
///     timeout_secs: Some(30),
/// };
/// assert_eq!(cfg.provider, LlmProvider::OpenAI);
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct LlmModelConfig {
    /// The LLM provider/backend.
    pub provider: LlmProvider,

    /// Model identifier string.
    pub model: String,

    /// Inference endpoint (base URL).
    pub endpoint: String,

    /// Optional API key for authentication (e.g., OpenAI).
    pub api_key: Option<String>,

    /// Maximum number of tokens to generate.
    pub max_tokens: Option<u32>,

    /// Sampling temperature.
    pub temperature: Option<f32>,

    /// Nucleus sampling parameter.
    pub top_p: Option<f32>,

    /// Optional request timeout (in seconds).
    pub timeout_secs: Option<u64>,
}
