/// HTTP cross-encoder used for (query, passage) scoring.
///
/// The server is expected to speak the common rerank shape:
/// `POST {endpoint}/rerank {"model","query","documents"}` →
/// `{"results":[{"index","relevance_score"}]}`.
#[derive(Debug, Clone, PartialEq)]
pub struct RerankModelConfig {
    /// Cross-encoder identifier, e.g. `cross-encoder/ms-marco-MiniLM-L-6-v2`.
    pub model: String,
    /// Base URL of the rerank server.
    pub endpoint: String,
    pub api_key: Option<String>,
    pub timeout_secs: Option<u64>,
}
