//! Shared LLM access layer.
//!
//! Wraps the generation backends (Ollama, OpenAI-compatible), the embedding
//! model and an HTTP cross-encoder behind one [`service_profiles::LlmServiceProfiles`]
//! handle. Generation is available as batch text or as a stream of text
//! fragments ([`stream::FragmentStream`]).

pub mod config;
pub mod error_handler;
pub mod health_service;
pub mod service_profiles;
pub mod services;
pub mod stream;
pub mod telemetry;

pub use error_handler::{AiLlmError, Result};
pub use stream::FragmentStream;
