pub mod cross_encoder_service;
pub mod ollama_service;
pub mod open_ai_service;
