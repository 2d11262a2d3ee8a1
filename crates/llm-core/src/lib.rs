//! llm-core: Shared library for talking to a local Ollama server
//!
//! Provides:
//! - Configuration loading (pilot.toml)
//! - Ollama chat client (non-streaming, deterministic decoding)

pub mod config;
pub mod ollama;

pub use config::Config;
pub use ollama::{
    ChatError, ChatMessage, ChatOptions, Model, OllamaClient, OllamaStatus, Role,
};
