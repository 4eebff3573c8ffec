//! Ollama provider implementation (local models)
//!
//! This module provides text generation against a local Ollama server.

pub mod client;
pub mod generation;
pub mod types;

pub use client::OllamaClient;
pub use generation::OllamaGenerationGateway;

pub(crate) const PROVIDER: &str = "ollama";
