//! Provider implementations for docuchat.
//!
//! Currently a single backend: Google's Gemini API. The `Provider` trait in
//! `docuchat-core` keeps the rest of the system backend-agnostic.

pub mod gemini;

pub use gemini::GeminiProvider;

use async_trait::async_trait;
use docuchat_core::error::ProviderError;
use docuchat_core::provider::{GenerateRequest, Provider, StreamChunk};
use std::sync::Arc;

const MISSING_KEY_MSG: &str =
    "Gemini API key not found. Set GEMINI_API_KEY or add api_key to config.toml";

/// Build the configured provider.
///
/// A missing API key is not fatal: the returned provider fails each
/// AI-dependent call with [`ProviderError::NotConfigured`], so store-backed
/// operations keep working and callers surface the problem per request.
pub fn from_config(config: &docuchat_config::AppConfig) -> Arc<dyn Provider> {
    match config.api_key.clone() {
        Some(api_key) => Arc::new(GeminiProvider::new(api_key)),
        None => Arc::new(UnconfiguredProvider),
    }
}

/// Stand-in provider for deployments without an API key.
struct UnconfiguredProvider;

#[async_trait]
impl Provider for UnconfiguredProvider {
    fn name(&self) -> &str {
        "unconfigured"
    }

    async fn stream(
        &self,
        _request: GenerateRequest,
    ) -> std::result::Result<
        tokio::sync::mpsc::Receiver<std::result::Result<StreamChunk, ProviderError>>,
        ProviderError,
    > {
        Err(ProviderError::NotConfigured(MISSING_KEY_MSG.into()))
    }
}
