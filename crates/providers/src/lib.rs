//! Model adapters for skillrun.
//!
//! All providers implement the `skillrun_core::Provider` trait.
//! [`build_from_config`] picks the adapter selected by `llm_provider`.

pub mod openai_compat;

use std::sync::Arc;

use skillrun_config::AppConfig;
use skillrun_core::error::ConnectionError;
use skillrun_core::provider::{Provider, ProviderKind};

pub use openai_compat::{OpenAiCompatProvider, ThinkingOptions};

/// Build the provider selected by the configuration.
pub fn build_from_config(config: &AppConfig) -> Result<Arc<dyn Provider>, ConnectionError> {
    let kind = config
        .provider_kind()
        .map_err(|e| ConnectionError::NotConfigured(e.to_string()))?;
    let model = config.active_model();

    if model.api_key.is_empty() {
        tracing::warn!(provider = kind.as_str(), "No API key configured; requests will likely be rejected");
    }

    let provider = OpenAiCompatProvider::new(kind.as_str(), kind, &model.api_url, &model.api_key)?
        .with_thinking(ThinkingOptions {
            enable: kind == ProviderKind::Qwen && model.enable_thinking,
            budget: model.thinking_budget,
        });

    Ok(Arc::new(provider))
}
