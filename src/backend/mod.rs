//! Upstream completion backends.

mod client;
mod mock;
mod openai;
mod traits;

pub use client::build_http_client;
pub use mock::MockBackend;
pub use openai::OpenAIBackend;
pub use traits::{
    CompletionBackend, CompletionMessage, ContentFragment, FragmentStream, FragmentStreamTrait,
    GenerationParams, Role, VecFragmentStream,
};

use std::sync::Arc;

use crate::config::UpstreamConfig;
use crate::error::UpstreamError;

/// Create a backend from configuration.
pub fn create_backend(config: &UpstreamConfig) -> Result<Arc<dyn CompletionBackend>, UpstreamError> {
    match config.provider.as_str() {
        "mock" => Ok(Arc::new(MockBackend::with_delay(config.mock_token_delay()))),
        "openai" => {
            if config.api_key.is_none() {
                // Not fatal: requests fail individually until a token is provided.
                tracing::warn!(
                    "No upstream access token configured. Set GITHUB_TOKEN or upstream.api_key"
                );
            }

            let client = build_http_client(
                config.connect_timeout(),
                config.pool_max_idle_per_host,
            )?;

            Ok(Arc::new(OpenAIBackend::new(
                client,
                config.api_key.clone(),
                config.api_base.clone(),
                config.request_timeout(),
            )))
        }
        other => Err(UpstreamError::Config(format!(
            "Unknown backend provider: {}. Available: mock, openai",
            other
        ))),
    }
}
