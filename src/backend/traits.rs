//! Backend trait definitions.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::pin::Pin;

use crate::error::UpstreamError;

/// A completion service that can answer chat messages in one piece or as a
/// stream of fragments.
#[async_trait]
pub trait CompletionBackend: Send + Sync {
    /// Get the backend name for metrics/logging.
    fn name(&self) -> &'static str;

    /// Open a streaming completion.
    ///
    /// Returns once the upstream has accepted the request; failures after
    /// that point are yielded by the returned stream.
    async fn complete_streaming(
        &self,
        messages: Vec<CompletionMessage>,
        params: GenerationParams,
    ) -> Result<FragmentStream, UpstreamError>;

    /// Run a completion to the end and return the assembled message.
    async fn complete_once(
        &self,
        messages: Vec<CompletionMessage>,
        params: GenerationParams,
    ) -> Result<CompletionMessage, UpstreamError>;
}

/// Author of a chat message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

/// A role-tagged chat message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompletionMessage {
    pub role: Role,
    pub content: String,
}

impl CompletionMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

/// Generation parameters sent with every completion.
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationParams {
    pub model: String,
    pub temperature: f32,
    pub top_p: f32,
    pub max_tokens: u32,
}

/// One incremental piece of generated text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContentFragment {
    pub content: String,
}

impl ContentFragment {
    pub fn new(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.content.is_empty()
    }
}

/// Stream of fragments from a backend.
pub type FragmentStream = Box<dyn FragmentStreamTrait>;

/// Pull-based, single-pass fragment source. `None` means the upstream
/// finished normally.
pub trait FragmentStreamTrait: Send {
    /// Get the next fragment.
    #[allow(clippy::type_complexity)]
    fn next(
        &mut self,
    ) -> Pin<
        Box<
            dyn std::future::Future<Output = Option<Result<ContentFragment, UpstreamError>>>
                + Send
                + '_,
        >,
    >;
}

/// Vector-backed fragment stream for tests and the mock backend.
pub struct VecFragmentStream {
    items: std::vec::IntoIter<Result<ContentFragment, UpstreamError>>,
    delay: Option<std::time::Duration>,
}

impl VecFragmentStream {
    pub fn new(fragments: Vec<ContentFragment>, delay: Option<std::time::Duration>) -> Self {
        Self::from_results(fragments.into_iter().map(Ok).collect(), delay)
    }

    /// Build a stream that may yield errors at chosen positions.
    pub fn from_results(
        items: Vec<Result<ContentFragment, UpstreamError>>,
        delay: Option<std::time::Duration>,
    ) -> Self {
        Self {
            items: items.into_iter(),
            delay,
        }
    }
}

impl FragmentStreamTrait for VecFragmentStream {
    fn next(
        &mut self,
    ) -> Pin<
        Box<
            dyn std::future::Future<Output = Option<Result<ContentFragment, UpstreamError>>>
                + Send
                + '_,
        >,
    > {
        let delay = self.delay;
        let item = self.items.next();

        Box::pin(async move {
            if let Some(d) = delay {
                tokio::time::sleep(d).await;
            }
            item
        })
    }
}
