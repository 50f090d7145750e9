//! Mock backend for local runs and demos.
//!
//! Simulates a completion service by echoing the prompt back word-by-word.

use async_trait::async_trait;
use std::time::Duration;

use super::traits::{
    CompletionBackend, CompletionMessage, ContentFragment, FragmentStream, GenerationParams, Role,
    VecFragmentStream,
};
use crate::error::UpstreamError;

/// Mock backend that simulates streaming completions.
pub struct MockBackend {
    /// Delay between words.
    token_delay: Duration,
}

impl MockBackend {
    /// Create a new mock backend.
    pub fn new() -> Self {
        Self {
            token_delay: Duration::from_millis(50),
        }
    }

    /// Create with custom token delay.
    pub fn with_delay(token_delay: Duration) -> Self {
        Self { token_delay }
    }

    fn reply_for(messages: &[CompletionMessage]) -> String {
        let prompt = messages
            .iter()
            .rev()
            .find(|m| m.role == Role::User)
            .map(|m| m.content.as_str())
            .unwrap_or_default();

        let preview: String = prompt.chars().take(100).collect();
        let ellipsis = if prompt.chars().count() > 100 { "..." } else { "" };

        format!(
            "Hello! You said: \"{}{}\". This reply comes from the mock backend; \
             set the upstream provider to openai to talk to a real model.",
            preview, ellipsis
        )
    }
}

impl Default for MockBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CompletionBackend for MockBackend {
    fn name(&self) -> &'static str {
        "mock"
    }

    async fn complete_streaming(
        &self,
        messages: Vec<CompletionMessage>,
        _params: GenerationParams,
    ) -> Result<FragmentStream, UpstreamError> {
        let reply = Self::reply_for(&messages);

        let fragments = reply
            .split_whitespace()
            .enumerate()
            .map(|(i, word)| {
                if i == 0 {
                    ContentFragment::new(word)
                } else {
                    ContentFragment::new(format!(" {}", word))
                }
            })
            .collect();

        Ok(Box::new(VecFragmentStream::new(
            fragments,
            Some(self.token_delay),
        )))
    }

    async fn complete_once(
        &self,
        messages: Vec<CompletionMessage>,
        _params: GenerationParams,
    ) -> Result<CompletionMessage, UpstreamError> {
        Ok(CompletionMessage::assistant(Self::reply_for(&messages)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params() -> GenerationParams {
        GenerationParams {
            model: "mock".to_string(),
            temperature: 1.0,
            top_p: 1.0,
            max_tokens: 16,
        }
    }

    #[tokio::test]
    async fn test_mock_stream_matches_once() {
        let backend = MockBackend::with_delay(Duration::from_millis(1));
        let messages = vec![
            CompletionMessage::system("sys"),
            CompletionMessage::user("test prompt"),
        ];

        let mut stream = backend
            .complete_streaming(messages.clone(), params())
            .await
            .unwrap();

        let mut streamed = String::new();
        while let Some(fragment) = stream.next().await {
            streamed.push_str(&fragment.unwrap().content);
        }

        let once = backend.complete_once(messages, params()).await.unwrap();
        assert_eq!(once.role, Role::Assistant);
        assert!(streamed.contains("test prompt"));
        assert_eq!(streamed, once.content);
    }
}
