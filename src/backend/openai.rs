//! OpenAI-compatible completion backend.
//!
//! Talks to any service exposing the Chat Completions API, such as the
//! GitHub Models endpoint the relay uses by default.

use async_trait::async_trait;
use futures::StreamExt;
use reqwest::Client;
use reqwest_eventsource::retry::Never;
use reqwest_eventsource::{Error as EventSourceError, Event, EventSource};
use serde::{Deserialize, Serialize};
use std::pin::Pin;
use std::time::Duration;

use super::traits::{
    CompletionBackend, CompletionMessage, ContentFragment, FragmentStream, FragmentStreamTrait,
    GenerationParams,
};
use crate::error::UpstreamError;

/// OpenAI-compatible backend.
pub struct OpenAIBackend {
    client: Client,
    api_key: Option<String>,
    api_base: String,
    request_timeout: Duration,
}

impl OpenAIBackend {
    /// Create a new backend around a shared HTTP client.
    ///
    /// A missing `api_key` is accepted here; every call then fails with
    /// [`UpstreamError::MissingCredential`].
    pub fn new(
        client: Client,
        api_key: Option<String>,
        api_base: impl Into<String>,
        request_timeout: Duration,
    ) -> Self {
        let api_base = api_base.into().trim_end_matches('/').to_string();
        Self {
            client,
            api_key,
            api_base,
            request_timeout,
        }
    }

    fn completions_url(&self) -> String {
        format!("{}/chat/completions", self.api_base)
    }

    fn api_key(&self) -> Result<&str, UpstreamError> {
        self.api_key
            .as_deref()
            .filter(|key| !key.is_empty())
            .ok_or(UpstreamError::MissingCredential)
    }
}

#[async_trait]
impl CompletionBackend for OpenAIBackend {
    fn name(&self) -> &'static str {
        "openai"
    }

    async fn complete_streaming(
        &self,
        messages: Vec<CompletionMessage>,
        params: GenerationParams,
    ) -> Result<FragmentStream, UpstreamError> {
        let api_key = self.api_key()?;
        let body = ChatRequest::new(&messages, &params, true);

        let req = self
            .client
            .post(self.completions_url())
            .bearer_auth(api_key)
            .json(&body);

        let mut es =
            EventSource::new(req).map_err(|e| UpstreamError::Connection(e.to_string()))?;
        es.set_retry_policy(Box::new(Never));

        // The request is only sent on first poll; wait for the open event so
        // connection and status failures are reported here.
        let mut pending = None;
        match es.next().await {
            Some(Ok(Event::Open)) => {}
            Some(Ok(Event::Message(msg))) => pending = Some(msg.data),
            Some(Err(e)) => {
                es.close();
                return Err(establish_error(e).await);
            }
            None => {
                return Err(UpstreamError::Stream(
                    "stream closed before opening".to_string(),
                ))
            }
        }

        tracing::debug!(model = %params.model, "Upstream stream opened");

        Ok(Box::new(OpenAIFragmentStream {
            es,
            pending,
            finished: false,
        }))
    }

    async fn complete_once(
        &self,
        messages: Vec<CompletionMessage>,
        params: GenerationParams,
    ) -> Result<CompletionMessage, UpstreamError> {
        let api_key = self.api_key()?;
        let body = ChatRequest::new(&messages, &params, false);

        let response = self
            .client
            .post(self.completions_url())
            .bearer_auth(api_key)
            .timeout(self.request_timeout)
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(UpstreamError::Api {
                status: status.as_u16(),
                message,
            });
        }

        let completion: ChatCompletion = response
            .json()
            .await
            .map_err(|e| UpstreamError::Parse(e.to_string()))?;

        let choice = completion
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| UpstreamError::Parse("response contained no choices".to_string()))?;

        Ok(CompletionMessage::assistant(
            choice.message.content.unwrap_or_default(),
        ))
    }
}

/// Convert a failure seen while opening the event source.
async fn establish_error(e: EventSourceError) -> UpstreamError {
    match e {
        EventSourceError::InvalidStatusCode(status, response) => UpstreamError::Api {
            status: status.as_u16(),
            message: response.text().await.unwrap_or_default(),
        },
        EventSourceError::Transport(e) => UpstreamError::from(e),
        EventSourceError::InvalidContentType(content_type, _) => UpstreamError::Stream(format!(
            "unexpected content type: {:?}",
            content_type
        )),
        EventSourceError::StreamEnded => {
            UpstreamError::Stream("stream closed before opening".to_string())
        }
        other => UpstreamError::Stream(other.to_string()),
    }
}

/// Fragment stream over an upstream SSE connection.
struct OpenAIFragmentStream {
    es: EventSource,
    /// Message received before the open event, replayed on first pull.
    pending: Option<String>,
    finished: bool,
}

impl OpenAIFragmentStream {
    fn finish(&mut self) {
        self.finished = true;
        self.es.close();
    }

    fn parse_data(&mut self, data: &str) -> Option<Result<ContentFragment, UpstreamError>> {
        if data == "[DONE]" {
            self.finish();
            return None;
        }

        match serde_json::from_str::<ChatChunk>(data) {
            Ok(chunk) => {
                let content = chunk
                    .choices
                    .into_iter()
                    .next()
                    .and_then(|choice| choice.delta.content)
                    .unwrap_or_default();
                Some(Ok(ContentFragment::new(content)))
            }
            Err(e) => {
                self.finish();
                Some(Err(UpstreamError::Parse(format!(
                    "Failed to parse chunk: {}",
                    e
                ))))
            }
        }
    }
}

impl FragmentStreamTrait for OpenAIFragmentStream {
    fn next(
        &mut self,
    ) -> Pin<
        Box<
            dyn std::future::Future<Output = Option<Result<ContentFragment, UpstreamError>>>
                + Send
                + '_,
        >,
    > {
        Box::pin(async move {
            if self.finished {
                return None;
            }

            if let Some(data) = self.pending.take() {
                return self.parse_data(&data);
            }

            loop {
                match self.es.next().await {
                    Some(Ok(Event::Open)) => continue,
                    Some(Ok(Event::Message(msg))) => return self.parse_data(&msg.data),
                    // Upstream closed the body without a [DONE] marker.
                    Some(Err(EventSourceError::StreamEnded)) | None => {
                        self.finish();
                        return None;
                    }
                    Some(Err(e)) => {
                        self.finish();
                        let err = match e {
                            EventSourceError::Transport(e) => UpstreamError::from(e),
                            other => UpstreamError::Stream(other.to_string()),
                        };
                        return Some(Err(err));
                    }
                }
            }
        })
    }
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: &'a [CompletionMessage],
    temperature: f32,
    top_p: f32,
    max_tokens: u32,
    stream: bool,
}

impl<'a> ChatRequest<'a> {
    fn new(messages: &'a [CompletionMessage], params: &'a GenerationParams, stream: bool) -> Self {
        Self {
            model: &params.model,
            messages,
            temperature: params.temperature,
            top_p: params.top_p,
            max_tokens: params.max_tokens,
            stream,
        }
    }
}

#[derive(Debug, Deserialize)]
struct ChatCompletion {
    #[serde(default)]
    choices: Vec<CompletionChoice>,
}

#[derive(Debug, Deserialize)]
struct CompletionChoice {
    message: ChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChoiceMessage {
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChatChunk {
    #[serde(default)]
    choices: Vec<ChunkChoice>,
}

#[derive(Debug, Deserialize)]
struct ChunkChoice {
    #[serde(default)]
    delta: ChunkDelta,
}

#[derive(Debug, Default, Deserialize)]
struct ChunkDelta {
    content: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn params() -> GenerationParams {
        GenerationParams {
            model: "gpt-4o".to_string(),
            temperature: 1.0,
            top_p: 1.0,
            max_tokens: 1000,
        }
    }

    fn messages() -> Vec<CompletionMessage> {
        vec![
            CompletionMessage::system("You are a helpful assistant."),
            CompletionMessage::user("Hello"),
        ]
    }

    fn backend(server: &MockServer, api_key: Option<&str>) -> OpenAIBackend {
        OpenAIBackend::new(
            Client::new(),
            api_key.map(str::to_string),
            format!("{}/", server.uri()),
            Duration::from_secs(5),
        )
    }

    fn sse_response(body: &str) -> ResponseTemplate {
        ResponseTemplate::new(200).set_body_raw(body.to_string(), "text/event-stream")
    }

    async fn drain(mut stream: FragmentStream) -> Vec<Result<ContentFragment, UpstreamError>> {
        let mut items = Vec::new();
        while let Some(item) = stream.next().await {
            items.push(item);
        }
        items
    }

    #[tokio::test]
    async fn test_stream_yields_deltas_in_order() {
        let server = MockServer::start().await;
        let body = concat!(
            "data: {\"choices\":[]}\n\n",
            "data: {\"choices\":[{\"index\":0,\"delta\":{\"role\":\"assistant\"},\"finish_reason\":null}]}\n\n",
            "data: {\"choices\":[{\"index\":0,\"delta\":{\"content\":\"Hi\"},\"finish_reason\":null}]}\n\n",
            "data: {\"choices\":[{\"index\":0,\"delta\":{\"content\":\" there\"},\"finish_reason\":null}]}\n\n",
            "data: {\"choices\":[{\"index\":0,\"delta\":{},\"finish_reason\":\"stop\"}]}\n\n",
            "data: [DONE]\n\n",
        );

        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .and(header("authorization", "Bearer test-token"))
            .and(body_partial_json(json!({
                "model": "gpt-4o",
                "stream": true,
                "max_tokens": 1000,
                "messages": [
                    {"role": "system", "content": "You are a helpful assistant."},
                    {"role": "user", "content": "Hello"}
                ]
            })))
            .respond_with(sse_response(body))
            .expect(1)
            .mount(&server)
            .await;

        let stream = backend(&server, Some("test-token"))
            .complete_streaming(messages(), params())
            .await
            .unwrap();

        let contents: Vec<String> = drain(stream)
            .await
            .into_iter()
            .map(|item| item.unwrap().content)
            .collect();
        assert_eq!(contents, vec!["", "", "Hi", " there", ""]);
    }

    #[tokio::test]
    async fn test_stream_without_done_marker_ends_cleanly() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(sse_response(
                "data: {\"choices\":[{\"delta\":{\"content\":\"ok\"}}]}\n\n",
            ))
            .mount(&server)
            .await;

        let stream = backend(&server, Some("k"))
            .complete_streaming(messages(), params())
            .await
            .unwrap();

        let items = drain(stream).await;
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].as_ref().unwrap().content, "ok");
    }

    #[tokio::test]
    async fn test_stream_rejected_status_fails_to_establish() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(401).set_body_string("bad credentials"))
            .mount(&server)
            .await;

        let result = backend(&server, Some("wrong"))
            .complete_streaming(messages(), params())
            .await;

        match result {
            Err(UpstreamError::Api { status, message }) => {
                assert_eq!(status, 401);
                assert!(message.contains("bad credentials"));
            }
            Err(other) => panic!("unexpected error: {}", other),
            Ok(_) => panic!("expected establishment failure"),
        }
    }

    #[tokio::test]
    async fn test_stream_malformed_chunk_is_an_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(sse_response(concat!(
                "data: {\"choices\":[{\"delta\":{\"content\":\"a\"}}]}\n\n",
                "data: not-json\n\n",
                "data: {\"choices\":[{\"delta\":{\"content\":\"b\"}}]}\n\n",
            )))
            .mount(&server)
            .await;

        let stream = backend(&server, Some("k"))
            .complete_streaming(messages(), params())
            .await
            .unwrap();

        let items = drain(stream).await;
        assert_eq!(items.len(), 2);
        assert!(items[0].is_ok());
        assert!(matches!(items[1], Err(UpstreamError::Parse(_))));
    }

    #[tokio::test]
    async fn test_missing_credential() {
        let server = MockServer::start().await;
        let backend = backend(&server, None);

        assert!(matches!(
            backend.complete_streaming(messages(), params()).await,
            Err(UpstreamError::MissingCredential)
        ));
        assert!(matches!(
            backend.complete_once(messages(), params()).await,
            Err(UpstreamError::MissingCredential)
        ));
        assert!(server.received_requests().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_complete_once_returns_message() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .and(body_partial_json(json!({ "stream": false, "top_p": 1.0 })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "id": "chatcmpl-1",
                "choices": [{
                    "index": 0,
                    "message": { "role": "assistant", "content": "Hello, world!" },
                    "finish_reason": "stop"
                }]
            })))
            .mount(&server)
            .await;

        let reply = backend(&server, Some("k"))
            .complete_once(messages(), params())
            .await
            .unwrap();
        assert_eq!(reply, CompletionMessage::assistant("Hello, world!"));
    }

    #[tokio::test]
    async fn test_complete_once_without_choices() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "choices": [] })))
            .mount(&server)
            .await;

        let result = backend(&server, Some("k"))
            .complete_once(messages(), params())
            .await;
        assert!(matches!(result, Err(UpstreamError::Parse(_))));
    }

    #[tokio::test]
    async fn test_complete_once_server_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(503).set_body_string("overloaded"))
            .mount(&server)
            .await;

        let result = backend(&server, Some("k"))
            .complete_once(messages(), params())
            .await;
        assert!(matches!(result, Err(UpstreamError::Api { status: 503, .. })));
    }
}
