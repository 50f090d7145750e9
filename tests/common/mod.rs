//! Shared helpers for router-level tests.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::path::Path;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use axum::body::Body;
use axum::http::Request;
use axum::response::Response;
use axum::Router;
use http_body_util::BodyExt;
use serde_json::Value;

use chat_relay::backend::{
    CompletionBackend, CompletionMessage, ContentFragment, FragmentStream, FragmentStreamTrait,
    GenerationParams,
};
use chat_relay::config::{RelayConfig, UpstreamConfig};
use chat_relay::error::UpstreamError;
use chat_relay::server::{create_router, AppState};
use chat_relay::shutdown::ShutdownCoordinator;
use chat_relay::streaming::{ChatRelay, RelaySettings};

pub const ERROR_FRAME: &str = "data: {\"error\":\"An error occurred\"}\n\n";
pub const DONE_FRAME: &str = "data: [DONE]\n\n";

/// One scripted upstream event.
#[derive(Debug, Clone)]
pub enum Step {
    Fragment(String),
    Error(String),
    /// Never produce anything again.
    Stall,
}

pub fn fragments(parts: &[&str]) -> Vec<Step> {
    parts.iter().map(|p| Step::Fragment(p.to_string())).collect()
}

#[derive(Debug, Clone)]
enum OpenBehavior {
    Steps(Vec<Step>),
    Fail,
    Stall,
}

/// Backend with scripted behavior that records what it was asked.
pub struct FakeBackend {
    open: OpenBehavior,
    reply: Result<String, String>,
    pub calls: AtomicUsize,
    pub seen: Mutex<Vec<(Vec<CompletionMessage>, GenerationParams)>>,
    /// Set once the fragment stream handed out has been dropped.
    pub released: Arc<AtomicBool>,
}

impl FakeBackend {
    fn build(open: OpenBehavior, reply: Result<String, String>) -> Self {
        Self {
            open,
            reply,
            calls: AtomicUsize::new(0),
            seen: Mutex::new(Vec::new()),
            released: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn streaming(parts: &[&str]) -> Self {
        Self::with_steps(fragments(parts))
    }

    pub fn with_steps(steps: Vec<Step>) -> Self {
        Self::build(OpenBehavior::Steps(steps), Err("not scripted".to_string()))
    }

    /// Fails to establish the stream (e.g. bad credential).
    pub fn failing() -> Self {
        Self::build(OpenBehavior::Fail, Err("unauthorized".to_string()))
    }

    /// Never answers the stream request.
    pub fn stalled() -> Self {
        Self::build(OpenBehavior::Stall, Err("not scripted".to_string()))
    }

    pub fn replying(reply: &str) -> Self {
        Self::build(OpenBehavior::Fail, Ok(reply.to_string()))
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn is_released(&self) -> bool {
        self.released.load(Ordering::SeqCst)
    }

    fn record(&self, messages: Vec<CompletionMessage>, params: GenerationParams) {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.seen.lock().unwrap().push((messages, params));
    }
}

#[async_trait]
impl CompletionBackend for FakeBackend {
    fn name(&self) -> &'static str {
        "fake"
    }

    async fn complete_streaming(
        &self,
        messages: Vec<CompletionMessage>,
        params: GenerationParams,
    ) -> Result<FragmentStream, UpstreamError> {
        self.record(messages, params);
        match &self.open {
            OpenBehavior::Steps(steps) => Ok(Box::new(ScriptedStream {
                steps: steps.iter().cloned().collect(),
                released: self.released.clone(),
            })),
            OpenBehavior::Fail => Err(UpstreamError::Api {
                status: 401,
                message: "Bad credentials".to_string(),
            }),
            OpenBehavior::Stall => std::future::pending().await,
        }
    }

    async fn complete_once(
        &self,
        messages: Vec<CompletionMessage>,
        params: GenerationParams,
    ) -> Result<CompletionMessage, UpstreamError> {
        self.record(messages, params);
        match &self.reply {
            Ok(reply) => Ok(CompletionMessage::assistant(reply.as_str())),
            Err(message) => Err(UpstreamError::Connection(message.clone())),
        }
    }
}

struct ScriptedStream {
    steps: VecDeque<Step>,
    released: Arc<AtomicBool>,
}

impl FragmentStreamTrait for ScriptedStream {
    fn next(
        &mut self,
    ) -> Pin<
        Box<
            dyn std::future::Future<Output = Option<Result<ContentFragment, UpstreamError>>>
                + Send
                + '_,
        >,
    > {
        let step = self.steps.pop_front();
        Box::pin(async move {
            match step {
                None => None,
                Some(Step::Fragment(content)) => Some(Ok(ContentFragment::new(content))),
                Some(Step::Error(message)) => Some(Err(UpstreamError::Stream(message))),
                Some(Step::Stall) => std::future::pending().await,
            }
        })
    }
}

impl Drop for ScriptedStream {
    fn drop(&mut self) {
        self.released.store(true, Ordering::SeqCst);
    }
}

pub fn default_settings() -> RelaySettings {
    RelaySettings::from_config(&RelayConfig::default(), &UpstreamConfig::default())
}

/// Test application around `backend`.
pub struct TestApp {
    pub router: Router,
    pub shutdown: ShutdownCoordinator,
}

pub fn test_app(backend: Arc<dyn CompletionBackend>) -> TestApp {
    test_app_with(backend, default_settings(), "public")
}

pub fn test_app_with(
    backend: Arc<dyn CompletionBackend>,
    settings: RelaySettings,
    static_dir: impl AsRef<Path>,
) -> TestApp {
    let shutdown = ShutdownCoordinator::new();
    let relay = ChatRelay::new(backend, settings);
    let router = create_router(AppState::new(relay, shutdown.clone()), static_dir);
    TestApp { router, shutdown }
}

pub fn short_idle_settings() -> RelaySettings {
    RelaySettings {
        idle_timeout: Duration::from_millis(100),
        ..default_settings()
    }
}

pub fn json_request(uri: &str, body: Value) -> Request<Body> {
    raw_request(uri, serde_json::to_string(&body).unwrap())
}

pub fn raw_request(uri: &str, body: impl Into<Body>) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .body(body.into())
        .unwrap()
}

pub async fn body_text(resp: Response) -> String {
    let body = resp.into_body().collect().await.unwrap().to_bytes();
    String::from_utf8(body.to_vec()).unwrap()
}

pub async fn body_json(resp: Response) -> Value {
    let body = resp.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&body).unwrap()
}

/// Split an SSE body into its `data:` payloads.
pub fn sse_payloads(body: &str) -> Vec<&str> {
    assert!(body.ends_with("\n\n"), "body must end with a frame: {body:?}");
    body.split_terminator("\n\n")
        .map(|frame| {
            frame
                .strip_prefix("data: ")
                .unwrap_or_else(|| panic!("frame without data prefix: {frame:?}"))
        })
        .collect()
}

pub fn content_frame(content: &str) -> String {
    format!(
        "data: {}\n\n",
        serde_json::json!({ "content": content })
    )
}
