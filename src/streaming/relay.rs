//! Relays upstream completions to clients.
//!
//! A streamed relay yields zero or more content frames followed by exactly
//! one terminal frame: `[DONE]` on success or the generic error payload on
//! any failure.

use bytes::Bytes;
use futures::Stream;
use std::convert::Infallible;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::Instant;

use super::sse::{format_sse_chunk, format_sse_done, format_sse_error, STREAM_ERROR_MESSAGE};
use crate::backend::{CompletionBackend, CompletionMessage, GenerationParams};
use crate::config::{RelayConfig, UpstreamConfig};
use crate::error::{StreamError, UpstreamError};
use crate::metrics::{self, Timer};
use crate::shutdown::{wait_for_shutdown, StreamGuard};

/// Per-request settings shared by every relayed call.
#[derive(Debug, Clone)]
pub struct RelaySettings {
    pub system_prompt: String,
    pub params: GenerationParams,
    /// Bound on opening the stream and on each fragment wait.
    pub idle_timeout: Duration,
    /// Bound on the whole stream.
    pub total_timeout: Duration,
}

impl RelaySettings {
    pub fn from_config(relay: &RelayConfig, upstream: &UpstreamConfig) -> Self {
        Self {
            system_prompt: relay.system_prompt.clone(),
            params: GenerationParams {
                model: upstream.model.clone(),
                temperature: relay.temperature,
                top_p: relay.top_p,
                max_tokens: relay.max_tokens,
            },
            idle_timeout: relay.stream_idle_timeout(),
            total_timeout: relay.stream_total_timeout(),
        }
    }
}

/// Bridges chat messages to a completion backend.
#[derive(Clone)]
pub struct ChatRelay {
    backend: Arc<dyn CompletionBackend>,
    settings: Arc<RelaySettings>,
}

impl ChatRelay {
    pub fn new(backend: Arc<dyn CompletionBackend>, settings: RelaySettings) -> Self {
        Self {
            backend,
            settings: Arc::new(settings),
        }
    }

    pub fn backend_name(&self) -> &'static str {
        self.backend.name()
    }

    /// System instruction followed by the user's message.
    pub fn messages_for(&self, message: &str) -> Vec<CompletionMessage> {
        vec![
            CompletionMessage::system(self.settings.system_prompt.as_str()),
            CompletionMessage::user(message),
        ]
    }

    /// Run a one-shot completion and return the reply text.
    pub async fn complete(&self, message: &str) -> Result<String, UpstreamError> {
        let reply = self
            .backend
            .complete_once(self.messages_for(message), self.settings.params.clone())
            .await?;
        Ok(reply.content)
    }

    /// Stream a completion as SSE frames.
    ///
    /// The returned stream owns the upstream fragment stream and `guard`;
    /// dropping it (client disconnect) releases both.
    pub fn stream(
        &self,
        message: &str,
        guard: StreamGuard,
        request_id: String,
    ) -> impl Stream<Item = Result<Bytes, Infallible>> + Send + 'static {
        let backend = self.backend.clone();
        let messages = self.messages_for(message);
        let params = self.settings.params.clone();
        let idle = self.settings.idle_timeout;
        let deadline = instant_after(self.settings.total_timeout);

        async_stream::stream! {
            let mut shutdown_rx = guard.subscribe();
            let _guard = guard;
            let backend_name = backend.name();
            let mut outcome = StreamOutcome::new(request_id);

            let opened = bounded(
                backend.complete_streaming(messages, params),
                &mut shutdown_rx,
                deadline,
                idle,
            )
            .await
            .and_then(|result| result.map_err(StreamError::from));

            let mut fragments = match opened {
                Ok(fragments) => fragments,
                Err(err) => {
                    yield Ok(outcome.fail(backend_name, err));
                    return;
                }
            };

            let mut first_fragment = true;
            loop {
                let pulled = bounded(fragments.next(), &mut shutdown_rx, deadline, idle).await;

                let err = match pulled {
                    Ok(Some(Ok(fragment))) => {
                        if first_fragment {
                            metrics::record_upstream_ttfb(backend_name, outcome.timer.elapsed());
                            first_fragment = false;
                        }
                        if fragment.is_empty() {
                            continue;
                        }
                        match format_sse_chunk(&fragment.content) {
                            Ok(frame) => {
                                metrics::record_fragment_sent(frame.len());
                                yield Ok(frame);
                                continue;
                            }
                            Err(e) => StreamError::from(e),
                        }
                    }
                    Ok(Some(Err(e))) => StreamError::from(e),
                    Ok(None) => {
                        yield Ok(outcome.done());
                        break;
                    }
                    Err(e) => e,
                };

                yield Ok(outcome.fail(backend_name, err));
                break;
            }
        }
    }
}

/// Await `fut` unless shutdown is signaled, the idle timeout passes, or the
/// stream deadline is reached.
async fn bounded<F: Future>(
    fut: F,
    shutdown_rx: &mut watch::Receiver<bool>,
    deadline: Instant,
    idle: Duration,
) -> Result<F::Output, StreamError> {
    let until = deadline.min(instant_after(idle));

    tokio::select! {
        biased;

        _ = wait_for_shutdown(shutdown_rx) => Err(StreamError::Shutdown),

        result = tokio::time::timeout_at(until, fut) => result.map_err(|_| {
            if Instant::now() >= deadline {
                StreamError::DeadlineExceeded
            } else {
                StreamError::IdleTimeout
            }
        }),
    }
}

/// `now + d`, saturating to a far-future instant for very large `d`.
fn instant_after(d: Duration) -> Instant {
    let now = Instant::now();
    now.checked_add(d)
        .unwrap_or_else(|| now + Duration::from_secs(FAR_FUTURE_SECS))
}

/// Roughly 30 years.
const FAR_FUTURE_SECS: u64 = 86400 * 365 * 30;

/// Tracks how a stream ended; logs and records duration when dropped.
struct StreamOutcome {
    request_id: String,
    timer: Timer,
    terminated: bool,
}

impl StreamOutcome {
    fn new(request_id: String) -> Self {
        Self {
            request_id,
            timer: Timer::new(),
            terminated: false,
        }
    }

    fn done(&mut self) -> Bytes {
        self.terminated = true;
        let frame = format_sse_done();
        metrics::record_bytes_sent(frame.len());
        frame
    }

    fn fail(&mut self, backend: &'static str, err: StreamError) -> Bytes {
        self.terminated = true;

        match &err {
            StreamError::Upstream(e) => {
                metrics::record_upstream_error(backend);
                tracing::error!(request_id = %self.request_id, backend, error = %e, "Upstream stream failed");
            }
            StreamError::Shutdown => {
                tracing::info!(request_id = %self.request_id, "Shutdown signaled, closing stream");
            }
            other => {
                tracing::warn!(request_id = %self.request_id, error = %other, "Stream aborted");
            }
        }
        metrics::record_stream_error(err.reason());

        let frame = format_sse_error(STREAM_ERROR_MESSAGE);
        metrics::record_bytes_sent(frame.len());
        frame
    }
}

impl Drop for StreamOutcome {
    fn drop(&mut self) {
        let elapsed = self.timer.elapsed();
        metrics::record_stream_duration(elapsed);

        if self.terminated {
            tracing::info!(
                request_id = %self.request_id,
                duration_ms = elapsed.as_millis() as u64,
                "Stream completed"
            );
        } else {
            tracing::info!(
                request_id = %self.request_id,
                duration_ms = elapsed.as_millis() as u64,
                "Client disconnected before stream completed"
            );
        }
    }
}
