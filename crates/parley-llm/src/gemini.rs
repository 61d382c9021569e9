use std::collections::VecDeque;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use async_trait::async_trait;
use bytes::BytesMut;
use futures::{Future, Stream};
use parking_lot::Mutex;
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use tracing::{debug, instrument};

use parley_core::context::SessionRequest;
use parley_core::errors::GatewayError;
use parley_core::messages::{Content, Part};
use parley_core::provider::{BackendSession, LlmBackend};
use parley_core::stream::{Chunk, ChunkStream};

use crate::converter;
use crate::sse::{self, ChunkDecoder};

pub const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";
pub const DEFAULT_MODEL: &str = "gemini-2.5-flash";
const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);
const SSE_IDLE_TIMEOUT: Duration = Duration::from_secs(90);

#[derive(Clone, Debug)]
pub struct GeminiConfig {
    pub api_key: SecretString,
    pub model: String,
    pub base_url: String,
    pub idle_timeout: Duration,
}

impl GeminiConfig {
    pub fn new(api_key: SecretString) -> Self {
        Self {
            api_key,
            model: DEFAULT_MODEL.to_string(),
            base_url: DEFAULT_BASE_URL.to_string(),
            idle_timeout: SSE_IDLE_TIMEOUT,
        }
    }
}

/// Streaming Gemini backend over `streamGenerateContent?alt=sse`.
pub struct GeminiBackend {
    client: Client,
    config: Arc<GeminiConfig>,
}

impl GeminiBackend {
    pub fn new(config: GeminiConfig) -> Result<Self, GatewayError> {
        let client = Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .build()
            .map_err(|e| GatewayError::Transport(e.to_string()))?;
        Ok(Self {
            client,
            config: Arc::new(config),
        })
    }

    pub fn model(&self) -> &str {
        &self.config.model
    }
}

#[async_trait]
impl LlmBackend for GeminiBackend {
    fn name(&self) -> &str {
        "gemini"
    }

    async fn open_session(
        &self,
        mut request: SessionRequest,
    ) -> Result<Box<dyn BackendSession>, GatewayError> {
        if request.model.is_empty() {
            request.model = self.config.model.clone();
        }
        let history = std::mem::take(&mut request.history);
        Ok(Box::new(GeminiSession {
            client: self.client.clone(),
            config: self.config.clone(),
            request,
            history,
            model_output: Arc::new(Mutex::new(Vec::new())),
        }))
    }
}

/// Holds the conversation so far; each round appends the previous round's
/// model output before sending the new input.
pub struct GeminiSession {
    client: Client,
    config: Arc<GeminiConfig>,
    request: SessionRequest,
    history: Vec<Content>,
    model_output: Arc<Mutex<Vec<Part>>>,
}

impl GeminiSession {
    fn endpoint(&self) -> String {
        format!(
            "{}/models/{}:streamGenerateContent?alt=sse",
            self.config.base_url.trim_end_matches('/'),
            self.request.model
        )
    }

    fn flush_model_output(&mut self) {
        let parts = std::mem::take(&mut *self.model_output.lock());
        if !parts.is_empty() {
            self.history.push(Content::model(parts));
        }
    }
}

#[async_trait]
impl BackendSession for GeminiSession {
    #[instrument(skip_all, fields(model = %self.request.model, turns = self.history.len()))]
    async fn stream_round(&mut self, input: Vec<Part>) -> Result<ChunkStream, GatewayError> {
        self.flush_model_output();
        self.history.push(Content::user(input));

        let body = converter::build_request_body(&self.request, &self.history);
        let resp = self
            .client
            .post(self.endpoint())
            .header("x-goog-api-key", self.config.api_key.expose_secret())
            .header("content-type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| GatewayError::Transport(e.to_string()))?;

        if !resp.status().is_success() {
            let status = resp.status().as_u16();
            let body = resp.text().await.unwrap_or_default();
            return Err(GatewayError::from_status(status, body));
        }
        debug!("round stream opened");

        let decoder = ChunkDecoder::with_transcript(self.model_output.clone());
        Ok(Box::pin(SseStream::with_idle_timeout(
            resp.bytes_stream(),
            decoder,
            self.config.idle_timeout,
        )))
    }
}

/// Wraps a byte stream and yields decoded chunks.
/// If no data arrives within `idle_duration`, yields an error and ends.
pub struct SseStream {
    inner: Pin<Box<dyn Stream<Item = Result<bytes::Bytes, reqwest::Error>> + Send>>,
    decoder: ChunkDecoder,
    /// Raw bytes not yet terminated by a newline.
    buffer: BytesMut,
    /// Lines of the event being assembled.
    event: String,
    pending: VecDeque<Result<Chunk, GatewayError>>,
    idle_deadline: Pin<Box<tokio::time::Sleep>>,
    idle_duration: Duration,
    finished: bool,
}

impl SseStream {
    pub fn with_idle_timeout(
        byte_stream: impl Stream<Item = Result<bytes::Bytes, reqwest::Error>> + Send + 'static,
        decoder: ChunkDecoder,
        idle_timeout: Duration,
    ) -> Self {
        Self {
            inner: Box::pin(byte_stream),
            decoder,
            buffer: BytesMut::new(),
            event: String::new(),
            pending: VecDeque::new(),
            idle_deadline: Box::pin(tokio::time::sleep(idle_timeout)),
            idle_duration: idle_timeout,
            finished: false,
        }
    }

    fn drain_events(&mut self, raw: &str) {
        for data in sse::parse_sse_lines(raw) {
            self.pending.extend(self.decoder.decode(&data));
        }
    }

    /// Split complete lines off the byte buffer. A blank line (`\n` or
    /// `\r\n`) dispatches the event assembled so far. Lines are decoded only
    /// once complete, so a code point split across reads stays intact.
    fn take_lines(&mut self) {
        while let Some(pos) = self.buffer.iter().position(|&b| b == b'\n') {
            let mut line = self.buffer.split_to(pos + 1);
            line.truncate(pos);
            if line.last() == Some(&b'\r') {
                line.truncate(line.len() - 1);
            }
            if line.is_empty() {
                let event = std::mem::take(&mut self.event);
                self.drain_events(&event);
            } else {
                self.event.push_str(&String::from_utf8_lossy(&line));
                self.event.push('\n');
            }
        }
    }

    fn finish_buffer(&mut self) {
        if !self.buffer.is_empty() {
            let rest = self.buffer.split();
            self.event.push_str(&String::from_utf8_lossy(&rest));
        }
        let event = std::mem::take(&mut self.event);
        if !event.is_empty() {
            self.drain_events(&event);
        }
    }
}

impl Stream for SseStream {
    type Item = Result<Chunk, GatewayError>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        if let Some(item) = self.pending.pop_front() {
            return Poll::Ready(Some(item));
        }
        if self.finished {
            return Poll::Ready(None);
        }

        loop {
            match self.inner.as_mut().poll_next(cx) {
                Poll::Ready(Some(Ok(bytes))) => {
                    let new_deadline = tokio::time::Instant::now() + self.idle_duration;
                    self.idle_deadline.as_mut().reset(new_deadline);

                    self.buffer.extend_from_slice(&bytes);
                    self.take_lines();

                    if let Some(item) = self.pending.pop_front() {
                        return Poll::Ready(Some(item));
                    }
                }
                Poll::Ready(Some(Err(e))) => {
                    self.finished = true;
                    return Poll::Ready(Some(Err(GatewayError::StreamInterrupted(e.to_string()))));
                }
                Poll::Ready(None) => {
                    self.finished = true;
                    self.finish_buffer();
                    return Poll::Ready(self.pending.pop_front());
                }
                Poll::Pending => {
                    if self.idle_deadline.as_mut().poll(cx).is_ready() {
                        self.finished = true;
                        return Poll::Ready(Some(Err(GatewayError::StreamInterrupted(format!(
                            "idle timeout after {}s",
                            self.idle_duration.as_secs()
                        )))));
                    }
                    return Poll::Pending;
                }
            }
        }
    }
}
