use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::{stream, StreamExt};
use parking_lot::Mutex;

use parley_core::context::SessionRequest;
use parley_core::errors::GatewayError;
use parley_core::messages::{Part, ToolCall};
use parley_core::provider::{BackendSession, LlmBackend};
use parley_core::stream::{Chunk, ChunkStream};
use parley_core::tokens::TokenUsage;

/// Pre-programmed round for deterministic testing without API calls.
#[derive(Clone, Debug)]
pub enum MockRound {
    /// Yield a sequence of stream items.
    Stream(Vec<Result<Chunk, GatewayError>>),
    /// Yield items, sleeping before each one.
    Paced(Duration, Vec<Result<Chunk, GatewayError>>),
    /// Fail opening the round itself.
    Error(GatewayError),
    /// Wait a duration, then resolve the inner round.
    Delay(Duration, Box<MockRound>),
}

impl MockRound {
    /// A single chunk of text.
    pub fn text(text: &str) -> Self {
        Self::Stream(vec![Ok(Chunk::text(text))])
    }

    /// Text streamed as cumulative snapshots, one per fragment.
    pub fn text_chunks(fragments: &[&str]) -> Self {
        let mut acc = String::new();
        let mut items = Vec::with_capacity(fragments.len());
        for fragment in fragments {
            acc.push_str(fragment);
            items.push(Ok(Chunk::text(acc.clone())));
        }
        Self::Stream(items)
    }

    /// A round that requests the given tool calls (optionally after some narrative).
    pub fn tool_calls(narrative: Option<&str>, calls: Vec<ToolCall>) -> Self {
        let mut items = Vec::new();
        if let Some(text) = narrative {
            items.push(Ok(Chunk::text(text)));
        }
        items.push(Ok(Chunk::new(calls.into_iter().map(Part::ToolCall).collect())));
        Self::Stream(items)
    }

    /// Append a usage snapshot as the round's last chunk.
    pub fn with_usage(self, usage: TokenUsage) -> Self {
        match self {
            Self::Stream(mut items) => {
                items.push(Ok(Chunk::default().with_usage(usage)));
                Self::Stream(items)
            }
            Self::Paced(d, mut items) => {
                items.push(Ok(Chunk::default().with_usage(usage)));
                Self::Paced(d, items)
            }
            other => other,
        }
    }

    pub fn delayed(delay: Duration, inner: MockRound) -> Self {
        Self::Delay(delay, Box::new(inner))
    }
}

#[derive(Default)]
struct Script {
    rounds: VecDeque<MockRound>,
    sessions: Vec<SessionRequest>,
    inputs: Vec<Vec<Part>>,
}

/// Backend that plays scripted rounds in order, across all sessions it opens.
#[derive(Clone, Default)]
pub struct MockBackend {
    script: Arc<Mutex<Script>>,
}

impl MockBackend {
    pub fn new(rounds: Vec<MockRound>) -> Self {
        Self {
            script: Arc::new(Mutex::new(Script {
                rounds: rounds.into(),
                ..Default::default()
            })),
        }
    }

    pub fn push_round(&self, round: MockRound) {
        self.script.lock().rounds.push_back(round);
    }

    /// Number of rounds streamed so far.
    pub fn round_count(&self) -> usize {
        self.script.lock().inputs.len()
    }

    /// Session requests seen so far.
    pub fn sessions(&self) -> Vec<SessionRequest> {
        self.script.lock().sessions.clone()
    }

    /// The input parts of every round, in order.
    pub fn round_inputs(&self) -> Vec<Vec<Part>> {
        self.script.lock().inputs.clone()
    }
}

#[async_trait]
impl LlmBackend for MockBackend {
    fn name(&self) -> &str {
        "mock"
    }

    async fn open_session(
        &self,
        request: SessionRequest,
    ) -> Result<Box<dyn BackendSession>, GatewayError> {
        self.script.lock().sessions.push(request);
        Ok(Box::new(MockSession {
            script: self.script.clone(),
        }))
    }
}

struct MockSession {
    script: Arc<Mutex<Script>>,
}

#[async_trait]
impl BackendSession for MockSession {
    async fn stream_round(&mut self, input: Vec<Part>) -> Result<ChunkStream, GatewayError> {
        let round = {
            let mut script = self.script.lock();
            let idx = script.inputs.len();
            script.inputs.push(input);
            script.rounds.pop_front().ok_or_else(|| {
                GatewayError::Rejected(format!(
                    "MockBackend: no round configured for call {idx}"
                ))
            })?
        };
        resolve_round(round).await
    }
}

/// Resolve a round, unrolling nested delays iteratively.
async fn resolve_round(round: MockRound) -> Result<ChunkStream, GatewayError> {
    let mut current = round;
    loop {
        match current {
            MockRound::Stream(items) => return Ok(Box::pin(stream::iter(items))),
            MockRound::Paced(interval, items) => {
                return Ok(Box::pin(stream::iter(items).then(move |item| async move {
                    tokio::time::sleep(interval).await;
                    item
                })));
            }
            MockRound::Error(e) => return Err(e),
            MockRound::Delay(duration, inner) => {
                tokio::time::sleep(duration).await;
                current = *inner;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    async fn collect(stream: ChunkStream) -> Vec<Result<Chunk, GatewayError>> {
        stream.collect().await
    }

    #[tokio::test]
    async fn text_round() {
        let mock = MockBackend::new(vec![MockRound::text("hello world")]);
        let mut session = mock.open_session(SessionRequest::empty("m")).await.unwrap();
        let items = collect(session.stream_round(vec![Part::text("hi")]).await.unwrap()).await;
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].as_ref().unwrap().visible_text(), "hello world");
        assert_eq!(mock.round_count(), 1);
        assert_eq!(mock.round_inputs()[0], vec![Part::text("hi")]);
    }

    #[tokio::test]
    async fn text_chunks_are_cumulative() {
        let mock = MockBackend::new(vec![MockRound::text_chunks(&["Hel", "lo"])]);
        let mut session = mock.open_session(SessionRequest::empty("m")).await.unwrap();
        let items = collect(session.stream_round(vec![]).await.unwrap()).await;
        let texts: Vec<_> = items
            .iter()
            .map(|i| i.as_ref().unwrap().visible_text())
            .collect();
        assert_eq!(texts, vec!["Hel", "Hello"]);
    }

    #[tokio::test]
    async fn error_round() {
        let mock = MockBackend::new(vec![MockRound::Error(GatewayError::Unauthorized(
            "bad".into(),
        ))]);
        let mut session = mock.open_session(SessionRequest::empty("m")).await.unwrap();
        assert!(session.stream_round(vec![]).await.is_err());
    }

    #[tokio::test]
    async fn rounds_are_shared_across_sessions_in_order() {
        let mock = MockBackend::new(vec![MockRound::text("first"), MockRound::text("second")]);
        let mut a = mock.open_session(SessionRequest::empty("m")).await.unwrap();
        let mut b = mock.open_session(SessionRequest::empty("m")).await.unwrap();
        let first = collect(a.stream_round(vec![]).await.unwrap()).await;
        let second = collect(b.stream_round(vec![]).await.unwrap()).await;
        assert_eq!(first[0].as_ref().unwrap().visible_text(), "first");
        assert_eq!(second[0].as_ref().unwrap().visible_text(), "second");
        assert_eq!(mock.sessions().len(), 2);
    }

    #[tokio::test]
    async fn exhausted_rounds() {
        let mock = MockBackend::new(vec![MockRound::text("only one")]);
        let mut session = mock.open_session(SessionRequest::empty("m")).await.unwrap();
        let _ = session.stream_round(vec![]).await;
        assert!(session.stream_round(vec![]).await.is_err());
    }

    #[tokio::test]
    async fn tool_call_round_with_usage() {
        let mock = MockBackend::new(vec![MockRound::tool_calls(
            Some("Checking."),
            vec![ToolCall::new("list_directory", json!({"DirectoryPath": "/tmp"}))],
        )
        .with_usage(TokenUsage {
            prompt_tokens: 10,
            ..Default::default()
        })]);
        let mut session = mock.open_session(SessionRequest::empty("m")).await.unwrap();
        let items = collect(session.stream_round(vec![]).await.unwrap()).await;
        assert_eq!(items.len(), 3);
        assert_eq!(items[1].as_ref().unwrap().tool_calls().count(), 1);
        assert_eq!(items[2].as_ref().unwrap().usage.unwrap().prompt_tokens, 10);
    }

    #[tokio::test]
    async fn delayed_round() {
        tokio::time::pause();
        let mock = MockBackend::new(vec![MockRound::delayed(
            Duration::from_millis(50),
            MockRound::text("after delay"),
        )]);
        let mut session = mock.open_session(SessionRequest::empty("m")).await.unwrap();
        let start = tokio::time::Instant::now();
        let stream = session.stream_round(vec![]).await.unwrap();
        assert!(start.elapsed() >= Duration::from_millis(50));
        assert_eq!(collect(stream).await.len(), 1);
    }

    #[tokio::test]
    async fn delayed_error() {
        let mock = MockBackend::new(vec![MockRound::delayed(
            Duration::from_millis(20),
            MockRound::Error(GatewayError::Throttled { retry_after: None }),
        )]);
        let mut session = mock.open_session(SessionRequest::empty("m")).await.unwrap();
        match session.stream_round(vec![]).await {
            Err(GatewayError::Throttled { .. }) => {}
            Err(other) => panic!("expected Throttled, got: {other:?}"),
            Ok(_) => panic!("expected error"),
        }
    }
}
