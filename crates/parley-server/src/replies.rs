//! Reply dispatch: connects the turn orchestrator to the HTTP surface.
//!
//! Turns of one chat run strictly one after another; different chats run in
//! parallel. Progress and completion are broadcast to subscribers.

use std::sync::Arc;

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

use parley_core::ids::{ChatId, ClientId, MessageId};
use parley_core::messages::{ChatMessage, Media, UserTurn};
use parley_core::turn::{ReplyOutcome, TurnProgress};
use parley_engine::{ReplyRequest, ToolFilter, TurnOrchestrator};

const EVENT_CAPACITY: usize = 1024;

/// Body of a reply request.
#[derive(Clone, Debug, Default, Deserialize)]
pub struct ReplyParams {
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub media: Vec<Media>,
    /// Prior messages of the chat, oldest first.
    #[serde(default)]
    pub history: Vec<ChatMessage>,
    #[serde(default)]
    pub tools: ToolFilter,
    #[serde(default)]
    pub client_id: Option<ClientId>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ReplyAccepted {
    pub chat_id: ChatId,
    pub message_id: MessageId,
}

/// Event published for every progress update and every finished Turn.
#[derive(Clone, Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ReplyEvent {
    Progress {
        chat_id: ChatId,
        message_id: MessageId,
        progress: TurnProgress,
    },
    Complete {
        chat_id: ChatId,
        message_id: MessageId,
        outcome: ReplyOutcome,
    },
}

impl ReplyEvent {
    pub fn chat_id(&self) -> &ChatId {
        match self {
            Self::Progress { chat_id, .. } | Self::Complete { chat_id, .. } => chat_id,
        }
    }

    pub fn message_id(&self) -> &MessageId {
        match self {
            Self::Progress { message_id, .. } | Self::Complete { message_id, .. } => message_id,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::Progress { .. } => "progress",
            Self::Complete { .. } => "complete",
        }
    }
}

/// An accepted Turn, queued or running.
struct ActiveRun {
    chat_id: ChatId,
    cancel: CancellationToken,
}

pub struct ReplyService {
    orchestrator: Arc<TurnOrchestrator>,
    chat_locks: Arc<DashMap<ChatId, Arc<tokio::sync::Mutex<()>>>>,
    active_runs: Arc<DashMap<MessageId, ActiveRun>>,
    event_tx: broadcast::Sender<ReplyEvent>,
}

impl ReplyService {
    pub fn new(orchestrator: Arc<TurnOrchestrator>) -> Self {
        let (event_tx, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            orchestrator,
            chat_locks: Arc::new(DashMap::new()),
            active_runs: Arc::new(DashMap::new()),
            event_tx,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ReplyEvent> {
        self.event_tx.subscribe()
    }

    pub fn orchestrator(&self) -> &Arc<TurnOrchestrator> {
        &self.orchestrator
    }

    /// Queue a Turn for `chat_id`. It starts once earlier Turns of the chat finish.
    pub fn submit(&self, chat_id: ChatId, params: ReplyParams) -> ReplyAccepted {
        let user = UserTurn {
            message_id: MessageId::new(),
            text: params.text,
            media: params.media,
        };
        let message_id = user.message_id.clone();
        let mut request = ReplyRequest::new(chat_id.clone(), params.history, user)
            .with_tools(params.tools);
        request.client_id = params.client_id;

        let cancel = CancellationToken::new();
        self.active_runs.insert(
            message_id.clone(),
            ActiveRun {
                chat_id: chat_id.clone(),
                cancel: cancel.clone(),
            },
        );

        let lock = self
            .chat_locks
            .entry(chat_id.clone())
            .or_default()
            .clone();
        let chat_locks = Arc::clone(&self.chat_locks);
        let orchestrator = Arc::clone(&self.orchestrator);
        let active_runs = Arc::clone(&self.active_runs);
        let event_tx = self.event_tx.clone();
        let accepted = ReplyAccepted {
            chat_id: chat_id.clone(),
            message_id: message_id.clone(),
        };

        tokio::spawn(async move {
            let turn = lock.lock_owned().await;

            let progress_tx = event_tx.clone();
            let (progress_chat, progress_message) = (chat_id.clone(), message_id.clone());
            let outcome = orchestrator
                .generate_reply(
                    request,
                    move |progress: &TurnProgress| {
                        // No subscribers is fine.
                        let _ = progress_tx.send(ReplyEvent::Progress {
                            chat_id: progress_chat.clone(),
                            message_id: progress_message.clone(),
                            progress: progress.clone(),
                        });
                    },
                    &cancel,
                )
                .await;

            active_runs.remove(&message_id);
            if event_tx
                .send(ReplyEvent::Complete {
                    chat_id: chat_id.clone(),
                    message_id,
                    outcome,
                })
                .is_err()
            {
                tracing::debug!(chat_id = %chat_id, "no subscribers for reply completion");
            }

            drop(turn);
            // Only the map's own handle left: no queued Turn for this chat.
            chat_locks.remove_if(&chat_id, |_, lock| Arc::strong_count(lock) == 1);
        });

        accepted
    }

    /// Cancel every queued or running Turn of `chat_id`. Returns how many.
    pub fn stop(&self, chat_id: &ChatId) -> usize {
        let mut stopped = 0;
        for run in self.active_runs.iter().filter(|run| &run.chat_id == chat_id) {
            run.cancel.cancel();
            stopped += 1;
        }
        if stopped > 0 {
            tracing::info!(chat_id = %chat_id, stopped, "stop requested");
        }
        stopped
    }

    pub fn is_running(&self, chat_id: &ChatId) -> bool {
        self.active_runs.iter().any(|run| &run.chat_id == chat_id)
    }

    pub fn active_count(&self) -> usize {
        self.active_runs.len()
    }

    /// Chats with a queued or running Turn.
    pub fn tracked_chats(&self) -> usize {
        self.chat_locks.len()
    }

    /// Cancel everything; used on shutdown.
    pub fn abort_all(&self) -> usize {
        let count = self.active_runs.len();
        for run in self.active_runs.iter() {
            run.cancel.cancel();
        }
        count
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use parley_core::stream::Chunk;
    use parley_engine::{OrchestratorConfig, ToolRegistry};
    use parley_llm::mock::{MockBackend, MockRound};

    fn service(rounds: Vec<MockRound>) -> ReplyService {
        let orchestrator = TurnOrchestrator::new(
            Arc::new(MockBackend::new(rounds)),
            Arc::new(ToolRegistry::new()),
            OrchestratorConfig::default(),
        );
        ReplyService::new(Arc::new(orchestrator))
    }

    fn params(text: &str) -> ReplyParams {
        ReplyParams {
            text: text.into(),
            ..Default::default()
        }
    }

    async fn next_complete(rx: &mut broadcast::Receiver<ReplyEvent>) -> (MessageId, ReplyOutcome) {
        loop {
            match tokio::time::timeout(Duration::from_secs(5), rx.recv()).await {
                Ok(Ok(ReplyEvent::Complete {
                    message_id, outcome, ..
                })) => return (message_id, outcome),
                Ok(Ok(_)) => continue,
                other => panic!("no completion: {other:?}"),
            }
        }
    }

    #[tokio::test]
    async fn completes_and_broadcasts() {
        let service = service(vec![MockRound::text_chunks(&["Hi", " there"])]);
        let mut rx = service.subscribe();

        let accepted = service.submit(ChatId::new(), params("hello"));
        let (message_id, outcome) = next_complete(&mut rx).await;

        assert_eq!(message_id, accepted.message_id);
        assert_eq!(outcome.text, "Hi there");
        assert!(!service.is_running(&accepted.chat_id));
    }

    #[tokio::test]
    async fn turns_of_one_chat_run_in_order() {
        let paced = MockRound::Paced(
            Duration::from_millis(20),
            vec![Ok(Chunk::text("first")), Ok(Chunk::text("first reply"))],
        );
        let service = service(vec![paced, MockRound::text("second reply")]);
        let mut rx = service.subscribe();
        let chat = ChatId::new();

        let a = service.submit(chat.clone(), params("one"));
        let b = service.submit(chat.clone(), params("two"));

        let mut order = Vec::new();
        while order.len() < 2 {
            let event = rx.recv().await.unwrap();
            if let ReplyEvent::Progress { message_id, .. } = &event {
                // nothing of the second turn before the first finished
                if message_id == &b.message_id {
                    assert_eq!(order, vec![a.message_id.clone()]);
                }
            }
            if let ReplyEvent::Complete { message_id, outcome, .. } = event {
                if message_id == a.message_id {
                    assert_eq!(outcome.text, "first reply");
                } else {
                    assert_eq!(outcome.text, "second reply");
                }
                order.push(message_id);
            }
        }
        assert_eq!(order, vec![a.message_id, b.message_id]);
    }

    #[tokio::test]
    async fn stop_cancels_the_running_turn() {
        let slow = MockRound::Paced(
            Duration::from_millis(200),
            vec![Ok(Chunk::text("a")), Ok(Chunk::text("ab")), Ok(Chunk::text("abc"))],
        );
        let service = service(vec![slow]);
        let mut rx = service.subscribe();
        let chat = ChatId::new();

        service.submit(chat.clone(), params("go"));
        // wait for the first progress, then stop
        loop {
            if let ReplyEvent::Progress { .. } = rx.recv().await.unwrap() {
                break;
            }
        }
        assert_eq!(service.stop(&chat), 1);

        let (_, outcome) = next_complete(&mut rx).await;
        assert!(outcome.stopped);
        assert_eq!(outcome.text, "a");
        assert_eq!(service.stop(&chat), 0);
    }

    #[tokio::test]
    async fn finished_chats_release_their_lock() {
        let service = service(vec![
            MockRound::text("one"),
            MockRound::text("two"),
            MockRound::text("three"),
        ]);
        let mut rx = service.subscribe();
        let (chat_a, chat_b) = (ChatId::new(), ChatId::new());

        service.submit(chat_a.clone(), params("a1"));
        service.submit(chat_a, params("a2"));
        service.submit(chat_b, params("b1"));
        for _ in 0..3 {
            next_complete(&mut rx).await;
        }

        tokio::time::timeout(Duration::from_secs(5), async {
            while service.tracked_chats() > 0 {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("chat locks left behind");
        assert_eq!(service.active_count(), 0);
    }
}
