/// Single-consumer event loop around the controller
use crate::chat_types::{Conversation, ConversationId, Message};
use crate::error::{Result, SyncError};
use crate::projection::SyncSnapshot;
use crate::push::{ConnectionState, InboundEvent};
use crate::scroll::Viewport;
use crate::sync::controller::SyncController;
use crate::sync::events::{Effect, Notice, SyncEvent};
use futures_util::future::BoxFuture;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info, warn};
use uuid::Uuid;

const MIN_TICK: Duration = Duration::from_millis(1);

/// GET /conversations/{id}/messages
pub trait HistoryFetcher: Send + Sync + 'static {
    fn fetch(&self, conversation_id: ConversationId) -> BoxFuture<'static, Result<Vec<Message>>>;
}

/// POST a new message; resolves to the stored server copy
pub trait MessageSubmitter: Send + Sync + 'static {
    fn submit(
        &self,
        conversation_id: ConversationId,
        client_ref: Uuid,
        body: String,
    ) -> BoxFuture<'static, Result<Message>>;
}

enum QueueItem {
    Event(SyncEvent),
    Shutdown,
}

/// Cloneable command surface for the view and the transport
#[derive(Clone)]
pub struct SyncHandle {
    tx: mpsc::Sender<QueueItem>,
    snapshots: watch::Receiver<SyncSnapshot>,
}

impl SyncHandle {
    pub async fn send(&self, event: SyncEvent) -> Result<()> {
        self.tx
            .send(QueueItem::Event(event))
            .await
            .map_err(|_| SyncError::Stopped)
    }

    pub async fn open_conversation(&self, conversation_id: ConversationId) -> Result<()> {
        self.send(SyncEvent::OpenConversation { conversation_id }).await
    }

    pub async fn close_conversation(&self) -> Result<()> {
        self.send(SyncEvent::CloseConversation).await
    }

    pub async fn upsert_conversation(&self, conversation: Conversation) -> Result<()> {
        self.send(SyncEvent::UpsertConversation { conversation }).await
    }

    pub async fn send_message(&self, body: impl Into<String>) -> Result<()> {
        self.send(SyncEvent::SendMessage { body: body.into() }).await
    }

    pub async fn send_typing(&self) -> Result<()> {
        self.send(SyncEvent::LocalTyping).await
    }

    pub async fn stop_typing(&self) -> Result<()> {
        self.send(SyncEvent::LocalStopTyping).await
    }

    pub async fn push_inbound(&self, event: InboundEvent) -> Result<()> {
        self.send(SyncEvent::Inbound { event }).await
    }

    /// Raw JSON frame from the push transport
    pub async fn push_frame(&self, frame: &str) -> Result<()> {
        let event = InboundEvent::from_json(frame)?;
        self.push_inbound(event).await
    }

    pub async fn connection_changed(&self, state: ConnectionState) -> Result<()> {
        self.send(SyncEvent::ConnectionChanged { state }).await
    }

    pub async fn viewport_changed(&self, viewport: Viewport) -> Result<()> {
        self.send(SyncEvent::ViewportChanged { viewport }).await
    }

    pub fn subscribe(&self) -> watch::Receiver<SyncSnapshot> {
        self.snapshots.clone()
    }

    pub fn snapshot(&self) -> SyncSnapshot {
        self.snapshots.borrow().clone()
    }

    pub async fn shutdown(&self) -> Result<()> {
        self.tx
            .send(QueueItem::Shutdown)
            .await
            .map_err(|_| SyncError::Stopped)
    }
}

pub struct SyncRuntime {
    controller: SyncController,
    fetcher: Arc<dyn HistoryFetcher>,
    submitter: Arc<dyn MessageSubmitter>,
    /// Weak so the loop ends once every handle is gone
    tx: mpsc::WeakSender<QueueItem>,
    rx: mpsc::Receiver<QueueItem>,
    snapshots: watch::Sender<SyncSnapshot>,
}

impl SyncRuntime {
    /// Start the event loop on the current tokio runtime
    pub fn spawn(
        controller: SyncController,
        fetcher: Arc<dyn HistoryFetcher>,
        submitter: Arc<dyn MessageSubmitter>,
    ) -> (SyncHandle, JoinHandle<()>) {
        let (tx, rx) = mpsc::channel(controller.config().event_queue_capacity);
        let (snapshots, snapshot_rx) = watch::channel(SyncSnapshot::capture(&controller));

        let runtime = Self {
            controller,
            fetcher,
            submitter,
            tx: tx.downgrade(),
            rx,
            snapshots,
        };
        let handle = SyncHandle {
            tx,
            snapshots: snapshot_rx,
        };
        let join = tokio::spawn(runtime.run());
        (handle, join)
    }

    async fn run(mut self) {
        let mut tick = interval(self.controller.config().typing_tick.max(MIN_TICK));
        tick.set_missed_tick_behavior(MissedTickBehavior::Skip);
        info!("Sync runtime started for {}", self.controller.viewer().id);

        loop {
            tokio::select! {
                item = self.rx.recv() => match item {
                    Some(QueueItem::Event(event)) => self.apply(event),
                    Some(QueueItem::Shutdown) | None => break,
                },
                _ = tick.tick() => self.apply(SyncEvent::Tick),
            }
        }

        info!("Sync runtime stopped");
    }

    fn apply(&mut self, event: SyncEvent) {
        let effects = self.controller.handle(event);
        for effect in effects {
            self.run_effect(effect);
        }

        let snapshot = SyncSnapshot::capture(&self.controller);
        self.snapshots.send_if_modified(|current| {
            if *current == snapshot {
                false
            } else {
                *current = snapshot;
                true
            }
        });
    }

    fn run_effect(&self, effect: Effect) {
        match effect {
            Effect::FetchHistory {
                conversation_id,
                request,
            } => {
                // Never aborted; a stale result is discarded by the controller
                let fetch = self.fetcher.fetch(conversation_id.clone());
                let tx = self.tx.clone();
                tokio::spawn(async move {
                    let event = match fetch.await {
                        Ok(messages) => SyncEvent::HistoryLoaded {
                            conversation_id,
                            request,
                            messages,
                        },
                        Err(e) => SyncEvent::HistoryFailed {
                            conversation_id,
                            request,
                            error: e.to_string(),
                        },
                    };
                    if !requeue(&tx, event).await {
                        debug!("Runtime gone before fetch {} completed", request);
                    }
                });
            }
            Effect::SubmitMessage {
                conversation_id,
                client_ref,
                body,
            } => {
                let submit = self
                    .submitter
                    .submit(conversation_id.clone(), client_ref, body);
                let tx = self.tx.clone();
                tokio::spawn(async move {
                    let event = match submit.await {
                        Ok(message) => SyncEvent::MessageSent { message },
                        Err(e) => SyncEvent::SendFailed {
                            conversation_id,
                            client_ref,
                            error: e.to_string(),
                        },
                    };
                    if !requeue(&tx, event).await {
                        debug!("Runtime gone before submit {} completed", client_ref);
                    }
                });
            }
            Effect::Notice { notice } => match &notice {
                Notice::HistoryFailed { .. } | Notice::SendFailed { .. } => warn!("{}", notice.text()),
                Notice::Offline | Notice::BackOnline => info!("{}", notice.text()),
            },
        }
    }
}

/// Feed a completion back into the queue if anyone still drives it
async fn requeue(tx: &mpsc::WeakSender<QueueItem>, event: SyncEvent) -> bool {
    match tx.upgrade() {
        Some(tx) => tx.send(QueueItem::Event(event)).await.is_ok(),
        None => false,
    }
}
