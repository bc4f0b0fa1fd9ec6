//! Lifecycle event publication and the in-process consumer that feeds the
//! notification dispatcher.

use std::sync::Arc;

use anyhow::Context;
use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::models::event::RequestEvent;
use crate::notification::dispatcher::NotificationDispatcher;

/// Fire-and-forget sink for request lifecycle events.
#[async_trait]
pub trait EventPublisher: Send + Sync {
    async fn put(&self, event: RequestEvent) -> anyhow::Result<()>;
}

/// Publishes onto a bounded tokio channel drained by [`run_consumer`].
#[derive(Clone)]
pub struct ChannelPublisher {
    tx: mpsc::Sender<RequestEvent>,
}

impl ChannelPublisher {
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<RequestEvent>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { tx }, rx)
    }
}

#[async_trait]
impl EventPublisher for ChannelPublisher {
    /// Never waits for the consumer: a full buffer is reported as an error.
    async fn put(&self, event: RequestEvent) -> anyhow::Result<()> {
        self.tx
            .try_send(event)
            .map_err(|e| match e {
                mpsc::error::TrySendError::Full(_) => anyhow::anyhow!("event buffer is full"),
                mpsc::error::TrySendError::Closed(_) => {
                    anyhow::anyhow!("event consumer has shut down")
                }
            })
            .context("failed to publish request event")
    }
}

/// Drains events until every publisher is dropped. Each event is handled to
/// completion before the next, so a request's created notifications are
/// always out before any edit that targets them.
pub async fn run_consumer(
    mut rx: mpsc::Receiver<RequestEvent>,
    dispatcher: Arc<NotificationDispatcher>,
) {
    while let Some(event) = rx.recv().await {
        if let Err(e) = dispatcher.handle_event(&event).await {
            tracing::error!(
                request.id = %event.request.id,
                event_type = event.event_type.as_str(),
                error = %e,
                "failed to handle request event"
            );
        }
    }
    tracing::info!("event consumer stopped");
}

/// Spawns [`run_consumer`] on the tokio runtime.
pub fn spawn_consumer(
    rx: mpsc::Receiver<RequestEvent>,
    dispatcher: Arc<NotificationDispatcher>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(run_consumer(rx, dispatcher))
}
