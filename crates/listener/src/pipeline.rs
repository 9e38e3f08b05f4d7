use async_trait::async_trait;
use metrics::{counter, gauge};
use tokio::sync::mpsc;
use tracing::{error, warn};
use transfer_feed_domain::model::{
    classify, parse_payload, ClassifiedEvent, EventKind, ParseErrorKind, RawNotification,
};

use crate::subscription::NotificationHandler;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineOutcome {
    Enqueued(EventKind),
    Rejected(ParseErrorKind),
    /// The dispatch worker is gone; the event could not be handed over.
    QueueClosed,
}

/// Parses and classifies one notification, then hands it to the dispatch
/// queue. Waits while the queue is full, so a slow sink slows the receive
/// loop instead of losing events.
pub async fn process_notification(
    queue: &mpsc::Sender<ClassifiedEvent>,
    notification: RawNotification,
) -> PipelineOutcome {
    let event = match parse_payload(&notification.payload) {
        Ok(event) => event,
        Err(err) => {
            let kind = err.kind();
            warn!(
                channel = %notification.channel,
                payload = %notification.payload,
                kind = %kind,
                field = err.field().map(<&'static str>::from),
                error = %err,
                "dropping malformed notification"
            );
            let reason: &'static str = kind.into();
            counter!("listener_notifications_total", "result" => "rejected", "reason" => reason)
                .increment(1);
            return PipelineOutcome::Rejected(kind);
        }
    };

    let classified = classify(event);
    let kind = classified.kind;

    if let Err(mpsc::error::SendError(lost)) = queue.send(classified).await {
        error!(
            channel = %notification.channel,
            payload = %notification.payload,
            tx_hash = %lost.event.tx_hash,
            "dispatch queue closed, dropping event"
        );
        counter!("listener_notifications_total", "result" => "queue_closed").increment(1);
        return PipelineOutcome::QueueClosed;
    }

    counter!("listener_notifications_total", "result" => "enqueued", "kind" => kind.as_str())
        .increment(1);
    gauge!("listener_queue_depth").set((queue.max_capacity() - queue.capacity()) as f64);
    PipelineOutcome::Enqueued(kind)
}

/// Receive-side half of the dispatch queue, plugged into the subscription
/// manager.
#[derive(Debug, Clone)]
pub struct Pipeline {
    queue: mpsc::Sender<ClassifiedEvent>,
}

impl Pipeline {
    pub fn new(queue: mpsc::Sender<ClassifiedEvent>) -> Self {
        Self { queue }
    }
}

#[async_trait]
impl NotificationHandler for Pipeline {
    async fn on_notification(&self, notification: RawNotification) {
        process_notification(&self.queue, notification).await;
    }
}
