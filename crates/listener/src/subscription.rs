//! Connection lifecycle for one notification channel: connect, subscribe,
//! receive in order, and reconnect with backoff until told to stop.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use metrics::{counter, gauge};
use strum_macros::{Display, IntoStaticStr};
use tokio::sync::watch;
use tokio::time::{sleep, timeout};
use tracing::{debug, info, warn};
use transfer_feed_domain::model::RawNotification;

use crate::backoff::Backoff;
use crate::source::{NotificationSource, NotificationStream, TransportError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, IntoStaticStr)]
#[strum(serialize_all = "snake_case")]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Subscribed,
    Reconnecting,
    Closed,
}

impl ConnectionState {
    pub fn as_str(self) -> &'static str {
        self.into()
    }

    pub(crate) fn gauge_value(self) -> f64 {
        match self {
            Self::Disconnected => 0.0,
            Self::Connecting => 1.0,
            Self::Subscribed => 2.0,
            Self::Reconnecting => 3.0,
            Self::Closed => 4.0,
        }
    }
}

/// Observable snapshot of the manager, published on every state change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Subscription {
    pub channel: String,
    pub state: ConnectionState,
    /// Consecutive failed attempts since the last successful subscribe.
    pub retry_count: u32,
    pub last_error: Option<TransportError>,
    /// Lifetime number of reconnect cycles.
    pub reconnects: u64,
}

impl Subscription {
    fn new(channel: String) -> Self {
        Self {
            channel,
            state: ConnectionState::Disconnected,
            retry_count: 0,
            last_error: None,
            reconnects: 0,
        }
    }
}

/// Receives every raw notification, in arrival order. The manager does not
/// wait for the next message until `on_notification` returns.
#[async_trait]
pub trait NotificationHandler: Send + Sync {
    async fn on_notification(&self, notification: RawNotification);
}

#[derive(Debug, Clone)]
pub struct SubscriptionConfig {
    pub channel: String,
    pub backoff: Backoff,
    pub connect_timeout: Duration,
    pub subscribe_timeout: Duration,
}

impl SubscriptionConfig {
    pub fn new(channel: impl Into<String>) -> Self {
        Self {
            channel: channel.into(),
            backoff: Backoff::default(),
            connect_timeout: Duration::from_secs(10),
            subscribe_timeout: Duration::from_secs(5),
        }
    }
}

enum ReceiveOutcome {
    Cancelled,
    Ended,
    Failed(TransportError),
}

pub struct SubscriptionManager<S> {
    source: S,
    config: SubscriptionConfig,
    state: Arc<watch::Sender<Subscription>>,
}

impl<S> SubscriptionManager<S>
where
    S: NotificationSource,
{
    pub fn new(source: S, config: SubscriptionConfig) -> Self {
        let (state, _) = watch::channel(Subscription::new(config.channel.clone()));
        Self {
            source,
            config,
            state: Arc::new(state),
        }
    }

    /// Publisher for the snapshot channel, for owners that must report a
    /// final state after aborting `run`.
    pub(crate) fn publisher(&self) -> Arc<watch::Sender<Subscription>> {
        Arc::clone(&self.state)
    }

    pub fn watch(&self) -> watch::Receiver<Subscription> {
        self.state.subscribe()
    }

    pub fn snapshot(&self) -> Subscription {
        self.state.borrow().clone()
    }

    /// Drives the subscription until `shutdown` flips to `true` (or its
    /// sender is dropped) or the stream reports a clean end with `Ok(None)`.
    /// Only transport errors trigger a reconnect. A notification that is
    /// already being handled completes before the manager closes.
    pub async fn run<H>(self, handler: H, mut shutdown: watch::Receiver<bool>) -> Subscription
    where
        H: NotificationHandler,
    {
        let channel = self.config.channel.clone();

        loop {
            if *shutdown.borrow() {
                break;
            }

            self.transition(ConnectionState::Connecting, |_| {});
            let attempt = tokio::select! {
                biased;
                _ = cancelled(&mut shutdown) => break,
                attempt = self.establish() => attempt,
            };

            let failure = match attempt {
                Ok(mut stream) => {
                    self.transition(ConnectionState::Subscribed, |sub| sub.retry_count = 0);
                    info!(channel = %channel, "subscribed to notification channel");

                    match receive(&mut stream, &handler, &mut shutdown).await {
                        ReceiveOutcome::Cancelled => break,
                        ReceiveOutcome::Ended => {
                            info!(channel = %channel, "notification feed ended");
                            break;
                        }
                        ReceiveOutcome::Failed(err) => err,
                    }
                }
                Err(err) => err,
            };

            let retry = self.state.borrow().retry_count;
            let delay = self.config.backoff.delay(retry);
            counter!("listener_transport_errors_total", "kind" => failure.label()).increment(1);
            warn!(
                channel = %channel,
                error = %failure,
                retry,
                delay_ms = delay.as_millis() as u64,
                "transport failure, reconnecting"
            );
            self.transition(ConnectionState::Reconnecting, |sub| {
                sub.retry_count = sub.retry_count.saturating_add(1);
                sub.reconnects += 1;
                sub.last_error = Some(failure);
            });

            tokio::select! {
                biased;
                _ = cancelled(&mut shutdown) => break,
                _ = sleep(delay) => {}
            }
        }

        self.transition(ConnectionState::Closed, |_| {});
        info!(channel = %channel, "subscription closed");
        self.snapshot()
    }

    async fn establish(&self) -> Result<S::Stream, TransportError> {
        let channel = self.config.channel.as_str();
        let connect_timeout = self.config.connect_timeout;
        let subscribe_timeout = self.config.subscribe_timeout;

        let mut stream = timeout(connect_timeout, self.source.connect())
            .await
            .map_err(|_| {
                TransportError::ConnectFailed(format!("timed out after {connect_timeout:?}"))
            })??;

        timeout(subscribe_timeout, stream.subscribe(channel))
            .await
            .map_err(|_| TransportError::SubscribeFailed {
                channel: channel.to_string(),
                reason: format!("no acknowledgement within {subscribe_timeout:?}"),
            })??;

        Ok(stream)
    }

    fn transition(&self, next: ConnectionState, update: impl FnOnce(&mut Subscription)) {
        let mut previous = next;
        self.state.send_modify(|sub| {
            previous = sub.state;
            sub.state = next;
            update(sub);
        });

        if previous != next {
            debug!(
                channel = %self.config.channel,
                from = previous.as_str(),
                to = next.as_str(),
                "subscription state changed"
            );
            counter!("listener_state_transitions_total", "state" => next.as_str()).increment(1);
        }
        gauge!("listener_connection_state").set(next.gauge_value());
        gauge!("listener_retry_count").set(f64::from(self.state.borrow().retry_count));
    }
}

async fn receive<T, H>(
    stream: &mut T,
    handler: &H,
    shutdown: &mut watch::Receiver<bool>,
) -> ReceiveOutcome
where
    T: NotificationStream,
    H: NotificationHandler,
{
    loop {
        let next = tokio::select! {
            biased;
            _ = cancelled(shutdown) => return ReceiveOutcome::Cancelled,
            next = stream.next() => next,
        };

        match next {
            Ok(Some(notification)) => {
                counter!("listener_notifications_received_total").increment(1);
                handler.on_notification(notification).await;
            }
            Ok(None) => return ReceiveOutcome::Ended,
            Err(err) => return ReceiveOutcome::Failed(err),
        }
    }
}

/// Resolves once the flag is `true` or every sender is gone.
pub(crate) async fn cancelled(shutdown: &mut watch::Receiver<bool>) {
    loop {
        if *shutdown.borrow_and_update() {
            return;
        }
        if shutdown.changed().await.is_err() {
            return;
        }
    }
}
