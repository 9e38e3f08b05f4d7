//! Notification feed abstraction and its PostgreSQL `LISTEN` implementation.

use std::fmt;

use async_trait::async_trait;
use sqlx::postgres::PgListener;
use thiserror::Error;
use transfer_feed_domain::model::RawNotification;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransportError {
    #[error("connect failed: {0}")]
    ConnectFailed(String),
    #[error("subscribe to `{channel}` failed: {reason}")]
    SubscribeFailed { channel: String, reason: String },
    #[error("connection lost: {0}")]
    ConnectionLost(String),
}

impl TransportError {
    pub fn label(&self) -> &'static str {
        match self {
            Self::ConnectFailed(_) => "connect_failed",
            Self::SubscribeFailed { .. } => "subscribe_failed",
            Self::ConnectionLost(_) => "connection_lost",
        }
    }
}

/// Something that can open a fresh connection to the notification feed.
/// Every reconnect calls `connect` again.
#[async_trait]
pub trait NotificationSource: Send + Sync {
    type Stream: NotificationStream;

    async fn connect(&self) -> Result<Self::Stream, TransportError>;
}

#[async_trait]
pub trait NotificationStream: Send {
    async fn subscribe(&mut self, channel: &str) -> Result<(), TransportError>;

    /// Errors mean the connection is unusable and must be replaced; the
    /// manager reconnects. `Ok(None)` means the feed is finished for good:
    /// the manager does not reconnect and closes the subscription. Sources
    /// that merely lost their session must report an error instead.
    async fn next(&mut self) -> Result<Option<RawNotification>, TransportError>;
}

pub struct PgNotificationSource {
    database_url: String,
}

impl PgNotificationSource {
    pub fn new(database_url: impl Into<String>) -> Self {
        Self {
            database_url: database_url.into(),
        }
    }
}

impl fmt::Debug for PgNotificationSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PgNotificationSource")
            .field("database_url", &"<redacted>")
            .finish()
    }
}

#[async_trait]
impl NotificationSource for PgNotificationSource {
    type Stream = PgNotificationStream;

    async fn connect(&self) -> Result<Self::Stream, TransportError> {
        let listener = PgListener::connect(&self.database_url)
            .await
            .map_err(|err| TransportError::ConnectFailed(err.to_string()))?;
        Ok(PgNotificationStream { listener })
    }
}

pub struct PgNotificationStream {
    listener: PgListener,
}

#[async_trait]
impl NotificationStream for PgNotificationStream {
    async fn subscribe(&mut self, channel: &str) -> Result<(), TransportError> {
        self.listener
            .listen(channel)
            .await
            .map_err(|err| TransportError::SubscribeFailed {
                channel: channel.to_string(),
                reason: err.to_string(),
            })
    }

    async fn next(&mut self) -> Result<Option<RawNotification>, TransportError> {
        // `try_recv` yields `None` when the server side went away; Postgres
        // never ends a LISTEN session on its own.
        match self.listener.try_recv().await {
            Ok(Some(notification)) => Ok(Some(RawNotification::new(
                notification.channel(),
                notification.payload(),
            ))),
            Ok(None) => Err(TransportError::ConnectionLost(
                "server closed the connection".to_string(),
            )),
            Err(err) => Err(TransportError::ConnectionLost(err.to_string())),
        }
    }
}
