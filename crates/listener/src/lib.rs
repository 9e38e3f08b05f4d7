//! Postgres `LISTEN` consumer for token-transfer notifications: connection
//! management, parsing and classification, bounded hand-off to an ordered
//! handler sink, and the supervisor tying them together.

pub mod backoff;
pub mod error;
pub mod handlers;
pub mod pipeline;
pub mod sink;
pub mod source;
pub mod subscription;
pub mod supervisor;

#[cfg(test)]
mod test_support;

pub use backoff::Backoff;
pub use error::ListenerError;
pub use handlers::{LogHandler, StoreHandler};
pub use pipeline::{process_notification, Pipeline, PipelineOutcome};
pub use sink::{BoxError, DispatchReport, DispatchSink, EventHandler, HandlerError, SinkError};
pub use source::{NotificationSource, NotificationStream, PgNotificationSource, TransportError};
pub use subscription::{
    ConnectionState, NotificationHandler, Subscription, SubscriptionConfig, SubscriptionManager,
};
pub use supervisor::{
    ShutdownOutcome, ShutdownReport, Supervisor, SupervisorConfig, SupervisorError,
    SupervisorHandle,
};
