//! Ordered fan-out of classified events to registered handlers.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use futures::FutureExt;
use metrics::{counter, histogram};
use thiserror::Error;
use tracing::{error, warn};
use transfer_feed_domain::model::ClassifiedEvent;

pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Downstream consumer of classified events. Implementations must return in
/// bounded time: the sink enforces no timeout and the next event waits.
#[async_trait]
pub trait EventHandler: Send + Sync {
    /// Stable identifier, unique within one sink.
    fn id(&self) -> &str;

    async fn handle(&self, event: &ClassifiedEvent) -> Result<(), BoxError>;
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HandlerCause {
    #[error("{0}")]
    Failed(String),
    #[error("panicked: {0}")]
    Panicked(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("handler `{handler_id}` failed: {cause}")]
pub struct HandlerError {
    pub handler_id: String,
    pub cause: HandlerCause,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SinkError {
    #[error("a handler with id `{0}` is already registered")]
    DuplicateHandler(String),
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DispatchReport {
    pub delivered: usize,
    pub failures: Vec<HandlerError>,
}

impl DispatchReport {
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }
}

#[derive(Default)]
pub struct DispatchSink {
    handlers: Vec<Arc<dyn EventHandler>>,
}

impl DispatchSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, handler: Arc<dyn EventHandler>) -> Result<(), SinkError> {
        if self.handlers.iter().any(|known| known.id() == handler.id()) {
            return Err(SinkError::DuplicateHandler(handler.id().to_string()));
        }
        self.handlers.push(handler);
        Ok(())
    }

    pub fn handler_ids(&self) -> Vec<&str> {
        self.handlers.iter().map(|handler| handler.id()).collect()
    }

    /// Runs every handler in registration order. Errors and panics are
    /// captured per handler; the remaining handlers still run.
    pub async fn dispatch(&self, event: &ClassifiedEvent) -> DispatchReport {
        let mut report = DispatchReport::default();

        for handler in &self.handlers {
            let handler_id = handler.id().to_string();
            let started = Instant::now();
            let outcome = AssertUnwindSafe(handler.handle(event)).catch_unwind().await;
            histogram!("listener_handler_duration_seconds", "handler" => handler_id.clone())
                .record(started.elapsed().as_secs_f64());

            let cause = match outcome {
                Ok(Ok(())) => {
                    counter!("listener_handler_calls_total", "handler" => handler_id, "result" => "ok")
                        .increment(1);
                    report.delivered += 1;
                    continue;
                }
                Ok(Err(err)) => {
                    warn!(
                        handler = %handler_id,
                        kind = event.kind.as_str(),
                        tx_hash = %event.event.tx_hash,
                        error = %err,
                        "event handler failed"
                    );
                    counter!("listener_handler_calls_total", "handler" => handler_id.clone(), "result" => "error")
                        .increment(1);
                    HandlerCause::Failed(err.to_string())
                }
                Err(panic) => {
                    let message = panic_message(panic.as_ref());
                    error!(
                        handler = %handler_id,
                        kind = event.kind.as_str(),
                        tx_hash = %event.event.tx_hash,
                        panic = %message,
                        "event handler panicked"
                    );
                    counter!("listener_handler_calls_total", "handler" => handler_id.clone(), "result" => "panic")
                        .increment(1);
                    HandlerCause::Panicked(message)
                }
            };

            report.failures.push(HandlerError { handler_id, cause });
        }

        report
    }
}

impl std::fmt::Debug for DispatchSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DispatchSink")
            .field("handlers", &self.handler_ids())
            .finish()
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
