//! Wires the subscription manager to the dispatch sink through a bounded
//! queue and owns the shutdown sequence.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use metrics::{counter, gauge};
use thiserror::Error;
use tokio::sync::{mpsc, watch};
use tokio::task::{JoinError, JoinHandle};
use tracing::{info, warn};
use transfer_feed_domain::config::ListenerConfig;
use transfer_feed_domain::model::ClassifiedEvent;

use crate::backoff::Backoff;
use crate::pipeline::Pipeline;
use crate::sink::DispatchSink;
use crate::source::NotificationSource;
use crate::subscription::{ConnectionState, Subscription, SubscriptionConfig, SubscriptionManager};

#[derive(Debug, Clone)]
pub struct SupervisorConfig {
    pub subscription: SubscriptionConfig,
    pub shutdown_timeout: Duration,
    pub queue_capacity: usize,
}

impl SupervisorConfig {
    pub fn new(channel: impl Into<String>) -> Self {
        Self {
            subscription: SubscriptionConfig::new(channel),
            shutdown_timeout: Duration::from_secs(10),
            queue_capacity: 256,
        }
    }
}

impl From<&ListenerConfig> for SupervisorConfig {
    fn from(config: &ListenerConfig) -> Self {
        Self {
            subscription: SubscriptionConfig {
                channel: config.channel().to_string(),
                backoff: Backoff::new(config.backoff_base(), config.backoff_max()),
                connect_timeout: config.connect_timeout(),
                subscribe_timeout: config.subscribe_timeout(),
            },
            shutdown_timeout: config.shutdown_timeout(),
            queue_capacity: config.queue_capacity(),
        }
    }
}

#[derive(Debug, Error)]
pub enum SupervisorError {
    #[error("subscription task failed: {0}")]
    Subscription(#[source] JoinError),
    #[error("dispatch task failed: {0}")]
    Dispatch(#[source] JoinError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownOutcome {
    Graceful,
    /// The drain deadline passed and the remaining tasks were aborted.
    Forced,
}

#[derive(Debug, Default)]
struct DispatchCounters {
    dispatched: AtomicU64,
    handler_failures: AtomicU64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DispatchStats {
    pub dispatched: u64,
    pub handler_failures: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShutdownReport {
    pub outcome: ShutdownOutcome,
    pub subscription: Subscription,
    pub stats: DispatchStats,
}

pub struct Supervisor<S> {
    source: S,
    sink: DispatchSink,
    config: SupervisorConfig,
}

impl<S> Supervisor<S>
where
    S: NotificationSource + 'static,
{
    pub fn new(source: S, sink: DispatchSink, config: SupervisorConfig) -> Self {
        Self {
            source,
            sink,
            config,
        }
    }

    /// Spawns the dispatch worker first, then the subscription manager.
    pub fn start(self) -> SupervisorHandle {
        let (queue_tx, queue_rx) = mpsc::channel(self.config.queue_capacity.max(1));
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let counters = Arc::new(DispatchCounters::default());

        info!(
            channel = %self.config.subscription.channel,
            handlers = ?self.sink.handler_ids(),
            queue_capacity = self.config.queue_capacity,
            "starting supervisor"
        );

        let worker = tokio::spawn(run_dispatch(self.sink, queue_rx, counters.clone()));

        let manager = SubscriptionManager::new(self.source, self.config.subscription);
        let state = manager.watch();
        let publisher = manager.publisher();
        let subscription = tokio::spawn(manager.run(Pipeline::new(queue_tx), shutdown_rx));

        SupervisorHandle {
            shutdown: shutdown_tx,
            state,
            publisher,
            subscription,
            worker,
            counters,
            shutdown_timeout: self.config.shutdown_timeout,
        }
    }
}

async fn run_dispatch(
    sink: DispatchSink,
    mut queue: mpsc::Receiver<ClassifiedEvent>,
    counters: Arc<DispatchCounters>,
) {
    while let Some(event) = queue.recv().await {
        gauge!("listener_queue_depth").set(queue.len() as f64);
        let report = sink.dispatch(&event).await;
        counters.dispatched.fetch_add(1, Ordering::Relaxed);
        if !report.is_clean() {
            counters
                .handler_failures
                .fetch_add(report.failures.len() as u64, Ordering::Relaxed);
        }
        counter!("listener_events_dispatched_total", "kind" => event.kind.as_str()).increment(1);
    }
    info!("dispatch queue drained");
}

pub struct SupervisorHandle {
    shutdown: watch::Sender<bool>,
    state: watch::Receiver<Subscription>,
    publisher: Arc<watch::Sender<Subscription>>,
    subscription: JoinHandle<Subscription>,
    worker: JoinHandle<()>,
    counters: Arc<DispatchCounters>,
    shutdown_timeout: Duration,
}

impl SupervisorHandle {
    pub fn state(&self) -> watch::Receiver<Subscription> {
        self.state.clone()
    }

    pub fn stats(&self) -> DispatchStats {
        DispatchStats {
            dispatched: self.counters.dispatched.load(Ordering::Relaxed),
            handler_failures: self.counters.handler_failures.load(Ordering::Relaxed),
        }
    }

    /// Resolves once the subscription reaches `Closed` on its own, e.g. when
    /// the feed ends.
    pub async fn closed(&self) {
        let mut state = self.state.clone();
        let _ = state
            .wait_for(|sub| sub.state == ConnectionState::Closed)
            .await;
    }

    /// Signals cancellation, then waits up to the configured timeout for the
    /// subscription to close and the queue to drain. Past the deadline both
    /// tasks are aborted, `Closed` is published to state watchers and the
    /// outcome is `Forced`.
    pub async fn shutdown(self) -> Result<ShutdownReport, SupervisorError> {
        let Self {
            shutdown,
            publisher,
            mut subscription,
            mut worker,
            counters,
            shutdown_timeout,
            ..
        } = self;

        info!(timeout_ms = shutdown_timeout.as_millis() as u64, "shutdown requested");
        // Fails only when the manager already exited.
        let _ = shutdown.send(true);

        let drained = tokio::time::timeout(shutdown_timeout, async {
            let closed = (&mut subscription).await;
            let drained = (&mut worker).await;
            (closed, drained)
        })
        .await;

        let stats = DispatchStats {
            dispatched: counters.dispatched.load(Ordering::Relaxed),
            handler_failures: counters.handler_failures.load(Ordering::Relaxed),
        };

        match drained {
            Ok((closed, drained)) => {
                let last = closed.map_err(SupervisorError::Subscription)?;
                drained.map_err(SupervisorError::Dispatch)?;
                info!(
                    dispatched = stats.dispatched,
                    handler_failures = stats.handler_failures,
                    "supervisor stopped"
                );
                Ok(ShutdownReport {
                    outcome: ShutdownOutcome::Graceful,
                    subscription: last,
                    stats,
                })
            }
            Err(_) => {
                subscription.abort();
                worker.abort();
                counter!("listener_forced_shutdowns_total").increment(1);
                warn!(
                    timeout_ms = shutdown_timeout.as_millis() as u64,
                    dispatched = stats.dispatched,
                    "shutdown deadline passed, aborting tasks"
                );
                // The aborted manager never got to publish its final state.
                publisher.send_modify(|sub| sub.state = ConnectionState::Closed);
                gauge!("listener_connection_state").set(ConnectionState::Closed.gauge_value());
                let last = publisher.borrow().clone();
                Ok(ShutdownReport {
                    outcome: ShutdownOutcome::Forced,
                    subscription: last,
                    stats,
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sink::{BoxError, EventHandler};
    use crate::test_support::{eventually, payload, ScriptedSource, Session, Step};
    use async_trait::async_trait;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Mutex;
    use tokio::sync::Semaphore;
    use transfer_feed_domain::model::EventKind;

    fn fast_config(queue_capacity: usize, shutdown_timeout: Duration) -> SupervisorConfig {
        let mut config = SupervisorConfig::new(crate::test_support::CHANNEL);
        config.subscription.backoff =
            Backoff::new(Duration::from_millis(1), Duration::from_millis(2)).with_jitter(0.0);
        config.queue_capacity = queue_capacity;
        config.shutdown_timeout = shutdown_timeout;
        config
    }

    struct Journal {
        id: &'static str,
        entries: Arc<Mutex<Vec<(&'static str, String)>>>,
        fail_on: Option<&'static str>,
    }

    #[async_trait]
    impl EventHandler for Journal {
        fn id(&self) -> &str {
            self.id
        }

        async fn handle(&self, event: &ClassifiedEvent) -> Result<(), BoxError> {
            if self.fail_on == Some(event.event.token_id.as_str()) {
                return Err("rejected".into());
            }
            // Yield so a broken sink would get a chance to interleave events.
            tokio::task::yield_now().await;
            self.entries
                .lock()
                .unwrap()
                .push((self.id, event.event.token_id.clone()));
            Ok(())
        }
    }

    /// Waits for a permit per event; counts events it has seen.
    struct Gated {
        permits: Arc<Semaphore>,
        seen: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl EventHandler for Gated {
        fn id(&self) -> &str {
            "gated"
        }

        async fn handle(&self, _event: &ClassifiedEvent) -> Result<(), BoxError> {
            self.permits.acquire().await?.forget();
            self.seen.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[tokio::test]
    async fn handlers_observe_events_in_order_without_interleaving() {
        let mut steps: Vec<Step> = (0..20).map(|n| Step::Notify(payload(n))).collect();
        steps.insert(5, Step::Notify("not|a|transfer".into()));
        steps.push(Step::End);
        let source = ScriptedSource::new(vec![Session::steps(steps)]);

        let entries = Arc::new(Mutex::new(Vec::new()));
        let mut sink = DispatchSink::new();
        for (id, fail_on) in [("a", Some("7")), ("b", None)] {
            sink.register(Arc::new(Journal {
                id,
                entries: entries.clone(),
                fail_on,
            }))
            .unwrap();
        }

        let handle =
            Supervisor::new(source, sink, fast_config(2, Duration::from_secs(5))).start();
        handle.closed().await;
        let report = handle.shutdown().await.unwrap();

        assert_eq!(report.outcome, ShutdownOutcome::Graceful);
        assert_eq!(report.subscription.state, ConnectionState::Closed);
        assert_eq!(report.stats.dispatched, 20);
        assert_eq!(report.stats.handler_failures, 1);

        let mut expected = Vec::new();
        for n in 0..20 {
            if n != 7 {
                expected.push(("a", n.to_string()));
            }
            expected.push(("b", n.to_string()));
        }
        assert_eq!(*entries.lock().unwrap(), expected);
    }

    #[tokio::test]
    async fn slow_sink_applies_backpressure_without_dropping() {
        let steps = (0..6).map(|n| Step::Notify(payload(n))).collect();
        let source = ScriptedSource::new(vec![Session::steps(steps)]);
        let permits = Arc::new(Semaphore::new(0));
        let seen = Arc::new(AtomicUsize::new(0));

        let mut sink = DispatchSink::new();
        sink.register(Arc::new(Gated {
            permits: permits.clone(),
            seen: seen.clone(),
        }))
        .unwrap();

        let handle =
            Supervisor::new(source, sink, fast_config(1, Duration::from_secs(5))).start();

        permits.add_permits(1);
        eventually(|| seen.load(Ordering::SeqCst) == 1).await;
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(seen.load(Ordering::SeqCst), 1);

        permits.add_permits(5);
        eventually(|| seen.load(Ordering::SeqCst) == 6).await;

        let report = handle.shutdown().await.unwrap();
        assert_eq!(report.outcome, ShutdownOutcome::Graceful);
        assert_eq!(report.stats.dispatched, 6);
    }

    #[tokio::test]
    async fn shutdown_drains_queued_events() {
        let steps = (0..4).map(|n| Step::Notify(payload(n))).collect();
        let source = ScriptedSource::new(vec![Session::steps(steps)]);
        let permits = Arc::new(Semaphore::new(0));
        let seen = Arc::new(AtomicUsize::new(0));

        let mut sink = DispatchSink::new();
        sink.register(Arc::new(Gated {
            permits: permits.clone(),
            seen: seen.clone(),
        }))
        .unwrap();

        let handle =
            Supervisor::new(source, sink, fast_config(8, Duration::from_secs(5))).start();
        let mut state = handle.state();
        state
            .wait_for(|sub| sub.state == ConnectionState::Subscribed)
            .await
            .unwrap();

        permits.add_permits(4);
        let report = handle.shutdown().await.unwrap();
        assert_eq!(report.outcome, ShutdownOutcome::Graceful);
        assert_eq!(report.subscription.state, ConnectionState::Closed);
        assert_eq!(seen.load(Ordering::SeqCst), report.stats.dispatched as usize);
    }

    #[tokio::test]
    async fn stuck_handler_forces_shutdown_after_timeout() {
        // One event held by the handler, one queued, one blocking the manager.
        let source = ScriptedSource::new(vec![Session::steps(vec![
            Step::Notify(payload(1)),
            Step::Notify(payload(2)),
            Step::Notify(payload(3)),
        ])]);
        let permits = Arc::new(Semaphore::new(0));
        let seen = Arc::new(AtomicUsize::new(0));

        let mut sink = DispatchSink::new();
        sink.register(Arc::new(Gated {
            permits,
            seen: seen.clone(),
        }))
        .unwrap();

        let handle =
            Supervisor::new(source, sink, fast_config(1, Duration::from_millis(100))).start();
        let mut state = handle.state();
        state
            .wait_for(|sub| sub.state == ConnectionState::Subscribed)
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;

        let report = handle.shutdown().await.unwrap();
        assert_eq!(report.outcome, ShutdownOutcome::Forced);
        assert_eq!(report.subscription.state, ConnectionState::Closed);
        assert_eq!(report.stats.dispatched, 0);
        assert_eq!(seen.load(Ordering::SeqCst), 0);
        assert_eq!(state.borrow().state, ConnectionState::Closed);
    }

    #[tokio::test]
    async fn mint_and_burn_flow_through_to_handlers() {
        let zero = "0x0000000000000000000000000000000000000000";
        let mint = payload(1).replacen("0xaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa", zero, 1);
        let burn = payload(2).replacen("0xbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbb", zero, 1);
        let source = ScriptedSource::new(vec![Session::steps(vec![
            Step::Notify(mint),
            Step::Notify(burn),
            Step::End,
        ])]);

        struct Kinds(Arc<Mutex<Vec<EventKind>>>);

        #[async_trait]
        impl EventHandler for Kinds {
            fn id(&self) -> &str {
                "kinds"
            }

            async fn handle(&self, event: &ClassifiedEvent) -> Result<(), BoxError> {
                self.0.lock().unwrap().push(event.kind);
                Ok(())
            }
        }

        let kinds = Arc::new(Mutex::new(Vec::new()));
        let mut sink = DispatchSink::new();
        sink.register(Arc::new(Kinds(kinds.clone()))).unwrap();

        let handle =
            Supervisor::new(source, sink, fast_config(4, Duration::from_secs(5))).start();
        handle.closed().await;
        handle.shutdown().await.unwrap();

        assert_eq!(*kinds.lock().unwrap(), vec![EventKind::Mint, EventKind::Burn]);
    }
}
