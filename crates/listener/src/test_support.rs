//! Scripted feed and recording helpers shared by the async tests.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use transfer_feed_domain::model::RawNotification;

use crate::source::{NotificationSource, NotificationStream, TransportError};

pub const CHANNEL: &str = "transfers";

pub fn payload(token_id: u32) -> String {
    format!(
        "erc721|{}|{token_id}|0xcccccccccccccccccccccccccccccccccccccccc|1|\
         0xaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa|\
         0xbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbb|0xtx{token_id}|1700000000",
        100 + token_id
    )
}

#[derive(Debug, Clone)]
pub enum Step {
    Notify(String),
    Fail(TransportError),
    End,
}

/// One connection's worth of behavior. A stream whose steps run out hangs
/// like an idle LISTEN session.
#[derive(Debug, Clone, Default)]
pub struct Session {
    pub connect_error: Option<TransportError>,
    pub subscribe_error: Option<TransportError>,
    /// `connect` never resolves.
    pub stall_connect: bool,
    /// `subscribe` never acknowledges.
    pub stall_subscribe: bool,
    pub steps: Vec<Step>,
}

impl Session {
    pub fn steps(steps: Vec<Step>) -> Self {
        Self {
            steps,
            ..Self::default()
        }
    }

    pub fn refused() -> Self {
        Self {
            connect_error: Some(TransportError::ConnectFailed("refused".into())),
            ..Self::default()
        }
    }

    pub fn stalled_connect() -> Self {
        Self {
            stall_connect: true,
            ..Self::default()
        }
    }

    pub fn stalled_subscribe() -> Self {
        Self {
            stall_subscribe: true,
            ..Self::default()
        }
    }
}

#[derive(Clone, Default)]
pub struct ScriptedSource {
    sessions: Arc<Mutex<VecDeque<Session>>>,
    pub connects: Arc<AtomicUsize>,
}

impl ScriptedSource {
    pub fn new(sessions: Vec<Session>) -> Self {
        Self {
            sessions: Arc::new(Mutex::new(sessions.into())),
            connects: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn connect_count(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl NotificationSource for ScriptedSource {
    type Stream = ScriptedStream;

    async fn connect(&self) -> Result<ScriptedStream, TransportError> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        let session = self.sessions.lock().unwrap().pop_front().unwrap_or_default();
        if session.stall_connect {
            std::future::pending::<()>().await;
        }
        if let Some(err) = session.connect_error {
            return Err(err);
        }
        Ok(ScriptedStream {
            subscribe_error: session.subscribe_error,
            stall_subscribe: session.stall_subscribe,
            steps: session.steps.into(),
        })
    }
}

pub struct ScriptedStream {
    subscribe_error: Option<TransportError>,
    stall_subscribe: bool,
    steps: VecDeque<Step>,
}

#[async_trait]
impl NotificationStream for ScriptedStream {
    async fn subscribe(&mut self, _channel: &str) -> Result<(), TransportError> {
        if self.stall_subscribe {
            std::future::pending::<()>().await;
        }
        match self.subscribe_error.take() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    async fn next(&mut self) -> Result<Option<RawNotification>, TransportError> {
        match self.steps.pop_front() {
            Some(Step::Notify(payload)) => Ok(Some(RawNotification::new(CHANNEL, payload))),
            Some(Step::Fail(err)) => Err(err),
            Some(Step::End) => Ok(None),
            None => std::future::pending().await,
        }
    }
}

/// Polls `check` until it holds or a generous deadline passes.
pub async fn eventually(mut check: impl FnMut() -> bool) {
    let waited = tokio::time::timeout(Duration::from_secs(5), async {
        while !check() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await;
    assert!(waited.is_ok(), "condition not reached in time");
}
