//! Built-in event handlers registered by the binary.

use std::sync::Arc;

use async_trait::async_trait;
use metrics::counter;
use tracing::{debug, info};
use transfer_feed_domain::model::ClassifiedEvent;
use transfer_feed_domain::services::RecentTransfers;
use transfer_feed_domain::storage::{ListenerStateStore, NewTransfer, TransferStore};

use crate::sink::{BoxError, EventHandler};

/// Emits one structured log line per event, with the full event as JSON.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogHandler;

impl LogHandler {
    pub const ID: &'static str = "log";
}

#[async_trait]
impl EventHandler for LogHandler {
    fn id(&self) -> &str {
        Self::ID
    }

    async fn handle(&self, classified: &ClassifiedEvent) -> Result<(), BoxError> {
        let event = &classified.event;
        let body = serde_json::to_string(event)?;
        info!(
            kind = classified.kind.as_str(),
            standard = event.token_standard().as_str(),
            block_number = event.block_number,
            contract = %event.contract_address,
            token_id = %event.token_id,
            quantity = %event.quantity,
            from = %event.from_address,
            to = %event.to_address,
            tx_hash = %event.tx_hash,
            body = %body,
            "transfer received"
        );
        Ok(())
    }
}

/// Persists transfers keyed by fingerprint and advances the recorded block
/// high-water mark. Redelivered events are skipped via the recent cache or
/// ignored by the store.
pub struct StoreHandler<S> {
    store: Arc<S>,
    recent: RecentTransfers,
}

impl<S> StoreHandler<S>
where
    S: TransferStore + ListenerStateStore,
{
    pub const ID: &'static str = "store";

    pub fn new(store: Arc<S>) -> Self {
        Self {
            store,
            recent: RecentTransfers::default(),
        }
    }
}

#[async_trait]
impl<S> EventHandler for StoreHandler<S>
where
    S: TransferStore + ListenerStateStore + 'static,
{
    fn id(&self) -> &str {
        Self::ID
    }

    async fn handle(&self, classified: &ClassifiedEvent) -> Result<(), BoxError> {
        let event = &classified.event;
        if self.recent.contains(event) {
            debug!(tx_hash = %event.tx_hash, "skipping recently stored transfer");
            counter!("listener_transfers_stored_total", "result" => "cached").increment(1);
            return Ok(());
        }

        let inserted = self
            .store
            .insert_transfer(NewTransfer::from(classified))
            .await?;
        self.store
            .upsert_last_block_number(event.block_number)
            .await?;
        self.recent.mark(event);

        let result = if inserted { "persisted" } else { "duplicate" };
        counter!("listener_transfers_stored_total", "result" => result).increment(1);
        Ok(())
    }
}
