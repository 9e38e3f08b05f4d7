//! Persistence contracts implemented by the storage crate.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::model::{ClassifiedEvent, EventKind};

/// Common result alias for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StorageError {
    #[error("database error: {0}")]
    Database(String),
    #[error("stored row is inconsistent: {0}")]
    Corrupt(String),
}

impl StorageError {
    pub fn from_source(err: impl std::fmt::Display) -> Self {
        Self::Database(err.to_string())
    }
}

/// Row shape written for every accepted transfer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewTransfer {
    pub fingerprint: String,
    pub kind: EventKind,
    pub schema: String,
    pub block_number: u64,
    pub token_id: String,
    pub contract_address: String,
    pub quantity: String,
    pub from_address: String,
    pub to_address: String,
    pub tx_hash: String,
    /// Timestamp exactly as it arrived on the wire.
    pub raw_timestamp: String,
    pub occurred_at: Option<DateTime<Utc>>,
}

impl From<&ClassifiedEvent> for NewTransfer {
    fn from(classified: &ClassifiedEvent) -> Self {
        let event = &classified.event;
        Self {
            fingerprint: event.fingerprint(),
            kind: classified.kind,
            schema: event.schema.clone(),
            block_number: event.block_number,
            token_id: event.token_id.clone(),
            contract_address: event.contract_address.to_string(),
            quantity: event.quantity.to_string(),
            from_address: event.from_address.to_string(),
            to_address: event.to_address.to_string(),
            tx_hash: event.tx_hash.clone(),
            raw_timestamp: event.timestamp.to_string(),
            occurred_at: event.timestamp.to_datetime(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferRecord {
    pub fingerprint: String,
    pub kind: EventKind,
    pub schema: String,
    pub block_number: u64,
    pub token_id: String,
    pub contract_address: String,
    pub quantity: String,
    pub from_address: String,
    pub to_address: String,
    pub tx_hash: String,
    pub raw_timestamp: String,
    pub occurred_at: Option<DateTime<Utc>>,
    pub recorded_at: DateTime<Utc>,
}

#[async_trait]
pub trait TransferStore: Send + Sync {
    /// Returns `false` when a row with the same fingerprint already exists.
    async fn insert_transfer(&self, transfer: NewTransfer) -> StorageResult<bool>;
    async fn find_transfer(&self, fingerprint: &str) -> StorageResult<Option<TransferRecord>>;
}

#[async_trait]
pub trait ListenerStateStore: Send + Sync {
    async fn last_block_number(&self) -> StorageResult<Option<u64>>;
    /// Stores `block_number` unless a higher one is already recorded.
    async fn upsert_last_block_number(&self, block_number: u64) -> StorageResult<()>;
}
