use chrono::Utc;
use sea_orm::{sea_query::OnConflict, EntityTrait, Set};
use transfer_feed_domain::model::EventKind;
use transfer_feed_domain::storage::{
    NewTransfer, StorageError, StorageResult, TransferRecord, TransferStore,
};

use crate::entity::transfers;
use crate::SeaOrmStorage;

#[async_trait::async_trait]
impl TransferStore for SeaOrmStorage {
    async fn insert_transfer(&self, transfer: NewTransfer) -> StorageResult<bool> {
        let block_number = i64::try_from(transfer.block_number).map_err(|_| {
            StorageError::Database(format!("block {} exceeds i64", transfer.block_number))
        })?;
        let model = transfers::ActiveModel {
            fingerprint: Set(transfer.fingerprint),
            kind: Set(transfer.kind.as_str().to_string()),
            schema: Set(transfer.schema),
            block_number: Set(block_number),
            token_id: Set(transfer.token_id),
            contract_address: Set(transfer.contract_address),
            quantity: Set(transfer.quantity),
            from_address: Set(transfer.from_address),
            to_address: Set(transfer.to_address),
            tx_hash: Set(transfer.tx_hash),
            raw_timestamp: Set(transfer.raw_timestamp),
            occurred_at: Set(transfer.occurred_at),
            recorded_at: Set(Utc::now()),
        };
        let inserted = transfers::Entity::insert(model)
            .on_conflict(
                OnConflict::column(transfers::Column::Fingerprint)
                    .do_nothing()
                    .to_owned(),
            )
            .exec_without_returning(self.connection())
            .await
            .map_err(StorageError::from_source)?;
        Ok(inserted > 0)
    }

    async fn find_transfer(&self, fingerprint: &str) -> StorageResult<Option<TransferRecord>> {
        let maybe = transfers::Entity::find_by_id(fingerprint.to_string())
            .one(self.connection())
            .await
            .map_err(StorageError::from_source)?;
        maybe.map(transfer_to_record).transpose()
    }
}

fn transfer_to_record(model: transfers::Model) -> StorageResult<TransferRecord> {
    let kind = model
        .kind
        .parse::<EventKind>()
        .map_err(|_| StorageError::Corrupt(format!("unknown event kind `{}`", model.kind)))?;
    let block_number = u64::try_from(model.block_number).map_err(|_| {
        StorageError::Corrupt(format!("negative block number {}", model.block_number))
    })?;

    Ok(TransferRecord {
        fingerprint: model.fingerprint,
        kind,
        schema: model.schema,
        block_number,
        token_id: model.token_id,
        contract_address: model.contract_address,
        quantity: model.quantity,
        from_address: model.from_address,
        to_address: model.to_address,
        tx_hash: model.tx_hash,
        raw_timestamp: model.raw_timestamp,
        occurred_at: model.occurred_at,
        recorded_at: model.recorded_at,
    })
}
