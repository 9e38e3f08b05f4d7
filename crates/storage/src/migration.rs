use sea_orm::sea_query::{ColumnDef, Expr, Index, Table, TableCreateStatement};
use sea_orm::{ConnectionTrait, DatabaseBackend, DatabaseConnection};
use transfer_feed_domain::storage::{StorageError, StorageResult};

use crate::entity::{listener_state, transfers};

pub async fn run_migrations(db: &DatabaseConnection) -> StorageResult<()> {
    let backend = db.get_database_backend();

    let transfers_table = Table::create()
        .table(transfers::Entity)
        .col(
            ColumnDef::new(transfers::Column::Fingerprint)
                .string_len(64)
                .not_null()
                .primary_key(),
        )
        .col(ColumnDef::new(transfers::Column::Kind).string_len(16).not_null())
        .col(ColumnDef::new(transfers::Column::Schema).string_len(32).not_null())
        .col(
            ColumnDef::new(transfers::Column::BlockNumber)
                .big_integer()
                .not_null(),
        )
        .col(ColumnDef::new(transfers::Column::TokenId).text().not_null())
        .col(
            ColumnDef::new(transfers::Column::ContractAddress)
                .string_len(42)
                .not_null(),
        )
        .col(ColumnDef::new(transfers::Column::Quantity).text().not_null())
        .col(
            ColumnDef::new(transfers::Column::FromAddress)
                .string_len(42)
                .not_null(),
        )
        .col(
            ColumnDef::new(transfers::Column::ToAddress)
                .string_len(42)
                .not_null(),
        )
        .col(ColumnDef::new(transfers::Column::TxHash).text().not_null())
        .col(
            ColumnDef::new(transfers::Column::RawTimestamp)
                .text()
                .not_null(),
        )
        .col(
            ColumnDef::new(transfers::Column::OccurredAt)
                .timestamp_with_time_zone()
                .null(),
        )
        .col(
            ColumnDef::new(transfers::Column::RecordedAt)
                .timestamp_with_time_zone()
                .not_null()
                .default(Expr::current_timestamp()),
        )
        .to_owned();
    create_table(db, backend, transfers_table).await?;

    let block_index = Index::create()
        .if_not_exists()
        .name("idx_transfers_block_number")
        .table(transfers::Entity)
        .col(transfers::Column::BlockNumber)
        .to_owned();
    db.execute(backend.build(&block_index))
        .await
        .map_err(StorageError::from_source)?;

    let state_table = Table::create()
        .table(listener_state::Entity)
        .col(
            ColumnDef::new(listener_state::Column::Key)
                .string_len(64)
                .not_null()
                .primary_key(),
        )
        .col(
            ColumnDef::new(listener_state::Column::ValueInt)
                .big_integer()
                .not_null(),
        )
        .to_owned();
    create_table(db, backend, state_table).await?;

    Ok(())
}

async fn create_table(
    db: &DatabaseConnection,
    backend: DatabaseBackend,
    mut statement: TableCreateStatement,
) -> StorageResult<()> {
    statement.if_not_exists();
    db.execute(backend.build(&statement))
        .await
        .map_err(StorageError::from_source)?;
    Ok(())
}
