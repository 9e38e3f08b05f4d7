use sea_orm::{sea_query::OnConflict, EntityTrait, Set};
use transfer_feed_domain::storage::{ListenerStateStore, StorageError, StorageResult};

use crate::entity::listener_state;
use crate::SeaOrmStorage;

const LAST_BLOCK_KEY: &str = "last_block_number";

#[async_trait::async_trait]
impl ListenerStateStore for SeaOrmStorage {
    async fn last_block_number(&self) -> StorageResult<Option<u64>> {
        let maybe = listener_state::Entity::find_by_id(LAST_BLOCK_KEY.to_string())
            .one(self.connection())
            .await
            .map_err(StorageError::from_source)?;
        maybe
            .map(|model| {
                u64::try_from(model.value_int).map_err(|_| {
                    StorageError::Corrupt(format!("negative block number {}", model.value_int))
                })
            })
            .transpose()
    }

    async fn upsert_last_block_number(&self, block_number: u64) -> StorageResult<()> {
        if let Some(current) = self.last_block_number().await? {
            if current >= block_number {
                return Ok(());
            }
        }

        let value_int = i64::try_from(block_number)
            .map_err(|_| StorageError::Database(format!("block {block_number} exceeds i64")))?;
        let active = listener_state::ActiveModel {
            key: Set(LAST_BLOCK_KEY.to_string()),
            value_int: Set(value_int),
        };
        listener_state::Entity::insert(active)
            .on_conflict(
                OnConflict::column(listener_state::Column::Key)
                    .update_column(listener_state::Column::ValueInt)
                    .to_owned(),
            )
            .exec_without_returning(self.connection())
            .await
            .map_err(StorageError::from_source)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn tracks_highest_block_only() {
        let storage = SeaOrmStorage::connect("sqlite::memory:").await.unwrap();
        assert_eq!(storage.last_block_number().await.unwrap(), None);

        storage.upsert_last_block_number(10).await.unwrap();
        assert_eq!(storage.last_block_number().await.unwrap(), Some(10));

        storage.upsert_last_block_number(7).await.unwrap();
        assert_eq!(storage.last_block_number().await.unwrap(), Some(10));

        storage.upsert_last_block_number(12).await.unwrap();
        assert_eq!(storage.last_block_number().await.unwrap(), Some(12));
    }
}
