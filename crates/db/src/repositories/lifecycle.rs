use haulr_core::ports::store::{ChangeSet, LifecycleStore, StoreError};

use super::outbox::insert_outbox_entry;
use super::quote::{insert_counter, insert_quote, update_counter_status, update_quote_status};
use super::request::{insert_history, insert_request, update_request};
use super::RepositoryError;
use crate::DbPool;

/// SQLite-backed store. Every [`ChangeSet`] is applied in one transaction;
/// guarded updates that match no row abort it.
#[derive(Clone)]
pub struct SqlLifecycleStore {
    pool: DbPool,
    outbox: bool,
}

impl SqlLifecycleStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool, outbox: false }
    }

    /// Also writes each change set's notifications to `notification_outbox`,
    /// in the same transaction as the state they describe.
    pub fn with_outbox(mut self) -> Self {
        self.outbox = true;
        self
    }

    pub fn pool(&self) -> &DbPool {
        &self.pool
    }

    async fn apply(&self, changes: &ChangeSet) -> Result<(), RepositoryError> {
        let mut tx = self.pool.begin().await?;

        if let Some(request) = &changes.request_insert {
            insert_request(&mut tx, request).await?;
        }
        if let Some(write) = &changes.request_write {
            update_request(&mut tx, write).await?;
        }
        // Closing quotes first frees the open-quote slot for a replacement insert.
        for write in &changes.quote_writes {
            update_quote_status(&mut tx, write).await?;
        }
        for quote in &changes.quote_inserts {
            insert_quote(&mut tx, quote).await?;
        }
        for write in &changes.counter_writes {
            update_counter_status(&mut tx, write).await?;
        }
        for counter in &changes.counter_inserts {
            insert_counter(&mut tx, counter).await?;
        }
        for change in &changes.history {
            insert_history(&mut tx, change).await?;
        }
        if self.outbox {
            for notification in &changes.outbox {
                insert_outbox_entry(&mut tx, notification).await?;
            }
        }

        tx.commit().await?;
        Ok(())
    }
}

#[async_trait::async_trait]
impl LifecycleStore for SqlLifecycleStore {
    async fn commit(&self, changes: ChangeSet) -> Result<(), StoreError> {
        match self.apply(&changes).await {
            Ok(()) => {
                if self.outbox && !changes.outbox.is_empty() {
                    tracing::debug!(
                        event_name = "notification.outbox.enqueued",
                        count = changes.outbox.len(),
                        "notifications written to outbox"
                    );
                }
                Ok(())
            }
            Err(error) => {
                if matches!(error, RepositoryError::Conflict(_)) {
                    tracing::debug!(
                        event_name = "store.commit.conflict",
                        error = %error,
                        "change set guard failed; transaction rolled back"
                    );
                }
                Err(error.into())
            }
        }
    }
}
