use anyhow::Result;
use async_trait::async_trait;
use uuid::Uuid;

use crate::batch::item::OrItem;
use crate::batch::model::{Batch, UsageEntry};

/// Durable storage for batches, their items and usage logs.
#[async_trait]
pub trait BatchRepository: Send + Sync {
    /// Every batch with its full item list and usage log, ordered by start.
    async fn load_all(&self) -> Result<Vec<Batch>>;

    /// Inserts the header and all items in one transaction.
    async fn insert_batch(&self, batch: &Batch) -> Result<()>;

    /// Persists one item transition: header (cursor, status), the item row and
    /// the appended log entry, atomically.
    async fn save_transition(&self, batch: &Batch, item: &OrItem, entry: &UsageEntry) -> Result<()>;

    /// Persists header-only changes (status, notes).
    async fn save_header(&self, batch: &Batch) -> Result<()>;

    async fn delete_batch(&self, batch_id: &Uuid) -> Result<()>;
}
