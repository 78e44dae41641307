use anyhow::Result;
use async_trait::async_trait;
use uuid::Uuid;

use crate::payment::model::{Payment, PaymentFilter};

/// Durable storage for payments and their allocation lines.
#[async_trait]
pub trait PaymentRepository: Send + Sync {
    /// Inserts the payment and its allocation lines in one transaction.
    /// Fails if another payment already references the same receipt.
    async fn insert(&self, payment: &Payment) -> Result<()>;

    async fn find_by_id(&self, id: &Uuid) -> Result<Option<Payment>>;

    async fn find_by_or(&self, batch_code: &str, or_number: u64) -> Result<Option<Payment>>;

    /// Newest first.
    async fn search(&self, filter: &PaymentFilter) -> Result<Vec<Payment>>;

    /// Writes payor and notes only.
    async fn update_details(&self, payment: &Payment) -> Result<()>;

    /// Writes status and the cancellation audit fields only.
    async fn update_status(&self, payment: &Payment) -> Result<()>;
}
