//! Narrow interface to the payable ledger (billing periods and fees).
//!
//! The desk never touches billing formulas; it only reads a line's balances
//! and asks the ledger to apply or reverse a credit.

pub mod model;
pub mod repository_sqlx;

use anyhow::Result;
use async_trait::async_trait;
use rust_decimal::Decimal;

pub use model::{CreditApplied, LedgerFamily, LedgerLine, LedgerStatus, ReceiptLink};

#[async_trait]
pub trait PayableLedger: Send + Sync {
    async fn find_by_code(&self, family: LedgerFamily, code: &str) -> Result<Option<LedgerLine>>;

    /// Credits `amount + discount` (billing) or `amount` (misc) and stamps the
    /// receipt linkage. Fails if the line does not exist.
    ///
    /// The discount is clamped against the balance seen by the write itself
    /// (see [`LedgerLine::allowed_discount`]), atomically with the credit, so
    /// concurrent payments on one line cannot both take the full discount.
    async fn apply_credit(
        &self,
        family: LedgerFamily,
        code: &str,
        amount: Decimal,
        discount: Decimal,
        receipt: &ReceiptLink,
    ) -> Result<CreditApplied>;

    /// Exact inverse of `apply_credit`; clears the receipt linkage.
    async fn reverse_credit(
        &self,
        family: LedgerFamily,
        code: &str,
        amount: Decimal,
        discount: Decimal,
    ) -> Result<LedgerLine>;
}
