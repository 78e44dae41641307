use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::batch::model::OrTicket;
use crate::ledger::{LedgerFamily, LedgerLine};

/// `|Σ allocation.amount − total| ≤ AMOUNT_TOLERANCE` for every payment.
pub const AMOUNT_TOLERANCE: Decimal = Decimal::from_parts(1, 0, 0, false, 2);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    Paid,
    /// Tombstone; the record and its cancellation audit stay readable.
    Cancelled,
}

impl PaymentStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            PaymentStatus::Paid => "paid",
            PaymentStatus::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PaymentStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "paid" => Ok(PaymentStatus::Paid),
            "cancelled" => Ok(PaymentStatus::Cancelled),
            other => Err(anyhow::anyhow!("invalid payment status value: {other}")),
        }
    }
}

/// One persisted allocation line.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AllocationLine {
    pub code: String,
    pub description: String,
    pub amount: Decimal,
    /// Discount after server-side clamping.
    pub discount: Decimal,
    pub is_paid_full: bool,
    /// False when the ledger line was missing and the line was skipped.
    pub credited: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Payment {
    pub id: Uuid,
    pub client_id: String,
    pub payor: String,
    pub batch_code: String,
    pub or_number: u64,
    pub kind: LedgerFamily,
    pub allocation: Vec<AllocationLine>,
    pub total_amount: Decimal,
    pub status: PaymentStatus,
    pub payment_date: DateTime<Utc>,
    pub notes: Option<String>,
    pub entry_by: String,

    pub cancelled_at: Option<DateTime<Utc>>,
    pub cancelled_by: Option<String>,
    pub cancel_reason: Option<String>,

    pub created_at: DateTime<Utc>,
}

impl Payment {
    pub fn allocation_sum(&self) -> Decimal {
        self.allocation.iter().map(|l| l.amount).sum()
    }

    pub fn is_balanced(&self) -> bool {
        (self.allocation_sum() - self.total_amount).abs() <= AMOUNT_TOLERANCE
    }

    pub fn credited_lines(&self) -> impl Iterator<Item = &AllocationLine> {
        self.allocation.iter().filter(|l| l.credited)
    }
}

/// A client-submitted allocation line.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AllocationRequest {
    pub code: String,
    #[serde(default)]
    pub description: String,
    pub amount: Decimal,
    #[serde(default)]
    pub discount: Decimal,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewPayment {
    pub client_id: String,
    pub payor: String,
    pub batch_code: String,
    pub or_number: u64,
    pub kind: LedgerFamily,
    pub lines: Vec<AllocationRequest>,
    pub total_amount: Decimal,
    #[serde(default)]
    pub payment_date: Option<DateTime<Utc>>,
    #[serde(default)]
    pub notes: Option<String>,
    pub entry_by: String,
}

/// Metadata edits allowed after a payment is persisted.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PaymentAmendment {
    pub payor: Option<String>,
    pub notes: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SkippedLine {
    pub code: String,
    pub reason: String,
}

/// A discount the server lowered to fit the line's remaining balance.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DiscountAdjustment {
    pub code: String,
    pub requested: Decimal,
    pub applied: Decimal,
}

/// Per-line reconciliation report returned with every created payment.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct AllocationReport {
    pub updated: Vec<String>,
    pub skipped: Vec<SkippedLine>,
    pub adjusted: Vec<DiscountAdjustment>,
}

impl AllocationReport {
    /// Records the discount finally applied to `code`, keeping the
    /// originally requested value when the line was already adjusted.
    pub fn record_adjustment(&mut self, code: &str, requested: Decimal, applied: Decimal) {
        match self.adjusted.iter_mut().find(|a| a.code == code) {
            Some(adj) => adj.applied = applied,
            None => self.adjusted.push(DiscountAdjustment {
                code: code.to_string(),
                requested,
                applied,
            }),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct PaymentOutcome {
    pub payment: Payment,
    pub ticket: OrTicket,
    pub report: AllocationReport,
}

#[derive(Debug, Clone, Serialize)]
pub struct CancellationOutcome {
    pub payment: Payment,
    pub ticket: OrTicket,
    pub reversed: Vec<LedgerLine>,
}

#[derive(Debug, Clone, Default)]
pub struct PaymentFilter {
    pub client_id: Option<String>,
    pub batch_code: Option<String>,
    pub status: Option<PaymentStatus>,
}

impl PaymentFilter {
    pub fn matches(&self, p: &Payment) -> bool {
        self.client_id.as_deref().is_none_or(|c| c == p.client_id)
            && self.batch_code.as_deref().is_none_or(|b| b == p.batch_code)
            && self.status.is_none_or(|s| s == p.status)
    }
}
