use std::fmt;
use std::str::FromStr;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Which ledger a payment credits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LedgerFamily {
    /// Monthly water billing periods.
    Billing,
    /// Miscellaneous fees (reconnection, meter, penalties).
    Misc,
}

impl LedgerFamily {
    pub fn as_str(self) -> &'static str {
        match self {
            LedgerFamily::Billing => "billing",
            LedgerFamily::Misc => "misc",
        }
    }
}

impl fmt::Display for LedgerFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LedgerFamily {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "billing" => Ok(LedgerFamily::Billing),
            "misc" => Ok(LedgerFamily::Misc),
            other => Err(anyhow::anyhow!("invalid ledger family value: {other}")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LedgerStatus {
    Unpaid,
    Partial,
    Paid,
}

impl LedgerStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            LedgerStatus::Unpaid => "unpaid",
            LedgerStatus::Partial => "partial",
            LedgerStatus::Paid => "paid",
        }
    }
}

impl FromStr for LedgerStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "unpaid" => Ok(LedgerStatus::Unpaid),
            "partial" => Ok(LedgerStatus::Partial),
            "paid" => Ok(LedgerStatus::Paid),
            other => Err(anyhow::anyhow!("invalid ledger status value: {other}")),
        }
    }
}

/// The receipt that last credited a ledger line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReceiptLink {
    pub batch_code: String,
    pub or_number: u64,
    pub payment_id: Uuid,
}

/// Result of a credit: the line after the write and the discount the
/// ledger accepted, which can be lower than the one asked for.
#[derive(Debug, Clone, PartialEq)]
pub struct CreditApplied {
    pub line: LedgerLine,
    pub discount: Decimal,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerLine {
    pub family: LedgerFamily,
    pub code: String,
    pub description: String,
    pub owed: Decimal,
    pub paid: Decimal,
    pub remaining: Decimal,
    pub status: LedgerStatus,
    pub receipt: Option<ReceiptLink>,
}

impl LedgerLine {
    pub fn new(family: LedgerFamily, code: &str, description: &str, owed: Decimal) -> Self {
        let mut line = Self {
            family,
            code: code.to_string(),
            description: description.to_string(),
            owed,
            paid: Decimal::ZERO,
            remaining: owed,
            status: LedgerStatus::Unpaid,
            receipt: None,
        };
        line.settle();
        line
    }

    /// What a credit of `amount`/`discount` actually moves on this line.
    /// Misc fees take no discount.
    pub fn credit_value(&self, amount: Decimal, discount: Decimal) -> Decimal {
        match self.family {
            LedgerFamily::Billing => amount + discount,
            LedgerFamily::Misc => amount,
        }
    }

    /// Discount this line accepts alongside `amount` right now. Billing
    /// discounts stop where `amount + discount` meets the remaining balance.
    pub fn allowed_discount(&self, amount: Decimal, discount: Decimal) -> Decimal {
        match self.family {
            LedgerFamily::Billing if amount + discount > self.remaining => {
                (self.remaining - amount).max(Decimal::ZERO)
            }
            LedgerFamily::Billing => discount,
            LedgerFamily::Misc => Decimal::ZERO,
        }
    }

    /// Clamps `discount` against the current balance, then credits.
    /// Returns the discount actually applied.
    pub fn credit_clamped(
        &mut self,
        amount: Decimal,
        discount: Decimal,
        receipt: &ReceiptLink,
    ) -> Decimal {
        let applied = self.allowed_discount(amount, discount);
        self.credit(amount, applied, receipt);
        applied
    }

    pub fn credit(&mut self, amount: Decimal, discount: Decimal, receipt: &ReceiptLink) {
        self.paid += self.credit_value(amount, discount);
        self.receipt = Some(receipt.clone());
        self.settle();
    }

    pub fn reverse(&mut self, amount: Decimal, discount: Decimal) {
        self.paid = (self.paid - self.credit_value(amount, discount)).max(Decimal::ZERO);
        self.receipt = None;
        self.settle();
    }

    /// Re-derives `remaining` and `status` from `owed` and `paid`.
    fn settle(&mut self) {
        self.remaining = (self.owed - self.paid).max(Decimal::ZERO);
        self.status = match self.family {
            LedgerFamily::Billing if self.remaining.is_zero() => LedgerStatus::Paid,
            LedgerFamily::Billing if self.paid > Decimal::ZERO => LedgerStatus::Partial,
            LedgerFamily::Billing => LedgerStatus::Unpaid,
            LedgerFamily::Misc if self.paid >= self.owed => LedgerStatus::Paid,
            LedgerFamily::Misc => LedgerStatus::Unpaid,
        };
    }
}
