use anyhow::Context;
use async_trait::async_trait;
use rust_decimal::Decimal;
use sqlx::any::AnyRow;
use sqlx::{AnyPool, Row};
use tracing::debug;

use crate::db::convert::{i64_to_u64, parse_decimal, parse_opt_uuid, u64_to_i64};
use crate::ledger::model::{CreditApplied, LedgerFamily, LedgerLine, ReceiptLink};
use crate::ledger::PayableLedger;
use crate::time;

/// Ledger adapter over the `ledger_lines` table.
///
/// Credits are optimistic read-modify-write: the update only lands if `paid`
/// still holds the value that was read, otherwise the line is re-read and the
/// change recomputed. The balance arithmetic lives on [`LedgerLine`].
pub struct SqlxPayableLedger {
    pool: AnyPool,
}

impl SqlxPayableLedger {
    pub fn new(pool: AnyPool) -> Self {
        Self { pool }
    }

    /// Inserts or replaces a ledger line. Used when billing publishes new
    /// periods or fees.
    pub async fn upsert_line(&self, line: &LedgerLine) -> anyhow::Result<()> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM ledger_lines WHERE family = ? AND code = ?;")
            .bind(line.family.as_str())
            .bind(&line.code)
            .execute(&mut *tx)
            .await?;
        sqlx::query(
            r#"
INSERT INTO ledger_lines (
  family, code, description, owed, paid, remaining, status,
  receipt_batch_code, receipt_or_number, receipt_payment_id, updated_ms
) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?);
"#,
        )
        .bind(line.family.as_str())
        .bind(&line.code)
        .bind(&line.description)
        .bind(line.owed.to_string())
        .bind(line.paid.to_string())
        .bind(line.remaining.to_string())
        .bind(line.status.as_str())
        .bind(line.receipt.as_ref().map(|r| r.batch_code.clone()))
        .bind(
            line.receipt
                .as_ref()
                .map(|r| u64_to_i64(r.or_number))
                .transpose()?,
        )
        .bind(line.receipt.as_ref().map(|r| r.payment_id.to_string()))
        .bind(time::to_ms(&time::now()))
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;
        Ok(())
    }

    /// Loads, mutates and conditionally writes back one line, retrying when
    /// another writer got there first.
    async fn modify<R: Send>(
        &self,
        family: LedgerFamily,
        code: &str,
        f: impl Fn(&mut LedgerLine) -> R + Send + Sync,
    ) -> anyhow::Result<(LedgerLine, R)> {
        for attempt in 1..=MAX_WRITE_ATTEMPTS {
            let row = sqlx::query(SELECT_LINE)
                .bind(family.as_str())
                .bind(code)
                .fetch_optional(&self.pool)
                .await?;
            let Some(row) = row else {
                anyhow::bail!("ledger line {family}/{code} not found");
            };
            let seen_paid: String = row.try_get("paid")?;
            let mut line = row_to_line(&row)?;

            let out = f(&mut line);
            if write_if_unchanged(&self.pool, &line, &seen_paid).await? {
                return Ok((line, out));
            }
            debug!(%family, code, attempt, "ledger line changed during update; retrying");
        }
        anyhow::bail!(
            "ledger line {family}/{code} kept changing; gave up after {MAX_WRITE_ATTEMPTS} attempts"
        )
    }
}

const MAX_WRITE_ATTEMPTS: usize = 5;

const SELECT_LINE: &str = r#"
SELECT
  family, code, description, owed, paid, remaining, status,
  receipt_batch_code, receipt_or_number, receipt_payment_id
FROM ledger_lines
WHERE family = ? AND code = ?;
"#;

#[async_trait]
impl PayableLedger for SqlxPayableLedger {
    async fn find_by_code(
        &self,
        family: LedgerFamily,
        code: &str,
    ) -> anyhow::Result<Option<LedgerLine>> {
        let row = sqlx::query(SELECT_LINE)
            .bind(family.as_str())
            .bind(code)
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(row_to_line).transpose()
    }

    async fn apply_credit(
        &self,
        family: LedgerFamily,
        code: &str,
        amount: Decimal,
        discount: Decimal,
        receipt: &ReceiptLink,
    ) -> anyhow::Result<CreditApplied> {
        let (line, discount) = self
            .modify(family, code, |l| l.credit_clamped(amount, discount, receipt))
            .await
            .with_context(|| format!("apply credit to {family}/{code}"))?;
        Ok(CreditApplied { line, discount })
    }

    async fn reverse_credit(
        &self,
        family: LedgerFamily,
        code: &str,
        amount: Decimal,
        discount: Decimal,
    ) -> anyhow::Result<LedgerLine> {
        let (line, ()) = self
            .modify(family, code, |l| l.reverse(amount, discount))
            .await
            .with_context(|| format!("reverse credit on {family}/{code}"))?;
        Ok(line)
    }
}

/// Writes the new balances only if `paid` is still `seen_paid`. Returns
/// whether the row was updated.
async fn write_if_unchanged(
    pool: &AnyPool,
    line: &LedgerLine,
    seen_paid: &str,
) -> anyhow::Result<bool> {
    let (batch_code, or_number, payment_id) = match &line.receipt {
        Some(r) => (
            Some(r.batch_code.clone()),
            Some(u64_to_i64(r.or_number)?),
            Some(r.payment_id.to_string()),
        ),
        None => (None, None, None),
    };

    let res = sqlx::query(
        r#"
UPDATE ledger_lines
SET paid = ?, remaining = ?, status = ?,
    receipt_batch_code = ?, receipt_or_number = ?, receipt_payment_id = ?,
    updated_ms = ?
WHERE family = ? AND code = ? AND paid = ?;
"#,
    )
    .bind(line.paid.to_string())
    .bind(line.remaining.to_string())
    .bind(line.status.as_str())
    .bind(batch_code)
    .bind(or_number)
    .bind(payment_id)
    .bind(time::to_ms(&time::now()))
    .bind(line.family.as_str())
    .bind(&line.code)
    .bind(seen_paid)
    .execute(pool)
    .await?;
    Ok(res.rows_affected() == 1)
}

fn row_to_line(r: &AnyRow) -> anyhow::Result<LedgerLine> {
    let family: String = r.try_get("family")?;
    let status: String = r.try_get("status")?;
    let owed: String = r.try_get("owed")?;
    let paid: String = r.try_get("paid")?;
    let remaining: String = r.try_get("remaining")?;

    let batch_code: Option<String> = r.try_get("receipt_batch_code")?;
    let or_number: Option<i64> = r.try_get("receipt_or_number")?;
    let payment_id = parse_opt_uuid(r.try_get("receipt_payment_id")?)?;

    let receipt = match (batch_code, or_number, payment_id) {
        (Some(batch_code), Some(n), Some(payment_id)) => Some(ReceiptLink {
            batch_code,
            or_number: i64_to_u64(n)?,
            payment_id,
        }),
        _ => None,
    };

    Ok(LedgerLine {
        family: family.parse()?,
        code: r.try_get("code")?,
        description: r.try_get("description")?,
        owed: parse_decimal(&owed)?,
        paid: parse_decimal(&paid)?,
        remaining: parse_decimal(&remaining)?,
        status: status.parse()?,
        receipt,
    })
}
