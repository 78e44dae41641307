use anyhow::Context;
use async_trait::async_trait;
use sqlx::any::AnyRow;
use sqlx::{AnyPool, Row};
use uuid::Uuid;

use crate::db::convert::{
    bool_to_i64, i64_to_u64, opt_ms, parse_decimal, parse_opt_ms, parse_uuid, u64_to_i64,
};
use crate::payment::model::{AllocationLine, Payment, PaymentFilter};
use crate::payment::repository::PaymentRepository;
use crate::time;

/// SQLx-backed implementation of PaymentRepository.
pub struct SqlxPaymentRepository {
    pool: AnyPool,
}

impl SqlxPaymentRepository {
    pub fn new(pool: AnyPool) -> Self {
        Self { pool }
    }

    async fn with_allocation(&self, row: &AnyRow) -> anyhow::Result<Payment> {
        let mut p = row_to_payment(row)?;
        let lines = sqlx::query(
            r#"
SELECT code, description, amount, discount, is_paid_full, credited
FROM payment_allocations
WHERE payment_id = ?
ORDER BY line_no;
"#,
        )
        .bind(p.id.to_string())
        .fetch_all(&self.pool)
        .await?;

        p.allocation = lines
            .iter()
            .map(row_to_line)
            .collect::<anyhow::Result<Vec<_>>>()
            .with_context(|| format!("malformed allocation for payment {}", p.id))?;
        Ok(p)
    }
}

const SELECT_PAYMENT: &str = r#"
SELECT
  payment_id, client_id, payor, batch_code, or_number, kind, total_amount,
  status, payment_ms, notes, entry_by, cancelled_ms, cancelled_by,
  cancel_reason, created_ms
FROM payments
"#;

#[async_trait]
impl PaymentRepository for SqlxPaymentRepository {
    async fn insert(&self, p: &Payment) -> anyhow::Result<()> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
INSERT INTO payments (
  payment_id, client_id, payor, batch_code, or_number, kind, total_amount,
  status, payment_ms, notes, entry_by, cancelled_ms, cancelled_by,
  cancel_reason, created_ms
) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?);
"#,
        )
        .bind(p.id.to_string())
        .bind(&p.client_id)
        .bind(&p.payor)
        .bind(&p.batch_code)
        .bind(u64_to_i64(p.or_number)?)
        .bind(p.kind.as_str())
        .bind(p.total_amount.to_string())
        .bind(p.status.as_str())
        .bind(time::to_ms(&p.payment_date))
        .bind(p.notes.clone())
        .bind(&p.entry_by)
        .bind(opt_ms(p.cancelled_at.as_ref()))
        .bind(p.cancelled_by.clone())
        .bind(p.cancel_reason.clone())
        .bind(time::to_ms(&p.created_at))
        .execute(&mut *tx)
        .await
        .with_context(|| format!("insert payment for OR {} of {}", p.or_number, p.batch_code))?;

        for (i, line) in p.allocation.iter().enumerate() {
            sqlx::query(
                r#"
INSERT INTO payment_allocations (
  payment_id, line_no, code, description, amount, discount, is_paid_full, credited
) VALUES (?, ?, ?, ?, ?, ?, ?, ?);
"#,
            )
            .bind(p.id.to_string())
            .bind(i as i64)
            .bind(&line.code)
            .bind(&line.description)
            .bind(line.amount.to_string())
            .bind(line.discount.to_string())
            .bind(bool_to_i64(line.is_paid_full))
            .bind(bool_to_i64(line.credited))
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn find_by_id(&self, id: &Uuid) -> anyhow::Result<Option<Payment>> {
        let row = sqlx::query(&format!("{SELECT_PAYMENT} WHERE payment_id = ?;"))
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(r) => Ok(Some(self.with_allocation(&r).await?)),
            None => Ok(None),
        }
    }

    async fn find_by_or(&self, batch_code: &str, or_number: u64) -> anyhow::Result<Option<Payment>> {
        let row = sqlx::query(&format!(
            "{SELECT_PAYMENT} WHERE batch_code = ? AND or_number = ?;"
        ))
        .bind(batch_code)
        .bind(u64_to_i64(or_number)?)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(r) => Ok(Some(self.with_allocation(&r).await?)),
            None => Ok(None),
        }
    }

    async fn search(&self, filter: &PaymentFilter) -> anyhow::Result<Vec<Payment>> {
        let rows = sqlx::query(&format!(
            r#"{SELECT_PAYMENT}
WHERE (? IS NULL OR client_id = ?)
  AND (? IS NULL OR batch_code = ?)
  AND (? IS NULL OR status = ?)
ORDER BY created_ms DESC, or_number DESC;"#
        ))
        .bind(filter.client_id.clone())
        .bind(filter.client_id.clone())
        .bind(filter.batch_code.clone())
        .bind(filter.batch_code.clone())
        .bind(filter.status.map(|s| s.as_str()))
        .bind(filter.status.map(|s| s.as_str()))
        .fetch_all(&self.pool)
        .await?;

        let mut out = Vec::with_capacity(rows.len());
        for r in &rows {
            out.push(self.with_allocation(r).await?);
        }
        Ok(out)
    }

    async fn update_details(&self, p: &Payment) -> anyhow::Result<()> {
        let updated = sqlx::query("UPDATE payments SET payor = ?, notes = ? WHERE payment_id = ?;")
            .bind(&p.payor)
            .bind(p.notes.clone())
            .bind(p.id.to_string())
            .execute(&self.pool)
            .await?;

        if updated.rows_affected() != 1 {
            anyhow::bail!("payment {} has no row", p.id);
        }
        Ok(())
    }

    async fn update_status(&self, p: &Payment) -> anyhow::Result<()> {
        let updated = sqlx::query(
            r#"
UPDATE payments
SET status = ?, cancelled_ms = ?, cancelled_by = ?, cancel_reason = ?
WHERE payment_id = ?;
"#,
        )
        .bind(p.status.as_str())
        .bind(opt_ms(p.cancelled_at.as_ref()))
        .bind(p.cancelled_by.clone())
        .bind(p.cancel_reason.clone())
        .bind(p.id.to_string())
        .execute(&self.pool)
        .await?;

        if updated.rows_affected() != 1 {
            anyhow::bail!("payment {} has no row", p.id);
        }
        Ok(())
    }
}

/* =========================
Row mapping
========================= */

fn row_to_payment(r: &AnyRow) -> anyhow::Result<Payment> {
    let id: String = r.try_get("payment_id")?;
    let kind: String = r.try_get("kind")?;
    let status: String = r.try_get("status")?;
    let total: String = r.try_get("total_amount")?;

    Ok(Payment {
        id: parse_uuid(&id)?,
        client_id: r.try_get("client_id")?,
        payor: r.try_get("payor")?,
        batch_code: r.try_get("batch_code")?,
        or_number: i64_to_u64(r.try_get("or_number")?)?,
        kind: kind.parse()?,
        allocation: Vec::new(),
        total_amount: parse_decimal(&total)?,
        status: status.parse()?,
        payment_date: time::from_ms(r.try_get("payment_ms")?)?,
        notes: r.try_get("notes")?,
        entry_by: r.try_get("entry_by")?,
        cancelled_at: parse_opt_ms(r.try_get("cancelled_ms")?)?,
        cancelled_by: r.try_get("cancelled_by")?,
        cancel_reason: r.try_get("cancel_reason")?,
        created_at: time::from_ms(r.try_get("created_ms")?)?,
    })
}

fn row_to_line(r: &AnyRow) -> anyhow::Result<AllocationLine> {
    let amount: String = r.try_get("amount")?;
    let discount: String = r.try_get("discount")?;
    let is_paid_full: i64 = r.try_get("is_paid_full")?;
    let credited: i64 = r.try_get("credited")?;

    Ok(AllocationLine {
        code: r.try_get("code")?,
        description: r.try_get("description")?,
        amount: parse_decimal(&amount)?,
        discount: parse_decimal(&discount)?,
        is_paid_full: is_paid_full != 0,
        credited: credited != 0,
    })
}
