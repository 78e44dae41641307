use anyhow::Context;
use async_trait::async_trait;
use sqlx::any::AnyRow;
use sqlx::{Any, AnyPool, Row, Transaction};
use uuid::Uuid;

use crate::batch::item::OrItem;
use crate::batch::model::{Batch, UsageEntry};
use crate::batch::repository::BatchRepository;
use crate::db::convert::{
    i64_to_u64, opt_ms, parse_opt_ms, parse_opt_uuid, parse_uuid, u64_to_i64,
};
use crate::time;

/// SQLx-backed implementation of BatchRepository.
/// Responsible only for persistence and row mapping.
pub struct SqlxBatchRepository {
    pool: AnyPool,
}

impl SqlxBatchRepository {
    pub fn new(pool: AnyPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl BatchRepository for SqlxBatchRepository {
    async fn load_all(&self) -> anyhow::Result<Vec<Batch>> {
        let headers = sqlx::query(
            r#"
SELECT
  batch_id, code, prefix, start_number, end_number, current_number,
  status, assigned_to, entry_by, notes, created_ms, updated_ms
FROM or_batches
ORDER BY start_number;
"#,
        )
        .fetch_all(&self.pool)
        .await?;

        let mut out = Vec::with_capacity(headers.len());
        for h in headers {
            let mut batch = row_to_batch(&h)?;
            let id = batch.id.to_string();

            let items = sqlx::query(
                r#"
SELECT
  or_number, status, payment_id, issued_ms, issued_to,
  cancelled_ms, cancelled_by, cancel_reason
FROM or_items
WHERE batch_id = ?
ORDER BY or_number;
"#,
            )
            .bind(&id)
            .fetch_all(&self.pool)
            .await?;
            batch.items = items
                .iter()
                .map(row_to_item)
                .collect::<anyhow::Result<Vec<_>>>()
                .with_context(|| format!("malformed items for batch {}", batch.code))?;

            let expected = batch.end_number - batch.start_number + 1;
            if batch.items.len() as u64 != expected {
                anyhow::bail!(
                    "batch {} has {} items, expected {}",
                    batch.code,
                    batch.items.len(),
                    expected
                );
            }

            let log = sqlx::query(
                r#"
SELECT seq, or_number, action, payment_id, actor, note, at_ms
FROM or_usage_log
WHERE batch_id = ?
ORDER BY seq;
"#,
            )
            .bind(&id)
            .fetch_all(&self.pool)
            .await?;
            batch.usage_log = log
                .iter()
                .map(row_to_usage)
                .collect::<anyhow::Result<Vec<_>>>()
                .with_context(|| format!("malformed usage log for batch {}", batch.code))?;

            out.push(batch);
        }

        Ok(out)
    }

    async fn insert_batch(&self, batch: &Batch) -> anyhow::Result<()> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
INSERT INTO or_batches (
  batch_id, code, prefix, start_number, end_number, current_number,
  status, assigned_to, entry_by, notes, created_ms, updated_ms
) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?);
"#,
        )
        .bind(batch.id.to_string())
        .bind(&batch.code)
        .bind(&batch.prefix)
        .bind(u64_to_i64(batch.start_number)?)
        .bind(u64_to_i64(batch.end_number)?)
        .bind(u64_to_i64(batch.current_number)?)
        .bind(batch.status.as_str())
        .bind(&batch.assigned_to)
        .bind(&batch.entry_by)
        .bind(batch.notes.clone())
        .bind(time::to_ms(&batch.created_at))
        .bind(time::to_ms(&batch.updated_at))
        .execute(&mut *tx)
        .await
        .with_context(|| format!("insert batch {}", batch.code))?;

        for item in &batch.items {
            insert_item(&mut tx, &batch.id, item).await?;
        }

        for entry in &batch.usage_log {
            insert_usage(&mut tx, &batch.id, entry).await?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn save_transition(
        &self,
        batch: &Batch,
        item: &OrItem,
        entry: &UsageEntry,
    ) -> anyhow::Result<()> {
        let mut tx = self.pool.begin().await?;

        update_header(&mut tx, batch).await?;

        let updated = sqlx::query(
            r#"
UPDATE or_items
SET status = ?, payment_id = ?, issued_ms = ?, issued_to = ?,
    cancelled_ms = ?, cancelled_by = ?, cancel_reason = ?
WHERE batch_id = ? AND or_number = ?;
"#,
        )
        .bind(item.status.as_str())
        .bind(item.payment_id.map(|p| p.to_string()))
        .bind(opt_ms(item.issued_at.as_ref()))
        .bind(item.issued_to.clone())
        .bind(opt_ms(item.cancelled_at.as_ref()))
        .bind(item.cancelled_by.clone())
        .bind(item.cancel_reason.clone())
        .bind(batch.id.to_string())
        .bind(u64_to_i64(item.or_number)?)
        .execute(&mut *tx)
        .await?;

        if updated.rows_affected() != 1 {
            anyhow::bail!("OR {} of batch {} has no row", item.or_number, batch.code);
        }

        insert_usage(&mut tx, &batch.id, entry).await?;

        tx.commit().await?;
        Ok(())
    }

    async fn save_header(&self, batch: &Batch) -> anyhow::Result<()> {
        let mut tx = self.pool.begin().await?;
        update_header(&mut tx, batch).await?;
        tx.commit().await?;
        Ok(())
    }

    async fn delete_batch(&self, batch_id: &Uuid) -> anyhow::Result<()> {
        let id = batch_id.to_string();
        let mut tx = self.pool.begin().await?;

        for stmt in [
            "DELETE FROM or_usage_log WHERE batch_id = ?;",
            "DELETE FROM or_items WHERE batch_id = ?;",
            "DELETE FROM or_batches WHERE batch_id = ?;",
        ] {
            sqlx::query(stmt).bind(&id).execute(&mut *tx).await?;
        }

        tx.commit().await?;
        Ok(())
    }
}

async fn update_header(tx: &mut Transaction<'_, Any>, batch: &Batch) -> anyhow::Result<()> {
    let updated = sqlx::query(
        r#"
UPDATE or_batches
SET current_number = ?, status = ?, notes = ?, updated_ms = ?
WHERE batch_id = ?;
"#,
    )
    .bind(u64_to_i64(batch.current_number)?)
    .bind(batch.status.as_str())
    .bind(batch.notes.clone())
    .bind(time::to_ms(&batch.updated_at))
    .bind(batch.id.to_string())
    .execute(&mut **tx)
    .await?;

    if updated.rows_affected() != 1 {
        anyhow::bail!("batch {} has no row", batch.code);
    }
    Ok(())
}

async fn insert_item(
    tx: &mut Transaction<'_, Any>,
    batch_id: &Uuid,
    item: &OrItem,
) -> anyhow::Result<()> {
    sqlx::query(
        r#"
INSERT INTO or_items (
  batch_id, or_number, status, payment_id, issued_ms, issued_to,
  cancelled_ms, cancelled_by, cancel_reason
) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?);
"#,
    )
    .bind(batch_id.to_string())
    .bind(u64_to_i64(item.or_number)?)
    .bind(item.status.as_str())
    .bind(item.payment_id.map(|p| p.to_string()))
    .bind(opt_ms(item.issued_at.as_ref()))
    .bind(item.issued_to.clone())
    .bind(opt_ms(item.cancelled_at.as_ref()))
    .bind(item.cancelled_by.clone())
    .bind(item.cancel_reason.clone())
    .execute(&mut **tx)
    .await?;
    Ok(())
}

async fn insert_usage(
    tx: &mut Transaction<'_, Any>,
    batch_id: &Uuid,
    entry: &UsageEntry,
) -> anyhow::Result<()> {
    sqlx::query(
        r#"
INSERT INTO or_usage_log (
  batch_id, seq, or_number, action, payment_id, actor, note, at_ms
) VALUES (?, ?, ?, ?, ?, ?, ?, ?);
"#,
    )
    .bind(batch_id.to_string())
    .bind(u64_to_i64(entry.seq)?)
    .bind(u64_to_i64(entry.or_number)?)
    .bind(entry.action.as_str())
    .bind(entry.payment_id.map(|p| p.to_string()))
    .bind(&entry.actor)
    .bind(entry.note.clone())
    .bind(time::to_ms(&entry.at))
    .execute(&mut **tx)
    .await?;
    Ok(())
}

/* =========================
Row mapping
========================= */

fn row_to_batch(r: &AnyRow) -> anyhow::Result<Batch> {
    let id_str: String = r.try_get("batch_id")?;
    let status: String = r.try_get("status")?;

    Ok(Batch {
        id: parse_uuid(&id_str)?,
        code: r.try_get("code")?,
        prefix: r.try_get("prefix")?,
        start_number: i64_to_u64(r.try_get("start_number")?)?,
        end_number: i64_to_u64(r.try_get("end_number")?)?,
        current_number: i64_to_u64(r.try_get("current_number")?)?,
        status: status.parse()?,
        assigned_to: r.try_get("assigned_to")?,
        entry_by: r.try_get("entry_by")?,
        items: Vec::new(),
        usage_log: Vec::new(),
        notes: r.try_get("notes")?,
        created_at: time::from_ms(r.try_get("created_ms")?)?,
        updated_at: time::from_ms(r.try_get("updated_ms")?)?,
    })
}

fn row_to_item(r: &AnyRow) -> anyhow::Result<OrItem> {
    let status: String = r.try_get("status")?;

    Ok(OrItem {
        or_number: i64_to_u64(r.try_get("or_number")?)?,
        status: status.parse()?,
        payment_id: parse_opt_uuid(r.try_get("payment_id")?)?,
        issued_at: parse_opt_ms(r.try_get("issued_ms")?)?,
        issued_to: r.try_get("issued_to")?,
        cancelled_at: parse_opt_ms(r.try_get("cancelled_ms")?)?,
        cancelled_by: r.try_get("cancelled_by")?,
        cancel_reason: r.try_get("cancel_reason")?,
    })
}

fn row_to_usage(r: &AnyRow) -> anyhow::Result<UsageEntry> {
    let action: String = r.try_get("action")?;

    Ok(UsageEntry {
        seq: i64_to_u64(r.try_get("seq")?)?,
        or_number: i64_to_u64(r.try_get("or_number")?)?,
        action: action.parse()?,
        payment_id: parse_opt_uuid(r.try_get("payment_id")?)?,
        actor: r.try_get("actor")?,
        note: r.try_get("note")?,
        at: time::from_ms(r.try_get("at_ms")?)?,
    })
}
