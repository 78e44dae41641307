use sqlx::AnyPool;

const STATEMENTS: &[&str] = &[
    // Batches
    r#"
CREATE TABLE IF NOT EXISTS or_batches (
  batch_id TEXT PRIMARY KEY,
  code TEXT NOT NULL UNIQUE,
  prefix TEXT NOT NULL,
  start_number BIGINT NOT NULL,
  end_number BIGINT NOT NULL,
  current_number BIGINT NOT NULL,
  status TEXT NOT NULL,
  assigned_to TEXT NOT NULL,
  entry_by TEXT NOT NULL,
  notes TEXT,
  created_ms BIGINT NOT NULL,
  updated_ms BIGINT NOT NULL,
  CHECK (start_number <= end_number),
  CHECK (current_number >= start_number AND current_number <= end_number + 1)
);
"#,
    // One row per number
    r#"
CREATE TABLE IF NOT EXISTS or_items (
  batch_id TEXT NOT NULL,
  or_number BIGINT NOT NULL,
  status TEXT NOT NULL,
  payment_id TEXT,
  issued_ms BIGINT,
  issued_to TEXT,
  cancelled_ms BIGINT,
  cancelled_by TEXT,
  cancel_reason TEXT,
  PRIMARY KEY (batch_id, or_number)
);
"#,
    // Append-only usage log
    r#"
CREATE TABLE IF NOT EXISTS or_usage_log (
  batch_id TEXT NOT NULL,
  seq BIGINT NOT NULL,
  or_number BIGINT NOT NULL,
  action TEXT NOT NULL,
  payment_id TEXT,
  actor TEXT NOT NULL,
  note TEXT,
  at_ms BIGINT NOT NULL,
  PRIMARY KEY (batch_id, seq)
);
"#,
    // Payments; a receipt number is referenced by at most one payment
    r#"
CREATE TABLE IF NOT EXISTS payments (
  payment_id TEXT PRIMARY KEY,
  client_id TEXT NOT NULL,
  payor TEXT NOT NULL,
  batch_code TEXT NOT NULL,
  or_number BIGINT NOT NULL,
  kind TEXT NOT NULL,
  total_amount TEXT NOT NULL,
  status TEXT NOT NULL,
  payment_ms BIGINT NOT NULL,
  notes TEXT,
  entry_by TEXT NOT NULL,
  cancelled_ms BIGINT,
  cancelled_by TEXT,
  cancel_reason TEXT,
  created_ms BIGINT NOT NULL,
  UNIQUE (batch_code, or_number)
);
"#,
    r#"
CREATE TABLE IF NOT EXISTS payment_allocations (
  payment_id TEXT NOT NULL,
  line_no BIGINT NOT NULL,
  code TEXT NOT NULL,
  description TEXT NOT NULL,
  amount TEXT NOT NULL,
  discount TEXT NOT NULL,
  is_paid_full INTEGER NOT NULL CHECK (is_paid_full IN (0,1)),
  credited INTEGER NOT NULL CHECK (credited IN (0,1)),
  PRIMARY KEY (payment_id, line_no)
);
"#,
    // Payable ledger (billing periods and miscellaneous fees)
    r#"
CREATE TABLE IF NOT EXISTS ledger_lines (
  family TEXT NOT NULL,
  code TEXT NOT NULL,
  description TEXT NOT NULL,
  owed TEXT NOT NULL,
  paid TEXT NOT NULL,
  remaining TEXT NOT NULL,
  status TEXT NOT NULL,
  receipt_batch_code TEXT,
  receipt_or_number BIGINT,
  receipt_payment_id TEXT,
  updated_ms BIGINT NOT NULL,
  PRIMARY KEY (family, code)
);
"#,
    r#"CREATE INDEX IF NOT EXISTS idx_or_batches_assigned ON or_batches(assigned_to);"#,
    r#"CREATE INDEX IF NOT EXISTS idx_payment_allocations_code ON payment_allocations(code);"#,
    r#"CREATE INDEX IF NOT EXISTS idx_payments_client ON payments(client_id);"#,
];

pub async fn migrate(pool: &AnyPool) -> anyhow::Result<()> {
    for stmt in STATEMENTS {
        sqlx::query(stmt).execute(pool).await?;
    }
    Ok(())
}
