mod cli;

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use serde::Serialize;

use cashiering::{
    api::{CashierDesk, Envelope},
    batch::{model::BatchStatus, model::NewBatch, registry::BatchRegistry},
    batch::repository_sqlx::SqlxBatchRepository,
    config::AppConfig,
    db::Db,
    ledger::{LedgerLine, repository_sqlx::SqlxPayableLedger},
    metrics::counters::Counters,
    payment::{model::NewPayment, repository_sqlx::SqlxPaymentRepository},
};
use cli::{Cli, Command};

/// Connects, migrates and restores the registry from storage.
async fn init_desk(db: &Db, cfg: &AppConfig) -> anyhow::Result<CashierDesk> {
    let slow = Duration::from_millis(cfg.slow_storage_ms);

    let registry = Arc::new(
        BatchRegistry::new(
            Arc::new(SqlxBatchRepository::new(db.pool.clone())),
            Counters::default(),
        )
        .with_limits(cfg.max_batch_size, slow),
    );
    registry.restore().await?;

    Ok(CashierDesk::new(
        registry,
        Arc::new(SqlxPayableLedger::new(db.pool.clone())),
        Arc::new(SqlxPaymentRepository::new(db.pool.clone())),
        slow,
    ))
}

/// Prints the envelope as JSON; a failed envelope becomes a non-zero exit.
fn emit<T: Serialize>(env: Envelope<T>) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(&env)?);
    if !env.success {
        anyhow::bail!("{}", env.message);
    }
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let cfg = AppConfig::from_env();

    common::logger::init_logger("cashiering", cfg.json_logs);

    let db = Db::connect(&cfg.database_url, cfg.db_max_connections)
        .await
        .with_context(|| format!("connect to {}", cfg.database_url))?;
    db.migrate().await?;

    if matches!(cli.command, Command::Migrate) {
        tracing::info!("schema up to date");
        return Ok(());
    }

    let desk = init_desk(&db, &cfg).await?;
    let user = cli.user;

    match cli.command {
        Command::Migrate => Ok(()),

        Command::CreateBatch {
            code,
            prefix,
            start,
            end,
            current,
            assigned_to,
            status,
            notes,
        } => {
            let req = NewBatch {
                code,
                prefix,
                start,
                end,
                current,
                assigned_to,
                entry_by: user,
                status: status.into(),
                notes,
            };
            emit(desk.create_batch(req).await)
        }

        Command::Activate { code } => {
            emit(desk.update_batch_status(&code, BatchStatus::Active).await)
        }

        Command::SetStatus { code, status } => {
            emit(desk.update_batch_status(&code, status.into()).await)
        }

        Command::Next { batch: Some(code) } => emit(desk.issue_next(&code, &user).await),
        Command::Next { batch: None } => emit(desk.issue_next_for(&user).await),

        Command::Void {
            code,
            number,
            reason,
        } => emit(desk.void_or(&code, number, &reason, &user).await),

        Command::Stats { code: Some(code) } => emit(desk.get_batch(&code).await),
        Command::Stats { code: None } => {
            emit(desk.statistics().await)?;
            println!("{}", serde_json::to_string_pretty(&desk.counters())?);
            Ok(())
        }

        Command::Pay { file } => {
            let raw = tokio::fs::read_to_string(&file)
                .await
                .with_context(|| format!("read {}", file.display()))?;
            let req: NewPayment = serde_json::from_str(&raw)
                .with_context(|| format!("parse payment request {}", file.display()))?;
            emit(desk.create_payment(req).await)
        }

        Command::CancelPayment {
            code,
            number,
            reason,
        } => emit(desk.cancel_payment(&code, number, &reason, &user).await),

        Command::LedgerSet {
            family,
            code,
            owed,
            description,
        } => {
            let ledger = SqlxPayableLedger::new(db.pool.clone());
            let line = LedgerLine::new(family.into(), &code, &description, owed);
            ledger.upsert_line(&line).await?;
            emit(Envelope::ok("ledger line saved", line))
        }
    }
}
