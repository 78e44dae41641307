use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};
use rust_decimal::Decimal;

use cashiering::batch::model::BatchStatus;
use cashiering::ledger::LedgerFamily;

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum StatusCli {
    Pending,
    Active,
    Inactive,
    Hold,
}

impl From<StatusCli> for BatchStatus {
    fn from(s: StatusCli) -> Self {
        match s {
            StatusCli::Pending => BatchStatus::Pending,
            StatusCli::Active => BatchStatus::Active,
            StatusCli::Inactive => BatchStatus::Inactive,
            StatusCli::Hold => BatchStatus::Hold,
        }
    }
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum FamilyCli {
    Billing,
    Misc,
}

impl From<FamilyCli> for LedgerFamily {
    fn from(f: FamilyCli) -> Self {
        match f {
            FamilyCli::Billing => LedgerFamily::Billing,
            FamilyCli::Misc => LedgerFamily::Misc,
        }
    }
}

#[derive(Debug, Parser)]
#[clap(name = "cashiering", version)]
pub struct Cli {
    /// Acting user recorded in audit fields
    #[clap(long, env = "CASHIER_USER", default_value = "admin")]
    pub user: String,

    #[clap(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Create tables and exit
    Migrate,

    /// Register a new OR batch
    CreateBatch {
        #[clap(long)]
        code: String,
        #[clap(long, default_value = "OR-")]
        prefix: String,
        #[clap(long)]
        start: u64,
        #[clap(long)]
        end: u64,
        /// Numbers below this were used before registration
        #[clap(long)]
        current: Option<u64>,
        #[clap(long)]
        assigned_to: String,
        #[clap(long, value_enum, default_value = "pending")]
        status: StatusCli,
        #[clap(long)]
        notes: Option<String>,
    },

    /// Set a batch to active
    Activate { code: String },

    /// Change a batch status
    SetStatus {
        code: String,
        #[clap(value_enum)]
        status: StatusCli,
    },

    /// Issue the next available number (of a batch, or of the user's batches)
    Next {
        #[clap(long)]
        batch: Option<String>,
    },

    /// Void a number that must never be used
    Void {
        code: String,
        number: u64,
        #[clap(long)]
        reason: String,
    },

    /// Batch or registry statistics
    Stats { code: Option<String> },

    /// Record a payment from a JSON request file
    Pay { file: PathBuf },

    /// Cancel the payment printed on a receipt and reverse its credits
    CancelPayment {
        code: String,
        number: u64,
        #[clap(long)]
        reason: String,
    },

    /// Insert or replace a payable ledger line
    LedgerSet {
        #[clap(value_enum)]
        family: FamilyCli,
        code: String,
        #[clap(long)]
        owed: Decimal,
        #[clap(long, default_value = "")]
        description: String,
    },
}
