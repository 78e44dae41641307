pub mod api;
pub mod batch;
pub mod config;
pub mod db;
pub mod ledger;
pub mod metrics;
pub mod payment;

pub mod error;
pub mod logger;
pub mod time;
