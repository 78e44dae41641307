//! Row mapping helpers shared by the sqlx repositories.

use std::str::FromStr;

use anyhow::{Context, anyhow};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use uuid::Uuid;

use crate::time;

pub fn u64_to_i64(v: u64) -> anyhow::Result<i64> {
    if v > i64::MAX as u64 {
        return Err(anyhow!("u64 too large for i64: {v}"));
    }
    Ok(v as i64)
}

pub fn i64_to_u64(v: i64) -> anyhow::Result<u64> {
    if v < 0 {
        return Err(anyhow!("negative i64 where u64 expected: {v}"));
    }
    Ok(v as u64)
}

pub fn parse_uuid(raw: &str) -> anyhow::Result<Uuid> {
    Uuid::parse_str(raw).with_context(|| format!("invalid uuid: {raw}"))
}

pub fn parse_opt_uuid(raw: Option<String>) -> anyhow::Result<Option<Uuid>> {
    raw.as_deref().map(parse_uuid).transpose()
}

/// Money is stored as canonical decimal text; the Any driver has no numeric type.
pub fn parse_decimal(raw: &str) -> anyhow::Result<Decimal> {
    Decimal::from_str(raw).with_context(|| format!("invalid decimal: {raw}"))
}

pub fn opt_ms(t: Option<&DateTime<Utc>>) -> Option<i64> {
    t.map(time::to_ms)
}

pub fn parse_opt_ms(ms: Option<i64>) -> anyhow::Result<Option<DateTime<Utc>>> {
    ms.map(time::from_ms).transpose()
}

pub fn bool_to_i64(v: bool) -> i64 {
    if v { 1 } else { 0 }
}
