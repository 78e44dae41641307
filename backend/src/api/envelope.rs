use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::error::{DeskError, DeskResult};
use crate::time;

/// Uniform response body: `{success, message, data, timestamp}`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Envelope<T> {
    pub success: bool,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_code: Option<&'static str>,
    pub timestamp: DateTime<Utc>,
}

impl<T> Envelope<T> {
    pub fn ok(message: impl Into<String>, data: T) -> Self {
        Self {
            success: true,
            message: message.into(),
            data: Some(data),
            error_code: None,
            timestamp: time::now(),
        }
    }

    pub fn failed(err: &DeskError) -> Self {
        // Storage failures carry the full context chain.
        let message = match err {
            DeskError::Storage(e) => format!("{e:#}"),
            other => other.to_string(),
        };
        Self {
            success: false,
            message,
            data: None,
            error_code: Some(err.code()),
            timestamp: time::now(),
        }
    }

    pub fn from_result(res: DeskResult<T>, message: impl Into<String>) -> Self {
        match res {
            Ok(data) => Self::ok(message, data),
            Err(e) => Self::failed(&e),
        }
    }

    pub fn into_result(self) -> Result<T, String> {
        match (self.success, self.data) {
            (true, Some(data)) => Ok(data),
            _ => Err(self.message),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn success_serializes_without_error_code() {
        let env = Envelope::ok("done", 5u64);
        let json = serde_json::to_value(&env).unwrap();
        assert_eq!(json["success"], true);
        assert_eq!(json["data"], 5);
        assert!(json.get("errorCode").is_none());
        assert!(json.get("timestamp").is_some());
    }

    #[test]
    fn failure_carries_code_and_message() {
        let err = DeskError::Conflict("range 3-8 overlaps existing batch(es): BATCH-A".into());
        let env: Envelope<()> = Envelope::failed(&err);
        assert!(!env.success);
        assert_eq!(env.error_code, Some("CONFLICT"));
        assert!(env.message.contains("BATCH-A"));
        assert!(env.into_result().is_err());
    }

    #[test]
    fn storage_failure_keeps_context_chain() {
        let err = DeskError::from(anyhow::anyhow!("disk full").context("persist OR OR-3"));
        let env: Envelope<()> = Envelope::failed(&err);
        assert!(env.message.contains("persist OR OR-3"));
        assert!(env.message.contains("disk full"));
    }
}
