//! Per-number lifecycle of an official receipt.
//!
//! ```text
//! available ──issue──▶ issued ──cancel──▶ cancelled
//!     │                  │
//!     └──────void────────┴──────void────▶ voided
//! ```
//!
//! `cancelled` and `voided` are terminal: the number is burned and never reused.
//! `revert` (issued → available) exists only to compensate a payment that
//! failed after its number was issued; nothing else may hand a number back.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::error::DeskError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OrStatus {
    Available,
    /// Held for a pending payment. Issuable like `Available`.
    Reserved,
    Issued,
    Cancelled,
    Voided,
}

impl OrStatus {
    /// Issued, cancelled and voided numbers are spent; they move the cursor.
    pub fn is_consumed(self) -> bool {
        matches!(self, OrStatus::Issued | OrStatus::Cancelled | OrStatus::Voided)
    }

    /// Available and reserved numbers can still be handed out.
    pub fn is_issuable(self) -> bool {
        matches!(self, OrStatus::Available | OrStatus::Reserved)
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, OrStatus::Cancelled | OrStatus::Voided)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            OrStatus::Available => "available",
            OrStatus::Reserved => "reserved",
            OrStatus::Issued => "issued",
            OrStatus::Cancelled => "cancelled",
            OrStatus::Voided => "voided",
        }
    }
}

impl fmt::Display for OrStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OrStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "available" => Ok(OrStatus::Available),
            "reserved" => Ok(OrStatus::Reserved),
            "issued" => Ok(OrStatus::Issued),
            "cancelled" => Ok(OrStatus::Cancelled),
            "voided" => Ok(OrStatus::Voided),
            other => Err(anyhow::anyhow!("invalid OR status value: {other}")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    Issue,
    Cancel,
    Void,
    Revert,
}

impl Transition {
    /// The state table. `None` means the transition is illegal from `from`.
    pub fn target(self, from: OrStatus) -> Option<OrStatus> {
        use OrStatus::*;
        match (self, from) {
            (Transition::Issue, Available | Reserved) => Some(Issued),
            (Transition::Cancel, Issued) => Some(Cancelled),
            (Transition::Void, Available | Reserved | Issued) => Some(Voided),
            (Transition::Revert, Issued) => Some(Available),
            _ => None,
        }
    }

    /// Error for an illegal transition. Issuing a spent number is a conflict
    /// (someone else got it); everything else is a state error.
    pub fn rejection(self, label: &str, from: OrStatus) -> DeskError {
        match self {
            Transition::Issue => DeskError::Conflict(format!("OR {label} is already {from}")),
            Transition::Cancel => {
                DeskError::InvalidState(format!("OR {label} is {from}; only issued numbers can be cancelled"))
            }
            Transition::Void => {
                DeskError::InvalidState(format!("OR {label} is {from}; it can no longer be voided"))
            }
            Transition::Revert => {
                DeskError::InvalidState(format!("OR {label} is {from}; only issued numbers can be reverted"))
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OrItem {
    pub or_number: u64,
    pub status: OrStatus,
    pub payment_id: Option<Uuid>,
    pub issued_at: Option<DateTime<Utc>>,
    pub issued_to: Option<String>,
    pub cancelled_at: Option<DateTime<Utc>>,
    pub cancelled_by: Option<String>,
    pub cancel_reason: Option<String>,
}

impl OrItem {
    pub fn available(or_number: u64) -> Self {
        Self {
            or_number,
            status: OrStatus::Available,
            payment_id: None,
            issued_at: None,
            issued_to: None,
            cancelled_at: None,
            cancelled_by: None,
            cancel_reason: None,
        }
    }

    pub(crate) fn mark_issued(&mut self, payment_id: Option<Uuid>, issued_to: &str, at: DateTime<Utc>) {
        self.status = OrStatus::Issued;
        self.payment_id = payment_id;
        self.issued_to = Some(issued_to.to_string());
        self.issued_at = Some(at);
    }

    /// Stamps the audit trail shared by cancel and void.
    pub(crate) fn mark_retired(&mut self, status: OrStatus, by: &str, reason: &str, at: DateTime<Utc>) {
        self.status = status;
        self.cancelled_at = Some(at);
        self.cancelled_by = Some(by.to_string());
        self.cancel_reason = Some(reason.to_string());
    }

    pub(crate) fn mark_reverted(&mut self) {
        *self = OrItem::available(self.or_number);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALL: [OrStatus; 5] = [
        OrStatus::Available,
        OrStatus::Reserved,
        OrStatus::Issued,
        OrStatus::Cancelled,
        OrStatus::Voided,
    ];

    #[test]
    fn issue_only_from_available_or_reserved() {
        for s in ALL {
            let expected = matches!(s, OrStatus::Available | OrStatus::Reserved);
            assert_eq!(Transition::Issue.target(s).is_some(), expected, "{s}");
        }
    }

    #[test]
    fn cancel_only_from_issued() {
        for s in ALL {
            assert_eq!(Transition::Cancel.target(s).is_some(), s == OrStatus::Issued, "{s}");
        }
    }

    #[test]
    fn void_from_available_and_issued_but_not_terminal() {
        assert_eq!(Transition::Void.target(OrStatus::Available), Some(OrStatus::Voided));
        assert_eq!(Transition::Void.target(OrStatus::Issued), Some(OrStatus::Voided));
        assert_eq!(Transition::Void.target(OrStatus::Cancelled), None);
        assert_eq!(Transition::Void.target(OrStatus::Voided), None);
    }

    #[test]
    fn nothing_leaves_terminal_states() {
        for t in [Transition::Issue, Transition::Cancel, Transition::Void, Transition::Revert] {
            assert_eq!(t.target(OrStatus::Cancelled), None);
            assert_eq!(t.target(OrStatus::Voided), None);
        }
    }

    #[test]
    fn rejection_kinds() {
        assert!(matches!(
            Transition::Issue.rejection("OR-3", OrStatus::Issued),
            DeskError::Conflict(_)
        ));
        assert!(matches!(
            Transition::Cancel.rejection("OR-3", OrStatus::Available),
            DeskError::InvalidState(_)
        ));
    }

    #[test]
    fn status_text_round_trip() {
        for s in ALL {
            assert_eq!(s.as_str().parse::<OrStatus>().unwrap(), s);
        }
        assert!("burned".parse::<OrStatus>().is_err());
    }

    #[test]
    fn revert_clears_stamps() {
        let mut item = OrItem::available(7);
        item.mark_issued(Some(Uuid::new_v4()), "cashier1", Utc::now());
        item.mark_reverted();
        assert_eq!(item, OrItem::available(7));
    }
}
