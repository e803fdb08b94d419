//! Quote state machine.

use serde::{Deserialize, Serialize};

/// The status of a quote in its lifecycle.
///
/// State transitions:
/// ```text
/// Draft ──► Pending ──┬──► Approved ──► Expired
///   │          │      └──► Rejected
///   └──────────┴──────────────────────► Expired
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum QuoteStatus {
    /// Being prepared; items and terms can change.
    #[default]
    Draft,

    /// Submitted to the customer, awaiting a decision.
    Pending,

    /// Accepted. Can still lapse into Expired.
    Approved,

    /// Declined (terminal state).
    Rejected,

    /// Past its validity (terminal state).
    Expired,
}

impl QuoteStatus {
    /// Returns true if items and terms can be modified in this state.
    pub fn is_editable(&self) -> bool {
        matches!(self, QuoteStatus::Draft)
    }

    pub fn can_submit(&self) -> bool {
        matches!(self, QuoteStatus::Draft)
    }

    pub fn can_decide(&self) -> bool {
        matches!(self, QuoteStatus::Pending)
    }

    pub fn can_expire(&self) -> bool {
        matches!(
            self,
            QuoteStatus::Draft | QuoteStatus::Pending | QuoteStatus::Approved
        )
    }

    pub fn can_extend_validity(&self) -> bool {
        !self.is_terminal()
    }

    /// Returns true if no further transitions are possible.
    pub fn is_terminal(&self) -> bool {
        matches!(self, QuoteStatus::Rejected | QuoteStatus::Expired)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            QuoteStatus::Draft => "Draft",
            QuoteStatus::Pending => "Pending",
            QuoteStatus::Approved => "Approved",
            QuoteStatus::Rejected => "Rejected",
            QuoteStatus::Expired => "Expired",
        }
    }
}

impl std::fmt::Display for QuoteStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_draft_is_editable() {
        assert!(QuoteStatus::Draft.is_editable());
        assert!(!QuoteStatus::Pending.is_editable());
        assert!(!QuoteStatus::Approved.is_editable());
    }

    #[test]
    fn expiry_paths() {
        assert!(QuoteStatus::Draft.can_expire());
        assert!(QuoteStatus::Pending.can_expire());
        assert!(QuoteStatus::Approved.can_expire());
        assert!(!QuoteStatus::Rejected.can_expire());
        assert!(!QuoteStatus::Expired.can_expire());
    }

    #[test]
    fn terminal_states() {
        assert!(QuoteStatus::Rejected.is_terminal());
        assert!(QuoteStatus::Expired.is_terminal());
        assert!(!QuoteStatus::Approved.is_terminal());
        assert!(!QuoteStatus::Approved.can_decide());
        assert!(QuoteStatus::Approved.can_extend_validity());
    }

    #[test]
    fn display() {
        assert_eq!(QuoteStatus::Pending.to_string(), "Pending");
        assert_eq!(QuoteStatus::default(), QuoteStatus::Draft);
    }
}
