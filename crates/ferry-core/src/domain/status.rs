//! Item status state machine.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Delivery status of a queue item.
///
/// State transitions:
/// - Pending -> Processing -> Sent
/// - Pending -> Processing -> Failed -> Processing -> ... (while retry_count < max_retries)
/// - Pending -> Processing -> PermanentlyFailed (retry_count reached max_retries)
///
/// Processing is never legitimately durable: a snapshot holding it comes from
/// an interrupted run and is loaded back as Pending.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemStatus {
    /// Waiting for its first attempt.
    Pending,

    /// Handed to the delivery collaborator.
    Processing,

    /// Delivered.
    Sent,

    /// Last attempt failed; eligible again once `next_retry_at` passes.
    Failed,

    /// Retries exhausted. Needs an operator.
    PermanentlyFailed,
}

impl ItemStatus {
    pub const ALL: [ItemStatus; 5] = [
        ItemStatus::Pending,
        ItemStatus::Processing,
        ItemStatus::Sent,
        ItemStatus::Failed,
        ItemStatus::PermanentlyFailed,
    ];

    /// No further transition is defined.
    pub fn is_terminal(self) -> bool {
        matches!(self, ItemStatus::Sent | ItemStatus::PermanentlyFailed)
    }

    /// May be picked by `get_next_pending` (subject to `next_retry_at`).
    pub fn is_runnable(self) -> bool {
        matches!(self, ItemStatus::Pending | ItemStatus::Failed)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ItemStatus::Pending => "pending",
            ItemStatus::Processing => "processing",
            ItemStatus::Sent => "sent",
            ItemStatus::Failed => "failed",
            ItemStatus::PermanentlyFailed => "permanently_failed",
        }
    }
}

impl fmt::Display for ItemStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, thiserror::Error)]
#[error("unknown item status '{0}'")]
pub struct ParseStatusError(String);

impl std::str::FromStr for ItemStatus {
    type Err = ParseStatusError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_lowercase().replace('-', "_");
        ItemStatus::ALL
            .into_iter()
            .find(|status| status.as_str() == normalized)
            .ok_or_else(|| ParseStatusError(s.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case::pending(ItemStatus::Pending, false, true)]
    #[case::processing(ItemStatus::Processing, false, false)]
    #[case::sent(ItemStatus::Sent, true, false)]
    #[case::failed(ItemStatus::Failed, false, true)]
    #[case::permanently_failed(ItemStatus::PermanentlyFailed, true, false)]
    fn classification(#[case] status: ItemStatus, #[case] terminal: bool, #[case] runnable: bool) {
        assert_eq!(status.is_terminal(), terminal);
        assert_eq!(status.is_runnable(), runnable);
    }

    #[test]
    fn serde_uses_snake_case() {
        let json = serde_json::to_string(&ItemStatus::PermanentlyFailed).unwrap();
        assert_eq!(json, "\"permanently_failed\"");
    }

    #[rstest]
    #[case("pending", ItemStatus::Pending)]
    #[case("Sent", ItemStatus::Sent)]
    #[case("permanently-failed", ItemStatus::PermanentlyFailed)]
    fn parses_operator_input(#[case] input: &str, #[case] expected: ItemStatus) {
        assert_eq!(input.parse::<ItemStatus>().unwrap(), expected);
    }

    #[test]
    fn unknown_status_is_rejected() {
        assert!("uploading".parse::<ItemStatus>().is_err());
    }
}
