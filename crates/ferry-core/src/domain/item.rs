//! Queue item: the single source of truth for one artifact's delivery state.

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{ItemId, ItemStatus};
use crate::error::QueueError;
use crate::queue::RetryPolicy;

/// Logical grouping key for an artifact (a patient, a job, ...).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OwnerMetadata {
    pub id: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub attributes: BTreeMap<String, String>,
}

impl OwnerMetadata {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: None,
            attributes: BTreeMap::new(),
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }
}

/// A state-changing action on an item. Used in error reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    StartAttempt,
    MarkSent,
    MarkFailed,
    Purge,
}

impl fmt::Display for Transition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Transition::StartAttempt => "start an attempt on",
            Transition::MarkSent => "mark sent",
            Transition::MarkFailed => "mark failed",
            Transition::Purge => "purge",
        };
        f.write_str(name)
    }
}

/// One artifact awaiting (or done with) delivery.
///
/// All state changes go through the methods below; a rejected change leaves
/// the item untouched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueItem {
    pub id: ItemId,
    pub artifact_path: PathBuf,
    pub owner: OwnerMetadata,
    pub enqueued_at: DateTime<Utc>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_attempt_at: Option<DateTime<Utc>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,

    /// Only set while `status == Failed`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_retry_at: Option<DateTime<Utc>>,

    pub status: ItemStatus,

    /// Number of failed attempts. Never decreases.
    #[serde(default)]
    pub retry_count: u32,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

impl QueueItem {
    pub fn new(
        id: ItemId,
        artifact_path: impl Into<PathBuf>,
        owner: OwnerMetadata,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            artifact_path: artifact_path.into(),
            owner,
            enqueued_at: now,
            last_attempt_at: None,
            completed_at: None,
            next_retry_at: None,
            status: ItemStatus::Pending,
            retry_count: 0,
            last_error: None,
        }
    }

    pub fn artifact_path(&self) -> &Path {
        &self.artifact_path
    }

    /// Runnable and past its backoff window.
    pub fn is_eligible(&self, now: DateTime<Utc>) -> bool {
        self.status.is_runnable() && self.next_retry_at.is_none_or(|at| at <= now)
    }

    /// Pending | Failed -> Processing. A failed item must be past its backoff.
    pub fn start_attempt(&mut self, now: DateTime<Utc>) -> Result<(), QueueError> {
        self.ensure(self.is_eligible(now), Transition::StartAttempt)?;
        self.status = ItemStatus::Processing;
        self.last_attempt_at = Some(now);
        self.next_retry_at = None;
        Ok(())
    }

    /// Processing -> Sent.
    pub fn mark_sent(&mut self, now: DateTime<Utc>) -> Result<(), QueueError> {
        self.ensure(self.status == ItemStatus::Processing, Transition::MarkSent)?;
        self.status = ItemStatus::Sent;
        self.completed_at = Some(now);
        self.next_retry_at = None;
        Ok(())
    }

    /// Processing -> Failed (with backoff) or PermanentlyFailed.
    pub fn record_failure(
        &mut self,
        now: DateTime<Utc>,
        error: impl Into<String>,
        policy: &RetryPolicy,
    ) -> Result<(), QueueError> {
        self.ensure(self.status == ItemStatus::Processing, Transition::MarkFailed)?;
        self.retry_count = self.retry_count.saturating_add(1);
        self.last_error = Some(error.into());

        if policy.should_retry(self.retry_count) {
            self.status = ItemStatus::Failed;
            self.next_retry_at = Some(policy.next_retry_at(now, self.retry_count));
        } else {
            self.status = ItemStatus::PermanentlyFailed;
            self.next_retry_at = None;
        }
        Ok(())
    }

    /// Snapshot recovery: an attempt that was in flight when the process died.
    ///
    /// Returns true if the item was reset.
    pub fn recover_interrupted(&mut self) -> bool {
        if self.status != ItemStatus::Processing {
            return false;
        }
        self.status = ItemStatus::Pending;
        self.next_retry_at = None;
        true
    }

    /// Manual removal is allowed once the processor is done with the item.
    pub fn ensure_purgeable(&self) -> Result<(), QueueError> {
        self.ensure(
            matches!(
                self.status,
                ItemStatus::Sent | ItemStatus::Failed | ItemStatus::PermanentlyFailed
            ),
            Transition::Purge,
        )
    }

    /// Sent, and completed before `threshold`.
    pub fn is_sent_before(&self, threshold: DateTime<Utc>) -> bool {
        self.status == ItemStatus::Sent && self.completed_at.unwrap_or(self.enqueued_at) < threshold
    }

    fn ensure(&self, allowed: bool, action: Transition) -> Result<(), QueueError> {
        if allowed {
            Ok(())
        } else {
            Err(QueueError::InvalidTransition {
                id: self.id,
                from: self.status,
                action,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};
    use rstest::rstest;
    use ulid::Ulid;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 9, 0, 0).unwrap()
    }

    fn item() -> QueueItem {
        QueueItem::new(
            ItemId::from_ulid(Ulid::new()),
            "/data/a.dcm",
            OwnerMetadata::new("PAT-1").with_name("Doe^Jane"),
            t0(),
        )
    }

    fn policy() -> RetryPolicy {
        RetryPolicy::new(std::time::Duration::from_secs(5), 3)
    }

    #[test]
    fn new_item_is_pending_and_eligible() {
        let item = item();
        assert_eq!(item.status, ItemStatus::Pending);
        assert_eq!(item.retry_count, 0);
        assert!(item.is_eligible(t0()));
    }

    #[test]
    fn failure_schedules_backoff_and_blocks_eligibility() {
        let mut item = item();
        item.start_attempt(t0()).unwrap();
        item.record_failure(t0(), "timeout", &policy()).unwrap();

        assert_eq!(item.status, ItemStatus::Failed);
        assert_eq!(item.retry_count, 1);
        assert_eq!(item.next_retry_at, Some(t0() + Duration::seconds(5)));
        assert_eq!(item.last_error.as_deref(), Some("timeout"));
        assert!(!item.is_eligible(t0() + Duration::seconds(4)));
        assert!(item.is_eligible(t0() + Duration::seconds(5)));
    }

    #[test]
    fn retry_before_backoff_elapses_is_rejected() {
        let mut item = item();
        item.start_attempt(t0()).unwrap();
        item.record_failure(t0(), "timeout", &policy()).unwrap();

        let early = item.start_attempt(t0() + Duration::seconds(1));
        assert!(matches!(
            early,
            Err(QueueError::InvalidTransition { from: ItemStatus::Failed, .. })
        ));
        assert_eq!(item.status, ItemStatus::Failed);
    }

    #[test]
    fn retry_attempt_clears_next_retry_at() {
        let mut item = item();
        item.start_attempt(t0()).unwrap();
        item.record_failure(t0(), "timeout", &policy()).unwrap();
        item.start_attempt(t0() + Duration::seconds(10)).unwrap();

        assert_eq!(item.status, ItemStatus::Processing);
        assert_eq!(item.next_retry_at, None);
        assert_eq!(item.last_attempt_at, Some(t0() + Duration::seconds(10)));
    }

    #[test]
    fn exhausting_retries_is_terminal() {
        let mut item = item();
        for attempt in 0..3 {
            let now = t0() + Duration::minutes(attempt);
            item.start_attempt(now).unwrap();
            item.record_failure(now, "refused", &policy()).unwrap();
        }
        assert_eq!(item.status, ItemStatus::PermanentlyFailed);
        assert_eq!(item.retry_count, 3);
        assert_eq!(item.next_retry_at, None);
        assert!(!item.is_eligible(t0() + Duration::days(365)));
        assert!(item.start_attempt(t0()).is_err());
    }

    #[rstest]
    #[case::pending(ItemStatus::Pending)]
    #[case::sent(ItemStatus::Sent)]
    #[case::failed(ItemStatus::Failed)]
    #[case::permanently_failed(ItemStatus::PermanentlyFailed)]
    fn completion_requires_processing(#[case] from: ItemStatus) {
        let mut item = item();
        item.status = from;
        let before = item.clone();

        let sent = item.mark_sent(t0());
        assert!(matches!(
            sent,
            Err(QueueError::InvalidTransition { action: Transition::MarkSent, .. })
        ));
        let failed = item.record_failure(t0(), "x", &policy());
        assert!(failed.is_err());
        assert_eq!(item, before);
    }

    #[test]
    fn interrupted_attempt_recovers_to_pending() {
        let mut item = item();
        item.start_attempt(t0()).unwrap();
        assert!(item.recover_interrupted());
        assert_eq!(item.status, ItemStatus::Pending);
        assert_eq!(item.last_attempt_at, Some(t0()));

        assert!(!item.recover_interrupted());
    }

    #[test]
    fn sent_items_age_by_completion_time() {
        let mut item = item();
        item.start_attempt(t0()).unwrap();
        item.mark_sent(t0() + Duration::days(2)).unwrap();

        assert!(!item.is_sent_before(t0() + Duration::days(1)));
        assert!(item.is_sent_before(t0() + Duration::days(3)));
    }

    #[test]
    fn optional_fields_are_omitted_from_json() {
        let json = serde_json::to_value(item()).unwrap();
        assert_eq!(json["status"], "pending");
        assert_eq!(json["artifactPath"], "/data/a.dcm");
        assert_eq!(json["owner"]["name"], "Doe^Jane");
        assert!(json.get("nextRetryAt").is_none());
        assert!(json.get("lastError").is_none());
    }
}
