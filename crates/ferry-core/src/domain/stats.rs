use serde::{Deserialize, Serialize};

use super::ItemStatus;

/// Point-in-time item counts per status.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueStats {
    pub total: usize,
    pub pending: usize,
    pub processing: usize,
    pub sent: usize,
    pub failed: usize,
    pub permanently_failed: usize,
}

impl QueueStats {
    pub fn record(&mut self, status: ItemStatus) {
        self.total += 1;
        match status {
            ItemStatus::Pending => self.pending += 1,
            ItemStatus::Processing => self.processing += 1,
            ItemStatus::Sent => self.sent += 1,
            ItemStatus::Failed => self.failed += 1,
            ItemStatus::PermanentlyFailed => self.permanently_failed += 1,
        }
    }
}

impl FromIterator<ItemStatus> for QueueStats {
    fn from_iter<I: IntoIterator<Item = ItemStatus>>(iter: I) -> Self {
        let mut stats = QueueStats::default();
        for status in iter {
            stats.record(status);
        }
        stats
    }
}
