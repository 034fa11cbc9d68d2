//! Status-change notifications.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{ItemId, ItemStatus, QueueItem};

/// Emitted on enqueue and after every applied transition or purge.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ItemEvent {
    pub id: ItemId,
    pub kind: ItemEventKind,
    pub status: ItemStatus,
    pub retry_count: u32,
    pub message: Option<String>,
    pub at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemEventKind {
    Enqueued,
    StatusChanged,
    Removed,
}

impl ItemEvent {
    pub fn from_item(kind: ItemEventKind, item: &QueueItem, at: DateTime<Utc>) -> Self {
        Self {
            id: item.id,
            kind,
            status: item.status,
            retry_count: item.retry_count,
            message: item.last_error.clone(),
            at,
        }
    }
}
