use std::path::PathBuf;

use thiserror::Error;

use crate::domain::{ItemId, ItemStatus, Transition};

/// Snapshot persistence failures.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("snapshot i/o failed at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("snapshot encoding failed: {0}")]
    Json(#[from] serde_json::Error),

    #[error("queue store {path} is in use by another process")]
    Locked { path: PathBuf },

    #[error("unsupported snapshot version {found} (expected {expected})")]
    UnsupportedVersion { found: u32, expected: u32 },
}

impl StoreError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        StoreError::Io {
            path: path.into(),
            source,
        }
    }
}

#[derive(Debug, Error)]
pub enum QueueError {
    #[error("item not found: {0}")]
    ItemNotFound(ItemId),

    #[error("cannot {action} item {id} while {from}")]
    InvalidTransition {
        id: ItemId,
        from: ItemStatus,
        action: Transition,
    },

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("background task failed: {0}")]
    Background(String),
}
