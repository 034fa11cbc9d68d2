//! Domain model (ids, items, status, stats, events).

pub mod events;
pub mod ids;
pub mod item;
pub mod stats;
pub mod status;

pub use events::{ItemEvent, ItemEventKind};
pub use ids::{ItemId, ItemIdGenerator, ParseItemIdError};
pub use item::{OwnerMetadata, QueueItem, Transition};
pub use stats::QueueStats;
pub use status::{ItemStatus, ParseStatusError};
