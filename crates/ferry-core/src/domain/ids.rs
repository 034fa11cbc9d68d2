//! Queue item identifiers.
//!
//! IDs are ULIDs: 128-bit, lexicographically sortable by creation time.
//! `ItemIdGenerator` hands out strictly increasing values even when the clock
//! stands still or steps backwards, so sorting by id preserves enqueue order.

use std::fmt;
use std::str::FromStr;
use std::time::SystemTime;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use ulid::{Generator, Ulid};

const PREFIX: &str = "item-";

/// Identifier of a queued artifact. Unique for the lifetime of a store.
#[repr(transparent)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ItemId(Ulid);

impl ItemId {
    pub fn from_ulid(ulid: Ulid) -> Self {
        Self(ulid)
    }

    pub fn as_ulid(&self) -> Ulid {
        self.0
    }
}

impl From<Ulid> for ItemId {
    fn from(ulid: Ulid) -> Self {
        Self::from_ulid(ulid)
    }
}

impl fmt::Display for ItemId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{PREFIX}{}", self.0)
    }
}

/// Error returned when parsing an `ItemId` from text.
#[derive(Debug, thiserror::Error)]
#[error("invalid item id '{input}': {source}")]
pub struct ParseItemIdError {
    input: String,
    #[source]
    source: ulid::DecodeError,
}

impl FromStr for ItemId {
    type Err = ParseItemIdError;

    /// Accepts both the display form (`item-01H...`) and a bare ULID.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let raw = s.strip_prefix(PREFIX).unwrap_or(s);
        Ulid::from_string(raw)
            .map(ItemId)
            .map_err(|source| ParseItemIdError {
                input: s.to_string(),
                source,
            })
    }
}

/// Monotonic id source, owned by the queue state.
pub struct ItemIdGenerator {
    inner: Generator,
    last: Option<Ulid>,
}

impl ItemIdGenerator {
    pub fn new() -> Self {
        Self {
            inner: Generator::new(),
            last: None,
        }
    }

    /// A generator whose ids all sort after `floor` (the largest id already in
    /// the store), whatever the clock says.
    pub fn starting_after(floor: Option<ItemId>) -> Self {
        Self {
            inner: Generator::new(),
            last: floor.map(|id| id.0),
        }
    }

    /// Next id, timestamped with `at`.
    pub fn next_id(&mut self, at: DateTime<Utc>) -> ItemId {
        let time = SystemTime::from(at);
        let candidate = self
            .inner
            .generate_from_datetime(time)
            // random part overflowed within one millisecond; fall back to a fresh value
            .unwrap_or_else(|_| Ulid::from_datetime(time));

        let ulid = match self.last {
            Some(last) if candidate <= last => last.increment().unwrap_or(candidate),
            _ => candidate,
        };
        self.last = Some(ulid);
        ItemId(ulid)
    }
}

impl Default for ItemIdGenerator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn display_has_prefix_and_parses_back() {
        let id = ItemId::from_ulid(Ulid::new());
        let text = id.to_string();
        assert!(text.starts_with("item-"));

        let parsed: ItemId = text.parse().unwrap();
        assert_eq!(parsed, id);

        let bare: ItemId = id.as_ulid().to_string().parse().unwrap();
        assert_eq!(bare, id);
    }

    #[test]
    fn garbage_is_rejected() {
        let err = "item-not-a-ulid".parse::<ItemId>().unwrap_err();
        assert!(err.to_string().contains("item-not-a-ulid"));
    }

    #[test]
    fn generator_is_monotonic_under_a_frozen_clock() {
        let at = Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap();
        let mut ids = ItemIdGenerator::new();

        let a = ids.next_id(at);
        let b = ids.next_id(at);
        let c = ids.next_id(at);
        assert!(a < b);
        assert!(b < c);
    }

    #[test]
    fn generator_stays_monotonic_when_clock_steps_back() {
        let later = Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap();
        let earlier = Utc.with_ymd_and_hms(2024, 1, 1, 11, 0, 0).unwrap();
        let mut ids = ItemIdGenerator::new();

        let a = ids.next_id(later);
        let b = ids.next_id(earlier);
        assert!(a < b);
    }

    #[test]
    fn seeded_generator_sorts_after_its_floor() {
        let at = Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap();
        let floor = ItemIdGenerator::new().next_id(at);

        let mut ids = ItemIdGenerator::starting_after(Some(floor));
        let same_instant = ids.next_id(at);
        let earlier = ids.next_id(at - chrono::TimeDelta::hours(1));
        assert!(floor < same_instant);
        assert!(same_instant < earlier);
    }

    #[test]
    fn serializes_as_bare_ulid_string() {
        let id = ItemId::from_ulid(Ulid::new());
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, format!("\"{}\"", id.as_ulid()));

        let back: ItemId = serde_json::from_str(&json).unwrap();
        assert_eq!(back, id);
    }
}
