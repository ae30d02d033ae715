//! Materialized entity state plus its progress watermark.

use crate::domain::OrderKey;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Highest block number incorporated into a snapshot.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct Mark(pub i64);

impl Mark {
    /// Sentinel for a snapshot that has not seen any event.
    pub const MIN: Mark = Mark(i64::MIN);

    pub fn as_i64(&self) -> i64 {
        self.0
    }
}

impl Default for Mark {
    fn default() -> Self {
        Mark::MIN
    }
}

impl fmt::Display for Mark {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if *self == Mark::MIN {
            f.write_str("MIN")
        } else {
            write!(f, "{}", self.0)
        }
    }
}

/// Entity state for one key together with how far into its stream it got.
///
/// `mark` is advanced on every processed event, including ones that leave
/// `data` untouched. `last_order` is the exact position of the newest
/// processed event; staleness is judged against it so that several events of
/// the same block fold without tripping over each other.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot<K, D> {
    pub key: K,
    pub data: D,
    pub mark: Mark,
    pub last_order: Option<OrderKey>,
}

impl<K, D> Snapshot<K, D> {
    pub fn initial(key: K, data: D) -> Self {
        Self {
            key,
            data,
            mark: Mark::MIN,
            last_order: None,
        }
    }

    /// True when `order` is at or behind the newest incorporated event.
    pub fn is_stale(&self, order: &OrderKey) -> bool {
        self.last_order.is_some_and(|last| *order <= last)
    }

    /// Move the watermark forward to `order`. Never moves it backwards.
    pub fn advance(&mut self, order: OrderKey) {
        self.mark = self.mark.max(Mark(order.block_number));
        self.last_order = Some(self.last_order.map_or(order, |last| last.max(order)));
    }
}
