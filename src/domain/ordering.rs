//! Total order of log events within one entity's stream.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Position of a log event: `(block_number, log_index, minor_log_index)`.
///
/// `minor_log_index` disambiguates several synthetic events derived from a
/// single log entry (e.g. the income and outcome side of one transfer).
/// Field order matters: the derived `Ord` is lexicographic.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
pub struct OrderKey {
    pub block_number: i64,
    pub log_index: i32,
    pub minor_log_index: i32,
}

impl OrderKey {
    pub fn new(block_number: i64, log_index: i32, minor_log_index: i32) -> Self {
        Self {
            block_number,
            log_index,
            minor_log_index,
        }
    }

    /// Encode as a fixed-width string that sorts the same way as the key.
    ///
    /// Used for resumable task cursors. Only non-negative positions are
    /// produced by the chain, which is what makes zero padding sort correctly.
    pub fn to_cursor(&self) -> String {
        format!(
            "{:020}.{:010}.{:010}",
            self.block_number, self.log_index, self.minor_log_index
        )
    }

    pub fn from_cursor(s: &str) -> Option<Self> {
        let mut parts = s.split('.');
        let block_number = parts.next()?.parse().ok()?;
        let log_index = parts.next()?.parse().ok()?;
        let minor_log_index = parts.next()?.parse().ok()?;
        if parts.next().is_some() {
            return None;
        }
        Some(Self::new(block_number, log_index, minor_log_index))
    }
}

impl fmt::Display for OrderKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{}:{}",
            self.block_number, self.log_index, self.minor_log_index
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_order_is_block_then_log_then_minor() {
        let a = OrderKey::new(1, 5, 9);
        let b = OrderKey::new(2, 0, 0);
        let c = OrderKey::new(2, 0, 1);
        let d = OrderKey::new(2, 1, 0);
        let mut keys = vec![d, c, b, a];
        keys.sort();
        assert_eq!(keys, vec![a, b, c, d]);
    }

    #[test]
    fn test_cursor_parses_back() {
        let key = OrderKey::new(123_456, 7, 2);
        assert_eq!(OrderKey::from_cursor(&key.to_cursor()), Some(key));
        assert_eq!(OrderKey::from_cursor("1.2"), None);
        assert_eq!(OrderKey::from_cursor("1.2.3.4"), None);
    }

    #[test]
    fn test_cursor_sorts_like_key() {
        let a = OrderKey::new(9, 0, 0);
        let b = OrderKey::new(10, 0, 0);
        assert!(a.to_cursor() < b.to_cursor());
    }
}
