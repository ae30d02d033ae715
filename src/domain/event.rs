//! Log events: immutable typed facts extracted from chain logs.

use crate::domain::{LogStatus, OrderKey, TimeMs};
use serde::{Deserialize, Serialize};

/// One log event for one entity key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEvent<K, P> {
    /// Log record identifier, stable across status changes of the same log.
    pub id: String,
    pub key: K,
    pub status: LogStatus,
    pub order: OrderKey,
    pub tx_hash: String,
    /// Block timestamp.
    pub timestamp: TimeMs,
    pub payload: P,
}

impl<K, P> LogEvent<K, P> {
    pub fn block_number(&self) -> i64 {
        self.order.block_number
    }
}

impl<K: Clone, P: Clone> LogEvent<K, P> {
    /// The same log observed with a different status (e.g. after a reorg).
    pub fn with_status(&self, status: LogStatus) -> Self {
        Self {
            status,
            ..self.clone()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_with_status_keeps_identity() {
        let event = LogEvent {
            id: "log-1".to_string(),
            key: "k".to_string(),
            status: LogStatus::Confirmed,
            order: OrderKey::new(3, 1, 0),
            tx_hash: "0xabc".to_string(),
            timestamp: TimeMs::new(1000),
            payload: 10u32,
        };
        let reverted = event.with_status(LogStatus::Reverted);
        assert_eq!(reverted.status, LogStatus::Reverted);
        assert_eq!(reverted.id, event.id);
        assert_eq!(reverted.order, event.order);
        assert_eq!(reverted.block_number(), 3);
    }
}
