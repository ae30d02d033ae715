//! Confirmation status of a log event.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LogStatus {
    /// Included in a canonical block; the only status that mutates state.
    Confirmed,
    /// Seen in the mempool, not mined yet.
    Pending,
    /// Was confirmed, then its block was orphaned by a reorg.
    Reverted,
    /// Pending transaction that will never be mined.
    Dropped,
    Inactive,
}

impl LogStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogStatus::Confirmed => "CONFIRMED",
            LogStatus::Pending => "PENDING",
            LogStatus::Reverted => "REVERTED",
            LogStatus::Dropped => "DROPPED",
            LogStatus::Inactive => "INACTIVE",
        }
    }

    pub fn is_confirmed(&self) -> bool {
        matches!(self, LogStatus::Confirmed)
    }
}

impl fmt::Display for LogStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LogStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "CONFIRMED" => Ok(LogStatus::Confirmed),
            "PENDING" => Ok(LogStatus::Pending),
            "REVERTED" => Ok(LogStatus::Reverted),
            "DROPPED" => Ok(LogStatus::Dropped),
            "INACTIVE" => Ok(LogStatus::Inactive),
            other => Err(format!("unknown log status: {}", other)),
        }
    }
}
