use crate::domain::{
    Balance, BalanceId, BalanceKind, BalancePayload, EventOf, LogEvent, LogStatus,
};

use super::compaction::net_balance_compensation;
use super::{EntityReducer, EventInverter, ReduceError};

/// Additive balance arithmetic over the fungible token log.
#[derive(Debug, Clone, Copy, Default)]
pub struct BalanceReducer;

impl EntityReducer for BalanceReducer {
    type Kind = BalanceKind;

    fn initial_data(&self, key: &BalanceId) -> Balance {
        Balance::empty(key)
    }

    fn apply(
        &self,
        mut balance: Balance,
        event: &EventOf<BalanceKind>,
    ) -> Result<Balance, ReduceError> {
        let Some(delta) = event.payload.signed_delta() else {
            // Approvals belong to the allowance reducer.
            return Ok(balance);
        };
        if event.payload.value().is_negative() {
            return Err(ReduceError::unexpected(event, "negative transfer value"));
        }

        balance.amount =
            (balance.amount + delta).map_err(|e| ReduceError::overflow(event, e))?;
        balance.block_number = Some(event.block_number());
        balance.created_at.get_or_insert(event.timestamp);
        balance.last_updated_at = Some(event.timestamp);
        Ok(balance)
    }
}

impl EventInverter for BalanceReducer {
    fn invert(&self, event: &EventOf<BalanceKind>) -> Option<EventOf<BalanceKind>> {
        let payload = match &event.payload {
            BalancePayload::IncomeTransfer { value } => {
                BalancePayload::OutcomeTransfer { value: *value }
            }
            BalancePayload::OutcomeTransfer { value } => {
                BalancePayload::IncomeTransfer { value: *value }
            }
            BalancePayload::Deposit { value } => BalancePayload::Withdrawal { value: *value },
            BalancePayload::Withdrawal { value } => BalancePayload::Deposit { value: *value },
            approval @ BalancePayload::Approval { .. } => approval.clone(),
        };
        Some(LogEvent {
            status: LogStatus::Confirmed,
            payload,
            ..event.clone()
        })
    }

    fn compact(&self, reverted: &[EventOf<BalanceKind>]) -> Option<Vec<EventOf<BalanceKind>>> {
        net_balance_compensation(reverted)
    }

    fn commutes(&self) -> bool {
        true
    }
}
