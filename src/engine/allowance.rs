use crate::domain::{Allowance, AllowanceKind, BalanceId, BalancePayload, EventOf};

use super::{EntityReducer, EventInverter, ReduceError};

/// Allowances are overwritten by approvals; transfers never touch them.
#[derive(Debug, Clone, Copy, Default)]
pub struct AllowanceReducer;

impl EntityReducer for AllowanceReducer {
    type Kind = AllowanceKind;

    fn initial_data(&self, key: &BalanceId) -> Allowance {
        Allowance::empty(key)
    }

    fn apply(
        &self,
        mut allowance: Allowance,
        event: &EventOf<AllowanceKind>,
    ) -> Result<Allowance, ReduceError> {
        let BalancePayload::Approval { spender, value } = &event.payload else {
            return Ok(allowance);
        };
        if value.is_negative() {
            return Err(ReduceError::unexpected(event, "negative approval value"));
        }

        allowance.spender = Some(spender.clone());
        allowance.allowance = *value;
        allowance.created_at.get_or_insert(event.timestamp);
        allowance.last_updated_at = Some(event.timestamp);
        Ok(allowance)
    }
}

/// An approval replaces the previous value, so there is nothing to subtract.
impl EventInverter for AllowanceReducer {
    fn invert(&self, event: &EventOf<AllowanceKind>) -> Option<EventOf<AllowanceKind>> {
        match event.payload {
            BalancePayload::Approval { .. } => None,
            // Transfers are no-ops here; undoing a no-op is a no-op.
            _ => Some(event.clone()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Address, Decimal, LogStatus};
    use crate::engine::reduce;
    use crate::engine::test_support::*;

    fn approval(value: u64) -> BalancePayload {
        BalancePayload::Approval {
            spender: Address::new("0xspender"),
            value: Decimal::from(value),
        }
    }

    #[test]
    fn test_approval_overwrites() {
        let s = AllowanceReducer.initial_snapshot(&balance_id());
        let s = reduce(
            &AllowanceReducer,
            s,
            &balance_event(1, 0, LogStatus::Confirmed, approval(50)),
        )
        .unwrap();
        let s = reduce(
            &AllowanceReducer,
            s,
            &balance_event(2, 0, LogStatus::Confirmed, approval(20)),
        )
        .unwrap();

        assert_eq!(s.data.allowance, Decimal::from(20u64));
        assert_eq!(s.data.spender, Some(Address::new("0xspender")));
    }

    #[test]
    fn test_transfer_ignored() {
        let s = AllowanceReducer.initial_snapshot(&balance_id());
        let s = reduce(
            &AllowanceReducer,
            s,
            &balance_event(1, 0, LogStatus::Confirmed, income(5)),
        )
        .unwrap();
        assert_eq!(s.data, Allowance::empty(&balance_id()));
    }

    #[test]
    fn test_reverted_approval_needs_replay() {
        let event = balance_event(1, 0, LogStatus::Reverted, approval(50));
        assert!(AllowanceReducer.invert(&event).is_none());
        assert!(AllowanceReducer.compact(&[event]).is_none());
    }
}
