//! Collapsing reverted runs before compensation.

use crate::domain::{checked_sum, BalanceId, BalancePayload, LogEvent, LogStatus, OrderKey};

/// A slice of a dispatch batch: either one event or a run of reverted events
/// that share a block.
#[derive(Debug, PartialEq)]
pub enum Segment<'a, E> {
    Single(&'a E),
    RevertedRun(&'a [E]),
}

/// Split a batch into segments, grouping contiguous REVERTED events of the
/// same block so they can be compensated at once.
pub fn segments<K, P>(events: &[LogEvent<K, P>]) -> Vec<Segment<'_, LogEvent<K, P>>> {
    let mut out = Vec::new();
    let mut i = 0;
    while i < events.len() {
        let event = &events[i];
        if event.status != LogStatus::Reverted {
            out.push(Segment::Single(event));
            i += 1;
            continue;
        }
        let block = event.order.block_number;
        let end = events[i..]
            .iter()
            .position(|e| e.status != LogStatus::Reverted || e.order.block_number != block)
            .map_or(events.len(), |offset| i + offset);
        out.push(Segment::RevertedRun(&events[i..end]));
        i = end;
    }
    out
}

/// One net adjustment undoing every balance change in `reverted`.
///
/// Returns no events when the run nets to zero, and `None` when the net
/// amount overflows.
pub fn net_balance_compensation(
    reverted: &[LogEvent<BalanceId, BalancePayload>],
) -> Option<Vec<LogEvent<BalanceId, BalancePayload>>> {
    let Some(last) = reverted.iter().max_by_key(|e| e.order) else {
        return Some(Vec::new());
    };
    let net = checked_sum(reverted.iter().filter_map(|e| e.payload.signed_delta())).ok()?;
    if net.is_zero() {
        return Some(Vec::new());
    }

    // Undoing a net gain is an outcome and vice versa.
    let payload = if net.is_negative() {
        BalancePayload::IncomeTransfer { value: net.abs() }
    } else {
        BalancePayload::OutcomeTransfer { value: net }
    };
    let order: OrderKey = last.order;
    Some(vec![LogEvent {
        id: format!("compensation:{}:{}", order, reverted.len()),
        key: last.key.clone(),
        status: LogStatus::Confirmed,
        order,
        tx_hash: last.tx_hash.clone(),
        timestamp: last.timestamp,
        payload,
    }])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Decimal;
    use crate::engine::test_support::*;
    use crate::engine::{BalanceReducer, EntityReducer, EventInverter};

    #[test]
    fn test_segments_group_same_block_reverts() {
        let events = vec![
            balance_event(5, 0, LogStatus::Confirmed, income(1)),
            balance_event(6, 0, LogStatus::Reverted, income(1)),
            balance_event(6, 1, LogStatus::Reverted, outcome(1)),
            balance_event(7, 0, LogStatus::Reverted, income(1)),
            balance_event(7, 1, LogStatus::Pending, income(1)),
        ];
        let segs = segments(&events);
        assert_eq!(segs.len(), 4);
        assert_eq!(segs[1], Segment::RevertedRun(&events[1..3]));
        assert_eq!(segs[2], Segment::RevertedRun(&events[3..4]));
        assert_eq!(segs[3], Segment::Single(&events[4]));
    }

    #[test]
    fn test_segments_need_no_clone() {
        #[derive(Debug, PartialEq)]
        struct Opaque;

        let event = |block: i64, status: LogStatus| LogEvent {
            id: format!("log-{}", block),
            key: (),
            status,
            order: OrderKey::new(block, 0, 0),
            tx_hash: String::new(),
            timestamp: crate::domain::TimeMs::new(0),
            payload: Opaque,
        };
        let events = vec![event(1, LogStatus::Reverted), event(2, LogStatus::Reverted)];
        let segs = segments(&events);
        assert_eq!(segs.len(), 2);
        assert_eq!(events[1].block_number(), 2);
    }

    #[test]
    fn test_net_compensation_matches_individual_inverses() {
        let reverted = vec![
            balance_event(9, 0, LogStatus::Reverted, income(10)),
            balance_event(9, 1, LogStatus::Reverted, outcome(4)),
            balance_event(9, 2, LogStatus::Reverted, income(1)),
        ];
        let start = BalanceReducer.initial_data(&balance_id());

        let one_by_one = reverted
            .iter()
            .rev()
            .map(|e| BalanceReducer.invert(e).unwrap())
            .try_fold(start.clone(), |d, e| BalanceReducer.apply(d, &e))
            .unwrap();
        let compacted = net_balance_compensation(&reverted).unwrap();
        assert_eq!(compacted.len(), 1);
        let net = BalanceReducer.apply(start, &compacted[0]).unwrap();

        assert_eq!(net.amount, one_by_one.amount);
        assert_eq!(net.amount, Decimal::from_i64(-7));
    }

    #[test]
    fn test_net_zero_run_compacts_to_nothing() {
        let reverted = vec![
            balance_event(9, 0, LogStatus::Reverted, income(3)),
            balance_event(9, 1, LogStatus::Reverted, outcome(3)),
        ];
        assert_eq!(net_balance_compensation(&reverted), Some(Vec::new()));
        assert_eq!(net_balance_compensation(&[]), Some(Vec::new()));
    }

    #[test]
    fn test_overflowing_run_cannot_be_compacted() {
        let max = BalancePayload::IncomeTransfer {
            value: Decimal::max_value(),
        };
        let reverted = vec![
            balance_event(9, 0, LogStatus::Reverted, max.clone()),
            balance_event(9, 1, LogStatus::Reverted, max),
        ];
        assert_eq!(net_balance_compensation(&reverted), None);
        assert_eq!(BalanceReducer.compact(&reverted), None);
    }
}
