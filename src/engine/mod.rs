//! Pure computation engine: reducers, inverters, compaction and dispatch.
//!
//! Nothing in here performs I/O. Every function is a deterministic fold step
//! over in-memory values; persistence and retries live in `reduce` and `db`.

use crate::domain::{ArithmeticError, EntityKind, EventOf, LogStatus, OrderKey, SnapshotOf};
use thiserror::Error;

pub mod allowance;
pub mod auction;
pub mod balance;
pub mod compaction;
pub mod dispatcher;
pub mod invert;
pub mod pool;

pub use allowance::AllowanceReducer;
pub use auction::AuctionReducer;
pub use balance::BalanceReducer;
pub use dispatcher::{Dispatch, StatusDispatcher};
pub use invert::EventInverter;
pub use pool::PoolReducer;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ReduceError {
    #[error("event {event_id} belongs to key {actual}, snapshot is for {expected}")]
    KeyMismatch {
        event_id: String,
        expected: String,
        actual: String,
    },

    #[error("unexpected payload in event {event_id}: {reason}")]
    UnexpectedPayload { event_id: String, reason: String },

    #[error("event {event_id} overflows the amount: {source}")]
    Overflow {
        event_id: String,
        #[source]
        source: ArithmeticError,
    },

    #[error("event {event_id} at {order} arrived after {last}")]
    OutOfOrder {
        event_id: String,
        order: OrderKey,
        last: OrderKey,
    },
}

impl ReduceError {
    pub fn unexpected<K, P>(event: &crate::domain::LogEvent<K, P>, reason: impl Into<String>) -> Self {
        ReduceError::UnexpectedPayload {
            event_id: event.id.clone(),
            reason: reason.into(),
        }
    }

    pub fn overflow<K, P>(event: &crate::domain::LogEvent<K, P>, source: ArithmeticError) -> Self {
        ReduceError::Overflow {
            event_id: event.id.clone(),
            source,
        }
    }
}

/// One reducer per entity kind.
///
/// `apply` is only ever called with events that should mutate `data`:
/// confirmed events, or compensating events built by an [`EventInverter`].
/// Status gating happens in [`reduce`] and in the dispatcher.
pub trait EntityReducer: Send + Sync + 'static {
    type Kind: EntityKind;

    fn initial_data(
        &self,
        key: &<Self::Kind as EntityKind>::Key,
    ) -> <Self::Kind as EntityKind>::Data;

    fn apply(
        &self,
        data: <Self::Kind as EntityKind>::Data,
        event: &EventOf<Self::Kind>,
    ) -> Result<<Self::Kind as EntityKind>::Data, ReduceError>;

    /// Effect of a PENDING, DROPPED or INACTIVE event. Most kinds ignore them.
    fn apply_unconfirmed(
        &self,
        data: <Self::Kind as EntityKind>::Data,
        _event: &EventOf<Self::Kind>,
    ) -> <Self::Kind as EntityKind>::Data {
        data
    }

    fn initial_snapshot(&self, key: &<Self::Kind as EntityKind>::Key) -> SnapshotOf<Self::Kind> {
        crate::domain::Snapshot::initial(key.clone(), self.initial_data(key))
    }
}

/// Canonical snapshot reduction step.
///
/// Only CONFIRMED events reach `apply`. REVERTED events are skipped: the
/// stored history carries the latest status of every log, so a replay never
/// sees the reverted effect in the first place. The watermark advances for
/// every event regardless of status.
///
/// Staleness is the caller's concern; see [`fold`].
pub fn reduce<R: EntityReducer>(
    reducer: &R,
    mut snapshot: SnapshotOf<R::Kind>,
    event: &EventOf<R::Kind>,
) -> Result<SnapshotOf<R::Kind>, ReduceError> {
    if snapshot.key != event.key {
        return Err(ReduceError::KeyMismatch {
            event_id: event.id.clone(),
            expected: snapshot.key.to_string(),
            actual: event.key.to_string(),
        });
    }

    snapshot.data = match event.status {
        LogStatus::Confirmed => reducer.apply(snapshot.data, event)?,
        LogStatus::Reverted => snapshot.data,
        LogStatus::Pending | LogStatus::Dropped | LogStatus::Inactive => {
            reducer.apply_unconfirmed(snapshot.data, event)
        }
    };
    snapshot.advance(event.order);
    Ok(snapshot)
}

/// Fold an ordered history into `snapshot`, rejecting anything at or behind
/// the watermark.
pub fn fold<'a, R, I>(
    reducer: &R,
    snapshot: SnapshotOf<R::Kind>,
    events: I,
) -> Result<SnapshotOf<R::Kind>, ReduceError>
where
    R: EntityReducer,
    I: IntoIterator<Item = &'a EventOf<R::Kind>>,
{
    events.into_iter().try_fold(snapshot, |snapshot, event| {
        if let Some(last) = snapshot.last_order {
            if event.order <= last {
                return Err(ReduceError::OutOfOrder {
                    event_id: event.id.clone(),
                    order: event.order,
                    last,
                });
            }
        }
        reduce(reducer, snapshot, event)
    })
}
