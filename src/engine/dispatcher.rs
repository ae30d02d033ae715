use crate::domain::{EntityKind, EventOf};

use super::compaction::{segments, Segment};
use super::{EventInverter, ReduceError};

/// Outcome of dispatching a batch onto live entity data.
#[derive(Debug, Clone, PartialEq)]
pub enum Dispatch<D> {
    Applied(D),
    /// The batch contains a revert the kind cannot compensate.
    RequiresFullReduce,
}

/// Online fast path: routes each event by status onto entity data.
///
/// - CONFIRMED: forward apply.
/// - REVERTED: compensate via the inverter, one same-block run at a time.
/// - PENDING, DROPPED, INACTIVE: left to `apply_unconfirmed`.
///
/// Watermark bookkeeping is the caller's job.
#[derive(Debug, Clone, Default)]
pub struct StatusDispatcher<R> {
    reducer: R,
}

impl<R: EventInverter> StatusDispatcher<R> {
    pub fn new(reducer: R) -> Self {
        Self { reducer }
    }

    pub fn reducer(&self) -> &R {
        &self.reducer
    }

    pub fn dispatch(
        &self,
        mut data: <R::Kind as EntityKind>::Data,
        events: &[EventOf<R::Kind>],
    ) -> Result<Dispatch<<R::Kind as EntityKind>::Data>, ReduceError> {
        for segment in segments(events) {
            let run = match segment {
                Segment::RevertedRun(run) => run,
                Segment::Single(event) => {
                    data = if event.status.is_confirmed() {
                        self.reducer.apply(data, event)?
                    } else {
                        self.reducer.apply_unconfirmed(data, event)
                    };
                    continue;
                }
            };
            let Some(compensation) = self.reducer.compact(run) else {
                return Ok(Dispatch::RequiresFullReduce);
            };
            for event in &compensation {
                data = self.reducer.apply(data, event)?;
            }
        }
        Ok(Dispatch::Applied(data))
    }
}
