use crate::domain::EventOf;

use super::EntityReducer;

/// Compensating events for chain reorganizations.
///
/// For an invertible event `e`, applying `e` and then `invert(e)` must leave
/// the reducer's arithmetic where it started. Kinds whose state is not
/// additive return `None`, which sends the key to a full replay.
pub trait EventInverter: EntityReducer {
    fn invert(&self, event: &EventOf<Self::Kind>) -> Option<EventOf<Self::Kind>>;

    /// Compensation for a run of reverted events sharing one block.
    ///
    /// The default inverts each event, newest first.
    fn compact(&self, reverted: &[EventOf<Self::Kind>]) -> Option<Vec<EventOf<Self::Kind>>> {
        reverted.iter().rev().map(|event| self.invert(event)).collect()
    }

    /// Whether applying events out of order yields the same data.
    ///
    /// When true, a late-promoted event may be applied behind the watermark
    /// instead of triggering a replay.
    fn commutes(&self) -> bool {
        false
    }
}
