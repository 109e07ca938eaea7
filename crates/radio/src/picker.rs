//! Slot selection over the merged one-hop and two-hop occupancy view.

use drand_tdma_core::SlotIndex;
use thiserror::Error;

use crate::neighbor::{NegotiationState, NeighborTable};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PickError {
    #[error("No free timeslot among {0} slots")]
    NoFreeTimeslot(u8),
}

/// Returns the lowest slot index below `max_slots` not present in `occupied`.
/// Indices outside the slot space are ignored.
pub fn pick_timeslot<I>(occupied: I, max_slots: u8) -> Result<SlotIndex, PickError>
where
    I: IntoIterator<Item = SlotIndex>,
{
    let mut taken = vec![false; max_slots as usize];
    for slot in occupied {
        if let Some(t) = taken.get_mut(slot as usize) {
            *t = true;
        }
    }

    taken
        .iter()
        .position(|t| !t)
        .map(|idx| idx as SlotIndex)
        .ok_or(PickError::NoFreeTimeslot(max_slots))
}

/// Progress of the owner's REQUEST round.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Completion {
    /// Some direct neighbor has not answered yet.
    Waiting,
    AllGranted,
    Rejected,
}

pub fn check_all_received(table: &NeighborTable) -> Completion {
    let mut rejected = false;
    for entry in table.iter().filter(|e| e.is_direct()) {
        match entry.negotiation {
            NegotiationState::Pending => return Completion::Waiting,
            NegotiationState::Rejected => rejected = true,
            NegotiationState::Granted => {}
        }
    }

    if rejected {
        Completion::Rejected
    } else {
        Completion::AllGranted
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use drand_tdma_core::LinkAddr;
    use std::time::Duration;

    #[test]
    fn test_picks_lowest_gap() {
        assert_eq!(pick_timeslot([0, 2, 3], 5), Ok(1));
        assert_eq!(pick_timeslot([], 5), Ok(0));
        assert_eq!(pick_timeslot([3, 0, 0, 1, 2], 5), Ok(4));
    }

    #[test]
    fn test_full_slot_space_fails() {
        assert_eq!(pick_timeslot([0, 1, 2, 3, 4], 5), Err(PickError::NoFreeTimeslot(5)));
        assert_eq!(pick_timeslot([], 0), Err(PickError::NoFreeTimeslot(0)));
    }

    #[test]
    fn test_out_of_range_slots_are_ignored() {
        assert_eq!(pick_timeslot([0, 1, 200], 3), Ok(2));
    }

    #[test]
    fn test_completion_tracks_direct_neighbors_only() {
        let now = Duration::ZERO;
        let a = LinkAddr::new(0, 1);
        let b = LinkAddr::new(0, 2);
        let mut table = NeighborTable::new(4);
        assert_eq!(check_all_received(&table), Completion::AllGranted);

        table.discovered(a, now).unwrap();
        table.discovered(b, now).unwrap();
        table.observe(LinkAddr::new(0, 9), now).unwrap();
        table.mark_direct_pending();
        assert_eq!(check_all_received(&table), Completion::Waiting);

        table.set_negotiation(a, NegotiationState::Granted);
        assert_eq!(check_all_received(&table), Completion::Waiting);

        table.set_negotiation(b, NegotiationState::Granted);
        assert_eq!(check_all_received(&table), Completion::AllGranted);

        table.set_negotiation(b, NegotiationState::Rejected);
        assert_eq!(check_all_received(&table), Completion::Rejected);
    }
}
