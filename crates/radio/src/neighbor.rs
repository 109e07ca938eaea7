//! Capacity-bounded neighbor table of a DRAND node.

use std::fmt;
use std::time::Duration;

use drand_tdma_core::{LinkAddr, SlotIndex};
use log::{debug, trace};
use thiserror::Error;

use crate::framing::OccupancyEntry;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum NeighborTableError {
    #[error("Neighbor table full ({capacity} entries), cannot track {addr}")]
    Full { addr: LinkAddr, capacity: usize },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeType {
    Direct,
    TwoHop,
}

/// Answer of a direct neighbor to the owner's current REQUEST.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NegotiationState {
    Pending,
    Granted,
    Rejected,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NeighborEntry {
    pub addr: LinkAddr,
    pub node_type: NodeType,
    /// Slot the neighbor committed to, if known.
    pub timeslot: Option<SlotIndex>,
    pub negotiation: NegotiationState,
    pub last_seen: Duration,
}

impl NeighborEntry {
    fn new(addr: LinkAddr, node_type: NodeType, now: Duration) -> Self {
        Self {
            addr,
            node_type,
            timeslot: None,
            negotiation: NegotiationState::Pending,
            last_seen: now,
        }
    }

    pub fn is_direct(&self) -> bool {
        self.node_type == NodeType::Direct
    }
}

/// Neighbors keyed by link address.
///
/// Entries are created on first observation and never downgraded. Only
/// discovery promotes a two-hop entry to direct. Slot information is
/// last-writer-wins.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NeighborTable {
    entries: Vec<NeighborEntry>,
    capacity: usize,
}

impl NeighborTable {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: Vec::with_capacity(capacity),
            capacity,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn get(&self, addr: LinkAddr) -> Option<&NeighborEntry> {
        self.entries.iter().find(|e| e.addr == addr)
    }

    pub fn iter(&self) -> impl Iterator<Item = &NeighborEntry> {
        self.entries.iter()
    }

    fn position(&self, addr: LinkAddr) -> Option<usize> {
        self.entries.iter().position(|e| e.addr == addr)
    }

    fn insert(&mut self, entry: NeighborEntry) -> Result<usize, NeighborTableError> {
        if self.entries.len() >= self.capacity {
            return Err(NeighborTableError::Full {
                addr: entry.addr,
                capacity: self.capacity,
            });
        }
        debug!("New {:?} neighbor {}", entry.node_type, entry.addr);
        self.entries.push(entry);
        Ok(self.entries.len() - 1)
    }

    /// Records a neighbor reported by discovery as directly reachable.
    pub fn discovered(&mut self, addr: LinkAddr, now: Duration) -> Result<(), NeighborTableError> {
        match self.position(addr) {
            Some(idx) => {
                let entry = &mut self.entries[idx];
                if entry.node_type == NodeType::TwoHop {
                    debug!("Neighbor {} upgraded to direct", addr);
                    entry.node_type = NodeType::Direct;
                }
                entry.last_seen = now;
            }
            None => {
                self.insert(NeighborEntry::new(addr, NodeType::Direct, now))?;
            }
        }
        Ok(())
    }

    /// Refreshes liveness for the sender of a protocol message. Unknown
    /// senders are tracked as two-hop neighbors until discovery says otherwise.
    pub fn observe(&mut self, addr: LinkAddr, now: Duration) -> Result<(), NeighborTableError> {
        match self.position(addr) {
            Some(idx) => self.entries[idx].last_seen = now,
            None => {
                self.insert(NeighborEntry::new(addr, NodeType::TwoHop, now))?;
            }
        }
        Ok(())
    }

    /// Stores the slot `addr` committed to, creating a two-hop entry if needed.
    pub fn record_slot(
        &mut self,
        addr: LinkAddr,
        timeslot: SlotIndex,
        now: Duration,
    ) -> Result<(), NeighborTableError> {
        let idx = match self.position(addr) {
            Some(idx) => idx,
            None => self.insert(NeighborEntry::new(addr, NodeType::TwoHop, now))?,
        };
        let entry = &mut self.entries[idx];
        if entry.timeslot != Some(timeslot) {
            trace!("Neighbor {} holds slot {}", addr, timeslot);
            entry.timeslot = Some(timeslot);
        }
        Ok(())
    }

    /// Resets every direct neighbor to PENDING at the start of a REQUEST round.
    pub fn mark_direct_pending(&mut self) {
        for entry in self.entries.iter_mut().filter(|e| e.is_direct()) {
            entry.negotiation = NegotiationState::Pending;
        }
    }

    /// Returns false if `addr` is not a direct neighbor.
    pub fn set_negotiation(&mut self, addr: LinkAddr, state: NegotiationState) -> bool {
        match self.entries.iter_mut().find(|e| e.addr == addr) {
            Some(entry) if entry.is_direct() => {
                entry.negotiation = state;
                true
            }
            _ => false,
        }
    }

    pub fn pending_direct(&self) -> Vec<LinkAddr> {
        self.entries
            .iter()
            .filter(|e| e.is_direct() && e.negotiation == NegotiationState::Pending)
            .map(|e| e.addr)
            .collect()
    }

    /// Slots held by direct neighbors other than `exclude`, as reported in a GRANT.
    pub fn occupancy_snapshot(&self, exclude: LinkAddr) -> Vec<OccupancyEntry> {
        self.entries
            .iter()
            .filter(|e| e.is_direct() && e.addr != exclude)
            .filter_map(|e| {
                e.timeslot.map(|timeslot| OccupancyEntry {
                    addr: e.addr,
                    timeslot,
                })
            })
            .collect()
    }

    /// Every slot known to be taken within two hops.
    pub fn occupied_slots(&self) -> impl Iterator<Item = SlotIndex> + '_ {
        self.entries.iter().filter_map(|e| e.timeslot)
    }

    /// Drops entries not heard from within `window`. Returns the removed addresses.
    pub fn purge_stale(&mut self, now: Duration, window: Duration) -> Vec<LinkAddr> {
        let mut removed = Vec::new();
        self.entries.retain(|e| {
            let alive = now.saturating_sub(e.last_seen) <= window;
            if !alive {
                removed.push(e.addr);
            }
            alive
        });
        if !removed.is_empty() {
            debug!("Purged {} stale neighbors", removed.len());
        }
        removed
    }
}

impl fmt::Display for NeighborTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Neighbors ({}/{}):", self.entries.len(), self.capacity)?;
        for e in &self.entries {
            let kind = match e.node_type {
                NodeType::Direct => "DIRECT",
                NodeType::TwoHop => "TWO_HOP",
            };
            match e.timeslot {
                Some(slot) => write!(f, "  {} {:<7} slot {:>3}", e.addr, kind, slot)?,
                None => write!(f, "  {} {:<7} slot   -", e.addr, kind)?,
            }
            writeln!(f, " {:?} seen {:?}", e.negotiation, e.last_seen)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const T0: Duration = Duration::from_secs(0);

    fn addr(n: u8) -> LinkAddr {
        LinkAddr::new(0, n)
    }

    #[test]
    fn test_discovery_upgrades_but_observation_never_downgrades() {
        let mut table = NeighborTable::new(8);
        table.observe(addr(1), T0).unwrap();
        assert_eq!(table.get(addr(1)).unwrap().node_type, NodeType::TwoHop);

        table.discovered(addr(1), T0).unwrap();
        assert_eq!(table.get(addr(1)).unwrap().node_type, NodeType::Direct);

        table.observe(addr(1), Duration::from_secs(3)).unwrap();
        table.record_slot(addr(1), 4, Duration::from_secs(3)).unwrap();
        let entry = table.get(addr(1)).unwrap();
        assert_eq!(entry.node_type, NodeType::Direct);
        assert_eq!(entry.last_seen, Duration::from_secs(3));
        assert_eq!(entry.timeslot, Some(4));
    }

    #[test]
    fn test_record_slot_is_last_writer_wins() {
        let mut table = NeighborTable::new(8);
        table.record_slot(addr(2), 1, T0).unwrap();
        table.record_slot(addr(2), 6, T0).unwrap();
        let entry = table.get(addr(2)).unwrap();
        assert_eq!(entry.node_type, NodeType::TwoHop);
        assert_eq!(entry.timeslot, Some(6));

        let before = table.clone();
        table.record_slot(addr(2), 6, Duration::from_secs(9)).unwrap();
        assert_eq!(table, before);
    }

    #[test]
    fn test_capacity_is_enforced() {
        let mut table = NeighborTable::new(1);
        table.discovered(addr(1), T0).unwrap();
        assert_eq!(
            table.record_slot(addr(2), 0, T0).unwrap_err(),
            NeighborTableError::Full { addr: addr(2), capacity: 1 }
        );
        // known addresses still update
        table.record_slot(addr(1), 0, T0).unwrap();
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn test_negotiation_applies_to_direct_neighbors_only() {
        let mut table = NeighborTable::new(8);
        table.discovered(addr(1), T0).unwrap();
        table.discovered(addr(2), T0).unwrap();
        table.record_slot(addr(3), 0, T0).unwrap();

        table.mark_direct_pending();
        assert!(table.set_negotiation(addr(1), NegotiationState::Granted));
        assert!(!table.set_negotiation(addr(3), NegotiationState::Granted));
        assert_eq!(table.pending_direct(), vec![addr(2)]);
    }

    #[test]
    fn test_occupancy_snapshot_excludes_requester_and_two_hop() {
        let mut table = NeighborTable::new(8);
        table.discovered(addr(1), T0).unwrap();
        table.discovered(addr(2), T0).unwrap();
        table.discovered(addr(3), T0).unwrap();
        table.record_slot(addr(1), 0, T0).unwrap();
        table.record_slot(addr(2), 2, T0).unwrap();
        table.record_slot(addr(9), 5, T0).unwrap();

        let snapshot = table.occupancy_snapshot(addr(2));
        assert_eq!(snapshot, vec![OccupancyEntry { addr: addr(1), timeslot: 0 }]);

        let mut occupied: Vec<_> = table.occupied_slots().collect();
        occupied.sort();
        assert_eq!(occupied, vec![0, 2, 5]);
    }

    #[test]
    fn test_purge_stale() {
        let mut table = NeighborTable::new(8);
        table.discovered(addr(1), T0).unwrap();
        table.discovered(addr(2), Duration::from_secs(8)).unwrap();

        let removed = table.purge_stale(Duration::from_secs(12), Duration::from_secs(10));
        assert_eq!(removed, vec![addr(1)]);
        assert!(table.get(addr(1)).is_none());
        assert!(table.get(addr(2)).is_some());
    }
}
