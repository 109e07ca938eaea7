//! Selection of the next link to execute, across all active slotframes.

use crate::link::Link;
use crate::schedule::ScheduleStore;
use crate::types::Asn;

/// Result of [`ScheduleStore::next_active_link`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NextActiveLink {
    pub link: Link,
    /// Slots from the given ASN until `link` comes up.
    pub time_offset: u16,
    /// An Rx-capable link scheduled for the same slot, used when `link` turns
    /// out to have nothing to transmit.
    pub backup: Option<Link>,
}

impl ScheduleStore {
    /// Finds the nearest upcoming link after `asn`.
    ///
    /// A link on the current timeslot is a full slotframe period away. Ties at
    /// equal distance go to the link with the TX option, then to the link from
    /// the slotframe with the lower handle.
    pub fn next_active_link(&self, asn: Asn) -> Option<NextActiveLink> {
        let mut best: Option<(&Link, u32)> = None;
        let mut backup: Option<&Link> = None;

        for sf in self.slotframes() {
            let timeslot = sf.timeslot_at(asn) as u32;
            for link in sf.links() {
                let ts = link.timeslot as u32;
                let distance = if ts > timeslot {
                    ts - timeslot
                } else {
                    sf.size as u32 + ts - timeslot
                };

                let (curr, curr_distance) = match best {
                    Some(b) => b,
                    None => {
                        best = Some((link, distance));
                        continue;
                    }
                };

                if distance < curr_distance {
                    best = Some((link, distance));
                    backup = None;
                } else if distance == curr_distance {
                    let challenger_wins = if curr.is_tx() == link.is_tx() {
                        link.slotframe_handle < curr.slotframe_handle
                    } else {
                        link.is_tx()
                    };
                    let (winner, loser) = if challenger_wins { (link, curr) } else { (curr, link) };

                    if backup.is_none() && loser.is_rx() {
                        backup = Some(loser);
                    }
                    best = Some((winner, distance));
                }
            }
        }

        best.map(|(link, distance)| NextActiveLink {
            link: link.clone(),
            time_offset: distance as u16,
            backup: backup.cloned(),
        })
    }
}
