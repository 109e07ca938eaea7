//! TSCH schedule: a set of cyclic slotframes, each holding at most one link per timeslot.

use std::fmt;

use log::{debug, warn};
use serde::Serialize;
use thiserror::Error;

use crate::link::{Link, LinkOptions, LinkType};
use crate::types::{
    Destination, LinkHandle, SlotframeHandle, Timeslot, DEFAULT_MAX_LINKS, DEFAULT_MAX_SLOTFRAMES,
};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ScheduleError {
    #[error("Slotframe size must be non-zero")]
    ZeroSize,

    #[error("Slotframe {0} already exists")]
    DuplicateSlotframe(SlotframeHandle),

    #[error("Slotframe {0} not found")]
    UnknownSlotframe(SlotframeHandle),

    #[error("Timeslot {timeslot} outside slotframe of size {size}")]
    TimeslotOutOfRange { timeslot: Timeslot, size: u16 },

    #[error("Timeslot index overflows ({offset} + {count})")]
    TimeslotOverflow { offset: Timeslot, count: u16 },

    #[error("Schedule capacity reached ({0} entries)")]
    CapacityExhausted(usize),

    #[error("Schedule is locked")]
    Locked,
}

/// A cyclic sequence of `size` timeslots and the links installed on them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Slotframe {
    pub handle: SlotframeHandle,
    pub size: u16,
    links: Vec<Link>,
}

impl Slotframe {
    pub fn links(&self) -> &[Link] {
        &self.links
    }

    /// Position of this slotframe's cycle at the given absolute slot number.
    pub fn timeslot_at(&self, asn: u64) -> Timeslot {
        (asn % self.size as u64) as Timeslot
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ScheduleStore {
    slotframes: Vec<Slotframe>,
    next_link_handle: LinkHandle,
    max_slotframes: usize,
    max_links: usize,
}

impl Default for ScheduleStore {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_MAX_SLOTFRAMES, DEFAULT_MAX_LINKS)
    }
}

impl ScheduleStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(max_slotframes: usize, max_links: usize) -> Self {
        Self {
            slotframes: Vec::new(),
            next_link_handle: 0,
            max_slotframes,
            max_links,
        }
    }

    pub fn slotframes(&self) -> &[Slotframe] {
        &self.slotframes
    }

    pub fn link_count(&self) -> usize {
        self.slotframes.iter().map(|sf| sf.links.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.slotframes.iter().all(|sf| sf.links.is_empty())
    }

    pub fn add_slotframe(
        &mut self,
        handle: SlotframeHandle,
        size: u16,
    ) -> Result<&Slotframe, ScheduleError> {
        if size == 0 {
            return Err(ScheduleError::ZeroSize);
        }
        if self.get_slotframe_by_handle(handle).is_some() {
            return Err(ScheduleError::DuplicateSlotframe(handle));
        }
        if self.slotframes.len() >= self.max_slotframes {
            warn!("Cannot add slotframe {}: {} slotframes in use", handle, self.max_slotframes);
            return Err(ScheduleError::CapacityExhausted(self.max_slotframes));
        }

        debug!("add_slotframe {} {}", handle, size);
        self.slotframes.push(Slotframe {
            handle,
            size,
            links: Vec::new(),
        });
        Ok(&self.slotframes[self.slotframes.len() - 1])
    }

    /// Removes a slotframe after removing every link it holds.
    pub fn remove_slotframe(&mut self, handle: SlotframeHandle) -> Result<Slotframe, ScheduleError> {
        let idx = self
            .slotframe_index(handle)
            .ok_or(ScheduleError::UnknownSlotframe(handle))?;

        let timeslots: Vec<Timeslot> = self.slotframes[idx].links.iter().map(|l| l.timeslot).collect();
        for timeslot in timeslots {
            self.remove_link_by_timeslot(handle, timeslot);
        }

        let sf = self.slotframes.remove(idx);
        debug!("remove slotframe {} {}", sf.handle, sf.size);
        Ok(sf)
    }

    pub fn remove_all_slotframes(&mut self) {
        while let Some(handle) = self.slotframes.first().map(|sf| sf.handle) {
            if self.remove_slotframe(handle).is_err() {
                break;
            }
        }
    }

    pub fn get_slotframe_by_handle(&self, handle: SlotframeHandle) -> Option<&Slotframe> {
        self.slotframes.iter().find(|sf| sf.handle == handle)
    }

    /// Installs a link, replacing whatever link already occupies `(slotframe, timeslot)`.
    pub fn add_link(
        &mut self,
        slotframe: SlotframeHandle,
        options: LinkOptions,
        link_type: LinkType,
        address: Destination,
        timeslot: Timeslot,
        channel_offset: u16,
    ) -> Result<&Link, ScheduleError> {
        let idx = self
            .slotframe_index(slotframe)
            .ok_or(ScheduleError::UnknownSlotframe(slotframe))?;
        let size = self.slotframes[idx].size;
        if timeslot >= size {
            return Err(ScheduleError::TimeslotOutOfRange { timeslot, size });
        }

        self.remove_link_by_timeslot(slotframe, timeslot);

        if self.link_count() >= self.max_links {
            warn!("add_link failed: {} links in use", self.max_links);
            return Err(ScheduleError::CapacityExhausted(self.max_links));
        }

        let handle = self.next_link_handle;
        self.next_link_handle = self.next_link_handle.wrapping_add(1);

        let link = Link {
            handle,
            slotframe_handle: slotframe,
            options,
            link_type,
            address,
            timeslot,
            channel_offset,
        };
        debug!(
            "add_link {} {:02x} {:?} {} {} {}",
            slotframe,
            options.bits(),
            link_type,
            timeslot,
            channel_offset,
            address
        );

        let links = &mut self.slotframes[idx].links;
        links.push(link);
        Ok(&links[links.len() - 1])
    }

    pub fn remove_link_by_timeslot(
        &mut self,
        slotframe: SlotframeHandle,
        timeslot: Timeslot,
    ) -> Option<Link> {
        let idx = self.slotframe_index(slotframe)?;
        let links = &mut self.slotframes[idx].links;
        let pos = links.iter().position(|l| l.timeslot == timeslot)?;
        let link = links.remove(pos);
        debug!(
            "remove_link {} {:02x} {} {} {}",
            slotframe,
            link.options.bits(),
            link.timeslot,
            link.channel_offset,
            link.address
        );
        Some(link)
    }

    pub fn remove_link_by_handle(&mut self, handle: LinkHandle) -> Option<Link> {
        let (slotframe, timeslot) = self
            .get_link_by_handle(handle)
            .map(|l| (l.slotframe_handle, l.timeslot))?;
        self.remove_link_by_timeslot(slotframe, timeslot)
    }

    pub fn get_link_by_timeslot(&self, slotframe: SlotframeHandle, timeslot: Timeslot) -> Option<&Link> {
        self.get_slotframe_by_handle(slotframe)?
            .links
            .iter()
            .find(|l| l.timeslot == timeslot)
    }

    pub fn get_link_by_handle(&self, handle: LinkHandle) -> Option<&Link> {
        self.slotframes
            .iter()
            .flat_map(|sf| sf.links.iter())
            .find(|l| l.handle == handle)
    }

    fn slotframe_index(&self, handle: SlotframeHandle) -> Option<usize> {
        self.slotframes.iter().position(|sf| sf.handle == handle)
    }
}

impl fmt::Display for ScheduleStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Schedule: slotframe list")?;
        for sf in &self.slotframes {
            writeln!(f, "[Slotframe] Handle {}, size {}", sf.handle, sf.size)?;
            writeln!(f, "List of links:")?;
            for link in &sf.links {
                writeln!(f, "{}", link)?;
            }
        }
        write!(f, "Schedule: end of slotframe list")
    }
}
