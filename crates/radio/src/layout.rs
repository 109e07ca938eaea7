//! Slotframe layout installed for DRAND traffic.

use drand_tdma_core::{
    Destination, LinkOptions, LinkType, ScheduleError, ScheduleStore, SlotIndex, SlotframeHandle, Timeslot,
};
use log::info;

use crate::DrandConfig;

pub const DRAND_SLOTFRAME: SlotframeHandle = 0;

/// Schedule timeslot backing negotiated slot `slot`.
pub fn timeslot_for(config: &DrandConfig, slot: SlotIndex) -> Result<Timeslot, ScheduleError> {
    offset_by(config.round_start_offset, slot as u16)
}

fn offset_by(offset: Timeslot, count: u16) -> Result<Timeslot, ScheduleError> {
    offset
        .checked_add(count)
        .ok_or(ScheduleError::TimeslotOverflow { offset, count })
}

/// Creates the DRAND slotframe: a shared advertising cell at timeslot 0
/// followed by one receive cell per negotiable slot.
pub fn install_initial_layout(store: &mut ScheduleStore, config: &DrandConfig) -> Result<(), ScheduleError> {
    let size = offset_by(config.round_start_offset, config.max_slots as u16)?;
    store.add_slotframe(DRAND_SLOTFRAME, size)?;

    store.add_link(
        DRAND_SLOTFRAME,
        LinkOptions::TX | LinkOptions::RX | LinkOptions::SHARED | LinkOptions::TIME_KEEPING,
        LinkType::Advertising,
        Destination::Broadcast,
        0,
        0,
    )?;
    for slot in 0..config.max_slots {
        store.add_link(
            DRAND_SLOTFRAME,
            LinkOptions::RX,
            LinkType::PropMtm,
            Destination::Broadcast,
            timeslot_for(config, slot)?,
            0,
        )?;
    }
    Ok(())
}

/// Turns the receive cell of the assigned slot into our transmit cell.
pub fn install_assigned_slot(
    store: &mut ScheduleStore,
    config: &DrandConfig,
    slot: SlotIndex,
) -> Result<(), ScheduleError> {
    let timeslot = timeslot_for(config, slot)?;
    store.add_link(
        DRAND_SLOTFRAME,
        LinkOptions::TX,
        LinkType::PropMtm,
        Destination::Broadcast,
        timeslot,
        0,
    )?;
    info!("Installed TX link for slot {} at timeslot {}", slot, timeslot);
    Ok(())
}
