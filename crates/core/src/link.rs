use std::fmt;

use bitflags::bitflags;
use serde::{Deserialize, Serialize};

use crate::types::{Destination, LinkHandle, SlotframeHandle, Timeslot};

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
    pub struct LinkOptions: u8 {
        const TX = 0b0000_0001;
        const RX = 0b0000_0010;
        const SHARED = 0b0000_0100;
        const TIME_KEEPING = 0b0000_1000;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LinkType {
    Advertising,
    AdvertisingOnly,
    Normal,
    Prop,
    PropMtm,
    Loc,
    Chorus,
}

/// A scheduled activity bound to one timeslot of one slotframe.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Link {
    pub handle: LinkHandle,
    pub slotframe_handle: SlotframeHandle,
    pub options: LinkOptions,
    pub link_type: LinkType,
    pub address: Destination,
    pub timeslot: Timeslot,
    pub channel_offset: u16,
}

impl Link {
    pub fn is_tx(&self) -> bool {
        self.options.contains(LinkOptions::TX)
    }

    pub fn is_rx(&self) -> bool {
        self.options.contains(LinkOptions::RX)
    }
}

impl fmt::Display for Link {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[Link] Options {:02x}, type {:?}, timeslot {}, channel offset {}, address {}",
            self.options.bits(),
            self.link_type,
            self.timeslot,
            self.channel_offset,
            self.address
        )
    }
}
