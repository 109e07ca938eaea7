use std::fmt;

use serde::{Deserialize, Serialize};

/// DRAND round number carried on every protocol message.
pub type Round = u8;
/// Index of a negotiated DRAND slot, as carried on the wire.
pub type SlotIndex = u8;
/// Offset of a link inside its slotframe.
pub type Timeslot = u16;
/// Absolute slot number since network start.
pub type Asn = u64;
pub type SlotframeHandle = u16;
pub type LinkHandle = u16;

pub const DEFAULT_MAX_SLOTFRAMES: usize = 4;
pub const DEFAULT_MAX_LINKS: usize = 256;

/// Two-byte link-layer address.
///
/// Only the two high-order bytes of a node address take part in DRAND, both in
/// the neighbor table and on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct LinkAddr(pub [u8; 2]);

impl LinkAddr {
    pub const fn new(hi: u8, lo: u8) -> Self {
        Self([hi, lo])
    }

    pub const fn hi(&self) -> u8 {
        self.0[0]
    }

    pub const fn lo(&self) -> u8 {
        self.0[1]
    }
}

impl From<u16> for LinkAddr {
    fn from(value: u16) -> Self {
        Self(value.to_be_bytes())
    }
}

impl From<LinkAddr> for u16 {
    fn from(addr: LinkAddr) -> Self {
        u16::from_be_bytes(addr.0)
    }
}

impl fmt::Display for LinkAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.0[0], self.0[1])
    }
}

/// Target of a frame or of a scheduled link.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Destination {
    Broadcast,
    Unicast(LinkAddr),
}

impl Destination {
    pub fn is_broadcast(&self) -> bool {
        matches!(self, Destination::Broadcast)
    }
}

impl fmt::Display for Destination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Destination::Broadcast => write!(f, "broadcast"),
            Destination::Unicast(addr) => write!(f, "{}", addr),
        }
    }
}
