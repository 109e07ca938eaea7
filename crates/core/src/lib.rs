//! Link-layer types and the TSCH schedule populated by DRAND

pub mod link;
pub mod resolver;
pub mod schedule;
pub mod shared;
pub mod types;

pub use link::{Link, LinkOptions, LinkType};
pub use resolver::NextActiveLink;
pub use schedule::{ScheduleError, ScheduleStore, Slotframe};
pub use shared::SharedSchedule;
pub use types::{Asn, Destination, LinkAddr, LinkHandle, Round, SlotIndex, SlotframeHandle, Timeslot};
