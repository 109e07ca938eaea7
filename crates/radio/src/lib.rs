//! DRAND slot negotiation over a lossy multi-hop radio

use std::time::Duration;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use drand_tdma_core::{LinkAddr, ScheduleError};

pub mod drand;
pub mod framing;
pub mod layout;
pub mod neighbor;
pub mod network_core;
pub mod picker;
pub mod scheduler;
pub mod transport;

pub use drand::{Action, Coin, Drand, DrandState, Event, Notice, TimerKind, TimerToken};
pub use framing::{DecodeError, DrandMessage, MessageKind, OccupancyEntry};
pub use neighbor::{NegotiationState, NeighborEntry, NeighborTable, NeighborTableError, NodeType};
pub use network_core::{MediumStats, RadioNetworkCore, RadioNode};
pub use layout::{install_assigned_slot, install_initial_layout, timeslot_for, DRAND_SLOTFRAME};
pub use picker::{check_all_received, pick_timeslot, Completion, PickError};
pub use scheduler::{DrandScheduler, SchedulerHandle, SlotStatus};
pub use transport::Transport;

#[derive(Debug, Error)]
pub enum RadioError {
    #[error("Packet too large for radio MTU")]
    PacketTooLarge,

    #[error("Radio transmission failed")]
    TransmissionFailed,

    #[error("Invalid frame format")]
    InvalidFrame,

    #[error("Node {0} is not attached to the medium")]
    UnknownNode(LinkAddr),

    #[error("Radio channel closed")]
    ChannelClosed,

    #[error("Schedule update failed: {0}")]
    Schedule(#[from] ScheduleError),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RadioConfig {
    pub mtu: usize,
    pub bandwidth_bps: u32,
    pub packet_loss: f32,
    pub latency: Duration,
    pub latency_jitter: Duration,
}

impl Default for RadioConfig {
    fn default() -> Self {
        Self {
            mtu: 127,
            bandwidth_bps: 250_000,
            packet_loss: 0.05,
            latency: Duration::from_millis(5),
            latency_jitter: Duration::from_millis(2),
        }
    }
}

/// Protocol timing and sizing for one DRAND node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DrandConfig {
    /// Number of slot indices negotiated over.
    pub max_slots: u8,
    pub neighbor_capacity: usize,
    /// Starting value of the adaptive request timeout (`dA`).
    pub initial_request_timeout: Duration,
    /// Grant acknowledgement timeout (`dB`).
    pub grant_ack_timeout: Duration,
    /// Period of the lottery timer.
    pub phase_interval: Duration,
    /// Neighbor discovery window before the first lottery.
    pub discovery_phase: Duration,
    pub liveness_window: Duration,
    /// Neighbor purge period; `None` keeps the purge dormant.
    pub purge_interval: Option<Duration>,
    /// Schedule timeslot of negotiated slot 0 in the DRAND slotframe.
    pub round_start_offset: u16,
}

impl Default for DrandConfig {
    fn default() -> Self {
        Self {
            max_slots: 10,
            neighbor_capacity: 40,
            initial_request_timeout: Duration::from_secs(1),
            grant_ack_timeout: Duration::from_secs(1),
            phase_interval: Duration::from_secs(2),
            discovery_phase: Duration::from_secs(40),
            liveness_window: Duration::from_secs(10),
            purge_interval: None,
            round_start_offset: 1,
        }
    }
}
