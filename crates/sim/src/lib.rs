//! Simulation tools for DRAND slot allocation

pub mod scenarios;
pub mod topology;

use std::time::Duration;
use drand_tdma_radio::{DrandConfig, RadioConfig};

pub struct SimulationPresets;

impl SimulationPresets {
    pub fn good_conditions() -> RadioConfig {
        RadioConfig {
            mtu: 127,
            bandwidth_bps: 250_000,
            packet_loss: 0.01,
            latency: Duration::from_millis(2),
            latency_jitter: Duration::from_millis(1),
        }
    }

    pub fn average_conditions() -> RadioConfig {
        RadioConfig {
            mtu: 127,
            bandwidth_bps: 250_000,
            packet_loss: 0.05,
            latency: Duration::from_millis(5),
            latency_jitter: Duration::from_millis(2),
        }
    }

    pub fn poor_conditions() -> RadioConfig {
        RadioConfig {
            mtu: 127,
            bandwidth_bps: 100_000,
            packet_loss: 0.15,
            latency: Duration::from_millis(10),
            latency_jitter: Duration::from_millis(5),
        }
    }

    pub fn extreme_conditions() -> RadioConfig {
        RadioConfig {
            mtu: 127,
            bandwidth_bps: 50_000,
            packet_loss: 0.30,
            latency: Duration::from_millis(20),
            latency_jitter: Duration::from_millis(10),
        }
    }

    /// Lossless medium for deterministic checks.
    pub fn ideal_conditions() -> RadioConfig {
        RadioConfig {
            packet_loss: 0.0,
            latency: Duration::from_millis(1),
            latency_jitter: Duration::ZERO,
            ..RadioConfig::default()
        }
    }

    /// Protocol timings scaled down so a run completes in seconds.
    pub fn simulation_drand() -> DrandConfig {
        DrandConfig {
            max_slots: 16,
            initial_request_timeout: Duration::from_millis(300),
            grant_ack_timeout: Duration::from_millis(300),
            phase_interval: Duration::from_millis(200),
            discovery_phase: Duration::from_millis(500),
            ..DrandConfig::default()
        }
    }

    pub fn fast_drand() -> DrandConfig {
        DrandConfig {
            initial_request_timeout: Duration::from_millis(100),
            grant_ack_timeout: Duration::from_millis(100),
            phase_interval: Duration::from_millis(20),
            discovery_phase: Duration::from_millis(50),
            ..DrandConfig::default()
        }
    }
}
