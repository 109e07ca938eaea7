//! Simulated multi-hop radio medium routing frames between attached nodes

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use drand_tdma_core::{Destination, LinkAddr};
use log::{debug, info, trace, warn};
use rand::Rng;
use rand_distr::{Distribution, Normal};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc::{self, Receiver, Sender};
use tokio::sync::{Mutex, RwLock};

use crate::transport::Transport;
use crate::{RadioConfig, RadioError};

const QUEUE_DEPTH: usize = 100_000;
const NODE_QUEUE_DEPTH: usize = 1_000;

/// Link-layer header wrapped around every payload on the air.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct AirFrame {
    src: LinkAddr,
    dst: Destination,
    payload: Vec<u8>,
}

struct RadioPacket {
    from: LinkAddr,
    dest: Destination,
    frame: Bytes,
}

#[derive(Debug, Default)]
struct NetworkStats {
    packets_sent: u64,
    packets_dropped: u64,
    packets_delivered: u64,
    bytes_delivered: u64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MediumStats {
    pub packets_sent: u64,
    /// Per-receiver losses, including unicasts to unreachable nodes.
    pub packets_dropped: u64,
    pub packets_delivered: u64,
    pub bytes_delivered: u64,
    pub queue_depth: u64,
}

type NodeMap = Arc<RwLock<HashMap<LinkAddr, Sender<Bytes>>>>;
type Topology = Arc<RwLock<HashMap<LinkAddr, HashSet<LinkAddr>>>>;

/// Shared medium. A broadcast reaches the 1-hop neighbors of the sender,
/// a unicast reaches its target only if it is a 1-hop neighbor.
pub struct RadioNetworkCore {
    nodes: NodeMap,
    topology: Topology,
    config: RadioConfig,
    stats: Arc<Mutex<NetworkStats>>,
    packet_queue: Sender<RadioPacket>,
    queue_depth: Arc<AtomicU64>,
}

impl RadioNetworkCore {
    /// Starts the medium task. Must be called inside a tokio runtime.
    pub fn new(config: RadioConfig) -> Arc<Self> {
        let nodes: NodeMap = Arc::new(RwLock::new(HashMap::new()));
        let topology: Topology = Arc::new(RwLock::new(HashMap::new()));
        let stats = Arc::new(Mutex::new(NetworkStats::default()));
        let queue_depth = Arc::new(AtomicU64::new(0));
        let (packet_queue, packet_rx) = mpsc::channel(QUEUE_DEPTH);

        info!("RadioNetworkCore initialized with config: {:?}", config);

        tokio::spawn(run_medium(
            packet_rx,
            nodes.clone(),
            topology.clone(),
            stats.clone(),
            config.clone(),
            queue_depth.clone(),
        ));

        Arc::new(Self {
            nodes,
            topology,
            config,
            stats,
            packet_queue,
            queue_depth,
        })
    }

    pub fn config(&self) -> &RadioConfig {
        &self.config
    }

    pub async fn join(self: &Arc<Self>, addr: LinkAddr) -> RadioNode {
        let (tx, rx) = mpsc::channel(NODE_QUEUE_DEPTH);
        self.nodes.write().await.insert(addr, tx);
        self.topology.write().await.entry(addr).or_default();
        debug!("Node {} joined the medium", addr);
        RadioNode {
            addr,
            network_core: Arc::clone(self),
            receiver: Mutex::new(rx),
        }
    }

    /// Puts `a` and `b` in radio range of each other.
    pub async fn connect(&self, a: LinkAddr, b: LinkAddr) {
        if a == b {
            return;
        }
        let mut topology = self.topology.write().await;
        topology.entry(a).or_default().insert(b);
        topology.entry(b).or_default().insert(a);
    }

    pub async fn neighbors_of(&self, addr: LinkAddr) -> Vec<LinkAddr> {
        let topology = self.topology.read().await;
        let mut neighbors: Vec<_> = topology
            .get(&addr)
            .map(|n| n.iter().copied().collect())
            .unwrap_or_default();
        neighbors.sort();
        neighbors
    }

    async fn send_packet(&self, from: LinkAddr, dest: Destination, payload: &[u8]) -> Result<(), RadioError> {
        let air = AirFrame {
            src: from,
            dst: dest,
            payload: payload.to_vec(),
        };
        let frame = bincode::serde::encode_to_vec(&air, bincode::config::standard())
            .map_err(|_| RadioError::InvalidFrame)?;
        if frame.len() > self.config.mtu {
            return Err(RadioError::PacketTooLarge);
        }

        let packet = RadioPacket {
            from,
            dest,
            frame: Bytes::from(frame),
        };
        self.queue_depth.fetch_add(1, Ordering::Relaxed);
        match self.packet_queue.try_send(packet) {
            Ok(()) => {
                trace!("Enqueued frame from {} to {}", from, dest);
                self.stats.lock().await.packets_sent += 1;
                Ok(())
            }
            Err(e) => {
                self.queue_depth.fetch_sub(1, Ordering::Relaxed);
                match e {
                    mpsc::error::TrySendError::Full(_) => {
                        log::error!("Radio packet queue is full, dropping frame from {}", from);
                        Err(RadioError::TransmissionFailed)
                    }
                    mpsc::error::TrySendError::Closed(_) => Err(RadioError::ChannelClosed),
                }
            }
        }
    }

    pub async fn stats(&self) -> MediumStats {
        let stats = self.stats.lock().await;
        MediumStats {
            packets_sent: stats.packets_sent,
            packets_dropped: stats.packets_dropped,
            packets_delivered: stats.packets_delivered,
            bytes_delivered: stats.bytes_delivered,
            queue_depth: self.queue_depth.load(Ordering::Relaxed),
        }
    }
}

/// Scales the configured loss rate so that losses come in bursts.
fn burst_factor(r: f64) -> f64 {
    if r < 0.7 {
        0.8 + (r / 0.7) * 0.4
    } else if r < 0.95 {
        1.2 + ((r - 0.7) / 0.25) * 0.6
    } else {
        2.0 + ((r - 0.95) / 0.05)
    }
}

fn air_time(config: &RadioConfig, len: usize) -> Duration {
    if config.bandwidth_bps == 0 {
        return Duration::ZERO;
    }
    Duration::from_secs_f64((len * 8) as f64 / config.bandwidth_bps as f64)
}

async fn run_medium(
    mut packet_rx: Receiver<RadioPacket>,
    nodes: NodeMap,
    topology: Topology,
    stats: Arc<Mutex<NetworkStats>>,
    config: RadioConfig,
    queue_depth: Arc<AtomicU64>,
) {
    let latency_ms = config.latency.as_secs_f64() * 1000.0;
    let jitter_ms = config.latency_jitter.as_secs_f64() * 1000.0;
    let latency = Normal::new(latency_ms, jitter_ms).ok();
    let mut processed = 0u64;

    while let Some(packet) = packet_rx.recv().await {
        queue_depth.fetch_sub(1, Ordering::Relaxed);

        let propagation = match &latency {
            Some(dist) => {
                let ms = dist.sample(&mut rand::rng()).max(0.0);
                Duration::from_secs_f64(ms / 1000.0)
            }
            None => config.latency,
        };
        tokio::time::sleep(air_time(&config, packet.frame.len()) + propagation).await;

        processed += 1;
        if processed % 1000 == 0 {
            info!("Radio medium processed {} frames", processed);
        }

        let receivers: Vec<LinkAddr> = {
            let topology = topology.read().await;
            let in_range = topology.get(&packet.from);
            match packet.dest {
                Destination::Broadcast => in_range.map(|n| n.iter().copied().collect()).unwrap_or_default(),
                Destination::Unicast(to) => {
                    if in_range.is_some_and(|n| n.contains(&to)) {
                        vec![to]
                    } else {
                        debug!("{} is out of range of {}, dropping unicast", to, packet.from);
                        stats.lock().await.packets_dropped += 1;
                        Vec::new()
                    }
                }
            }
        };

        let nodes = nodes.read().await;
        let mut stats = stats.lock().await;
        for to in receivers {
            let loss = config.packet_loss as f64 * burst_factor(rand::rng().random());
            if rand::rng().random::<f64>() < loss {
                trace!("Frame {} -> {} lost (p={:.3})", packet.from, to, loss);
                stats.packets_dropped += 1;
                continue;
            }

            let Some(channel) = nodes.get(&to) else {
                warn!("Node {} not attached, dropping frame", to);
                continue;
            };
            match channel.try_send(packet.frame.clone()) {
                Ok(()) => {
                    stats.packets_delivered += 1;
                    stats.bytes_delivered += packet.frame.len() as u64;
                }
                Err(e) => warn!("Failed to deliver frame to {}: {}", to, e),
            }
        }
    }
    info!("Radio medium stopped");
}

/// A node's attachment to the [`RadioNetworkCore`].
pub struct RadioNode {
    addr: LinkAddr,
    network_core: Arc<RadioNetworkCore>,
    receiver: Mutex<Receiver<Bytes>>,
}

impl RadioNode {
    pub fn network(&self) -> &Arc<RadioNetworkCore> {
        &self.network_core
    }
}

#[async_trait]
impl Transport for RadioNode {
    fn local_addr(&self) -> LinkAddr {
        self.addr
    }

    async fn send(&self, dest: Destination, payload: Bytes) -> Result<(), RadioError> {
        trace!("RadioNode {} sending {} bytes to {}", self.addr, payload.len(), dest);
        self.network_core.send_packet(self.addr, dest, &payload).await
    }

    async fn receive(&self) -> Result<(LinkAddr, Bytes), RadioError> {
        let mut receiver = self.receiver.lock().await;
        loop {
            let frame = receiver.recv().await.ok_or(RadioError::ChannelClosed)?;
            let air: AirFrame = match bincode::serde::decode_from_slice(&frame, bincode::config::standard()) {
                Ok((air, _)) => air,
                Err(e) => {
                    warn!("RadioNode {} failed to decode air frame: {}", self.addr, e);
                    continue;
                }
            };
            if let Destination::Unicast(to) = air.dst {
                if to != self.addr {
                    continue;
                }
            }
            return Ok((air.src, Bytes::from(air.payload)));
        }
    }
}
