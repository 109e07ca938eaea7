//! Async driver running one DRAND node over a [`Transport`]

use std::collections::HashMap;

use drand_tdma_core::{LinkAddr, Round, SharedSchedule, SlotIndex};
use log::{debug, info, warn};
use tokio::sync::{mpsc, watch};
use tokio::time::{interval_at, sleep_until, Instant, MissedTickBehavior};

use crate::drand::{Action, Coin, Drand, DrandState, Event, TimerKind, TimerToken};
use crate::framing::DrandMessage;
use crate::layout::{install_assigned_slot, install_initial_layout};
use crate::transport::Transport;
use crate::{DrandConfig, RadioError};

const DISCOVERY_QUEUE_DEPTH: usize = 64;

/// Slot outcome published to upper layers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlotStatus {
    pub state: DrandState,
    pub round: Round,
    pub own_timeslot: Option<SlotIndex>,
}

impl SlotStatus {
    pub fn has_timeslot(&self) -> bool {
        self.own_timeslot.is_some()
    }
}

/// Caller side of a [`DrandScheduler`].
pub struct SchedulerHandle {
    pub status: watch::Receiver<SlotStatus>,
    /// Feed for the neighbor discovery service.
    pub discovery: mpsc::Sender<LinkAddr>,
}

/// Owns one DRAND state machine and everything it needs to run:
/// the transport, the shared schedule, the lottery timer and the one-shot timers.
pub struct DrandScheduler<T, C> {
    machine: Drand<C>,
    transport: T,
    schedule: SharedSchedule,
    timers: HashMap<TimerKind, (Instant, TimerToken)>,
    status: watch::Sender<SlotStatus>,
    discovery: mpsc::Receiver<LinkAddr>,
    epoch: Instant,
}

impl<T: Transport, C: Coin> DrandScheduler<T, C> {
    pub fn new(transport: T, schedule: SharedSchedule, config: DrandConfig, coin: C) -> (Self, SchedulerHandle) {
        let machine = Drand::new(transport.local_addr(), config, coin);
        let (status, status_rx) = watch::channel(SlotStatus {
            state: machine.state(),
            round: machine.round(),
            own_timeslot: None,
        });
        let (discovery_tx, discovery) = mpsc::channel(DISCOVERY_QUEUE_DEPTH);

        let scheduler = Self {
            machine,
            transport,
            schedule,
            timers: HashMap::new(),
            status,
            discovery,
            epoch: Instant::now(),
        };
        let handle = SchedulerHandle {
            status: status_rx,
            discovery: discovery_tx,
        };
        (scheduler, handle)
    }

    pub fn machine(&self) -> &Drand<C> {
        &self.machine
    }

    /// Runs until the transport closes.
    pub async fn run(mut self) -> Result<(), RadioError> {
        let config = self.machine.config().clone();
        self.schedule
            .update(|store| install_initial_layout(store, &config))
            .await?;

        let actions = self.machine.start(self.epoch.elapsed());
        self.execute(actions).await;

        let mut phase = interval_at(Instant::now() + config.discovery_phase, config.phase_interval);
        phase.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!(
            "DRAND scheduler {} running, lottery starts in {:?}",
            self.machine.addr(),
            config.discovery_phase
        );

        loop {
            let next_timer = self.next_timer();
            let deadline = next_timer.map(|(at, _, _)| at).unwrap_or_else(Instant::now);

            let event = tokio::select! {
                _ = phase.tick() => Event::PhaseTick,
                Some(addr) = self.discovery.recv() => Event::Discovered(addr),
                received = self.transport.receive() => match received {
                    Ok((from, frame)) => match DrandMessage::decode(&frame) {
                        Ok(message) => Event::Message { from, message },
                        Err(e) => {
                            warn!("{} dropping frame from {}: {}", self.machine.addr(), from, e);
                            continue;
                        }
                    },
                    Err(RadioError::ChannelClosed) => {
                        info!("{} transport closed, scheduler stopping", self.machine.addr());
                        return Ok(());
                    }
                    Err(e) => {
                        warn!("{} receive failed: {}", self.machine.addr(), e);
                        continue;
                    }
                },
                _ = sleep_until(deadline), if next_timer.is_some() => {
                    let Some((_, kind, token)) = next_timer else { continue };
                    self.timers.remove(&kind);
                    Event::TimerFired { kind, token }
                }
            };

            let actions = self.machine.handle(self.epoch.elapsed(), event);
            self.execute(actions).await;
        }
    }

    fn next_timer(&self) -> Option<(Instant, TimerKind, TimerToken)> {
        self.timers
            .iter()
            .map(|(kind, (at, token))| (*at, *kind, *token))
            .min_by_key(|(at, _, _)| *at)
    }

    async fn execute(&mut self, actions: Vec<Action>) {
        let addr = self.machine.addr();
        for action in actions {
            match action {
                Action::Send { dest, message } => {
                    if let Err(e) = self.transport.send(dest, message.encode()).await {
                        warn!("{} failed to send {:?} to {}: {}", addr, message.kind(), dest, e);
                    }
                }
                Action::ArmTimer { kind, after, token } => {
                    self.timers.insert(kind, (Instant::now() + after, token));
                }
                Action::CancelTimer { kind } => {
                    self.timers.remove(&kind);
                }
                Action::StateChanged { .. } => {}
                Action::SlotAssigned(slot) => {
                    let config = self.machine.config().clone();
                    if let Err(e) = self
                        .schedule
                        .update(|store| install_assigned_slot(store, &config, slot))
                        .await
                    {
                        warn!("{} could not install slot {}: {}", addr, slot, e);
                    }
                }
                Action::Report(notice) => warn!("{} reported {:?}", addr, notice),
            }
        }

        let status = SlotStatus {
            state: self.machine.state(),
            round: self.machine.round(),
            own_timeslot: self.machine.own_timeslot(),
        };
        if *self.status.borrow() != status {
            debug!("{} status {:?}", addr, status);
            self.status.send_replace(status);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layout::DRAND_SLOTFRAME;
    use crate::network_core::RadioNetworkCore;
    use crate::RadioConfig;
    use async_trait::async_trait;
    use bytes::Bytes;
    use drand_tdma_core::{Destination, LinkOptions};
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use std::time::Duration;
    use tokio::time::timeout;

    struct ClosedTransport;

    #[async_trait]
    impl Transport for ClosedTransport {
        fn local_addr(&self) -> LinkAddr {
            LinkAddr::new(0, 1)
        }

        async fn send(&self, _dest: Destination, _payload: Bytes) -> Result<(), RadioError> {
            Ok(())
        }

        async fn receive(&self) -> Result<(LinkAddr, Bytes), RadioError> {
            Err(RadioError::ChannelClosed)
        }
    }

    fn fast_config() -> DrandConfig {
        DrandConfig {
            initial_request_timeout: Duration::from_millis(100),
            grant_ack_timeout: Duration::from_millis(100),
            phase_interval: Duration::from_millis(20),
            discovery_phase: Duration::from_millis(50),
            ..DrandConfig::default()
        }
    }

    #[tokio::test]
    async fn test_run_installs_layout_and_stops_on_closed_transport() {
        let schedule = SharedSchedule::default();
        let (scheduler, _handle) =
            DrandScheduler::new(ClosedTransport, schedule.clone(), fast_config(), StdRng::seed_from_u64(1));
        tokio_test::assert_ok!(scheduler.run().await);

        let store = schedule.snapshot().await;
        assert_eq!(store.get_slotframe_by_handle(DRAND_SLOTFRAME).unwrap().size, 11);
    }

    #[tokio::test]
    async fn test_two_neighbors_obtain_distinct_slots() {
        let core = RadioNetworkCore::new(RadioConfig {
            packet_loss: 0.0,
            latency: Duration::from_millis(1),
            latency_jitter: Duration::ZERO,
            ..RadioConfig::default()
        });
        let a = LinkAddr::new(0, 1);
        let b = LinkAddr::new(0, 2);
        let node_a = core.join(a).await;
        let node_b = core.join(b).await;
        core.connect(a, b).await;

        let schedule_a = SharedSchedule::default();
        let (sched_a, mut handle_a) =
            DrandScheduler::new(node_a, schedule_a.clone(), fast_config(), StdRng::seed_from_u64(7));
        let (sched_b, mut handle_b) =
            DrandScheduler::new(node_b, SharedSchedule::default(), fast_config(), StdRng::seed_from_u64(8));
        handle_a.discovery.send(b).await.unwrap();
        handle_b.discovery.send(a).await.unwrap();
        tokio::spawn(sched_a.run());
        tokio::spawn(sched_b.run());

        let wait = Duration::from_secs(10);
        let status_a = *timeout(wait, handle_a.status.wait_for(SlotStatus::has_timeslot))
            .await
            .unwrap()
            .unwrap();
        let status_b = *timeout(wait, handle_b.status.wait_for(SlotStatus::has_timeslot))
            .await
            .unwrap()
            .unwrap();
        assert_ne!(status_a.own_timeslot, status_b.own_timeslot);

        let slot = status_a.own_timeslot.unwrap();
        let store = schedule_a.snapshot().await;
        let link = store.get_link_by_timeslot(DRAND_SLOTFRAME, 1 + slot as u16).unwrap();
        assert_eq!(link.options, LinkOptions::TX);
    }
}
