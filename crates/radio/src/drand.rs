//! DRAND slot negotiation state machine.
//!
//! The machine performs no I/O. The owner feeds it [`Event`]s together with
//! the current monotonic time and carries out the returned [`Action`]s:
//! sending messages, arming and cancelling one-shot timers, installing an
//! assigned slot. Every armed timer carries a [`TimerToken`]; an expiry whose
//! token is no longer current is ignored.

use std::collections::HashMap;
use std::fmt;
use std::time::Duration;

use drand_tdma_core::{Destination, LinkAddr, Round, SlotIndex};
use log::{debug, info, trace, warn};

use crate::framing::{DrandMessage, OccupancyEntry};
use crate::neighbor::{NegotiationState, NeighborTable, NeighborTableError};
use crate::picker::{check_all_received, pick_timeslot, Completion};
use crate::DrandConfig;

/// Unbiased coin used for the per-round lottery.
pub trait Coin {
    fn toss(&mut self) -> bool;
}

impl<R: rand::Rng + ?Sized> Coin for R {
    fn toss(&mut self) -> bool {
        self.random_bool(0.5)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DrandState {
    Idle,
    Request,
    Grant,
    Release,
}

impl fmt::Display for DrandState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DrandState::Idle => "IDLE",
            DrandState::Request => "REQUEST",
            DrandState::Grant => "GRANT",
            DrandState::Release => "RELEASE",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TimerKind {
    /// Request retry, armed with `dA`.
    Request,
    /// Grant acknowledgement, armed with `dB`.
    GrantAck,
    /// Neighbor liveness purge.
    Purge,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimerToken(u64);

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    /// Periodic lottery timer.
    PhaseTick,
    /// Neighbor discovery found a directly reachable node.
    Discovered(LinkAddr),
    Message {
        from: LinkAddr,
        message: DrandMessage,
    },
    TimerFired {
        kind: TimerKind,
        token: TimerToken,
    },
}

/// Conditions reported to the owner. None of them is fatal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Notice {
    NeighborTableFull(LinkAddr),
    NoFreeTimeslot,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    Send {
        dest: Destination,
        message: DrandMessage,
    },
    /// Arms `kind`, replacing any pending timer of the same kind.
    ArmTimer {
        kind: TimerKind,
        after: Duration,
        token: TimerToken,
    },
    CancelTimer {
        kind: TimerKind,
    },
    StateChanged {
        from: DrandState,
        to: DrandState,
    },
    /// Emitted the first time the node obtains a slot.
    SlotAssigned(SlotIndex),
    Report(Notice),
}

pub struct Drand<C> {
    addr: LinkAddr,
    config: DrandConfig,
    state: DrandState,
    round: Round,
    own_timeslot: Option<SlotIndex>,
    d_a: Duration,
    d_b: Duration,
    last_request_time: Duration,
    last_grant_or_reject_time: Duration,
    /// Requester served while in GRANT.
    grant_neighbor: Option<(LinkAddr, Round)>,
    neighbors: NeighborTable,
    timers: HashMap<TimerKind, TimerToken>,
    next_token: u64,
    table_full_reported: bool,
    no_slot_reported: bool,
    slot_reported: bool,
    coin: C,
}

impl<C: Coin> Drand<C> {
    pub fn new(addr: LinkAddr, config: DrandConfig, coin: C) -> Self {
        Self {
            addr,
            state: DrandState::Idle,
            round: 0,
            own_timeslot: None,
            d_a: config.initial_request_timeout,
            d_b: config.grant_ack_timeout,
            last_request_time: Duration::ZERO,
            last_grant_or_reject_time: Duration::ZERO,
            grant_neighbor: None,
            neighbors: NeighborTable::new(config.neighbor_capacity),
            timers: HashMap::new(),
            next_token: 0,
            table_full_reported: false,
            no_slot_reported: false,
            slot_reported: false,
            coin,
            config,
        }
    }

    pub fn addr(&self) -> LinkAddr {
        self.addr
    }

    pub fn config(&self) -> &DrandConfig {
        &self.config
    }

    pub fn state(&self) -> DrandState {
        self.state
    }

    pub fn round(&self) -> Round {
        self.round
    }

    pub fn has_timeslot(&self) -> bool {
        self.own_timeslot.is_some()
    }

    pub fn own_timeslot(&self) -> Option<SlotIndex> {
        self.own_timeslot
    }

    /// Current adaptive request timeout.
    pub fn d_a(&self) -> Duration {
        self.d_a
    }

    pub fn d_b(&self) -> Duration {
        self.d_b
    }

    pub fn last_grant_or_reject_time(&self) -> Duration {
        self.last_grant_or_reject_time
    }

    pub fn grant_neighbor(&self) -> Option<(LinkAddr, Round)> {
        self.grant_neighbor
    }

    pub fn neighbors(&self) -> &NeighborTable {
        &self.neighbors
    }

    /// Arms the liveness purge when one is configured.
    pub fn start(&mut self, _now: Duration) -> Vec<Action> {
        let mut out = Vec::new();
        info!("DRAND node {} starting, {} slots", self.addr, self.config.max_slots);
        if let Some(interval) = self.config.purge_interval {
            self.arm(TimerKind::Purge, interval, &mut out);
        }
        out
    }

    pub fn handle(&mut self, now: Duration, event: Event) -> Vec<Action> {
        let mut out = Vec::new();
        match event {
            Event::PhaseTick => self.on_phase_tick(now, &mut out),
            Event::Discovered(addr) => {
                if addr != self.addr {
                    let res = self.neighbors.discovered(addr, now);
                    self.note_table(res, &mut out);
                }
            }
            Event::Message { from, message } => self.on_message(now, from, message, &mut out),
            Event::TimerFired { kind, token } => self.on_timer(now, kind, token, &mut out),
        }
        out
    }

    fn on_phase_tick(&mut self, now: Duration, out: &mut Vec<Action>) {
        if self.state != DrandState::Idle || self.own_timeslot.is_some() {
            return;
        }
        if !self.coin.toss() {
            trace!("{} lost the lottery", self.addr);
            return;
        }

        self.round = self.round.wrapping_add(1);
        self.transition(DrandState::Request, out);
        self.neighbors.mark_direct_pending();
        self.send(Destination::Broadcast, DrandMessage::Request { round: self.round }, out);
        self.last_request_time = now;
        self.arm(TimerKind::Request, self.d_a, out);
        self.check_completion(out);
    }

    fn on_message(&mut self, now: Duration, from: LinkAddr, message: DrandMessage, out: &mut Vec<Action>) {
        if from == self.addr {
            return;
        }
        debug!("{} <- {} {:?}", self.addr, from, message);
        let res = self.neighbors.observe(from, now);
        self.note_table(res, out);

        match message {
            DrandMessage::Request { round } => self.on_request(from, round, out),
            DrandMessage::Grant { round, occupancy } => self.on_grant(now, from, round, occupancy, out),
            DrandMessage::Reject { round } => self.on_reject(now, from, round, out),
            DrandMessage::Fail { round } => {
                if self.is_serving(from, round) {
                    self.end_grant(out);
                }
            }
            DrandMessage::Release { round, timeslot } => {
                let res = self.neighbors.record_slot(from, timeslot, now);
                self.note_table(res, out);
                if self.is_serving(from, round) {
                    self.end_grant(out);
                }
                self.send(
                    Destination::Broadcast,
                    DrandMessage::TwoHopRelease {
                        round,
                        timeslot,
                        addr: from,
                    },
                    out,
                );
            }
            DrandMessage::TwoHopRelease { timeslot, addr, .. } => {
                if addr != self.addr {
                    let res = self.neighbors.record_slot(addr, timeslot, now);
                    self.note_table(res, out);
                }
            }
        }
    }

    fn on_request(&mut self, from: LinkAddr, round: Round, out: &mut Vec<Action>) {
        match self.state {
            DrandState::Idle | DrandState::Release => {
                self.grant_neighbor = Some((from, round));
                self.transition(DrandState::Grant, out);
                self.send_grant(from, round, out);
                self.arm(TimerKind::GrantAck, self.d_b, out);
            }
            // retransmission from the requester already being served
            DrandState::Grant if self.is_serving(from, round) => {
                self.send_grant(from, round, out);
                self.arm(TimerKind::GrantAck, self.d_b, out);
            }
            DrandState::Request | DrandState::Grant => {
                debug!("{} rejects {} round {} while in {}", self.addr, from, round, self.state);
                self.send(Destination::Unicast(from), DrandMessage::Reject { round }, out);
            }
        }
    }

    fn on_grant(
        &mut self,
        now: Duration,
        from: LinkAddr,
        round: Round,
        occupancy: Vec<OccupancyEntry>,
        out: &mut Vec<Action>,
    ) {
        let me = self.addr;
        for entry in occupancy.into_iter().filter(|e| e.addr != me) {
            let res = self.neighbors.record_slot(entry.addr, entry.timeslot, now);
            self.note_table(res, out);
        }
        self.update_d_a(now);

        if self.state == DrandState::Request && round == self.round {
            self.neighbors.set_negotiation(from, NegotiationState::Granted);
            self.check_completion(out);
        } else if let (Some(timeslot), true) = (self.own_timeslot, round == self.round) {
            // our RELEASE did not reach the granter
            self.send(
                Destination::Unicast(from),
                DrandMessage::Release {
                    round: self.round,
                    timeslot,
                },
                out,
            );
        } else {
            debug!("{} got late GRANT from {} round {}", self.addr, from, round);
            self.send(Destination::Unicast(from), DrandMessage::Fail { round }, out);
        }
    }

    fn on_reject(&mut self, now: Duration, from: LinkAddr, round: Round, out: &mut Vec<Action>) {
        if self.state != DrandState::Request || round != self.round {
            return;
        }
        self.cancel(TimerKind::Request, out);
        self.neighbors.set_negotiation(from, NegotiationState::Rejected);
        self.update_d_a(now);
        self.transition(DrandState::Idle, out);
        self.send(Destination::Broadcast, DrandMessage::Fail { round }, out);
    }

    fn on_timer(&mut self, now: Duration, kind: TimerKind, token: TimerToken, out: &mut Vec<Action>) {
        if self.timers.get(&kind) != Some(&token) {
            trace!("{} ignoring stale {:?} timer", self.addr, kind);
            return;
        }
        self.timers.remove(&kind);

        match kind {
            TimerKind::Request => {
                if self.state != DrandState::Request {
                    return;
                }
                let pending = self.neighbors.pending_direct();
                debug!("{} request timeout, resending to {} neighbors", self.addr, pending.len());
                for addr in pending {
                    self.send(Destination::Unicast(addr), DrandMessage::Request { round: self.round }, out);
                }
                self.last_request_time = now;
                self.arm(TimerKind::Request, self.d_a, out);
            }
            TimerKind::GrantAck => {
                if let (DrandState::Grant, Some((addr, round))) = (self.state, self.grant_neighbor) {
                    debug!("{} grant timeout, resending GRANT to {}", self.addr, addr);
                    self.send_grant(addr, round, out);
                    self.arm(TimerKind::GrantAck, self.d_b, out);
                }
            }
            TimerKind::Purge => {
                let removed = self.neighbors.purge_stale(now, self.config.liveness_window);
                if !removed.is_empty() {
                    self.table_full_reported = false;
                    self.no_slot_reported = false;
                }
                if let Some((addr, _)) = self.grant_neighbor {
                    if removed.contains(&addr) {
                        info!("{} dropping grant for vanished {}", self.addr, addr);
                        self.end_grant(out);
                    }
                }
                if let Some(interval) = self.config.purge_interval {
                    self.arm(TimerKind::Purge, interval, out);
                }
                if self.state == DrandState::Request {
                    self.check_completion(out);
                }
            }
        }
    }

    fn check_completion(&mut self, out: &mut Vec<Action>) {
        if check_all_received(&self.neighbors) != Completion::AllGranted {
            return;
        }
        self.cancel(TimerKind::Request, out);

        match pick_timeslot(self.neighbors.occupied_slots(), self.config.max_slots) {
            Ok(slot) => {
                info!("{} picked slot {} in round {}", self.addr, slot, self.round);
                self.own_timeslot = Some(slot);
                self.transition(DrandState::Release, out);
                self.send(
                    Destination::Broadcast,
                    DrandMessage::Release {
                        round: self.round,
                        timeslot: slot,
                    },
                    out,
                );
                if !self.slot_reported {
                    self.slot_reported = true;
                    out.push(Action::SlotAssigned(slot));
                }
            }
            Err(e) => {
                if self.no_slot_reported {
                    debug!("{}: {}", self.addr, e);
                } else {
                    warn!("{}: {}", self.addr, e);
                    self.no_slot_reported = true;
                    out.push(Action::Report(Notice::NoFreeTimeslot));
                }
                self.send(Destination::Broadcast, DrandMessage::Fail { round: self.round }, out);
                self.transition(DrandState::Idle, out);
            }
        }
    }

    fn is_serving(&self, addr: LinkAddr, round: Round) -> bool {
        self.state == DrandState::Grant && self.grant_neighbor == Some((addr, round))
    }

    fn end_grant(&mut self, out: &mut Vec<Action>) {
        self.cancel(TimerKind::GrantAck, out);
        self.grant_neighbor = None;
        let rest = self.rest_state();
        self.transition(rest, out);
    }

    fn rest_state(&self) -> DrandState {
        if self.own_timeslot.is_some() {
            DrandState::Release
        } else {
            DrandState::Idle
        }
    }

    fn send_grant(&mut self, to: LinkAddr, round: Round, out: &mut Vec<Action>) {
        let mut occupancy = self.neighbors.occupancy_snapshot(to);
        if let Some(timeslot) = self.own_timeslot {
            occupancy.push(OccupancyEntry {
                addr: self.addr,
                timeslot,
            });
        }
        self.send(Destination::Unicast(to), DrandMessage::Grant { round, occupancy }, out);
    }

    fn update_d_a(&mut self, now: Duration) {
        let rtt = now.saturating_sub(self.last_request_time);
        if rtt > self.d_a {
            debug!("{} dA {:?} -> {:?}", self.addr, self.d_a, rtt);
            self.d_a = rtt;
        }
        self.last_grant_or_reject_time = now;
    }

    fn note_table(&mut self, res: Result<(), NeighborTableError>, out: &mut Vec<Action>) {
        if let Err(NeighborTableError::Full { addr, .. }) = res {
            if self.table_full_reported {
                trace!("{}: neighbor {} not tracked, table full", self.addr, addr);
            } else {
                warn!("{}: neighbor table full, {} not tracked", self.addr, addr);
                self.table_full_reported = true;
                out.push(Action::Report(Notice::NeighborTableFull(addr)));
            }
        }
    }

    fn transition(&mut self, to: DrandState, out: &mut Vec<Action>) {
        if self.state == to {
            return;
        }
        info!("{} {} -> {} (round {})", self.addr, self.state, to, self.round);
        out.push(Action::StateChanged { from: self.state, to });
        self.state = to;
    }

    fn send(&mut self, dest: Destination, message: DrandMessage, out: &mut Vec<Action>) {
        trace!("{} -> {} {:?}", self.addr, dest, message);
        out.push(Action::Send { dest, message });
    }

    fn arm(&mut self, kind: TimerKind, after: Duration, out: &mut Vec<Action>) {
        self.next_token += 1;
        let token = TimerToken(self.next_token);
        self.timers.insert(kind, token);
        out.push(Action::ArmTimer { kind, after, token });
    }

    fn cancel(&mut self, kind: TimerKind, out: &mut Vec<Action>) {
        if self.timers.remove(&kind).is_some() {
            out.push(Action::CancelTimer { kind });
        }
    }
}

impl<C> fmt::Display for Drand<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "DRAND {} state {} round {} ", self.addr, self.state, self.round)?;
        match self.own_timeslot {
            Some(slot) => writeln!(f, "slot {}", slot)?,
            None => writeln!(f, "no slot")?,
        }
        writeln!(f, "dA {:?} dB {:?}", self.d_a, self.d_b)?;
        write!(f, "{}", self.neighbors)
    }
}
