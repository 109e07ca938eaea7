//! Allocation scenarios over the simulated radio medium

use std::collections::{BTreeMap, HashMap};
use std::time::Duration;

use anyhow::Result;
use colored::Colorize;
use drand_tdma_core::{LinkAddr, SharedSchedule, SlotIndex};
use drand_tdma_radio::{DrandConfig, DrandScheduler, MediumStats, RadioConfig, RadioNetworkCore, SlotStatus};
use indicatif::{ProgressBar, ProgressStyle};
use log::{debug, info};
use rand::rngs::StdRng;
use rand::SeedableRng;
use tokio::sync::watch;
use tokio::time::{sleep, Instant};

use crate::topology::Topology;

const POLL_INTERVAL: Duration = Duration::from_millis(50);

#[derive(Debug, Clone)]
pub struct ScenarioReport {
    pub nodes: usize,
    pub slots: BTreeMap<LinkAddr, SlotIndex>,
    pub conflicts: Vec<(LinkAddr, LinkAddr)>,
    pub elapsed: Duration,
    pub medium: MediumStats,
}

impl ScenarioReport {
    pub fn assigned(&self) -> usize {
        self.slots.len()
    }

    pub fn converged(&self) -> bool {
        self.assigned() == self.nodes && self.conflicts.is_empty()
    }

    /// Number of distinct slots in use.
    pub fn slot_span(&self) -> usize {
        self.slots.values().max().map(|m| *m as usize + 1).unwrap_or(0)
    }
}

/// Runs one DRAND node per topology vertex until every node holds a slot
/// or `deadline` passes, then checks two-hop uniqueness.
pub async fn run_allocation(
    topology: &Topology,
    radio: RadioConfig,
    drand: DrandConfig,
    deadline: Duration,
    seed: u64,
    show_progress: bool,
) -> Result<ScenarioReport> {
    let core = RadioNetworkCore::new(radio);
    let mut statuses: Vec<(LinkAddr, watch::Receiver<SlotStatus>)> = Vec::new();
    let mut tasks = Vec::new();

    let mut nodes = Vec::new();
    for addr in topology.nodes() {
        nodes.push(core.join(*addr).await);
    }
    for (a, b) in topology.edges() {
        core.connect(a, b).await;
    }

    for (i, node) in nodes.into_iter().enumerate() {
        let addr = topology.nodes()[i];
        let rng = StdRng::seed_from_u64(seed.wrapping_add(i as u64));
        let (scheduler, handle) = DrandScheduler::new(node, SharedSchedule::default(), drand.clone(), rng);
        for neighbor in core.neighbors_of(addr).await {
            handle.discovery.send(neighbor).await?;
        }
        debug!("Spawning scheduler for {}", addr);
        tasks.push(tokio::spawn(scheduler.run()));
        statuses.push((addr, handle.status));
    }

    let progress = if show_progress {
        let pb = ProgressBar::new(topology.len() as u64);
        pb.set_style(ProgressStyle::with_template("{spinner} [{elapsed_precise}] {bar:40} {pos}/{len} {msg}")?);
        pb
    } else {
        ProgressBar::hidden()
    };

    let start = Instant::now();
    let assigned = |statuses: &[(LinkAddr, watch::Receiver<SlotStatus>)]| {
        statuses.iter().filter(|(_, rx)| rx.borrow().has_timeslot()).count()
    };
    while assigned(&statuses) < topology.len() && start.elapsed() < deadline {
        progress.set_position(assigned(&statuses) as u64);
        sleep(POLL_INTERVAL).await;
    }
    let elapsed = start.elapsed();
    progress.set_position(assigned(&statuses) as u64);
    progress.finish_with_message(format!("{:.2?}", elapsed));

    for task in &tasks {
        task.abort();
    }

    let slots: BTreeMap<LinkAddr, SlotIndex> = statuses
        .iter()
        .filter_map(|(addr, rx)| rx.borrow().own_timeslot.map(|s| (*addr, s)))
        .collect();
    let lookup: HashMap<LinkAddr, SlotIndex> = slots.iter().map(|(a, s)| (*a, *s)).collect();
    let conflicts = topology.slot_conflicts(&lookup);
    let medium = core.stats().await;

    info!(
        "Allocation finished: {}/{} nodes in {:?}, {} conflicts",
        slots.len(),
        topology.len(),
        elapsed,
        conflicts.len()
    );

    Ok(ScenarioReport {
        nodes: topology.len(),
        slots,
        conflicts,
        elapsed,
        medium,
    })
}

pub fn print_report(name: &str, report: &ScenarioReport) {
    println!("{}", format!(">>> {}", name).bright_green().bold());
    println!(
        "Nodes with a slot: {}/{} after {:.2?}",
        report.assigned(),
        report.nodes,
        report.elapsed
    );
    println!("Slots in use: {}", report.slot_span());
    for (addr, slot) in &report.slots {
        println!("  {} -> slot {}", addr, slot);
    }
    println!(
        "Medium: {} sent, {} delivered, {} dropped, {} bytes",
        report.medium.packets_sent,
        report.medium.packets_delivered,
        report.medium.packets_dropped,
        report.medium.bytes_delivered
    );

    if report.conflicts.is_empty() {
        println!("{}", "No two-hop slot conflicts".bright_green());
    } else {
        for (a, b) in &report.conflicts {
            println!("{}", format!("  conflict: {} and {} share a slot", a, b).bright_red());
        }
    }
    if report.converged() {
        println!("{}", "Converged".bright_yellow());
    } else {
        println!("{}", "Did not converge".bright_red().bold());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::SimulationPresets;

    #[tokio::test]
    async fn test_line_converges_without_conflicts() {
        let report = run_allocation(
            &Topology::line(5),
            SimulationPresets::ideal_conditions(),
            SimulationPresets::fast_drand(),
            Duration::from_secs(20),
            11,
            false,
        )
        .await
        .unwrap();

        assert!(report.converged(), "{:?}", report);
        assert!(report.slot_span() <= 5);
    }

    #[tokio::test]
    async fn test_star_spokes_get_distinct_slots() {
        let report = run_allocation(
            &Topology::star(5),
            SimulationPresets::ideal_conditions(),
            SimulationPresets::fast_drand(),
            Duration::from_secs(20),
            5,
            false,
        )
        .await
        .unwrap();

        assert!(report.converged(), "{:?}", report);
        let mut used: Vec<_> = report.slots.values().copied().collect();
        used.sort();
        used.dedup();
        assert_eq!(used.len(), 5);
    }
}
