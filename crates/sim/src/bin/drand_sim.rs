//! DRAND slot allocation simulation

use std::time::Duration;

use anyhow::{Context, Result};
use colored::Colorize;
use drand_tdma_sim::scenarios::{print_report, run_allocation};
use drand_tdma_sim::topology::Topology;
use drand_tdma_sim::SimulationPresets;
use rand::rngs::StdRng;
use rand::SeedableRng;

const DEADLINE: Duration = Duration::from_secs(60);

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init();

    let seed: u64 = match std::env::args().nth(1) {
        Some(arg) => arg.parse().with_context(|| format!("invalid seed {:?}", arg))?,
        None => 42,
    };

    println!("{}", "DRAND TDMA Slot Allocation Simulation".bright_blue().bold());
    println!("{}", "=====================================".bright_blue());
    println!("Seed: {}", seed);

    let topologies = vec![
        ("Line of 8", Topology::line(8)),
        ("4x4 grid", Topology::grid(4, 4)),
        ("Star of 8", Topology::star(8)),
        (
            "Random geometric, 20 nodes",
            Topology::random_geometric(20, 0.35, &mut StdRng::seed_from_u64(seed)),
        ),
    ];
    let conditions = vec![
        ("Good Conditions", SimulationPresets::good_conditions()),
        ("Average Conditions", SimulationPresets::average_conditions()),
        ("Poor Conditions", SimulationPresets::poor_conditions()),
    ];
    let drand = SimulationPresets::simulation_drand();

    let mut failures = 0;
    for (condition, radio) in &conditions {
        println!("{}", format!("\n>>> Testing: {}", condition).bright_green().bold());
        println!("Packet Loss: {}%", (radio.packet_loss * 100.0) as u32);
        println!("Latency: {:?}", radio.latency);

        for (name, topology) in &topologies {
            println!();
            println!(
                "{} ({} nodes, {} links, max degree {})",
                name,
                topology.len(),
                topology.edges().count(),
                topology.max_degree()
            );
            let report = run_allocation(topology, radio.clone(), drand.clone(), DEADLINE, seed, true).await?;
            print_report(name, &report);
            if !report.converged() {
                failures += 1;
            }
        }
        println!("{}", "-".repeat(50));
    }

    println!("{}", "\n>>> Testing: Extreme Conditions".bright_red().bold());
    let report = run_allocation(
        &Topology::grid(4, 4),
        SimulationPresets::extreme_conditions(),
        drand,
        DEADLINE,
        seed,
        true,
    )
    .await?;
    print_report("4x4 grid", &report);
    if !report.converged() {
        failures += 1;
    }

    if failures == 0 {
        println!("\n{}", "All simulations converged!".bright_green().bold());
    } else {
        println!("\n{}", format!("{} simulations did not converge", failures).bright_red().bold());
    }
    Ok(())
}
