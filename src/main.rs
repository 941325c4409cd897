//! Simulator entry point: load a scenario, run flood rounds, print a report.
//!
//! Usage: `glossy-sim [scenario.json]` (defaults to `scenarios/line5.json`).
//! Logging is controlled by `RUST_LOG`; the simulation runs on the scaled
//! virtual clock at the scenario's `speed_percent`.

use anyhow::{Context, bail};
use embassy_executor::Executor;
use log::info;
use std::fs;

use glossy::config::MAX_PAYLOAD_LEN;
use glossy::sim::network_task::network_task;
use glossy::sim::types::{MAX_SIM_NODES, Scenario};
use glossy::time_driver;

fn load_scenario(path: &str) -> anyhow::Result<Scenario> {
    let text =
        fs::read_to_string(path).with_context(|| format!("failed to read scenario {path}"))?;
    let scenario: Scenario =
        serde_json::from_str(&text).with_context(|| format!("invalid scenario JSON in {path}"))?;

    if scenario.nodes.is_empty() {
        bail!("scenario has no nodes");
    }
    if scenario.nodes.len() > MAX_SIM_NODES {
        bail!(
            "scenario has {} nodes, the task pool holds {}",
            scenario.nodes.len(),
            MAX_SIM_NODES
        );
    }
    for (i, a) in scenario.nodes.iter().enumerate() {
        if scenario.nodes[..i].iter().any(|b| b.id == a.id) {
            bail!("duplicate node id {}", a.id);
        }
    }
    if !scenario
        .nodes
        .iter()
        .any(|n| n.id == scenario.flood.initiator_id)
    {
        bail!("initiator {} is not in the node list", scenario.flood.initiator_id);
    }
    if scenario.flood.payload.len() > MAX_PAYLOAD_LEN {
        bail!(
            "payload of {} bytes exceeds the {} byte limit",
            scenario.flood.payload.len(),
            MAX_PAYLOAD_LEN
        );
    }
    if scenario.flood.n_tx_max > 0x0f {
        bail!("n_tx_max {} does not fit the wire header", scenario.flood.n_tx_max);
    }
    Ok(scenario)
}

fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "scenarios/line5.json".to_string());
    let scenario = load_scenario(&path)?;

    time_driver::set_time_scale_percent(scenario.speed_percent);
    info!(
        "running {} rounds over {} nodes at {}% speed",
        scenario.rounds,
        scenario.nodes.len(),
        time_driver::get_time_scale_percent()
    );

    // The executor owns the thread; the network task exits the process when
    // every round has been reported.
    let executor: &'static mut Executor = Box::leak(Box::new(Executor::new()));
    executor.run(|spawner| {
        let _ = spawner.spawn(network_task(spawner, scenario));
    });
}
