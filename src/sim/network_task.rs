//! Central network task driving the simulation timeline.
//!
//! High-level flow per flood round:
//! 1) Tell every receiver, then the initiator, to start the flood.
//! 2) `select3` waits for: a node event (transmission, report), the next
//!    end-of-airtime deadline, or the end of the round.
//! 3) A transmission fans out to every node in range: the preamble becomes
//!    detectable immediately, the frame itself is resolved at its airtime
//!    deadline together with everything overlapping it at that receiver.
//! 4) At the round's end every node is stopped and its report collected.
//!
//! Overlap resolution is per receiver: byte-identical frames superpose
//! constructively and arrive as one reception; differing frames survive only
//! under the capture rule. A node locks onto the first detectable preamble,
//! so the delivered timestamps may belong to a different group member than
//! the one it locked on; with sub-tick jitter the difference is noise.

use embassy_executor::Spawner;
use embassy_futures::select::{Either3, select3};
use embassy_time::{Duration, Instant, Timer};
use log::{debug, info, warn};
use rand::SeedableRng;
use rand::rngs::StdRng;
use std::collections::HashMap;

use crate::config::{airtime_hf, tau1_hf};
use crate::sim::node_task::node_task;
use crate::sim::propagation::{self, OverlapOutcome};
use crate::sim::radio::now_hf;
use crate::sim::types::{
    FloodReport, FloodSetup, NodeInput, NodeInputQueue, NodeInputSender, NodeOutput,
    NodesOutputQueue, NodesOutputReceiver, RadioFrame, Scenario,
};
use crate::sim::wait_until;

/// One frame in flight toward one receiver.
#[derive(Clone)]
struct Airborne {
    receiver: u16,
    frame: RadioFrame,
    t_rx_start: u64,
    t_rx_stop: u64,
    rssi: f32,
    resolved: bool,
}

/// What one round produced: the initiator's true first-TX start and every
/// node's report.
pub struct RoundResult {
    pub t0: Option<u64>,
    pub reports: Vec<FloodReport>,
}

struct Network {
    scenario: Scenario,
    senders: HashMap<u16, NodeInputSender>,
    rng: StdRng,
    airborne: Vec<Airborne>,
}

impl Network {
    /// A node put a frame on the air: compute per-link reception and make
    /// the preamble detectable at every node in range.
    async fn fan_out(&mut self, sender_id: u16, frame: RadioFrame, t_tx_start: u64) {
        let Some(tx_spec) = self
            .scenario
            .nodes
            .iter()
            .find(|n| n.id == sender_id)
            .cloned()
        else {
            return;
        };
        let airtime = airtime_hf(frame.len() as u8);

        let mut reached = Vec::new();
        for spec in &self.scenario.nodes {
            if spec.id == sender_id {
                continue;
            }
            let distance = tx_spec.distance_to(spec);
            let rssi = propagation::rssi_at(
                tx_spec.tx_power_dbm,
                distance,
                &self.scenario.channel,
                &mut self.rng,
            );
            if rssi < self.scenario.channel.sensitivity_dbm {
                continue;
            }
            let jitter = propagation::timestamp_jitter(&self.scenario.channel, &mut self.rng);
            let t_rx_start = (t_tx_start + tau1_hf()).saturating_add_signed(jitter);
            let t_rx_stop = t_rx_start - tau1_hf() + airtime;
            reached.push(Airborne {
                receiver: spec.id,
                frame: frame.clone(),
                t_rx_start,
                t_rx_stop,
                rssi,
                resolved: false,
            });
        }
        debug!(
            "[{}] frame of {} bytes reaches {} nodes",
            sender_id,
            frame.len(),
            reached.len()
        );
        for entry in reached {
            if let Some(tx) = self.senders.get(&entry.receiver).copied() {
                tx.send(NodeInput::CarrierOn {
                    t_rx_start: entry.t_rx_start,
                })
                .await;
            }
            self.airborne.push(entry);
        }
    }

    /// Earliest unresolved end-of-airtime, the next wake-up of the loop.
    fn next_deadline(&self) -> Option<u64> {
        self.airborne
            .iter()
            .filter(|p| !p.resolved)
            .map(|p| p.t_rx_stop)
            .min()
    }

    /// Resolve every frame whose airtime has elapsed, together with the
    /// frames overlapping it at the same receiver.
    async fn deliver_due(&mut self) {
        let now = now_hf();
        loop {
            let Some(pivot_idx) = self
                .airborne
                .iter()
                .position(|p| !p.resolved && p.t_rx_stop <= now)
            else {
                break;
            };
            let pivot = self.airborne[pivot_idx].clone();
            let group: Vec<usize> = self
                .airborne
                .iter()
                .enumerate()
                .filter(|(_, p)| {
                    !p.resolved
                        && p.receiver == pivot.receiver
                        && p.t_rx_start <= pivot.t_rx_stop
                        && pivot.t_rx_start <= p.t_rx_stop
                })
                .map(|(i, _)| i)
                .collect();
            let members: Vec<(&[u8], f32)> = group
                .iter()
                .map(|&i| (self.airborne[i].frame.as_slice(), self.airborne[i].rssi))
                .collect();
            let outcome = propagation::resolve_overlap(
                &members,
                self.scenario.channel.capture_threshold_db,
            );
            let msg = match outcome {
                OverlapOutcome::Constructive(w) | OverlapOutcome::Captured(w) => {
                    let winner = &self.airborne[group[w]];
                    NodeInput::Deliver {
                        frame: winner.frame.clone(),
                        t_rx_start: winner.t_rx_start,
                        t_rx_stop: winner.t_rx_stop,
                        rssi_dbm: winner.rssi.round() as i8,
                    }
                }
                OverlapOutcome::Collision => NodeInput::Corrupted,
            };
            for &i in &group {
                self.airborne[i].resolved = true;
            }
            if let Some(tx) = self.senders.get(&pivot.receiver).copied() {
                tx.send(msg).await;
            }
        }
        self.airborne.retain(|p| !p.resolved);
    }

    async fn run_round(&mut self, out_rx: &NodesOutputReceiver) -> RoundResult {
        self.airborne.clear();
        let setup = FloodSetup {
            initiator_id: self.scenario.flood.initiator_id,
            n_tx_max: self.scenario.flood.n_tx_max,
            with_sync: self.scenario.flood.with_sync,
            payload: self.scenario.flood.payload.clone().into_bytes(),
        };

        // Receivers go up first so every radio is listening when the seed
        // frame flies.
        for spec in &self.scenario.nodes {
            if spec.id != setup.initiator_id
                && let Some(tx) = self.senders.get(&spec.id).copied()
            {
                tx.send(NodeInput::StartFlood(setup.clone())).await;
            }
        }
        if let Some(tx) = self.senders.get(&setup.initiator_id).copied() {
            tx.send(NodeInput::StartFlood(setup.clone())).await;
        }

        let round_end =
            Instant::now() + Duration::from_millis(self.scenario.round_gap_ms);
        let mut t0 = None;

        loop {
            let deadline = self.next_deadline();
            match select3(out_rx.receive(), wait_until(deadline), Timer::at(round_end)).await {
                Either3::First(NodeOutput::Transmitted {
                    node_id,
                    frame,
                    t_tx_start,
                }) => {
                    if node_id == setup.initiator_id && t0.is_none() {
                        t0 = Some(t_tx_start);
                    }
                    self.fan_out(node_id, frame, t_tx_start).await;
                }
                Either3::First(NodeOutput::FloodDone(report)) => {
                    warn!("[{}] unexpected mid-round report", report.node_id);
                }
                Either3::Second(()) => self.deliver_due().await,
                Either3::Third(()) => break,
            }
        }

        // Stop everyone, draining stray events so neither side can block on
        // a full channel.
        let mut reports: Vec<FloodReport> = Vec::new();
        for spec in &self.scenario.nodes {
            while let Ok(msg) = out_rx.try_receive() {
                if let NodeOutput::FloodDone(report) = msg {
                    reports.push(report);
                }
            }
            if let Some(tx) = self.senders.get(&spec.id).copied() {
                tx.send(NodeInput::StopFlood).await;
            }
        }
        while reports.len() < self.scenario.nodes.len() {
            if let NodeOutput::FloodDone(report) = out_rx.receive().await {
                reports.push(report);
            }
        }
        reports.sort_by_key(|r| r.node_id);
        RoundResult { t0, reports }
    }
}

/// Spawn all node tasks, run the configured rounds, print the report and
/// exit the process.
#[embassy_executor::task]
pub async fn network_task(spawner: Spawner, scenario: Scenario) {
    let nodes_output: &'static NodesOutputQueue = Box::leak(Box::new(NodesOutputQueue::new()));

    let mut senders = HashMap::new();
    for spec in &scenario.nodes {
        // Leaked: node channels live for the whole simulation.
        let input: &'static NodeInputQueue = Box::leak(Box::new(NodeInputQueue::new()));
        senders.insert(spec.id, input.sender());
        let _ = spawner.spawn(node_task(spec.id, input.receiver(), nodes_output.sender()));
    }

    let out_rx = nodes_output.receiver();
    let seed = scenario.seed;
    let rounds_total = scenario.rounds;
    let mut net = Network {
        scenario,
        senders,
        rng: StdRng::seed_from_u64(seed),
        airborne: Vec::new(),
    };

    let mut rounds = Vec::new();
    for round in 1..=rounds_total {
        info!("round {round}/{rounds_total}");
        rounds.push(net.run_round(&out_rx).await);
    }

    print_report(&net.scenario, &rounds);
    std::process::exit(0);
}

/// Per-node aggregate over all rounds, written to stdout.
fn print_report(scenario: &Scenario, rounds: &[RoundResult]) {
    let expected = scenario.flood.payload.as_bytes();
    println!();
    println!(
        "flood report: {} nodes, {} rounds, initiator {}, payload {} bytes",
        scenario.nodes.len(),
        rounds.len(),
        scenario.flood.initiator_id,
        expected.len(),
    );
    println!(
        "{:>6} {:>8} {:>6} {:>6} {:>8} {:>12} {:>8} {:>8}",
        "node", "reached", "rx", "tx", "bad_pld", "t_ref_err", "per", "fsr"
    );

    for spec in &scenario.nodes {
        let mut reached = 0u32;
        let mut rx = 0u32;
        let mut tx = 0u32;
        let mut bad_payload = 0u32;
        let mut err_sum = 0i128;
        let mut err_n = 0u32;
        let mut per = None;
        let mut fsr = None;

        for round in rounds {
            let Some(report) = round.reports.iter().find(|r| r.node_id == spec.id) else {
                continue;
            };
            rx += report.n_rx as u32;
            tx += report.n_tx as u32;
            let got_payload = report.n_rx > 0 || spec.id == scenario.flood.initiator_id;
            if got_payload {
                reached += 1;
                if report.payload != expected {
                    bad_payload += 1;
                }
            }
            if let (Some(t_ref), Some(t0)) = (report.t_ref, round.t0) {
                err_sum += (t_ref as i128 - t0 as i128).abs();
                err_n += 1;
            }
            per = report.per;
            fsr = report.fsr;
        }

        let mean_err = if err_n > 0 {
            format!("{}", err_sum / err_n as i128)
        } else {
            "-".to_string()
        };
        println!(
            "{:>6} {:>5}/{:<2} {:>6} {:>6} {:>8} {:>12} {:>8} {:>8}",
            spec.id,
            reached,
            rounds.len(),
            rx,
            tx,
            bad_payload,
            mean_err,
            per.map(|v| v.to_string()).unwrap_or_else(|| "-".into()),
            fsr.map(|v| v.to_string()).unwrap_or_else(|| "-".into()),
        );
    }
}
