//! Type definitions for the simulation.
//!
//! Contains the data structures shared by the node and network tasks:
//! - Scenario configuration (nodes, channel model, flood parameters)
//! - Node/network event enums and their bounded channels
//! - Per-round result reporting

use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use serde::Deserialize;

use crate::sim::propagation::ChannelModel;

/// Upper bound on simulated nodes; sizes the node task pool.
pub const MAX_SIM_NODES: usize = 64;

/// Depth of a node's control channel (network → node). Sized for the worst
/// case of one carrier plus one resolution event per concurrent transmitter,
/// so the network loop can never wedge against a full node queue.
pub const NODE_INPUT_QUEUE_SIZE: usize = 2 * MAX_SIM_NODES;
/// Bounded channel used to drive one node.
pub type NodeInputQueue =
    embassy_sync::channel::Channel<CriticalSectionRawMutex, NodeInput, NODE_INPUT_QUEUE_SIZE>;
/// Receiver side of a node input channel.
pub type NodeInputReceiver = embassy_sync::channel::Receiver<
    'static,
    CriticalSectionRawMutex,
    NodeInput,
    NODE_INPUT_QUEUE_SIZE,
>;
/// Sender side of a node input channel.
pub type NodeInputSender = embassy_sync::channel::Sender<
    'static,
    CriticalSectionRawMutex,
    NodeInput,
    NODE_INPUT_QUEUE_SIZE,
>;

/// Depth of the shared output channel (nodes → network task): at most one
/// transmission and one report per node in flight.
pub const NODES_OUTPUT_QUEUE_SIZE: usize = 2 * MAX_SIM_NODES;
/// Bounded channel on which all node tasks publish events.
pub type NodesOutputQueue =
    embassy_sync::channel::Channel<CriticalSectionRawMutex, NodeOutput, NODES_OUTPUT_QUEUE_SIZE>;
/// Receiver side of the nodes output channel.
pub type NodesOutputReceiver = embassy_sync::channel::Receiver<
    'static,
    CriticalSectionRawMutex,
    NodeOutput,
    NODES_OUTPUT_QUEUE_SIZE,
>;
/// Sender side of the nodes output channel.
pub type NodesOutputSender = embassy_sync::channel::Sender<
    'static,
    CriticalSectionRawMutex,
    NodeOutput,
    NODES_OUTPUT_QUEUE_SIZE,
>;

/// A frame as it travels the simulated channel: header plus payload bytes.
pub type RadioFrame = Vec<u8>;

/// Commands and channel events delivered to a node task.
pub enum NodeInput {
    /// Begin a flood round. The node derives its role from the initiator id.
    StartFlood(FloodSetup),
    /// End the round and report back.
    StopFlood,
    /// A preamble+sync became detectable at this node.
    CarrierOn { t_rx_start: u64 },
    /// A frame arrived intact.
    Deliver {
        frame: RadioFrame,
        t_rx_start: u64,
        t_rx_stop: u64,
        rssi_dbm: i8,
    },
    /// Overlapping non-identical frames destroyed each other at this node.
    Corrupted,
}

/// Flood parameters for one round, as handed to each node.
#[derive(Clone)]
pub struct FloodSetup {
    pub initiator_id: u16,
    pub n_tx_max: u8,
    pub with_sync: bool,
    pub payload: Vec<u8>,
}

/// Events published by node tasks into the network loop.
pub enum NodeOutput {
    /// The node put a frame on the air.
    Transmitted {
        node_id: u16,
        frame: RadioFrame,
        t_tx_start: u64,
    },
    /// The node's flood was stopped; final per-round observations.
    FloodDone(FloodReport),
}

/// What one node saw in one flood round.
pub struct FloodReport {
    pub node_id: u16,
    pub n_rx: u8,
    pub n_tx: u8,
    /// Recovered reference, if the flood synchronized this node.
    pub t_ref: Option<u64>,
    /// Relay counter of the node's last outgoing header.
    pub relay_cnt: u8,
    pub payload: Vec<u8>,
    /// Lifetime packet-error rate in 0.01%, when statistics are compiled in.
    pub per: Option<u16>,
    /// Lifetime flood-success rate in 0.01%, when statistics are compiled in.
    pub fsr: Option<u16>,
}

/// Root scenario structure loaded from a JSON file.
#[derive(Deserialize, Clone)]
pub struct Scenario {
    /// Seed for the channel RNG; identical seeds replay identical rounds.
    pub seed: u64,
    /// Virtual-clock speed relative to the host clock, in percent.
    pub speed_percent: u32,
    /// Number of flood rounds to run.
    pub rounds: u32,
    /// Virtual round length in milliseconds; floods are stopped at its end.
    pub round_gap_ms: u64,
    /// Flood parameters applied to every round.
    pub flood: FloodScenario,
    /// Physical channel model.
    pub channel: ChannelModel,
    /// All nodes, positions in meters.
    pub nodes: Vec<NodeSpec>,
}

/// Flood parameters as specified in the scenario file.
#[derive(Deserialize, Clone)]
pub struct FloodScenario {
    pub initiator_id: u16,
    /// Payload text the initiator seeds.
    pub payload: String,
    /// Per-node transmission budget, 0 = unbounded.
    pub n_tx_max: u8,
    pub with_sync: bool,
}

/// One simulated node.
#[derive(Deserialize, Clone)]
pub struct NodeSpec {
    pub id: u16,
    pub x: f32,
    pub y: f32,
    pub tx_power_dbm: f32,
}

impl NodeSpec {
    pub fn distance_to(&self, other: &NodeSpec) -> f32 {
        let dx = self.x - other.x;
        let dy = self.y - other.y;
        (dx * dx + dy * dy).sqrt()
    }
}
