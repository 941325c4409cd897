//! Multi-node discrete-event simulation of the flooding protocol.
//!
//! Architecture: one asynchronous task per node plus one central network
//! task, connected by bounded channels. Node tasks run unmodified flooding
//! engines against simulated radios; the network task owns the physical
//! channel, computing per-link signal strength, tracking frames on air and
//! resolving overlaps (constructive superposition, capture, collision) at
//! end-of-airtime deadlines. All timing runs on the scaled virtual clock.

pub mod network_task;
pub mod node_task;
pub mod propagation;
pub mod radio;
pub mod types;

use embassy_time::Timer;

/// Wait until an absolute HF tick, or forever when no deadline is armed.
pub(crate) async fn wait_until(at_hf: Option<u64>) {
    match at_hf {
        Some(t) => Timer::at(radio::hf_to_instant(t)).await,
        None => core::future::pending().await,
    }
}
