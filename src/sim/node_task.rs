//! Per-node asynchronous task logic.
//!
//! Each node runs an independent task that:
//! - Owns one flooding engine wired to a simulated radio and timer
//! - Replays channel events from the network task into the engine callbacks
//! - Waits out transmission windows and the retransmission-timeout deadline
//! - Publishes transmitted frames and end-of-round reports

use embassy_futures::select::{Either3, select3};

use crate::config::{airtime_hf, turnaround_hf};
use crate::engine::{FloodParams, GlossyCore};
use crate::sim::radio::{SimRadio, SimTimer, now_hf};
use crate::sim::types::{
    FloodReport, FloodSetup, MAX_SIM_NODES, NodeInput, NodeInputReceiver, NodeOutput,
    NodesOutputSender,
};
use crate::sim::wait_until;

type SimCore = GlossyCore<SimRadio, SimTimer>;

/// If the engine staged a transmission, put the frame on the air starting at
/// `t_tx_start` and open the matching transmission window.
async fn flush_pending_tx(core: &mut SimCore, out_tx: &NodesOutputSender, t_tx_start: u64) {
    if let Some(frame) = core.radio_mut().take_pending_tx() {
        let airtime = airtime_hf(frame.len() as u8);
        core.radio_mut().set_tx_window(t_tx_start + airtime);
        core.tx_started(t_tx_start);
        out_tx
            .send(NodeOutput::Transmitted {
                node_id: core.node_id(),
                frame,
                t_tx_start,
            })
            .await;
    }
}

async fn start_flood(core: &mut SimCore, out_tx: &NodesOutputSender, setup: FloodSetup) {
    let is_initiator = setup.initiator_id == core.node_id();
    let params = if is_initiator {
        FloodParams {
            initiator_id: setup.initiator_id,
            payload_len: None,
            n_tx_max: Some(setup.n_tx_max),
            with_sync: Some(setup.with_sync),
            with_rf_cal: false,
        }
    } else {
        // Receivers come up blank and learn the header from the air.
        FloodParams {
            initiator_id: setup.initiator_id,
            payload_len: None,
            n_tx_max: None,
            with_sync: None,
            with_rf_cal: false,
        }
    };
    let payload: &[u8] = if is_initiator { &setup.payload } else { &[] };
    core.start(params, payload);
    let t = now_hf();
    flush_pending_tx(core, out_tx, t).await;
}

async fn stop_flood(core: &mut SimCore, out_tx: &NodesOutputSender) {
    let n_rx = core.stop();
    #[cfg(feature = "stats")]
    let (per, fsr) = (Some(core.stats().per()), Some(core.stats().fsr()));
    #[cfg(not(feature = "stats"))]
    let (per, fsr) = (None, None);
    out_tx
        .send(NodeOutput::FloodDone(FloodReport {
            node_id: core.node_id(),
            n_rx,
            n_tx: core.tx_cnt(),
            t_ref: core.is_t_ref_updated().then(|| core.t_ref()),
            relay_cnt: core.flood_header().relay_cnt,
            payload: core.payload().to_vec(),
            per,
            fsr,
        }))
        .await;
}

/// Replay one resolved channel event into the engine.
async fn handle_input(core: &mut SimCore, out_tx: &NodesOutputSender, msg: NodeInput) {
    match msg {
        NodeInput::StartFlood(setup) => start_flood(core, out_tx, setup).await,
        NodeInput::StopFlood => stop_flood(core, out_tx).await,
        NodeInput::CarrierOn { t_rx_start } => {
            // Lock on only when listening and not already mid-frame; a node
            // that is transmitting, or captured by an earlier preamble,
            // never sees this one.
            if core.radio().in_rx() && !core.radio().is_receiving() {
                core.radio_mut().set_receiving();
                core.rx_started(t_rx_start);
            }
        }
        NodeInput::Deliver {
            frame,
            t_rx_start: _,
            t_rx_stop,
            rssi_dbm,
        } => {
            if !core.radio().is_receiving() {
                return;
            }
            core.radio_mut().set_last_rssi(rssi_dbm);
            core.header_received(frame[0], frame.len() as u8);
            // A header abort restarts listening and drops the lock.
            if core.radio().is_receiving() {
                core.rx_ended(t_rx_stop, &frame);
            }
            if core.radio().is_receiving() {
                core.radio_mut().complete_rx();
                flush_pending_tx(core, out_tx, t_rx_stop + turnaround_hf()).await;
            }
        }
        NodeInput::Corrupted => {
            if core.radio().is_receiving() {
                core.rx_failed();
            }
        }
    }
}

/// Per-node task bridging the simulated channel and one flooding engine.
#[embassy_executor::task(pool_size = MAX_SIM_NODES)]
pub async fn node_task(node_id: u16, in_rx: NodeInputReceiver, out_tx: NodesOutputSender) {
    let mut core = SimCore::new(node_id, SimRadio::default(), SimTimer::default());
    log::debug!("[{}] node task started", node_id);

    loop {
        let timeout_at = core.timer().deadline();
        let tx_end = core.radio().tx_end_at();

        match select3(in_rx.receive(), wait_until(timeout_at), wait_until(tx_end)).await {
            Either3::First(msg) => handle_input(&mut core, &out_tx, msg).await,
            Either3::Second(()) => {
                core.timeout_expired();
                let t = now_hf();
                flush_pending_tx(&mut core, &out_tx, t).await;
            }
            Either3::Third(()) => {
                let t_tx_stop = tx_end.expect("window was armed");
                core.radio_mut().complete_tx();
                core.tx_ended(t_tx_stop);
            }
        }
    }
}
