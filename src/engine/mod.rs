//! Per-node flooding engine.
//!
//! One [`GlossyCore`] instance is the whole protocol state of a node. The
//! caller starts and stops floods; everything in between is driven by the
//! radio driver's event callbacks (`rx_started`, `header_received`,
//! `rx_ended`, `tx_started`, `tx_ended`, `rx_failed`, `rx_tx_error`) and the
//! retransmission-timeout callback. Callbacks run to completion in interrupt
//! context; the hard deadline is loading the TX FIFO inside `rx_ended`
//! before the radio, already auto-switched to transmit, sends its preamble.
//!
//! Roles:
//! - The initiator seeds the flood: first transmission, then alternating
//!   RX/TX until its transmission budget is spent. If nothing echoes back it
//!   re-seeds via the retransmission timeout.
//! - A receiver learns unknown header fields from the first valid frame,
//!   stores the payload once, and retransmits with the relay counter
//!   incremented until its own budget is spent.

pub mod header;
pub mod radio;
#[cfg(feature = "stats")]
pub mod stats;
mod timeout;
pub mod timer;
mod timing;

#[cfg(test)]
pub(crate) mod testkit;

use log::{debug, trace, warn};

use crate::config::{
    MAX_HEADER_LEN, MAX_PAYLOAD_LEN, RETRANSMISSION_TIMEOUT, SETUPTIME_WITH_SYNC_US, tau1_hf,
    us_to_hf,
};
use header::{ExpectedHeader, FloodHeader, check_first_byte, check_frame, header_len};
use radio::{CalibrationMode, OffMode, RadioControl};
#[cfg(feature = "stats")]
use stats::FloodStats;
use timer::FloodTimer;
use timing::SlotTiming;

/// Caller-supplied flood parameters.
///
/// An initiator must fill every `Option`; a receiver may leave any of them
/// `None` and the engine learns them from the first valid frame.
#[derive(Debug, Clone, Copy)]
pub struct FloodParams {
    /// Node that seeds this flood. The local node compares its own id
    /// against this to pick its role.
    pub initiator_id: u16,
    /// Expected payload length; ignored on the initiator (taken from the
    /// payload slice).
    pub payload_len: Option<u8>,
    /// Per-node transmission budget, 0 = unbounded. Must fit the 4-bit wire
    /// field on the initiator.
    pub n_tx_max: Option<u8>,
    /// Whether the flood distributes a time reference.
    pub with_sync: Option<bool>,
    /// Run a manual RF calibration before the flood.
    pub with_rf_cal: bool,
}

/// Per-flood state, re-zeroed by every `start`.
struct FloodState {
    active: bool,
    initiator: bool,
    initiator_id: u16,
    header: FloodHeader,
    with_sync: Option<bool>,
    n_tx_max: Option<u8>,
    payload: [u8; MAX_PAYLOAD_LEN],
    payload_len: Option<u8>,
    /// Latched when the first incoming header passes validation.
    header_ok: bool,
    n_tx: u8,
    n_rx: u8,
    t_start: u64,
    t_rx_start: u64,
    t_rx_stop: u64,
    t_tx_start: u64,
    t_tx_stop: u64,
    t_ref: u64,
    t_ref_updated: bool,
    relay_cnt_t_ref: u8,
    slot: SlotTiming,
    relay_cnt_last_rx: u8,
    relay_cnt_last_tx: u8,
    relay_cnt_timeout: u8,
    t_timeout: u64,
    timeout_deadline: u64,
    /// Guards the per-packet failure counter against double counting when a
    /// header abort is followed by the driver's failure event.
    rx_fail_counted: bool,
}

impl Default for FloodState {
    fn default() -> Self {
        FloodState {
            active: false,
            initiator: false,
            initiator_id: 0,
            header: FloodHeader::default(),
            with_sync: None,
            n_tx_max: None,
            payload: [0; MAX_PAYLOAD_LEN],
            payload_len: None,
            header_ok: false,
            n_tx: 0,
            n_rx: 0,
            t_start: 0,
            t_rx_start: 0,
            t_rx_stop: 0,
            t_tx_start: 0,
            t_tx_stop: 0,
            t_ref: 0,
            t_ref_updated: false,
            relay_cnt_t_ref: 0,
            slot: SlotTiming::default(),
            relay_cnt_last_rx: 0,
            relay_cnt_last_tx: 0,
            relay_cnt_timeout: 0,
            t_timeout: 0,
            timeout_deadline: 0,
            rx_fail_counted: false,
        }
    }
}

/// The flooding engine: flood controller, header validation, time-reference
/// recovery and (on the initiator) the retransmission timeout, driving one
/// radio and one timer.
pub struct GlossyCore<R: RadioControl, T: FloodTimer> {
    node_id: u16,
    radio: R,
    timer: T,
    flood: FloodState,
    #[cfg(feature = "stats")]
    stats: FloodStats,
}

impl<R: RadioControl, T: FloodTimer> GlossyCore<R, T> {
    pub fn new(node_id: u16, radio: R, timer: T) -> Self {
        GlossyCore {
            node_id,
            radio,
            timer,
            flood: FloodState::default(),
            #[cfg(feature = "stats")]
            stats: FloodStats::default(),
        }
    }

    /// Begin a flood. Initiators transmit immediately; receivers enter RX.
    ///
    /// Never fails: invalid initiator arguments stop the flood on the spot
    /// and the caller observes zero receptions after `stop`, matching the
    /// best-effort contract of the primitive.
    pub fn start(&mut self, params: FloodParams, payload: &[u8]) {
        self.timer.set_update_interrupt(false);

        self.flood = FloodState::default();
        self.flood.initiator_id = params.initiator_id;
        self.flood.initiator = params.initiator_id == self.node_id;
        self.flood.with_sync = params.with_sync;
        self.flood.n_tx_max = params.n_tx_max;
        self.flood.payload_len = params.payload_len;
        self.flood.active = true;
        self.flood.t_start = self.timer.now_hf();
        #[cfg(feature = "stats")]
        self.stats.begin_flood();

        if self.flood.initiator {
            let (Some(with_sync), Some(n_tx_max)) = (params.with_sync, params.n_tx_max) else {
                warn!("[{}] initiator started with unknown header fields", self.node_id);
                self.stop();
                return;
            };
            if payload.len() > MAX_PAYLOAD_LEN || n_tx_max > 0x0f {
                warn!(
                    "[{}] initiator arguments out of range (payload {} bytes, n_tx_max {})",
                    self.node_id,
                    payload.len(),
                    n_tx_max
                );
                self.stop();
                return;
            }
            self.flood.payload[..payload.len()].copy_from_slice(payload);
            self.flood.payload_len = Some(payload.len() as u8);
            self.flood.header = FloodHeader {
                with_sync,
                n_tx_max,
                relay_cnt: 0,
            };
            self.flood.header_ok = true;
            let pkt_len = (header_len(with_sync) + payload.len()) as u8;
            self.flood.slot.set_packet_len(pkt_len);
        }

        if params.with_rf_cal {
            self.radio.set_calibration_mode(CalibrationMode::Manual);
            self.radio.manual_calibration();
        }
        self.radio.reconfig_after_sleep();
        self.radio.flush_rx_fifo();
        self.radio.flush_tx_fifo();
        // A finished reception rolls straight into the retransmission, a
        // finished transmission straight into listening.
        self.radio.set_rxoff_mode(OffMode::Tx);
        self.radio.set_txoff_mode(OffMode::Rx);
        let hlen = match self.flood.with_sync {
            Some(s) => header_len(s) as u8,
            None => MAX_HEADER_LEN as u8,
        };
        self.radio.set_rx_header_len(hlen);
        self.radio.clear_pending_interrupts();

        debug!(
            "[{}] flood start, {} of node {}, n_tx_max {:?}, sync {:?}",
            self.node_id,
            if self.flood.initiator { "initiator" } else { "receiver" },
            self.flood.initiator_id,
            params.n_tx_max,
            params.with_sync,
        );

        if self.flood.initiator {
            if self.flood.header.with_sync {
                // Align the first transmission onto a slot boundary.
                let align = self.flood.t_start + us_to_hf(SETUPTIME_WITH_SYNC_US);
                self.timer.busy_wait_until_hf(align);
            }
            self.flood.t_timeout = self.timer.now_hf();
            self.radio.start_tx();
            self.load_tx_fifo();
        } else {
            self.radio.start_rx();
            #[cfg(feature = "stats")]
            if let Some(noise) = self.radio.rssi() {
                self.stats.last_flood_rssi_noise = noise;
            }
        }
        self.timer.set_update_interrupt(true);
    }

    /// End the current flood and return the number of receptions. Safe to
    /// call on an inactive engine, in which case nothing is touched.
    pub fn stop(&mut self) -> u8 {
        if !self.flood.active {
            return self.flood.n_rx;
        }
        self.timer.cancel_timeout();
        self.radio.go_to_idle();
        self.radio.flush_rx_fifo();
        self.radio.flush_tx_fifo();
        self.radio.go_to_sleep();

        // Project the captured reference back to the initiator's first slot.
        if self.flood.t_ref_updated {
            let shift = self.flood.relay_cnt_t_ref as u64 * self.flood.slot.slot_len();
            self.flood.t_ref = self.flood.t_ref.wrapping_sub(shift);
        }

        self.flood.active = false;
        #[cfg(feature = "stats")]
        {
            self.stats.last_flood_duration = self.timer.now_hf() - self.flood.t_start;
        }
        self.timer.set_update_interrupt(true);

        debug!(
            "[{}] flood stop: n_rx {}, n_tx {}, t_ref {}{}",
            self.node_id,
            self.flood.n_rx,
            self.flood.n_tx,
            self.flood.t_ref,
            if self.flood.t_ref_updated { "" } else { " (not captured)" },
        );
        self.flood.n_rx
    }

    /// Preamble and sync word detected; a frame is incoming.
    pub fn rx_started(&mut self, t_rx_start: u64) {
        if !self.flood.active {
            return;
        }
        self.timer.set_update_interrupt(false);
        self.flood.t_rx_start = t_rx_start;
        self.flood.rx_fail_counted = false;
        #[cfg(feature = "stats")]
        self.stats.rx_started(!self.flood.initiator);
        if self.flood.initiator && RETRANSMISSION_TIMEOUT {
            // The flood came back to us; no need to re-seed it.
            self.timer.cancel_timeout();
        }
    }

    /// The header bytes and the radio length byte are available while the
    /// rest of the frame is still on air. Aborts receptions that cannot
    /// belong to this flood.
    pub fn header_received(&mut self, first_byte: u8, pkt_len: u8) {
        if !self.flood.active {
            return;
        }
        if let Err(reject) = check_first_byte(first_byte, pkt_len, &self.expected()) {
            trace!("[{}] header abort: {:?}", self.node_id, reject);
            self.abort_rx();
        }
    }

    /// Frame fully received with a valid CRC. `frame` is header bytes
    /// followed by payload, exactly as on the wire.
    pub fn rx_ended(&mut self, t_rx_stop: u64, frame: &[u8]) {
        if !self.flood.active {
            return;
        }
        self.flood.t_rx_stop = t_rx_stop;

        // Re-validate the complete frame; the radio's early length
        // signalling is not trusted.
        let hdr = match check_frame(frame, &self.expected()) {
            Ok(hdr) => hdr,
            Err(reject) => {
                trace!("[{}] frame rejected: {:?}", self.node_id, reject);
                self.abort_rx();
                return;
            }
        };
        let hlen = hdr.len();
        let payload = &frame[hlen..];

        #[cfg(feature = "stats")]
        self.stats
            .rx_ok(self.radio.last_packet_rssi(), !self.flood.initiator);

        if !self.flood.header_ok {
            // First valid frame of the flood: adopt what was unknown.
            self.flood.header_ok = true;
            self.flood.with_sync = Some(hdr.with_sync);
            self.flood.n_tx_max = Some(hdr.n_tx_max);
            self.flood.payload_len = Some(payload.len() as u8);
            self.flood.slot.set_packet_len(frame.len() as u8);
            self.radio.set_rx_header_len(hlen as u8);
        }

        if self.flood.n_rx == 0 {
            if !self.flood.initiator {
                self.flood.payload[..payload.len()].copy_from_slice(payload);
            }
            #[cfg(feature = "stats")]
            {
                self.stats.last_flood_relay_cnt = hdr.relay_cnt;
                self.stats.last_flood_t_to_rx = self.flood.t_rx_stop - self.flood.t_start;
            }
            if hdr.with_sync && !self.flood.t_ref_updated {
                self.flood.t_ref = self.flood.t_rx_start.wrapping_sub(tau1_hf());
                self.flood.relay_cnt_t_ref = hdr.relay_cnt;
                self.flood.t_ref_updated = true;
            }
        }
        self.flood.n_rx += 1;

        self.flood.relay_cnt_last_rx = hdr.relay_cnt;
        if self.flood.n_tx > 0
            && self.flood.relay_cnt_last_rx == self.flood.relay_cnt_last_tx.wrapping_add(1)
        {
            self.flood
                .slot
                .record_rx_after_tx(self.flood.t_rx_start, self.flood.t_tx_start);
        }

        trace!(
            "[{}] rx #{}: relay_cnt {}, {} bytes",
            self.node_id,
            self.flood.n_rx,
            hdr.relay_cnt,
            payload.len()
        );

        if self.tx_budget_left() {
            // The radio is already switching to TX; the outgoing frame must
            // be loaded before the preamble leaves.
            self.flood.header = FloodHeader {
                with_sync: hdr.with_sync,
                n_tx_max: hdr.n_tx_max,
                relay_cnt: hdr.relay_cnt.wrapping_add(1),
            };
            self.load_tx_fifo();
        } else {
            self.finish();
        }
        self.timer.set_update_interrupt(true);
    }

    /// The radio began transmitting the frame loaded in its FIFO.
    pub fn tx_started(&mut self, t_tx_start: u64) {
        if !self.flood.active {
            return;
        }
        self.flood.t_tx_start = t_tx_start;
        self.flood.relay_cnt_last_tx = self.flood.header.relay_cnt;
        if self.flood.n_rx > 0
            && self.flood.relay_cnt_last_tx == self.flood.relay_cnt_last_rx.wrapping_add(1)
        {
            self.flood
                .slot
                .record_tx_after_rx(t_tx_start, self.flood.t_rx_start);
        }
    }

    /// Transmission completed; the radio is auto-switching back to RX.
    pub fn tx_ended(&mut self, t_tx_stop: u64) {
        if !self.flood.active {
            return;
        }
        self.flood.t_tx_stop = t_tx_stop;
        self.flood.n_tx += 1;
        trace!(
            "[{}] tx #{} done at {}",
            self.node_id, self.flood.n_tx, self.flood.t_tx_stop
        );

        if self.flood.header.with_sync && !self.flood.t_ref_updated {
            self.flood.t_ref = self.flood.t_tx_start;
            self.flood.relay_cnt_t_ref = self.flood.header.relay_cnt;
            self.flood.t_ref_updated = true;
        }

        if let Some(max) = self.flood.n_tx_max
            && max > 0
            && self.flood.n_tx >= max
        {
            self.finish();
            return;
        }
        if self.flood.initiator && self.flood.n_rx == 0 && RETRANSMISSION_TIMEOUT {
            self.schedule_retransmission();
        }
    }

    /// Reception aborted by the driver: bad CRC or malformed frame.
    pub fn rx_failed(&mut self) {
        if !self.flood.active {
            return;
        }
        self.abort_rx();
    }

    /// Unexpected radio fault. Clean the radio up and keep listening.
    pub fn rx_tx_error(&mut self) {
        if !self.flood.active {
            return;
        }
        warn!("[{}] radio fault, restarting reception", self.node_id);
        #[cfg(feature = "stats")]
        {
            self.stats.error_cnt += 1;
        }
        self.radio.go_to_idle();
        self.radio.flush_rx_fifo();
        self.radio.flush_tx_fifo();
        self.radio.start_rx();
        self.timer.set_update_interrupt(true);
    }

    /// Drop the reception in progress and listen for the next frame.
    fn abort_rx(&mut self) {
        #[cfg(feature = "stats")]
        if !self.flood.rx_fail_counted {
            self.stats.last_flood_n_rx_fail += 1;
        }
        self.flood.rx_fail_counted = true;
        self.radio.go_to_idle();
        self.radio.flush_rx_fifo();
        self.radio.start_rx();
        self.timer.set_update_interrupt(true);
    }

    /// Transmission budget check; a wire budget of zero means unbounded.
    fn tx_budget_left(&self) -> bool {
        match self.flood.n_tx_max {
            Some(0) | None => true,
            Some(max) => self.flood.n_tx < max,
        }
    }

    /// Transmission budget spent: take the radio off the air and wait for
    /// the caller's `stop`. The flood stays active so the reference
    /// projection still happens there.
    fn finish(&mut self) {
        if self.flood.initiator && RETRANSMISSION_TIMEOUT {
            self.timer.cancel_timeout();
        }
        self.radio.go_to_idle();
        self.radio.flush_rx_fifo();
        self.radio.flush_tx_fifo();
        debug!(
            "[{}] budget spent after {} transmissions",
            self.node_id, self.flood.n_tx
        );
    }

    /// Load the current header and payload into the TX FIFO.
    fn load_tx_fifo(&mut self) {
        let mut hdr = [0u8; MAX_HEADER_LEN];
        let hlen = self.flood.header.encode(&mut hdr);
        let plen = self.flood.payload_len.unwrap_or(0) as usize;
        self.radio
            .write_tx_fifo(&hdr[..hlen], &self.flood.payload[..plen]);
    }

    fn expected(&self) -> ExpectedHeader {
        ExpectedHeader {
            with_sync: self.flood.with_sync,
            n_tx_max: self.flood.n_tx_max,
            payload_len: self.flood.payload_len,
        }
    }

    // Accessors.

    pub fn node_id(&self) -> u16 {
        self.node_id
    }

    pub fn is_active(&self) -> bool {
        self.flood.active
    }

    pub fn rx_cnt(&self) -> u8 {
        self.flood.n_rx
    }

    pub fn tx_cnt(&self) -> u8 {
        self.flood.n_tx
    }

    pub fn payload_len(&self) -> u8 {
        self.flood.payload_len.unwrap_or(0)
    }

    /// The flood payload: what the initiator seeded, or what a receiver
    /// stored on its first reception.
    pub fn payload(&self) -> &[u8] {
        &self.flood.payload[..self.payload_len() as usize]
    }

    pub fn is_t_ref_updated(&self) -> bool {
        self.flood.t_ref_updated
    }

    /// Estimated HF time of the initiator's first transmission. Only
    /// meaningful after `stop` of a flood with `is_t_ref_updated`.
    pub fn t_ref(&self) -> u64 {
        self.flood.t_ref
    }

    /// The time reference translated into the LF timebase.
    pub fn t_ref_lf(&self) -> u64 {
        timing::hf_to_lf(self.flood.t_ref, self.timer.now_both())
    }

    pub fn flood_header(&self) -> FloodHeader {
        self.flood.header
    }

    pub fn sync_mode(&self) -> bool {
        self.flood.with_sync.unwrap_or(false)
    }

    #[cfg(feature = "stats")]
    pub fn stats(&self) -> &FloodStats {
        &self.stats
    }

    #[cfg(feature = "stats")]
    pub fn reset_stats(&mut self) {
        self.stats.reset();
    }

    pub fn radio(&self) -> &R {
        &self.radio
    }

    pub fn radio_mut(&mut self) -> &mut R {
        &mut self.radio
    }

    pub fn timer(&self) -> &T {
        &self.timer
    }

    pub fn timer_mut(&mut self) -> &mut T {
        &mut self.timer
    }
}

#[cfg(test)]
mod tests;
