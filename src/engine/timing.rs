//! Slot-length estimation and time-reference bookkeeping.
//!
//! Every participant in a synchronizing flood recovers the instant the
//! initiator began its first transmission, in its own HF clock. The raw
//! reference is captured at the first reception (or first transmission on
//! the initiator) together with the relay counter of that slot; at flood end
//! the reference is projected back by `relay_cnt` whole slots.
//!
//! The slot length used for the projection is measured, not assumed: every
//! immediate RX→TX or TX→RX transition yields one observation of the slot
//! duration, and observations within a small window around the theoretical
//! value are averaged. The capture offset enters the two directions with
//! opposite signs: a transmission observed after a reception includes the
//! receiver-side capture delay (`+TAU1`), a reception observed after a
//! transmission removes it (`-TAU1`). The asymmetry models the transceiver's
//! turnaround and must not be collapsed.

use crate::config::{HF_TICK_HZ, LF_TICK_HZ, T_SLOT_TOLERANCE, t_slot_estimate_hf, tau1_hf};

/// Running slot-length statistics for one flood.
#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct SlotTiming {
    /// Theoretical slot duration in HF ticks, derived from the frame length.
    /// Zero until the frame length is known.
    pub estimated: u64,
    sum: u64,
    count: u32,
}

impl SlotTiming {
    /// Derive the theoretical slot length once the frame length is known.
    pub fn set_packet_len(&mut self, pkt_len: u8) {
        self.estimated = t_slot_estimate_hf(pkt_len);
    }

    /// Slot observed from a transmission that immediately followed a
    /// reception.
    pub fn record_tx_after_rx(&mut self, t_tx_start: u64, t_rx_start: u64) -> bool {
        self.record(t_tx_start.wrapping_sub(t_rx_start).wrapping_add(tau1_hf()))
    }

    /// Slot observed from a reception that immediately followed a
    /// transmission.
    pub fn record_rx_after_tx(&mut self, t_rx_start: u64, t_tx_start: u64) -> bool {
        self.record(t_rx_start.wrapping_sub(t_tx_start).wrapping_sub(tau1_hf()))
    }

    /// Accept the measurement iff it falls within the tolerance window
    /// around the theoretical slot length.
    fn record(&mut self, measured: u64) -> bool {
        if self.estimated == 0 {
            return false;
        }
        if measured.abs_diff(self.estimated) > T_SLOT_TOLERANCE {
            return false;
        }
        self.sum += measured;
        self.count += 1;
        true
    }

    /// Number of accepted measurements.
    pub fn measurements(&self) -> u32 {
        self.count
    }

    /// Slot length to project with: the measured average when available,
    /// the theoretical value otherwise.
    pub fn slot_len(&self) -> u64 {
        if self.count > 0 {
            self.sum / self.count as u64
        } else {
            self.estimated
        }
    }
}

/// Translate an HF timestamp into the LF timebase by linear scaling around a
/// simultaneous snapshot of both clocks.
///
/// Signed arithmetic so a reference slightly in the future of the snapshot
/// (possible right after capture) still maps correctly.
pub(crate) fn hf_to_lf(t_hf: u64, snapshot: (u64, u64)) -> u64 {
    let (now_hf, now_lf) = snapshot;
    let behind_hf = now_hf as i128 - t_hf as i128;
    let behind_lf = behind_hf * LF_TICK_HZ as i128 / HF_TICK_HZ as i128;
    (now_lf as i128 - behind_lf) as u64
}
