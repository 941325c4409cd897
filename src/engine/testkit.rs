//! Deterministic mock radio and timer for driving the engine in tests.
//!
//! The mock radio records every control call so tests can assert on the
//! exact driver interaction; the mock timer is a manually advanced clock.

use crate::config::{HF_TICK_HZ, LF_TICK_HZ};

use super::radio::{CalibrationMode, OffMode, RadioControl};
use super::timer::FloodTimer;

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum RadioOp {
    Idle,
    Sleep,
    Reconfig,
    StartTx,
    StartRx,
    /// Header and payload bytes, concatenated as they would sit in the FIFO.
    WriteTxFifo(Vec<u8>),
    FlushRx,
    FlushTx,
    RxOff(OffMode),
    TxOff(OffMode),
    CalMode(CalibrationMode),
    ManualCal,
    RxHeaderLen(u8),
    ClearIrq,
}

#[derive(Default)]
pub(crate) struct MockRadio {
    pub ops: Vec<RadioOp>,
    pub busy: bool,
    pub rssi: Option<i8>,
    pub last_rssi: i8,
}

impl MockRadio {
    /// Frames loaded into the TX FIFO, in order.
    pub fn tx_frames(&self) -> Vec<Vec<u8>> {
        self.ops
            .iter()
            .filter_map(|op| match op {
                RadioOp::WriteTxFifo(bytes) => Some(bytes.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn count(&self, op: &RadioOp) -> usize {
        self.ops.iter().filter(|o| *o == op).count()
    }
}

impl RadioControl for MockRadio {
    fn go_to_idle(&mut self) {
        self.ops.push(RadioOp::Idle);
    }
    fn go_to_sleep(&mut self) {
        self.ops.push(RadioOp::Sleep);
    }
    fn reconfig_after_sleep(&mut self) {
        self.ops.push(RadioOp::Reconfig);
    }
    fn start_tx(&mut self) {
        self.ops.push(RadioOp::StartTx);
    }
    fn start_rx(&mut self) {
        self.ops.push(RadioOp::StartRx);
    }
    fn write_tx_fifo(&mut self, header: &[u8], payload: &[u8]) {
        let mut frame = header.to_vec();
        frame.extend_from_slice(payload);
        self.ops.push(RadioOp::WriteTxFifo(frame));
    }
    fn flush_rx_fifo(&mut self) {
        self.ops.push(RadioOp::FlushRx);
    }
    fn flush_tx_fifo(&mut self) {
        self.ops.push(RadioOp::FlushTx);
    }
    fn set_rxoff_mode(&mut self, mode: OffMode) {
        self.ops.push(RadioOp::RxOff(mode));
    }
    fn set_txoff_mode(&mut self, mode: OffMode) {
        self.ops.push(RadioOp::TxOff(mode));
    }
    fn set_calibration_mode(&mut self, mode: CalibrationMode) {
        self.ops.push(RadioOp::CalMode(mode));
    }
    fn manual_calibration(&mut self) {
        self.ops.push(RadioOp::ManualCal);
    }
    fn set_rx_header_len(&mut self, len: u8) {
        self.ops.push(RadioOp::RxHeaderLen(len));
    }
    fn is_busy(&self) -> bool {
        self.busy
    }
    fn rssi(&mut self) -> Option<i8> {
        self.rssi
    }
    fn last_packet_rssi(&self) -> i8 {
        self.last_rssi
    }
    fn clear_pending_interrupts(&mut self) {
        self.ops.push(RadioOp::ClearIrq);
    }
}

#[derive(Default)]
pub(crate) struct MockTimer {
    pub now: u64,
    pub scheduled: Option<u64>,
    pub update_irq_enabled: bool,
}

impl FloodTimer for MockTimer {
    fn now_hf(&self) -> u64 {
        self.now
    }
    fn now_lf(&self) -> u64 {
        self.now * LF_TICK_HZ / HF_TICK_HZ
    }
    fn now_both(&self) -> (u64, u64) {
        (self.now_hf(), self.now_lf())
    }
    fn schedule_timeout(&mut self, at_hf: u64) {
        self.scheduled = Some(at_hf);
    }
    fn cancel_timeout(&mut self) {
        self.scheduled = None;
    }
    fn set_update_interrupt(&mut self, enabled: bool) {
        self.update_irq_enabled = enabled;
    }
    fn busy_wait_until_hf(&mut self, t_hf: u64) {
        // A mock clock does not tick on its own; jump instead of spinning.
        self.now = self.now.max(t_hf);
    }
}
