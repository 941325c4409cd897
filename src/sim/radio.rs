//! Simulated radio device and timers for one node.
//!
//! [`SimRadio`] implements the driver contract against in-memory state. The
//! node task owns both the engine and this device; after every engine call
//! it inspects the device for side effects to turn into simulation events
//! (a frame to put on the air, a transmission window to wait out). Automatic
//! RX→TX and TX→RX transitions are modeled the way the hardware performs
//! them: the engine only configures the off-modes.
//!
//! [`SimTimer`] maps the shared virtual clock onto the engine's HF/LF
//! timebases and holds the armed retransmission deadline for the node task
//! to wait on.

use embassy_time::Instant;

use crate::config::{HF_TICK_HZ, LF_TICK_HZ};
use crate::engine::radio::{CalibrationMode, OffMode, RadioControl};
use crate::engine::timer::FloodTimer;
use crate::sim::types::RadioFrame;

/// Current virtual time in HF ticks.
pub fn now_hf() -> u64 {
    (Instant::now().as_ticks() as u128 * HF_TICK_HZ as u128 / embassy_time::TICK_HZ as u128) as u64
}

/// Virtual instant at which a given HF tick occurs.
pub fn hf_to_instant(t_hf: u64) -> Instant {
    Instant::from_ticks((t_hf as u128 * embassy_time::TICK_HZ as u128 / HF_TICK_HZ as u128) as u64)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    Sleep,
    Idle,
    Rx,
    Tx,
}

/// In-memory radio device.
pub struct SimRadio {
    mode: Mode,
    rxoff: OffMode,
    txoff: OffMode,
    tx_fifo: Option<RadioFrame>,
    /// A transmission should begin (explicit `start_tx` or auto RX→TX).
    tx_armed: bool,
    /// Locked onto an incoming frame.
    receiving: bool,
    /// End of the transmission window the node task is waiting out.
    tx_end_at: Option<u64>,
    rx_header_len: u8,
    /// Channel noise floor reported before any preamble.
    pub noise_dbm: i8,
    last_rssi: i8,
}

impl Default for SimRadio {
    fn default() -> Self {
        SimRadio {
            mode: Mode::Sleep,
            rxoff: OffMode::Idle,
            txoff: OffMode::Idle,
            tx_fifo: None,
            tx_armed: false,
            receiving: false,
            tx_end_at: None,
            rx_header_len: 0,
            noise_dbm: -98,
            last_rssi: 0,
        }
    }
}

impl SimRadio {
    pub fn in_rx(&self) -> bool {
        self.mode == Mode::Rx
    }

    pub fn is_receiving(&self) -> bool {
        self.receiving
    }

    /// The node locked onto a preamble.
    pub fn set_receiving(&mut self) {
        self.receiving = true;
    }

    pub fn set_last_rssi(&mut self, rssi: i8) {
        self.last_rssi = rssi;
    }

    /// A reception window closed. Performs the hardware's automatic RX→TX
    /// transition when a frame is staged, otherwise keeps listening.
    pub fn complete_rx(&mut self) {
        self.receiving = false;
        if self.rxoff == OffMode::Tx && self.tx_fifo.is_some() {
            self.mode = Mode::Tx;
            self.tx_armed = true;
        } else {
            self.mode = Mode::Rx;
        }
    }

    /// Frame to put on the air, if one is staged and the radio is
    /// transmitting.
    pub fn take_pending_tx(&mut self) -> Option<RadioFrame> {
        if self.tx_armed && self.tx_fifo.is_some() {
            self.tx_armed = false;
            self.mode = Mode::Tx;
            self.tx_fifo.take()
        } else {
            None
        }
    }

    pub fn set_tx_window(&mut self, end_hf: u64) {
        self.tx_end_at = Some(end_hf);
    }

    pub fn tx_end_at(&self) -> Option<u64> {
        self.tx_end_at
    }

    /// The transmission window closed: automatic TX→RX transition.
    pub fn complete_tx(&mut self) {
        self.tx_end_at = None;
        self.mode = match self.txoff {
            OffMode::Rx => Mode::Rx,
            OffMode::Tx => Mode::Tx,
            OffMode::Idle => Mode::Idle,
        };
    }
}

impl RadioControl for SimRadio {
    fn go_to_idle(&mut self) {
        self.mode = Mode::Idle;
        self.receiving = false;
        self.tx_armed = false;
        self.tx_end_at = None;
    }
    fn go_to_sleep(&mut self) {
        self.mode = Mode::Sleep;
        self.receiving = false;
        self.tx_armed = false;
        self.tx_end_at = None;
    }
    fn reconfig_after_sleep(&mut self) {
        self.mode = Mode::Idle;
    }
    fn start_tx(&mut self) {
        self.mode = Mode::Tx;
        self.tx_armed = true;
    }
    fn start_rx(&mut self) {
        self.mode = Mode::Rx;
        self.receiving = false;
    }
    fn write_tx_fifo(&mut self, header: &[u8], payload: &[u8]) {
        let mut frame = header.to_vec();
        frame.extend_from_slice(payload);
        self.tx_fifo = Some(frame);
    }
    fn flush_rx_fifo(&mut self) {}
    fn flush_tx_fifo(&mut self) {
        self.tx_fifo = None;
    }
    fn set_rxoff_mode(&mut self, mode: OffMode) {
        self.rxoff = mode;
    }
    fn set_txoff_mode(&mut self, mode: OffMode) {
        self.txoff = mode;
    }
    fn set_calibration_mode(&mut self, _mode: CalibrationMode) {}
    fn manual_calibration(&mut self) {}
    fn set_rx_header_len(&mut self, len: u8) {
        self.rx_header_len = len;
    }
    fn is_busy(&self) -> bool {
        self.receiving || self.mode == Mode::Tx
    }
    fn rssi(&mut self) -> Option<i8> {
        (self.mode == Mode::Rx).then_some(self.noise_dbm)
    }
    fn last_packet_rssi(&self) -> i8 {
        self.last_rssi
    }
    fn clear_pending_interrupts(&mut self) {}
}

/// Virtual-clock timer for one node.
#[derive(Default)]
pub struct SimTimer {
    deadline: Option<u64>,
    update_irq_enabled: bool,
}

impl SimTimer {
    /// Armed retransmission deadline, for the node task's select loop.
    pub fn deadline(&self) -> Option<u64> {
        self.deadline
    }
}

impl FloodTimer for SimTimer {
    fn now_hf(&self) -> u64 {
        now_hf()
    }
    fn now_lf(&self) -> u64 {
        (now_hf() as u128 * LF_TICK_HZ as u128 / HF_TICK_HZ as u128) as u64
    }
    fn now_both(&self) -> (u64, u64) {
        let hf = now_hf();
        let lf = (hf as u128 * LF_TICK_HZ as u128 / HF_TICK_HZ as u128) as u64;
        (hf, lf)
    }
    fn schedule_timeout(&mut self, at_hf: u64) {
        self.deadline = Some(at_hf);
    }
    fn cancel_timeout(&mut self) {
        self.deadline = None;
    }
    fn set_update_interrupt(&mut self, enabled: bool) {
        self.update_irq_enabled = enabled;
    }
}
