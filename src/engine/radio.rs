//! Contract between the flood engine and the radio driver.
//!
//! The engine never touches hardware directly; it drives whatever implements
//! [`RadioControl`]. The driver side is expected to deliver the usual event
//! sequence per frame (`rx_started` → `header_received` → `rx_ended` /
//! `rx_failed` / `rx_tx_error`) back into the engine and to honor the
//! configured automatic mode transitions so that a completed reception rolls
//! straight into the retransmission.

/// Mode the radio falls back to after finishing a reception or transmission.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OffMode {
    Idle,
    Rx,
    Tx,
}

/// Frequency-synthesizer calibration policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CalibrationMode {
    /// Calibrate automatically on mode transitions.
    Auto,
    /// Calibrate only when [`RadioControl::manual_calibration`] is invoked.
    Manual,
}

/// Control surface of the radio driver consumed by the flood engine.
///
/// All calls are synchronous and must be callable from interrupt context.
/// `write_tx_fifo` in particular is invoked inside the reception-completed
/// path and has to finish before the radio emits the next preamble.
pub trait RadioControl {
    fn go_to_idle(&mut self);
    fn go_to_sleep(&mut self);
    /// Restore configuration lost while sleeping.
    fn reconfig_after_sleep(&mut self);

    fn start_tx(&mut self);
    fn start_rx(&mut self);

    /// Load the next outgoing frame: header bytes followed by the payload.
    fn write_tx_fifo(&mut self, header: &[u8], payload: &[u8]);
    fn flush_rx_fifo(&mut self);
    fn flush_tx_fifo(&mut self);

    /// Mode entered automatically when a reception completes.
    fn set_rxoff_mode(&mut self, mode: OffMode);
    /// Mode entered automatically when a transmission completes.
    fn set_txoff_mode(&mut self, mode: OffMode);

    fn set_calibration_mode(&mut self, mode: CalibrationMode);
    fn manual_calibration(&mut self);

    /// Number of header bytes the receiver should treat as frame header when
    /// raising the header-received event.
    fn set_rx_header_len(&mut self, len: u8);

    /// True while a reception or transmission is in progress.
    fn is_busy(&self) -> bool;

    /// Current RSSI reading. Implementations busy-wait (bounded, well under
    /// a millisecond) for the RSSI-valid indication and return `None` on
    /// timeout.
    fn rssi(&mut self) -> Option<i8>;
    /// RSSI latched for the most recently received frame.
    fn last_packet_rssi(&self) -> i8;

    fn clear_pending_interrupts(&mut self);
}
