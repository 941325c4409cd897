//! Contract between the flood engine and the timer subsystem.
//!
//! Two clocks are visible to the engine: the high-frequency (HF) timestamp
//! clock all protocol math runs on, and the low-frequency (LF) clock the
//! round scheduler lives on. The one-shot timeout is the initiator's
//! retransmission timer; implementations call
//! [`crate::engine::GlossyCore::timeout_expired`] when it fires.

pub trait FloodTimer {
    /// Current HF time in ticks.
    fn now_hf(&self) -> u64;

    /// Current LF time in ticks.
    fn now_lf(&self) -> u64;

    /// Simultaneous snapshot of both clocks, used when translating an HF
    /// timestamp into the LF timebase.
    fn now_both(&self) -> (u64, u64);

    /// Arm the one-shot retransmission timeout at an absolute HF tick.
    /// Re-arming replaces any pending deadline.
    fn schedule_timeout(&mut self, at_hf: u64);

    /// Disarm the retransmission timeout if armed.
    fn cancel_timeout(&mut self);

    /// Gate the timer-overflow/update interrupt. Disabled around reception
    /// so timestamp capture and FIFO work are never delayed by the timer
    /// ISR.
    fn set_update_interrupt(&mut self, enabled: bool);

    /// Bounded busy-wait until the HF clock reaches `t_hf`. Used once per
    /// flood, to align a synchronizing initiator's first transmission.
    fn busy_wait_until_hf(&mut self, t_hf: u64) {
        while self.now_hf() < t_hf {
            core::hint::spin_loop();
        }
    }
}
