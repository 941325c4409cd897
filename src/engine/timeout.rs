//! Initiator retransmission timeout.
//!
//! An initiator whose transmission is never echoed back has lost its
//! audience, usually because no neighbor captured the first preamble. After
//! each unanswered transmission the flood is re-seeded a fixed number of
//! slots later, with the on-wire relay counter advanced as if those slots
//! had been relayed, so late joiners still recover a consistent time
//! reference.

use log::{debug, trace};

use crate::config::{MAX_HEADER_LEN, SLOT_TIMEOUT_MIN};

use super::GlossyCore;
use super::radio::RadioControl;
use super::timer::FloodTimer;

impl<R: RadioControl, T: FloodTimer> GlossyCore<R, T> {
    /// Arm the timeout after an unanswered transmission. The slot count is
    /// pinned to `SLOT_TIMEOUT_MIN` (== `SLOT_TIMEOUT_MAX`); see the
    /// constants for the dormant randomized range.
    pub(super) fn schedule_retransmission(&mut self) {
        let slot_len = self.flood.slot.estimated;
        if slot_len == 0 {
            return;
        }
        let slots = SLOT_TIMEOUT_MIN;
        self.flood.relay_cnt_timeout = self.flood.header.relay_cnt.wrapping_add(slots);
        self.flood.timeout_deadline = self.flood.t_timeout + slots as u64 * slot_len;
        self.timer.schedule_timeout(self.flood.timeout_deadline);
        trace!(
            "[{}] retransmission timeout armed at {}",
            self.node_id, self.flood.timeout_deadline
        );
    }

    /// One-shot timeout fired. Late callbacks for a flood that already
    /// ended are ignored.
    pub fn timeout_expired(&mut self) {
        if !self.flood.active || !self.flood.initiator {
            return;
        }
        if self.radio.is_busy() {
            // A reception is in progress; do not stomp on it. Push the
            // deadline out by one slot and keep the relay counter tracking
            // the slot index.
            self.flood.relay_cnt_timeout = self.flood.relay_cnt_timeout.wrapping_add(1);
            self.flood.timeout_deadline += self.flood.slot.estimated;
            self.timer.schedule_timeout(self.flood.timeout_deadline);
            return;
        }
        debug!(
            "[{}] no echo, re-seeding flood at relay_cnt {}",
            self.node_id, self.flood.relay_cnt_timeout
        );
        self.flood.header.relay_cnt = self.flood.relay_cnt_timeout;
        self.radio.start_tx();
        let mut hdr = [0u8; MAX_HEADER_LEN];
        let hlen = self.flood.header.encode(&mut hdr);
        let plen = self.flood.payload_len.unwrap_or(0) as usize;
        self.radio
            .write_tx_fifo(&hdr[..hlen], &self.flood.payload[..plen]);
        self.flood.t_timeout = self.timer.now_hf();
    }
}
