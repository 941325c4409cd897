//! Per-flood and lifetime reception statistics.
//!
//! Only compiled with the `stats` feature. Lifetime counters survive across
//! floods and are cleared exclusively by [`FloodStats::reset`]; the
//! `last_flood_*` group is re-zeroed when a flood starts. Ratios are
//! reported in hundredths of a percent so they stay integer.

/// Statistics collected by one node.
#[derive(Debug, Clone, Copy, Default)]
pub struct FloodStats {
    /// Relay counter of the first reception in the last flood.
    pub last_flood_relay_cnt: u8,
    /// Sum of per-frame RSSI readings in the last flood.
    pub last_flood_rssi_sum: i32,
    /// Frames contributing to `last_flood_rssi_sum`.
    pub last_flood_n_rssi: u16,
    /// Channel RSSI sampled once at flood start, before any preamble.
    pub last_flood_rssi_noise: i8,
    /// Receptions started (preamble + sync detected) in the last flood.
    pub last_flood_n_rx_started: u16,
    /// Receptions aborted by header checks or CRC in the last flood.
    pub last_flood_n_rx_fail: u16,
    /// Duration of the last flood in HF ticks, start to stop.
    pub last_flood_duration: u64,
    /// HF ticks from flood start to the first completed reception.
    pub last_flood_t_to_rx: u64,

    /// Receptions started since reset.
    pub pkt_cnt: u32,
    /// Receptions completed with a valid CRC since reset.
    pub pkt_cnt_crcok: u32,
    /// Floods in which this node detected at least one preamble.
    pub flood_cnt: u32,
    /// Floods in which this node completed at least one reception.
    pub flood_cnt_success: u32,
    /// Unexpected radio faults since reset.
    pub error_cnt: u32,

    // Once-per-flood latches.
    flood_counted: bool,
    success_counted: bool,
}

impl FloodStats {
    /// Reset the per-flood group at flood start; lifetime counters persist.
    pub(crate) fn begin_flood(&mut self) {
        self.last_flood_relay_cnt = 0;
        self.last_flood_rssi_sum = 0;
        self.last_flood_n_rssi = 0;
        self.last_flood_rssi_noise = 0;
        self.last_flood_n_rx_started = 0;
        self.last_flood_n_rx_fail = 0;
        self.last_flood_duration = 0;
        self.last_flood_t_to_rx = 0;
        self.flood_counted = false;
        self.success_counted = false;
    }

    /// A reception started. `count_flood` is false on the initiator, which
    /// is excluded from the flood counters.
    pub(crate) fn rx_started(&mut self, count_flood: bool) {
        self.pkt_cnt += 1;
        self.last_flood_n_rx_started += 1;
        if count_flood && !self.flood_counted {
            self.flood_counted = true;
            self.flood_cnt += 1;
        }
    }

    /// A reception completed with a valid CRC.
    pub(crate) fn rx_ok(&mut self, rssi: i8, count_flood: bool) {
        self.pkt_cnt_crcok += 1;
        self.last_flood_rssi_sum += rssi as i32;
        self.last_flood_n_rssi += 1;
        if count_flood && !self.success_counted {
            self.success_counted = true;
            self.flood_cnt_success += 1;
        }
    }

    /// Packet-error rate in units of 0.01%.
    pub fn per(&self) -> u16 {
        if self.pkt_cnt == 0 {
            return 0;
        }
        (10_000 - self.pkt_cnt_crcok as u64 * 10_000 / self.pkt_cnt as u64) as u16
    }

    /// Flood-success rate in units of 0.01%.
    pub fn fsr(&self) -> u16 {
        if self.flood_cnt == 0 {
            return 0;
        }
        (self.flood_cnt_success as u64 * 10_000 / self.flood_cnt as u64) as u16
    }

    /// Mean per-frame RSSI of the last flood, in dBm.
    pub fn avg_rssi(&self) -> i8 {
        if self.last_flood_n_rssi == 0 {
            return 0;
        }
        (self.last_flood_rssi_sum / self.last_flood_n_rssi as i32) as i8
    }

    /// Signal-to-noise estimate of the last flood, in dB.
    pub fn snr(&self) -> i8 {
        self.avg_rssi().saturating_sub(self.last_flood_rssi_noise)
    }

    /// Clear everything, lifetime counters included.
    pub fn reset(&mut self) {
        *self = FloodStats::default();
    }
}
