//! Physical channel model: path loss and overlap resolution.
//!
//! Two concerns live here:
//! - Signal strength: log-distance path loss with optional log-normal
//!   shadowing, giving a per-link RSSI against a receiver sensitivity
//!   threshold.
//! - What happens when frames overlap at a receiver. Byte-identical frames
//!   superpose constructively and are received as one (the effect the whole
//!   protocol is built on); differing frames obey the capture rule, where
//!   the strongest survives only if it dominates the runner-up by a margin.
//!
//! Units: power in dBm, distance in meters, time in HF ticks.

use rand::Rng;
use rand_distr::{Distribution, Normal};
use serde::Deserialize;

/// Channel propagation parameters.
///
/// Log-distance model: `PL(d) = PL(d0) + 10 * n * log10(d / d0) + X_sigma`
/// with a 1 m reference distance and `X_sigma` drawn from `Normal(0, sigma)`
/// per link and frame.
#[derive(Deserialize, Clone)]
pub struct ChannelModel {
    /// Path loss exponent (2.0 free space, 2.7–3.5 urban).
    pub path_loss_exponent: f32,
    /// Log-normal shadowing standard deviation in dB; 0 disables shadowing.
    pub shadowing_sigma: f32,
    /// Path loss at the 1 m reference distance, in dB.
    pub path_loss_at_reference_distance: f32,
    /// Weakest RSSI a receiver can still synchronize to, in dBm.
    pub sensitivity_dbm: f32,
    /// RSSI dominance required for capture over a differing frame, in dB.
    pub capture_threshold_db: f32,
    /// Standard deviation of the capture-timestamp jitter, in HF ticks.
    pub jitter_sigma_ticks: f64,
}

/// Path loss in dB at `distance` meters, sampling the shadowing term.
pub fn path_loss<R: Rng>(distance: f32, model: &ChannelModel, rng: &mut R) -> f32 {
    let deterministic = if distance < 1.0 {
        model.path_loss_at_reference_distance
    } else {
        model.path_loss_at_reference_distance
            + 10.0 * model.path_loss_exponent * distance.log10()
    };
    let shadowing = if model.shadowing_sigma > 0.0 {
        Normal::new(0.0_f32, model.shadowing_sigma)
            .expect("invalid shadowing sigma")
            .sample(rng)
    } else {
        0.0
    };
    deterministic + shadowing
}

/// Received signal strength of one frame over one link, in dBm.
pub fn rssi_at<R: Rng>(
    tx_power_dbm: f32,
    distance: f32,
    model: &ChannelModel,
    rng: &mut R,
) -> f32 {
    tx_power_dbm - path_loss(distance, model, rng)
}

/// Capture-timestamp jitter in HF ticks, possibly negative.
pub fn timestamp_jitter<R: Rng>(model: &ChannelModel, rng: &mut R) -> i64 {
    if model.jitter_sigma_ticks <= 0.0 {
        return 0;
    }
    Normal::new(0.0_f64, model.jitter_sigma_ticks)
        .expect("invalid jitter sigma")
        .sample(rng)
        .round() as i64
}

/// Outcome of a group of frames overlapping at one receiver.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OverlapOutcome {
    /// All frames carried the same bits; received as one. The index points
    /// at the strongest contributor.
    Constructive(usize),
    /// Frames differed but one dominated; the index wins.
    Captured(usize),
    /// Mutual destruction; the receiver sees a corrupted frame.
    Collision,
}

/// Resolve a group of overlapping `(frame, rssi)` pairs.
pub fn resolve_overlap(group: &[(&[u8], f32)], capture_threshold_db: f32) -> OverlapOutcome {
    debug_assert!(!group.is_empty());
    let strongest = group
        .iter()
        .enumerate()
        .max_by(|a, b| a.1.1.total_cmp(&b.1.1))
        .map(|(i, _)| i)
        .unwrap_or(0);

    if group.iter().all(|(frame, _)| *frame == group[0].0) {
        return OverlapOutcome::Constructive(strongest);
    }
    let runner_up = group
        .iter()
        .enumerate()
        .filter(|(i, _)| *i != strongest)
        .map(|(_, (_, rssi))| *rssi)
        .fold(f32::NEG_INFINITY, f32::max);
    if group[strongest].1 >= runner_up + capture_threshold_db {
        OverlapOutcome::Captured(strongest)
    } else {
        OverlapOutcome::Collision
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    fn model() -> ChannelModel {
        ChannelModel {
            path_loss_exponent: 3.0,
            shadowing_sigma: 0.0,
            path_loss_at_reference_distance: 40.0,
            sensitivity_dbm: -100.0,
            capture_threshold_db: 6.0,
            jitter_sigma_ticks: 0.0,
        }
    }

    #[test]
    fn path_loss_grows_with_distance() {
        let m = model();
        let mut rng = StdRng::seed_from_u64(1);
        let near = path_loss(1.0, &m, &mut rng);
        let far = path_loss(100.0, &m, &mut rng);
        assert_eq!(near, 40.0);
        // 100 m at exponent 3: 30 dB per decade, two decades.
        assert!((far - 100.0).abs() < 1e-3);
        assert!(rssi_at(14.0, 100.0, &m, &mut rng) < -80.0);
    }

    #[test]
    fn sub_meter_clamps_to_reference_loss() {
        let m = model();
        let mut rng = StdRng::seed_from_u64(1);
        assert_eq!(path_loss(0.2, &m, &mut rng), 40.0);
    }

    #[test]
    fn identical_frames_superpose_constructively() {
        let frame = [0xb1, 2, b'G'];
        let group: Vec<(&[u8], f32)> = vec![(&frame, -80.0), (&frame, -72.0), (&frame, -90.0)];
        assert_eq!(
            resolve_overlap(&group, 6.0),
            OverlapOutcome::Constructive(1)
        );
    }

    #[test]
    fn differing_frames_capture_or_collide() {
        let a = [0xb1, 2, b'A'];
        let b = [0xb1, 2, b'B'];

        let dominated: Vec<(&[u8], f32)> = vec![(&a, -70.0), (&b, -80.0)];
        assert_eq!(resolve_overlap(&dominated, 6.0), OverlapOutcome::Captured(0));

        let contested: Vec<(&[u8], f32)> = vec![(&a, -70.0), (&b, -73.0)];
        assert_eq!(resolve_overlap(&contested, 6.0), OverlapOutcome::Collision);
    }

    #[test]
    fn jitter_disabled_at_zero_sigma() {
        let m = model();
        let mut rng = StdRng::seed_from_u64(9);
        assert_eq!(timestamp_jitter(&m, &mut rng), 0);
    }
}
