//! Engine scenario tests: deterministic callback replay against the mock
//! radio and timer.

use super::testkit::{MockRadio, MockTimer, RadioOp};
use super::*;
use crate::config::{airtime_hf, t_slot_estimate_hf};

type TestCore = GlossyCore<MockRadio, MockTimer>;

fn core(node_id: u16) -> TestCore {
    GlossyCore::new(node_id, MockRadio::default(), MockTimer::default())
}

fn initiator_params(id: u16, n_tx_max: u8, with_sync: bool) -> FloodParams {
    FloodParams {
        initiator_id: id,
        payload_len: None,
        n_tx_max: Some(n_tx_max),
        with_sync: Some(with_sync),
        with_rf_cal: false,
    }
}

fn receiver_params(id: u16) -> FloodParams {
    FloodParams {
        initiator_id: id,
        payload_len: None,
        n_tx_max: None,
        with_sync: None,
        with_rf_cal: false,
    }
}

fn wire_frame(with_sync: bool, n_tx_max: u8, relay_cnt: u8, payload: &[u8]) -> Vec<u8> {
    let hdr = FloodHeader {
        with_sync,
        n_tx_max,
        relay_cnt,
    };
    let mut buf = vec![0u8; MAX_HEADER_LEN];
    let hlen = hdr.encode(&mut buf);
    buf.truncate(hlen);
    buf.extend_from_slice(payload);
    buf
}

/// Drive one complete reception through the three callbacks.
fn receive(core: &mut TestCore, t_rx_start: u64, frame: &[u8]) {
    core.rx_started(t_rx_start);
    core.header_received(frame[0], frame.len() as u8);
    let t_stop = t_rx_start - tau1_hf() + airtime_hf(frame.len() as u8);
    core.rx_ended(t_stop, frame);
}

#[test]
fn initiator_flood_with_one_echo() {
    let mut c = core(1);
    c.start(initiator_params(1, 2, true), b"HELLO");
    assert!(c.is_active());

    // First transmission is on its way: frame loaded behind start_tx.
    assert_eq!(c.radio().count(&RadioOp::StartTx), 1);
    let frames = c.radio().tx_frames();
    assert_eq!(frames[0].len(), 7);
    assert_eq!(frames[0][1], 0, "initiator seeds relay_cnt 0");
    assert_eq!(&frames[0][2..], b"HELLO");

    let slot = t_slot_estimate_hf(7);
    let t1 = c.timer().now;
    c.tx_started(t1);
    c.tx_ended(t1 + airtime_hf(7));
    assert!(c.timer().scheduled.is_some(), "unanswered TX arms the timeout");

    // A neighbor echoes one slot later.
    let t_rx = t1 + slot + tau1_hf();
    c.rx_started(t_rx);
    assert!(c.timer().scheduled.is_none(), "echo cancels the timeout");
    let echo = wire_frame(true, 2, 1, b"HELLO");
    c.header_received(echo[0], echo.len() as u8);
    c.rx_ended(t_rx - tau1_hf() + airtime_hf(7), &echo);

    // Second transmission carries relay_cnt 2.
    let frames = c.radio().tx_frames();
    assert_eq!(frames.len(), 2);
    assert_eq!(frames[1][1], 2);

    let t2 = t_rx + slot - tau1_hf();
    c.tx_started(t2);
    c.tx_ended(t2 + airtime_hf(7));

    // Budget spent: radio off the air, flood still active for stop().
    assert!(c.is_active());
    assert_eq!(c.tx_cnt(), 2);

    c.timer_mut().now = t2 + 50_000;
    assert_eq!(c.stop(), 1);
    assert!(!c.is_active());
    assert_eq!(c.rx_cnt(), 1);
    assert!(c.is_t_ref_updated());
    // The initiator's reference is its own first TX start; relay_cnt 0 means
    // the projection does not move it.
    assert_eq!(c.t_ref(), t1);
}

#[test]
fn receiver_learns_header_and_relays() {
    let mut c = core(7);
    c.start(receiver_params(1), &[]);
    assert_eq!(c.radio().count(&RadioOp::StartRx), 1);

    let f = wire_frame(true, 3, 3, b"WORLD");
    receive(&mut c, 50_000, &f);

    assert_eq!(c.rx_cnt(), 1);
    assert_eq!(c.payload(), b"WORLD");
    assert_eq!(c.payload_len(), 5);
    assert!(c.sync_mode());
    assert!(c.is_t_ref_updated());

    // Outgoing frame has the relay counter incremented.
    let frames = c.radio().tx_frames();
    assert_eq!(frames.len(), 1);
    assert_eq!(frames[0][1], 4);
    assert_eq!(c.flood_header().relay_cnt, 4);
    assert_eq!(c.flood_header().n_tx_max, 3);

    // The header length register is reprogrammed once learned.
    assert_eq!(c.radio().count(&RadioOp::RxHeaderLen(2)), 2);

    // No accepted slot measurement: projection falls back to the estimate.
    c.timer_mut().now = 200_000;
    c.stop();
    let est = t_slot_estimate_hf(7);
    assert_eq!(c.t_ref(), 50_000 - tau1_hf() - 3 * est);
}

#[test]
fn receiver_payload_written_exactly_once() {
    let mut c = core(3);
    c.start(receiver_params(1), &[]);

    receive(&mut c, 10_000, &wire_frame(true, 0, 1, b"AAAAA"));
    assert_eq!(c.payload(), b"AAAAA");

    // Later receptions retransmit but never rewrite the payload.
    receive(&mut c, 30_000, &wire_frame(true, 0, 2, b"BBBBB"));
    assert_eq!(c.rx_cnt(), 2);
    assert_eq!(c.payload(), b"AAAAA");
}

#[test]
fn unbounded_budget_relays_until_external_stop() {
    let mut c = core(4);
    c.start(receiver_params(1), &[]);

    let slot = t_slot_estimate_hf(6);
    let mut t = 20_000;
    for hop in 1..=4u8 {
        receive(&mut c, t, &wire_frame(true, 0, hop, b"DATA"));
        let t_tx = t + slot - tau1_hf();
        c.tx_started(t_tx);
        c.tx_ended(t_tx + airtime_hf(6));
        t += 2 * slot;
    }
    // Still going: a wire budget of zero never terminates on its own.
    assert!(c.is_active());
    assert_eq!(c.tx_cnt(), 4);
    assert_eq!(c.stop(), 4);
}

#[test]
fn beacon_flood_with_empty_payload() {
    let mut c = core(1);
    c.start(initiator_params(1, 1, true), b"");
    assert!(c.is_active());
    let frames = c.radio().tx_frames();
    assert_eq!(frames[0].len(), 2, "header-only frame");

    let t1 = c.timer().now;
    c.tx_started(t1);
    c.tx_ended(t1 + airtime_hf(2));
    assert_eq!(c.tx_cnt(), 1);
    c.stop();
    assert_eq!(c.t_ref(), t1);
}

#[test]
fn invalid_initiator_arguments_self_stop() {
    // Unknown budget.
    let mut c = core(1);
    c.start(
        FloodParams {
            initiator_id: 1,
            payload_len: None,
            n_tx_max: None,
            with_sync: Some(true),
            with_rf_cal: false,
        },
        b"X",
    );
    assert!(!c.is_active());
    assert!(c.radio().count(&RadioOp::Sleep) > 0);

    // Budget too large for the 4-bit wire field.
    let mut c = core(1);
    c.start(initiator_params(1, 16, true), b"X");
    assert!(!c.is_active());

    // Oversized payload.
    let mut c = core(1);
    let big = vec![0u8; MAX_PAYLOAD_LEN + 1];
    c.start(initiator_params(1, 2, true), &big);
    assert!(!c.is_active());
}

#[test]
fn stop_twice_is_a_no_op() {
    let mut c = core(2);
    c.start(receiver_params(1), &[]);
    receive(&mut c, 10_000, &wire_frame(true, 1, 2, b"Z"));
    assert_eq!(c.stop(), 1);

    let ops_before = c.radio().ops.len();
    let t_ref_before = c.t_ref();
    assert_eq!(c.stop(), 1);
    assert_eq!(c.radio().ops.len(), ops_before, "no radio side effects");
    assert_eq!(c.t_ref(), t_ref_before, "no second projection");
}

#[test]
fn late_callbacks_after_stop_are_ignored() {
    let mut c = core(2);
    c.start(receiver_params(1), &[]);
    c.stop();

    let ops_before = c.radio().ops.len();
    c.rx_started(1_000);
    c.header_received(0xff, 3);
    c.rx_ended(2_000, &wire_frame(true, 1, 1, b"Q"));
    c.tx_started(3_000);
    c.tx_ended(4_000);
    c.timeout_expired();
    assert_eq!(c.rx_cnt(), 0);
    assert_eq!(c.tx_cnt(), 0);
    assert_eq!(c.radio().ops.len(), ops_before);
}

#[test]
fn malformed_header_aborts_and_restarts_rx() {
    let mut c = core(5);
    c.start(receiver_params(1), &[]);
    let rx_restarts = c.radio().count(&RadioOp::StartRx);

    c.rx_started(10_000);
    // Foreign deployment tag.
    c.header_received(0b000_10010, 7);
    assert_eq!(c.radio().count(&RadioOp::StartRx), rx_restarts + 1);
    assert_eq!(c.rx_cnt(), 0);
}

#[test]
fn slot_measurement_tolerance_and_projection() {
    let mut c = core(6);
    c.start(receiver_params(1), &[]);

    let est = t_slot_estimate_hf(7);
    let t_rx1 = 100_000u64;
    receive(&mut c, t_rx1, &wire_frame(true, 0, 1, b"HELLO"));

    // Relay transmission 3 ticks late: accepted (tolerance 10).
    let t_tx = t_rx1 + est + 3 - tau1_hf();
    c.tx_started(t_tx);
    c.tx_ended(t_tx + airtime_hf(7));

    // Next reception 30 ticks late: discarded.
    let t_rx2 = t_tx + est + 30 + tau1_hf();
    receive(&mut c, t_rx2, &wire_frame(true, 0, 3, b"HELLO"));

    // Projection uses the single accepted measurement (est + 3), one hop.
    c.timer_mut().now = t_rx2 + 100_000;
    c.stop();
    assert_eq!(c.t_ref(), t_rx1 - tau1_hf() - (est + 3));
}

#[test]
fn timeout_reseeds_flood_and_respects_busy_radio() {
    let mut c = core(1);
    c.start(initiator_params(1, 3, true), b"HI");
    let slot = t_slot_estimate_hf(4);

    let t1 = c.timer().now;
    c.tx_started(t1);
    c.tx_ended(t1 + airtime_hf(4));
    let deadline = c.timer().scheduled.expect("timeout armed");
    assert_eq!(deadline, t1 + 2 * slot);

    // Radio busy at expiry: back off one slot, do not transmit.
    c.radio_mut().busy = true;
    c.timer_mut().now = deadline;
    c.timeout_expired();
    assert_eq!(c.timer().scheduled, Some(deadline + slot));
    assert_eq!(c.radio().count(&RadioOp::StartTx), 1);

    // Idle at the pushed-out deadline: re-seed with the slot-tracking
    // relay counter (2 scheduled + 1 busy backoff).
    c.radio_mut().busy = false;
    c.timer_mut().now = deadline + slot;
    c.timeout_expired();
    assert_eq!(c.radio().count(&RadioOp::StartTx), 2);
    let frames = c.radio().tx_frames();
    assert_eq!(frames.last().unwrap()[1], 3);

    let t2 = deadline + slot;
    c.tx_started(t2);
    c.tx_ended(t2 + airtime_hf(4));
    // Still unanswered: re-armed two slots after the re-seed.
    assert_eq!(c.timer().scheduled, Some(t2 + 2 * slot));

    // Third transmission exhausts the budget and disarms everything.
    c.timer_mut().now = t2 + 2 * slot;
    c.timeout_expired();
    let t3 = t2 + 2 * slot;
    c.tx_started(t3);
    c.tx_ended(t3 + airtime_hf(4));
    assert_eq!(c.tx_cnt(), 3);
    assert_eq!(c.timer().scheduled, None);
    assert!(c.is_active(), "termination still waits for stop()");
}

#[test]
fn t_ref_lf_translation_tracks_the_snapshot() {
    let mut c = core(2);
    c.start(receiver_params(1), &[]);
    receive(&mut c, crate::config::HF_TICK_HZ, &wire_frame(true, 1, 0, b"S"));
    c.timer_mut().now = 2 * crate::config::HF_TICK_HZ;
    c.stop();
    // relay_cnt 0: the reference stays at the capture point minus TAU1.
    assert_eq!(c.t_ref(), crate::config::HF_TICK_HZ - tau1_hf());
    let lf = c.t_ref_lf();
    let expected = (c.t_ref() as u128 * crate::config::LF_TICK_HZ as u128
        / crate::config::HF_TICK_HZ as u128) as u64;
    assert!(lf.abs_diff(expected) <= 1);
}

#[cfg(feature = "stats")]
mod stats_behavior {
    use super::*;

    #[test]
    fn crc_failure_then_success() {
        let mut c = core(5);
        c.start(receiver_params(1), &[]);

        c.rx_started(10_000);
        c.rx_failed();
        assert_eq!(c.stats().last_flood_n_rx_fail, 1);

        receive(&mut c, 20_000, &wire_frame(true, 1, 2, b"OK"));
        assert_eq!(c.rx_cnt(), 1);
        assert_eq!(c.payload(), b"OK");
        assert_eq!(c.stats().pkt_cnt, 2);
        assert_eq!(c.stats().pkt_cnt_crcok, 1);
        assert_eq!(c.stats().last_flood_n_rx_fail, 1);
    }

    #[test]
    fn header_abort_and_driver_failure_count_once() {
        let mut c = core(5);
        c.start(receiver_params(1), &[]);

        c.rx_started(10_000);
        c.header_received(0b000_10010, 7); // foreign tag, aborts
        c.rx_failed(); // driver reports the abort as a failure too
        assert_eq!(c.stats().last_flood_n_rx_fail, 1);
    }

    #[test]
    fn initiator_excluded_from_flood_counters() {
        let mut c = core(1);
        c.start(initiator_params(1, 2, true), b"HELLO");
        let t1 = c.timer().now;
        c.tx_started(t1);
        c.tx_ended(t1 + airtime_hf(7));
        receive(
            &mut c,
            t1 + t_slot_estimate_hf(7) + tau1_hf(),
            &wire_frame(true, 2, 1, b"HELLO"),
        );
        assert_eq!(c.stats().flood_cnt, 0);
        assert_eq!(c.stats().flood_cnt_success, 0);
        assert_eq!(c.stats().pkt_cnt, 1);
    }

    #[test]
    fn receiver_flood_counters_and_noise_sample() {
        let mut c = core(9);
        c.radio_mut().rssi = Some(-97);
        c.radio_mut().last_rssi = -71;
        c.start(receiver_params(1), &[]);
        assert_eq!(c.stats().last_flood_rssi_noise, -97);

        receive(&mut c, 10_000, &wire_frame(true, 1, 1, b"N"));
        assert_eq!(c.stats().flood_cnt, 1);
        assert_eq!(c.stats().flood_cnt_success, 1);
        assert_eq!(c.stats().avg_rssi(), -71);
        assert_eq!(c.stats().snr(), 26);

        // Lifetime counters persist into the next flood.
        c.stop();
        c.start(receiver_params(1), &[]);
        assert_eq!(c.stats().pkt_cnt, 1);
        assert_eq!(c.stats().last_flood_n_rx_started, 0);

        c.reset_stats();
        assert_eq!(c.stats().pkt_cnt, 0);
    }

    #[test]
    fn radio_fault_counts_and_restarts_rx() {
        let mut c = core(5);
        c.start(receiver_params(1), &[]);
        let rx_before = c.radio().count(&RadioOp::StartRx);
        c.rx_tx_error();
        assert_eq!(c.stats().error_cnt, 1);
        assert_eq!(c.radio().count(&RadioOp::StartRx), rx_before + 1);
        assert!(c.is_active());
    }
}
