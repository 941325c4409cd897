//! Scaled virtual-time driver for embassy.
//!
//! Registers a global `embassy_time_driver::Driver` that maps real (host)
//! time to a virtual clock running at a fixed multiple of it, so a
//! simulation covering minutes of protocol time finishes in seconds of wall
//! time. The scale is set once at startup, before any task reads the clock
//! or schedules a timer; virtual time starts at zero at that moment.
//!
//! A dedicated scheduler thread waits for the next due virtual deadline and
//! wakes the registered wakers. Waits are sliced (<= 25 ms of host time) so
//! a missed notification can never stall the scheduler for long.
//!
//! Lock ordering: CLOCK before SCHED, and never both at once — every helper
//! acquires one lock, extracts what it needs and releases it before touching
//! the other.

use core::task::Waker;
use embassy_time_driver::{Driver, TICK_HZ, time_driver_impl};
use std::collections::BTreeMap;
use std::sync::{Condvar, Mutex, OnceLock};
use std::time::{Duration, Instant as StdInstant};

#[derive(Debug)]
struct ScaledClock {
    /// Host instant corresponding to virtual tick zero.
    origin_real: StdInstant,
    /// Virtual-vs-real speed in percent; 100 = real time.
    scale_percent: u64,
}

#[derive(Default)]
struct SchedulerState {
    /// Virtual-timestamp -> wakers due at that tick.
    queue: BTreeMap<u64, Vec<Waker>>,
}

static CLOCK: OnceLock<Mutex<ScaledClock>> = OnceLock::new();
static SCHED: OnceLock<Mutex<SchedulerState>> = OnceLock::new();
static CV: OnceLock<Condvar> = OnceLock::new();
static SCHEDULER_STARTED: OnceLock<()> = OnceLock::new();

fn clock() -> &'static Mutex<ScaledClock> {
    CLOCK.get_or_init(|| {
        Mutex::new(ScaledClock {
            origin_real: StdInstant::now(),
            scale_percent: 100,
        })
    })
}

fn sched() -> &'static Mutex<SchedulerState> {
    SCHED.get_or_init(|| Mutex::new(SchedulerState::default()))
}

fn cv() -> &'static Condvar {
    CV.get_or_init(Condvar::new)
}

/// Map a host timestamp to virtual ticks under the current scale.
fn map_real_to_virtual(r: StdInstant) -> u64 {
    let c = clock().lock().unwrap();
    let real_ns = r.saturating_duration_since(c.origin_real).as_nanos();
    (real_ns * TICK_HZ as u128 * c.scale_percent as u128 / 100 / 1_000_000_000) as u64
}

/// Map a virtual tick target back to a host timestamp.
fn map_virtual_to_real(v_target: u64) -> StdInstant {
    let c = clock().lock().unwrap();
    let real_ns =
        v_target as u128 * 1_000_000_000 * 100 / (TICK_HZ as u128 * c.scale_percent as u128);
    c.origin_real + Duration::from_nanos(real_ns.min(u64::MAX as u128) as u64)
}

/// Start the dedicated scheduler thread once. Safe to call repeatedly.
fn ensure_scheduler_thread() {
    SCHEDULER_STARTED.get_or_init(|| {
        std::thread::Builder::new()
            .name("virtual-time-scheduler".into())
            .spawn(scheduler_thread)
            .expect("failed to start virtual-time scheduler thread");
    });
}

/// Wait for the next due virtual deadline and wake its wakers.
fn scheduler_thread() {
    // Upper bound on one wait so a lost notify cannot stall the scheduler.
    const MAX_WAIT_SLICE: Duration = Duration::from_millis(25);
    loop {
        // Extract the earliest deadline, releasing SCHED before any CLOCK
        // access inside the mapping helpers.
        let next_at = loop {
            let guard = sched().lock().unwrap();
            if guard.queue.is_empty() {
                let guard = cv().wait(guard).unwrap();
                drop(guard);
                continue;
            }
            let (&next_at, _) = guard.queue.iter().next().unwrap();
            break next_at;
        };

        let real_target = map_virtual_to_real(next_at);
        let now_r = StdInstant::now();
        if real_target > now_r {
            let wait = (real_target - now_r).min(MAX_WAIT_SLICE);
            let guard = sched().lock().unwrap();
            let (guard, _) = cv().wait_timeout(guard, wait).unwrap();
            drop(guard);
            continue;
        }

        // Compute virtual "now" before taking SCHED, then drain due wakers.
        let now_v = map_real_to_virtual(StdInstant::now());
        let mut ready: Vec<Waker> = Vec::new();
        {
            let mut guard = sched().lock().unwrap();
            let due: Vec<u64> = guard.queue.range(..=now_v).map(|(&ts, _)| ts).collect();
            for ts in due {
                if let Some(wakers) = guard.queue.remove(&ts) {
                    ready.extend(wakers);
                }
            }
        }
        for w in ready {
            w.wake();
        }
    }
}

struct ScaledDriver;

impl Driver for ScaledDriver {
    fn now(&self) -> u64 {
        map_real_to_virtual(StdInstant::now())
    }

    fn schedule_wake(&self, at: u64, waker: &Waker) {
        ensure_scheduler_thread();
        let mut guard = sched().lock().unwrap();
        guard.queue.entry(at).or_default().push(waker.clone());
        drop(guard);
        cv().notify_all();
    }
}

time_driver_impl!(static DRIVER: ScaledDriver = ScaledDriver);

/// Fix the virtual-clock speed, in percent of real time (clamped to
/// 1..=10000), and restart virtual time from zero. Call once at startup,
/// before anything reads the clock.
pub fn set_time_scale_percent(percent: u32) {
    let mut c = clock().lock().unwrap();
    c.scale_percent = percent.clamp(1, 10_000) as u64;
    c.origin_real = StdInstant::now();
}

/// The configured virtual-clock speed in percent.
pub fn get_time_scale_percent() -> u32 {
    clock().lock().unwrap().scale_percent as u32
}
