//! Host clock driver for `embassy-time`.
//!
//! Ticks are wall-clock time since the first call. Wake-ups are kept in a
//! deadline-ordered queue served by one background thread, so timers and
//! `with_timeout` work under any executor, including `block_on`.

use core::task::Waker;
use embassy_time_driver::{Driver, TICK_HZ, time_driver_impl};
use std::collections::BTreeMap;
use std::sync::{Condvar, Mutex, OnceLock, PoisonError};
use std::time::{Duration, Instant as StdInstant};

static ORIGIN: OnceLock<StdInstant> = OnceLock::new();
static QUEUE: OnceLock<Mutex<BTreeMap<u64, Vec<Waker>>>> = OnceLock::new();
static CV: OnceLock<Condvar> = OnceLock::new();
static SCHEDULER_STARTED: OnceLock<()> = OnceLock::new();

fn origin() -> StdInstant {
    *ORIGIN.get_or_init(StdInstant::now)
}

fn queue() -> &'static Mutex<BTreeMap<u64, Vec<Waker>>> {
    QUEUE.get_or_init(|| Mutex::new(BTreeMap::new()))
}

fn cv() -> &'static Condvar {
    CV.get_or_init(Condvar::new)
}

fn ticks_since_origin(at: StdInstant) -> u64 {
    let elapsed = at.saturating_duration_since(origin());
    (elapsed.as_nanos() * TICK_HZ as u128 / 1_000_000_000u128).min(u64::MAX as u128) as u64
}

fn instant_for_ticks(ticks: u64) -> StdInstant {
    let nanos = (ticks as u128 * 1_000_000_000u128 / TICK_HZ as u128).min(u64::MAX as u128) as u64;
    origin() + Duration::from_nanos(nanos)
}

fn ensure_scheduler_thread() {
    SCHEDULER_STARTED.get_or_init(|| {
        if let Err(err) = std::thread::Builder::new()
            .name("embassy-time-scheduler".into())
            .spawn(scheduler_thread)
        {
            log::error!("Failed to start timer scheduler thread: {}", err);
        }
    });
}

fn scheduler_thread() {
    let mut guard = queue().lock().unwrap_or_else(PoisonError::into_inner);
    loop {
        let Some(&next_at) = guard.keys().next() else {
            guard = cv().wait(guard).unwrap_or_else(PoisonError::into_inner);
            continue;
        };

        let now = StdInstant::now();
        let target = instant_for_ticks(next_at);
        if target > now {
            // a newly scheduled earlier deadline notifies the condvar
            guard = cv().wait_timeout(guard, target - now).unwrap_or_else(PoisonError::into_inner).0;
            continue;
        }

        let now_ticks = ticks_since_origin(now).max(next_at);
        let pending = guard.split_off(&(now_ticks.saturating_add(1)));
        let due = std::mem::replace(&mut *guard, pending);
        drop(guard);

        // wake outside the lock
        for waker in due.into_values().flatten() {
            waker.wake();
        }
        guard = queue().lock().unwrap_or_else(PoisonError::into_inner);
    }
}

struct HostDriver;

impl Driver for HostDriver {
    fn now(&self) -> u64 {
        ticks_since_origin(StdInstant::now())
    }

    fn schedule_wake(&self, at: u64, waker: &Waker) {
        ensure_scheduler_thread();
        let mut guard = queue().lock().unwrap_or_else(PoisonError::into_inner);
        let wakers = guard.entry(at).or_default();
        if !wakers.iter().any(|w| w.will_wake(waker)) {
            wakers.push(waker.clone());
        }
        drop(guard);
        cv().notify_all();
    }
}

time_driver_impl!(static DRIVER: HostDriver = HostDriver);
