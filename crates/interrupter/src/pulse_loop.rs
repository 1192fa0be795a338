//! Low-rate pulse loop.
//!
//! Periods longer than the pulse generator can hold in one item are realised
//! by a dedicated thread that fires a single pulse, sleeps for the rest of
//! the period, then fetches the current timing again. The timing mailbox
//! keeps only the latest value; every value stored before a poll is seen by
//! that poll.
//!
//! While suspended (or while the timing is off) the thread blocks on a
//! condition variable instead of spinning.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use anyhow::Context;
use interrupter_core::hal::PulseGenerator;
use interrupter_core::{PulseShape, PulseTiming};
use parking_lot::{Condvar, Mutex};
use tracing::warn;

pub type SharedPulseGenerator = Arc<Mutex<Box<dyn PulseGenerator>>>;

struct LoopState {
  timing: PulseTiming,
  suspended: bool,
  shutdown: bool,
}

struct Shared {
  state: Mutex<LoopState>,
  wake: Condvar,
  pulses: AtomicU64,
}

pub struct LowRateLoop {
  shared: Arc<Shared>,
  handle: Option<JoinHandle<()>>,
}

impl LowRateLoop {
  /// Start the loop thread. It idles until a non-off timing is stored.
  pub fn spawn(generator: SharedPulseGenerator) -> anyhow::Result<Self> {
    let shared = Arc::new(Shared {
      state: Mutex::new(LoopState {
        timing: PulseTiming::OFF,
        suspended: false,
        shutdown: false,
      }),
      wake: Condvar::new(),
      pulses: AtomicU64::new(0),
    });

    let thread_shared = shared.clone();
    let handle = thread::Builder::new()
      .name("pulse-lf".into())
      .spawn(move || run(thread_shared, generator))
      .context("failed to spawn low-rate pulse thread")?;

    Ok(Self {
      shared,
      handle: Some(handle),
    })
  }

  /// Replace the pending timing. Does not cut the current sleep short.
  pub fn store(&self, timing: PulseTiming) {
    let mut state = self.shared.state.lock();
    state.timing = timing;
    self.shared.wake.notify_all();
  }

  pub fn timing(&self) -> PulseTiming {
    self.shared.state.lock().timing
  }

  pub fn suspend(&self) {
    let mut state = self.shared.state.lock();
    state.suspended = true;
    self.shared.wake.notify_all();
  }

  pub fn resume(&self) {
    let mut state = self.shared.state.lock();
    state.suspended = false;
    self.shared.wake.notify_all();
  }

  pub fn is_suspended(&self) -> bool {
    self.shared.state.lock().suspended
  }

  /// Single pulses fired so far.
  pub fn pulses(&self) -> u64 {
    self.shared.pulses.load(Ordering::Relaxed)
  }
}

impl Drop for LowRateLoop {
  fn drop(&mut self) {
    {
      let mut state = self.shared.state.lock();
      state.shutdown = true;
      self.shared.wake.notify_all();
    }
    if let Some(handle) = self.handle.take() {
      if handle.join().is_err() {
        warn!("low-rate pulse thread panicked");
      }
    }
  }
}

fn run(shared: Arc<Shared>, generator: SharedPulseGenerator) {
  loop {
    let timing = {
      let mut state = shared.state.lock();
      loop {
        if state.shutdown {
          return;
        }
        if !state.suspended && !state.timing.is_off() {
          break state.timing;
        }
        shared.wake.wait(&mut state);
      }
    };

    let started = Instant::now();
    {
      profiling::scope!("lf_pulse");
      // Lock order: generator, then state.
      let mut generator = generator.lock();
      {
        let state = shared.state.lock();
        if state.shutdown {
          return;
        }
        if state.suspended || state.timing != timing {
          continue;
        }
      }
      match generator.write(PulseShape::single(timing.pulse_width), false) {
        Ok(()) => {
          shared.pulses.fetch_add(1, Ordering::Relaxed);
        }
        Err(err) => warn!("low-rate pulse failed: {err}"),
      }
    }

    let deadline = started + Duration::from_micros(timing.period as u64);
    let mut state = shared.state.lock();
    while !state.shutdown && !state.suspended {
      if shared.wake.wait_until(&mut state, deadline).timed_out() {
        break;
      }
    }
  }
}
