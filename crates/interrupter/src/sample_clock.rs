//! Tone synthesizer: note registry plus a fixed-rate sample clock.
//!
//! The clock thread stands in for the hardware timer interrupt. Each tick
//! runs one mixing step and hands the sample to the sink. It catches up in
//! bursts after oversleeping so the long-run rate matches the sample rate.
//! `disable` returns only once the thread has left its mixing loop, so no
//! sample reaches the sink after it.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use anyhow::Context;
use interrupter_core::dsp::{Mixer, Note, NoteWriter, note_registry};
use interrupter_core::{Error, Result};
use tracing::{info, warn};

/// Receives every synthesized sample, on the clock thread.
pub type SampleSink = Box<dyn FnMut(u16) + Send>;

const CLOCK_SLEEP: Duration = Duration::from_millis(1);

struct ClockShared {
  running: AtomicBool,
  /// Set by the clock thread while it is inside the mixing loop.
  active: AtomicBool,
  shutdown: AtomicBool,
  ticks: AtomicU64,
}

pub struct ToneSynth {
  notes: NoteWriter,
  shared: Arc<ClockShared>,
  handle: Option<JoinHandle<()>>,
}

impl ToneSynth {
  /// Create the registry and a stopped sample clock feeding `sink`.
  pub fn new(sample_rate: u32, sink: SampleSink) -> anyhow::Result<Self> {
    anyhow::ensure!(sample_rate > 0, "sample rate must be non-zero");
    let (notes, mixer) = note_registry(sample_rate);
    let shared = Arc::new(ClockShared {
      running: AtomicBool::new(false),
      active: AtomicBool::new(false),
      shutdown: AtomicBool::new(false),
      ticks: AtomicU64::new(0),
    });

    let thread_shared = shared.clone();
    let handle = thread::Builder::new()
      .name("sample-clock".into())
      .spawn(move || run_clock(thread_shared, mixer, sink))
      .context("failed to spawn sample clock thread")?;

    info!("tone synthesizer initialized at {sample_rate} Hz");
    Ok(Self {
      notes,
      shared,
      handle: Some(handle),
    })
  }

  /// Start the sample clock.
  pub fn enable(&self) -> Result<()> {
    if self.shared.running.swap(true, Ordering::AcqRel) {
      return Err(Error::InvalidState("sample clock already running"));
    }
    if let Some(handle) = &self.handle {
      handle.thread().unpark();
    }
    info!("sample clock started");
    Ok(())
  }

  /// Stop the sample clock and wait for the in-flight burst to finish.
  pub fn disable(&self) -> Result<()> {
    if !self.shared.running.swap(false, Ordering::SeqCst) {
      return Err(Error::InvalidState("sample clock not running"));
    }
    while self.shared.active.load(Ordering::SeqCst) {
      thread::yield_now();
    }
    info!("sample clock stopped");
    Ok(())
  }

  pub fn is_running(&self) -> bool {
    self.shared.running.load(Ordering::Acquire)
  }

  /// Samples produced since creation.
  pub fn ticks(&self) -> u64 {
    self.shared.ticks.load(Ordering::Relaxed)
  }

  pub fn play(&mut self, note: Note) -> Result<usize> {
    self.notes.play(note)
  }

  pub fn play_code(&mut self, code: u8) -> Result<usize> {
    self.notes.play_code(code)
  }

  pub fn stop(&mut self, note: Note) -> Result<Option<usize>> {
    self.notes.stop(note)
  }

  pub fn stop_code(&mut self, code: u8) -> Result<Option<usize>> {
    self.notes.stop_code(code)
  }

  pub fn release_all(&mut self) {
    self.notes.release_all();
  }

  pub fn active_count(&self) -> usize {
    self.notes.active_count()
  }

  pub fn sample_rate(&self) -> u32 {
    self.notes.sample_rate()
  }
}

impl Drop for ToneSynth {
  fn drop(&mut self) {
    self.shared.shutdown.store(true, Ordering::Release);
    if let Some(handle) = self.handle.take() {
      handle.thread().unpark();
      if handle.join().is_err() {
        warn!("sample clock thread panicked");
      }
    }
  }
}

fn run_clock(shared: Arc<ClockShared>, mut mixer: Mixer, mut sink: SampleSink) {
  let sample_rate = mixer.sample_rate() as u128;
  // Never burst more than 100 ms worth of samples after a stall.
  let max_burst = (sample_rate / 10).max(1) as u64;

  loop {
    if shared.shutdown.load(Ordering::Acquire) {
      return;
    }
    if !shared.running.load(Ordering::Acquire) {
      thread::park();
      continue;
    }

    // Published before `running` is re-checked; `disable` waits on it.
    shared.active.store(true, Ordering::SeqCst);
    let started = Instant::now();
    let mut emitted: u64 = 0;
    while shared.running.load(Ordering::SeqCst) && !shared.shutdown.load(Ordering::Acquire) {
      let due = (started.elapsed().as_nanos() * sample_rate / 1_000_000_000) as u64;
      if due.saturating_sub(emitted) > max_burst {
        emitted = due - max_burst;
      }
      while emitted < due {
        sink(mixer.next_sample());
        emitted += 1;
        shared.ticks.fetch_add(1, Ordering::Relaxed);
      }
      thread::sleep(CLOCK_SLEEP);
    }
    shared.active.store(false, Ordering::SeqCst);
  }
}
