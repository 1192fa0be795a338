//! Recording hardware backend.
//!
//! Implements the output-channel seams in memory so the engine can run on a
//! host. Pulse and pin operations are logged in order; duty writes happen at
//! the sample rate and are only counted, with the last value kept.
//!
//! Any fallible operation can be armed to fail once with
//! [`SimProbe::fail_next`]. A failed operation changes nothing and is not
//! logged.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU8, AtomicU64, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use interrupter_core::Driver;
use interrupter_core::PulseShape;
use interrupter_core::{Error, Result};
use interrupter_core::hal::{DutyGenerator, Fade, OutputPin, PulseGenerator};
use parking_lot::Mutex;
use serde::Serialize;

use crate::output::OutputHardware;

/// One recorded hardware operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "op")]
pub enum HwOp {
  PulseWrite { shape: PulseShape, looped: bool },
  PulseStart,
  PulseStop,
  DutyStop,
  Attach { driver: Driver },
}

/// A fallible hardware operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Fault {
  PulseWrite = 1 << 0,
  PulseStart = 1 << 1,
  PulseStop = 1 << 2,
  DutyStop = 1 << 3,
  Attach = 1 << 4,
}

#[derive(Default)]
struct SimState {
  ops: Mutex<Vec<HwOp>>,
  pulse_running: AtomicBool,
  attached: AtomicU8,
  duty: AtomicU8,
  duty_writes: AtomicU64,
  /// Armed faults, one bit per `Fault`.
  faults: AtomicU8,
}

impl SimState {
  fn record(&self, op: HwOp) {
    self.ops.lock().push(op);
  }

  /// Consume an armed fault for `op`.
  fn check(&self, op: Fault) -> Result<()> {
    let bit = op as u8;
    if self.faults.fetch_and(!bit, Ordering::AcqRel) & bit != 0 {
      return Err(Error::Hardware("injected fault"));
    }
    Ok(())
  }
}

struct SimPulses(Arc<SimState>);

impl PulseGenerator for SimPulses {
  fn write(&mut self, shape: PulseShape, looped: bool) -> Result<()> {
    self.0.check(Fault::PulseWrite)?;
    self.0.record(HwOp::PulseWrite { shape, looped });
    Ok(())
  }

  fn start(&mut self) -> Result<()> {
    self.0.check(Fault::PulseStart)?;
    self.0.pulse_running.store(true, Ordering::Release);
    self.0.record(HwOp::PulseStart);
    Ok(())
  }

  fn stop(&mut self) -> Result<()> {
    self.0.check(Fault::PulseStop)?;
    self.0.pulse_running.store(false, Ordering::Release);
    self.0.record(HwOp::PulseStop);
    Ok(())
  }
}

struct SimDuty(Arc<SimState>);

impl DutyGenerator for SimDuty {
  fn set_duty(&self, duty: u8, _fade: Fade) {
    self.0.duty.store(duty, Ordering::Relaxed);
    self.0.duty_writes.fetch_add(1, Ordering::Relaxed);
  }

  fn stop(&self) -> Result<()> {
    self.0.check(Fault::DutyStop)?;
    self.0.duty.store(0, Ordering::Relaxed);
    self.0.record(HwOp::DutyStop);
    Ok(())
  }
}

struct SimPin(Arc<SimState>);

impl OutputPin for SimPin {
  fn attach(&mut self, driver: Driver) -> Result<()> {
    self.0.check(Fault::Attach)?;
    self.0.attached.store(driver as u8, Ordering::Release);
    self.0.record(HwOp::Attach { driver });
    Ok(())
  }
}

/// Read side of the simulated hardware.
#[derive(Clone)]
pub struct SimProbe {
  state: Arc<SimState>,
}

impl SimProbe {
  /// Make the next `op` fail with a hardware error.
  pub fn fail_next(&self, op: Fault) {
    self.state.faults.fetch_or(op as u8, Ordering::AcqRel);
  }

  pub fn ops(&self) -> Vec<HwOp> {
    self.state.ops.lock().clone()
  }

  /// Drain the operation log.
  pub fn take_ops(&self) -> Vec<HwOp> {
    std::mem::take(&mut *self.state.ops.lock())
  }

  pub fn attached(&self) -> Driver {
    Driver::from_u8(self.state.attached.load(Ordering::Acquire)).unwrap_or(Driver::Gpio)
  }

  pub fn is_pulse_running(&self) -> bool {
    self.state.pulse_running.load(Ordering::Acquire)
  }

  pub fn duty(&self) -> u8 {
    self.state.duty.load(Ordering::Relaxed)
  }

  pub fn duty_writes(&self) -> u64 {
    self.state.duty_writes.load(Ordering::Relaxed)
  }

  /// Single (non-looped) pulses written so far.
  pub fn single_pulses(&self) -> usize {
    self
      .state
      .ops
      .lock()
      .iter()
      .filter(|op| matches!(op, HwOp::PulseWrite { looped: false, .. }))
      .count()
  }

  /// Last looped item written, if any.
  pub fn looped_shape(&self) -> Option<PulseShape> {
    self.state.ops.lock().iter().rev().find_map(|op| match op {
      HwOp::PulseWrite {
        shape,
        looped: true,
      } => Some(*shape),
      _ => None,
    })
  }
}

/// Build a simulated output channel and its probe.
pub fn sim_hardware() -> (OutputHardware, SimProbe) {
  let state = Arc::new(SimState::default());
  let hardware = OutputHardware {
    pulses: Box::new(SimPulses(state.clone())),
    duty: Arc::new(SimDuty(state.clone())),
    pin: Box::new(SimPin(state.clone())),
  };
  (hardware, SimProbe { state })
}

/// Poll `condition` every millisecond until it holds or `timeout` passes.
pub fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
  let deadline = Instant::now() + timeout;
  loop {
    if condition() {
      return true;
    }
    if Instant::now() >= deadline {
      return false;
    }
    thread::sleep(Duration::from_millis(1));
  }
}
