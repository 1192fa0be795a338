//! Waveform output driver.
//!
//! Owns the single output channel and arbitrates between the manual pulse
//! train and duty-cycle modulation. Mode switches and enable/disable run to
//! completion before returning. A failed hardware step rolls back whatever
//! the transition had already changed, so the routing state stays as it was.
//! The one exception is the duty generator: once stopped by a failed return
//! to manual it stays silent until the next duty write.

use std::sync::Arc;
use std::sync::atomic::{AtomicU8, AtomicUsize, Ordering};

use anyhow::Context;
use interrupter_core::hal::{DutyGenerator, Fade, OutputPin, PulseGenerator};
use interrupter_core::{
  Driver, Error, OutputMode, PulsePlan, PulseShape, PulseTiming, Result, Routing, plan_pulses,
};
use parking_lot::Mutex;
use tracing::{info, warn};

use crate::pulse_loop::{LowRateLoop, SharedPulseGenerator};

/// The hardware behind the output channel.
pub struct OutputHardware {
  pub pulses: Box<dyn PulseGenerator>,
  pub duty: Arc<dyn DutyGenerator>,
  pub pin: Box<dyn OutputPin>,
}

pub struct OutputDriver {
  routing: Routing,
  plan: PulsePlan,
  pulses: SharedPulseGenerator,
  duty: Arc<dyn DutyGenerator>,
  pin: Box<dyn OutputPin>,
  low_rate: LowRateLoop,
  gate: Arc<DutyGate>,
}

impl OutputDriver {
  pub fn new(hardware: OutputHardware) -> anyhow::Result<Self> {
    let OutputHardware {
      pulses,
      duty,
      mut pin,
    } = hardware;
    let pulses: SharedPulseGenerator = Arc::new(Mutex::new(pulses));

    pulses
      .lock()
      .stop()
      .context("failed to reset pulse generator")?;
    pin
      .attach(Driver::Gpio)
      .context("failed to park output pin")?;
    let low_rate = LowRateLoop::spawn(pulses.clone())?;

    info!("output driver initialized in {} mode", OutputMode::Manual);
    Ok(Self {
      routing: Routing::new(),
      plan: PulsePlan::Off,
      pulses,
      duty,
      pin,
      low_rate,
      gate: Arc::new(DutyGate::new(OutputMode::Manual)),
    })
  }

  pub fn mode(&self) -> OutputMode {
    self.routing.mode()
  }

  pub fn is_enabled(&self) -> bool {
    self.routing.is_enabled()
  }

  pub fn attached_driver(&self) -> Driver {
    self.routing.attached()
  }

  /// Strategy chosen by the last manual update.
  pub fn plan(&self) -> PulsePlan {
    self.plan
  }

  pub fn low_rate_pulses(&self) -> u64 {
    self.low_rate.pulses()
  }

  pub fn set_mode(&mut self, mode: OutputMode) -> Result<()> {
    let mut next = self.routing;
    let reattach = next.set_mode(mode)?;

    match mode {
      OutputMode::Modulation => self.enter_modulation(reattach)?,
      OutputMode::Manual => self.enter_manual(reattach)?,
    }

    self.routing = next;
    info!("output mode set to {mode}");
    Ok(())
  }

  fn enter_modulation(&mut self, reattach: Option<Driver>) -> Result<()> {
    self.low_rate.suspend();
    if let Err(err) = self.pulses.lock().stop() {
      self.low_rate.resume();
      return Err(err);
    }
    if let Some(driver) = reattach {
      if let Err(err) = self.pin.attach(driver) {
        if let Err(undo) = self.restart_pulses() {
          warn!("failed to restore pulse output: {undo}");
        }
        return Err(err);
      }
    }
    self.gate.open();
    Ok(())
  }

  fn enter_manual(&mut self, reattach: Option<Driver>) -> Result<()> {
    // No sample-path write lands after this.
    self.gate.close();
    if let Err(err) = self.duty.stop() {
      self.gate.open();
      return Err(err);
    }
    if let Some(driver) = reattach {
      if let Err(err) = self.pin.attach(driver) {
        self.gate.open();
        return Err(err);
      }
    }
    if let Err(err) = self.restart_pulses() {
      self.low_rate.suspend();
      if let Err(undo) = self.pulses.lock().stop() {
        warn!("failed to silence pulse output: {undo}");
      }
      if reattach.is_some() {
        if let Err(undo) = self.pin.attach(self.routing.attached()) {
          warn!("failed to restore output pin: {undo}");
        }
      }
      self.gate.open();
      return Err(err);
    }
    Ok(())
  }

  /// Bring the pulse side back in line with the current plan.
  fn restart_pulses(&mut self) -> Result<()> {
    self.low_rate.resume();
    if let PulsePlan::Looped(shape) = self.plan {
      program_looped(&mut **self.pulses.lock(), shape)?;
    }
    Ok(())
  }

  /// Connect the channel to the current mode's driver.
  pub fn enable(&mut self) -> Result<()> {
    let mut next = self.routing;
    let driver = next.enable()?;
    self.pin.attach(driver)?;
    self.routing = next;
    info!("output enabled ({driver:?})");
    Ok(())
  }

  /// Park the channel on plain GPIO.
  pub fn disable(&mut self) -> Result<()> {
    let mut next = self.routing;
    let driver = next.disable()?;
    self.pin.attach(driver)?;
    self.routing = next;
    info!("output disabled");
    Ok(())
  }

  /// Reprogram the pulse train. Only valid in manual mode.
  pub fn manual_update(&mut self, freq_hz: f32, pulse_width_us: u32) -> Result<PulsePlan> {
    self.routing.require(OutputMode::Manual)?;
    let plan = plan_pulses(freq_hz, pulse_width_us)?;
    let previous = self.low_rate.timing();

    match plan {
      PulsePlan::Off => {
        self.low_rate.store(PulseTiming::OFF);
        if let Err(err) = self.pulses.lock().stop() {
          self.low_rate.store(previous);
          return Err(err);
        }
      }
      PulsePlan::Looped(shape) => {
        self.low_rate.store(PulseTiming::OFF);
        let programmed = program_looped(&mut **self.pulses.lock(), shape);
        if let Err(err) = programmed {
          self.low_rate.store(previous);
          if let Err(undo) = self.restart_pulses() {
            warn!("failed to restore pulse output: {undo}");
          }
          return Err(err);
        }
      }
      PulsePlan::Retriggered(timing) => {
        self.pulses.lock().stop()?;
        self.low_rate.store(timing);
      }
    }

    self.plan = plan;
    info!("manual update: freq={freq_hz} Hz width={pulse_width_us} us -> {plan}");
    Ok(plan)
  }

  /// Set the modulation duty. Only valid in modulation mode.
  pub fn modulation_update(&self, duty: u8) -> Result<()> {
    self.routing.require(OutputMode::Modulation)?;
    self.duty.set_duty(duty, Fade::IMMEDIATE);
    Ok(())
  }

  /// A handle for the sample path (line-in, synthesizer) to write duty.
  pub fn modulation_port(&self) -> ModulationPort {
    ModulationPort {
      gate: self.gate.clone(),
      duty: self.duty.clone(),
    }
  }
}

fn program_looped(pulses: &mut dyn PulseGenerator, shape: PulseShape) -> Result<()> {
  pulses.stop()?;
  pulses.write(shape, true)?;
  pulses.start()
}

/// Output mode as seen by the sample path, plus the number of duty writes
/// currently past the mode check.
///
/// Writers register before reading the mode and `close` publishes the mode
/// before reading the count. With sequentially consistent ordering either
/// the writer sees the switch or `close` sees the writer and waits for it.
struct DutyGate {
  mode: AtomicU8,
  writers: AtomicUsize,
}

impl DutyGate {
  fn new(mode: OutputMode) -> Self {
    Self {
      mode: AtomicU8::new(mode as u8),
      writers: AtomicUsize::new(0),
    }
  }

  fn open(&self) {
    self
      .mode
      .store(OutputMode::Modulation as u8, Ordering::SeqCst);
  }

  /// Leave modulation and wait for in-flight writes to finish.
  fn close(&self) {
    self.mode.store(OutputMode::Manual as u8, Ordering::SeqCst);
    while self.writers.load(Ordering::SeqCst) != 0 {
      std::hint::spin_loop();
    }
  }
}

struct InFlight<'a>(&'a AtomicUsize);

impl<'a> InFlight<'a> {
  fn enter(writers: &'a AtomicUsize) -> Self {
    writers.fetch_add(1, Ordering::SeqCst);
    Self(writers)
  }
}

impl Drop for InFlight<'_> {
  fn drop(&mut self) {
    self.0.fetch_sub(1, Ordering::SeqCst);
  }
}

/// Lock-free duty writer shared with sample producers.
#[derive(Clone)]
pub struct ModulationPort {
  gate: Arc<DutyGate>,
  duty: Arc<dyn DutyGenerator>,
}

impl ModulationPort {
  pub fn write(&self, duty: u8) -> Result<()> {
    let _in_flight = InFlight::enter(&self.gate.writers);
    if self.gate.mode.load(Ordering::SeqCst) != OutputMode::Modulation as u8 {
      return Err(Error::InvalidState("output not in modulation mode"));
    }
    self.duty.set_duty(duty, Fade::IMMEDIATE);
    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::sim::{Fault, HwOp, SimProbe, sim_hardware, wait_until};
  use std::sync::atomic::AtomicBool;
  use std::thread;
  use std::time::Duration;

  fn driver() -> (OutputDriver, SimProbe) {
    let (hw, probe) = sim_hardware();
    let driver = OutputDriver::new(hw).unwrap();
    probe.take_ops();
    (driver, probe)
  }

  #[test]
  fn starts_manual_disabled_and_parked() {
    let (driver, probe) = driver();
    assert_eq!(driver.mode(), OutputMode::Manual);
    assert!(!driver.is_enabled());
    assert_eq!(probe.attached(), Driver::Gpio);
  }

  #[test]
  fn short_period_is_looped_in_hardware() {
    let (mut driver, probe) = driver();
    let plan = driver.manual_update(1000.0, 100).unwrap();
    assert_eq!(plan.label(), "HF");
    assert_eq!(
      probe.take_ops(),
      vec![
        HwOp::PulseStop,
        HwOp::PulseWrite {
          shape: PulseShape { high: 100, low: 900 },
          looped: true,
        },
        HwOp::PulseStart,
      ]
    );
    assert!(probe.is_pulse_running());
  }

  #[test]
  fn long_period_hands_off_to_the_loop() {
    let (mut driver, probe) = driver();
    driver.manual_update(1000.0, 100).unwrap();
    let plan = driver.manual_update(20.0, 400).unwrap();
    assert_eq!(plan, PulsePlan::Retriggered(PulseTiming::new(50_000, 400)));
    assert!(!probe.is_pulse_running());
    assert!(wait_until(Duration::from_secs(2), || probe.single_pulses() >= 1));
  }

  #[test]
  fn dead_zone_and_wrong_mode_are_rejected() {
    let (mut driver, _) = driver();
    assert!(matches!(
      driver.manual_update(0.05, 100),
      Err(Error::InvalidArgument(_))
    ));
    assert!(matches!(
      driver.modulation_update(10),
      Err(Error::InvalidState(_))
    ));

    driver.set_mode(OutputMode::Modulation).unwrap();
    assert!(matches!(
      driver.manual_update(100.0, 100),
      Err(Error::InvalidState(_))
    ));
    assert!(driver.set_mode(OutputMode::Modulation).is_err());
  }

  #[test]
  fn mode_switch_rewires_only_when_enabled() {
    let (mut driver, probe) = driver();
    driver.set_mode(OutputMode::Modulation).unwrap();
    assert_eq!(probe.attached(), Driver::Gpio);

    driver.enable().unwrap();
    assert_eq!(probe.attached(), Driver::Duty);
    driver.set_mode(OutputMode::Manual).unwrap();
    assert_eq!(probe.attached(), Driver::Pulse);
    assert_eq!(driver.attached_driver(), Driver::Pulse);

    driver.disable().unwrap();
    assert_eq!(probe.attached(), Driver::Gpio);
    assert!(driver.disable().is_err());
  }

  #[test]
  fn modulation_suspends_the_low_rate_loop() {
    let (mut driver, probe) = driver();
    driver.manual_update(10.0, 200).unwrap();
    assert!(wait_until(Duration::from_secs(2), || probe.single_pulses() >= 1));

    driver.set_mode(OutputMode::Modulation).unwrap();
    std::thread::sleep(Duration::from_millis(20));
    let parked = probe.single_pulses();
    std::thread::sleep(Duration::from_millis(250));
    assert_eq!(probe.single_pulses(), parked);

    driver.set_mode(OutputMode::Manual).unwrap();
    assert!(wait_until(Duration::from_secs(2), || probe.single_pulses() > parked));
  }

  #[test]
  fn return_to_manual_restarts_the_looped_item() {
    let (mut driver, probe) = driver();
    driver.manual_update(500.0, 50).unwrap();
    driver.set_mode(OutputMode::Modulation).unwrap();
    assert!(!probe.is_pulse_running());

    driver.set_mode(OutputMode::Manual).unwrap();
    assert!(probe.is_pulse_running());
    assert_eq!(
      probe.looped_shape(),
      Some(PulseShape {
        high: 50,
        low: 1950
      })
    );
  }

  #[test]
  fn port_follows_the_mode() {
    let (mut driver, probe) = driver();
    let port = driver.modulation_port();
    assert!(port.write(100).is_err());

    driver.set_mode(OutputMode::Modulation).unwrap();
    port.write(200).unwrap();
    driver.modulation_update(201).unwrap();
    assert_eq!(probe.duty(), 201);

    driver.set_mode(OutputMode::Manual).unwrap();
    assert!(port.write(1).is_err());
    assert_eq!(probe.duty(), 0);
  }

  #[test]
  fn no_duty_write_survives_a_switch_to_manual() {
    let (mut driver, probe) = driver();
    let port = driver.modulation_port();

    for _ in 0..200 {
      driver.set_mode(OutputMode::Modulation).unwrap();
      let done = Arc::new(AtomicBool::new(false));
      let writer = {
        let (port, done) = (port.clone(), done.clone());
        thread::spawn(move || {
          while !done.load(Ordering::Relaxed) {
            let _ = port.write(200);
          }
        })
      };
      let before = probe.duty_writes();
      assert!(wait_until(Duration::from_secs(2), || probe.duty_writes() > before));

      driver.set_mode(OutputMode::Manual).unwrap();
      assert_eq!(probe.duty(), 0);
      done.store(true, Ordering::Relaxed);
      writer.join().unwrap();
      assert_eq!(probe.duty(), 0);
    }
  }

  #[test]
  fn failed_pulse_stop_keeps_manual_output_alive() {
    let (mut driver, probe) = driver();
    probe.fail_next(Fault::PulseStop);
    assert_eq!(
      driver.set_mode(OutputMode::Modulation),
      Err(Error::Hardware("injected fault"))
    );
    assert_eq!(driver.mode(), OutputMode::Manual);
    assert!(driver.modulation_port().write(10).is_err());

    driver.manual_update(10.0, 200).unwrap();
    assert!(wait_until(Duration::from_secs(2), || probe.single_pulses() >= 1));
  }

  #[test]
  fn failed_rewire_restarts_the_looped_item() {
    let (mut driver, probe) = driver();
    driver.enable().unwrap();
    driver.manual_update(500.0, 50).unwrap();
    probe.fail_next(Fault::Attach);

    assert!(driver.set_mode(OutputMode::Modulation).is_err());
    assert_eq!(driver.mode(), OutputMode::Manual);
    assert_eq!(probe.attached(), Driver::Pulse);
    assert!(probe.is_pulse_running());
    assert_eq!(probe.looped_shape(), Some(PulseShape { high: 50, low: 1950 }));
  }

  #[test]
  fn failed_looped_update_keeps_the_low_rate_timing() {
    let (mut driver, probe) = driver();
    let low_rate = driver.manual_update(10.0, 200).unwrap();
    probe.fail_next(Fault::PulseStart);

    assert!(driver.manual_update(1000.0, 100).is_err());
    assert_eq!(driver.plan(), low_rate);
    let fired = probe.single_pulses();
    assert!(wait_until(Duration::from_secs(2), || probe.single_pulses() > fired));
  }

  #[test]
  fn failed_duty_stop_stays_in_modulation() {
    let (mut driver, probe) = driver();
    let port = driver.modulation_port();
    driver.set_mode(OutputMode::Modulation).unwrap();
    probe.fail_next(Fault::DutyStop);

    assert!(driver.set_mode(OutputMode::Manual).is_err());
    assert_eq!(driver.mode(), OutputMode::Modulation);
    port.write(40).unwrap();
    assert_eq!(probe.duty(), 40);
  }

  #[test]
  fn failed_pulse_restart_rolls_back_to_modulation() {
    let (mut driver, probe) = driver();
    driver.enable().unwrap();
    driver.manual_update(500.0, 50).unwrap();
    driver.set_mode(OutputMode::Modulation).unwrap();
    probe.fail_next(Fault::PulseStart);

    assert!(driver.set_mode(OutputMode::Manual).is_err());
    assert_eq!(driver.mode(), OutputMode::Modulation);
    assert_eq!(probe.attached(), Driver::Duty);
    assert!(!probe.is_pulse_running());
    driver.modulation_update(90).unwrap();
    assert_eq!(probe.duty(), 90);
  }
}
