//! Line-in gate: forwards raw 12-bit samples to the duty output while the
//! jack is being listened to.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use interrupter_core::dsp::utils::{LINE_IN_FULL_SCALE, scale_to_duty};
use interrupter_core::{Error, Result};
use tracing::info;

use crate::output::ModulationPort;

pub struct LineInput {
  listening: Arc<AtomicBool>,
  port: ModulationPort,
}

impl LineInput {
  pub fn new(port: ModulationPort) -> Self {
    Self {
      listening: Arc::new(AtomicBool::new(false)),
      port,
    }
  }

  pub fn start_listen(&self) -> Result<()> {
    if self.listening.swap(true, Ordering::AcqRel) {
      return Err(Error::InvalidState("line-in already listening"));
    }
    info!("line-in listening");
    Ok(())
  }

  pub fn stop_listen(&self) -> Result<()> {
    if !self.listening.swap(false, Ordering::AcqRel) {
      return Err(Error::InvalidState("line-in not listening"));
    }
    info!("line-in stopped");
    Ok(())
  }

  pub fn is_listening(&self) -> bool {
    self.listening.load(Ordering::Acquire)
  }

  /// Handle for the converter callback.
  pub fn sink(&self) -> LineSink {
    LineSink {
      listening: self.listening.clone(),
      port: self.port.clone(),
    }
  }
}

/// Sample entry point of the line-in converter.
#[derive(Clone)]
pub struct LineSink {
  listening: Arc<AtomicBool>,
  port: ModulationPort,
}

impl LineSink {
  /// Forward one raw sample (low 12 bits). Returns the duty written.
  pub fn push(&self, raw: u16) -> Result<u8> {
    if !self.listening.load(Ordering::Acquire) {
      return Err(Error::InvalidState("line-in not listening"));
    }
    let duty = scale_to_duty((raw & 0x0fff) as u32, LINE_IN_FULL_SCALE);
    self.port.write(duty)?;
    Ok(duty)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::output::OutputDriver;
  use crate::sim::sim_hardware;
  use interrupter_core::OutputMode;

  #[test]
  fn samples_pass_only_while_listening() {
    let (hw, probe) = sim_hardware();
    let mut driver = OutputDriver::new(hw).unwrap();
    driver.set_mode(OutputMode::Modulation).unwrap();
    let line = LineInput::new(driver.modulation_port());
    let sink = line.sink();

    assert!(matches!(sink.push(4095), Err(Error::InvalidState(_))));
    line.start_listen().unwrap();
    assert_eq!(sink.push(4095), Ok(255));
    assert_eq!(sink.push(2048), Ok(127));
    assert_eq!(probe.duty(), 127);

    line.stop_listen().unwrap();
    assert!(sink.push(0).is_err());
    assert!(line.stop_listen().is_err());
  }

  #[test]
  fn listening_in_manual_mode_is_rejected_by_the_port() {
    let (hw, _) = sim_hardware();
    let driver = OutputDriver::new(hw).unwrap();
    let line = LineInput::new(driver.modulation_port());
    line.start_listen().unwrap();
    assert!(line.sink().push(100).is_err());
  }
}
