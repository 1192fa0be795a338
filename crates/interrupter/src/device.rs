//! Mode orchestrator.
//!
//! Wires the bus to the knob engine, the output driver, the tone
//! synthesizer and the line-in gate, and implements the device's input-mode
//! state machine:
//!
//! * trigger pressed / released arms and idles the output;
//! * plugging the line-in jack (from manual) switches to line-in modulation;
//! * connecting a note controller (from manual) switches to tone modulation;
//! * unplugging or disconnecting returns to manual and re-applies the knobs.
//!
//! All handlers run on the thread calling [`Device::dispatch`].

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU8, AtomicU64, Ordering};
use std::time::Duration;

use anyhow::Context;
use interrupter_core::dsp::Note;
use interrupter_core::dsp::utils::{SYNTH_FULL_SCALE, scale_to_duty};
use interrupter_core::knobs::KnobListener;
use interrupter_core::{
  ControlEvent, DeviceConfig, Error, Event, EventSource, KnobBank, KnobId, LineEvent, NoteMessage,
  OutputMode, Result, ToneEvent,
};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::bus::{EventBus, EventPublisher};
use crate::line_in::{LineInput, LineSink};
use crate::output::{OutputDriver, OutputHardware};
use crate::sample_clock::ToneSynth;

/// Controls found held down at power-up.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BootFlags {
  /// Ignore the trigger until it has been released once.
  pub trigger_held: bool,
  /// Debug boot: the tone synthesizer is not started.
  pub encoder_held: bool,
}

/// Where the output's drive signal comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum InputMode {
  Manual = 0,
  LineIn = 1,
  Tone = 2,
}

impl InputMode {
  fn from_u8(raw: u8) -> Self {
    match raw {
      1 => InputMode::LineIn,
      2 => InputMode::Tone,
      _ => InputMode::Manual,
    }
  }
}

/// Lock-free status shared with other threads (display, CLI).
pub struct StatusMeter {
  output_mode: AtomicU8,
  input_mode: AtomicU8,
  armed: AtomicBool,
  active_notes: AtomicU8,
  /// Synth samples the output refused (mode already left)
  rejected_samples: AtomicU64,
}

impl Default for StatusMeter {
  fn default() -> Self {
    Self {
      output_mode: AtomicU8::new(OutputMode::Manual as u8),
      input_mode: AtomicU8::new(InputMode::Manual as u8),
      armed: AtomicBool::new(false),
      active_notes: AtomicU8::new(0),
      rejected_samples: AtomicU64::new(0),
    }
  }
}

impl StatusMeter {
  pub fn snapshot(&self) -> DeviceStatus {
    DeviceStatus {
      output_mode: OutputMode::from_u8(self.output_mode.load(Ordering::Relaxed))
        .unwrap_or(OutputMode::Manual),
      input_mode: InputMode::from_u8(self.input_mode.load(Ordering::Relaxed)),
      armed: self.armed.load(Ordering::Relaxed),
      active_notes: self.active_notes.load(Ordering::Relaxed) as usize,
      rejected_samples: self.rejected_samples.load(Ordering::Relaxed),
    }
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DeviceStatus {
  pub output_mode: OutputMode,
  pub input_mode: InputMode,
  pub armed: bool,
  pub active_notes: usize,
  pub rejected_samples: u64,
}

/// Everything the bus handlers act on.
pub struct Components {
  knobs: KnobBank,
  output: OutputDriver,
  synth: Option<ToneSynth>,
  line_in: LineInput,
  input_mode: InputMode,
  awaiting_trigger_release: bool,
  meter: Arc<StatusMeter>,
}

impl Components {
  fn on_trigger(&mut self, event: &Event) {
    match ControlEvent::of(event) {
      Some(ControlEvent::TriggerPressed) => {
        if self.awaiting_trigger_release {
          info!("trigger held since boot, release it first");
          return;
        }
        match self.output.enable() {
          Ok(()) => info!("armed"),
          Err(err) => warn!("arming failed: {err}"),
        }
      }
      Some(ControlEvent::TriggerReleased) => {
        if self.awaiting_trigger_release {
          self.awaiting_trigger_release = false;
          info!("trigger released, arming allowed");
          return;
        }
        match self.output.disable() {
          Ok(()) => info!("idle"),
          Err(err) => warn!("disarming failed: {err}"),
        }
      }
      _ => return,
    }
    self.publish_status();
  }

  fn on_knob_event(&mut self, event: &Event) {
    let mask = self.knobs.handle_control(event);
    if mask.is_empty() {
      return;
    }
    debug!("knobs changed: {:?}", mask.iter().collect::<Vec<_>>());
    if self.input_mode == InputMode::Manual
      && (mask.contains(KnobId::PulseDelay) || mask.contains(KnobId::RepetitionFrequency))
    {
      self.apply_knobs();
    }
  }

  fn on_line(&mut self, event: &Event) {
    match LineEvent::of(event) {
      Some(LineEvent::Plugged) => {
        if self.input_mode != InputMode::Manual {
          info!("line-in plugged in {:?} mode, ignored", self.input_mode);
          return;
        }
        if let Err(err) = self.line_in.start_listen() {
          warn!("line-in start failed: {err}");
          return;
        }
        if let Err(err) = self.output.set_mode(OutputMode::Modulation) {
          warn!("line-in modulation failed: {err}");
          if let Err(err) = self.line_in.stop_listen() {
            warn!("line-in stop failed: {err}");
          }
          return;
        }
        self.input_mode = InputMode::LineIn;
      }
      Some(LineEvent::Unplugged) => {
        if self.input_mode != InputMode::LineIn {
          return;
        }
        if let Err(err) = self.line_in.stop_listen() {
          warn!("line-in stop failed: {err}");
        }
        if let Err(err) = self.enter_manual() {
          warn!("return to manual failed, staying on line-in: {err}");
          if let Err(err) = self.line_in.start_listen() {
            warn!("line-in restart failed: {err}");
          }
        }
      }
      None => return,
    }
    self.publish_status();
  }

  fn on_tone(&mut self, event: &Event) {
    match ToneEvent::of(event) {
      Some(ToneEvent::Connected) => self.tone_connected(event),
      Some(ToneEvent::Disconnected) => {
        if self.input_mode != InputMode::Tone {
          return;
        }
        if let Some(synth) = self.synth.as_mut() {
          if let Err(err) = synth.disable() {
            warn!("sample clock stop failed: {err}");
          }
          synth.release_all();
        }
        info!("tone input disconnected");
        if let Err(err) = self.enter_manual() {
          warn!("return to manual failed, staying on tone input: {err}");
          if let Some(synth) = self.synth.as_ref() {
            if let Err(err) = synth.enable() {
              warn!("sample clock restart failed: {err}");
            }
          }
        }
      }
      Some(ToneEvent::NoteOn) | Some(ToneEvent::NoteOff) => self.tone_note(event),
      None => return,
    }
    self.publish_status();
  }

  fn tone_connected(&mut self, event: &Event) {
    let name = event
      .payload::<String>()
      .map(String::as_str)
      .unwrap_or("unnamed device");
    let Some(synth) = self.synth.as_ref() else {
      warn!("tone input '{name}' refused: synthesizer not started (debug boot)");
      return;
    };
    if self.input_mode != InputMode::Manual {
      info!("tone input '{name}' connected in {:?} mode, ignored", self.input_mode);
      return;
    }
    if let Err(err) = self.output.set_mode(OutputMode::Modulation) {
      warn!("tone modulation failed: {err}");
      return;
    }
    if let Err(err) = synth.enable() {
      warn!("sample clock start failed: {err}");
    }
    self.input_mode = InputMode::Tone;
    info!("tone input '{name}' connected");
  }

  fn tone_note(&mut self, event: &Event) {
    if self.input_mode != InputMode::Tone {
      return;
    }
    let (Some(message), Some(synth)) = (NoteMessage::from_event(event), self.synth.as_mut()) else {
      return;
    };
    let note = Note::from_code(message.note);
    if message.on && message.velocity > 0 {
      if let Err(err) = synth.play_code(message.note) {
        warn!("note {note} not started: {err}");
      }
    } else if let Err(err) = synth.stop_code(message.note) {
      warn!("note {note} not stopped: {err}");
    }
  }

  /// Leaves the input mode untouched if the output refuses the switch.
  fn enter_manual(&mut self) -> Result<()> {
    self.output.set_mode(OutputMode::Manual)?;
    self.input_mode = InputMode::Manual;
    self.apply_knobs();
    Ok(())
  }

  fn apply_knobs(&mut self) {
    let prf = self.knobs.value(KnobId::RepetitionFrequency) as f32;
    let pd = self.knobs.value(KnobId::PulseDelay).max(0) as u32;
    if let Err(err) = self.output.manual_update(prf, pd) {
      warn!("manual update rejected: {err}");
    }
  }

  fn publish_status(&self) {
    let meter = &self.meter;
    meter
      .output_mode
      .store(self.output.mode() as u8, Ordering::Relaxed);
    meter
      .input_mode
      .store(self.input_mode as u8, Ordering::Relaxed);
    meter.armed.store(self.output.is_enabled(), Ordering::Relaxed);
    let notes = self.synth.as_ref().map_or(0, ToneSynth::active_count);
    meter.active_notes.store(notes as u8, Ordering::Relaxed);
  }
}

pub struct Device {
  bus: EventBus<Components>,
  parts: Components,
}

impl Device {
  /// Bring up every subsystem and subscribe the handlers.
  pub fn start(
    config: DeviceConfig,
    hardware: OutputHardware,
    boot: BootFlags,
  ) -> anyhow::Result<Self> {
    config
      .validate()
      .context("invalid device configuration")?;

    let output = OutputDriver::new(hardware).context("output driver bring-up failed")?;
    let meter = Arc::new(StatusMeter::default());
    let port = output.modulation_port();

    let synth = if boot.encoder_held {
      warn!("debug boot: tone synthesizer not started");
      None
    } else {
      let port = port.clone();
      let rejected = meter.clone();
      let synth = ToneSynth::new(
        config.sample_rate_hz,
        Box::new(move |sample: u16| {
          let duty = scale_to_duty(sample as u32, SYNTH_FULL_SCALE);
          if port.write(duty).is_err() {
            rejected.rejected_samples.fetch_add(1, Ordering::Relaxed);
          }
        }),
      )
      .context("tone synthesizer bring-up failed")?;
      Some(synth)
    };

    if boot.trigger_held {
      info!("trigger held at boot, waiting for release");
    }

    let mut parts = Components {
      knobs: KnobBank::new(&config),
      output,
      synth,
      line_in: LineInput::new(port),
      input_mode: InputMode::Manual,
      awaiting_trigger_release: boot.trigger_held,
      meter,
    };
    parts.apply_knobs();
    parts.publish_status();

    let mut bus = EventBus::new();
    bus.subscribe(EventSource::Controls, |event, parts: &mut Components| {
      parts.on_trigger(event)
    })?;
    bus.subscribe(EventSource::Controls, |event, parts: &mut Components| {
      parts.on_knob_event(event)
    })?;
    bus.subscribe(EventSource::LineIn, |event, parts: &mut Components| {
      parts.on_line(event)
    })?;
    bus.subscribe(EventSource::Tone, |event, parts: &mut Components| {
      parts.on_tone(event)
    })?;

    info!("device started");
    Ok(Self { bus, parts })
  }

  pub fn publisher(&self) -> EventPublisher {
    self.bus.publisher()
  }

  pub fn publish(&self, event: Event) -> Result<()> {
    self.bus.publish(event)
  }

  /// Deliver the next event, waiting up to `timeout`.
  pub fn dispatch(&mut self, timeout: Duration) -> Result<EventSource> {
    self.bus.dispatch(&mut self.parts, timeout)
  }

  /// Deliver everything already queued.
  pub fn dispatch_pending(&mut self) -> usize {
    self.bus.dispatch_pending(&mut self.parts)
  }

  /// Dispatch until `shutdown` is set.
  pub fn run(&mut self, shutdown: &AtomicBool, poll: Duration) {
    while !shutdown.load(Ordering::Acquire) {
      match self.dispatch(poll) {
        Ok(_) | Err(Error::Timeout) => {}
        Err(err) => {
          warn!("dispatch stopped: {err}");
          return;
        }
      }
    }
  }

  /// Register the knob-changed callback.
  pub fn on_knob_change(&mut self, listener: KnobListener) {
    self.parts.knobs.set_listener(listener);
  }

  pub fn knobs(&self) -> &KnobBank {
    &self.parts.knobs
  }

  pub fn output(&self) -> &OutputDriver {
    &self.parts.output
  }

  pub fn input_mode(&self) -> InputMode {
    self.parts.input_mode
  }

  pub fn line_sink(&self) -> LineSink {
    self.parts.line_in.sink()
  }

  /// Samples produced by the synthesizer, zero on a debug boot.
  pub fn synth_ticks(&self) -> u64 {
    self.parts.synth.as_ref().map_or(0, ToneSynth::ticks)
  }

  pub fn status(&self) -> DeviceStatus {
    self.parts.meter.snapshot()
  }

  pub fn status_meter(&self) -> Arc<StatusMeter> {
    self.parts.meter.clone()
  }
}
