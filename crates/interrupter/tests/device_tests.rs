//! End-to-end behaviour of the orchestrator against simulated hardware.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use interrupter::sim::wait_until;
use interrupter::{BootFlags, Device, Fault, HwOp, InputMode, SimProbe, sim_hardware};
use interrupter_core::{
  ControlEvent, DeviceConfig, Driver, Event, KnobId, KnobMask, KnobValues, LineEvent, NoteMessage,
  OutputMode, PulsePlan, PulseShape, PulseTiming, ToneEvent,
};

fn boot(flags: BootFlags) -> (Device, SimProbe) {
  let (hw, probe) = sim_hardware();
  let device = Device::start(DeviceConfig::default(), hw, flags).unwrap();
  (device, probe)
}

fn send(device: &mut Device, event: Event) {
  device.publish(event).unwrap();
  device.dispatch_pending();
}

fn tone_connect(device: &mut Device) {
  send(
    device,
    ToneEvent::Connected
      .event(0)
      .with_payload(Arc::new(String::from("keys"))),
  );
}

#[test]
fn boot_applies_the_knob_timing_unarmed() {
  let (device, probe) = boot(BootFlags::default());
  assert_eq!(
    device.output().plan(),
    PulsePlan::Looped(PulseShape {
      high: 100,
      low: 9_900
    })
  );
  let status = device.status();
  assert!(!status.armed);
  assert_eq!(status.output_mode, OutputMode::Manual);
  assert_eq!(status.input_mode, InputMode::Manual);
  assert_eq!(probe.attached(), Driver::Gpio);
}

#[test]
fn trigger_arms_and_idles() {
  let (mut device, probe) = boot(BootFlags::default());
  send(&mut device, ControlEvent::TriggerPressed.event(0));
  assert!(device.status().armed);
  assert_eq!(probe.attached(), Driver::Pulse);

  send(&mut device, ControlEvent::TriggerReleased.event(0));
  assert!(!device.status().armed);
  assert_eq!(probe.attached(), Driver::Gpio);
}

#[test]
fn trigger_held_at_boot_must_be_released_first() {
  let (mut device, _) = boot(BootFlags {
    trigger_held: true,
    encoder_held: false,
  });
  send(&mut device, ControlEvent::TriggerPressed.event(0));
  assert!(!device.status().armed);

  send(&mut device, ControlEvent::TriggerReleased.event(0));
  assert!(!device.status().armed);

  send(&mut device, ControlEvent::TriggerPressed.event(0));
  assert!(device.status().armed);
}

#[test]
fn line_in_round_trip() {
  let (mut device, probe) = boot(BootFlags::default());
  let sink = device.line_sink();
  assert!(sink.push(4095).is_err());

  send(&mut device, LineEvent::Plugged.event(0));
  assert_eq!(device.input_mode(), InputMode::LineIn);
  assert_eq!(device.status().output_mode, OutputMode::Modulation);
  assert_eq!(sink.push(4095), Ok(255));
  assert_eq!(probe.duty(), 255);

  probe.take_ops();
  send(&mut device, LineEvent::Unplugged.event(0));
  assert_eq!(device.input_mode(), InputMode::Manual);
  assert_eq!(device.status().output_mode, OutputMode::Manual);
  assert!(sink.push(4095).is_err());
  assert!(probe.ops().contains(&HwOp::DutyStop));
  assert_eq!(
    probe.looped_shape(),
    Some(PulseShape {
      high: 100,
      low: 9_900
    })
  );
}

#[test]
fn tone_input_drives_the_duty_output() {
  let (mut device, probe) = boot(BootFlags::default());
  tone_connect(&mut device);
  assert_eq!(device.input_mode(), InputMode::Tone);
  assert_eq!(device.status().output_mode, OutputMode::Modulation);

  send(&mut device, NoteMessage::on(69, 100).to_event());
  send(&mut device, NoteMessage::on(76, 100).to_event());
  assert_eq!(device.status().active_notes, 2);
  assert!(wait_until(Duration::from_secs(2), || probe.duty_writes() > 200));

  // Velocity zero releases like a note-off.
  send(&mut device, NoteMessage::on(76, 0).to_event());
  send(&mut device, NoteMessage::off(69).to_event());
  assert_eq!(device.status().active_notes, 0);

  send(&mut device, NoteMessage::on(60, 90).to_event());
  send(&mut device, ToneEvent::Disconnected.event(0));
  let status = device.status();
  assert_eq!(status.input_mode, InputMode::Manual);
  assert_eq!(status.output_mode, OutputMode::Manual);
  assert_eq!(status.active_notes, 0);
  assert_eq!(probe.duty(), 0);

  let (ticks, writes) = (device.synth_ticks(), probe.duty_writes());
  thread::sleep(Duration::from_millis(50));
  assert_eq!(device.synth_ticks(), ticks);
  assert_eq!(probe.duty_writes(), writes);
  assert_eq!(probe.duty(), 0);
}

#[test]
fn refused_plug_stops_listening() {
  let (mut device, probe) = boot(BootFlags::default());
  let sink = device.line_sink();
  probe.fail_next(Fault::PulseStop);

  send(&mut device, LineEvent::Plugged.event(0));
  let status = device.status();
  assert_eq!(status.input_mode, InputMode::Manual);
  assert_eq!(status.output_mode, OutputMode::Manual);
  assert!(sink.push(4095).is_err());

  send(&mut device, LineEvent::Plugged.event(0));
  assert_eq!(device.input_mode(), InputMode::LineIn);
}

#[test]
fn refused_unplug_stays_on_line_in() {
  let (mut device, probe) = boot(BootFlags::default());
  let sink = device.line_sink();
  send(&mut device, LineEvent::Plugged.event(0));
  probe.fail_next(Fault::DutyStop);

  send(&mut device, LineEvent::Unplugged.event(0));
  let status = device.status();
  assert_eq!(status.input_mode, InputMode::LineIn);
  assert_eq!(status.output_mode, OutputMode::Modulation);
  assert_eq!(sink.push(2048), Ok(127));

  send(&mut device, LineEvent::Unplugged.event(0));
  assert_eq!(device.status().input_mode, InputMode::Manual);
  assert!(sink.push(2048).is_err());
}

#[test]
fn refused_disconnect_keeps_the_synthesizer_running() {
  let (mut device, probe) = boot(BootFlags::default());
  tone_connect(&mut device);
  probe.fail_next(Fault::DutyStop);

  send(&mut device, ToneEvent::Disconnected.event(0));
  let status = device.status();
  assert_eq!(status.input_mode, InputMode::Tone);
  assert_eq!(status.output_mode, OutputMode::Modulation);
  let ticks = device.synth_ticks();
  assert!(wait_until(Duration::from_secs(2), || device.synth_ticks() > ticks));

  send(&mut device, ToneEvent::Disconnected.event(0));
  assert_eq!(device.status().input_mode, InputMode::Manual);
}

#[test]
fn debug_boot_refuses_tone_input() {
  let (mut device, _) = boot(BootFlags {
    trigger_held: false,
    encoder_held: true,
  });
  tone_connect(&mut device);
  assert_eq!(device.input_mode(), InputMode::Manual);
  assert_eq!(device.status().output_mode, OutputMode::Manual);
  assert_eq!(device.synth_ticks(), 0);
}

#[test]
fn inputs_do_not_preempt_each_other() {
  let (mut device, _) = boot(BootFlags::default());
  tone_connect(&mut device);
  send(&mut device, LineEvent::Plugged.event(0));
  assert_eq!(device.input_mode(), InputMode::Tone);
  send(&mut device, LineEvent::Unplugged.event(0));
  assert_eq!(device.input_mode(), InputMode::Tone);

  send(&mut device, ToneEvent::Disconnected.event(0));
  send(&mut device, LineEvent::Plugged.event(0));
  assert_eq!(device.input_mode(), InputMode::LineIn);
  tone_connect(&mut device);
  assert_eq!(device.input_mode(), InputMode::LineIn);
}

#[test]
fn knob_edits_reprogram_the_output() {
  let (mut device, probe) = boot(BootFlags::default());

  // Pulse delay, coarse step, +9 detents.
  send(&mut device, ControlEvent::ButtonClicked.event(0));
  send(&mut device, ControlEvent::ButtonLongPressed.event(0));
  send(&mut device, ControlEvent::encoder(9));
  assert_eq!(device.knobs().value(KnobId::PulseDelay), 190);
  assert_eq!(
    probe.looped_shape(),
    Some(PulseShape {
      high: 190,
      low: 9_810
    })
  );

  // Frequency, fine step, down to 10 Hz: long periods go to the loop.
  send(&mut device, ControlEvent::ButtonClicked.event(0));
  send(&mut device, ControlEvent::encoder(1));
  send(&mut device, ControlEvent::ButtonClicked.event(0));
  send(&mut device, ControlEvent::encoder(-90));
  assert_eq!(device.knobs().value(KnobId::RepetitionFrequency), 10);
  assert_eq!(
    device.output().plan(),
    PulsePlan::Retriggered(PulseTiming::new(100_000, 190))
  );
  assert!(wait_until(Duration::from_secs(2), || probe.single_pulses() >= 1));
}

#[test]
fn knob_edits_while_modulating_leave_the_output_alone() {
  let (mut device, probe) = boot(BootFlags::default());
  send(&mut device, LineEvent::Plugged.event(0));
  probe.take_ops();

  send(&mut device, ControlEvent::ButtonClicked.event(0));
  send(&mut device, ControlEvent::encoder(50));
  assert_eq!(device.knobs().value(KnobId::PulseDelay), 150);
  assert!(probe.ops().is_empty());

  send(&mut device, LineEvent::Unplugged.event(0));
  assert_eq!(
    probe.looped_shape(),
    Some(PulseShape {
      high: 150,
      low: 9_850
    })
  );
}

#[test]
fn knob_listener_sees_coupled_changes() {
  let (mut device, _) = boot(BootFlags::default());
  let seen = Arc::new(Mutex::new(Vec::new()));
  let sink = seen.clone();
  device.on_knob_change(Box::new(move |mask: KnobMask, values: &KnobValues| {
    sink.lock().unwrap().push((mask, *values));
  }));

  send(&mut device, ControlEvent::FocusChanged.event(KnobId::RepetitionFrequency.index() as u32));
  send(&mut device, ControlEvent::ButtonClicked.event(0));
  send(&mut device, ControlEvent::encoder(1));

  let seen = seen.lock().unwrap();
  assert_eq!(seen.len(), 1);
  let (mask, values) = seen[0];
  assert!(mask.contains(KnobId::RepetitionFrequency));
  assert!(mask.contains(KnobId::PulseDelay));
  assert_eq!(values[KnobId::RepetitionFrequency.index()], 101);
}

#[test]
fn invalid_configuration_fails_startup() {
  let (hw, _) = sim_hardware();
  let config = DeviceConfig {
    sample_rate_hz: 0,
    ..DeviceConfig::default()
  };
  let err = Device::start(config, hw, BootFlags::default())
    .err()
    .unwrap();
  assert!(format!("{err:#}").contains("sample rate"));
}

#[test]
fn run_dispatches_until_shutdown() {
  let (mut device, _) = boot(BootFlags::default());
  let publisher = device.publisher();
  let shutdown = AtomicBool::new(false);

  thread::scope(|scope| {
    scope.spawn(|| {
      publisher
        .publish(ControlEvent::TriggerPressed.event(0))
        .unwrap();
      thread::sleep(Duration::from_millis(50));
      shutdown.store(true, Ordering::Release);
    });
    device.run(&shutdown, Duration::from_millis(5));
  });

  assert!(device.status().armed);
}

#[test]
fn boot_flags_deserialize_with_defaults() {
  let flags: BootFlags = serde_json::from_str(r#"{ "encoder_held": true }"#).unwrap();
  assert_eq!(
    flags,
    BootFlags {
      trigger_held: false,
      encoder_held: true
    }
  );
}
