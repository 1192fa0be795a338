//! Scripted device sessions.
//!
//! A scenario is a JSON document with optional boot flags and a list of
//! steps. Each step is turned into a bus event (or a line-in sample, or a
//! pause), dispatched, and followed by a status snapshot plus the hardware
//! operations it caused.
//!
//! ```json
//! {
//!   "boot": { "trigger_held": false },
//!   "steps": [
//!     { "action": "trigger", "pressed": true },
//!     { "action": "connect", "name": "keys" },
//!     { "action": "note_on", "note": "A3" },
//!     { "action": "wait", "ms": 50 }
//!   ]
//! }
//! ```

use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use anyhow::Context;
use colored::Colorize;
use interrupter::{BootFlags, Device, DeviceStatus, HwOp, SimProbe, sim_hardware};
use interrupter_core::{
    ControlEvent, DeviceConfig, Event, KnobId, LineEvent, NoteMessage, PulsePlan, ToneEvent,
};
use serde::{Deserialize, Serialize};

use crate::{OutputFormat, parse_note};

#[derive(Debug, Clone, Deserialize)]
pub struct Scenario {
    #[serde(default)]
    pub boot: BootFlags,
    pub steps: Vec<Step>,
}

/// A note given by name (`"A3"`) or code (`69`).
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum NoteSpec {
    Code(u8),
    Name(String),
}

impl NoteSpec {
    fn code(&self) -> anyhow::Result<u8> {
        match self {
            NoteSpec::Code(code) => parse_note(&code.to_string()),
            NoteSpec::Name(name) => parse_note(name),
        }
    }
}

fn default_velocity() -> u8 {
    100
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum Step {
    Trigger { pressed: bool },
    Click,
    LongPress,
    Turn { delta: i32 },
    Focus { knob: KnobId },
    Plug,
    Unplug,
    Connect {
        #[serde(default)]
        name: Option<String>,
    },
    Disconnect,
    NoteOn {
        note: NoteSpec,
        #[serde(default = "default_velocity")]
        velocity: u8,
    },
    NoteOff { note: NoteSpec },
    LineSample { value: u16 },
    Wait { ms: u64 },
}

impl Step {
    fn name(&self) -> &'static str {
        match self {
            Step::Trigger { pressed: true } => "trigger pressed",
            Step::Trigger { pressed: false } => "trigger released",
            Step::Click => "click",
            Step::LongPress => "long press",
            Step::Turn { .. } => "turn",
            Step::Focus { .. } => "focus",
            Step::Plug => "plug",
            Step::Unplug => "unplug",
            Step::Connect { .. } => "connect",
            Step::Disconnect => "disconnect",
            Step::NoteOn { .. } => "note on",
            Step::NoteOff { .. } => "note off",
            Step::LineSample { .. } => "line sample",
            Step::Wait { .. } => "wait",
        }
    }

    /// The bus event this step publishes, if any.
    fn event(&self) -> anyhow::Result<Option<Event>> {
        let event = match self {
            Step::Trigger { pressed: true } => ControlEvent::TriggerPressed.event(0),
            Step::Trigger { pressed: false } => ControlEvent::TriggerReleased.event(0),
            Step::Click => ControlEvent::ButtonClicked.event(0),
            Step::LongPress => ControlEvent::ButtonLongPressed.event(0),
            Step::Turn { delta } => ControlEvent::encoder(*delta),
            Step::Focus { knob } => ControlEvent::FocusChanged.event(knob.index() as u32),
            Step::Plug => LineEvent::Plugged.event(0),
            Step::Unplug => LineEvent::Unplugged.event(0),
            Step::Connect { name } => {
                let event = ToneEvent::Connected.event(0);
                match name {
                    Some(name) => event.with_payload(Arc::new(name.clone())),
                    None => event,
                }
            }
            Step::Disconnect => ToneEvent::Disconnected.event(0),
            Step::NoteOn { note, velocity } => NoteMessage::on(note.code()?, *velocity).to_event(),
            Step::NoteOff { note } => NoteMessage::off(note.code()?).to_event(),
            Step::LineSample { .. } | Step::Wait { .. } => return Ok(None),
        };
        Ok(Some(event))
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct StepRecord {
    pub index: usize,
    pub action: &'static str,
    pub status: DeviceStatus,
    pub plan: PulsePlan,
    pub ops: Vec<HwOp>,
    pub error: Option<String>,
}

pub fn load_scenario(path: &Path) -> anyhow::Result<Scenario> {
    let json = fs::read_to_string(path)
        .with_context(|| format!("failed to read scenario {}", path.display()))?;
    serde_json::from_str(&json).with_context(|| format!("bad scenario {}", path.display()))
}

/// Play every step against `device`, recording what happened.
pub fn play(device: &mut Device, probe: &SimProbe, scenario: &Scenario) -> Vec<StepRecord> {
    let mut records = Vec::with_capacity(scenario.steps.len());
    for (index, step) in scenario.steps.iter().enumerate() {
        let error = match apply(device, step) {
            Ok(()) => None,
            Err(err) => Some(format!("{err:#}")),
        };
        records.push(StepRecord {
            index,
            action: step.name(),
            status: device.status(),
            plan: device.output().plan(),
            ops: probe.take_ops(),
            error,
        });
    }
    records
}

fn apply(device: &mut Device, step: &Step) -> anyhow::Result<()> {
    match step {
        Step::Wait { ms } => thread::sleep(Duration::from_millis(*ms)),
        Step::LineSample { value } => {
            device.line_sink().push(*value)?;
        }
        _ => {
            if let Some(event) = step.event()? {
                device.publish(event)?;
                device.dispatch_pending();
            }
        }
    }
    Ok(())
}

pub fn cmd_run(config: &DeviceConfig, path: &Path, format: OutputFormat) -> anyhow::Result<()> {
    let scenario = load_scenario(path)?;
    let (hardware, probe) = sim_hardware();
    let mut device = Device::start(config.clone(), hardware, scenario.boot)?;
    probe.take_ops();

    let records = play(&mut device, &probe, &scenario);
    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&records)?),
        OutputFormat::Table => {
            for record in &records {
                print_record(record);
            }
            println!(
                "{} {} low-rate pulses, {} synth samples",
                "done:".bold(),
                device.output().low_rate_pulses(),
                device.synth_ticks()
            );
        }
    }
    Ok(())
}

fn print_record(record: &StepRecord) {
    let status = &record.status;
    let armed = if status.armed {
        "ARMED".red()
    } else {
        "idle".dimmed()
    };
    println!(
        "{:>3} {:<16} {:<10} {:?}/{:<8} notes={} {}",
        record.index,
        record.action.cyan(),
        status.output_mode.to_string(),
        status.input_mode,
        armed,
        status.active_notes,
        record.plan.to_string().yellow()
    );
    for op in &record.ops {
        println!("      {}", format!("{op:?}").dimmed());
    }
    if let Some(error) = &record.error {
        println!("      {}", error.red());
    }
}
