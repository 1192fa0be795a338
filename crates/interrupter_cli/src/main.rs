//! interrupter-sim: host tools for the pulse interrupter
//!
//! Runs the firmware's engine against simulated hardware:
//!
//! - `couple`: show how a repetition frequency constrains the pulse delay
//!   and which pulse strategy the output would use
//! - `render`: synthesize a chord with the tone engine into a WAV file
//! - `run`: play a JSON scenario of control events against the device

mod scenario;

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, bail};
use clap::{Parser, Subcommand};
use colored::Colorize;
use hound::{WavSpec, WavWriter};
use interrupter_core::dsp::{Note, Pitch, note_registry};
use interrupter_core::{DeviceConfig, KnobBank, KnobId, plan_pulses};

/// Host simulator for the pulse interrupter
#[derive(Parser)]
#[command(name = "interrupter-sim")]
#[command(about = "Simulate the pulse interrupter engine on a host")]
#[command(version)]
struct Cli {
    /// Device configuration (JSON); missing fields keep their defaults
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Output format
    #[arg(long, global = true, default_value = "table")]
    format: OutputFormat,

    /// Increase log verbosity (-v info, -vv debug)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, clap::ValueEnum)]
pub enum OutputFormat {
    Table,
    Json,
}

#[derive(Subcommand)]
enum Commands {
    /// Show the pulse-delay range and pulse strategy for a frequency
    Couple {
        /// Repetition frequency in Hz
        prf: i32,

        /// Requested pulse delay in µs
        #[arg(long, default_value = "100")]
        pd: i32,
    },

    /// Render a chord through the tone synthesizer to a 16-bit WAV file
    Render {
        /// Notes as names ("A3", "C#4", "Bb-1") or codes (0-127)
        #[arg(required = true)]
        notes: Vec<String>,

        /// Output file
        #[arg(short, long, default_value = "chord.wav")]
        output: PathBuf,

        /// Length in seconds
        #[arg(short, long, default_value = "1.0")]
        seconds: f32,
    },

    /// Run a scenario file against the simulated device
    Run {
        /// Scenario (JSON)
        scenario: PathBuf,
    },
}

fn init_tracing(verbose: u8) {
    #[cfg(feature = "profile")]
    {
        use tracing_subscriber::prelude::*;
        let tracy_layer = tracing_tracy::TracyLayer::default();
        tracing_subscriber::registry().with(tracy_layer).init();
        let _ = verbose;
    }

    #[cfg(not(feature = "profile"))]
    {
        use tracing::Level;
        let level = match verbose {
            0 => Level::WARN,
            1 => Level::INFO,
            2 => Level::DEBUG,
            _ => Level::TRACE,
        };
        tracing_subscriber::fmt()
            .with_max_level(level)
            .with_target(false)
            .with_writer(std::io::stderr)
            .init();
    }
}

fn load_config(path: Option<&Path>) -> anyhow::Result<DeviceConfig> {
    let Some(path) = path else {
        return Ok(DeviceConfig::default());
    };
    let json = fs::read_to_string(path)
        .with_context(|| format!("failed to read config {}", path.display()))?;
    DeviceConfig::from_json(&json).with_context(|| format!("bad config {}", path.display()))
}

/// Parse a note name such as `A3`, `c#4` or `Bb-1`, or a raw note code.
pub fn parse_note(text: &str) -> anyhow::Result<u8> {
    if let Ok(code) = text.parse::<u8>() {
        if code > 127 {
            bail!("note code {code} outside 0..=127");
        }
        return Ok(code);
    }
    let split = text
        .find(|c: char| c.is_ascii_digit() || c == '-')
        .with_context(|| format!("note '{text}' has no octave"))?;
    let (name, octave) = text.split_at(split);
    let pitch = Pitch::parse(name).with_context(|| format!("unknown pitch '{name}'"))?;
    let octave: i8 = octave
        .parse()
        .with_context(|| format!("bad octave in '{text}'"))?;
    Ok(Note::new(octave, pitch).code()?)
}

fn cmd_couple(config: &DeviceConfig, prf: i32, pd: i32, format: OutputFormat) -> anyhow::Result<()> {
    let mut knobs = KnobBank::new(config);
    knobs.set(KnobId::PulseDelay, pd);
    knobs.set(KnobId::RepetitionFrequency, prf);

    let prf = knobs.value(KnobId::RepetitionFrequency);
    let pulse_delay = knobs.get(KnobId::PulseDelay);
    let plan = plan_pulses(prf as f32, pulse_delay.value().max(0) as u32)?;

    match format {
        OutputFormat::Json => {
            let report = serde_json::json!({
                "prf": prf,
                "pd": pulse_delay.value(),
                "pd_requested": pulse_delay.user_value(),
                "pd_min": pulse_delay.effective_range().start(),
                "pd_max": pulse_delay.effective_range().end(),
                "plan": plan,
            });
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        OutputFormat::Table => {
            let range = pulse_delay.effective_range();
            println!("{:>14} {} Hz", "prf".cyan(), prf);
            println!(
                "{:>14} {} µs (requested {})",
                "pd".cyan(),
                pulse_delay.value().to_string().yellow(),
                pulse_delay.user_value()
            );
            println!(
                "{:>14} {}..={} µs (toff_min {} µs)",
                "pd range".cyan(),
                range.start(),
                range.end(),
                config.toff_min_us
            );
            println!("{:>14} {}", "strategy".cyan(), plan.to_string().green());
        }
    }
    Ok(())
}

fn cmd_render(
    config: &DeviceConfig,
    notes: &[String],
    output: &Path,
    seconds: f32,
) -> anyhow::Result<()> {
    if !(seconds.is_finite() && seconds > 0.0) {
        bail!("length must be a positive number of seconds");
    }
    let (mut writer, mut mixer) = note_registry(config.sample_rate_hz);
    for text in notes {
        let code = parse_note(text)?;
        writer
            .play_code(code)
            .with_context(|| format!("cannot add {}", Note::from_code(code)))?;
    }

    let spec = WavSpec {
        channels: 1,
        sample_rate: config.sample_rate_hz,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut wav = WavWriter::create(output, spec)
        .with_context(|| format!("failed to create {}", output.display()))?;

    let frames = (seconds * config.sample_rate_hz as f32) as usize;
    for _ in 0..frames {
        let sample = mixer.next_sample() as i32 - 32767;
        wav.write_sample(sample as i16)?;
    }
    wav.finalize()?;

    println!(
        "{} {} notes, {} samples -> {}",
        "rendered".green(),
        writer.active_count(),
        frames,
        output.display()
    );
    Ok(())
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let config = load_config(cli.config.as_deref())?;

    match cli.command {
        Commands::Couple { prf, pd } => cmd_couple(&config, prf, pd, cli.format),
        Commands::Render {
            notes,
            output,
            seconds,
        } => cmd_render(&config, &notes, &output, seconds),
        Commands::Run { scenario } => scenario::cmd_run(&config, &scenario, cli.format),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_note_names_and_codes() {
        assert_eq!(parse_note("A3").unwrap(), 69);
        assert_eq!(parse_note("c#4").unwrap(), 73);
        assert_eq!(parse_note("C-2").unwrap(), 0);
        assert_eq!(parse_note("60").unwrap(), 60);
        assert!(parse_note("200").is_err());
        assert!(parse_note("X3").is_err());
        assert!(parse_note("A").is_err());
    }

    #[test]
    fn config_file_overrides_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("device.json");
        fs::write(&path, r#"{ "toff_min_us": 120 }"#).unwrap();

        let config = load_config(Some(&path)).unwrap();
        assert_eq!(config.toff_min_us, 120);
        assert_eq!(config.sample_rate_hz, DeviceConfig::default().sample_rate_hz);
        assert!(load_config(Some(&dir.path().join("missing.json"))).is_err());
    }

    #[test]
    fn render_writes_a_wav_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("chord.wav");
        let notes = vec!["A3".to_string(), "E4".to_string()];
        cmd_render(&DeviceConfig::default(), &notes, &path, 0.25).unwrap();

        let reader = hound::WavReader::open(&path).unwrap();
        assert_eq!(reader.spec().sample_rate, 16_000);
        assert_eq!(reader.spec().bits_per_sample, 16);
        assert_eq!(reader.len(), 4_000);
    }
}
