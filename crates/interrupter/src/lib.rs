//! Real-time engine of the pulse interrupter.
//!
//! Threads, queues and hardware sequencing around the pure logic in
//! `interrupter_core`: the event bus, the output driver with its low-rate
//! pulse loop, the sample clock driving the tone synthesizer, the line-in
//! gate and the orchestrator that ties them together.

pub mod bus;
pub mod device;
pub mod line_in;
pub mod output;
pub mod pulse_loop;
pub mod sample_clock;
pub mod sim;

pub use bus::{EventBus, EventPublisher};
pub use device::{BootFlags, Device, DeviceStatus, InputMode};
pub use output::{ModulationPort, OutputDriver, OutputHardware};
pub use sample_clock::ToneSynth;
pub use sim::{Fault, HwOp, SimProbe, sim_hardware};
