//! Hardware seams of the output channel.
//!
//! The engine owns exactly one implementation of each trait. A board build
//! backs them with the pulse peripheral, the duty-cycle timer and the pin
//! matrix; tests and the simulator use a recording backend.

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::types::{Driver, PulseShape};

/// Programmable high/low pulse emitter ticking at [`crate::output::TICK_HZ`].
pub trait PulseGenerator: Send {
    /// Load one pulse item. A looped item free-runs until [`stop`](Self::stop);
    /// otherwise it is emitted once and the line idles low.
    fn write(&mut self, shape: PulseShape, looped: bool) -> Result<()>;

    fn start(&mut self) -> Result<()>;

    /// Halt emission. Returns once the line is low.
    fn stop(&mut self) -> Result<()>;
}

/// Fade parameters applied together with a duty change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Fade {
    pub increment: u32,
    pub steps: u32,
    pub cycle: u32,
    pub scale: u32,
}

impl Fade {
    /// Jump straight to the new duty.
    pub const IMMEDIATE: Fade = Fade {
        increment: 1,
        steps: 1,
        cycle: 1,
        scale: 0,
    };
}

/// Duty-cycle carrier. Written from the sample path, so it takes `&self`
/// and must not block.
pub trait DutyGenerator: Send + Sync {
    fn set_duty(&self, duty: u8, fade: Fade);

    fn stop(&self) -> Result<()>;
}

/// Pin routing: attaches one driver's signal to the output pin.
pub trait OutputPin: Send {
    fn attach(&mut self, driver: Driver) -> Result<()>;
}
