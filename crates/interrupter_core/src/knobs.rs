//! Calibrated control values and the pulse-delay / repetition-frequency coupling.
//!
//! Every knob keeps a fixed physical range and a dynamic effective range
//! inside it. Values are always clamped into the effective range, never
//! rejected. The pulse-delay knob's effective maximum follows the repetition
//! frequency so that each period keeps at least `toff_min` of off-time.
//!
//! The knob the user actually asked for is remembered separately
//! (`user_value`), so narrowing and then widening the range restores it.

use std::fmt;
use std::ops::RangeInclusive;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::{DeviceConfig, KnobRange};
use crate::types::{ControlEvent, Event};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum KnobId {
    PulseDelay = 0,
    RepetitionFrequency = 1,
    Power = 2,
    Gain = 3,
}

impl KnobId {
    pub const COUNT: usize = 4;
    pub const ALL: [KnobId; Self::COUNT] = [
        KnobId::PulseDelay,
        KnobId::RepetitionFrequency,
        KnobId::Power,
        KnobId::Gain,
    ];

    pub fn index(self) -> usize {
        self as usize
    }

    pub fn from_index(index: usize) -> Option<Self> {
        Self::ALL.get(index).copied()
    }

    pub fn name(self) -> &'static str {
        match self {
            KnobId::PulseDelay => "pd",
            KnobId::RepetitionFrequency => "prf",
            KnobId::Power => "pwr",
            KnobId::Gain => "gdb",
        }
    }
}

impl fmt::Display for KnobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Bit set of knob ids.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct KnobMask(u8);

impl KnobMask {
    pub const EMPTY: KnobMask = KnobMask(0);

    pub fn of(id: KnobId) -> Self {
        KnobMask(1 << id.index())
    }

    pub fn with(mut self, id: KnobId) -> Self {
        self.insert(id);
        self
    }

    pub fn insert(&mut self, id: KnobId) {
        self.0 |= 1 << id.index();
    }

    pub fn contains(self, id: KnobId) -> bool {
        self.0 & (1 << id.index()) != 0
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    pub fn bits(self) -> u8 {
        self.0
    }

    pub fn iter(self) -> impl Iterator<Item = KnobId> {
        KnobId::ALL.into_iter().filter(move |id| self.contains(*id))
    }
}

/// Current value of every knob, indexed by [`KnobId::index`].
pub type KnobValues = [i32; KnobId::COUNT];

/// Called after user-driven changes with the set of knobs that moved.
pub type KnobListener = Box<dyn FnMut(KnobMask, &KnobValues) + Send>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Knob {
    id: KnobId,
    value: i32,
    user_value: i32,
    min_physical: i32,
    max_physical: i32,
    min_effective: i32,
    max_effective: i32,
    steps: [u16; 2],
}

impl Knob {
    fn new(id: KnobId, range: &KnobRange) -> Self {
        Self {
            id,
            value: range.default,
            user_value: range.default,
            min_physical: range.min,
            max_physical: range.max,
            min_effective: range.min,
            max_effective: range.max,
            steps: range.steps,
        }
    }

    pub fn id(&self) -> KnobId {
        self.id
    }

    pub fn value(&self) -> i32 {
        self.value
    }

    /// Last value set by a user edit.
    pub fn user_value(&self) -> i32 {
        self.user_value
    }

    pub fn physical_range(&self) -> RangeInclusive<i32> {
        self.min_physical..=self.max_physical
    }

    pub fn effective_range(&self) -> RangeInclusive<i32> {
        self.min_effective..=self.max_effective
    }

    pub fn steps(&self) -> [u16; 2] {
        self.steps
    }
}

pub struct KnobBank {
    knobs: [Knob; KnobId::COUNT],
    toff_min: i32,
    focused: KnobId,
    editing: bool,
    step_index: usize,
    listener: Option<KnobListener>,
}

impl KnobBank {
    pub fn new(config: &DeviceConfig) -> Self {
        let mut bank = Self {
            knobs: [
                Knob::new(KnobId::PulseDelay, &config.pulse_delay),
                Knob::new(KnobId::RepetitionFrequency, &config.repetition_frequency),
                Knob::new(KnobId::Power, &config.power),
                Knob::new(KnobId::Gain, &config.gain),
            ],
            toff_min: config.toff_min_us,
            focused: KnobId::PulseDelay,
            editing: false,
            step_index: 0,
            listener: None,
        };
        bank.recompute_dependency();
        bank
    }

    /// Register the knob-changed callback, replacing any previous one.
    pub fn set_listener(&mut self, listener: KnobListener) {
        self.listener = Some(listener);
    }

    pub fn get(&self, id: KnobId) -> &Knob {
        &self.knobs[id.index()]
    }

    pub fn value(&self, id: KnobId) -> i32 {
        self.knobs[id.index()].value
    }

    pub fn values(&self) -> KnobValues {
        let mut values = [0; KnobId::COUNT];
        for knob in &self.knobs {
            values[knob.id.index()] = knob.value;
        }
        values
    }

    /// Clamp `raw` into the knob's effective range and store it.
    ///
    /// Only user edits overwrite the remembered user value. Returns the value
    /// actually stored.
    pub fn update(&mut self, id: KnobId, raw: i32, user_edit: bool) -> i32 {
        let knob = &mut self.knobs[id.index()];
        knob.max_effective = knob.max_effective.min(knob.max_physical);
        knob.min_effective = knob.min_effective.max(knob.min_physical);

        let value = raw.clamp(knob.min_effective, knob.max_effective);
        if user_edit {
            knob.user_value = value;
        }
        knob.value = value;
        value
    }

    /// Narrow or widen the pulse-delay range to the current repetition
    /// frequency, then re-apply the user's pulse delay.
    pub fn recompute_dependency(&mut self) {
        let prf = self.knobs[KnobId::RepetitionFrequency.index()].value;
        let pd = &mut self.knobs[KnobId::PulseDelay.index()];

        let pd_max_allowed = if prf > 0 {
            1_000_000 / prf as i64 - self.toff_min as i64
        } else {
            pd.max_physical as i64
        };
        pd.max_effective = pd_max_allowed
            .max(pd.min_effective as i64)
            .min(pd.max_physical as i64) as i32;

        let target = pd.user_value;
        self.update(KnobId::PulseDelay, target, false);
    }

    /// User edit of one knob. Returns the set of knobs whose value may have
    /// changed and notifies the listener.
    pub fn set(&mut self, id: KnobId, raw: i32) -> KnobMask {
        self.update(id, raw, true);
        let mut mask = KnobMask::of(id);

        if id == KnobId::RepetitionFrequency {
            self.recompute_dependency();
            mask.insert(KnobId::PulseDelay);
        }

        debug!("values updated (knob mask={:#06b})", mask.bits());
        self.notify(mask);
        mask
    }

    /// Move a knob by `ticks` encoder detents of its currently selected step.
    pub fn nudge(&mut self, id: KnobId, ticks: i32) -> KnobMask {
        let step = self.knobs[id.index()].steps[self.step_index] as i64;
        let raw = self.value(id) as i64 + ticks as i64 * step;
        let raw = raw.clamp(i32::MIN as i64, i32::MAX as i64) as i32;
        self.set(id, raw)
    }

    pub fn focused(&self) -> KnobId {
        self.focused
    }

    pub fn is_editing(&self) -> bool {
        self.editing
    }

    /// Focus a knob; the step resets to the finest one.
    pub fn focus(&mut self, id: KnobId) {
        self.focused = id;
        self.step_index = 0;
    }

    /// Enter or leave edit mode on the focused knob.
    pub fn toggle_edit(&mut self) -> bool {
        self.editing = !self.editing;
        self.editing
    }

    /// Toggle between the fine and coarse step while editing.
    pub fn cycle_step(&mut self) {
        if self.editing {
            self.step_index ^= 1;
        }
    }

    pub fn step_index(&self) -> usize {
        self.step_index
    }

    /// Per-detent delta applied to the focused knob.
    pub fn current_step(&self) -> u16 {
        self.knobs[self.focused.index()].steps[self.step_index]
    }

    /// Encoder rotation: edits the focused knob while editing, otherwise
    /// walks the focus (wrapping).
    pub fn rotate(&mut self, delta: i32) -> KnobMask {
        if self.editing {
            return self.nudge(self.focused, delta);
        }
        let next = (self.focused.index() as i64 + delta as i64).rem_euclid(KnobId::COUNT as i64);
        if let Some(id) = KnobId::from_index(next as usize) {
            self.focus(id);
        }
        KnobMask::EMPTY
    }

    /// Apply a decoded control event. Returns the knobs that changed.
    pub fn handle_control(&mut self, event: &Event) -> KnobMask {
        match ControlEvent::of(event) {
            Some(ControlEvent::ButtonClicked) => {
                self.toggle_edit();
                KnobMask::EMPTY
            }
            Some(ControlEvent::ButtonLongPressed) => {
                self.cycle_step();
                KnobMask::EMPTY
            }
            Some(ControlEvent::EncoderChanged) => self.rotate(event.signed_value()),
            Some(ControlEvent::FocusChanged) => {
                if let Some(id) = KnobId::from_index(event.value as usize) {
                    self.focus(id);
                }
                KnobMask::EMPTY
            }
            _ => KnobMask::EMPTY,
        }
    }

    fn notify(&mut self, mask: KnobMask) {
        let values = self.values();
        if let Some(listener) = self.listener.as_mut() {
            listener(mask, &values);
        }
    }
}
