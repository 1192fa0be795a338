//! Phase-accumulator tone synthesis.
//!
//! The active-note registry is split into a [`NoteWriter`] (task side, note
//! on/off) and a [`Mixer`] (sample-clock side). They share a fixed array of
//! slots made of single-word atomics, so the mixer never blocks and never
//! observes a half-written note: a slot's code and increment are stored
//! before its `active` flag is released.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU8, AtomicU32, Ordering};

use tracing::warn;

use super::note::{Note, code_frequency};
use super::tables::SINE_TABLE;
use crate::config::MAX_CHORD;
use crate::error::{Error, Resource, Result};

/// Output value when no note is sounding (mid-scale of the unsigned range).
pub const SILENCE: u16 = 32767;

const PHASE_SCALE: f64 = 4_294_967_296.0;
const INDEX_SHIFT: u32 = 24;

/// Per-sample phase increment of a 32-bit accumulator.
pub fn phase_increment(frequency: f64, sample_rate: u32) -> u32 {
    (frequency / sample_rate as f64 * PHASE_SCALE + 0.5) as u32
}

#[derive(Default)]
struct Slot {
    code: AtomicU8,
    phase_inc: AtomicU32,
    active: AtomicBool,
    /// Bumped on every start so the mixer restarts the phase at zero.
    generation: AtomicU32,
}

pub struct NoteRegistry {
    slots: [Slot; MAX_CHORD],
    count: AtomicU8,
    sample_rate: u32,
}

impl NoteRegistry {
    fn new(sample_rate: u32) -> Self {
        Self {
            slots: Default::default(),
            count: AtomicU8::new(0),
            sample_rate,
        }
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn active_count(&self) -> usize {
        self.count.load(Ordering::Acquire) as usize
    }
}

/// Create an empty registry and its two ends.
pub fn note_registry(sample_rate: u32) -> (NoteWriter, Mixer) {
    let registry = Arc::new(NoteRegistry::new(sample_rate));
    (NoteWriter::new(registry.clone()), Mixer::new(registry))
}

/// Task-side handle that starts and stops notes. There is exactly one.
pub struct NoteWriter {
    registry: Arc<NoteRegistry>,
}

impl NoteWriter {
    fn new(registry: Arc<NoteRegistry>) -> Self {
        Self { registry }
    }

    pub fn play(&mut self, note: Note) -> Result<usize> {
        self.play_code(note.code()?)
    }

    /// Occupy the first free slot with `code`. Returns the slot index.
    pub fn play_code(&mut self, code: u8) -> Result<usize> {
        if code > 127 {
            return Err(Error::InvalidArgument("note code outside 0..=127"));
        }
        if self.active_count() >= MAX_CHORD {
            warn!("Not enough space for note {}", Note::from_code(code));
            return Err(Error::Capacity(Resource::ActiveNotes));
        }
        let free = self
            .registry
            .slots
            .iter()
            .position(|slot| !slot.active.load(Ordering::Acquire));
        let Some(index) = free else {
            warn!("Not enough space for note {}", Note::from_code(code));
            return Err(Error::Capacity(Resource::ActiveNotes));
        };

        let slot = &self.registry.slots[index];
        let inc = phase_increment(code_frequency(code), self.registry.sample_rate);
        slot.code.store(code, Ordering::Relaxed);
        slot.phase_inc.store(inc, Ordering::Relaxed);
        slot.generation.fetch_add(1, Ordering::Relaxed);
        slot.active.store(true, Ordering::Release);
        self.registry.count.fetch_add(1, Ordering::AcqRel);
        Ok(index)
    }

    pub fn stop(&mut self, note: Note) -> Result<Option<usize>> {
        self.stop_code(note.code()?)
    }

    /// Deactivate the first active slot holding `code`.
    ///
    /// Fails when nothing is active; an unknown code is not an error and
    /// yields `Ok(None)`.
    pub fn stop_code(&mut self, code: u8) -> Result<Option<usize>> {
        if self.active_count() == 0 {
            return Err(Error::InvalidState("no active notes"));
        }
        let found = self.registry.slots.iter().position(|slot| {
            slot.active.load(Ordering::Acquire) && slot.code.load(Ordering::Relaxed) == code
        });
        if let Some(index) = found {
            self.registry.slots[index]
                .active
                .store(false, Ordering::Release);
            self.registry.count.fetch_sub(1, Ordering::AcqRel);
        }
        Ok(found)
    }

    /// Silence every slot.
    pub fn release_all(&mut self) {
        for slot in &self.registry.slots {
            if slot.active.swap(false, Ordering::AcqRel) {
                self.registry.count.fetch_sub(1, Ordering::AcqRel);
            }
        }
    }

    pub fn active_count(&self) -> usize {
        self.registry.active_count()
    }

    pub fn is_active(&self, slot: usize) -> bool {
        self.registry
            .slots
            .get(slot)
            .is_some_and(|slot| slot.active.load(Ordering::Acquire))
    }

    pub fn sample_rate(&self) -> u32 {
        self.registry.sample_rate
    }
}

/// Sample-clock side of the registry. Owns the phase accumulators.
pub struct Mixer {
    registry: Arc<NoteRegistry>,
    phases: [u32; MAX_CHORD],
    seen: [u32; MAX_CHORD],
}

impl Mixer {
    fn new(registry: Arc<NoteRegistry>) -> Self {
        // Build the table here so the first clock tick never does.
        lazy_static::initialize(&SINE_TABLE);
        Self {
            registry,
            phases: [0; MAX_CHORD],
            seen: [0; MAX_CHORD],
        }
    }

    /// One mixing step. Bounded, lock-free and allocation-free.
    pub fn next_sample(&mut self) -> u16 {
        profiling::scope!("dds_mix");
        let mut sum: i32 = 0;
        let mut voices: i32 = 0;

        for (i, slot) in self.registry.slots.iter().enumerate() {
            if !slot.active.load(Ordering::Acquire) {
                continue;
            }
            let generation = slot.generation.load(Ordering::Relaxed);
            if generation != self.seen[i] {
                self.seen[i] = generation;
                self.phases[i] = 0;
            }
            let phase = self.phases[i].wrapping_add(slot.phase_inc.load(Ordering::Relaxed));
            self.phases[i] = phase;
            sum += SINE_TABLE[(phase >> INDEX_SHIFT) as usize] as i32;
            voices += 1;
        }

        if voices == 0 {
            return SILENCE;
        }
        let mixed = (sum / voices).clamp(-32767, 32767);
        (mixed + 32767) as u16
    }

    pub fn fill(&mut self, out: &mut [u16]) {
        for sample in out {
            *sample = self.next_sample();
        }
    }

    pub fn sample_rate(&self) -> u32 {
        self.registry.sample_rate
    }
}
