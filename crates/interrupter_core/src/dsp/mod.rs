pub mod dds;
pub mod note;
pub mod tables;
pub mod utils;

pub use dds::{Mixer, NoteRegistry, NoteWriter, SILENCE, note_registry, phase_increment};
pub use note::{Note, Pitch};
