use std::f64::consts::PI;

/// Entries in the wavetable; the phase accumulator's top byte indexes it.
pub const TABLE_SIZE: usize = 256;

lazy_static! {
    /// One full sine period as signed 16-bit samples.
    pub static ref SINE_TABLE: [i16; TABLE_SIZE] = {
        let mut table = [0i16; TABLE_SIZE];
        for (i, entry) in table.iter_mut().enumerate() {
            let phase = 2.0 * PI * i as f64 / TABLE_SIZE as f64;
            *entry = (phase.sin() * 32767.0) as i16;
        }
        table
    };
}
