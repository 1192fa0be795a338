/// Rescale `value` from `0..=full_scale` to an 8-bit duty level.
///
/// Values above `full_scale` saturate at 255. A zero full scale maps
/// everything to 0.
pub fn scale_to_duty(value: u32, full_scale: u32) -> u8 {
    if full_scale == 0 {
        return 0;
    }
    let value = value.min(full_scale) as u64;
    (value * 255 / full_scale as u64) as u8
}

/// Full scale of the 12-bit line-in converter.
pub const LINE_IN_FULL_SCALE: u32 = 4095;

/// Full scale of the synthesizer's unsigned 16-bit output.
pub const SYNTH_FULL_SCALE: u32 = 65535;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn line_in_scaling() {
        assert_eq!(scale_to_duty(0, LINE_IN_FULL_SCALE), 0);
        assert_eq!(scale_to_duty(2048, LINE_IN_FULL_SCALE), 127);
        assert_eq!(scale_to_duty(4095, LINE_IN_FULL_SCALE), 255);
        assert_eq!(scale_to_duty(9000, LINE_IN_FULL_SCALE), 255);
    }

    #[test]
    fn synth_silence_is_mid_scale() {
        assert_eq!(scale_to_duty(32767, SYNTH_FULL_SCALE), 127);
    }

    #[test]
    fn zero_full_scale() {
        assert_eq!(scale_to_duty(10, 0), 0);
    }
}
