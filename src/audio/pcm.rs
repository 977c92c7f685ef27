//! PCM16 <-> normalized float conversion
//!
//! Encoding scales by 32767 so that +1.0 maps to `i16::MAX`; decoding divides
//! by 32768 so that `i16::MIN` maps to exactly -1.0. Bytes are little-endian.

/// Scale applied when encoding a float to PCM16
pub const ENCODE_SCALE: f32 = 32767.0;

/// Divisor applied when decoding PCM16 to float
pub const DECODE_SCALE: f32 = 32768.0;

/// Bytes per PCM16 sample
pub const BYTES_PER_SAMPLE: usize = 2;

/// Encode one normalized sample, clamping to [-1.0, 1.0]
#[inline]
pub fn encode_sample(sample: f32) -> i16 {
    // NaN clamps to NaN, which `as` saturates to 0
    let clamped = sample.clamp(-1.0, 1.0);
    (clamped * ENCODE_SCALE).round() as i16
}

/// Decode one PCM16 sample to a normalized float
#[inline]
pub fn decode_sample(sample: i16) -> f32 {
    sample as f32 / DECODE_SCALE
}

/// Encode samples into `out` as little-endian PCM16
///
/// Returns the number of samples written; stops when `out` runs out of
/// room for a whole sample.
pub fn encode_into(samples: &[f32], out: &mut [u8]) -> usize {
    let mut written = 0;
    for (&sample, dest) in samples.iter().zip(out.chunks_exact_mut(BYTES_PER_SAMPLE)) {
        dest.copy_from_slice(&encode_sample(sample).to_le_bytes());
        written += 1;
    }
    written
}

/// Decode little-endian PCM16 bytes into `out`
///
/// Returns the number of samples written. A trailing odd byte is ignored.
pub fn decode_into(bytes: &[u8], out: &mut [f32]) -> usize {
    let mut written = 0;
    for (pair, dest) in bytes.chunks_exact(BYTES_PER_SAMPLE).zip(out.iter_mut()) {
        *dest = decode_sample(i16::from_le_bytes([pair[0], pair[1]]));
        written += 1;
    }
    written
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn test_round_trip_within_quantization_error() {
        // The asymmetric scales contribute up to |s|/32768 on top of rounding
        let tolerance = 1.5 / DECODE_SCALE + f32::EPSILON;
        for i in -1000..=1000 {
            let s = i as f32 / 1000.0;
            let decoded = decode_sample(encode_sample(s));
            assert_abs_diff_eq!(decoded, s, epsilon = tolerance);
        }
    }

    #[test]
    fn test_out_of_range_clamps() {
        assert_eq!(encode_sample(2.0), i16::MAX);
        assert_eq!(encode_sample(-5.0), -i16::MAX);
        assert_eq!(encode_sample(2.0), encode_sample(1.0));
        assert_eq!(encode_sample(-5.0), encode_sample(-1.0));
    }

    #[test]
    fn test_nan_encodes_silence() {
        assert_eq!(encode_sample(f32::NAN), 0);
    }

    #[test]
    fn test_decode_extremes() {
        assert_eq!(decode_sample(i16::MIN), -1.0);
        assert_eq!(decode_sample(0), 0.0);
        assert!(decode_sample(i16::MAX) < 1.0);
    }

    #[test]
    fn test_little_endian_layout() {
        let mut bytes = [0u8; 4];
        assert_eq!(encode_into(&[1.0, -1.0], &mut bytes), 2);
        assert_eq!(bytes, [0xff, 0x7f, 0x01, 0x80]);

        let mut floats = [0.0f32; 2];
        assert_eq!(decode_into(&bytes, &mut floats), 2);
        assert_abs_diff_eq!(floats[0], 32767.0 / 32768.0);
        assert_abs_diff_eq!(floats[1], -32767.0 / 32768.0);
    }

    #[test]
    fn test_encode_stops_at_short_output() {
        let mut bytes = [0u8; 3];
        assert_eq!(encode_into(&[0.5, 0.5], &mut bytes), 1);
    }
}
