//! Raw PCM frame handling.
//!
//! The host media layer delivers call audio as little-endian linear16 byte
//! frames at a fixed cadence (typically 20 ms). This module converts between
//! that wire representation and the `i16` sample slices the rest of the crate
//! works with.
//!
//! A frame with an odd byte count is truncated to the last whole sample
//! rather than rejected — the media layer occasionally delivers short reads
//! at stream boundaries and the stream must keep flowing.

pub mod resample;

/// Decode little-endian linear16 bytes into samples.
///
/// A trailing odd byte is dropped silently.
pub fn bytes_to_samples(bytes: &[u8]) -> Vec<i16> {
    bytes
        .chunks_exact(2)
        .map(|pair| i16::from_le_bytes([pair[0], pair[1]]))
        .collect()
}

/// Encode samples as little-endian linear16 bytes.
pub fn samples_to_bytes(samples: &[i16]) -> Vec<u8> {
    let mut out = Vec::with_capacity(samples.len() * 2);
    for sample in samples {
        out.extend_from_slice(&sample.to_le_bytes());
    }
    out
}

/// Normalise a linear16 sample into [-1.0, 1.0).
pub(crate) fn sample_to_f32(sample: i16) -> f32 {
    sample as f32 / 32768.0
}

/// Quantise a normalised sample back to linear16, saturating at full scale.
pub(crate) fn f32_to_sample(value: f32) -> i16 {
    (value * 32768.0)
        .round()
        .clamp(i16::MIN as f32, i16::MAX as f32) as i16
}
