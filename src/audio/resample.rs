//! Sample-rate conversion using a rubato `FastFixedIn` resampler.
//!
//! ## Design
//!
//! Telephony call legs commonly carry 8 kHz linear16 audio. The transcription
//! backend expects 16 kHz. `SampleRateConverter` bridges that gap on the
//! media thread, where each 20 ms frame is converted before it is queued for
//! the session worker.
//!
//! When input rate == output rate, the converter is a zero-copy passthrough —
//! no rubato session is created at all.
//!
//! The converter is stateful: rubato's filter history is preserved across
//! calls so that sequential frames resample continuously without seams at
//! frame boundaries. Identical input sequences fed to a fresh converter
//! produce identical output sequences.

use rubato::{FastFixedIn, PolynomialDegree, Resampler};
use tracing::error;

use crate::audio::{f32_to_sample, sample_to_f32};
use crate::error::{CallstreamError, Result};

/// Converts mono linear16 audio from one fixed sample rate to another.
pub struct SampleRateConverter {
    /// `None` when input rate == output rate (passthrough mode).
    resampler: Option<FastFixedIn<f32>>,
    /// Accumulation buffer — holds partial input chunks between calls.
    input_buf: Vec<f32>,
    /// How many input samples rubato expects per process call (20 ms).
    chunk_size: usize,
    /// Pre-allocated output buffer: `[1][output_frames_max]`.
    output_buf: Vec<Vec<f32>>,
}

impl SampleRateConverter {
    /// Create a new converter for the given rate pair.
    ///
    /// The internal chunk size is 20 ms of input (`input_rate / 50`), the
    /// cadence at which the media layer delivers frames.
    ///
    /// # Errors
    /// Returns `CallstreamError::ResamplerInit` when either rate is zero or
    /// rubato rejects the rate pair.
    pub fn new(input_rate: u32, output_rate: u32) -> Result<Self> {
        if input_rate == 0 || output_rate == 0 {
            return Err(CallstreamError::ResamplerInit(format!(
                "invalid rate pair: {input_rate} -> {output_rate}"
            )));
        }

        let chunk_size = (input_rate / 50).max(1) as usize;

        if input_rate == output_rate {
            return Ok(Self {
                resampler: None,
                input_buf: Vec::new(),
                chunk_size,
                output_buf: Vec::new(),
            });
        }

        let ratio = output_rate as f64 / input_rate as f64;

        let resampler = FastFixedIn::<f32>::new(
            ratio,
            1.0, // fixed ratio — no dynamic adjustment
            PolynomialDegree::Cubic,
            chunk_size,
            1, // mono
        )
        .map_err(|e| CallstreamError::ResamplerInit(format!("rubato init: {e}")))?;

        let max_out = resampler.output_frames_max();
        let output_buf = vec![vec![0f32; max_out]; 1];

        tracing::info!(
            input_rate,
            output_rate,
            chunk_size,
            max_out,
            "resampling enabled"
        );

        Ok(Self {
            resampler: Some(resampler),
            input_buf: Vec::new(),
            chunk_size,
            output_buf,
        })
    }

    /// Process incoming samples, returning resampled output (may be empty).
    ///
    /// Samples are accumulated internally until a full chunk is available
    /// for rubato. Any remainder is kept for the next call.
    ///
    /// In passthrough mode (same rates), input is returned directly.
    pub fn process(&mut self, samples: &[i16]) -> Vec<i16> {
        let Some(ref mut resampler) = self.resampler else {
            return samples.to_vec();
        };

        self.input_buf.extend(samples.iter().map(|&s| sample_to_f32(s)));

        let mut result = Vec::new();

        while self.input_buf.len() >= self.chunk_size {
            let input_slice = &self.input_buf[..self.chunk_size];

            match resampler.process_into_buffer(&[input_slice], &mut self.output_buf, None) {
                Ok((_consumed, produced)) => {
                    result.extend(self.output_buf[0][..produced].iter().map(|&v| f32_to_sample(v)));
                }
                Err(e) => {
                    error!("resampler process error: {e}");
                }
            }

            self.input_buf.drain(..self.chunk_size);
        }

        result
    }

    /// Emit the residual accumulation, padded with silence to a chunk
    /// boundary. Called once at session teardown so sub-chunk audio is not
    /// lost; the converter keeps working afterwards.
    pub fn flush(&mut self) -> Vec<i16> {
        let Some(ref mut resampler) = self.resampler else {
            return Vec::new();
        };
        if self.input_buf.is_empty() {
            return Vec::new();
        }

        self.input_buf.resize(self.chunk_size, 0.0);

        let mut result = Vec::new();
        match resampler.process_into_buffer(&[&self.input_buf[..]], &mut self.output_buf, None) {
            Ok((_consumed, produced)) => {
                result.extend(self.output_buf[0][..produced].iter().map(|&v| f32_to_sample(v)));
            }
            Err(e) => {
                error!("resampler flush error: {e}");
            }
        }
        self.input_buf.clear();

        result
    }

    /// Returns `true` when input rate == output rate (no resampling occurs).
    pub fn is_passthrough(&self) -> bool {
        self.resampler.is_none()
    }
}
