//! Noise cancellation stage
//!
//! Time-domain approximation of spectral subtraction. The noise floor is
//! estimated from the quietest blocks of the buffer itself, then each block
//! is attenuated by `max(floor, 1 - alpha * noise / block_rms)`. Gains are
//! interpolated across block boundaries to avoid zipper noise.

use crate::analysis::rms;
use crate::dsp::effect::{ensure_finite, mismatch, EffectKind, EffectParameters, EffectStage};
use crate::engine::SampleBuffer;
use crate::error::EffectError;

/// Analysis block length in frames
pub const BLOCK_FRAMES: usize = 256;

/// Percentile of block levels taken as the noise floor
const NOISE_PERCENTILE: f64 = 0.1;

/// Percentile of block levels taken as the signal level
const SIGNAL_PERCENTILE: f64 = 0.9;

/// Minimum spread between signal and noise percentiles, in dB. Flatter
/// material is stationary and has no separable noise floor.
const MIN_SPREAD_DB: f64 = 3.0;

/// Subtraction factor at full strength
const MAX_ALPHA: f64 = 4.0;

/// Maximum attenuation depth at full strength (gain floor = 1 - 0.9 * strength)
const MAX_FLOOR_DEPTH: f64 = 0.9;

/// Levels below this are treated as digital silence
const SILENCE_RMS: f64 = 1e-7;

/// Per-block suppression gains for one buffer
#[derive(Debug, Clone, PartialEq)]
pub struct SuppressionProfile {
    /// Estimated noise RMS
    pub noise_estimate: f64,
    /// Gain for each block, in block order
    pub block_gains: Vec<f64>,
}

fn percentile(sorted: &[f64], p: f64) -> f64 {
    if sorted.is_empty() {
        return 0.0;
    }
    let index = ((sorted.len() as f64 - 1.0) * p).round() as usize;
    sorted[index.min(sorted.len() - 1)]
}

/// Estimate the noise floor and per-block gains.
///
/// Level statistics come from full blocks only, unless the buffer is
/// shorter than one block. When the block levels are too uniform to tell
/// noise from signal, every gain is unity.
pub fn suppression_profile(buffer: &SampleBuffer, strength: f64) -> SuppressionProfile {
    let block_len = BLOCK_FRAMES * buffer.channels() as usize;
    let levels: Vec<f64> = buffer.samples().chunks(block_len).map(rms).collect();

    let mut sorted: Vec<f64> = buffer.samples().chunks_exact(block_len).map(rms).collect();
    if sorted.is_empty() {
        sorted = levels.clone();
    }
    sorted.sort_by(|a, b| a.total_cmp(b));
    let noise_estimate = percentile(&sorted, NOISE_PERCENTILE);
    let signal_level = percentile(&sorted, SIGNAL_PERCENTILE);

    let stationary = noise_estimate < SILENCE_RMS
        || signal_level < noise_estimate * 10f64.powf(MIN_SPREAD_DB / 20.0);
    if stationary {
        return SuppressionProfile {
            noise_estimate,
            block_gains: vec![1.0; levels.len()],
        };
    }

    let alpha = MAX_ALPHA * strength;
    let floor = 1.0 - MAX_FLOOR_DEPTH * strength;

    let block_gains = levels
        .iter()
        .map(|&level| {
            if level > SILENCE_RMS {
                (1.0 - alpha * noise_estimate / level).clamp(floor, 1.0)
            } else {
                floor
            }
        })
        .collect();

    SuppressionProfile {
        noise_estimate,
        block_gains,
    }
}

/// Adaptive noise suppressor
#[derive(Debug, Clone, Copy, Default)]
pub struct NoiseCanceller;

impl NoiseCanceller {
    pub fn new() -> Self {
        Self
    }
}

impl EffectStage for NoiseCanceller {
    fn kind(&self) -> EffectKind {
        EffectKind::NoiseCancellation
    }

    fn apply(
        &self,
        buffer: &SampleBuffer,
        params: &EffectParameters,
    ) -> Result<SampleBuffer, EffectError> {
        let EffectParameters::NoiseCancellation(p) = params else {
            return Err(mismatch(self.kind(), params));
        };
        if !p.enabled() || p.strength() == 0.0 {
            return Ok(buffer.clone());
        }

        let profile = suppression_profile(buffer, p.strength());
        if profile.block_gains.iter().all(|&g| g == 1.0) {
            return Ok(buffer.clone());
        }

        let channels = buffer.channels() as usize;
        let mut output = buffer.samples().to_vec();
        let gains = &profile.block_gains;

        for (frame_index, frame) in output.chunks_exact_mut(channels).enumerate() {
            let block = frame_index / BLOCK_FRAMES;
            let position = (frame_index % BLOCK_FRAMES) as f64 / BLOCK_FRAMES as f64;
            let current = gains[block];
            let next = gains.get(block + 1).copied().unwrap_or(current);
            let gain = (current + (next - current) * position) as f32;
            for sample in frame.iter_mut() {
                *sample *= gain;
            }
        }

        ensure_finite(buffer.with_samples(output)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::rms;

    /// Quiet hiss followed by a loud tone
    fn noisy_buffer() -> SampleBuffer {
        let mut samples = Vec::with_capacity(BLOCK_FRAMES * 16);
        for i in 0..BLOCK_FRAMES * 8 {
            // Deterministic pseudo-noise
            let x = ((i * 7919) % 97) as f32 / 97.0 - 0.5;
            samples.push(0.01 * x);
        }
        for i in 0..BLOCK_FRAMES * 8 {
            samples.push(0.8 * (i as f32 * 0.05).sin());
        }
        SampleBuffer::mono(samples, 48_000).unwrap()
    }

    #[test]
    fn test_attenuates_noise_keeps_signal() {
        let params = EffectParameters::noise_cancellation(true, 1.0).unwrap();
        let input = noisy_buffer();
        let output = NoiseCanceller::new().apply(&input, &params).unwrap();

        let half = input.len() / 2;
        let noise_before = rms(&input.samples()[..half / 2]);
        let noise_after = rms(&output.samples()[..half / 2]);
        assert!(noise_after < noise_before * 0.5);

        let tone_before = rms(&input.samples()[half + BLOCK_FRAMES..]);
        let tone_after = rms(&output.samples()[half + BLOCK_FRAMES..]);
        assert!(tone_after > tone_before * 0.9);
    }

    #[test]
    fn test_profile_floor() {
        let profile = suppression_profile(&noisy_buffer(), 1.0);
        assert!(profile.noise_estimate > 0.0);
        for gain in &profile.block_gains {
            assert!(*gain >= 0.1 - 1e-12 && *gain <= 1.0);
        }
    }

    #[test]
    fn test_sustained_tone_passes_through() {
        let samples: Vec<f32> = (0..4096)
            .map(|i| {
                let t = i as f64 / 44_100.0;
                0.5 * (2.0 * std::f64::consts::PI * 440.0 * t).sin() as f32
            })
            .collect();
        let input = SampleBuffer::mono(samples, 44_100).unwrap();

        for strength in [0.5, 1.0] {
            let params = EffectParameters::noise_cancellation(true, strength).unwrap();
            let output = NoiseCanceller::new().apply(&input, &params).unwrap();
            let change_db = 20.0 * (rms(output.samples()) / rms(input.samples())).log10();
            assert!(change_db.abs() < 1.0, "tone changed by {change_db} dB");
        }
    }

    #[test]
    fn test_short_stream_frame_of_steady_signal() {
        // Four blocks, as in a 1024-sample streaming frame
        let samples: Vec<f32> = (0..1024).map(|i| 0.3 * (i as f32 * 0.07).sin()).collect();
        let profile = suppression_profile(&SampleBuffer::mono(samples, 48_000).unwrap(), 1.0);
        assert_eq!(profile.block_gains, vec![1.0; 4]);
    }

    #[test]
    fn test_silence_untouched() {
        let params = EffectParameters::noise_cancellation(true, 1.0).unwrap();
        let input = SampleBuffer::mono(vec![0.0; 1024], 48_000).unwrap();
        assert_eq!(NoiseCanceller::new().apply(&input, &params).unwrap(), input);
    }

    #[test]
    fn test_disabled_passthrough() {
        let params = EffectParameters::noise_cancellation(false, 1.0).unwrap();
        let input = noisy_buffer();
        assert_eq!(NoiseCanceller::new().apply(&input, &params).unwrap(), input);
    }
}
