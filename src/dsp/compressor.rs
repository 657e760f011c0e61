//! Compression stage
//!
//! Feed-forward peak compressor with linked channels, a soft knee and
//! attack/release smoothing. A single strength in [0, 1] drives threshold
//! and ratio; strength 0 leaves the signal untouched.

use crate::dsp::effect::{ensure_finite, mismatch, EffectKind, EffectParameters, EffectStage};
use crate::engine::SampleBuffer;
use crate::error::EffectError;

/// Threshold at full strength, in dB
const MAX_THRESHOLD_DEPTH_DB: f32 = 30.0;

/// Additional ratio at full strength (ratio = 1 + 7 * strength)
const MAX_EXTRA_RATIO: f32 = 7.0;

const ATTACK_MS: f32 = 10.0;
const RELEASE_MS: f32 = 100.0;
const KNEE_DB: f32 = 6.0;

/// Floor used when converting silence to dB
const SILENCE_DB: f32 = -96.0;

/// Settings derived from a strength value
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CompressorSettings {
    /// Threshold level in dB
    pub threshold_db: f32,
    /// Compression ratio (1.0 = no compression)
    pub ratio: f32,
    /// Knee width in dB (0 = hard knee)
    pub knee_db: f32,
    pub attack_ms: f32,
    pub release_ms: f32,
}

impl CompressorSettings {
    /// Map a strength in [0, 1] onto compressor settings
    pub fn from_strength(strength: f64) -> Self {
        let strength = strength as f32;
        Self {
            threshold_db: -MAX_THRESHOLD_DEPTH_DB * strength,
            ratio: 1.0 + MAX_EXTRA_RATIO * strength,
            knee_db: KNEE_DB,
            attack_ms: ATTACK_MS,
            release_ms: RELEASE_MS,
        }
    }

    /// Compute gain reduction for a given input level in dB
    /// Returns the gain reduction in dB (zero or negative)
    pub fn gain_reduction_db(&self, input_db: f32) -> f32 {
        let threshold = self.threshold_db;
        let ratio = self.ratio;
        let knee = self.knee_db;

        if knee > 0.0 {
            let knee_start = threshold - knee / 2.0;
            let knee_end = threshold + knee / 2.0;

            if input_db <= knee_start {
                0.0
            } else if input_db >= knee_end {
                (threshold + (input_db - threshold) / ratio) - input_db
            } else {
                // Quadratic interpolation of the ratio across the knee
                let knee_factor = (input_db - knee_start) / knee;
                let effective_ratio = 1.0 + (ratio - 1.0) * knee_factor * knee_factor;
                let over_threshold = input_db - knee_start;
                (knee_start + over_threshold / effective_ratio) - input_db
            }
        } else if input_db <= threshold {
            0.0
        } else {
            (threshold + (input_db - threshold) / ratio) - input_db
        }
    }
}

/// One-pole smoothing coefficient for a time constant
fn time_coefficient(time_ms: f32, sample_rate: u32) -> f32 {
    let samples = (time_ms / 1000.0) * sample_rate as f32;
    if samples > 0.0 {
        (-1.0 / samples).exp()
    } else {
        0.0
    }
}

fn linear_to_db(linear: f32) -> f32 {
    if linear > 0.0 {
        20.0 * linear.log10()
    } else {
        SILENCE_DB
    }
}

fn db_to_linear(db: f32) -> f32 {
    10.0_f32.powf(db / 20.0)
}

/// Dynamics compressor
#[derive(Debug, Clone, Copy, Default)]
pub struct Compressor;

impl Compressor {
    pub fn new() -> Self {
        Self
    }

    fn compress(
        buffer: &SampleBuffer,
        settings: &CompressorSettings,
    ) -> Result<SampleBuffer, EffectError> {
        let channels = buffer.channels() as usize;
        let attack_coeff = time_coefficient(settings.attack_ms, buffer.sample_rate());
        let release_coeff = time_coefficient(settings.release_ms, buffer.sample_rate());

        let mut output = buffer.samples().to_vec();
        let mut gain_reduction = 1.0_f32;

        for frame in output.chunks_exact_mut(channels) {
            // Linked detection: loudest channel drives every channel
            let level = frame.iter().fold(0.0_f32, |acc, s| acc.max(s.abs()));
            let target = db_to_linear(settings.gain_reduction_db(linear_to_db(level)));

            let coeff = if target < gain_reduction {
                attack_coeff
            } else {
                release_coeff
            };
            gain_reduction = coeff * gain_reduction + (1.0 - coeff) * target;

            for sample in frame.iter_mut() {
                *sample *= gain_reduction;
            }
        }

        Ok(buffer.with_samples(output)?)
    }
}

impl EffectStage for Compressor {
    fn kind(&self) -> EffectKind {
        EffectKind::Compression
    }

    fn apply(
        &self,
        buffer: &SampleBuffer,
        params: &EffectParameters,
    ) -> Result<SampleBuffer, EffectError> {
        let EffectParameters::Compression(p) = params else {
            return Err(mismatch(self.kind(), params));
        };
        if !p.enabled() || p.strength() == 0.0 {
            return Ok(buffer.clone());
        }

        let settings = CompressorSettings::from_strength(p.strength());
        ensure_finite(Self::compress(buffer, &settings)?)
    }
}
