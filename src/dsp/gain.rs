//! Amplification stage
//!
//! Applies a fixed gain given in dB (-20 to +20).

use crate::analysis::decibel_to_linear;
use crate::dsp::effect::{ensure_finite, mismatch, EffectKind, EffectParameters, EffectStage};
use crate::engine::SampleBuffer;
use crate::error::EffectError;

/// Fixed gain stage
#[derive(Debug, Clone, Copy, Default)]
pub struct Amplifier;

impl Amplifier {
    pub fn new() -> Self {
        Self
    }
}

impl EffectStage for Amplifier {
    fn kind(&self) -> EffectKind {
        EffectKind::Amplification
    }

    fn apply(
        &self,
        buffer: &SampleBuffer,
        params: &EffectParameters,
    ) -> Result<SampleBuffer, EffectError> {
        let EffectParameters::Amplification(p) = params else {
            return Err(mismatch(self.kind(), params));
        };
        if !p.enabled() {
            return Ok(buffer.clone());
        }

        let gain = decibel_to_linear(p.gain_db()) as f32;
        // Unity gain optimization
        if (gain - 1.0).abs() < f32::EPSILON {
            return Ok(buffer.clone());
        }

        ensure_finite(buffer.map_samples(|s| s * gain))
    }
}
