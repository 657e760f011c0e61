//! Normalization stage
//!
//! Peak normalization toward full scale. Strength interpolates the applied
//! gain between unity (0.0) and `1 / peak` (1.0).

use crate::analysis::peak;
use crate::dsp::effect::{ensure_finite, mismatch, EffectKind, EffectParameters, EffectStage};
use crate::engine::SampleBuffer;
use crate::error::EffectError;

/// Peak normalizer
#[derive(Debug, Clone, Copy, Default)]
pub struct Normalizer;

impl Normalizer {
    pub fn new() -> Self {
        Self
    }

    /// Gain applied for a given peak and strength
    fn gain_for(peak: f64, strength: f64) -> f64 {
        1.0 + strength * (1.0 / peak - 1.0)
    }
}

impl EffectStage for Normalizer {
    fn kind(&self) -> EffectKind {
        EffectKind::Normalization
    }

    fn apply(
        &self,
        buffer: &SampleBuffer,
        params: &EffectParameters,
    ) -> Result<SampleBuffer, EffectError> {
        let EffectParameters::Normalization(p) = params else {
            return Err(mismatch(self.kind(), params));
        };
        if !p.enabled() {
            return Ok(buffer.clone());
        }

        let peak = peak(buffer.samples());
        // Silence: nothing to scale
        if peak == 0.0 {
            return Ok(buffer.clone());
        }

        let gain = Self::gain_for(peak, p.strength());
        ensure_finite(buffer.map_samples(|s| (s as f64 * gain) as f32))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_full_strength_reaches_full_scale() {
        let params = EffectParameters::normalization(true, 1.0).unwrap();
        let buffer = SampleBuffer::mono(vec![0.2, -0.4, 0.1], 44_100).unwrap();
        let output = Normalizer::new().apply(&buffer, &params).unwrap();
        assert_relative_eq!(output.samples()[1], -1.0, epsilon = 1e-6);
        assert_relative_eq!(output.samples()[0], 0.5, epsilon = 1e-6);
    }

    #[test]
    fn test_half_strength() {
        let params = EffectParameters::normalization(true, 0.5).unwrap();
        let buffer = SampleBuffer::mono(vec![0.5, -0.25], 44_100).unwrap();
        let output = Normalizer::new().apply(&buffer, &params).unwrap();
        // gain = 1 + 0.5 * (2 - 1) = 1.5
        assert_relative_eq!(output.samples()[0], 0.75, epsilon = 1e-6);
    }

    #[test]
    fn test_silence_unchanged() {
        let params = EffectParameters::normalization(true, 1.0).unwrap();
        let buffer = SampleBuffer::mono(vec![0.0; 8], 44_100).unwrap();
        assert_eq!(Normalizer::new().apply(&buffer, &params).unwrap(), buffer);
    }

    #[test]
    fn test_zero_strength_is_identity() {
        let params = EffectParameters::normalization(true, 0.0).unwrap();
        let buffer = SampleBuffer::mono(vec![0.3, -0.1], 44_100).unwrap();
        assert_eq!(Normalizer::new().apply(&buffer, &params).unwrap(), buffer);
    }
}
