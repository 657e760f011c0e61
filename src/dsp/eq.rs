//! Equalization stage
//!
//! Multi-band parametric equalizer built from cascaded peaking biquads,
//! one filter per band and channel.

use std::f64::consts::PI;

use crate::dsp::effect::{
    ensure_finite, mismatch, EffectKind, EffectParameters, EffectStage, EqBand,
};
use crate::engine::SampleBuffer;
use crate::error::EffectError;

/// Biquad filter coefficients
/// Transfer function: H(z) = (b0 + b1*z^-1 + b2*z^-2) / (a0 + a1*z^-1 + a2*z^-2)
/// Normalized: all coefficients divided by a0
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BiquadCoeffs {
    b0: f64,
    b1: f64,
    b2: f64,
    a1: f64,
    a2: f64,
}

impl BiquadCoeffs {
    /// Peaking EQ coefficients (Audio EQ Cookbook)
    /// Reference: https://www.w3.org/2011/audio/audio-eq-cookbook.html
    pub fn peaking(sample_rate: f64, frequency: f64, gain_db: f64, q: f64) -> Self {
        let w0 = 2.0 * PI * frequency / sample_rate;
        let cos_w0 = w0.cos();
        let alpha = w0.sin() / (2.0 * q);
        let a = 10.0_f64.powf(gain_db / 40.0);

        let b0 = 1.0 + alpha * a;
        let b1 = -2.0 * cos_w0;
        let b2 = 1.0 - alpha * a;
        let a0 = 1.0 + alpha / a;
        let a1 = -2.0 * cos_w0;
        let a2 = 1.0 - alpha / a;

        BiquadCoeffs {
            b0: b0 / a0,
            b1: b1 / a0,
            b2: b2 / a0,
            a1: a1 / a0,
            a2: a2 / a0,
        }
    }

    /// Magnitude response at a frequency, in dB
    pub fn magnitude_db(&self, frequency: f64, sample_rate: f64) -> f64 {
        let w = 2.0 * PI * frequency / sample_rate;
        let (cos1, sin1) = (w.cos(), w.sin());
        let (cos2, sin2) = ((2.0 * w).cos(), (2.0 * w).sin());
        let num_re = self.b0 + self.b1 * cos1 + self.b2 * cos2;
        let num_im = -(self.b1 * sin1 + self.b2 * sin2);
        let den_re = 1.0 + self.a1 * cos1 + self.a2 * cos2;
        let den_im = -(self.a1 * sin1 + self.a2 * sin2);
        let num = (num_re * num_re + num_im * num_im).sqrt();
        let den = (den_re * den_re + den_im * den_im).sqrt();
        20.0 * (num / den).log10()
    }
}

/// Biquad filter state for one channel
#[derive(Debug, Clone, Copy, Default)]
struct BiquadState {
    x1: f64,
    x2: f64,
    y1: f64,
    y2: f64,
}

impl BiquadState {
    /// Direct Form I
    fn process(&mut self, input: f64, coeffs: &BiquadCoeffs) -> f64 {
        let output = coeffs.b0 * input + coeffs.b1 * self.x1 + coeffs.b2 * self.x2
            - coeffs.a1 * self.y1
            - coeffs.a2 * self.y2;

        self.x2 = self.x1;
        self.x1 = input;
        self.y2 = self.y1;
        self.y1 = output;

        output
    }
}

/// Reject bands that cannot be represented at this sample rate
fn check_nyquist(bands: &[EqBand], sample_rate: u32) -> Result<(), EffectError> {
    let nyquist = sample_rate as f64 / 2.0;
    for (band, params) in bands.iter().enumerate() {
        if params.frequency_hz >= nyquist {
            return Err(EffectError::NyquistViolation {
                band,
                frequency_hz: params.frequency_hz,
                nyquist_hz: nyquist,
            });
        }
    }
    Ok(())
}

/// Parametric equalizer
#[derive(Debug, Clone, Copy, Default)]
pub struct Equalizer;

impl Equalizer {
    pub fn new() -> Self {
        Self
    }
}

impl EffectStage for Equalizer {
    fn kind(&self) -> EffectKind {
        EffectKind::Equalization
    }

    fn apply(
        &self,
        buffer: &SampleBuffer,
        params: &EffectParameters,
    ) -> Result<SampleBuffer, EffectError> {
        let EffectParameters::Equalization(p) = params else {
            return Err(mismatch(self.kind(), params));
        };
        if !p.enabled() {
            return Ok(buffer.clone());
        }
        check_nyquist(p.bands(), buffer.sample_rate())?;

        // Flat bands are bypassed
        let coeffs: Vec<BiquadCoeffs> = p
            .bands()
            .iter()
            .filter(|band| band.gain_db.abs() >= 0.01)
            .map(|band| {
                BiquadCoeffs::peaking(
                    buffer.sample_rate() as f64,
                    band.frequency_hz,
                    band.gain_db,
                    band.q,
                )
            })
            .collect();
        if coeffs.is_empty() {
            return Ok(buffer.clone());
        }

        let channels = buffer.channels() as usize;
        let mut states = vec![vec![BiquadState::default(); channels]; coeffs.len()];
        let mut output = buffer.samples().to_vec();

        for frame in output.chunks_exact_mut(channels) {
            for (channel, sample) in frame.iter_mut().enumerate() {
                let mut value = *sample as f64;
                for (band_coeffs, band_states) in coeffs.iter().zip(states.iter_mut()) {
                    value = band_states[channel].process(value, band_coeffs);
                }
                *sample = value as f32;
            }
        }

        ensure_finite(buffer.with_samples(output)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::rms;
    use approx::assert_relative_eq;

    fn sine(frequency: f32, sample_rate: u32, frames: usize) -> SampleBuffer {
        let samples = (0..frames)
            .map(|i| {
                0.25 * (2.0 * std::f32::consts::PI * frequency * i as f32 / sample_rate as f32)
                    .sin()
            })
            .collect();
        SampleBuffer::mono(samples, sample_rate).unwrap()
    }

    fn band(frequency_hz: f64, gain_db: f64) -> EqBand {
        EqBand {
            frequency_hz,
            gain_db,
            q: 1.0,
        }
    }

    #[test]
    fn test_peaking_response_at_center() {
        let coeffs = BiquadCoeffs::peaking(48_000.0, 1000.0, 6.0, 1.0);
        assert_relative_eq!(coeffs.magnitude_db(1000.0, 48_000.0), 6.0, epsilon = 1e-6);
    }

    #[test]
    fn test_boost_increases_level() {
        let params = EffectParameters::equalization(true, vec![band(1000.0, 12.0)]).unwrap();
        let input = sine(1000.0, 48_000, 9600);
        let output = Equalizer::new().apply(&input, &params).unwrap();
        // Skip the filter transient
        let before = rms(&input.samples()[4800..]);
        let after = rms(&output.samples()[4800..]);
        assert!(after > before * 3.0, "expected ~12 dB boost: {before} -> {after}");
    }

    #[test]
    fn test_nyquist_violation() {
        let params = EffectParameters::equalization(true, vec![band(1000.0, 3.0), band(22_050.0, 3.0)])
            .unwrap();
        let input = sine(440.0, 44_100, 512);
        assert_eq!(
            Equalizer::new().apply(&input, &params),
            Err(EffectError::NyquistViolation {
                band: 1,
                frequency_hz: 22_050.0,
                nyquist_hz: 22_050.0,
            })
        );
    }

    #[test]
    fn test_flat_bands_bypass() {
        let params = EffectParameters::equalization(true, vec![band(1000.0, 0.0)]).unwrap();
        let input = sine(440.0, 44_100, 512);
        assert_eq!(Equalizer::new().apply(&input, &params).unwrap(), input);
    }

    #[test]
    fn test_disabled_skips_nyquist_check() {
        let params = EffectParameters::equalization(false, vec![band(30_000.0, 3.0)]).unwrap();
        let input = sine(440.0, 44_100, 512);
        assert_eq!(Equalizer::new().apply(&input, &params).unwrap(), input);
    }
}
