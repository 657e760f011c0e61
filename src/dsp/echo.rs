//! Echo cancellation stage
//!
//! No far-end reference reaches the core, so the echo path is estimated from
//! the buffer itself: the dominant lag is found by normalized
//! autocorrelation, and a scaled, delayed copy of the input is subtracted.

use crate::dsp::effect::{ensure_finite, mismatch, EffectKind, EffectParameters, EffectStage};
use crate::engine::SampleBuffer;
use crate::error::EffectError;

/// Shortest echo delay considered
const MIN_DELAY_MS: f64 = 5.0;

/// Longest echo delay considered
const MAX_DELAY_MS: f64 = 250.0;

/// Cap on the estimated echo coefficient, keeps the subtraction stable
const MAX_ECHO_GAIN: f64 = 0.95;

/// Correlations below this are not treated as echo
const MIN_CORRELATION: f64 = 0.1;

/// Estimated echo path for one channel
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EchoEstimate {
    /// Echo delay in frames
    pub delay: usize,
    /// Echo coefficient in [0, MAX_ECHO_GAIN]
    pub gain: f64,
}

/// Side correlations (at half and double the lag) must stay below this
/// fraction of the peak for the peak to count as an echo
const MAX_SIDE_RATIO: f64 = 0.5;

/// Autocorrelation at `lag`, normalized by the channel energy
fn correlation(channel: &[f32], lag: usize, energy: f64) -> f64 {
    if lag >= channel.len() {
        return 0.0;
    }
    channel[lag..]
        .iter()
        .zip(channel)
        .map(|(&a, &b)| a as f64 * b as f64)
        .sum::<f64>()
        / energy
}

/// Find the dominant echo lag of a single channel.
///
/// Returns `None` when the channel is too short to hold the minimum lag, is
/// silent, or shows no meaningful correlation. Periodic material correlates
/// just as strongly at half and double the winning lag, so a peak that is
/// not isolated is not treated as an echo.
pub fn estimate_echo(channel: &[f32], sample_rate: u32) -> Option<EchoEstimate> {
    let min_lag = ((MIN_DELAY_MS / 1000.0) * sample_rate as f64).ceil().max(1.0) as usize;
    let max_lag = (((MAX_DELAY_MS / 1000.0) * sample_rate as f64) as usize).min(channel.len() / 2);
    if max_lag < min_lag {
        return None;
    }

    let energy: f64 = channel.iter().map(|&s| (s as f64) * (s as f64)).sum();
    if energy <= f64::EPSILON {
        return None;
    }

    let (delay, peak) = (min_lag..=max_lag)
        .map(|lag| (lag, correlation(channel, lag, energy)))
        .fold((0, MIN_CORRELATION), |best, candidate| {
            if candidate.1 > best.1 {
                candidate
            } else {
                best
            }
        });
    if delay == 0 {
        return None;
    }

    let half = correlation(channel, delay / 2, energy).abs();
    let double = correlation(channel, delay * 2, energy).abs();
    if half > peak * MAX_SIDE_RATIO || double > peak * MAX_SIDE_RATIO {
        return None;
    }

    Some(EchoEstimate {
        delay,
        gain: peak.min(MAX_ECHO_GAIN),
    })
}

/// Autocorrelation-based echo canceller
#[derive(Debug, Clone, Copy, Default)]
pub struct EchoCanceller;

impl EchoCanceller {
    pub fn new() -> Self {
        Self
    }

    fn cancel(channel: &[f32], estimate: EchoEstimate, strength: f64) -> Vec<f32> {
        let coefficient = (estimate.gain * strength) as f32;
        channel
            .iter()
            .enumerate()
            .map(|(i, &sample)| {
                if i >= estimate.delay {
                    sample - coefficient * channel[i - estimate.delay]
                } else {
                    sample
                }
            })
            .collect()
    }
}

impl EffectStage for EchoCanceller {
    fn kind(&self) -> EffectKind {
        EffectKind::EchoCancellation
    }

    fn apply(
        &self,
        buffer: &SampleBuffer,
        params: &EffectParameters,
    ) -> Result<SampleBuffer, EffectError> {
        let EffectParameters::EchoCancellation(p) = params else {
            return Err(mismatch(self.kind(), params));
        };
        if !p.enabled() || p.strength() == 0.0 {
            return Ok(buffer.clone());
        }

        let channels: Vec<Vec<f32>> = (0..buffer.channels() as usize)
            .map(|ch| {
                let channel = buffer.channel(ch);
                match estimate_echo(&channel, buffer.sample_rate()) {
                    Some(estimate) => Self::cancel(&channel, estimate, p.strength()),
                    None => channel,
                }
            })
            .collect();

        ensure_finite(SampleBuffer::from_channels(&channels, buffer.sample_rate())?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::rms;

    const RATE: u32 = 8_000;

    /// A decaying click train with a delayed echo at `delay` frames
    fn echoed(delay: usize, echo_gain: f32) -> Vec<f32> {
        let len = 4000;
        let mut dry = vec![0.0f32; len];
        // Irregular impulses so the echo lag dominates the autocorrelation
        for (n, &pos) in [10usize, 370, 1100, 1730, 2650, 3100].iter().enumerate() {
            dry[pos] = if n % 2 == 0 { 0.8 } else { -0.6 };
        }
        let mut wet = dry.clone();
        for i in delay..len {
            wet[i] += echo_gain * dry[i - delay];
        }
        wet
    }

    #[test]
    fn test_estimates_echo_delay() {
        let signal = echoed(200, 0.5);
        let estimate = estimate_echo(&signal, RATE).unwrap();
        assert_eq!(estimate.delay, 200);
        assert!(estimate.gain > 0.2);
    }

    #[test]
    fn test_reduces_echo_energy() {
        let params = EffectParameters::echo_cancellation(true, 1.0).unwrap();
        let input = SampleBuffer::mono(echoed(200, 0.5), RATE).unwrap();
        let output = EchoCanceller::new().apply(&input, &params).unwrap();

        // Energy at the echo positions drops
        let echo_positions = [210usize, 570, 1300, 1930, 2850, 3300];
        let before: f32 = echo_positions.iter().map(|&i| input.samples()[i].abs()).sum();
        let after: f32 = echo_positions.iter().map(|&i| output.samples()[i].abs()).sum();
        assert!(after < before * 0.7, "before {before}, after {after}");
        assert!(rms(output.samples()) > 0.0);
    }

    fn tone(frequency: f64, sample_rate: u32, len: usize) -> Vec<f32> {
        (0..len)
            .map(|i| {
                let t = i as f64 / sample_rate as f64;
                0.5 * (2.0 * std::f64::consts::PI * frequency * t).sin() as f32
            })
            .collect()
    }

    #[test]
    fn test_sustained_tone_is_not_an_echo() {
        let signal = tone(440.0, 44_100, 4096);
        assert_eq!(estimate_echo(&signal, 44_100), None);

        let input = SampleBuffer::mono(signal, 44_100).unwrap();
        for strength in [0.5, 1.0] {
            let params = EffectParameters::echo_cancellation(true, strength).unwrap();
            let output = EchoCanceller::new().apply(&input, &params).unwrap();
            let change_db = 20.0 * (rms(output.samples()) / rms(input.samples())).log10();
            assert!(change_db.abs() < 1.0, "tone changed by {change_db} dB");
        }
    }

    #[test]
    fn test_strongest_lag_wins_over_later_lags() {
        // Echo at 100 frames plus a weaker one at 300
        let mut signal = echoed(100, 0.9);
        let dry = echoed(100, 0.0);
        for i in 300..signal.len() {
            signal[i] += 0.3 * dry[i - 300];
        }
        assert_eq!(estimate_echo(&signal, RATE).unwrap().delay, 100);
    }

    #[test]
    fn test_short_buffer_passes_through() {
        let params = EffectParameters::echo_cancellation(true, 1.0).unwrap();
        let input = SampleBuffer::mono(vec![0.5, -0.5, 0.25], RATE).unwrap();
        assert_eq!(EchoCanceller::new().apply(&input, &params).unwrap(), input);
    }

    #[test]
    fn test_disabled_passthrough() {
        let params = EffectParameters::echo_cancellation(false, 1.0).unwrap();
        let input = SampleBuffer::mono(echoed(200, 0.5), RATE).unwrap();
        assert_eq!(EchoCanceller::new().apply(&input, &params).unwrap(), input);
    }
}
