//! Reverb stage
//!
//! Freeverb: 8 parallel damped comb filters, 4 series allpass filters,
//! a pre-delay line and stereo width control. Room character comes from a
//! named preset; wet/dry mix comes from the stage parameters.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::dsp::effect::{ensure_finite, mismatch, EffectKind, EffectParameters, EffectStage};
use crate::engine::SampleBuffer;
use crate::error::{ConfigError, EffectError};

/// Preset used when a reverb slot is not configured
pub const DEFAULT_PRESET: &str = "small_room";

/// Reference sample rate for Freeverb delays
const REFERENCE_SAMPLE_RATE: f64 = 44_100.0;

/// Comb filter delays at 44100 Hz
const COMB_DELAYS: [usize; 8] = [1116, 1188, 1277, 1356, 1422, 1491, 1557, 1617];

/// Allpass filter delays at 44100 Hz
const ALLPASS_DELAYS: [usize; 4] = [556, 441, 341, 225];

/// Right channel delay offset in samples
const STEREO_SPREAD: usize = 23;

const ALLPASS_FEEDBACK: f32 = 0.5;
const ROOM_SCALE: f32 = 0.28;
const ROOM_OFFSET: f32 = 0.7;
const DAMP_SCALE: f32 = 0.4;

/// Input attenuation ahead of the comb bank
const FIXED_GAIN: f32 = 0.015;

/// Output scaling of the wet signal
const WET_SCALE: f32 = 3.0;

/// Maximum pre-delay in milliseconds
pub const MAX_PRE_DELAY_MS: f64 = 100.0;

/// Room character of a reverb preset
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ReverbPreset {
    /// Room size: 0 (tiny) to 1 (huge hall)
    pub room_size: f64,
    /// Damping: 0 (bright) to 1 (dark)
    pub damping: f64,
    /// Stereo width: 0 (mono) to 1 (full stereo)
    pub width: f64,
    /// Pre-delay in milliseconds: 0 to 100
    #[serde(default)]
    pub pre_delay_ms: f64,
}

impl ReverbPreset {
    /// Check all values are within range, returning the reason otherwise
    pub fn validate(&self) -> Result<(), String> {
        let unit = [
            ("room_size", self.room_size),
            ("damping", self.damping),
            ("width", self.width),
        ];
        for (name, value) in unit {
            if !(0.0..=1.0).contains(&value) {
                return Err(format!("{name} must be within 0.0 to 1.0, got {value}"));
            }
        }
        if !(0.0..=MAX_PRE_DELAY_MS).contains(&self.pre_delay_ms) {
            return Err(format!(
                "pre_delay_ms must be within 0 to {MAX_PRE_DELAY_MS} ms, got {}",
                self.pre_delay_ms
            ));
        }
        Ok(())
    }
}

/// A reverb preset with its lookup name
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NamedReverbPreset {
    pub name: String,
    #[serde(flatten)]
    pub preset: ReverbPreset,
}

/// Insertion-ordered table of reverb presets
#[derive(Debug, Clone)]
pub struct ReverbPresets {
    presets: Vec<NamedReverbPreset>,
}

impl ReverbPresets {
    /// Build the table, validating each preset and rejecting duplicate names
    pub fn new(presets: Vec<NamedReverbPreset>) -> Result<Self, ConfigError> {
        let mut table: Vec<NamedReverbPreset> = Vec::with_capacity(presets.len());
        for named in presets {
            if named.name.trim().is_empty() {
                return Err(ConfigError::InvalidReverbPreset {
                    name: named.name,
                    reason: "name is blank".to_string(),
                });
            }
            if let Err(reason) = named.preset.validate() {
                return Err(ConfigError::InvalidReverbPreset {
                    name: named.name,
                    reason,
                });
            }
            if table.iter().any(|p| p.name == named.name) {
                return Err(ConfigError::DuplicateReverbPreset { name: named.name });
            }
            table.push(named);
        }
        Ok(Self { presets: table })
    }

    pub fn get(&self, name: &str) -> Option<&ReverbPreset> {
        self.presets
            .iter()
            .find(|p| p.name == name)
            .map(|p| &p.preset)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    pub fn list(&self) -> &[NamedReverbPreset] {
        &self.presets
    }
}

impl Default for ReverbPresets {
    fn default() -> Self {
        Self {
            presets: default_reverb_presets(),
        }
    }
}

/// Reverb presets supported out of the box
pub fn default_reverb_presets() -> Vec<NamedReverbPreset> {
    let preset = |name: &str, room_size, damping, width, pre_delay_ms| NamedReverbPreset {
        name: name.to_string(),
        preset: ReverbPreset {
            room_size,
            damping,
            width,
            pre_delay_ms,
        },
    };
    vec![
        preset("small_room", 0.3, 0.6, 0.7, 5.0),
        preset("hall", 0.85, 0.35, 1.0, 25.0),
        preset("plate", 0.65, 0.1, 1.0, 0.0),
    ]
}

/// Lowpass-feedback comb filter
struct CombFilter {
    buffer: Vec<f32>,
    pos: usize,
    filter_state: f32,
    feedback: f32,
    damp1: f32,
    damp2: f32,
}

impl CombFilter {
    fn new(delay: usize, feedback: f32, damping: f32) -> Self {
        let damp2 = damping * DAMP_SCALE;
        Self {
            buffer: vec![0.0; delay.max(1)],
            pos: 0,
            filter_state: 0.0,
            feedback,
            damp1: 1.0 - damp2,
            damp2,
        }
    }

    fn process(&mut self, input: f32) -> f32 {
        let output = self.buffer[self.pos];
        self.filter_state = output * self.damp1 + self.filter_state * self.damp2;
        self.buffer[self.pos] = input + self.filter_state * self.feedback;
        self.pos = (self.pos + 1) % self.buffer.len();
        output
    }
}

/// Schroeder allpass filter for diffusion
struct AllpassFilter {
    buffer: Vec<f32>,
    pos: usize,
}

impl AllpassFilter {
    fn new(delay: usize) -> Self {
        Self {
            buffer: vec![0.0; delay.max(1)],
            pos: 0,
        }
    }

    fn process(&mut self, input: f32) -> f32 {
        let delayed = self.buffer[self.pos];
        let output = delayed - input;
        self.buffer[self.pos] = input + delayed * ALLPASS_FEEDBACK;
        self.pos = (self.pos + 1) % self.buffer.len();
        output
    }
}

/// Fixed-length delay line; zero length passes input through
struct PreDelay {
    buffer: Vec<f32>,
    pos: usize,
}

impl PreDelay {
    fn new(delay: usize) -> Self {
        Self {
            buffer: vec![0.0; delay],
            pos: 0,
        }
    }

    fn process(&mut self, input: f32) -> f32 {
        if self.buffer.is_empty() {
            return input;
        }
        let output = self.buffer[self.pos];
        self.buffer[self.pos] = input;
        self.pos = (self.pos + 1) % self.buffer.len();
        output
    }
}

/// One channel's worth of Freeverb filters
struct Tank {
    pre_delay: PreDelay,
    combs: Vec<CombFilter>,
    allpasses: Vec<AllpassFilter>,
}

impl Tank {
    fn new(preset: &ReverbPreset, sample_rate: u32, spread: usize) -> Self {
        let scale = sample_rate as f64 / REFERENCE_SAMPLE_RATE;
        let scaled = |delay: usize| (((delay + spread) as f64 * scale) as usize).max(1);
        let feedback = preset.room_size as f32 * ROOM_SCALE + ROOM_OFFSET;
        let damping = preset.damping as f32;
        let pre_delay = ((preset.pre_delay_ms / 1000.0) * sample_rate as f64) as usize;

        Self {
            pre_delay: PreDelay::new(pre_delay),
            combs: COMB_DELAYS
                .iter()
                .map(|&d| CombFilter::new(scaled(d), feedback, damping))
                .collect(),
            allpasses: ALLPASS_DELAYS
                .iter()
                .map(|&d| AllpassFilter::new(scaled(d)))
                .collect(),
        }
    }

    fn process(&mut self, input: f32) -> f32 {
        let delayed = self.pre_delay.process(input) * FIXED_GAIN;
        let comb_sum: f32 = self.combs.iter_mut().map(|c| c.process(delayed)).sum();
        self.allpasses
            .iter_mut()
            .fold(comb_sum, |acc, allpass| allpass.process(acc))
    }
}

/// Freeverb stage resolving presets against a shared table
#[derive(Debug, Clone)]
pub struct Reverb {
    presets: Arc<ReverbPresets>,
}

impl Reverb {
    pub fn new(presets: Arc<ReverbPresets>) -> Self {
        Self { presets }
    }

    fn process_stereo(
        buffer: &SampleBuffer,
        preset: &ReverbPreset,
        wet: f32,
        dry: f32,
    ) -> Vec<f32> {
        let width = preset.width as f32;
        // wet1 feeds the same side, wet2 the opposite side
        let wet1 = wet * (1.0 + width) / 2.0;
        let wet2 = wet * (1.0 - width) / 2.0;

        let mut left = Tank::new(preset, buffer.sample_rate(), 0);
        let mut right = Tank::new(preset, buffer.sample_rate(), STEREO_SPREAD);
        let mut output = buffer.samples().to_vec();

        for frame in output.chunks_exact_mut(2) {
            let input = (frame[0] + frame[1]) * 0.5;
            let out_left = left.process(input);
            let out_right = right.process(input);
            frame[0] = frame[0] * dry + out_left * wet1 + out_right * wet2;
            frame[1] = frame[1] * dry + out_right * wet1 + out_left * wet2;
        }
        output
    }

    fn process_per_channel(
        buffer: &SampleBuffer,
        preset: &ReverbPreset,
        wet: f32,
        dry: f32,
    ) -> Vec<f32> {
        let channels = buffer.channels() as usize;
        let mut tanks: Vec<Tank> = (0..channels)
            .map(|_| Tank::new(preset, buffer.sample_rate(), 0))
            .collect();
        let mut output = buffer.samples().to_vec();

        for frame in output.chunks_exact_mut(channels) {
            for (sample, tank) in frame.iter_mut().zip(tanks.iter_mut()) {
                *sample = *sample * dry + tank.process(*sample) * wet;
            }
        }
        output
    }
}

impl EffectStage for Reverb {
    fn kind(&self) -> EffectKind {
        EffectKind::Reverb
    }

    fn apply(
        &self,
        buffer: &SampleBuffer,
        params: &EffectParameters,
    ) -> Result<SampleBuffer, EffectError> {
        let EffectParameters::Reverb(p) = params else {
            return Err(mismatch(self.kind(), params));
        };
        if !p.enabled() {
            return Ok(buffer.clone());
        }
        let preset = self
            .presets
            .get(p.preset_name())
            .ok_or_else(|| EffectError::UnknownPreset {
                name: p.preset_name().to_string(),
            })?;

        let wet = p.wet_level() as f32 * WET_SCALE;
        let dry = p.dry_level() as f32;
        let output = if buffer.channels() == 2 {
            Self::process_stereo(buffer, preset, wet, dry)
        } else {
            Self::process_per_channel(buffer, preset, wet, dry)
        };

        ensure_finite(buffer.with_samples(output)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn stage() -> Reverb {
        Reverb::new(Arc::new(ReverbPresets::default()))
    }

    fn impulse(channels: u16, frames: usize) -> SampleBuffer {
        let mut samples = vec![0.0; frames * channels as usize];
        for ch in 0..channels as usize {
            samples[ch] = 1.0;
        }
        SampleBuffer::new(samples, 44_100, channels).unwrap()
    }

    #[test]
    fn test_default_presets() {
        let presets = ReverbPresets::default();
        let names: Vec<&str> = presets.list().iter().map(|p| p.name.as_str()).collect();
        assert_eq!(names, vec!["small_room", "hall", "plate"]);
        assert!(presets.contains(DEFAULT_PRESET));
        for named in presets.list() {
            assert!(named.preset.validate().is_ok());
        }
    }

    #[test]
    fn test_invalid_preset_rejected() {
        let result = ReverbPresets::new(vec![NamedReverbPreset {
            name: "cave".to_string(),
            preset: ReverbPreset {
                room_size: 1.5,
                damping: 0.5,
                width: 1.0,
                pre_delay_ms: 0.0,
            },
        }]);
        assert!(matches!(result, Err(ConfigError::InvalidReverbPreset { .. })));
    }

    #[test]
    fn test_duplicate_preset_rejected() {
        let mut presets = default_reverb_presets();
        presets.push(presets[0].clone());
        assert!(matches!(
            ReverbPresets::new(presets),
            Err(ConfigError::DuplicateReverbPreset { .. })
        ));
    }

    #[test]
    fn test_produces_tail() {
        let params = EffectParameters::reverb(true, "hall", 0.5, 1.0).unwrap();
        let output = stage().apply(&impulse(1, 4096), &params).unwrap();
        let tail_energy: f32 = output.samples()[1..].iter().map(|s| s.abs()).sum();
        assert!(tail_energy > 0.0);
    }

    #[test]
    fn test_dry_only_is_identity() {
        let params = EffectParameters::reverb(true, "plate", 0.0, 1.0).unwrap();
        let input = impulse(2, 2048);
        assert_eq!(stage().apply(&input, &params).unwrap(), input);
    }

    #[test]
    fn test_unknown_preset() {
        let params = EffectParameters::reverb(true, "cathedral", 0.3, 1.0).unwrap();
        assert_eq!(
            stage().apply(&impulse(1, 64), &params),
            Err(EffectError::UnknownPreset {
                name: "cathedral".to_string()
            })
        );
    }

    #[test]
    fn test_deterministic_across_calls() {
        let params = EffectParameters::reverb(true, "small_room", 0.4, 0.8).unwrap();
        let reverb = stage();
        let input = impulse(2, 4096);
        let first = reverb.apply(&input, &params).unwrap();
        let second = reverb.apply(&input, &params).unwrap();
        assert_eq!(first, second);
    }
}
