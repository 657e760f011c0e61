//! Effect stage abstraction
//!
//! `EffectParameters` is a tagged variant with one validated constructor per
//! effect kind. A value of this type has always passed range validation;
//! deserialization goes through the same constructors.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::engine::SampleBuffer;
use crate::error::{EffectError, ParameterError};

/// Amplification and equalization gain bounds in dB
pub const MIN_GAIN_DB: f64 = -20.0;
pub const MAX_GAIN_DB: f64 = 20.0;

/// Maximum number of equalizer bands
pub const MAX_BANDS: usize = 16;

/// The seven effect kinds, declared in canonical chain order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EffectKind {
    NoiseCancellation,
    EchoCancellation,
    Amplification,
    Normalization,
    Compression,
    Reverb,
    Equalization,
}

impl EffectKind {
    /// Every kind, in canonical order
    pub const ALL: [EffectKind; 7] = [
        EffectKind::NoiseCancellation,
        EffectKind::EchoCancellation,
        EffectKind::Amplification,
        EffectKind::Normalization,
        EffectKind::Compression,
        EffectKind::Reverb,
        EffectKind::Equalization,
    ];

    /// Position in the canonical chain
    pub fn canonical_index(self) -> usize {
        self as usize
    }

    /// Stable snake_case name used in diagnostics
    pub fn name(self) -> &'static str {
        match self {
            EffectKind::NoiseCancellation => "noise_cancellation",
            EffectKind::EchoCancellation => "echo_cancellation",
            EffectKind::Amplification => "amplification",
            EffectKind::Normalization => "normalization",
            EffectKind::Compression => "compression",
            EffectKind::Reverb => "reverb",
            EffectKind::Equalization => "equalization",
        }
    }
}

impl fmt::Display for EffectKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.name())
    }
}

fn check_range(
    effect: EffectKind,
    param: &str,
    value: f64,
    min: f64,
    max: f64,
) -> Result<(), ParameterError> {
    // NaN fails both comparisons, so it is rejected here too
    if value >= min && value <= max {
        Ok(())
    } else {
        Err(ParameterError::OutOfRange {
            effect,
            param: param.to_string(),
            value,
            expected: format!("{} to {}", min, max),
        })
    }
}

fn check_positive(effect: EffectKind, param: &str, value: f64) -> Result<(), ParameterError> {
    if value > 0.0 && value.is_finite() {
        Ok(())
    } else {
        Err(ParameterError::OutOfRange {
            effect,
            param: param.to_string(),
            value,
            expected: "> 0".to_string(),
        })
    }
}

/// Enable flag plus a strength in [0, 1]
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StrengthParams {
    enabled: bool,
    strength: f64,
}

impl StrengthParams {
    pub fn enabled(&self) -> bool {
        self.enabled
    }

    pub fn strength(&self) -> f64 {
        self.strength
    }
}

/// Enable flag plus a gain in [-20, 20] dB
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AmplificationParams {
    enabled: bool,
    gain_db: f64,
}

impl AmplificationParams {
    pub fn enabled(&self) -> bool {
        self.enabled
    }

    pub fn gain_db(&self) -> f64 {
        self.gain_db
    }
}

/// Reverb preset reference plus wet/dry mix
#[derive(Debug, Clone, PartialEq)]
pub struct ReverbParams {
    enabled: bool,
    preset_name: String,
    wet_level: f64,
    dry_level: f64,
}

impl ReverbParams {
    pub fn enabled(&self) -> bool {
        self.enabled
    }

    /// Preset name, resolved against the preset table at apply time
    pub fn preset_name(&self) -> &str {
        &self.preset_name
    }

    pub fn wet_level(&self) -> f64 {
        self.wet_level
    }

    pub fn dry_level(&self) -> f64 {
        self.dry_level
    }
}

/// Single peaking EQ band
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EqBand {
    /// Center frequency in Hz (> 0)
    pub frequency_hz: f64,
    /// Gain in dB (-20 to +20)
    pub gain_db: f64,
    /// Q factor (> 0)
    pub q: f64,
}

impl EqBand {
    /// Validate band parameters
    pub fn validate(&self) -> Result<(), ParameterError> {
        let kind = EffectKind::Equalization;
        check_positive(kind, "frequency_hz", self.frequency_hz)?;
        check_range(kind, "gain_db", self.gain_db, MIN_GAIN_DB, MAX_GAIN_DB)?;
        check_positive(kind, "q", self.q)
    }
}

/// Ordered list of equalizer bands
#[derive(Debug, Clone, PartialEq)]
pub struct EqualizationParams {
    enabled: bool,
    bands: Vec<EqBand>,
}

impl EqualizationParams {
    pub fn enabled(&self) -> bool {
        self.enabled
    }

    pub fn bands(&self) -> &[EqBand] {
        &self.bands
    }
}

/// Validated parameters for one effect stage
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawEffectParameters", into = "RawEffectParameters")]
pub enum EffectParameters {
    NoiseCancellation(StrengthParams),
    EchoCancellation(StrengthParams),
    Amplification(AmplificationParams),
    Normalization(StrengthParams),
    Compression(StrengthParams),
    Reverb(ReverbParams),
    Equalization(EqualizationParams),
}

impl EffectParameters {
    fn strength(
        kind: EffectKind,
        enabled: bool,
        strength: f64,
    ) -> Result<StrengthParams, ParameterError> {
        check_range(kind, "strength", strength, 0.0, 1.0)?;
        Ok(StrengthParams { enabled, strength })
    }

    pub fn noise_cancellation(enabled: bool, strength: f64) -> Result<Self, ParameterError> {
        Self::strength(EffectKind::NoiseCancellation, enabled, strength)
            .map(EffectParameters::NoiseCancellation)
    }

    pub fn echo_cancellation(enabled: bool, strength: f64) -> Result<Self, ParameterError> {
        Self::strength(EffectKind::EchoCancellation, enabled, strength)
            .map(EffectParameters::EchoCancellation)
    }

    pub fn normalization(enabled: bool, strength: f64) -> Result<Self, ParameterError> {
        Self::strength(EffectKind::Normalization, enabled, strength)
            .map(EffectParameters::Normalization)
    }

    pub fn compression(enabled: bool, strength: f64) -> Result<Self, ParameterError> {
        Self::strength(EffectKind::Compression, enabled, strength)
            .map(EffectParameters::Compression)
    }

    pub fn amplification(enabled: bool, gain_db: f64) -> Result<Self, ParameterError> {
        check_range(
            EffectKind::Amplification,
            "gain_db",
            gain_db,
            MIN_GAIN_DB,
            MAX_GAIN_DB,
        )?;
        Ok(EffectParameters::Amplification(AmplificationParams {
            enabled,
            gain_db,
        }))
    }

    pub fn reverb(
        enabled: bool,
        preset_name: impl Into<String>,
        wet_level: f64,
        dry_level: f64,
    ) -> Result<Self, ParameterError> {
        let preset_name = preset_name.into();
        if preset_name.trim().is_empty() {
            return Err(ParameterError::BlankPresetName);
        }
        check_range(EffectKind::Reverb, "wet_level", wet_level, 0.0, 1.0)?;
        check_range(EffectKind::Reverb, "dry_level", dry_level, 0.0, 1.0)?;
        Ok(EffectParameters::Reverb(ReverbParams {
            enabled,
            preset_name,
            wet_level,
            dry_level,
        }))
    }

    pub fn equalization(enabled: bool, bands: Vec<EqBand>) -> Result<Self, ParameterError> {
        if bands.len() > MAX_BANDS {
            return Err(ParameterError::TooManyBands {
                count: bands.len(),
                max: MAX_BANDS,
            });
        }
        for band in &bands {
            band.validate()?;
        }
        Ok(EffectParameters::Equalization(EqualizationParams {
            enabled,
            bands,
        }))
    }

    /// Disabled parameters occupying a stage slot that was not configured
    pub fn disabled(kind: EffectKind) -> Self {
        let off = StrengthParams {
            enabled: false,
            strength: 0.0,
        };
        match kind {
            EffectKind::NoiseCancellation => EffectParameters::NoiseCancellation(off),
            EffectKind::EchoCancellation => EffectParameters::EchoCancellation(off),
            EffectKind::Normalization => EffectParameters::Normalization(off),
            EffectKind::Compression => EffectParameters::Compression(off),
            EffectKind::Amplification => EffectParameters::Amplification(AmplificationParams {
                enabled: false,
                gain_db: 0.0,
            }),
            EffectKind::Reverb => EffectParameters::Reverb(ReverbParams {
                enabled: false,
                preset_name: crate::dsp::reverb::DEFAULT_PRESET.to_string(),
                wet_level: 0.0,
                dry_level: 1.0,
            }),
            EffectKind::Equalization => EffectParameters::Equalization(EqualizationParams {
                enabled: false,
                bands: Vec::new(),
            }),
        }
    }

    /// The effect kind these parameters belong to
    pub fn kind(&self) -> EffectKind {
        match self {
            EffectParameters::NoiseCancellation(_) => EffectKind::NoiseCancellation,
            EffectParameters::EchoCancellation(_) => EffectKind::EchoCancellation,
            EffectParameters::Amplification(_) => EffectKind::Amplification,
            EffectParameters::Normalization(_) => EffectKind::Normalization,
            EffectParameters::Compression(_) => EffectKind::Compression,
            EffectParameters::Reverb(_) => EffectKind::Reverb,
            EffectParameters::Equalization(_) => EffectKind::Equalization,
        }
    }

    /// Whether the stage does anything
    pub fn is_enabled(&self) -> bool {
        match self {
            EffectParameters::NoiseCancellation(p)
            | EffectParameters::EchoCancellation(p)
            | EffectParameters::Normalization(p)
            | EffectParameters::Compression(p) => p.enabled,
            EffectParameters::Amplification(p) => p.enabled,
            EffectParameters::Reverb(p) => p.enabled,
            EffectParameters::Equalization(p) => p.enabled,
        }
    }

    /// Headline intensity reported in stage diagnostics; 0 when disabled
    pub fn applied_strength(&self) -> f64 {
        if !self.is_enabled() {
            return 0.0;
        }
        match self {
            EffectParameters::NoiseCancellation(p)
            | EffectParameters::EchoCancellation(p)
            | EffectParameters::Normalization(p)
            | EffectParameters::Compression(p) => p.strength,
            EffectParameters::Amplification(p) => p.gain_db,
            EffectParameters::Reverb(p) => p.wet_level,
            EffectParameters::Equalization(p) => p
                .bands
                .iter()
                .map(|b| b.gain_db.abs())
                .fold(0.0, f64::max),
        }
    }
}

/// Wire representation of effect parameters, validated on conversion
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RawEffectParameters {
    NoiseCancellation {
        #[serde(default = "default_enabled")]
        enabled: bool,
        strength: f64,
    },
    EchoCancellation {
        #[serde(default = "default_enabled")]
        enabled: bool,
        strength: f64,
    },
    Amplification {
        #[serde(default = "default_enabled")]
        enabled: bool,
        gain_db: f64,
    },
    Normalization {
        #[serde(default = "default_enabled")]
        enabled: bool,
        strength: f64,
    },
    Compression {
        #[serde(default = "default_enabled")]
        enabled: bool,
        strength: f64,
    },
    Reverb {
        #[serde(default = "default_enabled")]
        enabled: bool,
        preset: String,
        wet_level: f64,
        dry_level: f64,
    },
    Equalization {
        #[serde(default = "default_enabled")]
        enabled: bool,
        #[serde(default)]
        bands: Vec<EqBand>,
    },
}

fn default_enabled() -> bool {
    true
}

impl TryFrom<RawEffectParameters> for EffectParameters {
    type Error = ParameterError;

    fn try_from(raw: RawEffectParameters) -> Result<Self, Self::Error> {
        match raw {
            RawEffectParameters::NoiseCancellation { enabled, strength } => {
                Self::noise_cancellation(enabled, strength)
            }
            RawEffectParameters::EchoCancellation { enabled, strength } => {
                Self::echo_cancellation(enabled, strength)
            }
            RawEffectParameters::Amplification { enabled, gain_db } => {
                Self::amplification(enabled, gain_db)
            }
            RawEffectParameters::Normalization { enabled, strength } => {
                Self::normalization(enabled, strength)
            }
            RawEffectParameters::Compression { enabled, strength } => {
                Self::compression(enabled, strength)
            }
            RawEffectParameters::Reverb {
                enabled,
                preset,
                wet_level,
                dry_level,
            } => Self::reverb(enabled, preset, wet_level, dry_level),
            RawEffectParameters::Equalization { enabled, bands } => {
                Self::equalization(enabled, bands)
            }
        }
    }
}

impl From<EffectParameters> for RawEffectParameters {
    fn from(params: EffectParameters) -> Self {
        match params {
            EffectParameters::NoiseCancellation(p) => RawEffectParameters::NoiseCancellation {
                enabled: p.enabled,
                strength: p.strength,
            },
            EffectParameters::EchoCancellation(p) => RawEffectParameters::EchoCancellation {
                enabled: p.enabled,
                strength: p.strength,
            },
            EffectParameters::Amplification(p) => RawEffectParameters::Amplification {
                enabled: p.enabled,
                gain_db: p.gain_db,
            },
            EffectParameters::Normalization(p) => RawEffectParameters::Normalization {
                enabled: p.enabled,
                strength: p.strength,
            },
            EffectParameters::Compression(p) => RawEffectParameters::Compression {
                enabled: p.enabled,
                strength: p.strength,
            },
            EffectParameters::Reverb(p) => RawEffectParameters::Reverb {
                enabled: p.enabled,
                preset: p.preset_name,
                wet_level: p.wet_level,
                dry_level: p.dry_level,
            },
            EffectParameters::Equalization(p) => RawEffectParameters::Equalization {
                enabled: p.enabled,
                bands: p.bands,
            },
        }
    }
}

/// One unit of the effect chain
///
/// Stages build their filter state fresh on every call, so the same input
/// and parameters always produce the same output and no audio is retained
/// between invocations.
pub trait EffectStage: Send + Sync {
    /// The kind this stage implements
    fn kind(&self) -> EffectKind;

    /// Process a buffer, returning a new one.
    ///
    /// Disabled parameters yield an unmodified copy. Parameters are
    /// range-checked at construction, so only buffer compatibility is
    /// checked here.
    fn apply(
        &self,
        buffer: &SampleBuffer,
        params: &EffectParameters,
    ) -> Result<SampleBuffer, EffectError>;
}

/// Reject parameters that belong to a different stage
pub(crate) fn mismatch(stage: EffectKind, params: &EffectParameters) -> EffectError {
    EffectError::ParameterMismatch {
        stage,
        found: params.kind(),
    }
}

/// Fail on the first NaN/Inf a stage produced
pub(crate) fn ensure_finite(buffer: SampleBuffer) -> Result<SampleBuffer, EffectError> {
    match buffer.first_non_finite() {
        Some(index) => Err(EffectError::NonFiniteOutput { index }),
        None => Ok(buffer),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_canonical_order() {
        for (i, kind) in EffectKind::ALL.iter().enumerate() {
            assert_eq!(kind.canonical_index(), i);
        }
        assert!(EffectKind::NoiseCancellation < EffectKind::Equalization);
    }

    #[test]
    fn test_strength_out_of_range() {
        let err = EffectParameters::compression(true, 1.5).unwrap_err();
        assert_eq!(
            err,
            ParameterError::OutOfRange {
                effect: EffectKind::Compression,
                param: "strength".to_string(),
                value: 1.5,
                expected: "0 to 1".to_string(),
            }
        );
        assert!(EffectParameters::noise_cancellation(true, f64::NAN).is_err());
    }

    #[test]
    fn test_gain_bounds() {
        assert!(EffectParameters::amplification(true, 20.0).is_ok());
        assert!(EffectParameters::amplification(true, -20.5).is_err());
    }

    #[test]
    fn test_band_validation() {
        let band = EqBand {
            frequency_hz: 0.0,
            gain_db: 3.0,
            q: 1.0,
        };
        assert!(EffectParameters::equalization(true, vec![band]).is_err());
        let band = EqBand {
            frequency_hz: 1000.0,
            gain_db: 3.0,
            q: 0.0,
        };
        assert!(EffectParameters::equalization(true, vec![band]).is_err());
    }

    #[test]
    fn test_blank_preset_rejected() {
        assert_eq!(
            EffectParameters::reverb(true, " ", 0.3, 0.7),
            Err(ParameterError::BlankPresetName)
        );
    }

    #[test]
    fn test_deserialize_validates() {
        let ok: EffectParameters =
            serde_json::from_str(r#"{"kind":"amplification","gain_db":6.0}"#).unwrap();
        assert_eq!(ok.kind(), EffectKind::Amplification);
        assert!(ok.is_enabled());

        let bad = serde_json::from_str::<EffectParameters>(
            r#"{"kind":"amplification","gain_db":60.0}"#,
        );
        assert!(bad.is_err());
    }

    #[test]
    fn test_serialize_uses_tagged_form() {
        let params = EffectParameters::reverb(true, "hall", 0.3, 0.7).unwrap();
        let json = serde_json::to_value(&params).unwrap();
        assert_eq!(json["kind"], "reverb");
        assert_eq!(json["preset"], "hall");
    }

    #[test]
    fn test_applied_strength() {
        let eq = EffectParameters::equalization(
            true,
            vec![
                EqBand {
                    frequency_hz: 100.0,
                    gain_db: -6.0,
                    q: 1.0,
                },
                EqBand {
                    frequency_hz: 5000.0,
                    gain_db: 3.0,
                    q: 1.0,
                },
            ],
        )
        .unwrap();
        assert_eq!(eq.applied_strength(), 6.0);
        assert_eq!(EffectParameters::disabled(EffectKind::Reverb).applied_strength(), 0.0);
    }
}
