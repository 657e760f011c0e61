//! DSP effect stages
//!
//! Every stage implements `EffectStage`: a pure transform from an input
//! buffer and validated parameters to a fresh output buffer.

mod chain;
mod compressor;
mod echo;
mod effect;
mod eq;
mod gain;
mod noise;
mod normalize;
pub mod reverb;

pub use chain::EffectChain;
pub use compressor::{Compressor, CompressorSettings};
pub use echo::{estimate_echo, EchoCanceller, EchoEstimate};
pub use effect::{
    AmplificationParams, EffectKind, EffectParameters, EffectStage, EqBand, EqualizationParams,
    RawEffectParameters, ReverbParams, StrengthParams, MAX_BANDS, MAX_GAIN_DB, MIN_GAIN_DB,
};
pub use eq::{BiquadCoeffs, Equalizer};
pub use gain::Amplifier;
pub use noise::{suppression_profile, NoiseCanceller, SuppressionProfile};
pub use normalize::Normalizer;
pub use reverb::{
    default_reverb_presets, NamedReverbPreset, Reverb, ReverbPreset, ReverbPresets,
    DEFAULT_PRESET,
};
