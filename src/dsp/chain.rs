//! Stage chain
//!
//! Effects are processed in canonical order (index 0 first):
//! 1. Noise cancellation
//! 2. Echo cancellation
//! 3. Amplification
//! 4. Normalization
//! 5. Compression
//! 6. Reverb
//! 7. Equalization
//!
//! The order is fixed; configuration only toggles and parameterizes slots.

use std::sync::Arc;

use super::{
    Amplifier, Compressor, EchoCanceller, EffectKind, EffectStage, Equalizer, NoiseCanceller,
    Normalizer, Reverb, ReverbPresets,
};

/// One stage implementation per effect kind, in canonical order
pub struct EffectChain {
    stages: Vec<Box<dyn EffectStage>>,
}

impl EffectChain {
    /// Build the chain; reverb presets are resolved against `presets`
    pub fn new(presets: Arc<ReverbPresets>) -> Self {
        let stages = EffectKind::ALL
            .iter()
            .map(|&kind| -> Box<dyn EffectStage> {
                match kind {
                    EffectKind::NoiseCancellation => Box::new(NoiseCanceller::new()),
                    EffectKind::EchoCancellation => Box::new(EchoCanceller::new()),
                    EffectKind::Amplification => Box::new(Amplifier::new()),
                    EffectKind::Normalization => Box::new(Normalizer::new()),
                    EffectKind::Equalization => Box::new(Equalizer::new()),
                    EffectKind::Compression => Box::new(Compressor::new()),
                    EffectKind::Reverb => Box::new(Reverb::new(Arc::clone(&presets))),
                }
            })
            .collect();
        Self { stages }
    }

    /// Stage for a kind
    pub fn get(&self, kind: EffectKind) -> &dyn EffectStage {
        self.stages[kind.canonical_index()].as_ref()
    }

    /// All stages in processing order
    pub fn iter(&self) -> impl Iterator<Item = &dyn EffectStage> {
        self.stages.iter().map(|s| s.as_ref())
    }

    pub fn len(&self) -> usize {
        self.stages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }
}

impl std::fmt::Debug for EffectChain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list()
            .entries(self.stages.iter().map(|s| s.kind()))
            .finish()
    }
}
