//! Configuration snapshot
//!
//! `CoreConfig` is produced by an external loader and handed to the engine
//! once. Nothing here reads files or the environment; the snapshot is only
//! deserialized and re-validated.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::dsp::{
    default_reverb_presets, EffectKind, EffectParameters, NamedReverbPreset, ReverbPresets,
};
use crate::engine::buffer::DEFAULT_MAX_BUFFER_SIZE;
use crate::engine::format::{
    default_formats, default_quality_presets, FormatDescriptor, FormatRegistry,
    NamedQualityPreset, QualityPresets,
};
use crate::error::ConfigError;

/// Upper bound on worker threads
pub const MAX_THREAD_POOL_SIZE: usize = 256;

/// Upper bound on the configurable buffer size, in samples
pub const MAX_BUFFER_SIZE: usize = 1_048_576;

fn invalid(field: &'static str, value: impl ToString, expected: &str) -> ConfigError {
    ConfigError::InvalidSetting {
        field,
        value: value.to_string(),
        expected: expected.to_string(),
    }
}

/// Where stage arithmetic runs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ComputeBackend {
    Cpu,
}

impl ComputeBackend {
    pub fn name(self) -> &'static str {
        match self {
            ComputeBackend::Cpu => "cpu",
        }
    }
}

/// Performance settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PerformanceSettings {
    /// Worker threads, i.e. streams processed concurrently
    pub thread_pool_size: usize,
    /// Maximum batch buffer length and exact streaming frame length
    pub buffer_size: usize,
    pub use_gpu: bool,
    pub gpu_memory_limit_mb: u64,
}

impl Default for PerformanceSettings {
    fn default() -> Self {
        Self {
            thread_pool_size: 4,
            buffer_size: DEFAULT_MAX_BUFFER_SIZE,
            use_gpu: false,
            gpu_memory_limit_mb: 512,
        }
    }
}

impl PerformanceSettings {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(1..=MAX_THREAD_POOL_SIZE).contains(&self.thread_pool_size) {
            return Err(invalid(
                "thread_pool_size",
                self.thread_pool_size,
                "1 to 256",
            ));
        }
        if !(1..=MAX_BUFFER_SIZE).contains(&self.buffer_size) {
            return Err(invalid("buffer_size", self.buffer_size, "1 to 1048576"));
        }
        if self.use_gpu && self.gpu_memory_limit_mb == 0 {
            return Err(invalid(
                "gpu_memory_limit_mb",
                self.gpu_memory_limit_mb,
                "> 0 when use_gpu is set",
            ));
        }
        Ok(())
    }

    /// Backend actually used; only the CPU backend is built in
    pub fn compute_backend(&self) -> ComputeBackend {
        ComputeBackend::Cpu
    }

    /// GPU was requested but cannot be honoured
    pub fn gpu_unavailable(&self) -> bool {
        self.use_gpu && self.compute_backend() == ComputeBackend::Cpu
    }
}

/// What the streaming controller does under sustained overload
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum OverloadPolicy {
    /// Process every frame, flagging late ones
    #[default]
    ProcessAll,
    /// Drop frames once this many consecutive frames were late
    DropFrames { after_consecutive_late: u32 },
    /// Return input unprocessed once this many consecutive frames were late
    PassThrough { after_consecutive_late: u32 },
}

impl OverloadPolicy {
    /// Consecutive late frames that trigger the policy, if any
    pub fn threshold(&self) -> Option<u32> {
        match self {
            OverloadPolicy::ProcessAll => None,
            OverloadPolicy::DropFrames {
                after_consecutive_late,
            }
            | OverloadPolicy::PassThrough {
                after_consecutive_late,
            } => Some(*after_consecutive_late),
        }
    }
}

/// Real-time streaming settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamingSettings {
    /// Soft deadline per frame; exceeding it marks the frame late
    pub latency_target_ms: u64,
    /// Hard deadline per frame; exceeding it aborts the frame
    pub hard_timeout_ms: Option<u64>,
    pub overload_policy: OverloadPolicy,
    /// Pending frames per stream in the worker pool
    pub queue_capacity: usize,
}

impl Default for StreamingSettings {
    fn default() -> Self {
        Self {
            latency_target_ms: 50,
            hard_timeout_ms: None,
            overload_policy: OverloadPolicy::ProcessAll,
            queue_capacity: 8,
        }
    }
}

impl StreamingSettings {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.latency_target_ms == 0 {
            return Err(invalid("latency_target_ms", 0, "> 0"));
        }
        if let Some(hard) = self.hard_timeout_ms {
            if hard < self.latency_target_ms {
                return Err(invalid(
                    "hard_timeout_ms",
                    hard,
                    &format!(">= latency_target_ms ({})", self.latency_target_ms),
                ));
            }
        }
        if self.overload_policy.threshold() == Some(0) {
            return Err(invalid("overload_policy.after_consecutive_late", 0, ">= 1"));
        }
        if self.queue_capacity == 0 {
            return Err(invalid("queue_capacity", 0, ">= 1"));
        }
        Ok(())
    }

    pub fn latency_target(&self) -> Duration {
        Duration::from_millis(self.latency_target_ms)
    }

    pub fn hard_timeout(&self) -> Option<Duration> {
        self.hard_timeout_ms.map(Duration::from_millis)
    }
}

/// Analysis presentation settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisSettings {
    /// Number of waveform points produced by `analyze`
    pub waveform_width: usize,
}

impl Default for AnalysisSettings {
    fn default() -> Self {
        Self {
            waveform_width: 100,
        }
    }
}

/// Canonicalized effect chain plus performance settings
///
/// Always holds exactly one parameter set per effect kind, in canonical
/// order. Immutable once built; a change means building a new one.
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineConfig {
    stages: Vec<EffectParameters>,
    performance: PerformanceSettings,
}

impl PipelineConfig {
    /// Sort into canonical order and fill missing kinds with disabled stages
    pub fn new(
        effects: Vec<EffectParameters>,
        performance: PerformanceSettings,
    ) -> Result<Self, ConfigError> {
        performance.validate()?;

        let mut slots: Vec<Option<EffectParameters>> = vec![None; EffectKind::ALL.len()];
        for params in effects {
            let kind = params.kind();
            let slot = &mut slots[kind.canonical_index()];
            if slot.is_some() {
                return Err(ConfigError::DuplicateStage { kind });
            }
            *slot = Some(params);
        }

        let stages = slots
            .into_iter()
            .zip(EffectKind::ALL)
            .map(|(slot, kind)| slot.unwrap_or_else(|| EffectParameters::disabled(kind)))
            .collect();

        Ok(Self {
            stages,
            performance,
        })
    }

    /// Stage parameters in canonical order
    pub fn stages(&self) -> &[EffectParameters] {
        &self.stages
    }

    pub fn stage(&self, kind: EffectKind) -> &EffectParameters {
        &self.stages[kind.canonical_index()]
    }

    pub fn performance(&self) -> &PerformanceSettings {
        &self.performance
    }

    /// Number of enabled stages
    pub fn enabled_count(&self) -> usize {
        self.stages.iter().filter(|p| p.is_enabled()).count()
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            stages: EffectKind::ALL
                .iter()
                .map(|&kind| EffectParameters::disabled(kind))
                .collect(),
            performance: PerformanceSettings::default(),
        }
    }
}

/// Complete configuration snapshot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CoreConfig {
    pub effects: Vec<EffectParameters>,
    pub quality_presets: Vec<NamedQualityPreset>,
    pub reverb_presets: Vec<NamedReverbPreset>,
    pub formats: Vec<FormatDescriptor>,
    pub performance: PerformanceSettings,
    pub streaming: StreamingSettings,
    pub analysis: AnalysisSettings,
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            effects: Vec::new(),
            quality_presets: default_quality_presets(),
            reverb_presets: default_reverb_presets(),
            formats: default_formats(),
            performance: PerformanceSettings::default(),
            streaming: StreamingSettings::default(),
            analysis: AnalysisSettings::default(),
        }
    }
}

impl CoreConfig {
    /// Parse a JSON snapshot
    ///
    /// Effect parameters are range-checked while parsing; call
    /// [`CoreConfig::validate`] for the cross-field checks.
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn from_json_value(value: serde_json::Value) -> Result<Self, ConfigError> {
        Ok(serde_json::from_value(value)?)
    }

    pub fn to_json_string(&self) -> Result<String, ConfigError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Re-validate every section and cross-reference
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.streaming.validate()?;
        if self.analysis.waveform_width == 0 {
            return Err(invalid("analysis.waveform_width", 0, ">= 1"));
        }
        self.format_registry()?;
        self.quality_preset_table()?;
        self.reverb_preset_table()?;
        self.pipeline_config()?;
        Ok(())
    }

    pub fn format_registry(&self) -> Result<FormatRegistry, ConfigError> {
        FormatRegistry::new(self.formats.clone())
    }

    pub fn quality_preset_table(&self) -> Result<QualityPresets, ConfigError> {
        QualityPresets::new(self.quality_presets.clone())
    }

    /// Build the reverb preset table and check configured stages resolve
    pub fn reverb_preset_table(&self) -> Result<ReverbPresets, ConfigError> {
        let presets = ReverbPresets::new(self.reverb_presets.clone())?;
        for params in &self.effects {
            if let EffectParameters::Reverb(reverb) = params {
                if !presets.contains(reverb.preset_name()) {
                    return Err(ConfigError::UnknownReverbPreset {
                        name: reverb.preset_name().to_string(),
                    });
                }
            }
        }
        Ok(presets)
    }

    pub fn pipeline_config(&self) -> Result<PipelineConfig, ConfigError> {
        PipelineConfig::new(self.effects.clone(), self.performance.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ParameterError;
    use pretty_assertions::assert_eq;
    use test_case::test_case;

    #[test]
    fn test_pipeline_config_canonicalizes() {
        let config = PipelineConfig::new(
            vec![
                EffectParameters::equalization(true, Vec::new()).unwrap(),
                EffectParameters::noise_cancellation(true, 0.5).unwrap(),
            ],
            PerformanceSettings::default(),
        )
        .unwrap();

        let kinds: Vec<EffectKind> = config.stages().iter().map(|p| p.kind()).collect();
        assert_eq!(kinds, EffectKind::ALL.to_vec());
        assert_eq!(config.enabled_count(), 2);
        assert!(!config.stage(EffectKind::Reverb).is_enabled());
    }

    #[test]
    fn test_duplicate_stage_rejected() {
        let result = PipelineConfig::new(
            vec![
                EffectParameters::compression(true, 0.2).unwrap(),
                EffectParameters::compression(true, 0.4).unwrap(),
            ],
            PerformanceSettings::default(),
        );
        assert!(matches!(
            result,
            Err(ConfigError::DuplicateStage {
                kind: EffectKind::Compression
            })
        ));
    }

    #[test_case(0, 4096, false, 512, "thread_pool_size" ; "zero threads")]
    #[test_case(257, 4096, false, 512, "thread_pool_size" ; "too many threads")]
    #[test_case(4, 0, false, 512, "buffer_size" ; "zero buffer")]
    #[test_case(4, 2_000_000, false, 512, "buffer_size" ; "huge buffer")]
    #[test_case(4, 4096, true, 0, "gpu_memory_limit_mb" ; "gpu without memory")]
    fn test_performance_bounds(
        thread_pool_size: usize,
        buffer_size: usize,
        use_gpu: bool,
        gpu_memory_limit_mb: u64,
        expected_field: &str,
    ) {
        let settings = PerformanceSettings {
            thread_pool_size,
            buffer_size,
            use_gpu,
            gpu_memory_limit_mb,
        };
        match settings.validate() {
            Err(ConfigError::InvalidSetting { field, .. }) => assert_eq!(field, expected_field),
            other => panic!("expected InvalidSetting, got {other:?}"),
        }
    }

    #[test]
    fn test_streaming_bounds() {
        let mut settings = StreamingSettings {
            hard_timeout_ms: Some(10),
            ..StreamingSettings::default()
        };
        assert!(settings.validate().is_err());

        settings.hard_timeout_ms = Some(80);
        assert!(settings.validate().is_ok());
        assert_eq!(settings.hard_timeout(), Some(Duration::from_millis(80)));

        settings.overload_policy = OverloadPolicy::DropFrames {
            after_consecutive_late: 0,
        };
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_from_json_with_defaults() {
        let config = CoreConfig::from_json_str(
            r#"{
                "effects": [
                    {"kind": "amplification", "gain_db": 6.0},
                    {"kind": "reverb", "preset": "hall", "wet_level": 0.3, "dry_level": 0.9}
                ],
                "performance": {"thread_pool_size": 2},
                "streaming": {"overload_policy": {"mode": "drop_frames", "after_consecutive_late": 3}}
            }"#,
        )
        .unwrap();

        assert_eq!(config.effects.len(), 2);
        assert!(config.effects[0].is_enabled());
        assert_eq!(config.performance.thread_pool_size, 2);
        assert_eq!(config.performance.buffer_size, DEFAULT_MAX_BUFFER_SIZE);
        assert_eq!(
            config.streaming.overload_policy,
            OverloadPolicy::DropFrames {
                after_consecutive_late: 3
            }
        );
        assert_eq!(config.quality_presets.len(), 3);
        config.validate().unwrap();
    }

    #[test]
    fn test_out_of_range_parameter_fails_parse() {
        let result = CoreConfig::from_json_str(
            r#"{"effects": [{"kind": "compression", "strength": 1.5}]}"#,
        );
        assert!(matches!(result, Err(ConfigError::Parse(_))));

        // The same bound via the constructor
        assert!(matches!(
            EffectParameters::compression(true, 1.5),
            Err(ParameterError::OutOfRange { .. })
        ));
    }

    #[test]
    fn test_unknown_reverb_preset() {
        let config = CoreConfig {
            effects: vec![EffectParameters::reverb(true, "cathedral", 0.3, 1.0).unwrap()],
            ..CoreConfig::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::UnknownReverbPreset { .. })
        ));
    }

    #[test]
    fn test_json_round_trip() {
        let config = CoreConfig {
            effects: vec![EffectParameters::normalization(true, 0.8).unwrap()],
            ..CoreConfig::default()
        };
        let json = config.to_json_string().unwrap();
        assert_eq!(CoreConfig::from_json_str(&json).unwrap(), config);
    }

    #[test]
    fn test_gpu_falls_back_to_cpu() {
        let settings = PerformanceSettings {
            use_gpu: true,
            ..PerformanceSettings::default()
        };
        assert_eq!(settings.compute_backend(), ComputeBackend::Cpu);
        assert!(settings.gpu_unavailable());
        assert!(!PerformanceSettings::default().gpu_unavailable());
    }
}
