//! Pipeline orchestrator
//!
//! Runs the seven-stage chain over one buffer. Per invocation the state
//! machine is `Idle -> Validating -> Running(i of N) -> Completed`, or
//! `Failed` from validation or any stage. Stages run strictly in canonical
//! order and the first failure aborts the rest.

use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Serialize;
use tracing::{debug, info, trace, warn};

use crate::analysis::{peak, summarize};
use crate::config::{ComputeBackend, PipelineConfig};
use crate::dsp::{EffectChain, EffectKind, EffectParameters, ReverbPresets};
use crate::engine::{validate_buffer, SampleBuffer};
use crate::error::{ConfigError, CoreError, Result};

/// Orchestrator state for one invocation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    Idle,
    Validating,
    /// Stage `index` (0-based) of `total` is executing
    Running {
        index: usize,
        total: usize,
        stage: EffectKind,
    },
    Completed,
    /// `stage_index` is `None` when validation failed before any stage ran
    Failed {
        stage_index: Option<usize>,
        error_code: &'static str,
    },
}

/// Non-fatal conditions attached to a result
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PipelineWarning {
    /// A stage produced samples beyond full scale
    Clipping { stage: EffectKind, peak: f64 },
    /// GPU processing was requested but only the CPU backend is available
    GpuUnavailable,
    /// A streaming frame exceeded the latency target
    LateFrame {
        elapsed_micros: u64,
        target_micros: u64,
    },
}

impl fmt::Display for PipelineWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PipelineWarning::Clipping { stage, peak } => {
                write!(f, "{stage} output clips (peak {peak:.3})")
            }
            PipelineWarning::GpuUnavailable => write!(f, "GPU unavailable, processed on CPU"),
            PipelineWarning::LateFrame {
                elapsed_micros,
                target_micros,
            } => write!(
                f,
                "frame took {elapsed_micros} us (target {target_micros} us)"
            ),
        }
    }
}

/// Diagnostics for one stage slot
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StageMetric {
    pub stage: EffectKind,
    pub enabled: bool,
    pub duration_micros: u64,
    /// Strength, gain dB, wet level or max band gain depending on the kind
    pub applied_strength: f64,
}

/// Output of one invocation, owned by the caller
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineResult {
    pub output: SampleBuffer,
    /// One entry per stage kind, in canonical order
    pub stage_metrics: Vec<StageMetric>,
    pub warnings: Vec<PipelineWarning>,
}

impl PipelineResult {
    /// Sum of all stage durations
    pub fn total_micros(&self) -> u64 {
        self.stage_metrics.iter().map(|m| m.duration_micros).sum()
    }

    pub fn has_warnings(&self) -> bool {
        !self.warnings.is_empty()
    }
}

/// Per-invocation parameter replacements
///
/// An override replaces the configured parameters of the same kind for a
/// single call; the pipeline configuration itself never changes.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EffectOverrides {
    params: Vec<EffectParameters>,
}

impl EffectOverrides {
    pub fn new(params: Vec<EffectParameters>) -> std::result::Result<Self, ConfigError> {
        for (i, p) in params.iter().enumerate() {
            if params[..i].iter().any(|q| q.kind() == p.kind()) {
                return Err(ConfigError::DuplicateStage { kind: p.kind() });
            }
        }
        Ok(Self { params })
    }

    pub fn get(&self, kind: EffectKind) -> Option<&EffectParameters> {
        self.params.iter().find(|p| p.kind() == kind)
    }

    pub fn is_empty(&self) -> bool {
        self.params.is_empty()
    }
}

fn micros(duration: Duration) -> u64 {
    u64::try_from(duration.as_micros()).unwrap_or(u64::MAX)
}

/// Executes the effect chain described by a `PipelineConfig`
///
/// Holds no per-invocation state, so one orchestrator can be shared across
/// threads and called concurrently.
#[derive(Debug)]
pub struct PipelineOrchestrator {
    config: PipelineConfig,
    chain: EffectChain,
    backend: ComputeBackend,
    gpu_unavailable: bool,
}

impl PipelineOrchestrator {
    pub fn new(config: PipelineConfig, presets: Arc<ReverbPresets>) -> Self {
        let performance = config.performance();
        let backend = performance.compute_backend();
        let gpu_unavailable = performance.gpu_unavailable();
        if gpu_unavailable {
            warn!(
                gpu_memory_limit_mb = performance.gpu_memory_limit_mb,
                "GPU processing requested but unavailable, using CPU backend"
            );
        }
        info!(
            enabled_stages = config.enabled_count(),
            buffer_size = performance.buffer_size,
            backend = backend.name(),
            "Pipeline orchestrator ready"
        );

        Self {
            config,
            chain: EffectChain::new(presets),
            backend,
            gpu_unavailable,
        }
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn backend(&self) -> ComputeBackend {
        self.backend
    }

    /// Maximum accepted buffer length in samples
    pub fn max_buffer_size(&self) -> usize {
        self.config.performance().buffer_size
    }

    /// Run the chain over a buffer
    pub fn process(
        &self,
        buffer: SampleBuffer,
        overrides: Option<&EffectOverrides>,
    ) -> Result<PipelineResult> {
        self.run(buffer, overrides, None, &mut |_: &PipelineState| {})
    }

    /// Run the chain, reporting every state transition to `observer`
    pub fn process_observed(
        &self,
        buffer: SampleBuffer,
        overrides: Option<&EffectOverrides>,
        observer: &mut dyn FnMut(&PipelineState),
    ) -> Result<PipelineResult> {
        self.run(buffer, overrides, None, observer)
    }

    /// Run the chain, aborting with `Timeout` once `deadline` has elapsed.
    ///
    /// The deadline is checked between stages; a stage in progress always
    /// finishes and no partial buffer is returned on timeout.
    pub fn process_with_deadline(
        &self,
        buffer: SampleBuffer,
        overrides: Option<&EffectOverrides>,
        deadline: Duration,
    ) -> Result<PipelineResult> {
        self.run(buffer, overrides, Some(deadline), &mut |_: &PipelineState| {})
    }

    fn run(
        &self,
        buffer: SampleBuffer,
        overrides: Option<&EffectOverrides>,
        deadline: Option<Duration>,
        observer: &mut dyn FnMut(&PipelineState),
    ) -> Result<PipelineResult> {
        let mut transition = |state: PipelineState| {
            debug!(?state, "Pipeline state");
            observer(&state);
        };

        let started = Instant::now();
        transition(PipelineState::Idle);
        transition(PipelineState::Validating);

        if let Err(e) = validate_buffer(&buffer, self.max_buffer_size()) {
            let error = CoreError::from(e);
            transition(PipelineState::Failed {
                stage_index: None,
                error_code: error.error_code(),
            });
            return Err(error);
        }

        let total = self.chain.len();
        let mut current = buffer;
        let mut stage_metrics = Vec::with_capacity(total);
        let mut warnings = Vec::new();
        if self.gpu_unavailable {
            warnings.push(PipelineWarning::GpuUnavailable);
        }

        for (index, stage) in self.chain.iter().enumerate() {
            if let Some(limit) = deadline {
                let elapsed = started.elapsed();
                if elapsed >= limit {
                    let error = CoreError::Timeout {
                        elapsed_micros: micros(elapsed),
                        limit_micros: micros(limit),
                        completed_stages: index,
                    };
                    transition(PipelineState::Failed {
                        stage_index: Some(index),
                        error_code: error.error_code(),
                    });
                    return Err(error);
                }
            }

            let kind = stage.kind();
            transition(PipelineState::Running { index, total, stage: kind });

            let params = overrides
                .and_then(|o| o.get(kind))
                .unwrap_or_else(|| self.config.stage(kind));

            let stage_start = Instant::now();
            let output = match stage.apply(&current, params) {
                Ok(output) => output,
                Err(source) => {
                    let error = CoreError::Processing {
                        stage: kind,
                        stage_index: index,
                        source,
                        input: summarize(&current),
                    };
                    transition(PipelineState::Failed {
                        stage_index: Some(index),
                        error_code: error.error_code(),
                    });
                    return Err(error);
                }
            };
            let duration_micros = micros(stage_start.elapsed());

            trace!(
                stage = %kind,
                enabled = params.is_enabled(),
                duration_micros,
                "Stage complete"
            );

            if params.is_enabled() {
                let output_peak = peak(output.samples());
                if output_peak > 1.0 {
                    warnings.push(PipelineWarning::Clipping {
                        stage: kind,
                        peak: output_peak,
                    });
                }
            }

            stage_metrics.push(StageMetric {
                stage: kind,
                enabled: params.is_enabled(),
                duration_micros,
                applied_strength: params.applied_strength(),
            });
            current = output;
        }

        if let Some(limit) = deadline {
            let elapsed = started.elapsed();
            if elapsed >= limit {
                let error = CoreError::Timeout {
                    elapsed_micros: micros(elapsed),
                    limit_micros: micros(limit),
                    completed_stages: total,
                };
                transition(PipelineState::Failed {
                    stage_index: None,
                    error_code: error.error_code(),
                });
                return Err(error);
            }
        }

        transition(PipelineState::Completed);
        Ok(PipelineResult {
            output: current,
            stage_metrics,
            warnings,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PerformanceSettings;
    use crate::error::{BufferError, EffectError};
    use pretty_assertions::assert_eq;

    fn orchestrator(effects: Vec<EffectParameters>) -> PipelineOrchestrator {
        let config = PipelineConfig::new(effects, PerformanceSettings::default()).unwrap();
        PipelineOrchestrator::new(config, Arc::new(ReverbPresets::default()))
    }

    fn tone() -> SampleBuffer {
        let samples = (0..1024)
            .map(|i| 0.3 * (i as f32 * 0.07).sin())
            .collect();
        SampleBuffer::mono(samples, 44_100).unwrap()
    }

    #[test]
    fn test_all_disabled_is_passthrough() {
        let input = tone();
        let result = orchestrator(Vec::new()).process(input.clone(), None).unwrap();
        assert_eq!(result.output, input);
        assert_eq!(result.stage_metrics.len(), 7);
        assert!(result.stage_metrics.iter().all(|m| !m.enabled));
        assert!(result.warnings.is_empty());
    }

    #[test]
    fn test_state_transitions() {
        let mut states = Vec::new();
        orchestrator(vec![EffectParameters::amplification(true, 3.0).unwrap()])
            .process_observed(tone(), None, &mut |s: &PipelineState| states.push(*s))
            .unwrap();

        assert_eq!(states[0], PipelineState::Idle);
        assert_eq!(states[1], PipelineState::Validating);
        assert_eq!(
            states[2],
            PipelineState::Running {
                index: 0,
                total: 7,
                stage: EffectKind::NoiseCancellation
            }
        );
        assert_eq!(states.last(), Some(&PipelineState::Completed));
        assert_eq!(states.len(), 2 + 7 + 1);
    }

    #[test]
    fn test_validation_failure_runs_no_stage() {
        let mut states = Vec::new();
        let empty = SampleBuffer::mono(Vec::new(), 44_100).unwrap();
        let err = orchestrator(Vec::new())
            .process_observed(empty, None, &mut |s: &PipelineState| states.push(*s))
            .unwrap_err();

        assert!(matches!(err, CoreError::Buffer(BufferError::EmptyBuffer)));
        assert!(!states
            .iter()
            .any(|s| matches!(s, PipelineState::Running { .. })));
        assert_eq!(
            states.last(),
            Some(&PipelineState::Failed {
                stage_index: None,
                error_code: "EMPTY_BUFFER"
            })
        );
    }

    #[test]
    fn test_stage_failure_reports_context() {
        let band = crate::dsp::EqBand {
            frequency_hz: 30_000.0,
            gain_db: 3.0,
            q: 1.0,
        };
        let pipeline = orchestrator(vec![EffectParameters::equalization(true, vec![band]).unwrap()]);
        let err = pipeline.process(tone(), None).unwrap_err();
        match err {
            CoreError::Processing {
                stage,
                stage_index,
                source,
                input,
            } => {
                assert_eq!(stage, EffectKind::Equalization);
                assert_eq!(stage_index, 6);
                assert!(matches!(source, EffectError::NyquistViolation { band: 0, .. }));
                assert_eq!(input.frames, 1024);
            }
            other => panic!("expected Processing, got {other:?}"),
        }
    }

    #[test]
    fn test_overrides_apply_once() {
        let pipeline = orchestrator(Vec::new());
        let overrides =
            EffectOverrides::new(vec![EffectParameters::amplification(true, 6.0).unwrap()])
                .unwrap();

        let boosted = pipeline.process(tone(), Some(&overrides)).unwrap();
        assert!(boosted.stage_metrics[EffectKind::Amplification.canonical_index()].enabled);
        assert_ne!(boosted.output, tone());

        let plain = pipeline.process(tone(), None).unwrap();
        assert_eq!(plain.output, tone());
    }

    #[test]
    fn test_duplicate_overrides_rejected() {
        let result = EffectOverrides::new(vec![
            EffectParameters::amplification(true, 6.0).unwrap(),
            EffectParameters::amplification(true, 3.0).unwrap(),
        ]);
        assert!(result.is_err());
    }

    #[test]
    fn test_clipping_warning() {
        let pipeline = orchestrator(vec![EffectParameters::amplification(true, 20.0).unwrap()]);
        let result = pipeline.process(tone(), None).unwrap();
        assert!(result.warnings.iter().any(|w| matches!(
            w,
            PipelineWarning::Clipping {
                stage: EffectKind::Amplification,
                ..
            }
        )));
    }

    #[test]
    fn test_zero_deadline_times_out() {
        let err = orchestrator(Vec::new())
            .process_with_deadline(tone(), None, Duration::ZERO)
            .unwrap_err();
        assert!(matches!(
            err,
            CoreError::Timeout {
                completed_stages: 0,
                ..
            }
        ));
        assert!(err.is_recoverable());
    }

    #[test]
    fn test_gpu_request_warns() {
        let performance = PerformanceSettings {
            use_gpu: true,
            ..PerformanceSettings::default()
        };
        let config = PipelineConfig::new(Vec::new(), performance).unwrap();
        let pipeline = PipelineOrchestrator::new(config, Arc::new(ReverbPresets::default()));
        let result = pipeline.process(tone(), None).unwrap();
        assert_eq!(pipeline.backend(), ComputeBackend::Cpu);
        assert_eq!(result.warnings, vec![PipelineWarning::GpuUnavailable]);
    }
}
