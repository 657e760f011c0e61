//! Waveline - Audio Signal-Processing Core
//!
//! Waveline applies a fixed chain of effect stages to raw PCM sample
//! buffers and reports what each stage did:
//! 1. Batch processing - one buffer through the full chain
//! 2. Streaming - fixed-size frames under a latency budget, one stream per
//!    controller or many streams on a worker pool
//!
//! # Architecture
//!
//! The core is layered leaf-first:
//! - `engine::buffer` / `engine::format`: sample buffers and the format catalog
//! - `analysis`: pure numeric functions over buffers
//! - `dsp`: the seven effect stages behind the `EffectStage` trait
//! - `pipeline`: the orchestrator running stages in canonical order
//! - `engine::stream` / `engine::pool`: real-time front ends
//!
//! The library performs no file or network I/O. Containers are decoded and
//! encoded by callers; configuration arrives as an already loaded snapshot.

pub mod analysis;
pub mod config;
pub mod dsp;
pub mod engine;
pub mod error;
pub mod pipeline;

pub use analysis::{AnalysisReport, BufferSummary, TrackMetadata};
pub use config::{
    AnalysisSettings, ComputeBackend, CoreConfig, OverloadPolicy, PerformanceSettings,
    PipelineConfig, StreamingSettings,
};
pub use dsp::{EffectKind, EffectParameters, EffectStage, EqBand};
pub use engine::{AudioEngine, SampleBuffer, StreamingController};
pub use error::{CoreError, ErrorKind, Result};
pub use pipeline::{
    EffectOverrides, PipelineOrchestrator, PipelineResult, PipelineState, PipelineWarning,
    StageMetric,
};
