//! Audio engine
//!
//! Buffer and format primitives, the streaming front ends, and the
//! `AudioEngine` facade that wires them together from one `CoreConfig`.

pub mod buffer;
pub mod format;
pub mod pool;
pub mod stream;

use std::sync::Arc;

use tracing::info;

pub use buffer::{validate_buffer, SampleBuffer, DEFAULT_MAX_BUFFER_SIZE};
pub use format::{
    normalize_extension, FormatDescription, FormatDescriptor, FormatRegistry, NamedQualityPreset,
    QualityPreset, QualityPresets,
};
pub use pool::{StreamHandle, StreamPool};
pub use stream::{CancelHandle, FrameOutcome, StreamFrame, StreamStats, StreamingController};

use crate::analysis::{preview, AnalysisReport};
use crate::config::CoreConfig;
use crate::dsp::ReverbPresets;
use crate::error::{FormatError, Result};
use crate::pipeline::{EffectOverrides, PipelineOrchestrator, PipelineResult};

/// Entry point for collaborators: batch processing, streaming, analysis
/// and format queries over one validated configuration
#[derive(Debug)]
pub struct AudioEngine {
    config: CoreConfig,
    formats: FormatRegistry,
    quality_presets: QualityPresets,
    reverb_presets: Arc<ReverbPresets>,
    orchestrator: Arc<PipelineOrchestrator>,
}

impl AudioEngine {
    /// Validate the snapshot and build every component
    pub fn new(config: CoreConfig) -> Result<Self> {
        config.validate()?;

        let formats = config.format_registry()?;
        let quality_presets = config.quality_preset_table()?;
        let reverb_presets = Arc::new(config.reverb_preset_table()?);
        let orchestrator = Arc::new(PipelineOrchestrator::new(
            config.pipeline_config()?,
            Arc::clone(&reverb_presets),
        ));

        info!(
            formats = formats.len(),
            quality_presets = quality_presets.list().len(),
            reverb_presets = reverb_presets.list().len(),
            "Audio engine initialized"
        );

        Ok(Self {
            config,
            formats,
            quality_presets,
            reverb_presets,
            orchestrator,
        })
    }

    pub fn config(&self) -> &CoreConfig {
        &self.config
    }

    /// Shared orchestrator, for callers that drive it directly
    pub fn orchestrator(&self) -> Arc<PipelineOrchestrator> {
        Arc::clone(&self.orchestrator)
    }

    pub fn reverb_presets(&self) -> &ReverbPresets {
        &self.reverb_presets
    }

    pub fn formats(&self) -> &FormatRegistry {
        &self.formats
    }

    /// Batch processing; buffers longer than `buffer_size` are rejected
    pub fn process(
        &self,
        buffer: SampleBuffer,
        overrides: Option<&EffectOverrides>,
    ) -> Result<PipelineResult> {
        self.orchestrator.process(buffer, overrides)
    }

    /// Summary plus waveform for preview and upload collaborators.
    ///
    /// Analysis has no length limit. The waveform is capped at one point
    /// per sample for buffers shorter than the configured width.
    pub fn analyze(&self, buffer: &SampleBuffer) -> Result<AnalysisReport> {
        validate_buffer(buffer, usize::MAX)?;
        let width = self.config.analysis.waveform_width.min(buffer.len());
        Ok(preview(buffer, width)?)
    }

    /// A fresh streaming controller sharing this engine's orchestrator
    pub fn streaming_controller(&self) -> StreamingController {
        StreamingController::new(self.orchestrator(), &self.config.streaming)
    }

    /// Start a worker pool of `thread_pool_size` threads
    pub fn stream_pool(&self) -> Result<StreamPool> {
        StreamPool::new(self.orchestrator(), self.config.streaming.clone())
    }

    pub fn lookup_format(&self, extension: &str) -> Option<&FormatDescriptor> {
        self.formats.lookup_format(extension)
    }

    pub fn is_format_supported(&self, extension: &str) -> bool {
        self.formats.is_format_supported(extension)
    }

    pub fn describe_format(&self, extension: &str) -> std::result::Result<FormatDescription, FormatError> {
        self.formats.describe_format(extension)
    }

    /// Request-path check: blank extensions are rejected before lookup
    pub fn check_request_extension(
        &self,
        extension: &str,
    ) -> std::result::Result<&FormatDescriptor, FormatError> {
        self.formats.check_request_extension(extension)
    }

    pub fn validate_stream_format(
        &self,
        extension: &str,
        sample_rate: u32,
        channels: u16,
    ) -> std::result::Result<(), FormatError> {
        self.formats
            .validate_stream_format(extension, sample_rate, channels)
    }

    pub fn list_quality_presets(&self) -> &[NamedQualityPreset] {
        self.quality_presets.list()
    }

    pub fn quality_preset(&self, name: &str) -> Option<&QualityPreset> {
        self.quality_presets.get(name)
    }
}
