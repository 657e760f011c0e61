//! Error handling for Waveline
//!
//! Every failure is a structured value carrying enough context (stage,
//! parameter, bound) to reproduce it in a test. The core never retries.

use thiserror::Error;

use crate::analysis::BufferSummary;
use crate::dsp::EffectKind;

/// Result type alias for Waveline operations
pub type Result<T> = std::result::Result<T, CoreError>;

/// Coarse error taxonomy shared by every error in the crate
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Bad buffer shape, out-of-range parameter, unknown preset/format
    Validation,
    /// Malformed configuration, detected at construction only
    Configuration,
    /// A stage failed during execution
    Processing,
    /// Hard real-time deadline exceeded
    Timeout,
}

/// Sample buffer shape errors
#[derive(Error, Debug, Clone, PartialEq)]
pub enum BufferError {
    #[error("Buffer contains no samples")]
    EmptyBuffer,

    #[error("Buffer too large: {len} samples (maximum {max})")]
    BufferTooLarge { len: usize, max: usize },

    #[error("Invalid sample rate: {sample_rate} Hz")]
    InvalidSampleRate { sample_rate: u32 },

    #[error("Invalid channel count: {channels}")]
    InvalidChannelCount { channels: u16 },

    #[error("Sample count {len} is not divisible by channel count {channels}")]
    ChannelMismatch { len: usize, channels: u16 },

    #[error("Channel {channel} has {len} samples, expected {expected}")]
    RaggedChannels {
        channel: usize,
        len: usize,
        expected: usize,
    },

    #[error("Non-finite sample at index {index}")]
    NonFiniteSample { index: usize },
}

/// Format registry errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FormatError {
    #[error("Invalid file extension: {extension:?}")]
    InvalidExtension { extension: String },

    #[error("Unsupported audio format: {extension}")]
    UnsupportedFormat { extension: String },

    #[error("Stream incompatible with format {extension}: {reason}")]
    IncompatibleStream { extension: String, reason: String },
}

/// Effect parameter validation errors (raised at construction time)
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ParameterError {
    #[error("Invalid {effect} parameter '{param}': {value} (expected {expected})")]
    OutOfRange {
        effect: EffectKind,
        param: String,
        value: f64,
        expected: String,
    },

    #[error("Reverb preset name must not be blank")]
    BlankPresetName,

    #[error("Too many equalizer bands: {count} (maximum {max})")]
    TooManyBands { count: usize, max: usize },
}

/// Errors raised by a single effect stage while processing
#[derive(Error, Debug, Clone, PartialEq)]
pub enum EffectError {
    #[error("Stage {stage} received parameters for {found}")]
    ParameterMismatch { stage: EffectKind, found: EffectKind },

    #[error("Band {band} at {frequency_hz} Hz is at or above Nyquist ({nyquist_hz} Hz)")]
    NyquistViolation {
        band: usize,
        frequency_hz: f64,
        nyquist_hz: f64,
    },

    #[error("Unknown reverb preset: {name}")]
    UnknownPreset { name: String },

    #[error("Stage produced a non-finite sample at index {index}")]
    NonFiniteOutput { index: usize },

    #[error(transparent)]
    Buffer(#[from] BufferError),
}

/// Analysis module errors
#[derive(Error, Debug, Clone, PartialEq)]
pub enum AnalysisError {
    #[error("Invalid waveform width {width} for {len} samples")]
    InvalidWidth { width: usize, len: usize },

    #[error("Invalid gain: {linear} (linear gain must be strictly positive)")]
    InvalidGain { linear: f64 },

    #[error("Invalid sample rate: {sample_rate} Hz")]
    InvalidSampleRate { sample_rate: u32 },

    #[error("Invalid channel count: {channels}")]
    InvalidChannelCount { channels: u16 },

    #[error("Invalid metadata field '{field}': {reason}")]
    InvalidMetadata { field: &'static str, reason: String },
}

/// Configuration errors, detected when a snapshot is turned into live objects
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Effect stage configured more than once: {kind}")]
    DuplicateStage { kind: EffectKind },

    #[error("Invalid setting '{field}': {value} (expected {expected})")]
    InvalidSetting {
        field: &'static str,
        value: String,
        expected: String,
    },

    #[error("Duplicate format extension: {extension}")]
    DuplicateFormat { extension: String },

    #[error("Invalid format descriptor '{extension}': {reason}")]
    InvalidFormat { extension: String, reason: String },

    #[error("Duplicate quality preset: {name}")]
    DuplicateQualityPreset { name: String },

    #[error("Invalid quality preset '{name}': {reason}")]
    InvalidQualityPreset { name: String, reason: String },

    #[error("Duplicate reverb preset: {name}")]
    DuplicateReverbPreset { name: String },

    #[error("Invalid reverb preset '{name}': {reason}")]
    InvalidReverbPreset { name: String, reason: String },

    #[error("Reverb stage references unknown preset: {name}")]
    UnknownReverbPreset { name: String },

    #[error(transparent)]
    Parameter(#[from] ParameterError),

    #[error("Configuration parse error: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Umbrella error returned by the public entry points
#[derive(Error, Debug)]
pub enum CoreError {
    #[error(transparent)]
    Buffer(#[from] BufferError),

    #[error(transparent)]
    Format(#[from] FormatError),

    #[error(transparent)]
    Parameter(#[from] ParameterError),

    #[error(transparent)]
    Analysis(#[from] AnalysisError),

    #[error(transparent)]
    Configuration(#[from] ConfigError),

    #[error("Stage {stage} (#{stage_index}) failed: {source}")]
    Processing {
        stage: EffectKind,
        stage_index: usize,
        #[source]
        source: EffectError,
        /// Summary of the buffer the failing stage received
        input: BufferSummary,
    },

    #[error("Processing timeout after {elapsed_micros} us (limit {limit_micros} us, {completed_stages} stages completed)")]
    Timeout {
        elapsed_micros: u64,
        limit_micros: u64,
        completed_stages: usize,
    },

    #[error("Buffer size mismatch: expected {expected} samples, got {actual}")]
    BufferSizeMismatch { expected: usize, actual: usize },

    #[error("Stream has been cancelled")]
    StreamCancelled,

    #[error("Stream queue full: {pending} frames pending (capacity {capacity})")]
    Backpressure { pending: usize, capacity: usize },

    #[error("Stream pool has shut down")]
    PoolShutdown,

    #[error("Failed to start stream worker: {reason}")]
    WorkerSpawn { reason: String },
}

impl CoreError {
    /// Map this error onto the crate-wide taxonomy
    pub fn kind(&self) -> ErrorKind {
        match self {
            CoreError::Configuration(_) => ErrorKind::Configuration,
            CoreError::Processing { .. }
            | CoreError::PoolShutdown
            | CoreError::WorkerSpawn { .. } => ErrorKind::Processing,
            CoreError::Timeout { .. } => ErrorKind::Timeout,
            CoreError::Buffer(_)
            | CoreError::Format(_)
            | CoreError::Parameter(_)
            | CoreError::Analysis(_)
            | CoreError::BufferSizeMismatch { .. }
            | CoreError::StreamCancelled
            | CoreError::Backpressure { .. } => ErrorKind::Validation,
        }
    }

    /// Get the error code for this error type
    pub fn error_code(&self) -> &'static str {
        match self {
            CoreError::Buffer(e) => match e {
                BufferError::EmptyBuffer => "EMPTY_BUFFER",
                BufferError::BufferTooLarge { .. } => "BUFFER_TOO_LARGE",
                BufferError::InvalidSampleRate { .. } => "INVALID_SAMPLE_RATE",
                BufferError::InvalidChannelCount { .. } => "INVALID_CHANNEL_COUNT",
                BufferError::ChannelMismatch { .. } => "CHANNEL_MISMATCH",
                BufferError::RaggedChannels { .. } => "RAGGED_CHANNELS",
                BufferError::NonFiniteSample { .. } => "NON_FINITE_SAMPLE",
            },
            CoreError::Format(e) => match e {
                FormatError::InvalidExtension { .. } => "INVALID_EXTENSION",
                FormatError::UnsupportedFormat { .. } => "UNSUPPORTED_FORMAT",
                FormatError::IncompatibleStream { .. } => "INCOMPATIBLE_STREAM",
            },
            CoreError::Parameter(_) => "INVALID_PARAMETER",
            CoreError::Analysis(e) => match e {
                AnalysisError::InvalidWidth { .. } => "INVALID_WIDTH",
                AnalysisError::InvalidGain { .. } => "INVALID_GAIN",
                AnalysisError::InvalidMetadata { .. } => "INVALID_METADATA",
                AnalysisError::InvalidSampleRate { .. }
                | AnalysisError::InvalidChannelCount { .. } => "INVALID_SHAPE",
            },
            CoreError::Configuration(_) => "CONFIGURATION_ERROR",
            CoreError::Processing { source, .. } => match source {
                EffectError::NyquistViolation { .. } => "NYQUIST_VIOLATION",
                EffectError::UnknownPreset { .. } => "UNKNOWN_PRESET",
                EffectError::NonFiniteOutput { .. } => "DSP_OVERFLOW",
                EffectError::ParameterMismatch { .. } => "PARAMETER_MISMATCH",
                EffectError::Buffer(_) => "PROCESSING_ERROR",
            },
            CoreError::Timeout { .. } => "PROCESSING_TIMEOUT",
            CoreError::BufferSizeMismatch { .. } => "BUFFER_SIZE_MISMATCH",
            CoreError::StreamCancelled => "STREAM_CANCELLED",
            CoreError::Backpressure { .. } => "BACKPRESSURE",
            CoreError::PoolShutdown => "POOL_SHUTDOWN",
            CoreError::WorkerSpawn { .. } => "WORKER_SPAWN",
        }
    }

    /// Whether the caller can act on this error by shedding load.
    ///
    /// Everything else is a caller or configuration bug: a deterministic
    /// chain fed the same input fails the same way again.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, CoreError::Timeout { .. } | CoreError::Backpressure { .. })
    }

    /// The failing stage, for processing errors
    pub fn stage(&self) -> Option<EffectKind> {
        match self {
            CoreError::Processing { stage, .. } => Some(*stage),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes() {
        let err = CoreError::from(BufferError::BufferTooLarge { len: 5000, max: 4096 });
        assert_eq!(err.error_code(), "BUFFER_TOO_LARGE");
        assert_eq!(err.kind(), ErrorKind::Validation);
    }

    #[test]
    fn test_timeout_is_recoverable() {
        let err = CoreError::Timeout {
            elapsed_micros: 120_000,
            limit_micros: 100_000,
            completed_stages: 3,
        };
        assert!(err.is_recoverable());
        assert_eq!(err.kind(), ErrorKind::Timeout);
        assert!(!CoreError::StreamCancelled.is_recoverable());
    }

    #[test]
    fn test_config_errors_are_configuration_kind() {
        let err = CoreError::from(ConfigError::DuplicateStage {
            kind: EffectKind::Reverb,
        });
        assert_eq!(err.kind(), ErrorKind::Configuration);
        assert!(err.to_string().contains("reverb"));
    }
}
