//! PCM sample buffer
//!
//! Samples are stored interleaved: [L0, R0, L1, R1, ...]. The length bounded
//! by `performance.buffer_size` is the total interleaved sample count.

use crate::error::BufferError;

/// Default maximum buffer size in samples
pub const DEFAULT_MAX_BUFFER_SIZE: usize = 4096;

/// Interleaved, normalized floating-point PCM buffer
///
/// Buffers are value-like: stages hand off a fresh buffer rather than keeping
/// a reference to the one they were given.
#[derive(Clone, Debug, PartialEq)]
pub struct SampleBuffer {
    /// Interleaved sample data, conventionally in [-1.0, 1.0]
    samples: Vec<f32>,
    /// Sample rate in Hz
    sample_rate: u32,
    /// Number of interleaved channels
    channels: u16,
}

impl SampleBuffer {
    /// Create a buffer from interleaved samples
    ///
    /// An empty buffer is constructible; [`validate_buffer`] rejects it.
    pub fn new(samples: Vec<f32>, sample_rate: u32, channels: u16) -> Result<Self, BufferError> {
        if sample_rate == 0 {
            return Err(BufferError::InvalidSampleRate { sample_rate });
        }
        if channels == 0 {
            return Err(BufferError::InvalidChannelCount { channels });
        }
        if samples.len() % channels as usize != 0 {
            return Err(BufferError::ChannelMismatch {
                len: samples.len(),
                channels,
            });
        }
        Ok(Self {
            samples,
            sample_rate,
            channels,
        })
    }

    /// Create a mono buffer
    pub fn mono(samples: Vec<f32>, sample_rate: u32) -> Result<Self, BufferError> {
        Self::new(samples, sample_rate, 1)
    }

    /// Create a silent buffer with the given number of frames
    pub fn silence(frames: usize, sample_rate: u32, channels: u16) -> Result<Self, BufferError> {
        Self::new(vec![0.0; frames * channels as usize], sample_rate, channels)
    }

    /// Total number of interleaved samples
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    /// Check if the buffer holds no samples
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Number of frames (samples per channel)
    pub fn frames(&self) -> usize {
        self.samples.len() / self.channels as usize
    }

    /// Sample rate in Hz
    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Number of channels
    pub fn channels(&self) -> u16 {
        self.channels
    }

    /// Nyquist frequency in Hz
    pub fn nyquist(&self) -> f64 {
        self.sample_rate as f64 / 2.0
    }

    /// Duration in seconds
    pub fn duration_secs(&self) -> f64 {
        self.frames() as f64 / self.sample_rate as f64
    }

    /// Read-only view of the interleaved samples
    pub fn samples(&self) -> &[f32] {
        &self.samples
    }

    /// Mutable view of the interleaved samples
    pub fn samples_mut(&mut self) -> &mut [f32] {
        &mut self.samples
    }

    /// Consume the buffer and return its samples
    pub fn into_samples(self) -> Vec<f32> {
        self.samples
    }

    /// Get a sample at the given frame and channel
    pub fn get(&self, frame: usize, channel: usize) -> Option<f32> {
        if channel < self.channels as usize {
            self.samples.get(frame * self.channels as usize + channel).copied()
        } else {
            None
        }
    }

    /// Copy one channel out of the interleaved data
    pub fn channel(&self, channel: usize) -> Vec<f32> {
        self.samples
            .iter()
            .skip(channel)
            .step_by(self.channels as usize)
            .copied()
            .collect()
    }

    /// Build a new buffer of the same shape from replacement samples
    pub fn with_samples(&self, samples: Vec<f32>) -> Result<Self, BufferError> {
        Self::new(samples, self.sample_rate, self.channels)
    }

    /// Build a new buffer by mapping every sample
    pub fn map_samples(&self, f: impl Fn(f32) -> f32) -> Self {
        Self {
            samples: self.samples.iter().map(|&s| f(s)).collect(),
            sample_rate: self.sample_rate,
            channels: self.channels,
        }
    }

    /// Build a new buffer from per-channel vectors, which must all have the same length
    pub fn from_channels(
        channels: &[Vec<f32>],
        sample_rate: u32,
    ) -> Result<Self, BufferError> {
        let num_channels = u16::try_from(channels.len())
            .map_err(|_| BufferError::InvalidChannelCount { channels: u16::MAX })?;
        let frames = channels.first().map(Vec::len).unwrap_or(0);
        if let Some((index, ragged)) = channels
            .iter()
            .enumerate()
            .find(|(_, channel)| channel.len() != frames)
        {
            return Err(BufferError::RaggedChannels {
                channel: index,
                len: ragged.len(),
                expected: frames,
            });
        }
        let mut samples = Vec::with_capacity(frames * channels.len());
        for frame in 0..frames {
            for channel in channels {
                samples.push(channel[frame]);
            }
        }
        Self::new(samples, sample_rate, num_channels)
    }

    /// Index of the first NaN/Inf sample, if any
    pub fn first_non_finite(&self) -> Option<usize> {
        self.samples.iter().position(|s| !s.is_finite())
    }
}

/// Validate a buffer against the configured maximum size.
///
/// Oversized buffers are rejected rather than chunked; chunking is the
/// caller's responsibility.
pub fn validate_buffer(buffer: &SampleBuffer, max_len: usize) -> Result<(), BufferError> {
    if buffer.is_empty() {
        return Err(BufferError::EmptyBuffer);
    }
    if buffer.len() > max_len {
        return Err(BufferError::BufferTooLarge {
            len: buffer.len(),
            max: max_len,
        });
    }
    if let Some(index) = buffer.first_non_finite() {
        return Err(BufferError::NonFiniteSample { index });
    }
    Ok(())
}
