//! Real-time streaming controller
//!
//! Wraps the orchestrator for a continuous stream of fixed-size frames.
//! Frames slower than the latency target are flagged late but still
//! returned; what happens under sustained overload is decided by the
//! configured `OverloadPolicy`.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Serialize;
use tracing::{debug, warn};

use crate::config::{OverloadPolicy, StreamingSettings};
use crate::engine::SampleBuffer;
use crate::error::{CoreError, Result};
use crate::pipeline::{PipelineOrchestrator, PipelineResult, PipelineWarning};

/// Cloneable flag that stops a stream between frames
#[derive(Debug, Clone, Default)]
pub struct CancelHandle {
    cancelled: Arc<AtomicBool>,
}

impl CancelHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

/// Per-stream counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StreamStats {
    pub processed: u64,
    pub late: u64,
    pub dropped: u64,
    pub bypassed: u64,
    pub timeouts: u64,
    pub failures: u64,
}

/// What happened to a frame
#[derive(Debug, Clone, PartialEq)]
pub enum FrameOutcome {
    /// Ran through the full chain
    Processed(PipelineResult),
    /// Discarded by `OverloadPolicy::DropFrames`
    Dropped,
    /// Returned unprocessed by `OverloadPolicy::PassThrough`
    Bypassed(SampleBuffer),
}

/// Result of pushing one frame
#[derive(Debug, Clone, PartialEq)]
pub struct StreamFrame {
    /// Arrival order within the stream, starting at 0
    pub sequence: u64,
    /// Processing exceeded the latency target
    pub late: bool,
    pub elapsed_micros: u64,
    pub outcome: FrameOutcome,
}

impl StreamFrame {
    /// Output buffer, unless the frame was dropped
    pub fn output(&self) -> Option<&SampleBuffer> {
        match &self.outcome {
            FrameOutcome::Processed(result) => Some(&result.output),
            FrameOutcome::Bypassed(buffer) => Some(buffer),
            FrameOutcome::Dropped => None,
        }
    }
}

/// Streaming front end for one stream
#[derive(Debug)]
pub struct StreamingController {
    orchestrator: Arc<PipelineOrchestrator>,
    frame_size: usize,
    latency_target: Duration,
    hard_timeout: Option<Duration>,
    policy: OverloadPolicy,
    next_sequence: u64,
    consecutive_late: u32,
    stats: StreamStats,
    cancel: CancelHandle,
}

impl StreamingController {
    /// Frame size is the orchestrator's configured buffer size
    pub fn new(orchestrator: Arc<PipelineOrchestrator>, settings: &StreamingSettings) -> Self {
        let frame_size = orchestrator.max_buffer_size();
        debug!(
            frame_size,
            latency_target_ms = settings.latency_target_ms,
            policy = ?settings.overload_policy,
            "Streaming controller created"
        );
        Self {
            orchestrator,
            frame_size,
            latency_target: settings.latency_target(),
            hard_timeout: settings.hard_timeout(),
            policy: settings.overload_policy,
            next_sequence: 0,
            consecutive_late: 0,
            stats: StreamStats::default(),
            cancel: CancelHandle::new(),
        }
    }

    /// Exact number of samples every frame must carry
    pub fn frame_size(&self) -> usize {
        self.frame_size
    }

    pub fn stats(&self) -> StreamStats {
        self.stats
    }

    pub fn cancel_handle(&self) -> CancelHandle {
        self.cancel.clone()
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Process the next frame of the stream.
    ///
    /// Timeouts and stage failures are reported for this frame only; the
    /// stream stays usable afterwards.
    pub fn push_frame(&mut self, buffer: SampleBuffer) -> Result<StreamFrame> {
        if self.cancel.is_cancelled() {
            return Err(CoreError::StreamCancelled);
        }
        if buffer.len() != self.frame_size {
            return Err(CoreError::BufferSizeMismatch {
                expected: self.frame_size,
                actual: buffer.len(),
            });
        }

        let sequence = self.next_sequence;
        self.next_sequence += 1;

        if let Some(frame) = self.shed_load(sequence, &buffer) {
            return Ok(frame);
        }

        let started = Instant::now();
        let result = match self.hard_timeout {
            Some(limit) => self.orchestrator.process_with_deadline(buffer, None, limit),
            None => self.orchestrator.process(buffer, None),
        };
        let elapsed = started.elapsed();

        let mut result = match result {
            Ok(result) => result,
            Err(e) => {
                if matches!(e, CoreError::Timeout { .. }) {
                    self.stats.timeouts += 1;
                    self.consecutive_late += 1;
                    warn!(sequence, error = %e, "Frame aborted by hard timeout");
                } else {
                    self.stats.failures += 1;
                }
                return Err(e);
            }
        };

        let elapsed_micros = u64::try_from(elapsed.as_micros()).unwrap_or(u64::MAX);
        let late = elapsed > self.latency_target;
        if late {
            self.stats.late += 1;
            self.consecutive_late += 1;
            let target_micros =
                u64::try_from(self.latency_target.as_micros()).unwrap_or(u64::MAX);
            warn!(sequence, elapsed_micros, target_micros, "Late frame");
            result.warnings.push(PipelineWarning::LateFrame {
                elapsed_micros,
                target_micros,
            });
        } else {
            self.consecutive_late = 0;
        }
        self.stats.processed += 1;

        Ok(StreamFrame {
            sequence,
            late,
            elapsed_micros,
            outcome: FrameOutcome::Processed(result),
        })
    }

    /// Apply the overload policy once the late streak reaches its threshold.
    ///
    /// Shedding one frame resets the streak so processing resumes with the
    /// next frame.
    fn shed_load(&mut self, sequence: u64, buffer: &SampleBuffer) -> Option<StreamFrame> {
        let threshold = self.policy.threshold()?;
        if self.consecutive_late < threshold {
            return None;
        }
        self.consecutive_late = 0;

        let outcome = match self.policy {
            OverloadPolicy::DropFrames { .. } => {
                self.stats.dropped += 1;
                warn!(sequence, "Dropping frame under sustained overload");
                FrameOutcome::Dropped
            }
            OverloadPolicy::PassThrough { .. } => {
                self.stats.bypassed += 1;
                warn!(sequence, "Bypassing chain under sustained overload");
                FrameOutcome::Bypassed(buffer.clone())
            }
            OverloadPolicy::ProcessAll => return None,
        };

        Some(StreamFrame {
            sequence,
            late: false,
            elapsed_micros: 0,
            outcome,
        })
    }
}
