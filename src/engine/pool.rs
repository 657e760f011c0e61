//! Multi-stream worker pool
//!
//! `thread_pool_size` workers process frames for any number of streams.
//! Each stream has its own inbox; a stream is scheduled onto the shared job
//! channel only while it has pending frames and no worker owns it, so frames
//! of one stream are processed and emitted strictly in arrival order while
//! independent streams run in parallel.

use std::collections::VecDeque;
use std::sync::Arc;
use std::thread::JoinHandle;

use crossbeam_channel::{select, unbounded, Receiver, Sender};
use parking_lot::{Mutex, RwLock};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::StreamingSettings;
use crate::engine::stream::{CancelHandle, StreamFrame, StreamStats, StreamingController};
use crate::engine::SampleBuffer;
use crate::error::{CoreError, Result};
use crate::pipeline::PipelineOrchestrator;

struct Inbox {
    pending: VecDeque<SampleBuffer>,
    /// A worker owns the stream or it is queued on the job channel
    scheduled: bool,
}

struct StreamState {
    id: Uuid,
    controller: Mutex<StreamingController>,
    inbox: Mutex<Inbox>,
    results: Sender<Result<StreamFrame>>,
    capacity: usize,
}

impl StreamState {
    /// Process pending frames until the inbox is empty
    fn drain(&self) {
        loop {
            let next = {
                let mut inbox = self.inbox.lock();
                match inbox.pending.pop_front() {
                    Some(frame) => frame,
                    None => {
                        inbox.scheduled = false;
                        return;
                    }
                }
            };
            let outcome = self.controller.lock().push_frame(next);
            if self.results.send(outcome).is_err() {
                debug!(stream = %self.id, "Result receiver dropped");
            }
        }
    }
}

fn worker_loop(jobs: Receiver<Arc<StreamState>>, shutdown: Receiver<()>) {
    loop {
        select! {
            recv(jobs) -> job => match job {
                Ok(stream) => stream.drain(),
                Err(_) => break,
            },
            recv(shutdown) -> _ => {
                // Finish streams that were already scheduled
                while let Ok(stream) = jobs.try_recv() {
                    stream.drain();
                }
                break;
            }
        }
    }
}

/// Client side of one stream in a `StreamPool`
pub struct StreamHandle {
    state: Arc<StreamState>,
    jobs: Sender<Arc<StreamState>>,
    results: Receiver<Result<StreamFrame>>,
    cancel: CancelHandle,
    /// Set once the pool starts shutting down
    closed: Arc<RwLock<bool>>,
    /// Disconnects once every worker has exited
    stopped: Receiver<()>,
}

impl StreamHandle {
    pub fn id(&self) -> Uuid {
        self.state.id
    }

    /// Queue a frame.
    ///
    /// Fails with `Backpressure` once `queue_capacity` frames are pending;
    /// the caller decides whether to wait or drop. Fails with `PoolShutdown`
    /// once the pool is shutting down, without queueing the frame.
    pub fn submit(&self, buffer: SampleBuffer) -> Result<()> {
        if self.cancel.is_cancelled() {
            return Err(CoreError::StreamCancelled);
        }

        // Held until the job is sent, so shutdown cannot slip in between
        let closed = self.closed.read();
        if *closed {
            return Err(CoreError::PoolShutdown);
        }

        let schedule = {
            let mut inbox = self.state.inbox.lock();
            if inbox.pending.len() >= self.state.capacity {
                return Err(CoreError::Backpressure {
                    pending: inbox.pending.len(),
                    capacity: self.state.capacity,
                });
            }
            inbox.pending.push_back(buffer);
            !std::mem::replace(&mut inbox.scheduled, true)
        };

        if schedule && self.jobs.send(Arc::clone(&self.state)).is_err() {
            let mut inbox = self.state.inbox.lock();
            inbox.pending.pop_back();
            inbox.scheduled = false;
            return Err(CoreError::PoolShutdown);
        }
        Ok(())
    }

    /// Results in submission order
    pub fn results(&self) -> &Receiver<Result<StreamFrame>> {
        &self.results
    }

    /// Block for the next result.
    ///
    /// Results produced before shutdown are still delivered; once they are
    /// drained, a stopped pool yields `PoolShutdown` instead of blocking.
    pub fn recv(&self) -> Result<StreamFrame> {
        select! {
            recv(self.results) -> frame => frame.map_err(|_| CoreError::PoolShutdown)?,
            recv(self.stopped) -> _ => self
                .results
                .try_recv()
                .map_err(|_| CoreError::PoolShutdown)?,
        }
    }

    /// Frames submitted but not yet picked up by a worker
    pub fn pending(&self) -> usize {
        self.state.inbox.lock().pending.len()
    }

    /// Stop the stream; a frame already in progress completes first
    pub fn cancel(&self) {
        debug!(stream = %self.state.id, "Stream cancelled");
        self.cancel.cancel();
    }

    pub fn cancel_handle(&self) -> CancelHandle {
        self.cancel.clone()
    }

    pub fn stats(&self) -> StreamStats {
        self.state.controller.lock().stats()
    }
}

/// Fixed-size worker pool shared by many streams
pub struct StreamPool {
    orchestrator: Arc<PipelineOrchestrator>,
    settings: StreamingSettings,
    jobs: Sender<Arc<StreamState>>,
    closed: Arc<RwLock<bool>>,
    shutdown: Option<Sender<()>>,
    stopped: Option<Sender<()>>,
    stopped_rx: Receiver<()>,
    workers: Vec<JoinHandle<()>>,
}

impl StreamPool {
    /// Spawn `thread_pool_size` workers
    pub fn new(orchestrator: Arc<PipelineOrchestrator>, settings: StreamingSettings) -> Result<Self> {
        let threads = orchestrator.config().performance().thread_pool_size;
        let (jobs_tx, jobs_rx) = unbounded::<Arc<StreamState>>();
        let (shutdown_tx, shutdown_rx) = unbounded::<()>();
        let (stopped_tx, stopped_rx) = unbounded::<()>();

        let mut workers = Vec::with_capacity(threads);
        for index in 0..threads {
            let jobs = jobs_rx.clone();
            let shutdown = shutdown_rx.clone();
            let handle = std::thread::Builder::new()
                .name(format!("waveline-worker-{index}"))
                .spawn(move || worker_loop(jobs, shutdown))
                .map_err(|e| CoreError::WorkerSpawn {
                    reason: e.to_string(),
                })?;
            workers.push(handle);
        }

        info!(
            threads,
            queue_capacity = settings.queue_capacity,
            "Stream pool started"
        );

        Ok(Self {
            orchestrator,
            settings,
            jobs: jobs_tx,
            closed: Arc::new(RwLock::new(false)),
            shutdown: Some(shutdown_tx),
            stopped: Some(stopped_tx),
            stopped_rx,
            workers,
        })
    }

    /// Register a new stream
    pub fn open_stream(&self) -> Result<StreamHandle> {
        if self.shutdown.is_none() {
            return Err(CoreError::PoolShutdown);
        }

        let controller = StreamingController::new(Arc::clone(&self.orchestrator), &self.settings);
        let cancel = controller.cancel_handle();
        let (results_tx, results_rx) = unbounded();
        let state = Arc::new(StreamState {
            id: Uuid::new_v4(),
            controller: Mutex::new(controller),
            inbox: Mutex::new(Inbox {
                pending: VecDeque::new(),
                scheduled: false,
            }),
            results: results_tx,
            capacity: self.settings.queue_capacity,
        });
        debug!(stream = %state.id, "Stream opened");

        Ok(StreamHandle {
            state,
            jobs: self.jobs.clone(),
            results: results_rx,
            cancel,
            closed: Arc::clone(&self.closed),
            stopped: self.stopped_rx.clone(),
        })
    }

    pub fn thread_count(&self) -> usize {
        self.workers.len()
    }

    /// Finish scheduled work and join all workers
    pub fn shutdown(&mut self) {
        *self.closed.write() = true;
        if self.shutdown.take().is_none() {
            return;
        }
        for worker in self.workers.drain(..) {
            if worker.join().is_err() {
                warn!("Stream worker panicked");
            }
        }
        self.stopped = None;
        info!("Stream pool stopped");
    }
}

impl Drop for StreamPool {
    fn drop(&mut self) {
        self.shutdown();
    }
}
