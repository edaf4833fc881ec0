//! Decode pipeline lifecycle and the non-blocking push path.
//!
//! ```text
//!  Uninitialized ──initialize()──▶ Initializing ──ok──▶ Running ──stop()──▶ Stopped
//!        ▲                              │
//!        └──────── construction failed ─┘
//! ```
//!
//! [`DecodePipeline::push_frame`] never waits. It checks the phase without
//! locking, then tries the pipeline lock once; if `initialize` or `stop` holds
//! it, the frame is dropped. Skipping a frame on a live stream is always better
//! than stalling the receive thread.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};
use std::time::Instant;

use parking_lot::Mutex;
use tracing::{debug, trace};

use crate::config::PipelineConfig;
use crate::core::buffer_pool::{BufferPool, PoolStats};
use crate::error::{ElementRole, StreamError, StreamResult};
use crate::pipeline::backend::{
    BackendContext, DecodeBackend, FlowResult, PushRejected, QueueLimits,
};
use crate::pipeline::fallback::{CandidateSet, GENERIC_SINK, first_available};
use crate::pipeline::observer::{LogLevel, PipelineObserver, RenderSurface};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u8)]
pub enum PipelinePhase {
    #[default]
    Uninitialized = 0,
    Initializing = 1,
    Running = 2,
    /// Terminal.
    Stopped = 3,
}

impl PipelinePhase {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => PipelinePhase::Initializing,
            2 => PipelinePhase::Running,
            3 => PipelinePhase::Stopped,
            _ => PipelinePhase::Uninitialized,
        }
    }
}

impl fmt::Display for PipelinePhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PipelinePhase::Uninitialized => "uninitialized",
            PipelinePhase::Initializing => "initializing",
            PipelinePhase::Running => "running",
            PipelinePhase::Stopped => "stopped",
        };
        f.write_str(name)
    }
}

/// Pipeline bookkeeping. Only changed while holding the pipeline lock.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PipelineState {
    pub phase: PipelinePhase,
    pub decoder: Option<String>,
    pub sink: Option<String>,
    pub frame_count: u64,
    /// Set by the first successful push.
    pub start_time: Option<Instant>,
    /// Never reverts once set.
    pub has_keyframe: bool,
    /// Never reverts once set.
    pub overlay_bound: bool,
}

/// What happened to one [`DecodePipeline::push_frame`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushOutcome {
    /// The backend took the buffer.
    Pushed,
    /// The backend is shutting down.
    Flushing,
    /// The backend reported an error.
    BackendError,
    /// The pipeline lock was busy.
    Dropped,
    /// Not running, or the application stopped.
    Inactive,
    /// The buffer never reached the backend and went back to the pool.
    Rejected,
}

struct Inner {
    backend: Box<dyn DecodeBackend>,
    state: PipelineState,
    surface: Option<Arc<dyn RenderSurface>>,
    /// A failed overlay attempt has been reported; later retries log at trace level.
    overlay_reported: bool,
}

pub struct DecodePipeline {
    phase: AtomicU8,
    inner: Mutex<Inner>,
    pool: Arc<BufferPool>,
    observer: Arc<dyn PipelineObserver>,
    candidates: CandidateSet,
    limits: QueueLimits,
    log_interval: u64,
}

impl DecodePipeline {
    /// Pipeline with host-default candidates, overridden by `config` where set.
    pub fn new(
        config: &PipelineConfig,
        backend: Box<dyn DecodeBackend>,
        observer: Arc<dyn PipelineObserver>,
    ) -> Self {
        Self::with_candidates(config, CandidateSet::from_config(config), backend, observer)
    }

    pub fn with_candidates(
        config: &PipelineConfig,
        candidates: CandidateSet,
        backend: Box<dyn DecodeBackend>,
        observer: Arc<dyn PipelineObserver>,
    ) -> Self {
        Self {
            phase: AtomicU8::new(PipelinePhase::Uninitialized as u8),
            inner: Mutex::new(Inner {
                backend,
                state: PipelineState::default(),
                surface: None,
                overlay_reported: false,
            }),
            pool: Arc::new(BufferPool::new(
                config.pool_size,
                config.buffer_size,
                config.direct_buffers,
            )),
            observer,
            candidates,
            limits: config.queue_limits(),
            log_interval: config.log_interval_frames.max(1),
        }
    }

    /// Build and start the backend graph.
    ///
    /// `surface` is bound once frames flow, retried on each push until it has a
    /// native handle and the bind succeeds. On failure the backend is torn down,
    /// the pipeline returns to `Uninitialized` and the observer hears about it.
    pub fn initialize(&self, surface: Option<Arc<dyn RenderSurface>>) -> StreamResult<()> {
        let mut inner = self.inner.lock();
        let phase = inner.state.phase;
        if phase != PipelinePhase::Uninitialized {
            return Err(StreamError::state("pipeline", phase.to_string(), "initialize"));
        }

        inner.state.phase = PipelinePhase::Initializing;
        self.set_phase(PipelinePhase::Initializing);
        self.log(
            LogLevel::Info,
            &format!("Initializing decode pipeline ({})", inner.backend.name()),
        );

        match self.build(&mut inner) {
            Ok((decoder, sink)) => {
                inner.state.decoder = Some(decoder.clone());
                inner.state.sink = Some(sink.clone());
                inner.state.phase = PipelinePhase::Running;
                if surface.is_some() {
                    self.log(LogLevel::Debug, "Deferring video overlay setup until first frame");
                }
                inner.surface = surface;
                self.set_phase(PipelinePhase::Running);
                self.log(
                    LogLevel::Info,
                    &format!("Decode pipeline started (decoder: {decoder}, sink: {sink})"),
                );
                Ok(())
            }
            Err(err) => {
                inner.backend.teardown();
                inner.state = PipelineState::default();
                inner.surface = None;
                inner.overlay_reported = false;
                self.set_phase(PipelinePhase::Uninitialized);
                self.log(LogLevel::Error, &format!("Failed to build decode pipeline: {err}"));
                self.observer.on_pipeline_error(&err);
                Err(err)
            }
        }
    }

    fn build(&self, inner: &mut Inner) -> StreamResult<(String, String)> {
        let backend = &mut inner.backend;
        backend.prepare(&BackendContext {
            limits: self.limits,
            pool: Arc::clone(&self.pool),
        })?;

        let decoder = first_available(ElementRole::Decoder, &self.candidates.decoders, |name| {
            backend.create_element(ElementRole::Decoder, name)
        })?;
        self.log(LogLevel::Info, &format!("Using H264 decoder: {decoder}"));

        let sink = first_available(ElementRole::Sink, &self.candidates.sinks, |name| {
            backend.create_element(ElementRole::Sink, name)
        })?;
        if sink == GENERIC_SINK && self.candidates.sinks.len() > 1 {
            self.log(
                LogLevel::Warn,
                "Platform-specific video sink not available, using autovideosink",
            );
        }

        let observer = Arc::clone(&self.observer);
        backend.start(Arc::new(move |event| observer.on_bus_event(&event)))?;
        Ok((decoder, sink))
    }

    /// Copy `data` into a pooled buffer and hand it to the backend. Never blocks.
    pub fn push_frame(&self, data: &[u8]) -> PushOutcome {
        if self.phase() != PipelinePhase::Running || !self.observer.is_running() {
            return PushOutcome::Inactive;
        }

        let Some(mut inner) = self.inner.try_lock() else {
            trace!(len = data.len(), "pipeline busy, dropping frame");
            return PushOutcome::Dropped;
        };
        if inner.state.phase != PipelinePhase::Running {
            return PushOutcome::Inactive;
        }

        let mut buffer = self.pool.acquire_with_capacity(data.len());
        if let Err(err) = buffer.put(data) {
            drop(inner);
            debug!(error = %err, "frame copy failed");
            self.pool.release(buffer);
            return PushOutcome::Rejected;
        }

        match inner.backend.push(buffer) {
            Ok(FlowResult::Ok) => {
                self.after_push(&mut inner);
                PushOutcome::Pushed
            }
            Ok(FlowResult::Flushing) => {
                debug!("backend flushing, frame discarded");
                PushOutcome::Flushing
            }
            Ok(FlowResult::Error(reason)) => {
                if self.observer.is_running() {
                    self.log(LogLevel::Error, &format!("Error pushing buffer: {reason}"));
                }
                PushOutcome::BackendError
            }
            Err(PushRejected { buffer, reason }) => {
                drop(inner);
                debug!(reason = %reason, "backend refused buffer");
                self.pool.release(buffer);
                PushOutcome::Rejected
            }
        }
    }

    fn after_push(&self, inner: &mut Inner) {
        inner.state.frame_count += 1;
        let frames = inner.state.frame_count;
        let started = *inner.state.start_time.get_or_insert_with(Instant::now);

        inner.state.has_keyframe = true;
        // Retried on every push until the surface is realized and the bind succeeds.
        if !inner.state.overlay_bound && inner.surface.is_some() {
            self.bind_overlay(inner);
        }

        if frames % self.log_interval == 0 && self.observer.is_running() {
            let elapsed = started.elapsed().as_secs_f64();
            let fps = if elapsed > 0.0 { frames as f64 / elapsed } else { 0.0 };
            self.log(
                LogLevel::Debug,
                &format!(
                    "{frames} frames, {fps:.1} fps, pool hit rate: {:.1}%",
                    self.pool.stats().hit_rate() * 100.0
                ),
            );
        }
    }

    fn bind_overlay(&self, inner: &mut Inner) {
        let Some(surface) = inner.surface.as_ref() else {
            return;
        };
        let Some(handle) = surface.window_handle() else {
            if !inner.overlay_reported {
                inner.overlay_reported = true;
                self.log(
                    LogLevel::Warn,
                    "Render surface not realized yet, video overlay binding deferred",
                );
            }
            return;
        };
        match inner.backend.bind_window_handle(handle) {
            Ok(()) => {
                inner.state.overlay_bound = true;
                self.log(
                    LogLevel::Debug,
                    &format!("Set video overlay window handle: {:#x}", handle.0),
                );
            }
            Err(err) if inner.overlay_reported => {
                trace!(error = %err, "video overlay bind retry failed");
            }
            Err(err) => {
                inner.overlay_reported = true;
                self.log(LogLevel::Error, &format!("Failed to setup video overlay: {err}"));
            }
        }
    }

    /// Tear down the backend and reset all state. Idempotent; the pipeline cannot be restarted.
    pub fn stop(&self) {
        let mut inner = self.inner.lock();
        let phase = inner.state.phase;
        if phase == PipelinePhase::Stopped {
            return;
        }
        if phase != PipelinePhase::Uninitialized {
            inner.backend.teardown();
        }
        inner.state = PipelineState {
            phase: PipelinePhase::Stopped,
            ..PipelineState::default()
        };
        inner.surface = None;
        inner.overlay_reported = false;
        self.set_phase(PipelinePhase::Stopped);
        self.pool.clear();
        drop(inner);

        let stats = self.pool.stats();
        if stats.acquires > 0 {
            self.log(
                LogLevel::Info,
                &format!(
                    "Buffer pool final stats: {:.1}% hit rate ({} hits, {} misses)",
                    stats.hit_rate() * 100.0,
                    stats.hits,
                    stats.misses
                ),
            );
        }
    }

    pub fn phase(&self) -> PipelinePhase {
        PipelinePhase::from_u8(self.phase.load(Ordering::Acquire))
    }

    /// Snapshot of the state. Waits for the pipeline lock.
    pub fn state(&self) -> PipelineState {
        self.inner.lock().state.clone()
    }

    pub fn pool(&self) -> &Arc<BufferPool> {
        &self.pool
    }

    pub fn pool_stats(&self) -> PoolStats {
        self.pool.stats()
    }

    fn set_phase(&self, phase: PipelinePhase) {
        self.phase.store(phase as u8, Ordering::Release);
    }

    fn log(&self, level: LogLevel, message: &str) {
        self.observer.on_log(level, message);
    }
}
