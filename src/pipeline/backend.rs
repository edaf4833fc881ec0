//! The decode/render engine seen from the pipeline.
//!
//! [`DecodeBackend`] is everything [`DecodePipeline`](crate::pipeline::DecodePipeline)
//! needs from an engine: build the fixed plumbing, try named decoder and sink
//! candidates, start, accept buffers, and bind a native window.
//!
//! Buffer ownership moves with [`DecodeBackend::push`]. On `Ok` the backend owns
//! the buffer and returns it to the pool when the engine is done with it. On
//! `Err` the buffer comes back in [`PushRejected`] and the caller releases it.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use crate::core::buffer_pool::{BufferPool, PooledBuffer};
use crate::error::{ElementRole, StreamError, StreamResult};

/// Jitter queue bounds. The queue drops its oldest buffer when either bound is hit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueLimits {
    pub max_buffers: u32,
    pub max_time: Duration,
    /// 0 = unbounded
    pub max_bytes: u32,
}

impl Default for QueueLimits {
    fn default() -> Self {
        Self {
            max_buffers: 5,
            max_time: Duration::from_secs(1),
            max_bytes: 0,
        }
    }
}

/// What a backend gets to build its graph with.
#[derive(Clone)]
pub struct BackendContext {
    pub limits: QueueLimits,
    /// Pool that accepted buffers must eventually be released to.
    pub pool: Arc<BufferPool>,
}

/// Native window handle (X11 window id, HWND, NSView pointer).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct WindowHandle(pub u64);

/// Result of handing a buffer to the engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FlowResult {
    Ok,
    /// Shutting down; not an error.
    Flushing,
    Error(String),
}

/// A buffer the backend refused before taking ownership.
#[derive(Debug)]
pub struct PushRejected {
    pub buffer: PooledBuffer,
    pub reason: String,
}

impl PushRejected {
    pub fn new(buffer: PooledBuffer, reason: impl Into<String>) -> Self {
        Self {
            buffer,
            reason: reason.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BusLevel {
    Warning,
    Error,
}

/// Asynchronous notification from the engine, independent of push results.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BusEvent {
    pub level: BusLevel,
    /// Element that raised the event.
    pub source: String,
    pub message: String,
    pub debug: Option<String>,
}

impl fmt::Display for BusEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.source, self.message)?;
        if let Some(debug) = &self.debug {
            write!(f, " ({debug})")?;
        }
        Ok(())
    }
}

/// Receives bus events, possibly on an engine thread.
pub type BusCallback = Arc<dyn Fn(BusEvent) + Send + Sync>;

pub trait DecodeBackend: Send {
    /// Short name for logs.
    fn name(&self) -> &str;

    /// Create the push source, stream parser and jitter queue.
    fn prepare(&mut self, context: &BackendContext) -> StreamResult<()>;

    /// Try to create the decoder or sink called `name`. Failure is expected and
    /// moves the caller to the next candidate.
    fn create_element(&mut self, role: ElementRole, name: &str) -> StreamResult<()>;

    /// Link the graph and start playing.
    fn start(&mut self, bus: BusCallback) -> StreamResult<()>;

    /// Hand one elementary-stream buffer to the engine.
    fn push(&mut self, buffer: PooledBuffer) -> Result<FlowResult, PushRejected>;

    /// Direct rendering into a native window.
    fn bind_window_handle(&mut self, handle: WindowHandle) -> StreamResult<()>;

    /// Stop and release everything. Must be safe to call in any state.
    fn teardown(&mut self);
}

/// Backend without an engine: accepts every element, counts pushed frames and
/// releases each buffer straight back to the pool.
#[derive(Debug, Default)]
pub struct NullBackend {
    pool: Option<Arc<BufferPool>>,
    frames: Arc<AtomicU64>,
    bytes: Arc<AtomicU64>,
    started: bool,
}

impl NullBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Shared frame counter, readable after the backend moved into a pipeline.
    pub fn frame_counter(&self) -> Arc<AtomicU64> {
        Arc::clone(&self.frames)
    }

    pub fn byte_counter(&self) -> Arc<AtomicU64> {
        Arc::clone(&self.bytes)
    }
}

impl DecodeBackend for NullBackend {
    fn name(&self) -> &str {
        "null"
    }

    fn prepare(&mut self, context: &BackendContext) -> StreamResult<()> {
        self.pool = Some(Arc::clone(&context.pool));
        Ok(())
    }

    fn create_element(&mut self, _role: ElementRole, _name: &str) -> StreamResult<()> {
        Ok(())
    }

    fn start(&mut self, _bus: BusCallback) -> StreamResult<()> {
        if self.pool.is_none() {
            return Err(StreamError::backend_start("start called before prepare"));
        }
        self.started = true;
        Ok(())
    }

    fn push(&mut self, buffer: PooledBuffer) -> Result<FlowResult, PushRejected> {
        let Some(pool) = self.pool.as_ref().filter(|_| self.started) else {
            return Err(PushRejected::new(buffer, "not started"));
        };
        self.frames.fetch_add(1, Ordering::Relaxed);
        self.bytes.fetch_add(buffer.len() as u64, Ordering::Relaxed);
        pool.release(buffer);
        Ok(FlowResult::Ok)
    }

    fn bind_window_handle(&mut self, _handle: WindowHandle) -> StreamResult<()> {
        Ok(())
    }

    fn teardown(&mut self) {
        self.started = false;
        self.pool = None;
    }
}
