//! # Frame Router
//!
//! Glue between [`FrameTransport`] and [`DecodePipeline`]. Each inbound message
//! is split into its [`FrameHeader`] and payload; the header becomes the current
//! frame timing and the payload (a borrowed slice, never a copy) goes to
//! [`DecodePipeline::push_frame`]. Pooled messages are released back to the
//! transport's pool afterwards, untouched.
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use frame_ingest::config::StreamConfig;
//! use frame_ingest::pipeline::{NullBackend, TracingObserver};
//! use frame_ingest::router::FrameRouter;
//! use frame_ingest::transport::WsConnector;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = StreamConfig::new("heat", "wss://sych.local/ws/ws_video_heat");
//! let router = FrameRouter::new(
//!     &config,
//!     Box::new(WsConnector::new()),
//!     Box::new(NullBackend::new()),
//!     Arc::new(TracingObserver),
//! )?;
//!
//! router.start(None)?;
//! // ...
//! router.stop();
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use parking_lot::Mutex;
use tracing::{info, trace, warn};

use crate::config::StreamConfig;
use crate::core::buffer_pool::BufferPool;
use crate::error::{StreamError, StreamResult};
use crate::frame::FrameHeader;
use crate::pipeline::backend::{BusEvent, DecodeBackend};
use crate::pipeline::decode::{DecodePipeline, PushOutcome};
use crate::pipeline::observer::{LogLevel, PipelineObserver, RenderSurface};
use crate::transport::{
    Connector, FrameTransport, InboundMessage, NORMAL_CLOSURE, TransportListener,
};

/// Adds the router's running flag to the application's observer.
struct RunningObserver {
    inner: Arc<dyn PipelineObserver>,
    running: Arc<AtomicBool>,
}

impl PipelineObserver for RunningObserver {
    fn on_log(&self, level: LogLevel, message: &str) {
        self.inner.on_log(level, message);
    }

    fn on_pipeline_error(&self, error: &StreamError) {
        self.inner.on_pipeline_error(error);
    }

    fn on_bus_event(&self, event: &BusEvent) {
        self.inner.on_bus_event(event);
    }

    fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst) && self.inner.is_running()
    }
}

struct RouterCore {
    stream_id: String,
    pipeline: Arc<DecodePipeline>,
    pool: Arc<BufferPool>,
    timing: Mutex<Option<FrameHeader>>,
    running: Arc<AtomicBool>,
    routed: AtomicU64,
    short_dropped: AtomicU64,
}

impl RouterCore {
    fn route(&self, message: InboundMessage) -> Option<PushOutcome> {
        let outcome = match FrameHeader::split(message.as_slice()) {
            Some((header, payload)) => {
                *self.timing.lock() = Some(header);
                self.routed.fetch_add(1, Ordering::Relaxed);
                Some(self.pipeline.push_frame(payload))
            }
            None => {
                trace!(len = message.len(), "short message dropped");
                self.short_dropped.fetch_add(1, Ordering::Relaxed);
                None
            }
        };
        message.release_to(&self.pool);
        outcome
    }
}

impl TransportListener for RouterCore {
    fn on_message(&self, message: InboundMessage) {
        self.route(message);
    }

    fn on_connect(&self) {
        info!(stream_id = %self.stream_id, "stream connected");
    }

    fn on_close(&self, code: u16, reason: &str) {
        if code == NORMAL_CLOSURE {
            info!(stream_id = %self.stream_id, "stream closed");
        } else {
            warn!(stream_id = %self.stream_id, code, reason, "stream closed abnormally");
        }
    }

    fn on_error(&self, error: &StreamError) {
        warn!(stream_id = %self.stream_id, error = %error, "stream connection error");
    }
}

/// One stream: a transport feeding a decode pipeline.
pub struct FrameRouter {
    transport: FrameTransport,
    core: Arc<RouterCore>,
}

impl FrameRouter {
    /// Validate `config` and wire the components. Nothing connects until [`start`](Self::start).
    pub fn new(
        config: &StreamConfig,
        connector: Box<dyn Connector>,
        backend: Box<dyn DecodeBackend>,
        observer: Arc<dyn PipelineObserver>,
    ) -> StreamResult<Self> {
        config.validate()?;

        let running = Arc::new(AtomicBool::new(false));
        let pipeline = Arc::new(DecodePipeline::new(
            &config.pipeline,
            backend,
            Arc::new(RunningObserver {
                inner: observer,
                running: Arc::clone(&running),
            }),
        ));

        let transport_config = config.transport.clone();
        let pool = Arc::new(BufferPool::new(
            transport_config.pool_size,
            transport_config.buffer_size,
            transport_config.direct_buffers,
        ));
        let request = transport_config.connect_request(&config.url, &config.user_agent)?;

        let core = Arc::new(RouterCore {
            stream_id: config.stream_id.clone(),
            pipeline,
            pool: Arc::clone(&pool),
            timing: Mutex::new(None),
            running,
            routed: AtomicU64::new(0),
            short_dropped: AtomicU64::new(0),
        });
        let transport = FrameTransport::new(
            request,
            transport_config,
            pool,
            connector,
            Arc::clone(&core) as Arc<dyn TransportListener>,
        );

        Ok(Self { transport, core })
    }

    /// Build the pipeline, then connect. The transport is not touched if the pipeline fails.
    pub fn start(&self, surface: Option<Arc<dyn RenderSurface>>) -> StreamResult<()> {
        if self
            .core
            .running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Ok(());
        }
        if let Err(err) = self.core.pipeline.initialize(surface) {
            self.core.running.store(false, Ordering::SeqCst);
            return Err(err);
        }
        self.transport.connect();
        info!(stream_id = %self.core.stream_id, url = %self.transport.url(), "stream started");
        Ok(())
    }

    /// Close the transport and stop the pipeline. Idempotent.
    pub fn stop(&self) {
        let was_running = self.core.running.swap(false, Ordering::SeqCst);
        self.transport.close();
        self.core.pipeline.stop();
        if was_running {
            info!(
                stream_id = %self.core.stream_id,
                frames = self.frames_routed(),
                "stream stopped"
            );
        }
    }

    pub fn is_running(&self) -> bool {
        self.core.running.load(Ordering::SeqCst)
    }

    /// Header of the most recently routed frame.
    pub fn current_timing(&self) -> Option<FrameHeader> {
        *self.core.timing.lock()
    }

    pub fn frames_routed(&self) -> u64 {
        self.core.routed.load(Ordering::Relaxed)
    }

    pub fn short_frames_dropped(&self) -> u64 {
        self.core.short_dropped.load(Ordering::Relaxed)
    }

    pub fn pipeline(&self) -> &DecodePipeline {
        &self.core.pipeline
    }

    pub fn transport(&self) -> &FrameTransport {
        &self.transport
    }

    pub fn stream_id(&self) -> &str {
        &self.core.stream_id
    }
}

impl Drop for FrameRouter {
    fn drop(&mut self) {
        self.stop();
    }
}
