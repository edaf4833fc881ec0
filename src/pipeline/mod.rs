//! # Decode Pipeline Module
//!
//! Orchestrates the external decode/render engine: candidate selection,
//! lifecycle, backpressure and deferred window binding.
//!
//! ## Architecture
//!
//! ```text
//! push_frame(&[u8])
//!      │  phase check (atomic), try_lock or drop
//!      ▼
//! ┌──────────────┐  PooledBuffer   ┌───────────────────────────────────────────────┐
//! │DecodePipeline│───────────────▶│ DecodeBackend                                  │
//! │ + BufferPool │  (moves)        │ appsrc ! h264parse ! decoder ! queue ! sink   │
//! └──────────────┘                 └───────────────────────────────────────────────┘
//!      │ on_log / on_pipeline_error / on_bus_event          │ bus events
//!      ▼                                                    │
//! PipelineObserver ◀────────────────────────────────────────┘
//! ```
//!
//! - [`decode`]: [`DecodePipeline`] and its state machine
//! - [`backend`]: the [`DecodeBackend`] trait and [`NullBackend`]
//! - [`fallback`]: ordered decoder/sink candidates per host
//! - [`observer`]: [`PipelineObserver`], [`TracingObserver`], [`RenderSurface`]
//! - `gst`: GStreamer backend (feature `gstreamer-backend`)

pub mod backend;
pub mod decode;
pub mod fallback;
#[cfg(feature = "gstreamer-backend")]
pub mod gst;
pub mod observer;

pub use backend::{
    BackendContext, BusCallback, BusEvent, BusLevel, DecodeBackend, FlowResult, NullBackend,
    PushRejected, QueueLimits, WindowHandle,
};
pub use decode::{DecodePipeline, PipelinePhase, PipelineState, PushOutcome};
pub use fallback::{CandidateSet, DeploymentMode, HostPlatform};
#[cfg(feature = "gstreamer-backend")]
pub use gst::GstBackend;
pub use observer::{FixedSurface, LogLevel, PipelineObserver, RenderSurface, TracingObserver};
