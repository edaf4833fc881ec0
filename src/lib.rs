//! # Frame Ingest Library
//!
//! Client-side ingestion path for a live, low-latency H.264 stream. Binary
//! frames arrive over a persistent WebSocket, the 16-byte frame header is split
//! off, and the elementary stream is pushed into a decode-and-render backend
//! without allocating per frame and without ever blocking the receive thread.
//!
//! ## Architecture
//!
//! ```text
//! network ──▶ FrameTransport ──InboundMessage──▶ FrameRouter ──payload──▶ DecodePipeline ──▶ DecodeBackend
//!              (reassembly)                      (header split)          (try_lock, drop)     (GStreamer)
//!                   │                                  │                        │
//!                   └────────── BufferPool ◀───────────┘                   BufferPool
//! ```
//!
//! The library is organized into these modules:
//! - `core`: lock-free buffer pool
//! - `frame`: wire header codec
//! - `transport`: WebSocket client, reassembly, reconnect
//! - `pipeline`: decode pipeline state machine, fallback chains, backends
//! - `router`: glue owning one transport and one pipeline
//! - `config`: configuration and validation
//! - `error`: error types
//!
//! ## Features
//!
//! - **Zero-copy fast path**: single-fragment messages are never copied before the pipeline
//! - **Drop, don't block**: a busy pipeline skips frames instead of stalling the network
//! - **Self-healing**: fixed-delay reconnect until the transport is closed
//! - **Pluggable engine**: GStreamer behind the `gstreamer-backend` feature, or any [`pipeline::DecodeBackend`]
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use frame_ingest::{FrameRouter, StreamConfig};
//! use frame_ingest::pipeline::{NullBackend, TracingObserver};
//! use frame_ingest::transport::WsConnector;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = StreamConfig::new("day", "wss://sych.local/ws/ws_video_day");
//! let router = FrameRouter::new(
//!     &config,
//!     Box::new(WsConnector::new()),
//!     Box::new(NullBackend::new()),
//!     Arc::new(TracingObserver),
//! )?;
//! router.start(None)?;
//! # router.stop();
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod core;
pub mod error;
pub mod frame;
pub mod pipeline;
pub mod router;
pub mod transport;

pub use config::{PipelineConfig, StreamConfig, TransportConfig};
pub use crate::core::buffer_pool::{BufferPool, PoolStats, PooledBuffer};
pub use error::{ErrorClass, StreamError, StreamResult};
pub use frame::FrameHeader;
pub use router::FrameRouter;
