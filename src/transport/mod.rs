//! # Frame Transport Module
//!
//! Persistent binary-message connection to the streaming endpoint.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐ fragments ┌───────────────────┐ InboundMessage ┌────────────────────┐
//! │ FrameSource  │──────────▶│ MessageAssembler  │───────────────▶│ TransportListener  │
//! │ (WebSocket)  │           │ (per connection)  │                │ (router)           │
//! └──────────────┘           └───────────────────┘                └────────────────────┘
//!        ▲                            │ multi-fragment messages
//!        │ Connector                  ▼
//! ┌──────────────┐           ┌───────────────────┐
//! │ FrameTransport│          │    BufferPool     │
//! │ connect/close │          │  (shared, Arc)    │
//! └──────────────┘           └───────────────────┘
//! ```
//!
//! - [`client`]: lifecycle, receive thread, reconnect scheduling, statistics
//! - [`reassembly`]: fragment reassembly with a zero-copy single-fragment path
//! - [`connector`]: the [`Connector`]/[`FrameSource`] seam and the tungstenite implementation

pub mod client;
pub mod connector;
pub mod reassembly;

use std::fmt;

use bytes::Bytes;

use crate::core::buffer_pool::{BufferPool, PooledBuffer};
use crate::error::StreamError;

pub use client::{FrameTransport, TransportStats};
pub use connector::{ConnectRequest, Connector, FrameSource, SourceEvent, WsConnector};
pub use reassembly::MessageAssembler;

/// Close code for an intentional, clean shutdown.
pub const NORMAL_CLOSURE: u16 = 1000;

/// Close code reported when the peer's close frame carried no status.
pub const NO_STATUS_RECEIVED: u16 = 1005;

/// Connection lifecycle as observed from outside the transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionState::Disconnected => write!(f, "disconnected"),
            ConnectionState::Connecting => write!(f, "connecting"),
            ConnectionState::Connected => write!(f, "connected"),
        }
    }
}

/// One complete application message.
///
/// `Direct` messages arrived in a single fragment and borrow nothing from any
/// pool. `Pooled` messages were reassembled and must be released back to the
/// transport's pool by the consumer (see [`InboundMessage::release_to`]).
#[derive(Debug)]
pub enum InboundMessage {
    Direct(Bytes),
    Pooled(PooledBuffer),
}

impl InboundMessage {
    pub fn as_slice(&self) -> &[u8] {
        match self {
            InboundMessage::Direct(bytes) => bytes,
            InboundMessage::Pooled(buffer) => buffer.as_slice(),
        }
    }

    pub fn len(&self) -> usize {
        self.as_slice().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_pooled(&self) -> bool {
        matches!(self, InboundMessage::Pooled(_))
    }

    /// Hand a pooled message back to `pool`. Direct messages are just dropped.
    pub fn release_to(self, pool: &BufferPool) {
        if let InboundMessage::Pooled(buffer) = self {
            pool.release(buffer);
        }
    }
}

impl AsRef<[u8]> for InboundMessage {
    fn as_ref(&self) -> &[u8] {
        self.as_slice()
    }
}

/// Receives transport events. Called from the transport's receive thread.
pub trait TransportListener: Send + Sync {
    /// A complete message arrived. Pooled messages now belong to the listener.
    fn on_message(&self, message: InboundMessage);

    fn on_connect(&self) {}

    fn on_close(&self, _code: u16, _reason: &str) {}

    fn on_error(&self, _error: &StreamError) {}
}
