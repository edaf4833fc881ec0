//! # Core Infrastructure Module
//!
//! Buffer management shared by the transport and the decode pipeline. Every
//! component that touches frame bytes on the hot path takes its buffers from a
//! [`buffer_pool::BufferPool`] injected at construction.

pub mod buffer_pool;

pub use buffer_pool::{BufferPool, CapacityExceeded, PoolStats, PooledBuffer};
