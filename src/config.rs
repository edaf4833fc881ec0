//! # Configuration Module
//!
//! Configuration structures and validation for an ingest session. The same
//! structures back the CLI flags, an optional JSON file, and library callers that
//! build a [`FrameRouter`](crate::router::FrameRouter) directly.
//!
//! ## Overview
//!
//! - **Typed**: sizes in bytes, intervals in milliseconds
//! - **Defaulted**: every field has a default, so a JSON file may set only what it changes
//! - **Validated**: [`StreamConfig::validate`] reports the first bad field as a
//!   [`StreamError::Config`]
//!
//! ## Configuration Parameters
//!
//! | Parameter | Default | Description |
//! |-----------|---------|-------------|
//! | `transport.pool_size` | 20 | Receive-side pooled buffers |
//! | `transport.buffer_size` | 2 MiB | Capacity of each receive buffer |
//! | `transport.direct_buffers` | true | Anonymous mappings instead of heap |
//! | `transport.scratch_size` | 2 MiB | Default reassembly buffer size |
//! | `transport.trim_interval_ms` | 60000 | Minimum time between scratch trims |
//! | `transport.stats_interval_ms` | 30000 | Statistics log period |
//! | `transport.reconnect_delay_ms` | 1000 | Fixed delay before reconnecting |
//! | `transport.connect_timeout_ms` | 10000 | TCP connect and handshake bound |
//! | `transport.poll_interval_ms` | 100 | Receive loop wake-up period |
//! | `transport.accept_invalid_certs` | true | Trust self-signed TLS certificates |
//! | `pipeline.pool_size` | 10 | Decode-side pooled buffers |
//! | `pipeline.buffer_size` | 2 MiB | Capacity of each decode buffer |
//! | `pipeline.queue_max_buffers` | 5 | Jitter queue buffer bound |
//! | `pipeline.queue_max_time_ms` | 1000 | Jitter queue time bound |
//! | `pipeline.log_interval_frames` | 300 | Frames between progress logs |
//!
//! ## Examples
//!
//! ```rust
//! use frame_ingest::config::StreamConfig;
//!
//! let config = StreamConfig::new("heat", "wss://sych.local/ws/ws_video_heat");
//! assert!(config.validate().is_ok());
//!
//! let json = r#"{ "stream_id": "day", "url": "ws://127.0.0.1:8080/ws", "transport": { "reconnect_delay_ms": 250 } }"#;
//! let config = StreamConfig::from_json_str(json).unwrap();
//! assert_eq!(config.transport.reconnect_delay_ms, 250);
//! assert_eq!(config.transport.pool_size, 20);
//! ```

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{StreamError, StreamResult};
use crate::pipeline::backend::QueueLimits;
use crate::transport::ConnectRequest;

const MIB: usize = 1024 * 1024;

/// User agent sent on the WebSocket handshake unless overridden.
pub const DEFAULT_USER_AGENT: &str = "VideoStreamManager/1.0";

/// Receive-side settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportConfig {
    pub pool_size: usize,
    pub buffer_size: usize,
    pub direct_buffers: bool,
    pub scratch_size: usize,
    pub trim_interval_ms: u64,
    pub stats_interval_ms: u64,
    /// Fixed delay between a connection loss and the next attempt. No backoff.
    pub reconnect_delay_ms: u64,
    pub connect_timeout_ms: u64,
    pub poll_interval_ms: u64,
    pub accept_invalid_certs: bool,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            pool_size: 20,
            buffer_size: 2 * MIB,
            direct_buffers: true,
            scratch_size: 2 * MIB,
            trim_interval_ms: 60_000,
            stats_interval_ms: 30_000,
            reconnect_delay_ms: 1_000,
            connect_timeout_ms: 10_000,
            poll_interval_ms: 100,
            accept_invalid_certs: true,
        }
    }
}

impl TransportConfig {
    pub fn trim_interval(&self) -> Duration {
        Duration::from_millis(self.trim_interval_ms)
    }

    pub fn stats_interval(&self) -> Duration {
        Duration::from_millis(self.stats_interval_ms)
    }

    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_delay_ms)
    }

    /// Build the connection request for `url` with this config's timeouts.
    pub fn connect_request(&self, url: &str, user_agent: &str) -> StreamResult<ConnectRequest> {
        let mut request = ConnectRequest::new(url, user_agent)?;
        request.connect_timeout = Duration::from_millis(self.connect_timeout_ms);
        request.poll_interval = Duration::from_millis(self.poll_interval_ms);
        request.accept_invalid_certs = self.accept_invalid_certs;
        Ok(request)
    }

    pub fn validate(&self) -> StreamResult<()> {
        positive("transport.pool_size", self.pool_size as u64)?;
        positive("transport.buffer_size", self.buffer_size as u64)?;
        positive("transport.scratch_size", self.scratch_size as u64)?;
        positive("transport.stats_interval_ms", self.stats_interval_ms)?;
        positive("transport.reconnect_delay_ms", self.reconnect_delay_ms)?;
        positive("transport.connect_timeout_ms", self.connect_timeout_ms)?;
        positive("transport.poll_interval_ms", self.poll_interval_ms)?;
        Ok(())
    }
}

/// Decode-side settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub pool_size: usize,
    pub buffer_size: usize,
    pub direct_buffers: bool,
    pub queue_max_buffers: u32,
    pub queue_max_time_ms: u64,
    pub log_interval_frames: u64,
    /// Replaces the platform decoder list when set.
    pub decoder_candidates: Option<Vec<String>>,
    /// Replaces the platform sink list when set.
    pub sink_candidates: Option<Vec<String>>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            pool_size: 10,
            buffer_size: 2 * MIB,
            direct_buffers: false,
            queue_max_buffers: 5,
            queue_max_time_ms: 1_000,
            log_interval_frames: 300,
            decoder_candidates: None,
            sink_candidates: None,
        }
    }
}

impl PipelineConfig {
    pub fn queue_limits(&self) -> QueueLimits {
        QueueLimits {
            max_buffers: self.queue_max_buffers,
            max_time: Duration::from_millis(self.queue_max_time_ms),
            max_bytes: 0,
        }
    }

    pub fn validate(&self) -> StreamResult<()> {
        positive("pipeline.pool_size", self.pool_size as u64)?;
        positive("pipeline.buffer_size", self.buffer_size as u64)?;
        positive("pipeline.queue_max_buffers", u64::from(self.queue_max_buffers))?;
        positive("pipeline.queue_max_time_ms", self.queue_max_time_ms)?;
        positive("pipeline.log_interval_frames", self.log_interval_frames)?;
        for (field, list) in [
            ("pipeline.decoder_candidates", &self.decoder_candidates),
            ("pipeline.sink_candidates", &self.sink_candidates),
        ] {
            if let Some(list) = list {
                if list.is_empty() {
                    return Err(StreamError::config(field, "[]", "candidate list cannot be empty"));
                }
            }
        }
        Ok(())
    }
}

/// Full configuration of one ingest session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamConfig {
    /// Label used in logs, e.g. `heat` or `day`.
    pub stream_id: String,
    pub url: String,
    pub user_agent: String,
    pub transport: TransportConfig,
    pub pipeline: PipelineConfig,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            stream_id: "stream".to_string(),
            url: String::new(),
            user_agent: DEFAULT_USER_AGENT.to_string(),
            transport: TransportConfig::default(),
            pipeline: PipelineConfig::default(),
        }
    }
}

impl StreamConfig {
    pub fn new(stream_id: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            stream_id: stream_id.into(),
            url: url.into(),
            ..Self::default()
        }
    }

    /// Parse a JSON document. Missing fields take their defaults.
    pub fn from_json_str(json: &str) -> StreamResult<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Load a JSON configuration file.
    pub fn from_json_file(path: impl AsRef<Path>) -> StreamResult<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|err| StreamError::io("read config", err).with_context(path.display().to_string()))?;
        Self::from_json_str(&text)
    }

    /// Checks every field, returning the first violation.
    pub fn validate(&self) -> StreamResult<()> {
        if self.stream_id.trim().is_empty() {
            return Err(StreamError::config("stream_id", &self.stream_id, "cannot be empty"));
        }
        if !(self.url.starts_with("ws://") || self.url.starts_with("wss://")) {
            return Err(StreamError::config("url", &self.url, "must start with ws:// or wss://"));
        }
        if self.user_agent.is_empty() {
            return Err(StreamError::config("user_agent", "", "cannot be empty"));
        }
        self.transport.validate()?;
        self.pipeline.validate()
    }
}

fn positive(field: &str, value: u64) -> StreamResult<()> {
    if value == 0 {
        return Err(StreamError::config(field, "0", "must be greater than 0"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_config() {
        let config = StreamConfig::default();
        assert_eq!(config.user_agent, "VideoStreamManager/1.0");
        assert_eq!(config.transport.pool_size, 20);
        assert_eq!(config.transport.buffer_size, 2 * 1024 * 1024);
        assert!(config.transport.direct_buffers);
        assert_eq!(config.transport.reconnect_delay(), Duration::from_secs(1));
        assert_eq!(config.pipeline.pool_size, 10);
        assert!(!config.pipeline.direct_buffers);
        assert_eq!(config.pipeline.log_interval_frames, 300);

        let limits = config.pipeline.queue_limits();
        assert_eq!(limits.max_buffers, 5);
        assert_eq!(limits.max_time, Duration::from_secs(1));
        assert_eq!(limits.max_bytes, 0);
    }

    #[test]
    fn test_config_validation() {
        let mut config = StreamConfig::new("heat", "wss://localhost/ws/ws_video_heat");

        // Valid config should pass
        assert!(config.validate().is_ok());

        // Invalid URL scheme
        config.url = "http://localhost/ws".to_string();
        assert!(config.validate().is_err());
        config.url = "ws://localhost/ws".to_string(); // Reset

        // Empty stream id
        config.stream_id = " ".to_string();
        assert!(config.validate().is_err());
        config.stream_id = "heat".to_string(); // Reset

        // Zero reconnect delay
        config.transport.reconnect_delay_ms = 0;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("transport.reconnect_delay_ms"));
        config.transport.reconnect_delay_ms = 1_000; // Reset

        // Empty candidate override
        config.pipeline.decoder_candidates = Some(Vec::new());
        assert!(config.validate().is_err());
        config.pipeline.decoder_candidates = Some(vec!["avdec_h264".to_string()]);

        // Valid again
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_json_takes_defaults() {
        let json = r#"{
            "stream_id": "day",
            "url": "ws://127.0.0.1:8080/ws/ws_video_day",
            "pipeline": { "sink_candidates": ["autovideosink"] }
        }"#;
        let config = StreamConfig::from_json_str(json).unwrap();
        assert_eq!(config.stream_id, "day");
        assert_eq!(config.transport, TransportConfig::default());
        assert_eq!(
            config.pipeline.sink_candidates,
            Some(vec!["autovideosink".to_string()])
        );
        assert_eq!(config.pipeline.queue_max_buffers, 5);
    }

    #[test]
    fn test_malformed_json_is_config_error() {
        let err = StreamConfig::from_json_str("{ not json").unwrap_err();
        assert_eq!(err.category(), "config");
    }

    #[test]
    fn test_from_json_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{ "stream_id": "heat", "url": "wss://sych.local/ws/ws_video_heat", "transport": {{ "accept_invalid_certs": false }} }}"#
        )
        .unwrap();

        let config = StreamConfig::from_json_file(file.path()).unwrap();
        assert!(!config.transport.accept_invalid_certs);
        assert!(config.validate().is_ok());

        let missing = StreamConfig::from_json_file(file.path().with_extension("missing"));
        assert_eq!(missing.unwrap_err().category(), "io");
    }

    #[test]
    fn test_connect_request_from_config() {
        let mut transport = TransportConfig::default();
        transport.poll_interval_ms = 25;
        transport.accept_invalid_certs = false;

        let request = transport
            .connect_request("wss://sych.local/ws/ws_video_day", DEFAULT_USER_AGENT)
            .unwrap();
        assert_eq!(request.poll_interval, Duration::from_millis(25));
        assert_eq!(request.connect_timeout, Duration::from_secs(10));
        assert!(!request.accept_invalid_certs);
    }
}
