//! Upward reporting from the decode pipeline.

use std::fmt;

use crate::error::StreamError;
use crate::pipeline::backend::{BusEvent, BusLevel, WindowHandle};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            LogLevel::Trace => "TRACE",
            LogLevel::Debug => "DEBUG",
            LogLevel::Info => "INFO",
            LogLevel::Warn => "WARN",
            LogLevel::Error => "ERROR",
        };
        f.write_str(name)
    }
}

/// Receives pipeline logs and errors, and answers whether the application still wants frames.
///
/// Called from whichever thread is pushing or from engine threads, so
/// implementations must not block.
pub trait PipelineObserver: Send + Sync {
    fn on_log(&self, level: LogLevel, message: &str);

    /// Construction failed or the engine reported an error.
    fn on_pipeline_error(&self, _error: &StreamError) {}

    /// Engine bus message. Logged by default.
    fn on_bus_event(&self, event: &BusEvent) {
        match event.level {
            BusLevel::Error => self.on_log(LogLevel::Error, &format!("Pipeline error: {event}")),
            BusLevel::Warning => self.on_log(LogLevel::Warn, &format!("Pipeline warning: {event}")),
        }
    }

    /// Pushes are skipped, and push errors go unreported, while this is false.
    fn is_running(&self) -> bool {
        true
    }
}

/// Forwards everything to `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingObserver;

impl PipelineObserver for TracingObserver {
    fn on_log(&self, level: LogLevel, message: &str) {
        match level {
            LogLevel::Trace => tracing::trace!(target: "frame_ingest::pipeline", "{message}"),
            LogLevel::Debug => tracing::debug!(target: "frame_ingest::pipeline", "{message}"),
            LogLevel::Info => tracing::info!(target: "frame_ingest::pipeline", "{message}"),
            LogLevel::Warn => tracing::warn!(target: "frame_ingest::pipeline", "{message}"),
            LogLevel::Error => tracing::error!(target: "frame_ingest::pipeline", "{message}"),
        }
    }

    fn on_pipeline_error(&self, error: &StreamError) {
        tracing::error!(
            target: "frame_ingest::pipeline",
            category = error.category(),
            "{error}"
        );
    }
}

/// The video surface owned by the UI toolkit.
///
/// The handle may not exist until the surface is realized, which is why the
/// pipeline only asks for it once the first frame has been decoded.
pub trait RenderSurface: Send + Sync {
    fn window_handle(&self) -> Option<WindowHandle>;
}

/// A surface whose handle is already known.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FixedSurface(pub WindowHandle);

impl RenderSurface for FixedSurface {
    fn window_handle(&self) -> Option<WindowHandle> {
        Some(self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::sync::Arc;

    #[derive(Default)]
    struct Collect(Mutex<Vec<(LogLevel, String)>>);

    impl PipelineObserver for Collect {
        fn on_log(&self, level: LogLevel, message: &str) {
            self.0.lock().push((level, message.to_string()));
        }
    }

    #[test]
    fn test_bus_events_become_logs_by_default() {
        let observer = Collect::default();
        observer.on_bus_event(&BusEvent {
            level: BusLevel::Warning,
            source: "videosink".into(),
            message: "late frame".into(),
            debug: None,
        });

        let logs = observer.0.lock();
        assert_eq!(logs.len(), 1);
        assert_eq!(logs[0].0, LogLevel::Warn);
        assert_eq!(logs[0].1, "Pipeline warning: videosink: late frame");
        assert!(observer.is_running());
    }

    #[test]
    fn test_fixed_surface_reports_handle() {
        let surface: Arc<dyn RenderSurface> = Arc::new(FixedSurface(WindowHandle(0x2a)));
        assert_eq!(surface.window_handle(), Some(WindowHandle(0x2a)));
    }
}
