//! # Error Handling
//!
//! Structured error type for the ingest path. Every fallible operation in the
//! crate returns [`StreamResult`], and every error carries an [`ErrorContext`]
//! with the operation that failed and a severity.
//!
//! ## Classification
//!
//! Errors fall into three classes (see [`ErrorClass`]):
//!
//! - **Transient**: expected during normal streaming (a decoder candidate that is
//!   not installed, a flushing backend). Logged at debug level, never surfaced.
//! - **Recoverable**: connection failures. Handled by the transport's fixed-delay
//!   reconnect loop.
//! - **Fatal**: pipeline construction failures (fallback chain exhausted, backend
//!   refused to start). The pipeline is torn down and the failure reported.
//!
//! ## Usage
//!
//! ```rust
//! use frame_ingest::error::{ErrorClass, StreamError};
//!
//! let error = StreamError::connection("handshake", "connection refused")
//!     .with_context("wss://127.0.0.1:8080/ws/heat");
//!
//! assert_eq!(error.class(), ErrorClass::Recoverable);
//! assert_eq!(error.category(), "connection");
//! ```

use std::{error::Error as StdError, fmt};

/// Severity levels for errors
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ErrorSeverity {
    /// Expected conditions that are only interesting while debugging
    Debug,
    /// Warnings that may indicate potential issues
    Warning,
    /// Errors that affect operation but can be recovered from
    Error,
    /// Errors that stop a component from running
    Fatal,
}

/// How an error is handled by the component that observes it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Expected during streaming; dropped after logging.
    Transient,
    /// Recovered locally, e.g. by reconnecting.
    Recoverable,
    /// Aborts the component that raised it.
    Fatal,
}

/// Metadata about where an error occurred
#[derive(Debug, Clone)]
pub struct ErrorContext {
    /// The operation being performed when the error occurred
    pub operation: Option<String>,
    /// Additional context about the error
    pub context: Option<String>,
    /// Error severity level
    pub severity: ErrorSeverity,
}

impl Default for ErrorContext {
    fn default() -> Self {
        Self {
            operation: None,
            context: None,
            severity: ErrorSeverity::Error,
        }
    }
}

impl ErrorContext {
    /// Create a new error context
    pub fn new() -> Self {
        Self::default()
    }

    fn with_severity(severity: ErrorSeverity) -> Self {
        Self {
            severity,
            ..Self::default()
        }
    }
}

/// Role of an element inside the decode graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ElementRole {
    /// Push source, stream parser or jitter queue
    Plumbing,
    /// H.264 decoder
    Decoder,
    /// Render sink
    Sink,
}

impl fmt::Display for ElementRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ElementRole::Plumbing => write!(f, "plumbing"),
            ElementRole::Decoder => write!(f, "decoder"),
            ElementRole::Sink => write!(f, "sink"),
        }
    }
}

/// Base error type for the ingest library
#[derive(Debug)]
pub enum StreamError {
    /// Configuration validation errors
    Config {
        field: String,
        value: String,
        reason: String,
        context: ErrorContext,
    },
    /// Handshake or connect failures
    Connection {
        operation: String,
        reason: String,
        source: Option<Box<dyn StdError + Send + Sync>>,
        context: ErrorContext,
    },
    /// Mid-stream protocol violations reported by the WebSocket layer
    Protocol {
        reason: String,
        context: ErrorContext,
    },
    /// I/O errors
    Io {
        operation: String,
        source: std::io::Error,
        context: ErrorContext,
    },
    /// A single element could not be created or configured
    Element {
        role: ElementRole,
        element: String,
        reason: String,
        context: ErrorContext,
    },
    /// Every candidate of a fallback chain failed
    FallbackExhausted {
        role: ElementRole,
        tried: Vec<String>,
        context: ErrorContext,
    },
    /// The backend refused to start the assembled graph
    BackendStart {
        reason: String,
        context: ErrorContext,
    },
    /// Invalid lifecycle transitions
    State {
        /// Component that refused the operation, e.g. `pipeline` or `transport`.
        component: String,
        current_state: String,
        attempted_operation: String,
        context: ErrorContext,
    },
}

impl StreamError {
    /// Create a configuration error
    pub fn config(
        field: impl Into<String>,
        value: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        Self::Config {
            field: field.into(),
            value: value.into(),
            reason: reason.into(),
            context: ErrorContext::with_severity(ErrorSeverity::Fatal),
        }
    }

    /// Create a connection error
    pub fn connection(operation: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Connection {
            operation: operation.into(),
            reason: reason.into(),
            source: None,
            context: ErrorContext::new(),
        }
    }

    /// Create a connection error that wraps its cause
    pub fn connection_from(
        operation: impl Into<String>,
        source: impl StdError + Send + Sync + 'static,
    ) -> Self {
        Self::Connection {
            operation: operation.into(),
            reason: source.to_string(),
            source: Some(Box::new(source)),
            context: ErrorContext::new(),
        }
    }

    /// Create a protocol error
    pub fn protocol(reason: impl Into<String>) -> Self {
        Self::Protocol {
            reason: reason.into(),
            context: ErrorContext::new(),
        }
    }

    /// Create an I/O error
    pub fn io(operation: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            operation: operation.into(),
            source,
            context: ErrorContext::new(),
        }
    }

    /// Create an element construction error
    pub fn element(
        role: ElementRole,
        element: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        Self::Element {
            role,
            element: element.into(),
            reason: reason.into(),
            context: ErrorContext::with_severity(ErrorSeverity::Debug),
        }
    }

    /// Create a fallback-exhausted error
    pub fn fallback_exhausted(role: ElementRole, tried: Vec<String>) -> Self {
        Self::FallbackExhausted {
            role,
            tried,
            context: ErrorContext::with_severity(ErrorSeverity::Fatal),
        }
    }

    /// Create a backend start error
    pub fn backend_start(reason: impl Into<String>) -> Self {
        Self::BackendStart {
            reason: reason.into(),
            context: ErrorContext::with_severity(ErrorSeverity::Fatal),
        }
    }

    /// Create a state error
    pub fn state(
        component: impl Into<String>,
        current_state: impl Into<String>,
        attempted_operation: impl Into<String>,
    ) -> Self {
        Self::State {
            component: component.into(),
            current_state: current_state.into(),
            attempted_operation: attempted_operation.into(),
            context: ErrorContext::with_severity(ErrorSeverity::Warning),
        }
    }

    /// Add context to the error
    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        self.context_mut().context = Some(context.into());
        self
    }

    /// Add operation context
    pub fn with_operation(mut self, operation: impl Into<String>) -> Self {
        self.context_mut().operation = Some(operation.into());
        self
    }

    /// Set severity
    pub fn with_severity(mut self, severity: ErrorSeverity) -> Self {
        self.context_mut().severity = severity;
        self
    }

    /// Get the error context
    pub fn context(&self) -> &ErrorContext {
        match self {
            Self::Config { context, .. }
            | Self::Connection { context, .. }
            | Self::Protocol { context, .. }
            | Self::Io { context, .. }
            | Self::Element { context, .. }
            | Self::FallbackExhausted { context, .. }
            | Self::BackendStart { context, .. }
            | Self::State { context, .. } => context,
        }
    }

    fn context_mut(&mut self) -> &mut ErrorContext {
        match self {
            Self::Config { context, .. }
            | Self::Connection { context, .. }
            | Self::Protocol { context, .. }
            | Self::Io { context, .. }
            | Self::Element { context, .. }
            | Self::FallbackExhausted { context, .. }
            | Self::BackendStart { context, .. }
            | Self::State { context, .. } => context,
        }
    }

    /// Severity recorded in the context
    pub fn severity(&self) -> ErrorSeverity {
        self.context().severity
    }

    /// Get the error category as a string
    pub fn category(&self) -> &'static str {
        match self {
            Self::Config { .. } => "config",
            Self::Connection { .. } => "connection",
            Self::Protocol { .. } => "protocol",
            Self::Io { .. } => "io",
            Self::Element { .. } => "element",
            Self::FallbackExhausted { .. } => "fallback_exhausted",
            Self::BackendStart { .. } => "backend_start",
            Self::State { .. } => "state",
        }
    }

    /// How the error is handled by the component that observes it.
    pub fn class(&self) -> ErrorClass {
        match self {
            Self::Element { .. } | Self::State { .. } => ErrorClass::Transient,
            Self::Connection { .. } | Self::Protocol { .. } | Self::Io { .. } => {
                ErrorClass::Recoverable
            }
            Self::Config { .. } | Self::FallbackExhausted { .. } | Self::BackendStart { .. } => {
                ErrorClass::Fatal
            }
        }
    }
}

impl fmt::Display for StreamError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StreamError::Config {
                field,
                value,
                reason,
                ..
            } => {
                write!(
                    f,
                    "Configuration error in '{}': {} (value: {})",
                    field, reason, value
                )
            }
            StreamError::Connection {
                operation, reason, ..
            } => {
                write!(f, "Connection error during {}: {}", operation, reason)
            }
            StreamError::Protocol { reason, .. } => {
                write!(f, "WebSocket protocol error: {}", reason)
            }
            StreamError::Io {
                operation, source, ..
            } => {
                write!(f, "I/O error during {}: {}", operation, source)
            }
            StreamError::Element {
                role,
                element,
                reason,
                ..
            } => {
                write!(f, "Failed to create {} '{}': {}", role, element, reason)
            }
            StreamError::FallbackExhausted { role, tried, .. } => {
                write!(
                    f,
                    "No usable {} among candidates [{}]",
                    role,
                    tried.join(", ")
                )
            }
            StreamError::BackendStart { reason, .. } => {
                write!(f, "Failed to start decode pipeline: {}", reason)
            }
            StreamError::State {
                component,
                current_state,
                attempted_operation,
                ..
            } => {
                write!(
                    f,
                    "Cannot {} while {} is {}",
                    attempted_operation, component, current_state
                )
            }
        }
    }
}

impl StdError for StreamError {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        match self {
            Self::Io { source, .. } => Some(source),
            Self::Connection {
                source: Some(source),
                ..
            } => Some(source.as_ref()),
            _ => None,
        }
    }
}

/// Result type alias using our custom error type
pub type StreamResult<T> = Result<T, StreamError>;

impl From<std::io::Error> for StreamError {
    fn from(error: std::io::Error) -> Self {
        Self::io("socket", error)
    }
}

impl From<tungstenite::Error> for StreamError {
    fn from(error: tungstenite::Error) -> Self {
        match error {
            tungstenite::Error::Io(source) => Self::io("websocket read", source),
            tungstenite::Error::Protocol(protocol) => Self::protocol(protocol.to_string()),
            other => Self::connection_from("websocket", other),
        }
    }
}

impl From<serde_json::Error> for StreamError {
    fn from(error: serde_json::Error) -> Self {
        Self::config("json", error.to_string(), "failed to parse configuration")
    }
}

#[cfg(feature = "gstreamer-backend")]
impl From<gstreamer::glib::Error> for StreamError {
    fn from(error: gstreamer::glib::Error) -> Self {
        Self::backend_start(error.to_string())
    }
}

#[cfg(feature = "gstreamer-backend")]
impl From<gstreamer::StateChangeError> for StreamError {
    fn from(error: gstreamer::StateChangeError) -> Self {
        Self::backend_start(error.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_creation() {
        let error = StreamError::config("reconnect_delay_ms", "0", "must be greater than 0");
        assert_eq!(error.category(), "config");
        assert_eq!(error.class(), ErrorClass::Fatal);
        assert!(error.to_string().contains("reconnect_delay_ms"));
    }

    #[test]
    fn test_error_with_context() {
        let error = StreamError::connection("handshake", "refused")
            .with_operation("reconnect")
            .with_context("ws://localhost:9000")
            .with_severity(ErrorSeverity::Warning);

        assert_eq!(error.context().operation.as_deref(), Some("reconnect"));
        assert_eq!(error.context().context.as_deref(), Some("ws://localhost:9000"));
        assert_eq!(error.severity(), ErrorSeverity::Warning);
    }

    #[test]
    fn test_error_classification() {
        let candidate = StreamError::element(ElementRole::Decoder, "nvh264dec", "not installed");
        assert_eq!(candidate.class(), ErrorClass::Transient);
        assert_eq!(candidate.severity(), ErrorSeverity::Debug);

        let exhausted = StreamError::fallback_exhausted(
            ElementRole::Sink,
            vec!["xvimagesink".into(), "autovideosink".into()],
        );
        assert_eq!(exhausted.class(), ErrorClass::Fatal);
        assert_eq!(
            exhausted.to_string(),
            "No usable sink among candidates [xvimagesink, autovideosink]"
        );
    }

    #[test]
    fn test_state_error_names_component() {
        let error = StreamError::state("transport", "disconnected", "send");
        assert_eq!(error.to_string(), "Cannot send while transport is disconnected");
        assert_eq!(error.class(), ErrorClass::Transient);

        let error = StreamError::state("pipeline", "stopped", "initialize");
        assert_eq!(error.to_string(), "Cannot initialize while pipeline is stopped");
    }

    #[test]
    fn test_io_source_is_preserved() {
        let io = std::io::Error::new(std::io::ErrorKind::ConnectionReset, "reset");
        let error: StreamError = io.into();
        assert_eq!(error.class(), ErrorClass::Recoverable);
        assert!(error.source().is_some());
    }
}
