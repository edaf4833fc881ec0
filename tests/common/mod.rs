//! Common test utilities for the frame_ingest integration tests
//!
//! Mock collaborators for driving the transport and the pipeline without a
//! network or a GStreamer installation.

#![allow(dead_code)]

use std::time::{Duration, Instant};

/// Poll `condition` every few milliseconds until it holds or `timeout` passes.
pub fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(2));
    }
    condition()
}

/// Scripted connections standing in for a WebSocket server
pub mod scripted_connector {
    use std::collections::VecDeque;
    use std::io;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use bytes::Bytes;
    use frame_ingest::error::{StreamError, StreamResult};
    use frame_ingest::transport::{ConnectRequest, Connector, FrameSource, SourceEvent};
    use parking_lot::Mutex;

    /// One step of a scripted connection
    #[derive(Debug, Clone)]
    pub enum Step {
        Event(SourceEvent),
        /// Mid-stream I/O failure
        Fail(&'static str),
    }

    pub fn fragment(data: &[u8], last: bool) -> Step {
        Step::Event(SourceEvent::Fragment {
            data: Bytes::copy_from_slice(data),
            last,
        })
    }

    pub fn closed(code: u16) -> Step {
        Step::Event(SourceEvent::Closed {
            code,
            reason: String::new(),
        })
    }

    /// Hands out one script per connection attempt; refuses once they run out.
    pub struct ScriptedConnector {
        scripts: Mutex<VecDeque<Vec<Step>>>,
        attempts: Arc<AtomicUsize>,
        sent: Arc<Mutex<Vec<Bytes>>>,
        connect_delay: Duration,
    }

    impl ScriptedConnector {
        pub fn new(scripts: Vec<Vec<Step>>) -> Self {
            Self {
                scripts: Mutex::new(scripts.into()),
                attempts: Arc::new(AtomicUsize::new(0)),
                sent: Arc::new(Mutex::new(Vec::new())),
                connect_delay: Duration::ZERO,
            }
        }

        /// Make every attempt take `delay` before resolving
        pub fn with_connect_delay(mut self, delay: Duration) -> Self {
            self.connect_delay = delay;
            self
        }

        pub fn attempts(&self) -> Arc<AtomicUsize> {
            Arc::clone(&self.attempts)
        }

        pub fn sent(&self) -> Arc<Mutex<Vec<Bytes>>> {
            Arc::clone(&self.sent)
        }
    }

    impl Connector for ScriptedConnector {
        fn connect(&self, _request: &ConnectRequest) -> StreamResult<Box<dyn FrameSource>> {
            self.attempts.fetch_add(1, Ordering::SeqCst);
            if !self.connect_delay.is_zero() {
                std::thread::sleep(self.connect_delay);
            }
            match self.scripts.lock().pop_front() {
                Some(steps) => Ok(Box::new(ScriptedSource {
                    steps: steps.into(),
                    closing: false,
                    sent: Arc::clone(&self.sent),
                })),
                None => Err(StreamError::connection("handshake", "connection refused")),
            }
        }
    }

    /// Plays its steps, then stays open until the client closes.
    pub struct ScriptedSource {
        steps: VecDeque<Step>,
        closing: bool,
        sent: Arc<Mutex<Vec<Bytes>>>,
    }

    impl FrameSource for ScriptedSource {
        fn poll(&mut self) -> StreamResult<Option<SourceEvent>> {
            if self.closing {
                return Ok(Some(SourceEvent::Closed {
                    code: 1000,
                    reason: "client closing".into(),
                }));
            }
            match self.steps.pop_front() {
                Some(Step::Event(event)) => Ok(Some(event)),
                Some(Step::Fail(reason)) => Err(StreamError::io(
                    "websocket read",
                    io::Error::new(io::ErrorKind::ConnectionReset, reason),
                )),
                None => {
                    std::thread::sleep(Duration::from_millis(2));
                    Ok(None)
                }
            }
        }

        fn send(&mut self, data: Bytes) -> StreamResult<()> {
            self.sent.lock().push(data);
            Ok(())
        }

        fn begin_close(&mut self, _code: u16, _reason: &str) -> StreamResult<()> {
            self.closing = true;
            Ok(())
        }
    }
}

/// Mock decode backend recording everything the pipeline does to it
pub mod mock_backend {
    use std::sync::Arc;

    use crossbeam_channel::{Receiver, Sender};
    use frame_ingest::core::{BufferPool, PooledBuffer};
    use frame_ingest::error::{ElementRole, StreamError, StreamResult};
    use frame_ingest::pipeline::{
        BackendContext, BusCallback, BusEvent, DecodeBackend, FlowResult, PushRejected,
        WindowHandle,
    };
    use parking_lot::Mutex;

    #[derive(Default)]
    pub struct MockState {
        pub missing: Vec<String>,
        pub attempted: Vec<(ElementRole, String)>,
        pub pushed: Vec<Vec<u8>>,
        pub binds: Vec<WindowHandle>,
        pub teardowns: usize,
        pub bus: Option<BusCallback>,
        pub pool: Option<Arc<BufferPool>>,
    }

    /// Shared view of a [`MockBackend`] after it moved into a pipeline
    #[derive(Clone, Default)]
    pub struct MockHandle(pub Arc<Mutex<MockState>>);

    impl MockHandle {
        pub fn pushed(&self) -> Vec<Vec<u8>> {
            self.0.lock().pushed.clone()
        }

        pub fn push_count(&self) -> usize {
            self.0.lock().pushed.len()
        }

        pub fn binds(&self) -> Vec<WindowHandle> {
            self.0.lock().binds.clone()
        }

        pub fn teardowns(&self) -> usize {
            self.0.lock().teardowns
        }

        pub fn attempted(&self, role: ElementRole) -> Vec<String> {
            self.0
                .lock()
                .attempted
                .iter()
                .filter(|(r, _)| *r == role)
                .map(|(_, name)| name.clone())
                .collect()
        }

        /// Raise a bus event the way an engine thread would
        pub fn emit(&self, event: BusEvent) {
            let bus = self.0.lock().bus.clone();
            if let Some(bus) = bus {
                bus(event);
            }
        }
    }

    /// Blocks inside `teardown` until released, to hold the pipeline lock
    pub struct TeardownGate {
        pub entered: Sender<()>,
        pub release: Receiver<()>,
    }

    pub struct MockBackend {
        handle: MockHandle,
        gate: Option<TeardownGate>,
    }

    impl MockBackend {
        pub fn new() -> (Self, MockHandle) {
            let handle = MockHandle::default();
            (
                Self {
                    handle: handle.clone(),
                    gate: None,
                },
                handle,
            )
        }

        /// Elements with these names fail to construct
        pub fn with_missing(self, names: &[&str]) -> Self {
            self.handle.0.lock().missing = names.iter().map(|s| s.to_string()).collect();
            self
        }

        pub fn with_teardown_gate(mut self, gate: TeardownGate) -> Self {
            self.gate = Some(gate);
            self
        }
    }

    impl DecodeBackend for MockBackend {
        fn name(&self) -> &str {
            "mock"
        }

        fn prepare(&mut self, context: &BackendContext) -> StreamResult<()> {
            self.handle.0.lock().pool = Some(Arc::clone(&context.pool));
            Ok(())
        }

        fn create_element(&mut self, role: ElementRole, name: &str) -> StreamResult<()> {
            let mut state = self.handle.0.lock();
            state.attempted.push((role, name.to_string()));
            if state.missing.iter().any(|missing| missing == name) {
                return Err(StreamError::element(role, name, "no such element"));
            }
            Ok(())
        }

        fn start(&mut self, bus: BusCallback) -> StreamResult<()> {
            self.handle.0.lock().bus = Some(bus);
            Ok(())
        }

        fn push(&mut self, buffer: PooledBuffer) -> Result<FlowResult, PushRejected> {
            let mut state = self.handle.0.lock();
            state.pushed.push(buffer.as_slice().to_vec());
            // The engine is done with it right away.
            if let Some(pool) = &state.pool {
                pool.release(buffer);
            }
            Ok(FlowResult::Ok)
        }

        fn bind_window_handle(&mut self, handle: WindowHandle) -> StreamResult<()> {
            self.handle.0.lock().binds.push(handle);
            Ok(())
        }

        fn teardown(&mut self) {
            if let Some(gate) = &self.gate {
                let _ = gate.entered.send(());
                let _ = gate.release.recv();
            }
            let mut state = self.handle.0.lock();
            state.teardowns += 1;
            state.bus = None;
            state.pool = None;
        }
    }
}

/// Observer that keeps what it was told
pub mod recording_observer {
    use std::sync::atomic::{AtomicBool, Ordering};

    use frame_ingest::error::StreamError;
    use frame_ingest::pipeline::{LogLevel, PipelineObserver};
    use parking_lot::Mutex;

    pub struct RecordingObserver {
        pub logs: Mutex<Vec<(LogLevel, String)>>,
        pub errors: Mutex<Vec<String>>,
        pub running: AtomicBool,
    }

    impl Default for RecordingObserver {
        fn default() -> Self {
            Self {
                logs: Mutex::new(Vec::new()),
                errors: Mutex::new(Vec::new()),
                running: AtomicBool::new(true),
            }
        }
    }

    impl RecordingObserver {
        pub fn has_log(&self, level: LogLevel, needle: &str) -> bool {
            self.logs
                .lock()
                .iter()
                .any(|(l, message)| *l == level && message.contains(needle))
        }
    }

    impl PipelineObserver for RecordingObserver {
        fn on_log(&self, level: LogLevel, message: &str) {
            self.logs.lock().push((level, message.to_string()));
        }

        fn on_pipeline_error(&self, error: &StreamError) {
            self.errors.lock().push(error.category().to_string());
        }

        fn is_running(&self) -> bool {
            self.running.load(Ordering::SeqCst)
        }
    }
}

/// Listener collecting transport output
pub mod collecting_listener {
    use std::sync::Arc;

    use frame_ingest::core::BufferPool;
    use frame_ingest::error::StreamError;
    use frame_ingest::transport::{InboundMessage, TransportListener};
    use parking_lot::Mutex;

    pub struct CollectingListener {
        pub pool: Arc<BufferPool>,
        pub messages: Mutex<Vec<(bool, Vec<u8>)>>,
        pub connects: Mutex<usize>,
        pub closes: Mutex<Vec<u16>>,
        pub errors: Mutex<Vec<String>>,
    }

    impl CollectingListener {
        pub fn new(pool: Arc<BufferPool>) -> Self {
            Self {
                pool,
                messages: Mutex::new(Vec::new()),
                connects: Mutex::new(0),
                closes: Mutex::new(Vec::new()),
                errors: Mutex::new(Vec::new()),
            }
        }

        pub fn payloads(&self) -> Vec<Vec<u8>> {
            self.messages.lock().iter().map(|(_, data)| data.clone()).collect()
        }
    }

    impl TransportListener for CollectingListener {
        fn on_message(&self, message: InboundMessage) {
            self.messages
                .lock()
                .push((message.is_pooled(), message.as_slice().to_vec()));
            message.release_to(&self.pool);
        }

        fn on_connect(&self) {
            *self.connects.lock() += 1;
        }

        fn on_close(&self, code: u16, _reason: &str) {
            self.closes.lock().push(code);
        }

        fn on_error(&self, error: &StreamError) {
            self.errors.lock().push(error.category().to_string());
        }
    }
}
