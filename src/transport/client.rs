//! Transport lifecycle: connect, receive loop, reconnect, statistics.
//!
//! All network work happens on dedicated threads:
//!
//! - `frame-transport`: opens the connection and runs the receive loop
//! - `frame-transport-reconnect`: sleeps the fixed delay, then connects again
//! - `frame-transport-stats`: logs counters every stats interval
//!
//! Cancellation is cooperative. [`FrameTransport::close`] clears the reconnect
//! intent and raises a close request on the active connection; the receive
//! loop notices it on its next wake-up and performs the close handshake.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::thread;

use arc_swap::ArcSwapOption;
use bytes::Bytes;
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, bounded, unbounded};
use parking_lot::Mutex;
use tracing::{debug, error, info, warn};

use crate::config::TransportConfig;
use crate::core::buffer_pool::{BufferPool, PoolStats};
use crate::error::{StreamError, StreamResult};
use crate::transport::connector::{ConnectRequest, Connector, FrameSource, SourceEvent};
use crate::transport::reassembly::MessageAssembler;
use crate::transport::{ConnectionState, NORMAL_CLOSURE, TransportListener};

/// Snapshot of transport counters.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TransportStats {
    pub state: ConnectionState,
    pub messages_received: u64,
    pub bytes_received: u64,
    pub connections_opened: u64,
    pub reconnects_scheduled: u64,
    pub pool: PoolStats,
}

/// Control block of the connection currently served by the receive thread.
struct ConnectionControl {
    close_requested: AtomicBool,
    outbound_tx: Sender<Bytes>,
    outbound_rx: Receiver<Bytes>,
}

impl ConnectionControl {
    fn new() -> Self {
        let (outbound_tx, outbound_rx) = unbounded();
        Self {
            close_requested: AtomicBool::new(false),
            outbound_tx,
            outbound_rx,
        }
    }

    fn request_close(&self) {
        self.close_requested.store(true, Ordering::SeqCst);
    }

    fn close_requested(&self) -> bool {
        self.close_requested.load(Ordering::SeqCst)
    }
}

enum LoopExit {
    Closed { code: u16, reason: String },
    Failed(StreamError),
}

struct Shared {
    request: ConnectRequest,
    config: TransportConfig,
    pool: Arc<BufferPool>,
    connector: Box<dyn Connector>,
    listener: Arc<dyn TransportListener>,
    connecting: AtomicBool,
    should_reconnect: AtomicBool,
    active: ArcSwapOption<ConnectionControl>,
    messages_received: AtomicU64,
    bytes_received: AtomicU64,
    connections_opened: AtomicU64,
    reconnects_scheduled: AtomicU64,
    stats_stop: Mutex<Option<Sender<()>>>,
}

/// Persistent binary-message client.
///
/// Messages are delivered to the [`TransportListener`] in receive order from a
/// single receive thread. Reassembled messages come from the shared pool and
/// must be released by the listener.
///
/// # Examples
///
/// ```rust,no_run
/// use std::sync::Arc;
/// use frame_ingest::config::TransportConfig;
/// use frame_ingest::core::BufferPool;
/// use frame_ingest::transport::{FrameTransport, InboundMessage, TransportListener, WsConnector};
///
/// struct Print(Arc<BufferPool>);
///
/// impl TransportListener for Print {
///     fn on_message(&self, message: InboundMessage) {
///         println!("{} bytes", message.len());
///         message.release_to(&self.0);
///     }
/// }
///
/// # fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let config = TransportConfig::default();
/// let pool = Arc::new(BufferPool::new(config.pool_size, config.buffer_size, config.direct_buffers));
/// let request = config.connect_request("wss://sych.local/ws/ws_video_heat", "VideoStreamManager/1.0")?;
///
/// let transport = FrameTransport::new(
///     request,
///     config,
///     Arc::clone(&pool),
///     Box::new(WsConnector::new()),
///     Arc::new(Print(pool)),
/// );
/// transport.connect();
/// // ...
/// transport.close();
/// # Ok(())
/// # }
/// ```
pub struct FrameTransport {
    shared: Arc<Shared>,
}

impl FrameTransport {
    pub fn new(
        request: ConnectRequest,
        config: TransportConfig,
        pool: Arc<BufferPool>,
        connector: Box<dyn Connector>,
        listener: Arc<dyn TransportListener>,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                request,
                config,
                pool,
                connector,
                listener,
                connecting: AtomicBool::new(false),
                should_reconnect: AtomicBool::new(false),
                active: ArcSwapOption::empty(),
                messages_received: AtomicU64::new(0),
                bytes_received: AtomicU64::new(0),
                connections_opened: AtomicU64::new(0),
                reconnects_scheduled: AtomicU64::new(0),
                stats_stop: Mutex::new(None),
            }),
        }
    }

    /// Start connecting in the background and keep reconnecting until [`close`](Self::close).
    ///
    /// Does nothing while an attempt is in flight or a connection is open.
    pub fn connect(&self) {
        self.shared.should_reconnect.store(true, Ordering::SeqCst);
        self.shared.start_stats_ticker();
        Shared::spawn_connect(&self.shared);
    }

    /// Stop reconnecting and close the active connection, if any.
    pub fn close(&self) {
        self.shared.should_reconnect.store(false, Ordering::SeqCst);
        if let Some(control) = self.shared.active.load_full() {
            control.request_close();
        }
        if self.shared.stats_stop.lock().take().is_some() {
            debug!("stats ticker stopped");
        }
        info!(url = %self.shared.request.url, "transport closed");
    }

    /// Queue a binary message on the open connection.
    pub fn send(&self, data: impl Into<Bytes>) -> StreamResult<()> {
        let control = self
            .shared
            .active
            .load_full()
            .filter(|control| !control.close_requested())
            .ok_or_else(|| StreamError::state("transport", self.state().to_string(), "send"))?;
        control
            .outbound_tx
            .send(data.into())
            .map_err(|_| StreamError::state("transport", "closed", "send"))
    }

    pub fn is_open(&self) -> bool {
        self.shared
            .active
            .load_full()
            .is_some_and(|control| !control.close_requested())
    }

    pub fn state(&self) -> ConnectionState {
        self.shared.state()
    }

    pub fn stats(&self) -> TransportStats {
        self.shared.stats()
    }

    /// The receive-side pool that reassembled messages come from.
    pub fn pool(&self) -> &Arc<BufferPool> {
        &self.shared.pool
    }

    pub fn url(&self) -> &str {
        &self.shared.request.url
    }
}

impl Drop for FrameTransport {
    fn drop(&mut self) {
        self.close();
    }
}

impl Shared {
    fn state(&self) -> ConnectionState {
        if self.active.load().is_some() {
            ConnectionState::Connected
        } else if self.connecting.load(Ordering::SeqCst) {
            ConnectionState::Connecting
        } else {
            ConnectionState::Disconnected
        }
    }

    fn stats(&self) -> TransportStats {
        TransportStats {
            state: self.state(),
            messages_received: self.messages_received.load(Ordering::Relaxed),
            bytes_received: self.bytes_received.load(Ordering::Relaxed),
            connections_opened: self.connections_opened.load(Ordering::Relaxed),
            reconnects_scheduled: self.reconnects_scheduled.load(Ordering::Relaxed),
            pool: self.pool.stats(),
        }
    }

    /// Claim the single in-flight slot. Fails if an attempt is running or a connection is open.
    fn try_begin_connect(&self) -> bool {
        if self
            .connecting
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            debug!("connection attempt already in flight");
            return false;
        }
        if self.active.load().is_some() {
            debug!("already connected");
            self.connecting.store(false, Ordering::SeqCst);
            return false;
        }
        true
    }

    fn spawn_connect(self: &Arc<Self>) {
        if !self.try_begin_connect() {
            return;
        }
        let shared = Arc::clone(self);
        let spawned = thread::Builder::new()
            .name("frame-transport".into())
            .spawn(move || shared.run_connection());
        if let Err(err) = spawned {
            self.connecting.store(false, Ordering::SeqCst);
            error!(error = %err, "failed to spawn transport thread");
        }
    }

    fn run_connection(self: Arc<Self>) {
        info!(url = %self.request.url, "connecting");
        let source = match self.connector.connect(&self.request) {
            Ok(source) => source,
            Err(err) => {
                self.connecting.store(false, Ordering::SeqCst);
                warn!(url = %self.request.url, error = %err, "connection failed");
                self.listener.on_error(&err);
                self.handle_connection_error();
                return;
            }
        };

        let control = Arc::new(ConnectionControl::new());
        self.active.store(Some(Arc::clone(&control)));
        self.connecting.store(false, Ordering::SeqCst);
        // close() may have run while the handshake was in flight.
        if !self.should_reconnect.load(Ordering::SeqCst) {
            control.request_close();
        }
        self.connections_opened.fetch_add(1, Ordering::Relaxed);
        info!(url = %self.request.url, "connected");
        self.listener.on_connect();

        let exit = self.receive_loop(source, &control);
        self.active.store(None);

        match exit {
            LoopExit::Closed { code, reason } => {
                info!(code, reason = %reason, "connection closed");
                self.listener.on_close(code, &reason);
                if code != NORMAL_CLOSURE {
                    self.handle_connection_error();
                }
            }
            LoopExit::Failed(err) => {
                warn!(error = %err, "connection lost");
                self.listener.on_error(&err);
                self.handle_connection_error();
            }
        }
    }

    fn receive_loop(&self, mut source: Box<dyn FrameSource>, control: &ConnectionControl) -> LoopExit {
        let mut assembler = MessageAssembler::new(
            Arc::clone(&self.pool),
            self.config.scratch_size,
            self.config.trim_interval(),
        );
        let mut close_sent = false;

        loop {
            if control.close_requested() && !close_sent {
                close_sent = true;
                if let Err(err) = source.begin_close(NORMAL_CLOSURE, "client closing") {
                    debug!(error = %err, "close handshake failed");
                    return LoopExit::Closed {
                        code: NORMAL_CLOSURE,
                        reason: String::new(),
                    };
                }
            }

            while let Ok(data) = control.outbound_rx.try_recv() {
                if let Err(err) = source.send(data) {
                    return LoopExit::Failed(err);
                }
            }

            match source.poll() {
                Ok(None) => {}
                Ok(Some(SourceEvent::Fragment { data, last })) => {
                    self.bytes_received
                        .fetch_add(data.len() as u64, Ordering::Relaxed);
                    if let Some(message) = assembler.push_fragment(data, last) {
                        self.messages_received.fetch_add(1, Ordering::Relaxed);
                        self.listener.on_message(message);
                    }
                }
                Ok(Some(SourceEvent::Text(text))) => {
                    warn!(len = text.len(), "unexpected text message ignored");
                }
                Ok(Some(SourceEvent::Closed { code, reason })) => {
                    if assembler.pending_len() > 0 {
                        debug!(pending = assembler.pending_len(), "discarding partial message");
                    }
                    return LoopExit::Closed { code, reason };
                }
                Err(err) if close_sent => {
                    debug!(error = %err, "error while closing");
                    return LoopExit::Closed {
                        code: NORMAL_CLOSURE,
                        reason: String::new(),
                    };
                }
                Err(err) => return LoopExit::Failed(err),
            }
        }
    }

    /// Schedule a reconnect after the fixed delay, unless the transport was closed.
    fn handle_connection_error(self: &Arc<Self>) {
        if !self.should_reconnect.load(Ordering::SeqCst) {
            debug!("reconnect suppressed, transport closed");
            return;
        }
        self.reconnects_scheduled.fetch_add(1, Ordering::Relaxed);
        let delay = self.config.reconnect_delay();
        info!(delay_ms = delay.as_millis() as u64, "scheduling reconnect");

        let shared = Arc::clone(self);
        let spawned = thread::Builder::new()
            .name("frame-transport-reconnect".into())
            .spawn(move || {
                thread::sleep(delay);
                if shared.should_reconnect.load(Ordering::SeqCst) && shared.try_begin_connect() {
                    shared.run_connection();
                }
            });
        if let Err(err) = spawned {
            error!(error = %err, "failed to spawn reconnect thread");
        }
    }

    fn start_stats_ticker(self: &Arc<Self>) {
        let mut slot = self.stats_stop.lock();
        if slot.is_some() {
            return;
        }
        let (stop_tx, stop_rx) = bounded::<()>(1);
        let weak = Arc::downgrade(self);
        let interval = self.config.stats_interval();
        let spawned = thread::Builder::new()
            .name("frame-transport-stats".into())
            .spawn(move || {
                loop {
                    match stop_rx.recv_timeout(interval) {
                        Err(RecvTimeoutError::Timeout) => {
                            let Some(shared) = weak.upgrade() else { break };
                            let stats = shared.stats();
                            info!(
                                state = %stats.state,
                                messages = stats.messages_received,
                                bytes = stats.bytes_received,
                                "transport stats, {}",
                                stats.pool
                            );
                        }
                        Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                    }
                }
            });
        match spawned {
            Ok(_) => *slot = Some(stop_tx),
            Err(err) => error!(error = %err, "failed to spawn stats thread"),
        }
    }
}
