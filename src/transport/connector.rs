//! Connection establishment and the per-connection frame source.
//!
//! [`Connector`] opens a connection and returns a [`FrameSource`], which the
//! transport's receive thread polls until the connection ends. The production
//! implementation, [`WsConnector`], speaks WebSocket over TCP or TLS through
//! `tungstenite` in blocking mode with a short read timeout, so the receive loop
//! wakes up regularly to notice close requests and outbound messages.
//!
//! TLS accepts any certificate and hostname when
//! [`ConnectRequest::accept_invalid_certs`] is set. Streams are served by the
//! same host with self-signed certificates.

use std::io::ErrorKind;
use std::net::{TcpStream, ToSocketAddrs};
use std::time::Duration;

use bytes::Bytes;
use tungstenite::client::IntoClientRequest;
use tungstenite::handshake::client::Response;
use tungstenite::http::{HeaderName, HeaderValue, Uri};
use tungstenite::protocol::CloseFrame;
use tungstenite::protocol::frame::coding::CloseCode;
use tungstenite::stream::MaybeTlsStream;
use tungstenite::{HandshakeError, Message, WebSocket};

use crate::error::{StreamError, StreamResult};
use crate::transport::{NORMAL_CLOSURE, NO_STATUS_RECEIVED};

/// Everything needed to open one connection.
#[derive(Debug, Clone)]
pub struct ConnectRequest {
    pub url: String,
    /// Extra handshake headers, in order.
    pub headers: Vec<(String, String)>,
    pub connect_timeout: Duration,
    /// Read timeout once connected; bounds how long a close request waits.
    pub poll_interval: Duration,
    pub accept_invalid_certs: bool,
}

impl ConnectRequest {
    /// Build a request carrying the fixed handshake headers for `url`.
    pub fn new(url: impl Into<String>, user_agent: &str) -> StreamResult<Self> {
        let url = url.into();
        let headers = handshake_headers(&url, user_agent)?;
        Ok(Self {
            url,
            headers,
            connect_timeout: Duration::from_secs(10),
            poll_interval: Duration::from_millis(100),
            accept_invalid_certs: true,
        })
    }
}

/// Origin, User-Agent, Cache-Control and Pragma headers sent on every handshake.
pub fn handshake_headers(url: &str, user_agent: &str) -> StreamResult<Vec<(String, String)>> {
    let uri: Uri = url
        .parse()
        .map_err(|err: tungstenite::http::uri::InvalidUri| {
            StreamError::config("url", url, err.to_string())
        })?;
    let host = uri
        .host()
        .ok_or_else(|| StreamError::config("url", url, "missing host"))?;

    Ok(vec![
        ("Origin".to_string(), format!("https://{host}")),
        ("User-Agent".to_string(), user_agent.to_string()),
        ("Cache-Control".to_string(), "no-cache".to_string()),
        ("Pragma".to_string(), "no-cache".to_string()),
    ])
}

/// Something that happened on an open connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceEvent {
    /// A binary fragment. `last` marks the end of the message.
    Fragment { data: Bytes, last: bool },
    /// A text message; the stream protocol never sends these.
    Text(String),
    /// The connection ended with the given close code.
    Closed { code: u16, reason: String },
}

/// An open connection, owned by the transport's receive thread.
pub trait FrameSource: Send {
    /// Wait up to the poll interval for the next event. `Ok(None)` means nothing arrived.
    fn poll(&mut self) -> StreamResult<Option<SourceEvent>>;

    /// Queue a binary message to the peer.
    fn send(&mut self, data: Bytes) -> StreamResult<()>;

    /// Start the close handshake. `poll` keeps running until `Closed` is reported.
    fn begin_close(&mut self, code: u16, reason: &str) -> StreamResult<()>;
}

/// Opens connections for a [`FrameTransport`](crate::transport::FrameTransport).
pub trait Connector: Send + Sync {
    fn connect(&self, request: &ConnectRequest) -> StreamResult<Box<dyn FrameSource>>;
}

/// WebSocket connector backed by `tungstenite` and `native-tls`.
#[derive(Debug, Default, Clone, Copy)]
pub struct WsConnector;

impl WsConnector {
    pub fn new() -> Self {
        Self
    }

    fn open_tcp(uri: &Uri, timeout: Duration) -> StreamResult<TcpStream> {
        let host = uri
            .host()
            .ok_or_else(|| StreamError::connection("resolve", "missing host"))?;
        let secure = uri.scheme_str() == Some("wss");
        let port = uri.port_u16().unwrap_or(if secure { 443 } else { 80 });

        let addrs = (host, port)
            .to_socket_addrs()
            .map_err(|err| StreamError::io("resolve", err).with_context(host.to_string()))?;

        let mut last_error = None;
        for addr in addrs {
            match TcpStream::connect_timeout(&addr, timeout) {
                Ok(stream) => return Ok(stream),
                Err(err) => {
                    tracing::debug!(%addr, error = %err, "tcp connect failed");
                    last_error = Some(err);
                }
            }
        }
        Err(match last_error {
            Some(err) => StreamError::io("tcp connect", err).with_context(format!("{host}:{port}")),
            None => StreamError::connection("resolve", format!("no addresses for {host}")),
        })
    }

    fn tls_connector(accept_invalid_certs: bool) -> StreamResult<tungstenite::Connector> {
        let tls = native_tls::TlsConnector::builder()
            .danger_accept_invalid_certs(accept_invalid_certs)
            .danger_accept_invalid_hostnames(accept_invalid_certs)
            .build()
            .map_err(|err| StreamError::connection_from("tls setup", err))?;
        Ok(tungstenite::Connector::NativeTls(tls))
    }
}

impl Connector for WsConnector {
    fn connect(&self, request: &ConnectRequest) -> StreamResult<Box<dyn FrameSource>> {
        let mut http = request.url.as_str().into_client_request()?;
        for (name, value) in &request.headers {
            let header = HeaderName::from_bytes(name.as_bytes())
                .map_err(|err| StreamError::config("headers", name, err.to_string()))?;
            let value = HeaderValue::from_str(value)
                .map_err(|err| StreamError::config("headers", value, err.to_string()))?;
            http.headers_mut().insert(header, value);
        }

        let uri = http.uri().clone();
        let tcp = Self::open_tcp(&uri, request.connect_timeout)?;
        tcp.set_nodelay(true)?;
        // Bounds the handshake; replaced by the poll interval once connected.
        tcp.set_read_timeout(Some(request.connect_timeout))?;
        let control = tcp.try_clone()?;

        let connector = if uri.scheme_str() == Some("wss") {
            Self::tls_connector(request.accept_invalid_certs)?
        } else {
            tungstenite::Connector::Plain
        };

        let (socket, response) =
            tungstenite::client_tls_with_config(http, tcp, None, Some(connector)).map_err(
                |err| match err {
                    HandshakeError::Failure(err) => StreamError::from(err).with_operation("handshake"),
                    HandshakeError::Interrupted(_) => {
                        StreamError::connection("handshake", "timed out waiting for upgrade response")
                    }
                },
            )?;
        log_response(&response);

        control.set_read_timeout(Some(request.poll_interval))?;
        Ok(Box::new(WsSource {
            socket,
            closing: false,
        }))
    }
}

fn log_response(response: &Response) {
    tracing::debug!(status = %response.status(), "websocket upgrade accepted");
}

struct WsSource {
    socket: WebSocket<MaybeTlsStream<TcpStream>>,
    closing: bool,
}

impl FrameSource for WsSource {
    fn poll(&mut self) -> StreamResult<Option<SourceEvent>> {
        match self.socket.read() {
            // tungstenite joins continuation frames itself, so every binary
            // message arrives here whole.
            Ok(Message::Binary(data)) => Ok(Some(SourceEvent::Fragment { data, last: true })),
            Ok(Message::Text(text)) => Ok(Some(SourceEvent::Text(text.as_str().to_owned()))),
            Ok(Message::Close(frame)) => {
                let (code, reason) = frame
                    .map(|f| (u16::from(f.code), f.reason.as_str().to_owned()))
                    .unwrap_or((NO_STATUS_RECEIVED, String::new()));
                Ok(Some(SourceEvent::Closed { code, reason }))
            }
            Ok(Message::Ping(_)) | Ok(Message::Pong(_)) | Ok(Message::Frame(_)) => Ok(None),
            Err(tungstenite::Error::Io(err))
                if matches!(err.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) =>
            {
                Ok(None)
            }
            Err(tungstenite::Error::ConnectionClosed) | Err(tungstenite::Error::AlreadyClosed) => {
                Ok(Some(SourceEvent::Closed {
                    code: NORMAL_CLOSURE,
                    reason: String::new(),
                }))
            }
            Err(err) => Err(err.into()),
        }
    }

    fn send(&mut self, data: Bytes) -> StreamResult<()> {
        self.socket.send(Message::Binary(data))?;
        Ok(())
    }

    fn begin_close(&mut self, code: u16, reason: &str) -> StreamResult<()> {
        if self.closing {
            return Ok(());
        }
        self.closing = true;
        let frame = CloseFrame {
            code: CloseCode::from(code),
            reason: reason.to_owned().into(),
        };
        match self.socket.close(Some(frame)) {
            Ok(()) => Ok(()),
            Err(tungstenite::Error::Io(err)) if err.kind() == ErrorKind::WouldBlock => Ok(()),
            Err(tungstenite::Error::ConnectionClosed) | Err(tungstenite::Error::AlreadyClosed) => {
                Ok(())
            }
            Err(err) => Err(err.into()),
        }
    }
}
