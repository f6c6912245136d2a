//! WebSocket client transport
//!
//! One [`WebSocketTransport`] owns one byte stream for its whole life:
//!
//! ```text
//! idle ──connect()──► connecting ──stream ready──► handshaking ──101──► open ──► closed
//!   └───────────────────────┴──────────────┴──────────────────────────────┴──► failed
//! ```
//!
//! Received bytes are buffered and run through the frame decoder until it
//! needs more input; only then is the stream read again. Everything the owner
//! needs to know arrives as a [`TransportEvent`] on the channel returned by
//! the constructor.

pub mod assembler;
pub mod frame;
pub mod handshake;

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::{Buf, Bytes, BytesMut};
use parking_lot::Mutex;
use tokio::io::{AsyncReadExt, AsyncWriteExt, WriteHalf};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, trace, warn};

use crate::error::{Error, Result};
use crate::transport::connector::{BoxedStream, Endpoint, StreamConnector, TlsConnector};
use crate::transport::{TransportEvent, TransportState};

pub use assembler::MessageAssembler;
pub use frame::{Frame, OpCode};
pub use handshake::{HandshakeResponse, HandshakeState, UpgradeRequest};

// Initial receive buffer size
const READ_BUFFER_SIZE: usize = 8192;
// Default channel capacity
const DEFAULT_CHANNEL_CAPACITY: usize = 100;
// Largest upgrade response head accepted before the blank line
const MAX_HANDSHAKE_HEAD: usize = 8192;
// Upper bound on a graceful stream shutdown
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(2);

/// Normal closure status code
pub const CLOSE_NORMAL: u16 = 1000;

/// Subprotocol for SIP over WebSocket (RFC 7118)
pub const SIP_SUBPROTOCOL: &str = "sip";

/// Settings for one WebSocket connection
#[derive(Debug, Clone)]
pub struct WsConfig {
    /// `ws://` or `wss://` URL of the gateway
    pub url: String,
    /// Subprotocol to request
    pub subprotocol: Option<String>,
    /// Optional `Origin` header
    pub origin: Option<String>,
    /// Optional `User-Agent` header
    pub user_agent: Option<String>,
    /// Capacity of the event channel
    pub channel_capacity: usize,
}

impl WsConfig {
    /// Configuration for `url` requesting the `sip` subprotocol
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            subprotocol: Some(SIP_SUBPROTOCOL.to_string()),
            origin: None,
            user_agent: None,
            channel_capacity: DEFAULT_CHANNEL_CAPACITY,
        }
    }

    /// Set or clear the requested subprotocol
    pub fn with_subprotocol(mut self, subprotocol: Option<String>) -> Self {
        self.subprotocol = subprotocol;
        self
    }

    /// Send an `Origin` header
    pub fn with_origin(mut self, origin: impl Into<String>) -> Self {
        self.origin = Some(origin.into());
        self
    }

    /// Send a `User-Agent` header
    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = Some(user_agent.into());
        self
    }

    /// Change the event channel capacity
    pub fn with_channel_capacity(mut self, capacity: usize) -> Self {
        self.channel_capacity = capacity.max(1);
        self
    }
}

/// WebSocket client transport for SIP messages
#[derive(Clone)]
pub struct WebSocketTransport {
    inner: Arc<WebSocketInner>,
}

struct WebSocketInner {
    config: WsConfig,
    endpoint: Endpoint,
    connector: Arc<dyn StreamConnector>,
    state: Mutex<TransportState>,
    writer: tokio::sync::Mutex<Option<WriteHalf<BoxedStream>>>,
    events_tx: mpsc::Sender<TransportEvent>,
    terminated: AtomicBool,
    keepalive: Mutex<Option<JoinHandle<()>>>,
    reader: Mutex<Option<JoinHandle<()>>>,
}

impl WebSocketTransport {
    /// Create a transport that connects over TCP/TLS
    pub fn new(config: WsConfig) -> Result<(Self, mpsc::Receiver<TransportEvent>)> {
        let connector = Arc::new(TlsConnector::new()?);
        Self::with_connector(config, connector)
    }

    /// Create a transport that obtains its stream from `connector`
    pub fn with_connector(
        config: WsConfig,
        connector: Arc<dyn StreamConnector>,
    ) -> Result<(Self, mpsc::Receiver<TransportEvent>)> {
        let endpoint = Endpoint::parse(&config.url)?;
        let (events_tx, events_rx) = mpsc::channel(config.channel_capacity.max(1));

        let transport = WebSocketTransport {
            inner: Arc::new(WebSocketInner {
                config,
                endpoint,
                connector,
                state: Mutex::new(TransportState::Idle),
                writer: tokio::sync::Mutex::new(None),
                events_tx,
                terminated: AtomicBool::new(false),
                keepalive: Mutex::new(None),
                reader: Mutex::new(None),
            }),
        };

        Ok((transport, events_rx))
    }

    /// The parsed gateway endpoint
    pub fn endpoint(&self) -> &Endpoint {
        &self.inner.endpoint
    }

    /// Current lifecycle state
    pub fn state(&self) -> TransportState {
        *self.inner.state.lock()
    }

    /// Whether the handshake has completed and the connection is still up
    pub fn is_open(&self) -> bool {
        self.state() == TransportState::Open
    }

    /// Whether a terminal event has been emitted
    pub fn is_closed(&self) -> bool {
        self.inner.terminated.load(Ordering::SeqCst)
    }

    /// Whether a keepalive timer is currently running
    pub fn is_keepalive_active(&self) -> bool {
        self.inner
            .keepalive
            .lock()
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }

    /// Start connecting in the background
    ///
    /// Returns immediately; progress is reported through events.
    pub fn connect(&self) -> Result<()> {
        {
            let mut state = self.inner.state.lock();
            if *state != TransportState::Idle {
                return Err(Error::AlreadyStarted);
            }
            *state = TransportState::Connecting;
        }

        info!("Connecting WebSocket to {}", self.inner.endpoint);

        let transport = self.clone();
        let handle = tokio::spawn(async move {
            let stream = match transport
                .inner
                .connector
                .connect(&transport.inner.endpoint)
                .await
            {
                Ok(stream) => stream,
                Err(e) => {
                    error!("WebSocket connection failed: {}", e);
                    transport.fail(&e).await;
                    return;
                }
            };
            transport.run(stream).await;
        });
        *self.inner.reader.lock() = Some(handle);

        Ok(())
    }

    /// Send a text message
    ///
    /// Fails with [`Error::NotConnected`] and writes nothing before the
    /// handshake completes. A write failure ends the transport.
    pub async fn send(&self, text: &str) -> Result<()> {
        let state = self.state();
        if state != TransportState::Open {
            warn!("Dropping outbound message, WebSocket is {}", state);
            return Err(Error::NotConnected);
        }

        trace!("Sending text frame:\n{}", text);
        if let Err(e) = self.write_frame(OpCode::Text, text.as_bytes()).await {
            error!("Failed to send text frame: {}", e);
            self.fail(&e).await;
            return Err(e);
        }
        Ok(())
    }

    /// Start sending a ping every `interval`, replacing any running timer
    pub fn start_keepalive(&self, interval: Duration) {
        if interval.is_zero() {
            warn!("Ignoring zero keepalive interval");
            return;
        }
        if self.is_closed() {
            debug!("Not starting keepalive on a closed transport");
            return;
        }

        let transport = self.clone();
        let handle = tokio::spawn(async move {
            let start = tokio::time::Instant::now() + interval;
            let mut ticker = tokio::time::interval_at(start, interval);
            loop {
                ticker.tick().await;
                if transport.is_closed() {
                    break;
                }
                let payload: [u8; 4] = rand::random();
                trace!("Sending keepalive ping");
                if let Err(e) = transport.write_frame(OpCode::Ping, &payload).await {
                    warn!("Keepalive ping failed: {}", e);
                    transport.fail(&e).await;
                    break;
                }
            }
        });

        debug!("Keepalive started, interval {:?}", interval);
        if let Some(previous) = self.inner.keepalive.lock().replace(handle) {
            previous.abort();
        }
    }

    /// Stop the keepalive timer, if any
    pub fn stop_keepalive(&self) {
        if let Some(handle) = self.inner.keepalive.lock().take() {
            debug!("Keepalive stopped");
            handle.abort();
        }
    }

    /// Close the connection
    ///
    /// After the handshake a Close frame carrying `code` and `reason` is sent
    /// first; before it the stream is simply dropped. Emits
    /// [`TransportEvent::Closed`] unless a terminal event was already sent.
    pub async fn close(&self, code: u16, reason: Option<&str>) -> Result<()> {
        if self.is_closed() {
            return Ok(());
        }

        if self.is_open() {
            let payload = frame::close_payload(code, reason);
            if let Err(e) = self.write_frame(OpCode::Close, &payload).await {
                warn!("Failed to send close frame: {}", e);
            }
        }

        info!("Closing WebSocket to {} with code {}", self.inner.endpoint, code);
        self.terminate(
            TransportState::Closed,
            TransportEvent::Closed {
                code: Some(code),
                reason: reason.map(str::to_string),
            },
        )
        .await;
        Ok(())
    }

    // Drives the handshake and then the frame loop until the stream ends
    async fn run(&self, stream: BoxedStream) {
        let (mut reader, writer) = tokio::io::split(stream);
        {
            let mut guard = self.inner.writer.lock().await;
            if self.is_closed() {
                return;
            }
            *guard = Some(writer);
        }

        self.set_state(TransportState::Handshaking);
        let handshake = HandshakeState::new(self.inner.config.subprotocol.clone());
        let host = self.inner.endpoint.host_header();
        let request = handshake.request(&UpgradeRequest {
            host: &host,
            resource: &self.inner.endpoint.resource,
            origin: self.inner.config.origin.as_deref(),
            user_agent: self.inner.config.user_agent.as_deref(),
        });

        debug!("Sending WebSocket upgrade request:\n{}", request);
        if let Err(e) = self.write_raw(request.as_bytes()).await {
            error!("Failed to send upgrade request: {}", e);
            self.fail(&e).await;
            return;
        }

        let mut pending_handshake = Some(handshake);
        let mut assembler = MessageAssembler::new();
        let mut buf = BytesMut::with_capacity(READ_BUFFER_SIZE);

        loop {
            match reader.read_buf(&mut buf).await {
                Ok(0) => {
                    if !self.is_closed() {
                        info!("WebSocket stream ended by peer");
                        self.terminate(
                            TransportState::Closed,
                            TransportEvent::Closed {
                                code: None,
                                reason: None,
                            },
                        )
                        .await;
                    }
                    break;
                }
                Ok(n) => trace!("Received {} bytes", n),
                Err(e) => {
                    if !self.is_closed() {
                        error!("Error reading from WebSocket stream: {}", e);
                        self.fail(&Error::Io(e)).await;
                    }
                    break;
                }
            }

            if self.is_closed() {
                break;
            }

            if let Some(handshake) = pending_handshake.as_ref() {
                let Some(end) = handshake::find_head_end(&buf) else {
                    if buf.len() > MAX_HANDSHAKE_HEAD {
                        let e = Error::HandshakeStatus(format!(
                            "no end of response head within {} bytes",
                            MAX_HANDSHAKE_HEAD
                        ));
                        error!("WebSocket handshake failed: {}", e);
                        self.fail(&e).await;
                        break;
                    }
                    continue;
                };
                let head = buf.split_to(end);
                trace!("Upgrade response:\n{}", String::from_utf8_lossy(&head));
                match handshake.validate(&head) {
                    Ok(response) => {
                        pending_handshake = None;
                        self.set_state(TransportState::Open);
                        info!(
                            "WebSocket open to {} (subprotocol {:?})",
                            self.inner.endpoint, response.protocol
                        );
                        self.emit(TransportEvent::Open {
                            protocol: response.protocol,
                        })
                        .await;
                    }
                    Err(e) => {
                        error!("WebSocket handshake failed: {}", e);
                        self.fail(&e).await;
                        break;
                    }
                }
            }

            match self.drain_frames(&mut buf, &mut assembler).await {
                Ok(true) => {}
                Ok(false) => break,
                Err(e) => {
                    error!("WebSocket frame error: {}", e);
                    self.fail(&e).await;
                    break;
                }
            }
        }
    }

    // Decodes and dispatches every complete frame in `buf`. Returns false once
    // the connection is finished.
    async fn drain_frames(&self, buf: &mut BytesMut, assembler: &mut MessageAssembler) -> Result<bool> {
        while let Some((frame, used)) = frame::decode(&buf[..])? {
            buf.advance(used);
            if self.is_closed() {
                return Ok(false);
            }
            trace!(
                "Frame {:?} fin={} len={}",
                frame.opcode,
                frame.fin,
                frame.payload.len()
            );

            match frame.opcode {
                OpCode::Text | OpCode::Continuation => {
                    if let Some(text) = assembler.push(&frame) {
                        debug!("Received text message ({} bytes)", text.len());
                        self.emit(TransportEvent::Message { text }).await;
                    }
                }
                OpCode::Binary => {
                    debug!("Ignoring binary frame ({} bytes)", frame.payload.len());
                }
                OpCode::Ping => {
                    debug!("Ping received, sending pong");
                    self.write_frame(OpCode::Pong, &frame.payload).await?;
                }
                OpCode::Pong => trace!("Pong received"),
                OpCode::Close => {
                    let (code, reason) = frame::parse_close_payload(&frame.payload);
                    info!("WebSocket closed by server: code={:?} reason={:?}", code, reason);
                    let echo = code
                        .map(|code| frame::close_payload(code, None))
                        .unwrap_or_else(Bytes::new);
                    if let Err(e) = self.write_frame(OpCode::Close, &echo).await {
                        debug!("Could not answer close frame: {}", e);
                    }
                    self.terminate(TransportState::Closed, TransportEvent::Closed { code, reason })
                        .await;
                    return Ok(false);
                }
            }
        }
        Ok(true)
    }

    async fn write_frame(&self, opcode: OpCode, payload: &[u8]) -> Result<()> {
        let encoded = frame::encode(opcode, payload);
        self.write_raw(&encoded).await
    }

    async fn write_raw(&self, data: &[u8]) -> Result<()> {
        let mut guard = self.inner.writer.lock().await;
        let writer = guard.as_mut().ok_or(Error::NotConnected)?;
        writer.write_all(data).await?;
        writer.flush().await?;
        Ok(())
    }

    fn set_state(&self, state: TransportState) {
        let mut current = self.inner.state.lock();
        if !current.is_terminal() {
            debug!("WebSocket state {} -> {}", *current, state);
            *current = state;
        }
    }

    async fn emit(&self, event: TransportEvent) {
        if self.is_closed() {
            return;
        }
        if let Err(e) = self.inner.events_tx.send(event).await {
            debug!("Transport event receiver dropped: {}", e);
        }
    }

    async fn fail(&self, error: &Error) {
        self.terminate(
            TransportState::Failed,
            TransportEvent::Error {
                error: error.to_string(),
            },
        )
        .await;
    }

    // Emits the single terminal event and releases the stream and timers.
    // The event is queued before anything is awaited, and task handles are
    // aborted last so this is safe to call from inside either task.
    async fn terminate(&self, state: TransportState, event: TransportEvent) {
        if self.inner.terminated.swap(true, Ordering::SeqCst) {
            return;
        }
        *self.inner.state.lock() = state;

        self.queue_terminal_event(event);

        let writer = self.inner.writer.lock().await.take();
        if let Some(mut writer) = writer {
            match tokio::time::timeout(SHUTDOWN_TIMEOUT, writer.shutdown()).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => debug!("Error shutting down WebSocket stream: {}", e),
                Err(_) => debug!("Timed out shutting down WebSocket stream"),
            }
        }

        if let Some(handle) = self.inner.keepalive.lock().take() {
            handle.abort();
        }
        if let Some(handle) = self.inner.reader.lock().take() {
            handle.abort();
        }
    }

    // The caller may be the only consumer of the channel (an owner closing
    // from its event loop), so a full channel must not block here.
    fn queue_terminal_event(&self, event: TransportEvent) {
        match self.inner.events_tx.try_send(event) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(event)) => {
                debug!("Event channel full, queueing terminal event in the background");
                let events_tx = self.inner.events_tx.clone();
                tokio::spawn(async move {
                    if let Err(e) = events_tx.send(event).await {
                        debug!("Transport event receiver dropped: {}", e);
                    }
                });
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                debug!("Transport event receiver dropped");
            }
        }
    }
}

impl fmt::Debug for WebSocketTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "WebSocketTransport({}, {})", self.inner.endpoint, self.state())
    }
}
