//! Registration session state machine
//!
//! A [`RegistrationSession`] runs exactly one REGISTER transaction over a
//! fresh [`WebSocketTransport`]:
//!
//! 1. `start()` arms the response timer and starts the transport connecting
//! 2. when the transport opens, the pre-built REGISTER is sent and the
//!    keepalive timer started
//! 3. every received SIP message marks a response as observed; only a
//!    response with `CSeq: 1 REGISTER` decides the outcome
//! 4. a transport close or error, or the timer firing with nothing observed,
//!    ends the attempt as a failure
//!
//! All phase changes run on a single driver task and pass through one
//! transition guard, so the outcome is reported at most once no matter how
//! transport events and the timer race.
//!
//! # Examples
//!
//! ```rust,no_run
//! use uuid::Uuid;
//! use wsreg_client_core::{RegistrationConfig, RegistrationSession, SessionEvent};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = RegistrationConfig::new("wss://gw.example.com/ws", "pbx.example.com", "1001");
//! let (session, mut events) = RegistrationSession::new(config, Uuid::new_v4())?;
//! session.start()?;
//!
//! while let Some(event) = events.recv().await {
//!     match event {
//!         SessionEvent::Log { message } => println!("{}", message),
//!         SessionEvent::Finished(outcome) => {
//!             println!("outcome: {}", outcome);
//!             break;
//!         }
//!         SessionEvent::StateChanged { .. } => {}
//!     }
//! }
//! session.stop();
//! # Ok(())
//! # }
//! ```

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn, Level};
use uuid::Uuid;

use wsreg_sip_core::{build_register, RegisterParams, SipMessage};
use wsreg_sip_transport::{StreamConnector, TransportEvent, WebSocketTransport, CLOSE_NORMAL};

use crate::config::RegistrationConfig;
use crate::error::{Error, Result};
use crate::events::{RegistrationOutcome, SessionEvent, SessionState};
use crate::instance::InstanceIdStore;

/// CSeq number of the single REGISTER this session sends
const REGISTER_CSEQ: u32 = 1;

/// One REGISTER attempt over a WebSocket transport
#[derive(Clone)]
pub struct RegistrationSession {
    inner: Arc<SessionInner>,
}

struct SessionInner {
    config: RegistrationConfig,
    params: RegisterParams,
    register_text: String,
    connector: Option<Arc<dyn StreamConnector>>,
    state: Mutex<SessionState>,
    response_observed: AtomicBool,
    events_tx: mpsc::UnboundedSender<SessionEvent>,
    cancel: CancellationToken,
    transport: Mutex<Option<WebSocketTransport>>,
    driver: Mutex<Option<JoinHandle<()>>>,
}

impl RegistrationSession {
    /// Create a session that connects over TCP/TLS
    ///
    /// The REGISTER text, including its Call-ID, tag and branch, is fixed
    /// here and never changes for the lifetime of the session.
    pub fn new(
        config: RegistrationConfig,
        instance_id: Uuid,
    ) -> Result<(Self, mpsc::UnboundedReceiver<SessionEvent>)> {
        Self::build(config, instance_id, None)
    }

    /// Create a session reading its instance id from `store`
    pub fn from_store(
        config: RegistrationConfig,
        store: &dyn InstanceIdStore,
    ) -> Result<(Self, mpsc::UnboundedReceiver<SessionEvent>)> {
        let instance_id = store.load_or_create()?;
        Self::build(config, instance_id, None)
    }

    /// Create a session whose transport obtains its stream from `connector`
    pub fn with_connector(
        config: RegistrationConfig,
        instance_id: Uuid,
        connector: Arc<dyn StreamConnector>,
    ) -> Result<(Self, mpsc::UnboundedReceiver<SessionEvent>)> {
        Self::build(config, instance_id, Some(connector))
    }

    fn build(
        config: RegistrationConfig,
        instance_id: Uuid,
        connector: Option<Arc<dyn StreamConnector>>,
    ) -> Result<(Self, mpsc::UnboundedReceiver<SessionEvent>)> {
        config.validate()?;

        let params = RegisterParams::generate(
            config.agent_id.clone(),
            config.domain.clone(),
            config.user_agent.clone(),
            config.expires,
            instance_id,
            config.reg_id,
            config.ice_support,
        )?;
        let register_text = build_register(&params);
        let (events_tx, events_rx) = mpsc::unbounded_channel();

        let session = RegistrationSession {
            inner: Arc::new(SessionInner {
                config,
                params,
                register_text,
                connector,
                state: Mutex::new(SessionState::Idle),
                response_observed: AtomicBool::new(false),
                events_tx,
                cancel: CancellationToken::new(),
                transport: Mutex::new(None),
                driver: Mutex::new(None),
            }),
        };

        Ok((session, events_rx))
    }

    /// The configuration snapshot this session runs with
    pub fn config(&self) -> &RegistrationConfig {
        &self.inner.config
    }

    /// Identifiers used in the REGISTER request
    pub fn register_params(&self) -> &RegisterParams {
        &self.inner.params
    }

    /// The REGISTER request text sent once the transport opens
    pub fn register_text(&self) -> &str {
        &self.inner.register_text
    }

    /// Current phase
    pub fn state(&self) -> SessionState {
        self.inner.state.lock().clone()
    }

    /// Whether the session has reached a terminal phase
    pub fn is_terminal(&self) -> bool {
        self.inner.state.lock().is_terminal()
    }

    /// Whether any SIP message has been received
    pub fn response_observed(&self) -> bool {
        self.inner.response_observed.load(Ordering::SeqCst)
    }

    /// The transport, once `start` has created it
    pub fn transport(&self) -> Option<WebSocketTransport> {
        self.inner.transport.lock().clone()
    }

    /// Start the registration attempt
    ///
    /// Arms the response timer, starts the transport connecting and returns
    /// immediately. Must be called from within a Tokio runtime. Fails if the
    /// session has already been started or stopped.
    pub fn start(&self) -> Result<()> {
        {
            let state = self.inner.state.lock();
            if *state != SessionState::Idle {
                return Err(Error::invalid_state(format!(
                    "cannot start a session that is {}",
                    *state
                )));
            }
        }

        let ws_config = self.inner.config.ws_config();
        let (transport, transport_events) = match &self.inner.connector {
            Some(connector) => WebSocketTransport::with_connector(ws_config, connector.clone())?,
            None => WebSocketTransport::new(ws_config)?,
        };

        let deadline = Instant::now() + self.inner.config.register_timeout;
        if !self.transition(SessionState::Connecting) {
            return Err(Error::invalid_state("session was stopped before it started"));
        }
        *self.inner.transport.lock() = Some(transport.clone());

        self.log(
            Level::INFO,
            format!(
                "Registering {} via {}",
                self.inner.params.aor(),
                transport.endpoint()
            ),
        );

        if let Err(e) = transport.connect() {
            self.fail(None, e.to_string());
            return Err(e.into());
        }

        let session = self.clone();
        let handle = tokio::spawn(async move {
            session.drive(transport, transport_events, deadline).await;
        });
        *self.inner.driver.lock() = Some(handle);

        Ok(())
    }

    /// Cancel the timer and close the transport
    ///
    /// Does not report an outcome. A session stopped before reaching one
    /// moves to [`SessionState::Stopped`]; later transport events are
    /// ignored.
    pub fn stop(&self) {
        debug!("Stop requested for registration session");
        self.inner.cancel.cancel();
        if self.inner.driver.lock().is_none() {
            self.transition(SessionState::Stopped);
        }
    }

    // Runs until the transport reports its terminal event or the session is
    // stopped. The transport marks itself closed before that event is read,
    // so the event, not the flag, ends the loop.
    async fn drive(
        &self,
        transport: WebSocketTransport,
        mut events: mpsc::Receiver<TransportEvent>,
        deadline: Instant,
    ) {
        let timer = tokio::time::sleep_until(deadline);
        tokio::pin!(timer);
        let mut timer_armed = true;

        loop {
            tokio::select! {
                biased;

                _ = self.inner.cancel.cancelled() => {
                    self.log(Level::INFO, "Registration stopped");
                    transport.stop_keepalive();
                    if let Err(e) = transport.close(CLOSE_NORMAL, None).await {
                        warn!("Failed to close transport on stop: {}", e);
                    }
                    self.transition(SessionState::Stopped);
                    break;
                }

                event = events.recv() => {
                    let Some(event) = event else {
                        debug!("Transport event channel closed");
                        break;
                    };
                    let terminal = event.is_terminal();
                    self.on_transport_event(&transport, event).await;
                    if terminal {
                        break;
                    }
                }

                _ = &mut timer, if timer_armed => {
                    timer_armed = false;
                    self.on_timeout(&transport).await;
                }
            }
        }

        debug!("Registration session driver finished in state {}", self.state());
    }

    async fn on_transport_event(&self, transport: &WebSocketTransport, event: TransportEvent) {
        match event {
            TransportEvent::Open { protocol } => self.on_open(transport, protocol).await,
            TransportEvent::Message { text } => self.on_message(transport, &text).await,
            TransportEvent::Closed { code, reason } => {
                if self.is_terminal() {
                    self.log(
                        Level::INFO,
                        format!("WebSocket closed (code {:?}, reason {:?})", code, reason),
                    );
                    return;
                }
                let message = if self.response_observed() {
                    "socket closed before REGISTER response"
                } else {
                    "socket closed before SIP response"
                };
                self.log(
                    Level::ERROR,
                    format!("{} (code {:?}, reason {:?})", message, code, reason),
                );
                self.fail(None, message.to_string());
            }
            TransportEvent::Error { error } => {
                if self.is_terminal() {
                    self.log(Level::DEBUG, format!("Transport error after outcome: {}", error));
                    return;
                }
                self.log(Level::ERROR, format!("Transport error: {}", error));
                self.finish_failed(transport, None, error).await;
            }
        }
    }

    async fn on_open(&self, transport: &WebSocketTransport, protocol: Option<String>) {
        if !self.transition(SessionState::Open) {
            debug!("Ignoring transport open in state {}", self.state());
            return;
        }
        self.log(
            Level::INFO,
            format!(
                "WebSocket open, subprotocol {}",
                protocol.as_deref().unwrap_or("none")
            ),
        );

        if let Err(e) = transport.send(&self.inner.register_text).await {
            self.log(Level::ERROR, format!("Failed to send REGISTER: {}", e));
            // A closed transport has queued its Closed or Error event, which
            // decides the outcome
            if !transport.is_closed() {
                self.finish_failed(transport, None, format!("failed to send REGISTER: {}", e))
                    .await;
            }
            return;
        }
        self.log(
            Level::INFO,
            format!("REGISTER sent, Call-ID {}", self.inner.params.call_id),
        );

        transport.start_keepalive(self.inner.config.keepalive_interval);
    }

    async fn on_message(&self, transport: &WebSocketTransport, text: &str) {
        self.inner.response_observed.store(true, Ordering::SeqCst);

        if self.is_terminal() {
            debug!("Ignoring SIP message after outcome");
            return;
        }

        let message = match SipMessage::parse(text) {
            Ok(message) => message,
            Err(e) => {
                self.log(Level::ERROR, format!("SIP parse failed: {}", e));
                self.finish_failed(transport, None, "SIP parse failed".to_string())
                    .await;
                return;
            }
        };

        let answers_register = message.is_response()
            && matches!(
                message.cseq(),
                Some((REGISTER_CSEQ, method)) if method.eq_ignore_ascii_case("REGISTER")
            );
        if !answers_register {
            self.log(
                Level::WARN,
                format!("Ignoring unrelated SIP message: {}", message.start_line()),
            );
            return;
        }

        let reason = message.reason_phrase().unwrap_or_default().to_string();
        match message.status_code() {
            Some(200) => {
                self.log(Level::INFO, format!("Registered: 200 {}", reason));
                self.transition(SessionState::Registered {
                    status_code: 200,
                    reason,
                });
            }
            Some(code) => {
                self.log(Level::WARN, format!("REGISTER rejected: {} {}", code, reason));
                self.finish_failed(transport, Some(code), reason).await;
            }
            None => {
                self.log(
                    Level::ERROR,
                    format!("REGISTER response without status code: {}", message.start_line()),
                );
                self.finish_failed(transport, None, "response without status code".to_string())
                    .await;
            }
        }
    }

    async fn on_timeout(&self, transport: &WebSocketTransport) {
        if self.response_observed() || self.is_terminal() {
            debug!("Response timer fired after a response; nothing to do");
            return;
        }

        let after = self.inner.config.register_timeout;
        let outcome = RegistrationOutcome::TimedOut { after };
        self.log(Level::WARN, outcome.to_string());
        if self.transition(outcome.into()) {
            close_transport(transport).await;
        }
    }

    // Failure that also tears the transport down
    async fn finish_failed(
        &self,
        transport: &WebSocketTransport,
        status_code: Option<u16>,
        reason: String,
    ) {
        if self.fail(status_code, reason) {
            close_transport(transport).await;
        }
    }

    fn fail(&self, status_code: Option<u16>, reason: String) -> bool {
        self.transition(SessionState::Failed {
            status_code,
            reason,
        })
    }

    // The single transition guard: no-op once a terminal phase is set
    fn transition(&self, next: SessionState) -> bool {
        let mut state = self.inner.state.lock();
        if state.is_terminal() || *state == next {
            return false;
        }

        let previous = std::mem::replace(&mut *state, next.clone());
        info!("Registration session {} -> {}", previous, next);

        let outcome = next.outcome();
        self.emit(SessionEvent::StateChanged {
            previous,
            current: next,
        });
        if let Some(outcome) = outcome {
            self.emit(SessionEvent::Finished(outcome));
        }
        true
    }

    fn log(&self, level: Level, message: impl Into<String>) {
        let message = message.into();
        match level {
            Level::ERROR => error!("{}", message),
            Level::WARN => warn!("{}", message),
            Level::INFO => info!("{}", message),
            _ => debug!("{}", message),
        }
        self.emit(SessionEvent::Log { message });
    }

    fn emit(&self, event: SessionEvent) {
        if self.inner.events_tx.send(event).is_err() {
            debug!("Session event receiver dropped");
        }
    }
}

impl std::fmt::Debug for RegistrationSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RegistrationSession")
            .field("aor", &self.inner.params.aor())
            .field("state", &*self.inner.state.lock())
            .finish()
    }
}

async fn close_transport(transport: &WebSocketTransport) {
    transport.stop_keepalive();
    if let Err(e) = transport.close(CLOSE_NORMAL, None).await {
        warn!("Failed to close transport: {}", e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> RegistrationConfig {
        RegistrationConfig::new("wss://gw.example.com/ws", "pbx.example.com", "1001")
    }

    #[test]
    fn test_new_builds_register_once() {
        let id = Uuid::new_v4();
        let (session, _events) = RegistrationSession::new(config(), id).unwrap();

        let text = session.register_text();
        assert!(text.starts_with("REGISTER sip:pbx.example.com SIP/2.0\r\n"));
        assert!(text.contains(&format!("+sip.instance=\"<urn:uuid:{}>\"", id)));
        assert!(text.contains(&session.register_params().call_id));
        assert_eq!(session.state(), SessionState::Idle);
        assert!(session.transport().is_none());
    }

    #[test]
    fn test_new_rejects_invalid_config() {
        let bad = config().with_expires(0);
        assert!(matches!(
            RegistrationSession::new(bad, Uuid::new_v4()),
            Err(Error::Config { .. })
        ));
    }

    #[test]
    fn test_from_store_uses_stored_id() {
        let id = Uuid::new_v4();
        let store = crate::instance::MemoryInstanceIdStore::with_id(id);
        let (session, _events) = RegistrationSession::from_store(config(), &store).unwrap();
        assert_eq!(session.register_params().instance_id, id);
    }

    #[test]
    fn test_stop_before_start() {
        let (session, mut events) = RegistrationSession::new(config(), Uuid::new_v4()).unwrap();
        session.stop();

        assert_eq!(session.state(), SessionState::Stopped);
        assert_eq!(
            events.try_recv().unwrap(),
            SessionEvent::StateChanged {
                previous: SessionState::Idle,
                current: SessionState::Stopped,
            }
        );
        assert!(events.try_recv().is_err());
        assert!(matches!(session.start(), Err(Error::InvalidState { .. })));
    }

    #[test]
    fn test_transition_guard_is_terminal() {
        let (session, mut events) = RegistrationSession::new(config(), Uuid::new_v4()).unwrap();

        assert!(session.transition(SessionState::Connecting));
        assert!(session.fail(None, "first".into()));
        assert!(!session.fail(None, "second".into()));
        assert!(!session.transition(SessionState::Registered {
            status_code: 200,
            reason: "OK".into(),
        }));

        let mut finished = Vec::new();
        while let Ok(event) = events.try_recv() {
            if let SessionEvent::Finished(outcome) = event {
                finished.push(outcome);
            }
        }
        assert_eq!(
            finished,
            vec![RegistrationOutcome::Failed {
                status_code: None,
                reason: "first".into(),
            }]
        );
    }
}
