//! Registration session tests against an in-process fake gateway
//!
//! The gateway side of a `tokio::io::duplex` pipe completes the WebSocket
//! handshake, reads the REGISTER the session sends and answers with canned
//! SIP responses.

use std::sync::Arc;
use std::time::Duration;

use bytes::BytesMut;
use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream};
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::time::timeout;
use uuid::Uuid;

use wsreg_client_core::{
    Error, RegistrationConfig, RegistrationOutcome, RegistrationSession, SessionEvent,
    SessionState,
};
use wsreg_sip_core::SipMessage;
use wsreg_sip_transport::transport::ws::frame::{self, Frame, OpCode};
use wsreg_sip_transport::transport::ws::handshake::{accept_key, find_head_end};
use wsreg_sip_transport::PreparedStream;

const WAIT: Duration = Duration::from_secs(3);

struct FakeGateway {
    stream: DuplexStream,
    buf: BytesMut,
}

impl FakeGateway {
    async fn read_request(&mut self) -> String {
        loop {
            if let Some(end) = find_head_end(&self.buf) {
                let head = self.buf.split_to(end);
                return String::from_utf8(head.to_vec()).unwrap();
            }
            let n = self.stream.read_buf(&mut self.buf).await.unwrap();
            assert!(n > 0, "client closed before sending upgrade request");
        }
    }

    async fn accept(&mut self) {
        self.accept_then(&[]).await;
    }

    /// Complete the handshake with `trailing` bytes in the same write
    async fn accept_then(&mut self, trailing: &[u8]) {
        let request = self.read_request().await;
        let key = request
            .lines()
            .find_map(|l| l.strip_prefix("Sec-WebSocket-Key: "))
            .expect("request carries a key");
        let mut response = format!(
            "HTTP/1.1 101 Switching Protocols\r\n\
             Upgrade: websocket\r\n\
             Connection: Upgrade\r\n\
             Sec-WebSocket-Accept: {}\r\n\
             Sec-WebSocket-Protocol: sip\r\n\r\n",
            accept_key(key.trim())
        )
        .into_bytes();
        response.extend_from_slice(trailing);
        self.write(&response).await;
    }

    async fn write(&mut self, data: &[u8]) {
        self.stream.write_all(data).await.unwrap();
        self.stream.flush().await.unwrap();
    }

    async fn send_text(&mut self, text: &str) {
        let encoded = frame::encode_frame(OpCode::Text, text.as_bytes(), true, None);
        self.write(&encoded).await;
    }

    async fn read_frame(&mut self) -> Option<Frame> {
        loop {
            if let Some((frame, used)) = frame::decode(&self.buf).unwrap() {
                let _ = self.buf.split_to(used);
                return Some(frame);
            }
            let n = self.stream.read_buf(&mut self.buf).await.unwrap_or(0);
            if n == 0 {
                return None;
            }
        }
    }

    /// Read frames until a text frame arrives, skipping keepalive pings
    async fn read_text(&mut self) -> String {
        loop {
            let frame = timeout(WAIT, self.read_frame())
                .await
                .expect("timed out waiting for a text frame")
                .expect("stream closed before a text frame");
            if frame.opcode == OpCode::Text {
                return String::from_utf8(frame.payload.to_vec()).unwrap();
            }
        }
    }

    /// Read frames until a close frame arrives and return its status code
    async fn read_close(&mut self) -> Option<u16> {
        loop {
            let frame = timeout(WAIT, self.read_frame())
                .await
                .expect("timed out waiting for a close frame")
                .expect("stream closed before a close frame");
            if frame.opcode == OpCode::Close {
                return frame::parse_close_payload(&frame.payload).0;
            }
        }
    }
}

fn config() -> RegistrationConfig {
    RegistrationConfig::new("wss://gw.example.com/ws", "pbx.example.com", "1001")
        .with_user_agent("wsreg-test")
        .with_origin("https://app.example.com")
}

fn setup(
    config: RegistrationConfig,
) -> (RegistrationSession, UnboundedReceiver<SessionEvent>, FakeGateway) {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();

    let (client, server) = tokio::io::duplex(256 * 1024);
    let (session, events) = RegistrationSession::with_connector(
        config,
        Uuid::new_v4(),
        Arc::new(PreparedStream::new(client)),
    )
    .unwrap();
    let gateway = FakeGateway {
        stream: server,
        buf: BytesMut::new(),
    };
    (session, events, gateway)
}

/// Start the session, complete the handshake and return the REGISTER text
async fn start_and_read_register(
    session: &RegistrationSession,
    gateway: &mut FakeGateway,
) -> String {
    session.start().unwrap();
    gateway.accept().await;
    gateway.read_text().await
}

fn response(status: &str, cseq: &str) -> String {
    format!(
        "SIP/2.0 {}\r\n\
         Via: SIP/2.0/WSS example.invalid;branch=z9hG4bKabc\r\n\
         To: <sip:1001@pbx.example.com>;tag=srv1\r\n\
         From: <sip:1001@pbx.example.com>;tag=cli1\r\n\
         Call-ID: abc123\r\n\
         CSeq: {}\r\n\
         Content-Length: 0\r\n\r\n",
        status, cseq
    )
}

/// Collect events until the outcome arrives
async fn wait_finished(
    events: &mut UnboundedReceiver<SessionEvent>,
) -> (RegistrationOutcome, Vec<SessionEvent>) {
    let mut seen = Vec::new();
    loop {
        let event = timeout(WAIT, events.recv())
            .await
            .expect("timed out waiting for the outcome")
            .expect("session event channel closed");
        if let SessionEvent::Finished(outcome) = event {
            return (outcome, seen);
        }
        seen.push(event);
    }
}

/// Assert that no outcome is reported within `window`
async fn assert_no_outcome(events: &mut UnboundedReceiver<SessionEvent>, window: Duration) {
    let deadline = tokio::time::Instant::now() + window;
    while let Ok(Some(event)) = tokio::time::timeout_at(deadline, events.recv()).await {
        if let SessionEvent::Finished(outcome) = event {
            panic!("unexpected outcome {:?}", outcome);
        }
    }
}

fn state_changes(events: &[SessionEvent]) -> Vec<SessionState> {
    events
        .iter()
        .filter_map(|event| match event {
            SessionEvent::StateChanged { current, .. } => Some(current.clone()),
            _ => None,
        })
        .collect()
}

#[tokio::test]
async fn test_registered_on_200_ok() {
    let (session, mut events, mut gateway) = setup(config());

    let register = start_and_read_register(&session, &mut gateway).await;
    assert_eq!(register, session.register_text());
    let parsed = SipMessage::parse(&register).unwrap();
    assert_eq!(parsed.method(), Some("REGISTER"));
    assert_eq!(parsed.cseq(), Some((1, "REGISTER")));

    gateway.send_text(&response("200 OK", "1 REGISTER")).await;

    let (outcome, seen) = wait_finished(&mut events).await;
    assert_eq!(
        outcome,
        RegistrationOutcome::Registered {
            status_code: 200,
            reason: "OK".to_string()
        }
    );
    assert_eq!(
        state_changes(&seen),
        vec![
            SessionState::Connecting,
            SessionState::Open,
            SessionState::Registered {
                status_code: 200,
                reason: "OK".to_string()
            },
        ]
    );
    assert!(seen
        .iter()
        .any(|e| matches!(e, SessionEvent::Log { message } if message.contains("REGISTER sent"))));
    assert!(session.response_observed());

    let transport = session.transport().unwrap();
    assert!(transport.is_open());
    assert!(transport.is_keepalive_active());

    session.stop();
    assert_eq!(gateway.read_close().await, Some(1000));
    assert!(matches!(session.state(), SessionState::Registered { .. }));
}

#[tokio::test]
async fn test_rejected_on_401() {
    let (session, mut events, mut gateway) = setup(config());
    start_and_read_register(&session, &mut gateway).await;

    gateway
        .send_text(&response("401 Unauthorized", "1 REGISTER"))
        .await;

    let (outcome, _) = wait_finished(&mut events).await;
    assert_eq!(outcome.status_code(), Some(401));
    assert_eq!(
        outcome,
        RegistrationOutcome::Failed {
            status_code: Some(401),
            reason: "Unauthorized".to_string()
        }
    );
    assert_eq!(gateway.read_close().await, Some(1000));
    assert!(session.transport().unwrap().is_closed());
}

#[tokio::test]
async fn test_timeout_without_response_closes_transport() {
    let timeout_after = Duration::from_millis(200);
    let (session, mut events, mut gateway) =
        setup(config().with_register_timeout(timeout_after));
    start_and_read_register(&session, &mut gateway).await;

    let (outcome, _) = wait_finished(&mut events).await;
    assert_eq!(
        outcome,
        RegistrationOutcome::TimedOut {
            after: timeout_after
        }
    );
    assert_eq!(outcome.to_string(), "no SIP response in 0.2 seconds");
    assert_eq!(gateway.read_close().await, Some(1000));
    assert!(session.transport().unwrap().is_closed());
    assert!(matches!(session.state(), SessionState::TimedOut { .. }));
}

#[tokio::test]
async fn test_observed_response_suppresses_timeout() {
    let (session, mut events, mut gateway) =
        setup(config().with_register_timeout(Duration::from_millis(200)));
    start_and_read_register(&session, &mut gateway).await;

    gateway
        .send_text("OPTIONS sip:1001@pbx.example.com SIP/2.0\r\nCSeq: 7 OPTIONS\r\n\r\n")
        .await;

    assert_no_outcome(&mut events, Duration::from_millis(500)).await;
    assert_eq!(session.state(), SessionState::Open);
    assert!(session.response_observed());

    session.stop();
    assert_eq!(gateway.read_close().await, Some(1000));
    assert_no_outcome(&mut events, Duration::from_millis(100)).await;
    assert_eq!(session.state(), SessionState::Stopped);
}

#[tokio::test]
async fn test_close_before_any_bytes() {
    let (session, mut events, mut gateway) = setup(config());
    session.start().unwrap();

    gateway.read_request().await;
    drop(gateway);

    let (outcome, _) = wait_finished(&mut events).await;
    assert_eq!(
        outcome,
        RegistrationOutcome::Failed {
            status_code: None,
            reason: "socket closed before SIP response".to_string()
        }
    );
    assert!(!session.response_observed());
}

#[tokio::test]
async fn test_unrelated_messages_are_ignored() {
    let (session, mut events, mut gateway) = setup(config());
    start_and_read_register(&session, &mut gateway).await;

    gateway
        .send_text("NOTIFY sip:1001@pbx.example.com SIP/2.0\r\nCSeq: 1 REGISTER\r\n\r\n")
        .await;
    gateway.send_text(&response("200 OK", "2 REGISTER")).await;
    gateway.send_text(&response("200 OK", "1 OPTIONS")).await;
    assert_no_outcome(&mut events, Duration::from_millis(150)).await;
    assert_eq!(session.state(), SessionState::Open);

    gateway.send_text(&response("200 OK", "1 register")).await;
    let (outcome, _) = wait_finished(&mut events).await;
    assert!(outcome.is_success());
}

#[tokio::test]
async fn test_outcome_reported_once() {
    let (session, mut events, mut gateway) = setup(config());
    start_and_read_register(&session, &mut gateway).await;

    gateway.send_text(&response("200 OK", "1 REGISTER")).await;
    let (outcome, _) = wait_finished(&mut events).await;
    assert!(outcome.is_success());

    gateway
        .send_text(&response("500 Server Error", "1 REGISTER"))
        .await;
    let encoded = frame::encode_frame(OpCode::Close, &frame::close_payload(1001, None), true, None);
    gateway.write(&encoded).await;

    assert_no_outcome(&mut events, Duration::from_millis(300)).await;
    assert_eq!(
        session.state(),
        SessionState::Registered {
            status_code: 200,
            reason: "OK".to_string()
        }
    );
}

#[tokio::test]
async fn test_parse_failure_fails_session() {
    let (session, mut events, mut gateway) = setup(config());
    start_and_read_register(&session, &mut gateway).await;

    gateway.send_text(" \r\n \r\n").await;

    let (outcome, _) = wait_finished(&mut events).await;
    assert_eq!(
        outcome,
        RegistrationOutcome::Failed {
            status_code: None,
            reason: "SIP parse failed".to_string()
        }
    );
}

#[tokio::test]
async fn test_handshake_failure_fails_session() {
    let (session, mut events, mut gateway) = setup(config());
    session.start().unwrap();

    gateway.read_request().await;
    gateway
        .write(b"HTTP/1.1 403 Forbidden\r\nContent-Length: 0\r\n\r\n")
        .await;

    let (outcome, seen) = wait_finished(&mut events).await;
    assert!(matches!(
        outcome,
        RegistrationOutcome::Failed {
            status_code: None,
            ..
        }
    ));
    assert!(!state_changes(&seen).contains(&SessionState::Open));
}

#[tokio::test]
async fn test_start_twice_rejected() {
    let (session, _events, _gateway) = setup(config());
    session.start().unwrap();
    assert!(matches!(session.start(), Err(Error::InvalidState { .. })));
}

const UNRELATED_OPTIONS: &str = "OPTIONS sip:1001@pbx.example.com SIP/2.0\r\nCSeq: 7 OPTIONS\r\n\r\n";

#[tokio::test]
async fn test_close_after_unrelated_message_fails() {
    let (session, mut events, mut gateway) = setup(config());
    start_and_read_register(&session, &mut gateway).await;

    gateway.send_text(UNRELATED_OPTIONS).await;
    drop(gateway);

    let (outcome, _) = wait_finished(&mut events).await;
    assert_eq!(
        outcome,
        RegistrationOutcome::Failed {
            status_code: None,
            reason: "socket closed before REGISTER response".to_string()
        }
    );
    assert!(session.response_observed());
    assert!(session.transport().unwrap().is_closed());
}

#[tokio::test]
async fn test_transport_error_after_unrelated_message_fails() {
    let (session, mut events, mut gateway) = setup(config());
    start_and_read_register(&session, &mut gateway).await;

    gateway.send_text(UNRELATED_OPTIONS).await;
    // Text frame with reserved opcode 0x3
    gateway.write(&[0x83, 0x00]).await;

    let (outcome, _) = wait_finished(&mut events).await;
    match outcome {
        RegistrationOutcome::Failed {
            status_code: None,
            reason,
        } => assert!(reason.contains("opcode"), "unexpected reason {:?}", reason),
        other => panic!("expected failure, got {:?}", other),
    }
    assert!(session.is_terminal());
}

#[tokio::test]
async fn test_close_frame_right_after_handshake() {
    let (session, mut events, mut gateway) = setup(config());
    session.start().unwrap();

    let close = frame::encode_frame(OpCode::Close, &frame::close_payload(1001, None), true, None);
    gateway.accept_then(&close).await;

    let (outcome, _) = wait_finished(&mut events).await;
    assert_eq!(
        outcome,
        RegistrationOutcome::Failed {
            status_code: None,
            reason: "socket closed before SIP response".to_string()
        }
    );
    assert!(!session.response_observed());
}
