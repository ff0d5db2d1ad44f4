use async_trait::async_trait;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;

use tickerhub::config::Config;
use tickerhub::protocol::{ServerEvent, ServerMessage, TradingLogSubmission};
use tickerhub::state::AppState;
use tickerhub::transport::{
    run_connection, ConnectionPhase, HandshakeParams, Inbound, Transport, TransportError,
};
use tickerhub::types::{Protocol, Role};

/// In-memory transport for driving the connection lifecycle end to end.
struct TestTransport {
    protocol: Protocol,
    sent: Arc<Mutex<Vec<ServerMessage>>>,
}

#[async_trait]
impl Transport for TestTransport {
    fn protocol(&self) -> Protocol {
        self.protocol
    }

    async fn send(&mut self, msg: &ServerMessage) -> Result<(), TransportError> {
        self.sent.lock().unwrap().push(msg.clone());
        Ok(())
    }

    async fn close(&mut self, _code: u16, _reason: &str) {}
}

/// One simulated client: inbound handle to feed it events, a mailbox of
/// everything the server sent it, and the running lifecycle task.
struct TestClient {
    inbound: mpsc::Sender<Inbound>,
    sent: Arc<Mutex<Vec<ServerMessage>>>,
    task: tokio::task::JoinHandle<ConnectionPhase>,
}

fn connect(state: &Arc<AppState>, protocol: Protocol, token: &str) -> TestClient {
    let sent = Arc::new(Mutex::new(Vec::new()));
    let transport = TestTransport {
        protocol,
        sent: sent.clone(),
    };
    let (inbound, rx) = mpsc::channel(8);
    let params = HandshakeParams {
        session_token: Some(token.to_string()),
        ip: "127.0.0.1".to_string(),
        user_agent: Some("integration-test".to_string()),
    };
    let task = tokio::spawn(run_connection(transport, rx, params, state.clone()));
    TestClient {
        inbound,
        sent,
        task,
    }
}

/// Yield until spawned lifecycle tasks have processed their mail.
async fn settle() {
    tokio::time::sleep(Duration::from_millis(50)).await;
}

async fn close(client: TestClient) -> ConnectionPhase {
    let _ = client
        .inbound
        .send(Inbound::Closed {
            code: Some(1000),
            reason: "test done".to_string(),
        })
        .await;
    client.task.await.expect("lifecycle task panicked")
}

fn trading_logs(mailbox: &Arc<Mutex<Vec<ServerMessage>>>) -> Vec<tickerhub::types::TradingLogEntry> {
    mailbox
        .lock()
        .unwrap()
        .iter()
        .filter_map(|msg| match msg {
            ServerMessage::TradingLog { data, .. } => Some(data.clone()),
            _ => None,
        })
        .collect()
}

/// End-to-end flow: connect three sessions across two protocols, relay a
/// trading log with sender exclusion, replay history to a late joiner.
#[tokio::test]
async fn test_full_relay_flow() {
    let state = Arc::new(AppState::new(Config::default()));

    // 1. First session to ever connect becomes the admin.
    let s1 = connect(&state, Protocol::Websocket, "s1");
    settle().await;
    let session1 = state.sessions.lookup("s1").expect("session should exist");
    assert_eq!(session1.user_id, "user_1");
    assert_eq!(session1.role, Role::Admin);

    // 2. Later sessions are plain users.
    let s2 = connect(&state, Protocol::Websocket, "s2");
    let s3 = connect(&state, Protocol::Sse, "s3");
    settle().await;
    assert_eq!(state.sessions.lookup("s2").unwrap().role, Role::User);
    assert_eq!(state.registries.get(Protocol::Websocket).count(), 2);
    assert_eq!(state.registries.get(Protocol::Sse).count(), 1);

    // 3. Connection notices stay within their protocol: the sse client
    //    hears its own arrival but neither websocket one.
    let s3_info_events: Vec<ServerEvent> = s3
        .sent
        .lock()
        .unwrap()
        .iter()
        .filter_map(|msg| match msg {
            ServerMessage::ServerInfo { event_type, .. } => Some(*event_type),
            _ => None,
        })
        .collect();
    assert_eq!(
        s3_info_events,
        vec![ServerEvent::ConnectionSuccess, ServerEvent::Connection]
    );

    // 4. A free-text submission relays to the other websocket client,
    //    stamped with the sender's stable user id.
    s1.inbound
        .send(Inbound::Submission(TradingLogSubmission {
            text: Some("hi".to_string()),
            ..Default::default()
        }))
        .await
        .unwrap();
    settle().await;

    let received = trading_logs(&s2.sent);
    assert_eq!(received.len(), 1);
    assert_eq!(received[0].sender, "user_1");
    assert_eq!(received[0].text.as_deref(), Some("hi"));
    assert_eq!(received[0].method.as_deref(), Some("websocket"));

    // 5. The sender does not hear its own entry back, and the sse client
    //    is outside the websocket relay scope entirely.
    assert!(trading_logs(&s1.sent).is_empty());
    assert!(trading_logs(&s3.sent).is_empty());

    // 6. A late joiner on websocket gets the entry as history replay.
    let s4 = connect(&state, Protocol::Websocket, "s4");
    settle().await;
    let replayed: Vec<Vec<tickerhub::types::TradingLogEntry>> = s4
        .sent
        .lock()
        .unwrap()
        .iter()
        .filter_map(|msg| match msg {
            ServerMessage::TradingLogHistory { data, .. } => Some(data.clone()),
            _ => None,
        })
        .collect();
    assert_eq!(replayed.len(), 1);
    assert_eq!(replayed[0].len(), 1);
    assert_eq!(replayed[0][0].sender, "user_1");

    // 7. Teardown unregisters everyone but keeps their sessions.
    for client in [s1, s2, s3, s4] {
        assert_eq!(close(client).await, ConnectionPhase::Closed);
    }
    assert_eq!(state.registries.get(Protocol::Websocket).count(), 0);
    assert_eq!(state.registries.get(Protocol::Sse).count(), 0);
    assert_eq!(state.sessions.len(), 4);
}

/// A handshake without a session token is turned away before it touches
/// the registry, and nobody else hears about it.
#[tokio::test]
async fn test_tokenless_handshake_is_rejected_silently() {
    let state = Arc::new(AppState::new(Config::default()));

    let observer = connect(&state, Protocol::Websocket, "s1");
    settle().await;
    let notices_before = observer.sent.lock().unwrap().len();

    let sent = Arc::new(Mutex::new(Vec::new()));
    let transport = TestTransport {
        protocol: Protocol::Websocket,
        sent: sent.clone(),
    };
    let (_inbound, rx) = mpsc::channel(1);
    let params = HandshakeParams {
        session_token: None,
        ip: "127.0.0.1".to_string(),
        user_agent: None,
    };
    let phase = run_connection(transport, rx, params, state.clone()).await;

    assert_eq!(phase, ConnectionPhase::Rejected);
    assert!(sent.lock().unwrap().is_empty());
    assert_eq!(state.registries.get(Protocol::Websocket).count(), 1);

    // The established client heard nothing about the rejected handshake.
    settle().await;
    assert_eq!(observer.sent.lock().unwrap().len(), notices_before);

    close(observer).await;
}

/// Reconnecting with the same token keeps the same identity and role.
#[tokio::test]
async fn test_session_identity_survives_reconnect() {
    let state = Arc::new(AppState::new(Config::default()));

    let first = connect(&state, Protocol::Websocket, "s1");
    settle().await;
    assert_eq!(state.sessions.lookup("s1").unwrap().role, Role::Admin);
    close(first).await;

    // Another session connects while the admin is away; the admin slot
    // stays taken.
    let other = connect(&state, Protocol::Channel, "s2");
    settle().await;
    assert_eq!(state.sessions.lookup("s2").unwrap().role, Role::User);

    // Reconnect on a different protocol: same user, same role.
    let again = connect(&state, Protocol::Sse, "s1");
    settle().await;
    let session = state.sessions.lookup("s1").unwrap();
    assert_eq!(session.user_id, "user_1");
    assert_eq!(session.role, Role::Admin);
    assert_eq!(state.sessions.len(), 2);

    close(other).await;
    close(again).await;
}

/// Shutdown flips the cooperative flag: live connections drain and new
/// handshakes are refused.
#[tokio::test]
async fn test_shutdown_drains_connections_and_refuses_new_ones() {
    let state = Arc::new(AppState::new(Config::default()));

    let live = connect(&state, Protocol::Websocket, "s1");
    settle().await;
    assert_eq!(state.registries.get(Protocol::Websocket).count(), 1);

    state.begin_shutdown();
    let phase = live.task.await.expect("lifecycle task panicked");
    assert_eq!(phase, ConnectionPhase::Closed);
    assert_eq!(state.registries.get(Protocol::Websocket).count(), 0);

    let late = connect(&state, Protocol::Websocket, "s2");
    let phase = late.task.await.expect("lifecycle task panicked");
    assert_eq!(phase, ConnectionPhase::Rejected);
    assert_eq!(state.registries.get(Protocol::Websocket).count(), 0);
}
