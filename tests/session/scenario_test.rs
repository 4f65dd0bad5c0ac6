// Session Scenario Tests
// Two managers meeting over a shared radio: rendezvous, resume and the TCP loopback

use crate::{peer, settle, wait_for};
use resumeblu::radio::{
    MemoryRadio, RadioAir, TcpRadio, TcpRadioConfig, INSECURE_SERVICE_ID,
};
use resumeblu::session::{
    ConnectionInfo, ConnectionManager, ConnectionPhase, DisconnectReason, SessionConfig,
    SessionEvent, SessionEvents,
};

const ADDR_A: &str = "00:11:22:33:44:55";
const ADDR_B: &str = "66:77:88:99:AA:BB";

fn manager(air: &RadioAir, address: &str) -> (ConnectionManager<MemoryRadio>, SessionEvents) {
    ConnectionManager::new(air.device(address).unwrap(), SessionConfig::default()).unwrap()
}

async fn connected(events: &mut SessionEvents) -> ConnectionInfo {
    match wait_for(events, |e| matches!(e, SessionEvent::Connected { .. })).await {
        SessionEvent::Connected { info } => info,
        _ => unreachable!(),
    }
}

async fn received(events: &mut SessionEvents) -> String {
    match wait_for(events, |e| matches!(e, SessionEvent::DataReceived { .. })).await {
        SessionEvent::DataReceived { text, .. } => text,
        _ => unreachable!(),
    }
}

async fn disconnected(events: &mut SessionEvents) -> DisconnectReason {
    match wait_for(events, |e| matches!(e, SessionEvent::Disconnected { .. })).await {
        SessionEvent::Disconnected { reason, .. } => reason,
        _ => unreachable!(),
    }
}

// ============================================================================
// RENDEZVOUS
// ============================================================================

#[tokio::test]
async fn test_listen_then_connect_exchange() {
    let air = RadioAir::new();
    let (a, mut a_events) = manager(&air, ADDR_A);
    let (b, mut b_events) = manager(&air, ADDR_B);

    a.start_listening().unwrap();
    b.start_connecting_str(ADDR_A).unwrap();

    connected(&mut a_events).await;
    connected(&mut b_events).await;

    b.send(b"hi from b").await.unwrap();
    assert_eq!(received(&mut a_events).await, "hi from b");

    a.send(b"hi from a").await.unwrap();
    assert_eq!(received(&mut b_events).await, "hi from a");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_cross_connect_settles_on_one_outcome() {
    let air = RadioAir::new();
    let (a, mut a_events) = manager(&air, ADDR_A);
    let (b, mut b_events) = manager(&air, ADDR_B);

    a.start_connecting(peer(ADDR_B), INSECURE_SERVICE_ID).unwrap();
    b.start_connecting(peer(ADDR_A), INSECURE_SERVICE_ID).unwrap();

    let a_seen = settle(&mut a_events).await;
    let b_seen = settle(&mut b_events).await;
    let count = |seen: &[SessionEvent], wanted: fn(&SessionEvent) -> bool| {
        seen.iter().filter(|e| wanted(e)).count()
    };
    let is_connected: fn(&SessionEvent) -> bool = |e| matches!(e, SessionEvent::Connected { .. });
    let is_disconnected: fn(&SessionEvent) -> bool =
        |e| matches!(e, SessionEvent::Disconnected { .. });

    // Each side always promotes exactly one stream
    assert_eq!(count(&a_seen, is_connected), 1);
    assert_eq!(count(&b_seen, is_connected), 1);

    match (a.phase(), b.phase()) {
        // Both sides promoted the same stream
        (ConnectionPhase::Connected, ConnectionPhase::Connected) => {
            b.send(b"crossed").await.unwrap();
            assert_eq!(received(&mut a_events).await, "crossed");
        }
        // Each side promoted a different stream; the peer discarded the other
        // end as a stray, so both links drop
        (ConnectionPhase::Idle, ConnectionPhase::Idle) => {
            assert_eq!(count(&a_seen, is_disconnected), 1);
            assert_eq!(count(&b_seen, is_disconnected), 1);
        }
        phases => panic!("sides disagree after settling: {:?}", phases),
    }
}

#[tokio::test]
async fn test_out_of_range_peer_then_retry() {
    let air = RadioAir::new();
    let (a, mut a_events) = manager(&air, ADDR_A);
    let (b, mut b_events) = manager(&air, ADDR_B);
    b.start_listening().unwrap();
    air.set_reachable(&peer(ADDR_B), false);

    a.start_connecting(peer(ADDR_B), INSECURE_SERVICE_ID).unwrap();
    wait_for(&mut a_events, |e| matches!(e, SessionEvent::ConnectFailed { .. })).await;
    assert_eq!(a.phase(), ConnectionPhase::Listening);

    air.set_reachable(&peer(ADDR_B), true);
    a.start_connecting(peer(ADDR_B), INSECURE_SERVICE_ID).unwrap();

    let info = connected(&mut a_events).await;
    assert_eq!(info.peer, peer(ADDR_B));
    connected(&mut b_events).await;
}

// ============================================================================
// RESUME
// ============================================================================

#[tokio::test]
async fn test_session_resumes_after_disconnect() {
    let air = RadioAir::new();
    let (a, mut a_events) = manager(&air, ADDR_A);
    let (b, mut b_events) = manager(&air, ADDR_B);

    a.start_listening().unwrap();
    b.start_connecting(peer(ADDR_A), INSECURE_SERVICE_ID).unwrap();
    let first = connected(&mut a_events).await;
    connected(&mut b_events).await;

    b.disconnect();
    assert_eq!(disconnected(&mut b_events).await, DisconnectReason::Cancelled);
    assert_eq!(disconnected(&mut a_events).await, DisconnectReason::EndOfStream);
    assert_eq!(a.phase(), ConnectionPhase::Idle);

    // Nothing restarts on its own
    assert!(!a.is_listening());

    a.start_listening().unwrap();
    b.start_connecting(peer(ADDR_A), INSECURE_SERVICE_ID).unwrap();
    let second = connected(&mut a_events).await;
    connected(&mut b_events).await;

    assert_ne!(first.id, second.id);
    b.send(b"again").await.unwrap();
    assert_eq!(received(&mut a_events).await, "again");
}

// ============================================================================
// TCP LOOPBACK
// ============================================================================

#[tokio::test]
async fn test_tcp_loopback_session() {
    // Reserve a port for the listening side
    let port = std::net::TcpListener::bind("127.0.0.1:0")
        .unwrap()
        .local_addr()
        .unwrap()
        .port();

    let server = TcpRadio::new(TcpRadioConfig::new().with_bind_port(port));
    let client = TcpRadio::new(TcpRadioConfig::new());
    let (a, mut a_events) = ConnectionManager::new(server, SessionConfig::default()).unwrap();
    let (b, mut b_events) = ConnectionManager::new(client, SessionConfig::default()).unwrap();

    a.start_listening().unwrap();
    b.start_connecting_str(&format!("127.0.0.1:{}", port)).unwrap();

    let a_info = connected(&mut a_events).await;
    let b_info = connected(&mut b_events).await;
    assert_eq!(b_info.peer.as_str(), format!("127.0.0.1:{}", port));
    assert!(a_info.peer.as_str().starts_with("127.0.0.1:"));

    b.send(b"over tcp").await.unwrap();
    assert_eq!(received(&mut a_events).await, "over tcp");

    a.disconnect();
    assert_eq!(disconnected(&mut b_events).await, DisconnectReason::EndOfStream);
}
