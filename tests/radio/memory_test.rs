// Memory Radio Tests
// Tests for the simulated air: bindings, connects, stream I/O and close semantics

use resumeblu::radio::{
    MemoryStream, PeerId, RadioActivity, RadioAdapter, RadioAir, RadioError, RadioStream, ServerBinding,
    INSECURE_SERVICE_ID, SECURE_SERVICE_ID, SERVICE_NAME,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;

const WAIT: Duration = Duration::from_secs(2);

fn peer(raw: &str) -> PeerId {
    PeerId::new(raw).unwrap()
}

fn linked_pair(air: &RadioAir) -> (MemoryStream, MemoryStream) {
    air.pair(
        &peer("AA:00:00:00:00:01"),
        &peer("AA:00:00:00:00:02"),
        INSECURE_SERVICE_ID,
    )
}

// ============================================================================
// BINDINGS
// ============================================================================

#[test]
fn test_listen_advertises_service() {
    let air = RadioAir::new();
    let radio = air.device("AA:00:00:00:00:01").unwrap();

    let binding = radio.listen(SERVICE_NAME, INSECURE_SERVICE_ID).unwrap();

    assert!(air.is_advertising(radio.address(), INSECURE_SERVICE_ID));
    assert!(!air.is_advertising(radio.address(), SECURE_SERVICE_ID));
    assert!(!binding.is_closed());
}

#[test]
fn test_listen_twice_on_same_service_fails() {
    let air = RadioAir::new();
    let radio = air.device("AA:00:00:00:00:01").unwrap();

    let _binding = radio.listen(SERVICE_NAME, INSECURE_SERVICE_ID).unwrap();
    let second = radio.listen(SERVICE_NAME, INSECURE_SERVICE_ID);

    assert!(matches!(second, Err(RadioError::TransportOpen(_))));
}

#[test]
fn test_close_binding_stops_advertising() {
    let air = RadioAir::new();
    let radio = air.device("AA:00:00:00:00:01").unwrap();

    let binding = radio.listen(SERVICE_NAME, INSECURE_SERVICE_ID).unwrap();
    binding.close();

    assert!(binding.is_closed());
    assert!(!air.is_advertising(radio.address(), INSECURE_SERVICE_ID));
    // The service can be bound again once released
    assert!(radio.listen(SERVICE_NAME, INSECURE_SERVICE_ID).is_ok());
}

#[tokio::test]
async fn test_close_wakes_pending_accept() {
    let air = RadioAir::new();
    let radio = air.device("AA:00:00:00:00:01").unwrap();
    let binding = Arc::new(radio.listen(SERVICE_NAME, INSECURE_SERVICE_ID).unwrap());

    let waiting = Arc::clone(&binding);
    let accept = tokio::spawn(async move { waiting.accept().await });

    tokio::task::yield_now().await;
    binding.close();

    let result = timeout(WAIT, accept).await.expect("accept hung").unwrap();
    assert!(matches!(result, Err(RadioError::Closed)));
}

#[tokio::test]
async fn test_accept_after_close_fails() {
    let air = RadioAir::new();
    let radio = air.device("AA:00:00:00:00:01").unwrap();
    let binding = radio.listen(SERVICE_NAME, INSECURE_SERVICE_ID).unwrap();

    binding.close();

    assert!(matches!(binding.accept().await, Err(RadioError::Closed)));
}

// ============================================================================
// CONNECT
// ============================================================================

#[tokio::test]
async fn test_connect_delivers_stream_to_listener() {
    let air = RadioAir::new();
    let server = air.device("AA:00:00:00:00:01").unwrap();
    let client = air.device("AA:00:00:00:00:02").unwrap();

    let binding = server.listen(SERVICE_NAME, INSECURE_SERVICE_ID).unwrap();
    let stream = client.open_client(server.address(), INSECURE_SERVICE_ID).unwrap();

    assert!(!stream.is_connected());
    stream.connect().await.unwrap();
    assert!(stream.is_connected());

    let accepted = timeout(WAIT, binding.accept()).await.unwrap().unwrap();
    assert_eq!(accepted.peer(), client.address());
    assert_eq!(stream.peer(), server.address());
}

#[tokio::test]
async fn test_connect_without_listener_is_service_not_found() {
    let air = RadioAir::new();
    let client = air.device("AA:00:00:00:00:02").unwrap();

    let stream = client
        .open_client(&peer("AA:00:00:00:00:01"), INSECURE_SERVICE_ID)
        .unwrap();
    let result = stream.connect().await;

    assert!(matches!(result, Err(RadioError::ServiceNotFound { .. })));
}

#[tokio::test]
async fn test_connect_to_wrong_service_is_service_not_found() {
    let air = RadioAir::new();
    let server = air.device("AA:00:00:00:00:01").unwrap();
    let client = air.device("AA:00:00:00:00:02").unwrap();

    let _binding = server.listen(SERVICE_NAME, INSECURE_SERVICE_ID).unwrap();
    let stream = client.open_client(server.address(), SECURE_SERVICE_ID).unwrap();

    assert!(matches!(
        stream.connect().await,
        Err(RadioError::ServiceNotFound { .. })
    ));
}

#[tokio::test]
async fn test_connect_to_unreachable_peer_fails() {
    let air = RadioAir::new();
    let server = air.device("AA:00:00:00:00:01").unwrap();
    let client = air.device("AA:00:00:00:00:02").unwrap();

    let _binding = server.listen(SERVICE_NAME, INSECURE_SERVICE_ID).unwrap();
    air.set_reachable(server.address(), false);

    let stream = client.open_client(server.address(), INSECURE_SERVICE_ID).unwrap();
    assert!(matches!(stream.connect().await, Err(RadioError::ConnectFailed(_))));

    air.set_reachable(server.address(), true);
    assert!(stream.connect().await.is_ok());
}

#[tokio::test]
async fn test_connect_after_close_fails() {
    let air = RadioAir::new();
    let server = air.device("AA:00:00:00:00:01").unwrap();
    let client = air.device("AA:00:00:00:00:02").unwrap();

    let _binding = server.listen(SERVICE_NAME, INSECURE_SERVICE_ID).unwrap();
    let stream = client.open_client(server.address(), INSECURE_SERVICE_ID).unwrap();
    stream.close();

    assert!(matches!(stream.connect().await, Err(RadioError::Closed)));
}

#[test]
fn test_cancel_discovery_stops_scan() {
    let air = RadioAir::new();
    let radio = air.device("AA:00:00:00:00:02").unwrap();

    radio.start_discovery();
    assert!(radio.is_discovering());

    radio.cancel_discovery();

    assert!(!radio.is_discovering());
    assert!(air.activity().contains(&RadioActivity::DiscoveryCancelled {
        device: radio.address().clone()
    }));
}

// ============================================================================
// STREAM I/O
// ============================================================================

#[tokio::test]
async fn test_pair_round_trip() {
    let air = RadioAir::new();
    let (a, b) = linked_pair(&air);

    a.write_all(b"hello").await.unwrap();

    let mut buf = [0u8; 16];
    let n = b.read(&mut buf).await.unwrap();
    assert_eq!(&buf[..n], b"hello");
}

#[tokio::test]
async fn test_read_splits_large_chunk() {
    let air = RadioAir::new();
    let (a, b) = linked_pair(&air);

    a.write_all(b"0123456789").await.unwrap();

    let mut buf = [0u8; 4];
    let mut received = Vec::new();
    while received.len() < 10 {
        let n = b.read(&mut buf).await.unwrap();
        received.extend_from_slice(&buf[..n]);
    }
    assert_eq!(received, b"0123456789".to_vec());
}

#[tokio::test]
async fn test_close_wakes_pending_read() {
    let air = RadioAir::new();
    let (a, _b) = linked_pair(&air);
    let a = Arc::new(a);

    let reading = Arc::clone(&a);
    let read = tokio::spawn(async move {
        let mut buf = [0u8; 8];
        reading.read(&mut buf).await
    });

    tokio::task::yield_now().await;
    a.close();

    let result = timeout(WAIT, read).await.expect("read hung").unwrap();
    assert!(matches!(result, Err(RadioError::Closed)));
}

#[tokio::test]
async fn test_remote_close_reads_end_of_stream() {
    let air = RadioAir::new();
    let (a, b) = linked_pair(&air);

    a.close();

    let mut buf = [0u8; 8];
    assert_eq!(timeout(WAIT, b.read(&mut buf)).await.unwrap().unwrap(), 0);
}

#[tokio::test]
async fn test_write_to_closed_peer_fails() {
    let air = RadioAir::new();
    let (a, b) = linked_pair(&air);

    b.close();

    assert!(matches!(a.write_all(b"x").await, Err(RadioError::WriteFailed(_))));
    assert!(matches!(b.write_all(b"x").await, Err(RadioError::Closed)));
}

#[tokio::test]
async fn test_read_on_unconnected_stream_fails() {
    let air = RadioAir::new();
    let client = air.device("AA:00:00:00:00:02").unwrap();
    let stream = client
        .open_client(&peer("AA:00:00:00:00:01"), INSECURE_SERVICE_ID)
        .unwrap();

    let mut buf = [0u8; 8];
    assert!(matches!(stream.read(&mut buf).await, Err(RadioError::ReadFailed(_))));
    assert!(matches!(stream.write_all(b"x").await, Err(RadioError::WriteFailed(_))));
}

#[tokio::test]
async fn test_activity_log_records_stream_lifecycle() {
    let air = RadioAir::new();
    let (a, b) = linked_pair(&air);
    let a_id = a.id();

    drop(a);

    let log = air.activity();
    let opened = log
        .iter()
        .position(|e| matches!(e, RadioActivity::StreamOpened { stream, .. } if *stream == a_id))
        .unwrap();
    let closed = log
        .iter()
        .position(|e| *e == RadioActivity::StreamClosed { stream: a_id })
        .unwrap();
    assert!(opened < closed);
    assert!(!b.is_closed());
}
