// Listener Role Tests
// Tests for opening, accepting on and cancelling a listener binding

use crate::WAIT;
use resumeblu::radio::{
    RadioAdapter, RadioAir, RadioError, RadioStream, INSECURE_SERVICE_ID, SERVICE_NAME,
};
use resumeblu::session::ListenerRole;
use tokio::sync::oneshot;
use tokio::time::timeout;

#[tokio::test]
async fn test_listener_advertises_until_cancelled() {
    let air = RadioAir::new();
    let radio = air.device("AA:00:00:00:00:01").unwrap();
    let (tx, rx) = oneshot::channel();

    let listener = ListenerRole::start(&radio, SERVICE_NAME, INSECURE_SERVICE_ID, 7, move |outcome| {
        let _ = tx.send(outcome);
    })
    .unwrap();

    assert_eq!(listener.generation(), 7);
    assert_eq!(listener.service(), INSECURE_SERVICE_ID);
    assert!(listener.is_active());
    assert!(air.is_advertising(radio.address(), INSECURE_SERVICE_ID));

    listener.cancel();

    let outcome = timeout(WAIT, rx).await.unwrap().unwrap();
    assert!(matches!(outcome, Err(RadioError::Closed)));
    assert!(!listener.is_active());
    assert!(!air.is_advertising(radio.address(), INSECURE_SERVICE_ID));
}

#[tokio::test]
async fn test_listener_accepts_one_inbound_stream() {
    let air = RadioAir::new();
    let server = air.device("AA:00:00:00:00:01").unwrap();
    let client = air.device("AA:00:00:00:00:02").unwrap();
    let (tx, rx) = oneshot::channel();

    let listener = ListenerRole::start(&server, SERVICE_NAME, INSECURE_SERVICE_ID, 1, move |outcome| {
        let _ = tx.send(outcome);
    })
    .unwrap();

    let stream = client.open_client(server.address(), INSECURE_SERVICE_ID).unwrap();
    stream.connect().await.unwrap();

    let accepted = timeout(WAIT, rx).await.unwrap().unwrap().unwrap();
    assert_eq!(accepted.peer(), client.address());

    // The accept task ends after one stream; the binding stays open until cancelled
    timeout(WAIT, async {
        while !listener.is_finished() {
            tokio::task::yield_now().await;
        }
    })
    .await
    .unwrap();
    assert!(listener.is_active());
}

#[tokio::test]
async fn test_listener_start_fails_when_service_taken() {
    let air = RadioAir::new();
    let radio = air.device("AA:00:00:00:00:01").unwrap();
    let _taken = radio.listen(SERVICE_NAME, INSECURE_SERVICE_ID).unwrap();

    let result = ListenerRole::start(&radio, SERVICE_NAME, INSECURE_SERVICE_ID, 1, |_| {});

    assert!(matches!(result, Err(RadioError::TransportOpen(_))));
}

#[tokio::test]
async fn test_listener_cancel_is_idempotent() {
    let air = RadioAir::new();
    let radio = air.device("AA:00:00:00:00:01").unwrap();

    let listener =
        ListenerRole::start(&radio, SERVICE_NAME, INSECURE_SERVICE_ID, 1, |_| {}).unwrap();

    listener.cancel();
    listener.cancel();

    assert!(!listener.is_active());
}
