//! End-to-end scenarios exercising the discovery tracker, transaction
//! manager, and PE engine together, without any real MIDI transport.

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{endpoint, packet, LoopbackTransport};
use midi_ci::codec::{self, header as pe_header};
use midi_ci::identity::{CategorySupport, DeviceIdentity};
use midi_ci::{Config, Error, Muid, PeEngine, Tracker, Transport, TransactionManager};

fn own_and_remote() -> (Muid, Muid) {
    (Muid::new(1).unwrap(), Muid::new(2).unwrap())
}

#[tokio::test]
async fn scenario_discovery_registers_remote_device() {
    let (transport, inbound_tx) = LoopbackTransport::new();
    let transport: Arc<dyn Transport> = Arc::new(transport);
    let (own, remote) = own_and_remote();
    let config = Config::default().with_respond_to_discovery(false);
    let tracker = Tracker::new(own, config, transport);
    let mut events = tracker.events();
    tracker.start();

    let identity = DeviceIdentity::default();
    let msg = codec::build_discovery_inquiry(remote, &identity, CategorySupport::PROPERTY_EXCHANGE, 0, 1);
    inbound_tx.send(packet(msg)).await.unwrap();

    let event = tokio::time::timeout(Duration::from_secs(1), events.recv()).await.unwrap().unwrap();
    match event {
        midi_ci::DeviceEvent::Discovered(entry) => assert_eq!(entry.muid, remote),
        other => panic!("expected Discovered, got {other:?}"),
    }
    assert!(tracker.device(remote).is_some());
}

#[tokio::test]
async fn scenario_pe_get_success_then_id_recycles_after_cooldown() {
    let (transport, inbound_tx) = LoopbackTransport::new();
    let transport: Arc<dyn Transport> = Arc::new(transport);
    let (own, remote) = own_and_remote();
    let transactions = Arc::new(TransactionManager::new(Duration::from_millis(30), Duration::from_secs(5), 4));
    let engine = Arc::new(PeEngine::new(own, 1, transport, transactions.clone()));
    engine.start();

    let engine2 = engine.clone();
    let handle = tokio::spawn(async move { engine2.get("DeviceInfo", remote, &endpoint("dest"), Duration::from_secs(1)).await });
    tokio::time::sleep(Duration::from_millis(5)).await;

    let header = pe_header::build_reply_header(200, None);
    let reply = codec::build_pe_get_reply(remote, own, 0, &header, b"{\"manufacturerName\":\"X\"}", 1, 1, 1);
    inbound_tx.send(packet(reply)).await.unwrap();

    let response = handle.await.unwrap().unwrap();
    assert_eq!(response.status, 200);
    assert_eq!(response.decoded_body, b"{\"manufacturerName\":\"X\"}".to_vec());

    // id 0 is now cooling, not yet available.
    let diag = transactions.diagnostics().await;
    assert_eq!(diag.available, 127);
    assert_eq!(diag.cooling, 1);

    tokio::time::sleep(Duration::from_millis(40)).await;
    let diag = transactions.diagnostics().await;
    assert_eq!(diag.available, 128);
}

#[tokio::test]
async fn scenario_pe_get_timeout_surfaces_error_and_frees_id() {
    let (transport, _inbound_tx) = LoopbackTransport::new();
    let transport: Arc<dyn Transport> = Arc::new(transport);
    let (own, remote) = own_and_remote();
    let transactions = Arc::new(TransactionManager::new(Duration::from_millis(30), Duration::from_secs(5), 4));
    let engine = PeEngine::new(own, 1, transport, transactions.clone());
    engine.start();

    let result = engine.get("DeviceInfo", remote, &endpoint("dest"), Duration::from_millis(50)).await;
    assert!(matches!(result, Err(Error::Timeout(Some(ref r))) if r == "DeviceInfo"));

    // the cancellation triggered by the timed-out PendingGuard runs on a
    // detached task; give it a moment to land before inspecting the pool.
    tokio::time::sleep(Duration::from_millis(10)).await;
    let diag = transactions.diagnostics().await;
    assert_eq!(diag.available, 127);
    assert_eq!(diag.cooling, 1);

    tokio::time::sleep(Duration::from_millis(40)).await;
    let diag = transactions.diagnostics().await;
    assert_eq!(diag.available, 128);
}

#[tokio::test]
async fn scenario_late_response_after_timeout_is_dropped_not_resurrected() {
    let (transport, inbound_tx) = LoopbackTransport::new();
    let transport: Arc<dyn Transport> = Arc::new(transport);
    let (own, remote) = own_and_remote();
    let transactions = Arc::new(TransactionManager::new(Duration::ZERO, Duration::from_secs(5), 4));
    let engine = Arc::new(PeEngine::new(own, 1, transport, transactions.clone()));
    engine.start();
    let mut notifications = engine.notifications();

    let result = engine.get("DeviceInfo", remote, &endpoint("dest"), Duration::from_millis(20)).await;
    assert!(matches!(result, Err(Error::Timeout(_))));
    tokio::time::sleep(Duration::from_millis(10)).await;

    // A reply for the now-abandoned request id 0 arrives late.
    let header = pe_header::build_reply_header(200, None);
    let reply = codec::build_pe_get_reply(remote, own, 0, &header, b"too-late", 1, 1, 1);
    inbound_tx.send(packet(reply)).await.unwrap();
    tokio::time::sleep(Duration::from_millis(10)).await;

    // Nothing resurrects: no notification fires, and the id stays released
    // rather than being re-marked in-use by the late chunk.
    assert!(notifications.try_recv().is_err());
    let diag = transactions.diagnostics().await;
    assert_eq!(diag.available, 128);
}

#[tokio::test]
async fn scenario_per_device_throttle_cancel_before_complete_does_not_leak() {
    let (transport, inbound_tx) = LoopbackTransport::new();
    let transport: Arc<dyn Transport> = Arc::new(transport);
    let (own, remote) = own_and_remote();
    let transactions = Arc::new(TransactionManager::new(Duration::ZERO, Duration::from_secs(5), 1));
    let engine = Arc::new(PeEngine::new(own, 1, transport, transactions.clone()));
    engine.start();

    let e1 = engine.clone();
    let first = tokio::spawn(async move { e1.get("DeviceInfo", remote, &endpoint("dest"), Duration::from_secs(5)).await });
    tokio::time::sleep(Duration::from_millis(5)).await;

    let e2 = engine.clone();
    let second = tokio::spawn(async move { e2.get("ResourceList", remote, &endpoint("dest"), Duration::from_secs(5)).await });
    tokio::time::sleep(Duration::from_millis(5)).await;

    // The second call is still suspended in the per-device FIFO queue
    // (maxInflightPerDevice=1, the first holds the only slot). Dropping its
    // future mid-wait — here via abort — is the cancellation path spec
    // scenario 5 exercises; the waiter's CancelGuard must unwind cleanly
    // without leaving a stale queue entry.
    second.abort();
    let second_result = second.await;
    assert!(second_result.unwrap_err().is_cancelled());

    // The first request is still outstanding and now completes normally.
    let header = pe_header::build_reply_header(200, None);
    let reply = codec::build_pe_get_reply(remote, own, 0, &header, b"{\"manufacturerName\":\"X\"}", 1, 1, 1);
    inbound_tx.send(packet(reply)).await.unwrap();

    let first_result = first.await.unwrap().unwrap();
    assert_eq!(first_result.status, 200);

    tokio::time::sleep(Duration::from_millis(10)).await;
    let diag = transactions.diagnostics().await;
    assert_eq!(diag.available, 128, "no slot should leak once both calls have resolved");
}

#[tokio::test]
async fn scenario_multi_chunk_reply_out_of_order_concatenates_and_parses_header_from_first_chunk() {
    let (transport, inbound_tx) = LoopbackTransport::new();
    let transport: Arc<dyn Transport> = Arc::new(transport);
    let (own, remote) = own_and_remote();
    let transactions = Arc::new(TransactionManager::new(Duration::ZERO, Duration::from_secs(5), 4));
    let engine = Arc::new(PeEngine::new(own, 1, transport, transactions));
    engine.start();

    let engine2 = engine.clone();
    let handle = tokio::spawn(async move { engine2.get("ResourceList", remote, &endpoint("dest"), Duration::from_secs(1)).await });
    tokio::time::sleep(Duration::from_millis(5)).await;

    let header = pe_header::build_reply_header(200, None);
    // Chunks arrive as [2, 3, 1]; only chunk 1 carries the header.
    let chunk2 = codec::build_pe_get_reply(remote, own, 0, b"", b"chunk2", 3, 2, 1);
    let chunk3 = codec::build_pe_get_reply(remote, own, 0, b"", b"chunk3", 3, 3, 1);
    let chunk1 = codec::build_pe_get_reply(remote, own, 0, &header, b"chunk1", 3, 1, 1);

    inbound_tx.send(packet(chunk2)).await.unwrap();
    inbound_tx.send(packet(chunk3)).await.unwrap();
    inbound_tx.send(packet(chunk1)).await.unwrap();

    let response = handle.await.unwrap().unwrap();
    assert_eq!(response.status, 200);
    assert_eq!(response.decoded_body, b"chunk1chunk2chunk3".to_vec());
}
