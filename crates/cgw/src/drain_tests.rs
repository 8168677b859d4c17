use super::*;
use crate::bus::{CloudOutMessage, LocationOutMessage, NetworkMessage};
use crate::storage::fake::FakeStorage;
use crate::transport::fake::FakeTransport;
use std::time::Duration;

fn test_bus() -> (Bus, tokio::sync::mpsc::Receiver<StorageControlOut>) {
    let (cloud_tx, _cloud_rx) = tokio::sync::mpsc::channel::<CloudOutMessage>(8);
    let (storage_tx, storage_rx) = tokio::sync::mpsc::channel::<StorageControlOut>(8);
    let (network_tx, _network_rx) = tokio::sync::mpsc::channel::<NetworkMessage>(8);
    let (location_tx, _location_rx) = tokio::sync::mpsc::channel::<LocationOutMessage>(8);
    let (private_tx, _private_rx) = tokio::sync::mpsc::unbounded_channel();
    (
        Bus {
            cloud_out: cloud_tx,
            storage_control_out: storage_tx,
            network_out: network_tx,
            location_out: location_tx,
            private_tx,
        },
        storage_rx,
    )
}

fn item(ts: i64, kind: DataItemKind) -> DataItem {
    DataItem { kind, timestamp: ts, payload: vec![9] }
}

#[tokio::test]
async fn closing_a_session_publishes_batch_close_exactly_once() {
    let (bus, mut storage_rx) = test_bus();
    let session = BatchSession::open(0xABCD);
    session.close(&bus, Duration::from_millis(100)).await.unwrap();

    let msg = storage_rx.recv().await.unwrap();
    assert_eq!(msg, StorageControlOut::BatchClose { session_id: 0xABCD });
    assert!(storage_rx.try_recv().is_err());
}

#[tokio::test]
async fn drain_round_stops_at_timeout_with_no_items() {
    let transport = FakeTransport::default();
    let storage = FakeStorage::default();

    let outcome = drain_round(
        1,
        &transport,
        &storage,
        Duration::from_millis(10),
        TimestampPolicy::NoTimestamp,
        1_735_689_600_000,
        5000,
        true,
        |u| u,
        true,
    )
    .await;

    assert_eq!(outcome, DrainOutcome::Done);
}

#[tokio::test]
async fn drain_round_forwards_items_then_completes() {
    let transport = FakeTransport::default();
    let storage = FakeStorage::with_items(vec![
        item(1_735_689_600_001, DataItemKind::Environmental),
        item(1_735_689_600_002, DataItemKind::Power),
    ]);

    let outcome = drain_round(
        1,
        &transport,
        &storage,
        Duration::from_millis(10),
        TimestampPolicy::NoTimestamp,
        1_735_689_600_000,
        5000,
        true,
        |u| u,
        true,
    )
    .await;

    assert_eq!(outcome, DrainOutcome::Done);
    assert_eq!(transport.sent.lock().unwrap().len(), 2);
}

#[tokio::test]
async fn drain_round_reports_storage_error() {
    let transport = FakeTransport::default();
    let storage = FakeStorage::default();
    storage.set_error_after_drain(true);

    let outcome = drain_round(
        1,
        &transport,
        &storage,
        Duration::from_millis(10),
        TimestampPolicy::NoTimestamp,
        1_735_689_600_000,
        5000,
        true,
        |u| u,
        true,
    )
    .await;

    assert_eq!(outcome, DrainOutcome::StorageError);
}

#[tokio::test]
async fn drain_round_aborts_session_on_send_failure() {
    let transport = FakeTransport::default();
    transport.set_fail_sends(true);
    let storage = FakeStorage::with_items(vec![item(1_735_689_600_001, DataItemKind::Environmental)]);

    let outcome = drain_round(
        1,
        &transport,
        &storage,
        Duration::from_millis(10),
        TimestampPolicy::NoTimestamp,
        1_735_689_600_000,
        5000,
        true,
        |u| u,
        true,
    )
    .await;

    assert_eq!(outcome, DrainOutcome::ItemFatal);
}

#[tokio::test]
async fn drop_policy_skips_items_with_bad_timestamps() {
    let transport = FakeTransport::default();
    // uptime 5000, item timestamp 9000 is in the future relative to uptime -> Invalid.
    let storage = FakeStorage::with_items(vec![item(9000, DataItemKind::Environmental)]);

    let outcome = drain_round(
        1,
        &transport,
        &storage,
        Duration::from_millis(10),
        TimestampPolicy::Drop,
        1_735_689_600_000,
        5000,
        true,
        |u| u,
        true,
    )
    .await;

    assert_eq!(outcome, DrainOutcome::Done);
    assert_eq!(transport.sent.lock().unwrap().len(), 0);
}

#[tokio::test]
async fn sub_epoch_timestamp_converts_and_forwards_via_uptime_to_unix() {
    let transport = FakeTransport::default();
    // timestamp 500 is below the future-epoch threshold and <= current uptime
    // 5000, with a valid wall clock: normalize() must reach the conversion
    // closure rather than erroring.
    let storage = FakeStorage::with_items(vec![item(500, DataItemKind::Environmental)]);

    let outcome = drain_round(
        1,
        &transport,
        &storage,
        Duration::from_millis(10),
        TimestampPolicy::Drop,
        1_735_689_600_000,
        5000,
        true,
        |u| u + 1_700_000_000_000,
        true,
    )
    .await;

    assert_eq!(outcome, DrainOutcome::Done);
    assert_eq!(transport.sent.lock().unwrap().len(), 1);
}
