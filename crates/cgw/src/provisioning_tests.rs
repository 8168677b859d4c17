use super::fake::FakeProvisioning;
use super::*;
use std::sync::Arc;
use std::time::Duration;

#[tokio::test(start_paused = true)]
async fn successful_provisioning_publishes_radio_cycle_then_finished() {
    let client = Arc::new(FakeProvisioning::new(vec![
        ProvisioningEvent::NeedRadioOffline,
        ProvisioningEvent::NeedRadioOnline,
        ProvisioningEvent::Done,
    ]));
    let (network_tx, mut network_rx) = mpsc::channel(8);
    let (private_tx, mut private_rx) = mpsc::unbounded_channel();
    let (fatal_tx, mut fatal_rx) = mpsc::unbounded_channel();
    let cancel = CancellationToken::new();

    spawn_provisioning(
        client,
        network_tx,
        private_tx,
        fatal_tx,
        Duration::from_secs(10),
        cancel,
    );

    assert_eq!(network_rx.recv().await, Some(NetworkMessage::DisconnectRequest));
    assert_eq!(network_rx.recv().await, Some(NetworkMessage::ConnectRequest));

    tokio::time::advance(Duration::from_secs(11)).await;

    assert_eq!(private_rx.recv().await, Some(PrivateEvent::ProvisioningFinished));
    assert!(fatal_rx.try_recv().is_err());
}

#[tokio::test]
async fn recoverable_failure_emits_provisioning_failed() {
    let client = Arc::new(FakeProvisioning::new(vec![ProvisioningEvent::DeviceNotClaimed]));
    let (network_tx, _network_rx) = mpsc::channel(8);
    let (private_tx, mut private_rx) = mpsc::unbounded_channel();
    let (fatal_tx, mut fatal_rx) = mpsc::unbounded_channel();
    let cancel = CancellationToken::new();

    spawn_provisioning(client, network_tx, private_tx, fatal_tx, Duration::from_secs(0), cancel);

    assert_eq!(private_rx.recv().await, Some(PrivateEvent::ProvisioningFailed));
    assert!(fatal_rx.try_recv().is_err());
}

#[tokio::test]
async fn wrong_root_ca_is_fatal() {
    let client = Arc::new(FakeProvisioning::new(vec![ProvisioningEvent::WrongRootCA]));
    let (network_tx, _network_rx) = mpsc::channel(8);
    let (private_tx, mut private_rx) = mpsc::unbounded_channel();
    let (fatal_tx, mut fatal_rx) = mpsc::unbounded_channel();
    let cancel = CancellationToken::new();

    spawn_provisioning(client, network_tx, private_tx, fatal_tx, Duration::from_secs(0), cancel);

    let fatal = fatal_rx.recv().await;
    assert_eq!(fatal, Some(GatewayError::ProvisioningFatal));
    assert!(private_rx.try_recv().is_err());
}

#[tokio::test]
async fn cancellation_stops_the_dialogue() {
    let client = Arc::new(FakeProvisioning::new(vec![]));
    let (network_tx, _network_rx) = mpsc::channel(8);
    let (private_tx, mut private_rx) = mpsc::unbounded_channel();
    let (fatal_tx, _fatal_rx) = mpsc::unbounded_channel();
    let cancel = CancellationToken::new();
    cancel.cancel();

    spawn_provisioning(client, network_tx, private_tx, fatal_tx, Duration::from_secs(0), cancel);

    tokio::time::sleep(Duration::from_millis(10)).await;
    assert!(private_rx.try_recv().is_err());
}
