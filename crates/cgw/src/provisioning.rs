// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The provisioning coordinator: drives the external credential-refresh
//! dialogue and translates its events into [`PrivateEvent`]s and NETWORK
//! publishes, per the protocol in the component design.

use std::future::Future;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::bus::{NetworkMessage, PrivateEvent};
use crate::error::GatewayError;

/// Raw events emitted by the external credential-refresh dialogue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProvisioningEvent {
    NeedRadioOffline,
    NeedRadioOnline,
    Done,
    NoCommands,
    TooManyCommands,
    Failed,
    NoValidDateTime,
    DeviceNotClaimed,
    WrongRootCA,
    FatalError,
}

/// The external collaborator that runs the credential-refresh sub-protocol.
pub trait ProvisioningClient: Send + Sync {
    /// Start (or restart) the dialogue; returns a stream of its events.
    fn run(&self) -> impl Future<Output = mpsc::UnboundedReceiver<ProvisioningEvent>> + Send;
}

/// Drive one provisioning dialogue to completion, translating its events.
///
/// Spawned as a detached task per entry into `Connecting/Attempt/Provisioning`
/// so it never touches `StateContext` directly; all effects are posted back
/// through `network_out` (radio cycling), `private_tx` (cloud-state-relevant
/// outcomes), or `fatal_tx` (non-recoverable provisioning errors).
pub fn spawn_provisioning<P>(
    client: std::sync::Arc<P>,
    network_out: mpsc::Sender<NetworkMessage>,
    private_tx: mpsc::UnboundedSender<PrivateEvent>,
    fatal_tx: mpsc::UnboundedSender<GatewayError>,
    settle: Duration,
    cancel: CancellationToken,
) where
    P: ProvisioningClient + Send + Sync + 'static,
{
    tokio::spawn(async move {
        let mut events = client.run().await;
        loop {
            let event = tokio::select! {
                _ = cancel.cancelled() => return,
                event = events.recv() => match event {
                    Some(event) => event,
                    None => return,
                },
            };

            match event {
                ProvisioningEvent::NeedRadioOffline => {
                    let _ = network_out.send(NetworkMessage::DisconnectRequest).await;
                }
                ProvisioningEvent::NeedRadioOnline => {
                    let _ = network_out.send(NetworkMessage::ConnectRequest).await;
                }
                ProvisioningEvent::Done
                | ProvisioningEvent::NoCommands
                | ProvisioningEvent::TooManyCommands => {
                    tokio::select! {
                        _ = cancel.cancelled() => return,
                        _ = tokio::time::sleep(settle) => {}
                    }
                    let _ = private_tx.send(PrivateEvent::ProvisioningFinished);
                    return;
                }
                ProvisioningEvent::Failed
                | ProvisioningEvent::NoValidDateTime
                | ProvisioningEvent::DeviceNotClaimed => {
                    let _ = private_tx.send(PrivateEvent::ProvisioningFailed);
                    return;
                }
                ProvisioningEvent::WrongRootCA => {
                    let _ = fatal_tx.send(GatewayError::ProvisioningFatal);
                    return;
                }
                ProvisioningEvent::FatalError => {
                    let _ = fatal_tx.send(GatewayError::ProvisioningFatal);
                    return;
                }
            }
        }
    });
}

#[cfg(any(test, feature = "test-support"))]
pub mod fake {
    use super::*;
    use std::sync::Mutex;

    /// In-memory fake provisioning client: replays a scripted event sequence.
    pub struct FakeProvisioning {
        script: Mutex<Vec<ProvisioningEvent>>,
    }

    impl FakeProvisioning {
        pub fn new(script: Vec<ProvisioningEvent>) -> Self {
            Self { script: Mutex::new(script) }
        }
    }

    impl ProvisioningClient for FakeProvisioning {
        async fn run(&self) -> mpsc::UnboundedReceiver<ProvisioningEvent> {
            let (tx, rx) = mpsc::unbounded_channel();
            let events = std::mem::take(&mut *self.script.lock().unwrap());
            for event in events {
                let _ = tx.send(event);
            }
            rx
        }
    }
}

#[cfg(test)]
#[path = "provisioning_tests.rs"]
mod tests;
