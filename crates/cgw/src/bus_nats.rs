// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Wires the in-process [`crate::bus::Bus`] channels onto NATS subjects — the
//! on-device pub/sub fabric the component design treats as a black box.
//!
//! Each logical channel gets one subject under the configured prefix:
//! `<prefix>.network`, `<prefix>.cloud.in`, `<prefix>.cloud.out`,
//! `<prefix>.storage.control.in`, `<prefix>.storage.control.out`,
//! `<prefix>.storage.data`, `<prefix>.location.out`. Payloads are JSON.

use futures_util::StreamExt;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::bus::{
    CloudInMessage, CloudOutMessage, LocationOutMessage, NetworkMessage, StorageControlIn,
    StorageControlOut, StorageDataMessage,
};

/// Connect to the NATS server backing the bus.
pub async fn connect(url: &str) -> anyhow::Result<async_nats::Client> {
    Ok(async_nats::connect(url).await?)
}

/// Subscribe to an inbound subject, decode each message as JSON, and forward
/// it onto `tx`. Decode failures are logged and skipped rather than fatal:
/// a malformed message on the bus should not take the whole core down.
async fn forward_inbound<T>(
    client: async_nats::Client,
    subject: String,
    tx: mpsc::Sender<T>,
    cancel: CancellationToken,
) where
    T: serde::de::DeserializeOwned + Send + 'static,
{
    let mut sub = match client.subscribe(subject.clone()).await {
        Ok(sub) => sub,
        Err(e) => {
            tracing::error!(subject, err = %e, "failed to subscribe to bus subject");
            return;
        }
    };

    loop {
        let msg = tokio::select! {
            _ = cancel.cancelled() => return,
            msg = sub.next() => match msg {
                Some(msg) => msg,
                None => return,
            },
        };

        match serde_json::from_slice::<T>(&msg.payload) {
            Ok(decoded) => {
                if tx.send(decoded).await.is_err() {
                    return;
                }
            }
            Err(e) => tracing::warn!(subject, err = %e, "dropping malformed bus message"),
        }
    }
}

/// Spawn the four inbound forwarders (NETWORK, CLOUD in, STORAGE control in,
/// STORAGE data) as detached tasks tied to `cancel`.
pub fn spawn_inbound(
    client: &async_nats::Client,
    prefix: &str,
    network_tx: mpsc::Sender<NetworkMessage>,
    cloud_in_tx: mpsc::Sender<CloudInMessage>,
    storage_control_tx: mpsc::Sender<StorageControlIn>,
    storage_data_tx: mpsc::Sender<StorageDataMessage>,
    cancel: &CancellationToken,
) {
    tokio::spawn(forward_inbound(
        client.clone(),
        format!("{prefix}.network"),
        network_tx,
        cancel.child_token(),
    ));
    tokio::spawn(forward_inbound(
        client.clone(),
        format!("{prefix}.cloud.in"),
        cloud_in_tx,
        cancel.child_token(),
    ));
    tokio::spawn(forward_inbound(
        client.clone(),
        format!("{prefix}.storage.control.in"),
        storage_control_tx,
        cancel.child_token(),
    ));
    tokio::spawn(forward_inbound(
        client.clone(),
        format!("{prefix}.storage.data"),
        storage_data_tx,
        cancel.child_token(),
    ));
}

/// Drain the four outbound receivers (CLOUD out, STORAGE control out,
/// NETWORK requests, LOCATION out) and republish each to its NATS subject.
/// One task, one `select!`, matching the single-producer-per-subject shape
/// the rest of the bus assumes.
pub async fn run_outbound(
    client: async_nats::Client,
    prefix: String,
    mut cloud_out_rx: mpsc::Receiver<CloudOutMessage>,
    mut storage_control_out_rx: mpsc::Receiver<StorageControlOut>,
    mut network_out_rx: mpsc::Receiver<NetworkMessage>,
    mut location_out_rx: mpsc::Receiver<LocationOutMessage>,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            _ = cancel.cancelled() => return,
            Some(msg) = cloud_out_rx.recv() => {
                publish(&client, format!("{prefix}.cloud.out"), &msg).await;
            }
            Some(msg) = storage_control_out_rx.recv() => {
                publish(&client, format!("{prefix}.storage.control.out"), &msg).await;
            }
            Some(msg) = network_out_rx.recv() => {
                publish(&client, format!("{prefix}.network"), &msg).await;
            }
            Some(msg) = location_out_rx.recv() => {
                publish(&client, format!("{prefix}.location.out"), &msg).await;
            }
            else => return,
        }
    }
}

async fn publish(client: &async_nats::Client, subject: String, msg: &impl serde::Serialize) {
    let payload = match serde_json::to_vec(msg) {
        Ok(p) => p,
        Err(e) => {
            tracing::warn!(subject, err = %e, "failed to serialize outbound bus message");
            return;
        }
    };
    if let Err(e) = client.publish(subject.clone(), payload.into()).await {
        tracing::warn!(subject, err = %e, "publish failed");
    }
}
