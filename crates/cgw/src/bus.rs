// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Message bus channel types and the core-internal private channel.
//!
//! The bus itself is not reimplemented here: in production it is backed by
//! the on-device pub/sub fabric; for this crate each logical channel is
//! modeled as its own `tokio::sync::{broadcast, mpsc}` pair, matching the
//! "one channel per producer family" shape the state machine depends on.
//! The private channel has exactly one producer family (async callbacks) and
//! one consumer (the state machine loop).

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

/// Inbound messages from the NETWORK channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum NetworkMessage {
    Connected,
    Disconnected,
    ConnectRequest,
    DisconnectRequest,
    QualitySampleResponse { rsrp: i32, energy_estimate: i32, timestamp: i64 },
}

/// Inbound messages on the CLOUD channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum CloudInMessage {
    SendJsonPayload(Vec<u8>),
    ShadowPollDelta,
    ShadowPollDesired,
    ShadowReportReported(Vec<u8>),
    ProvisioningRequest,
}

/// Outbound messages published on the CLOUD channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum CloudOutMessage {
    Connected,
    Disconnected,
    ShadowResponseDelta(Vec<u8>),
    ShadowResponseDesired(Vec<u8>),
    ShadowResponseEmptyDelta,
    ShadowResponseEmptyDesired,
}

/// Inbound control messages from the STORAGE channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum StorageControlIn {
    BatchAvailable { session_id: u32, count: u32, more_data: bool },
    BatchEmpty { session_id: u32 },
    BatchError { session_id: u32 },
    BatchBusy { session_id: u32 },
}

/// Outbound control messages published on the STORAGE channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum StorageControlOut {
    BatchRequest { session_id: u32 },
    BatchClose { session_id: u32 },
}

/// Identifies the kind of a realtime data record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DataItemKind {
    Environmental,
    Power,
    Location,
    NetworkQuality,
}

/// A single buffered record drained from storage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataItem {
    pub kind: DataItemKind,
    pub timestamp: i64,
    pub payload: Vec<u8>,
}

/// Inbound messages on the STORAGE data channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum StorageDataMessage {
    RealtimeItem(DataItem),
}

/// Outbound messages on the LOCATION channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LocationOutMessage {
    SearchCancel,
}

/// Core-internal events produced by asynchronous collaborators and consumed
/// only by the state machine's owning thread.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PrivateEvent {
    ConnectAttemptSucceeded,
    ConnectAttemptFailed,
    Unauthenticated,
    ProvisioningFinished,
    ProvisioningFailed,
    BackoffExpired,
    SendRequestFailed,
}

/// Identifies which logical channel the most recently processed message
/// arrived on (`StateContext::last_channel`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Channel {
    Network,
    Cloud,
    StorageControl,
    StorageData,
    Private,
}

/// A fixed-capacity, allocation-free summary of one bus message, standing in
/// for `StateContext::last_message`. Carries enough of each variant's shape
/// for diagnostics without copying unbounded payloads (`SendJsonPayload`,
/// `ShadowReportReported`) wholesale.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SmallMessage {
    NetworkConnected,
    NetworkDisconnected,
    NetworkConnectRequest,
    NetworkDisconnectRequest,
    NetworkQualitySampleResponse,
    CloudSendJsonPayload { len: usize },
    CloudShadowPollDelta,
    CloudShadowPollDesired,
    CloudShadowReportReported { len: usize },
    CloudProvisioningRequest,
    StorageBatchAvailable { session_id: u32 },
    StorageBatchEmpty { session_id: u32 },
    StorageBatchError { session_id: u32 },
    StorageBatchBusy { session_id: u32 },
    StorageRealtimeItem { kind: DataItemKind },
    Private(PrivateEvent),
}

impl SmallMessage {
    pub fn from_network(msg: &NetworkMessage) -> Self {
        match msg {
            NetworkMessage::Connected => Self::NetworkConnected,
            NetworkMessage::Disconnected => Self::NetworkDisconnected,
            NetworkMessage::ConnectRequest => Self::NetworkConnectRequest,
            NetworkMessage::DisconnectRequest => Self::NetworkDisconnectRequest,
            NetworkMessage::QualitySampleResponse { .. } => Self::NetworkQualitySampleResponse,
        }
    }

    pub fn from_cloud_in(msg: &CloudInMessage) -> Self {
        match msg {
            CloudInMessage::SendJsonPayload(bytes) => Self::CloudSendJsonPayload { len: bytes.len() },
            CloudInMessage::ShadowPollDelta => Self::CloudShadowPollDelta,
            CloudInMessage::ShadowPollDesired => Self::CloudShadowPollDesired,
            CloudInMessage::ShadowReportReported(bytes) => {
                Self::CloudShadowReportReported { len: bytes.len() }
            }
            CloudInMessage::ProvisioningRequest => Self::CloudProvisioningRequest,
        }
    }

    pub fn from_storage_control_in(msg: &StorageControlIn) -> Self {
        match *msg {
            StorageControlIn::BatchAvailable { session_id, .. } => {
                Self::StorageBatchAvailable { session_id }
            }
            StorageControlIn::BatchEmpty { session_id } => Self::StorageBatchEmpty { session_id },
            StorageControlIn::BatchError { session_id } => Self::StorageBatchError { session_id },
            StorageControlIn::BatchBusy { session_id } => Self::StorageBatchBusy { session_id },
        }
    }

    pub fn from_storage_data(msg: &StorageDataMessage) -> Self {
        let StorageDataMessage::RealtimeItem(item) = msg;
        Self::StorageRealtimeItem { kind: item.kind }
    }

    pub fn from_private(event: &PrivateEvent) -> Self {
        Self::Private(*event)
    }
}

/// Outbound publish handles the state machine writes to.
///
/// Grouped into one struct so `StateMachine` can take a single `&Bus`
/// parameter rather than threading five senders through every handler.
pub struct Bus {
    pub cloud_out: mpsc::Sender<CloudOutMessage>,
    pub storage_control_out: mpsc::Sender<StorageControlOut>,
    pub network_out: mpsc::Sender<NetworkMessage>,
    pub location_out: mpsc::Sender<LocationOutMessage>,
    pub private_tx: mpsc::UnboundedSender<PrivateEvent>,
}

impl Bus {
    /// Publish with the configured bus-publish timeout. A timeout here is
    /// always fatal (ring buffer wedged), never recoverable.
    pub async fn publish_cloud(
        &self,
        msg: CloudOutMessage,
        timeout: std::time::Duration,
    ) -> Result<(), crate::error::GatewayError> {
        tokio::time::timeout(timeout, self.cloud_out.send(msg))
            .await
            .map_err(|_| crate::error::GatewayError::BusPublishTimeout)?
            .map_err(|_| crate::error::GatewayError::BusPublishTimeout)
    }

    pub async fn publish_storage_control(
        &self,
        msg: StorageControlOut,
        timeout: std::time::Duration,
    ) -> Result<(), crate::error::GatewayError> {
        tokio::time::timeout(timeout, self.storage_control_out.send(msg))
            .await
            .map_err(|_| crate::error::GatewayError::BusPublishTimeout)?
            .map_err(|_| crate::error::GatewayError::BusPublishTimeout)
    }

    pub async fn publish_location(
        &self,
        msg: LocationOutMessage,
        timeout: std::time::Duration,
    ) -> Result<(), crate::error::GatewayError> {
        tokio::time::timeout(timeout, self.location_out.send(msg))
            .await
            .map_err(|_| crate::error::GatewayError::BusPublishTimeout)?
            .map_err(|_| crate::error::GatewayError::BusPublishTimeout)
    }
}
