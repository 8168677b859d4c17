// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Production collaborators: thin NATS request/reply adapters over the
//! actual CoAP/DTLS radio, persisted storage, and provisioning dialogue.
//!
//! Those subsystems are out of scope here (vendor-specific drivers); this
//! module only defines the wire contract a real implementation answers on
//! the other end of each subject. It exists so `cgwd` has something to run
//! against, not as a model of the radio stack itself.

use std::future::Future;
use std::time::Duration;

use futures_util::StreamExt;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::provisioning::{ProvisioningClient, ProvisioningEvent};
use crate::storage::{ReadOutcome, StorageClient};
use crate::transport::{CloudTransport, ConnectOutcome, DisconnectOutcome, SendOutcome};

#[derive(Serialize)]
struct ConnectRequest<'a> {
    version: &'a str,
}

#[derive(Serialize)]
struct SensorRequest<'a> {
    app_id: &'a str,
    value: f64,
    timestamp: i64,
    confirmable: bool,
}

#[derive(Serialize)]
struct JsonRequest<'a> {
    #[serde(with = "serde_bytes_as_base64")]
    bytes: &'a [u8],
    confirmable: bool,
}

#[derive(Serialize)]
struct ShadowGetRequest {
    delta_only: bool,
}

#[derive(Serialize)]
struct ShadowPatchRequest<'a> {
    path: &'a str,
    #[serde(with = "serde_bytes_as_base64")]
    bytes: &'a [u8],
    confirmable: bool,
}

#[derive(Deserialize)]
struct OkReply {
    ok: bool,
}

mod serde_bytes_as_base64 {
    use base64::Engine;
    use serde::Serializer;

    pub fn serialize<S: Serializer>(bytes: &&[u8], s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&base64::engine::general_purpose::STANDARD.encode(bytes))
    }
}

/// A CoAP/DTLS transport reached over NATS request/reply rather than in-process.
pub struct NatsTransport {
    client: async_nats::Client,
    prefix: String,
    request_timeout: Duration,
}

impl NatsTransport {
    pub fn new(client: async_nats::Client, prefix: String, request_timeout: Duration) -> Self {
        Self { client, prefix, request_timeout }
    }

    async fn request_ok(&self, subject: String, payload: Vec<u8>) -> SendOutcome {
        match self.roundtrip::<OkReply>(subject, payload).await {
            Some(reply) if reply.ok => Ok(()),
            _ => Err(()),
        }
    }

    async fn roundtrip<R: serde::de::DeserializeOwned>(
        &self,
        subject: String,
        payload: Vec<u8>,
    ) -> Option<R> {
        let fut = self.client.request(subject.clone(), payload.into());
        let reply = match tokio::time::timeout(self.request_timeout, fut).await {
            Ok(Ok(reply)) => reply,
            Ok(Err(e)) => {
                tracing::warn!(subject, err = %e, "transport request failed");
                return None;
            }
            Err(_) => {
                tracing::warn!(subject, "transport request timed out");
                return None;
            }
        };
        match serde_json::from_slice(&reply.payload) {
            Ok(decoded) => Some(decoded),
            Err(e) => {
                tracing::warn!(subject, err = %e, "malformed transport reply");
                None
            }
        }
    }
}

impl CloudTransport for NatsTransport {
    fn connect(&self, version: &str) -> impl Future<Output = ConnectOutcome> + Send {
        let subject = format!("{}.rpc.connect", self.prefix);
        let payload = serde_json::to_vec(&ConnectRequest { version }).unwrap_or_default();
        async move {
            #[derive(Deserialize)]
            struct Reply {
                outcome: String,
            }
            match self.roundtrip::<Reply>(subject, payload).await {
                Some(r) if r.outcome == "ok" => ConnectOutcome::Ok,
                Some(r) if r.outcome == "unauthenticated" => ConnectOutcome::Unauthenticated,
                _ => ConnectOutcome::Failed,
            }
        }
    }

    fn disconnect(&self) -> impl Future<Output = DisconnectOutcome> + Send {
        let subject = format!("{}.rpc.disconnect", self.prefix);
        async move {
            match self.roundtrip::<OkReply>(subject, Vec::new()).await {
                Some(r) if r.ok => DisconnectOutcome::Ok,
                Some(_) => DisconnectOutcome::Failed,
                None => DisconnectOutcome::Failed,
            }
        }
    }

    fn send_sensor(
        &self,
        app_id: &str,
        value: f64,
        timestamp: i64,
        confirmable: bool,
    ) -> impl Future<Output = SendOutcome> + Send {
        let subject = format!("{}.rpc.send_sensor", self.prefix);
        let payload =
            serde_json::to_vec(&SensorRequest { app_id, value, timestamp, confirmable })
                .unwrap_or_default();
        self.request_ok(subject, payload)
    }

    fn send_json(&self, bytes: &[u8], confirmable: bool) -> impl Future<Output = SendOutcome> + Send {
        let subject = format!("{}.rpc.send_json", self.prefix);
        let payload = serde_json::to_vec(&JsonRequest { bytes, confirmable }).unwrap_or_default();
        self.request_ok(subject, payload)
    }

    fn shadow_get(&self, delta_only: bool) -> impl Future<Output = Result<Vec<u8>, ()>> + Send {
        let subject = format!("{}.rpc.shadow_get", self.prefix);
        let payload = serde_json::to_vec(&ShadowGetRequest { delta_only }).unwrap_or_default();
        async move {
            #[derive(Deserialize)]
            struct Reply {
                ok: bool,
                #[serde(default)]
                bytes: Vec<u8>,
            }
            match self.roundtrip::<Reply>(subject, payload).await {
                Some(r) if r.ok => Ok(r.bytes),
                _ => Err(()),
            }
        }
    }

    fn shadow_patch(
        &self,
        path: &str,
        bytes: &[u8],
        confirmable: bool,
    ) -> impl Future<Output = SendOutcome> + Send {
        let subject = format!("{}.rpc.shadow_patch", self.prefix);
        let payload =
            serde_json::to_vec(&ShadowPatchRequest { path, bytes, confirmable }).unwrap_or_default();
        self.request_ok(subject, payload)
    }
}

/// Persisted storage reached over NATS request/reply.
pub struct NatsStorage {
    client: async_nats::Client,
    prefix: String,
}

impl NatsStorage {
    pub fn new(client: async_nats::Client, prefix: String) -> Self {
        Self { client, prefix }
    }
}

impl StorageClient for NatsStorage {
    fn read(&self, session_id: u32, timeout: Duration) -> impl Future<Output = ReadOutcome> + Send {
        let subject = format!("{}.rpc.storage.read", self.prefix);
        let payload = serde_json::json!({ "session_id": session_id }).to_string().into_bytes();
        async move {
            #[derive(Deserialize)]
            #[serde(tag = "kind")]
            enum Reply {
                Item { item: crate::bus::DataItem },
                TimedOut,
                Error,
            }
            let fut = self.client.request(subject.clone(), payload.into());
            let reply = match tokio::time::timeout(timeout, fut).await {
                Ok(Ok(reply)) => reply,
                Ok(Err(e)) => {
                    tracing::warn!(subject, err = %e, "storage read request failed");
                    return ReadOutcome::Error;
                }
                Err(_) => return ReadOutcome::TimedOut,
            };
            match serde_json::from_slice::<Reply>(&reply.payload) {
                Ok(Reply::Item { item }) => ReadOutcome::Item(item),
                Ok(Reply::TimedOut) => ReadOutcome::TimedOut,
                Ok(Reply::Error) => ReadOutcome::Error,
                Err(e) => {
                    tracing::warn!(subject, err = %e, "malformed storage reply");
                    ReadOutcome::Error
                }
            }
        }
    }
}

/// The external credential-refresh dialogue, reached as a NATS event stream.
pub struct NatsProvisioning {
    client: async_nats::Client,
    prefix: String,
}

impl NatsProvisioning {
    pub fn new(client: async_nats::Client, prefix: String) -> Self {
        Self { client, prefix }
    }
}

impl ProvisioningClient for NatsProvisioning {
    fn run(&self) -> impl Future<Output = mpsc::UnboundedReceiver<ProvisioningEvent>> + Send {
        let client = self.client.clone();
        let subject = format!("{}.provisioning.events", self.prefix);
        async move {
            let (tx, rx) = mpsc::unbounded_channel();
            match client.subscribe(subject.clone()).await {
                Ok(mut sub) => {
                    tokio::spawn(async move {
                        while let Some(msg) = sub.next().await {
                            match serde_json::from_slice::<ProvisioningEvent>(&msg.payload) {
                                Ok(event) => {
                                    if tx.send(event).is_err() {
                                        return;
                                    }
                                }
                                Err(e) => {
                                    tracing::warn!(err = %e, "dropping malformed provisioning event")
                                }
                            }
                        }
                    });
                }
                Err(e) => {
                    tracing::error!(subject, err = %e, "failed to subscribe to provisioning events");
                }
            }
            rx
        }
    }
}
