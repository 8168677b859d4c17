// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The batch drain engine: pulls buffered records out of storage in
//! sessions, normalizes and forwards them, and closes every session it
//! opens exactly once.

use std::time::Duration;

use crate::bus::{Bus, DataItem, DataItemKind, StorageControlOut};
use crate::error::GatewayError;
use crate::storage::{ReadOutcome, StorageClient};
use crate::timestamp::{Kind as TimestampKind, TimestampPolicy};
use crate::transport::CloudTransport;

/// A scoped handle over one storage drain session.
///
/// The only way to retire a session without a warning is [`BatchSession::close`].
/// Forgetting to close on some exit path is a defect; `Drop` cannot publish
/// `BatchClose` itself (there is no async drop in Rust), so it logs loudly
/// instead as a last-resort safety net.
#[derive(Debug)]
pub struct BatchSession {
    pub session_id: u32,
    closed: bool,
}

impl BatchSession {
    pub fn open(session_id: u32) -> Self {
        Self { session_id, closed: false }
    }

    /// Explicitly close the session, publishing `BatchClose`. Consumes the
    /// guard so it cannot be closed twice.
    pub async fn close(mut self, bus: &Bus, timeout: Duration) -> Result<(), GatewayError> {
        bus.publish_storage_control(
            StorageControlOut::BatchClose { session_id: self.session_id },
            timeout,
        )
        .await?;
        self.closed = true;
        Ok(())
    }
}

impl Drop for BatchSession {
    fn drop(&mut self) {
        if !self.closed {
            tracing::error!(
                session_id = self.session_id,
                "batch session dropped without an explicit close — this is a bug"
            );
        }
    }
}

/// Outcome of one storage-read loop for a single `BatchAvailable` round.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DrainOutcome {
    /// Storage read timed out: this round of draining is complete.
    Done,
    /// Storage reported a hard error; the session must be closed.
    StorageError,
    /// A per-item send failed; treated as session-aborting (see DESIGN.md).
    ItemFatal,
}

/// Run the bounded storage-read loop described in the batch drain protocol
/// for one `BatchAvailable` round against an already-open session.
pub async fn drain_round<T, S, F>(
    session_id: u32,
    transport: &T,
    storage: &S,
    read_timeout: Duration,
    policy: TimestampPolicy,
    future_epoch_threshold_ms: i64,
    current_uptime_ms: i64,
    wall_clock_valid: bool,
    uptime_to_unix: F,
    confirmable: bool,
) -> DrainOutcome
where
    T: CloudTransport,
    S: StorageClient,
    F: Fn(i64) -> i64,
{
    loop {
        match storage.read(session_id, read_timeout).await {
            ReadOutcome::TimedOut => return DrainOutcome::Done,
            ReadOutcome::Error => return DrainOutcome::StorageError,
            ReadOutcome::Item(item) => {
                let ts = match normalize_item_timestamp(
                    &item,
                    policy,
                    future_epoch_threshold_ms,
                    current_uptime_ms,
                    wall_clock_valid,
                    &uptime_to_unix,
                ) {
                    Ok(ts) => ts,
                    Err(_) => {
                        tracing::debug!(
                            session_id,
                            kind = ?item.kind,
                            "dropping item: timestamp normalization failed"
                        );
                        continue;
                    }
                };

                let outcome = dispatch_item(transport, &item, ts, confirmable).await;
                if outcome.is_err() {
                    tracing::warn!(session_id, kind = ?item.kind, "per-item send failed, aborting session");
                    return DrainOutcome::ItemFatal;
                }
            }
        }
    }
}

/// Apply the configured timestamp policy to one item's timestamp.
fn normalize_item_timestamp(
    item: &DataItem,
    policy: TimestampPolicy,
    future_epoch_threshold_ms: i64,
    current_uptime_ms: i64,
    wall_clock_valid: bool,
    uptime_to_unix: &impl Fn(i64) -> i64,
) -> Result<i64, TimestampKind> {
    let outcome = crate::timestamp::normalize(
        item.timestamp,
        future_epoch_threshold_ms,
        current_uptime_ms,
        wall_clock_valid,
        uptime_to_unix,
    );
    policy.apply(
        item.timestamp,
        outcome,
        |u| {
            crate::timestamp::normalize(
                u,
                future_epoch_threshold_ms,
                current_uptime_ms,
                wall_clock_valid,
                uptime_to_unix,
            )
        },
        current_uptime_ms,
    )
}

async fn dispatch_item<T: CloudTransport>(
    transport: &T,
    item: &DataItem,
    timestamp: i64,
    confirmable: bool,
) -> Result<(), ()> {
    match item.kind {
        DataItemKind::Environmental | DataItemKind::Power | DataItemKind::NetworkQuality => {
            transport
                .send_sensor(kind_app_id(item.kind), 0.0, timestamp, confirmable)
                .await
        }
        DataItemKind::Location => transport.send_json(&item.payload, confirmable).await,
    }
}

fn kind_app_id(kind: DataItemKind) -> &'static str {
    match kind {
        DataItemKind::Environmental => "ENVIRONMENTAL",
        DataItemKind::Power => "POWER",
        DataItemKind::Location => "LOCATION",
        DataItemKind::NetworkQuality => "NETWORK_QUALITY",
    }
}

#[cfg(test)]
#[path = "drain_tests.rs"]
mod tests;
