// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Wires the production collaborators onto the NATS-backed bus and runs the
//! state machine to completion. Split from `main.rs` so the daemon entry
//! point stays a thin parse-and-dispatch shell.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use crate::bus::Bus;
use crate::clock::SystemClock;
use crate::collaborators_nats::{NatsProvisioning, NatsStorage, NatsTransport};
use crate::state::{StateMachine, StateMachineInputs};
use crate::GatewayConfig;

const CHANNEL_CAPACITY: usize = 64;

/// Initialize the global tracing subscriber from configuration.
///
/// Priority: `--log-level` / `CGW_LOG_LEVEL` > `RUST_LOG` > default "info".
pub fn init_tracing(config: &GatewayConfig) {
    use tracing_subscriber::fmt;

    let filter = if std::env::var("RUST_LOG").is_err() {
        EnvFilter::try_new(&config.log_level).unwrap_or_else(|_| EnvFilter::new("info"))
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    let result = match config.log_format.as_str() {
        "json" => fmt::fmt().with_env_filter(filter).json().try_init(),
        _ => fmt::fmt().with_env_filter(filter).try_init(),
    };
    drop(result);
}

/// Connect to NATS, wire the bus, construct the state machine over its
/// production collaborators, and run it to completion.
pub async fn run(config: GatewayConfig) -> anyhow::Result<()> {
    init_tracing(&config);

    let config = Arc::new(config);
    let cancel = CancellationToken::new();

    let client = crate::bus_nats::connect(&config.nats_url).await?;

    let (network_tx, network_rx) = tokio::sync::mpsc::channel(CHANNEL_CAPACITY);
    let (cloud_in_tx, cloud_in_rx) = tokio::sync::mpsc::channel(CHANNEL_CAPACITY);
    let (storage_control_tx, storage_control_rx) = tokio::sync::mpsc::channel(CHANNEL_CAPACITY);
    let (storage_data_tx, storage_data_rx) = tokio::sync::mpsc::channel(CHANNEL_CAPACITY);
    let (cloud_out_tx, cloud_out_rx) = tokio::sync::mpsc::channel(CHANNEL_CAPACITY);
    let (storage_control_out_tx, storage_control_out_rx) = tokio::sync::mpsc::channel(CHANNEL_CAPACITY);
    let (network_out_tx, network_out_rx) = tokio::sync::mpsc::channel(CHANNEL_CAPACITY);
    let (location_out_tx, location_out_rx) = tokio::sync::mpsc::channel(CHANNEL_CAPACITY);
    let (private_tx, private_rx) = tokio::sync::mpsc::unbounded_channel();

    crate::bus_nats::spawn_inbound(
        &client,
        &config.nats_subject_prefix,
        network_tx,
        cloud_in_tx,
        storage_control_tx,
        storage_data_tx,
        &cancel,
    );
    tokio::spawn(crate::bus_nats::run_outbound(
        client.clone(),
        config.nats_subject_prefix.clone(),
        cloud_out_rx,
        storage_control_out_rx,
        network_out_rx,
        location_out_rx,
        cancel.child_token(),
    ));

    let bus = Bus {
        cloud_out: cloud_out_tx,
        storage_control_out: storage_control_out_tx,
        network_out: network_out_tx,
        location_out: location_out_tx,
        private_tx,
    };

    let transport = Arc::new(NatsTransport::new(
        client.clone(),
        config.nats_subject_prefix.clone(),
        config.msg_processing_timeout(),
    ));
    let storage = Arc::new(NatsStorage::new(client.clone(), config.nats_subject_prefix.clone()));
    let provisioning = Arc::new(NatsProvisioning::new(client.clone(), config.nats_subject_prefix.clone()));
    let clock = Arc::new(SystemClock::new());

    let mut machine = StateMachine::new(StateMachineInputs {
        config: Arc::clone(&config),
        bus,
        transport,
        storage,
        provisioning,
        clock,
        cancel: cancel.clone(),
        network_rx,
        cloud_in_rx,
        storage_control_rx,
        storage_data_rx,
        private_rx,
    });

    let result = machine.run().await;
    cancel.cancel();
    // Give the outbound/inbound NATS tasks a moment to see the cancellation
    // before the process exits out from under them.
    tokio::time::sleep(Duration::from_millis(50)).await;
    result.map_err(anyhow::Error::from)
}
