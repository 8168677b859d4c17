// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! End-to-end smoke tests that spawn the real `cgwd` binary and drive it
//! over NATS against a [`FakeDevice`] standing in for the radio, storage,
//! and provisioning services.

use std::time::Duration;

use cgw_specs::{next_json, CgwProcess, FakeDevice};
use serde_json::json;

const TIMEOUT: Duration = Duration::from_secs(10);

#[tokio::test]
async fn happy_connect_publishes_cloud_connected() -> anyhow::Result<()> {
    let cgw = CgwProcess::start()?;
    let device = FakeDevice::connect(cgw.prefix()).await?;

    device.respond_connect_always("ok").await?;
    device.respond_disconnect_ok().await?;
    let mut cloud_out = device.subscribe("cloud.out").await?;

    device.publish("network", &json!("Connected")).await?;

    let connected: String = next_json(&mut cloud_out, TIMEOUT).await?;
    assert_eq!(connected, "Connected");

    Ok(())
}

#[tokio::test]
async fn auth_required_cycles_radio_then_connects() -> anyhow::Result<()> {
    let cgw = CgwProcess::start()?;
    let device = FakeDevice::connect(cgw.prefix()).await?;

    device.respond_connect_always("unauthenticated").await?;
    device.respond_disconnect_ok().await?;
    let mut network_out = device.subscribe("network").await?;

    device.publish("network", &json!("Connected")).await?;

    // The core asks the radio to cycle while provisioning runs.
    let disconnect_request: String = next_json(&mut network_out, TIMEOUT).await?;
    assert_eq!(disconnect_request, "DisconnectRequest");

    device.emit_provisioning_event("NeedRadioOffline").await?;
    device.emit_provisioning_event("NeedRadioOnline").await?;
    device.emit_provisioning_event("Done").await?;

    let connect_request: String = next_json(&mut network_out, TIMEOUT).await?;
    assert_eq!(connect_request, "ConnectRequest");

    Ok(())
}

#[tokio::test]
async fn send_failure_triggers_cloud_disconnected() -> anyhow::Result<()> {
    let cgw = CgwProcess::start()?;
    let device = FakeDevice::connect(cgw.prefix()).await?;

    device.respond_connect_always("ok").await?;
    device.respond_disconnect_ok().await?;

    let mut cloud_out = device.subscribe("cloud.out").await?;
    device.publish("network", &json!("Connected")).await?;
    let connected: String = next_json(&mut cloud_out, TIMEOUT).await?;
    assert_eq!(connected, "Connected");

    // No responder registered for send_json: the request times out and is
    // treated as a send failure, forcing a reconnect.
    device.publish("cloud.in", &json!({ "SendJsonPayload": [1, 2, 3] })).await?;

    let disconnected: String = next_json(&mut cloud_out, TIMEOUT).await?;
    assert_eq!(disconnected, "Disconnected");

    Ok(())
}
