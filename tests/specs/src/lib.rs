// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Test harness for end-to-end binary smoke tests.
//!
//! Spawns the real `cgwd` binary as a subprocess, talking to it exactly the
//! way the rest of the fleet does: over NATS. Since the radio, storage, and
//! provisioning dialogue are themselves out-of-process services in
//! production, a [`FakeDevice`] answers their request/reply subjects here
//! instead of a real modem and flash.

use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use futures_util::StreamExt;
use serde::{de::DeserializeOwned, Serialize};
use serde_json::json;

static PREFIX_COUNTER: AtomicU32 = AtomicU32::new(0);

/// URL of the NATS server the test fleet runs against. Overridable so CI can
/// point at a server it already has running.
pub fn nats_url() -> String {
    std::env::var("CGW_SPEC_NATS_URL").unwrap_or_else(|_| "nats://127.0.0.1:4222".to_string())
}

/// A subject prefix unique to one test run, so concurrent tests never cross wires.
pub fn unique_prefix() -> String {
    let n = PREFIX_COUNTER.fetch_add(1, Ordering::SeqCst);
    format!("cgw-spec-{}-{n}", std::process::id())
}

/// Resolve the path to the compiled `cgwd` binary.
pub fn cgwd_binary() -> PathBuf {
    let manifest = Path::new(env!("CARGO_MANIFEST_DIR"));
    // tests/specs → tests → workspace root
    let workspace = manifest.parent().and_then(|p| p.parent()).unwrap_or(manifest);
    workspace.join("target").join("debug").join("cgwd")
}

/// A running `cgwd` process, talking over `prefix`, killed on drop.
pub struct CgwProcess {
    child: Child,
    prefix: String,
}

impl CgwProcess {
    /// Spawn `cgwd` against `nats_url()` under a fresh subject prefix.
    pub fn start() -> anyhow::Result<Self> {
        let binary = cgwd_binary();
        anyhow::ensure!(binary.exists(), "cgwd binary not found at {}", binary.display());

        let prefix = unique_prefix();
        let child = Command::new(&binary)
            .env("CGW_NATS_URL", nats_url())
            .env("CGW_NATS_SUBJECT_PREFIX", &prefix)
            .env("CGW_LOG_FORMAT", "text")
            .env("CGW_LOG_LEVEL", "warn")
            .env("CGW_PROVISIONING_SETTLE_MS", "50")
            .env("CGW_BACKOFF_INITIAL_S", "1")
            .env("CGW_MSG_PROCESSING_TIMEOUT_S", "2")
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()?;

        Ok(Self { child, prefix })
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Wait for the process to exit within `timeout`.
    pub async fn wait_exit(&mut self, timeout: Duration) -> anyhow::Result<std::process::ExitStatus> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if tokio::time::Instant::now() > deadline {
                anyhow::bail!("cgwd did not exit within {timeout:?}");
            }
            if let Some(status) = self.child.try_wait()? {
                return Ok(status);
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
    }
}

/// Pull the next decoded message off a subscription, or bail after `timeout`.
pub async fn next_json<T: DeserializeOwned>(
    sub: &mut async_nats::Subscriber,
    timeout: Duration,
) -> anyhow::Result<T> {
    let msg = tokio::time::timeout(timeout, sub.next())
        .await?
        .ok_or_else(|| anyhow::anyhow!("subscription closed with no message"))?;
    Ok(serde_json::from_slice(&msg.payload)?)
}

impl Drop for CgwProcess {
    fn drop(&mut self) {
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}

/// Stands in for the radio, storage, and provisioning services `cgwd`
/// otherwise talks to in production. Answers are scripted per test.
pub struct FakeDevice {
    client: async_nats::Client,
    prefix: String,
}

impl FakeDevice {
    pub async fn connect(prefix: &str) -> anyhow::Result<Self> {
        let client = async_nats::connect(nats_url()).await?;
        Ok(Self { client, prefix: prefix.to_string() })
    }

    pub fn client(&self) -> &async_nats::Client {
        &self.client
    }

    /// Answer every `connect` RPC with the same outcome, e.g. `{"outcome":"ok"}`.
    /// Subscribes before returning, so the caller can publish the triggering
    /// event immediately after without racing the responder's subscribe.
    pub async fn respond_connect_always(&self, outcome: &'static str) -> anyhow::Result<()> {
        self.spawn_responder(format!("{}.rpc.connect", self.prefix), move |_req: serde_json::Value| {
            json!({ "outcome": outcome })
        })
        .await
    }

    pub async fn respond_disconnect_ok(&self) -> anyhow::Result<()> {
        self.spawn_responder(format!("{}.rpc.disconnect", self.prefix), |_req: serde_json::Value| {
            json!({ "ok": true })
        })
        .await
    }

    pub async fn respond_send_always_ok(&self, subject_suffix: &str) -> anyhow::Result<()> {
        self.spawn_responder(format!("{}.{subject_suffix}", self.prefix), |_req: serde_json::Value| {
            json!({ "ok": true })
        })
        .await
    }

    /// Publish a provisioning dialogue event onto the wire.
    pub async fn emit_provisioning_event(&self, event: &str) -> anyhow::Result<()> {
        let subject = format!("{}.provisioning.events", self.prefix);
        self.client.publish(subject, serde_json::to_string(&json!(event))?.into()).await?;
        Ok(())
    }

    /// Publish onto an arbitrary bus subject under this prefix.
    pub async fn publish(&self, suffix: &str, msg: &impl Serialize) -> anyhow::Result<()> {
        let subject = format!("{}.{suffix}", self.prefix);
        self.client.publish(subject, serde_json::to_vec(msg)?.into()).await?;
        Ok(())
    }

    /// Subscribe to an outbound subject. Must happen before whatever
    /// triggers the expected message: core NATS has no replay, so a
    /// subscription only sees messages published after it is registered.
    pub async fn subscribe(&self, suffix: &str) -> anyhow::Result<async_nats::Subscriber> {
        let subject = format!("{}.{suffix}", self.prefix);
        Ok(self.client.subscribe(subject).await?)
    }

    /// Subscribe to `subject`, then spawn a task that replies to every
    /// request on it with whatever `reply` computes from the decoded
    /// request. The subscribe happens before this returns, so the caller
    /// never races the responder's own registration.
    async fn spawn_responder<Req, F>(&self, subject: String, reply: F) -> anyhow::Result<()>
    where
        Req: DeserializeOwned + Send + 'static,
        F: Fn(Req) -> serde_json::Value + Send + 'static,
    {
        let client = self.client.clone();
        let mut sub = client.subscribe(subject).await?;
        tokio::spawn(async move {
            while let Some(msg) = sub.next().await {
                let Some(reply_subject) = msg.reply.clone() else { continue };
                let Ok(req) = serde_json::from_slice::<Req>(&msg.payload) else { continue };
                let body = reply(req);
                let _ = client.publish(reply_subject, serde_json::to_vec(&body).unwrap_or_default().into()).await;
            }
        });
        Ok(())
    }
}
