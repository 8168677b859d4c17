// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::time::Duration;

use clap::Parser;

use crate::backoff::BackoffMode;
use crate::timestamp::TimestampPolicy;

/// Cloud Gateway Core daemon configuration.
#[derive(Debug, Parser)]
#[command(name = "cgwd", version, about)]
pub struct GatewayConfig {
    /// Backoff growth mode between reconnect attempts.
    #[arg(long, env = "CGW_BACKOFF_MODE", value_enum, default_value_t = BackoffMode::Exponential)]
    pub backoff_mode: BackoffMode,

    /// First-attempt backoff delay, in seconds.
    #[arg(long, env = "CGW_BACKOFF_INITIAL_S", default_value = "10")]
    pub backoff_initial_s: u64,

    /// Per-attempt increment used in linear backoff mode, in seconds.
    #[arg(long, env = "CGW_BACKOFF_LINEAR_INCREMENT_S", default_value = "10")]
    pub backoff_linear_increment_s: u64,

    /// Upper clamp on computed backoff delay, in seconds.
    #[arg(long, env = "CGW_BACKOFF_MAX_S", default_value = "300")]
    pub backoff_max_s: u64,

    /// Whether outbound transport messages require application-level acknowledgement.
    #[arg(long, env = "CGW_CONFIRMABLE_MESSAGES", default_value = "true")]
    pub confirmable_messages: bool,

    /// Task-watchdog window, in seconds. A missed feed within this window is fatal.
    #[arg(long, env = "CGW_WATCHDOG_TIMEOUT_S", default_value = "120")]
    pub watchdog_timeout_s: u64,

    /// Per-iteration processing bound, in seconds. Must be strictly less than
    /// `watchdog_timeout_s`, or a slow iteration could starve the watchdog feed.
    #[arg(long, env = "CGW_MSG_PROCESSING_TIMEOUT_S", default_value = "20")]
    pub msg_processing_timeout_s: u64,

    /// Timestamp rewrite policy applied to items that fail normalization.
    #[arg(long, env = "CGW_TIMESTAMP_POLICY", value_enum, default_value_t = TimestampPolicy::NoTimestamp)]
    pub timestamp_policy: TimestampPolicy,

    /// Cutoff, in epoch milliseconds, distinguishing an already-wall-clock
    /// timestamp from a device-local uptime value.
    #[arg(long, env = "CGW_FUTURE_EPOCH_THRESHOLD_MS", default_value = "1735689600000")]
    pub future_epoch_threshold_ms: i64,

    /// Settle delay after a successful provisioning dialogue, before the core
    /// is told provisioning finished. See `ProvisioningCoordinator`.
    #[arg(long, env = "CGW_PROVISIONING_SETTLE_MS", default_value = "10000")]
    pub provisioning_settle_ms: u64,

    /// Bounded timeout for a single storage read within a drain session.
    #[arg(long, env = "CGW_STORAGE_READ_TIMEOUT_MS", default_value = "2000")]
    pub storage_read_timeout_ms: u64,

    /// Bounded timeout for a single bus publish. Publish failure past this
    /// bound is treated as fatal (ring buffer wedged).
    #[arg(long, env = "CGW_BUS_PUBLISH_TIMEOUT_MS", default_value = "500")]
    pub bus_publish_timeout_ms: u64,

    /// Log format (json or text).
    #[arg(long, env = "CGW_LOG_FORMAT", default_value = "json")]
    pub log_format: String,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, env = "CGW_LOG_LEVEL", default_value = "info")]
    pub log_level: String,

    /// Version string this device advertises during transport connect.
    #[arg(long, env = "CGW_DEVICE_VERSION", default_value = "unknown")]
    pub device_version: String,

    /// NATS URL backing the on-device message bus in production.
    #[arg(long, env = "CGW_NATS_URL", default_value = "nats://127.0.0.1:4222")]
    pub nats_url: String,

    /// Subject prefix under which bus channels are namespaced, e.g.
    /// `<prefix>.network`, `<prefix>.cloud.in`.
    #[arg(long, env = "CGW_NATS_SUBJECT_PREFIX", default_value = "cgw")]
    pub nats_subject_prefix: String,
}

impl GatewayConfig {
    /// Validate the configuration after parsing.
    ///
    /// The per-iteration processing bound must be strictly tighter than the
    /// watchdog window, or a slow iteration would always starve the feed.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.msg_processing_timeout_s >= self.watchdog_timeout_s {
            anyhow::bail!(
                "msg_processing_timeout_s ({}) must be less than watchdog_timeout_s ({})",
                self.msg_processing_timeout_s,
                self.watchdog_timeout_s
            );
        }
        if self.backoff_initial_s == 0 {
            anyhow::bail!("backoff_initial_s must be nonzero");
        }
        if self.backoff_initial_s > self.backoff_max_s {
            anyhow::bail!("backoff_initial_s must not exceed backoff_max_s");
        }
        match self.log_format.as_str() {
            "json" | "text" => {}
            other => anyhow::bail!("invalid log format: {other}"),
        }
        Ok(())
    }

    pub fn watchdog_timeout(&self) -> Duration {
        Duration::from_secs(self.watchdog_timeout_s)
    }

    pub fn msg_processing_timeout(&self) -> Duration {
        Duration::from_secs(self.msg_processing_timeout_s)
    }

    pub fn provisioning_settle(&self) -> Duration {
        Duration::from_millis(self.provisioning_settle_ms)
    }

    pub fn storage_read_timeout(&self) -> Duration {
        Duration::from_millis(self.storage_read_timeout_ms)
    }

    pub fn bus_publish_timeout(&self) -> Duration {
        Duration::from_millis(self.bus_publish_timeout_ms)
    }

    pub fn backoff_schedule(&self) -> crate::backoff::BackoffSchedule {
        crate::backoff::BackoffSchedule {
            initial: Duration::from_secs(self.backoff_initial_s),
            max: Duration::from_secs(self.backoff_max_s),
            mode: self.backoff_mode,
            linear_increment: Duration::from_secs(self.backoff_linear_increment_s),
        }
    }
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;
