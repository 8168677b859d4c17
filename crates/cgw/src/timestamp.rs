// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Timestamp normalization: device-local uptime to wall-clock, under a
//! configurable policy for what to do when normalization fails.

use clap::ValueEnum;

/// Failure kinds `normalize` can return.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Kind {
    /// `t` is in the future relative to current uptime; impossible.
    Invalid,
    /// Wall-clock is not yet valid on this device.
    NoClock,
}

/// Sentinel value published in place of a timestamp the `NoTimestamp` policy
/// could not recover.
pub const NO_TIMESTAMP_SENTINEL: i64 = -1;

/// Convert a device-local timestamp to wall-clock milliseconds.
///
/// `t` is the candidate timestamp; `future_epoch_threshold_ms` is the fixed
/// cutoff past which a value is already wall-clock; `current_uptime_ms` and
/// `wall_clock_valid`/`uptime_to_unix` model the device clock state.
pub fn normalize(
    t: i64,
    future_epoch_threshold_ms: i64,
    current_uptime_ms: i64,
    wall_clock_valid: bool,
    uptime_to_unix: impl Fn(i64) -> i64,
) -> Result<i64, Kind> {
    if t >= future_epoch_threshold_ms {
        return Ok(t);
    }
    if t > current_uptime_ms {
        return Err(Kind::Invalid);
    }
    if !wall_clock_valid {
        return Err(Kind::NoClock);
    }
    Ok(uptime_to_unix(t))
}

/// Policy applied on top of [`normalize`] when the raw conversion fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
#[clap(rename_all = "PascalCase")]
pub enum TimestampPolicy {
    /// Keep the original value and return it unchanged.
    Keep,
    /// Retry against current uptime; fail if still bad.
    Now,
    /// Replace with the sentinel "no timestamp" value.
    NoTimestamp,
    /// Return the error; caller drops the item.
    Drop,
}

impl TimestampPolicy {
    /// Apply this policy on top of a raw `normalize` outcome.
    ///
    /// `retry` is invoked only by the `Now` policy, to normalize against the
    /// current uptime instead of the item's original timestamp.
    pub fn apply(
        &self,
        original: i64,
        outcome: Result<i64, Kind>,
        retry: impl FnOnce(i64) -> Result<i64, Kind>,
        current_uptime_ms: i64,
    ) -> Result<i64, Kind> {
        match (self, outcome) {
            (_, Ok(t)) => Ok(t),
            (Self::Keep, Err(_)) => Ok(original),
            (Self::Now, Err(_)) => retry(current_uptime_ms),
            (Self::NoTimestamp, Err(_)) => Ok(NO_TIMESTAMP_SENTINEL),
            (Self::Drop, Err(kind)) => Err(kind),
        }
    }
}

#[cfg(test)]
#[path = "timestamp_tests.rs"]
mod tests;
