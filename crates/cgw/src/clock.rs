// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The device clock collaborator: monotonic uptime plus wall-clock validity.
//!
//! Defined as a plain `async fn`-bearing trait for the same reason as
//! `CloudTransport`/`StorageClient`: the state machine is generic over its
//! collaborators, so no `dyn` or `async-trait` indirection is needed.

use std::future::Future;
use std::time::Instant;

/// A point-in-time read of the device's two clock domains.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClockSample {
    pub uptime_ms: i64,
    pub wall_clock_valid: bool,
}

pub trait ClockSource: Send + Sync {
    /// Read the current uptime and wall-clock validity together, so callers
    /// never compare an uptime from one instant against validity from another.
    fn sample(&self) -> impl Future<Output = ClockSample> + Send;

    /// Convert a monotonic uptime value to wall-clock unix millis. Only
    /// meaningful once a `sample()` has reported `wall_clock_valid`.
    fn uptime_to_unix(&self, uptime_ms: i64) -> i64;
}

/// Production clock: process-start `Instant` for uptime, `SystemTime` for
/// the uptime-to-wall-clock offset.
pub struct SystemClock {
    started_at: Instant,
}

impl SystemClock {
    pub fn new() -> Self {
        Self { started_at: Instant::now() }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl ClockSource for SystemClock {
    async fn sample(&self) -> ClockSample {
        ClockSample {
            uptime_ms: self.started_at.elapsed().as_millis() as i64,
            wall_clock_valid: true,
        }
    }

    fn uptime_to_unix(&self, uptime_ms: i64) -> i64 {
        let now_uptime = self.started_at.elapsed().as_millis() as i64;
        epoch_ms() - (now_uptime - uptime_ms)
    }
}

/// Current wall-clock epoch millis.
fn epoch_ms() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as i64
}

#[cfg(any(test, feature = "test-support"))]
pub mod fake {
    use super::*;
    use std::sync::Mutex;

    /// In-memory fake clock: scripted uptime/validity, identity conversion.
    pub struct FakeClock {
        sample: Mutex<ClockSample>,
    }

    impl FakeClock {
        pub fn new(uptime_ms: i64, wall_clock_valid: bool) -> Self {
            Self { sample: Mutex::new(ClockSample { uptime_ms, wall_clock_valid }) }
        }

        pub fn set(&self, uptime_ms: i64, wall_clock_valid: bool) {
            *self.sample.lock().unwrap() = ClockSample { uptime_ms, wall_clock_valid };
        }
    }

    impl Default for FakeClock {
        fn default() -> Self {
            Self::new(0, false)
        }
    }

    impl ClockSource for FakeClock {
        async fn sample(&self) -> ClockSample {
            *self.sample.lock().unwrap()
        }

        fn uptime_to_unix(&self, uptime_ms: i64) -> i64 {
            uptime_ms
        }
    }
}

#[cfg(test)]
#[path = "clock_tests.rs"]
mod tests;
