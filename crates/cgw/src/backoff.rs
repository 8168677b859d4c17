// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Reconnect backoff computation and scheduling.
//!
//! `compute_backoff` is a pure function so the transition table can treat
//! backoff values as data in tests. [`BackoffTimer`] wraps the scheduling
//! side: a detached task that sleeps and then posts `BackoffExpired` onto the
//! private channel, cancellable from the owning thread without holding any
//! lock the state machine also touches.

use std::time::Duration;

use clap::ValueEnum;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::bus::PrivateEvent;

/// Backoff growth mode between reconnect attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
#[clap(rename_all = "lower")]
pub enum BackoffMode {
    None,
    Linear,
    Exponential,
}

/// Backoff configuration record. Invariant: `compute_backoff(n) <= max` for all `n`.
#[derive(Debug, Clone, Copy)]
pub struct BackoffSchedule {
    pub initial: Duration,
    pub max: Duration,
    pub mode: BackoffMode,
    pub linear_increment: Duration,
}

impl BackoffSchedule {
    /// Compute the delay before the `n`th reconnect attempt, `n` being the
    /// 1-based attempt count. Always clamped to `max`.
    pub fn compute_backoff(&self, n: u32) -> Duration {
        let n = n.max(1);
        match self.mode {
            BackoffMode::None => self.initial.min(self.max),
            BackoffMode::Linear => {
                let extra = self.linear_increment.saturating_mul(n - 1);
                self.initial.saturating_add(extra).min(self.max)
            }
            BackoffMode::Exponential => {
                let factor = 1u32.checked_shl(n - 1).unwrap_or(u32::MAX);
                self.initial.saturating_mul(factor).min(self.max)
            }
        }
    }
}

/// A cancellable, one-shot scheduled `BackoffExpired` event.
///
/// Scheduling spawns a detached task holding only a cloned sender and a
/// child cancellation token; it never touches `StateContext`, so the state
/// machine can freely mutate state while the timer is in flight.
pub struct BackoffTimer {
    cancel: CancellationToken,
}

impl BackoffTimer {
    /// Schedule `PrivateEvent::BackoffExpired` to be sent on `private_tx` after `delay`.
    pub fn schedule(
        delay: Duration,
        private_tx: mpsc::UnboundedSender<PrivateEvent>,
        parent: &CancellationToken,
    ) -> Self {
        let cancel = parent.child_token();
        let task_cancel = cancel.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = task_cancel.cancelled() => {}
                _ = tokio::time::sleep(delay) => {
                    let _ = private_tx.send(PrivateEvent::BackoffExpired);
                }
            }
        });
        Self { cancel }
    }

    /// Cancel the pending timer. Idempotent; safe to call more than once or
    /// after the timer has already fired.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }
}

impl Drop for BackoffTimer {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

#[cfg(test)]
#[path = "backoff_tests.rs"]
mod tests;
