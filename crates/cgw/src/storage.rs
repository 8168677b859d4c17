// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The storage collaborator used by the batch drain engine.

use std::future::Future;
use std::time::Duration;

use crate::bus::DataItem;

/// Outcome of a single bounded storage read within a drain session.
#[derive(Debug, Clone, PartialEq)]
pub enum ReadOutcome {
    /// One item was returned; `more_data` mirrors what storage last reported.
    Item(DataItem),
    /// The read timed out: drain is considered complete, not an error.
    TimedOut,
    /// A hard storage error; the session should be aborted.
    Error,
}

/// Blocking read access into the persisted store, scoped to one session.
pub trait StorageClient: Send + Sync {
    fn read(
        &self,
        session_id: u32,
        timeout: Duration,
    ) -> impl Future<Output = ReadOutcome> + Send;
}

#[cfg(any(test, feature = "test-support"))]
pub mod fake {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    /// In-memory fake storage. Queue up items (and an optional error) per
    /// session, then drive the drain engine against it.
    #[derive(Default)]
    pub struct FakeStorage {
        items: Mutex<VecDeque<DataItem>>,
        error_after_drain: Mutex<bool>,
    }

    impl FakeStorage {
        pub fn with_items(items: Vec<DataItem>) -> Self {
            Self { items: Mutex::new(items.into()), error_after_drain: Mutex::new(false) }
        }

        pub fn set_error_after_drain(&self, error: bool) {
            *self.error_after_drain.lock().unwrap() = error;
        }
    }

    impl StorageClient for FakeStorage {
        async fn read(&self, _session_id: u32, _timeout: Duration) -> ReadOutcome {
            let mut items = self.items.lock().unwrap();
            if let Some(item) = items.pop_front() {
                return ReadOutcome::Item(item);
            }
            if *self.error_after_drain.lock().unwrap() {
                return ReadOutcome::Error;
            }
            ReadOutcome::TimedOut
        }
    }
}

#[cfg(test)]
#[path = "storage_tests.rs"]
mod tests;
