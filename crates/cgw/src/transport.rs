// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The cloud transport collaborator.
//!
//! Defined as a plain `async fn`-bearing trait rather than with `#[async_trait]`:
//! the state machine is generic over its collaborators (`StateMachine<T, S, P, C>`)
//! so no `dyn` trait object is ever needed, and native async-fn-in-trait is
//! sufficient without the allocation or dispatch overhead of the macro.

use std::future::Future;

/// Outcome of a connect attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectOutcome {
    Ok,
    Unauthenticated,
    Failed,
}

/// Outcome of a disconnect request. `NotConnected` is treated as success.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisconnectOutcome {
    Ok,
    NotConnected,
    Failed,
}

/// Outcome of any send-class operation. The state machine interprets any
/// `Err` as `SendRequestFailed`, regardless of which operation produced it.
pub type SendOutcome = Result<(), ()>;

/// Blocking (but `.await`-able, per the concurrency model) operations against
/// the remote CoAP/DTLS telemetry service.
pub trait CloudTransport: Send + Sync {
    /// Initiate a connect. Spec models this as an asynchronous source: the
    /// caller spawns this and awaits the result off the owning thread,
    /// reporting back through the private channel rather than blocking the
    /// main loop directly.
    fn connect(&self, version: &str) -> impl Future<Output = ConnectOutcome> + Send;

    /// Disconnect the current session. May block the owning thread inline;
    /// bounded by `max_processing_time`.
    fn disconnect(&self) -> impl Future<Output = DisconnectOutcome> + Send;

    fn send_sensor(
        &self,
        app_id: &str,
        value: f64,
        timestamp: i64,
        confirmable: bool,
    ) -> impl Future<Output = SendOutcome> + Send;

    fn send_json(&self, bytes: &[u8], confirmable: bool) -> impl Future<Output = SendOutcome> + Send;

    fn shadow_get(
        &self,
        delta_only: bool,
    ) -> impl Future<Output = Result<Vec<u8>, ()>> + Send;

    fn shadow_patch(
        &self,
        path: &str,
        bytes: &[u8],
        confirmable: bool,
    ) -> impl Future<Output = SendOutcome> + Send;
}

#[cfg(any(test, feature = "test-support"))]
pub mod fake {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
    use std::sync::Mutex;

    /// In-memory fake transport for tests. Scripts connect outcomes and
    /// records every send for assertions.
    #[derive(Default)]
    pub struct FakeTransport {
        pub connect_outcomes: Mutex<Vec<ConnectOutcome>>,
        pub connect_calls: AtomicU32,
        pub disconnect_calls: AtomicU32,
        pub sent: Mutex<Vec<Vec<u8>>>,
        pub fail_sends: AtomicBool,
    }

    impl FakeTransport {
        pub fn with_connect_outcomes(outcomes: Vec<ConnectOutcome>) -> Self {
            Self { connect_outcomes: Mutex::new(outcomes), ..Default::default() }
        }

        pub fn set_fail_sends(&self, fail: bool) {
            self.fail_sends.store(fail, Ordering::SeqCst);
        }

        pub fn connect_call_count(&self) -> u32 {
            self.connect_calls.load(Ordering::SeqCst)
        }
    }

    impl CloudTransport for FakeTransport {
        async fn connect(&self, _version: &str) -> ConnectOutcome {
            self.connect_calls.fetch_add(1, Ordering::SeqCst);
            let mut outcomes = self.connect_outcomes.lock().unwrap();
            if outcomes.is_empty() {
                ConnectOutcome::Ok
            } else {
                outcomes.remove(0)
            }
        }

        async fn disconnect(&self) -> DisconnectOutcome {
            self.disconnect_calls.fetch_add(1, Ordering::SeqCst);
            DisconnectOutcome::Ok
        }

        async fn send_sensor(
            &self,
            _app_id: &str,
            _value: f64,
            _timestamp: i64,
            _confirmable: bool,
        ) -> SendOutcome {
            if self.fail_sends.load(Ordering::SeqCst) {
                return Err(());
            }
            self.sent.lock().unwrap().push(Vec::new());
            Ok(())
        }

        async fn send_json(&self, bytes: &[u8], _confirmable: bool) -> SendOutcome {
            if self.fail_sends.load(Ordering::SeqCst) {
                return Err(());
            }
            self.sent.lock().unwrap().push(bytes.to_vec());
            Ok(())
        }

        async fn shadow_get(&self, _delta_only: bool) -> Result<Vec<u8>, ()> {
            if self.fail_sends.load(Ordering::SeqCst) {
                return Err(());
            }
            Ok(Vec::new())
        }

        async fn shadow_patch(&self, _path: &str, bytes: &[u8], _confirmable: bool) -> SendOutcome {
            if self.fail_sends.load(Ordering::SeqCst) {
                return Err(());
            }
            self.sent.lock().unwrap().push(bytes.to_vec());
            Ok(())
        }
    }
}
