// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::fmt;

/// Error kinds the gateway core can raise internally.
///
/// These are not Rust `std::error::Error` wrapper types; they are the taxonomy
/// from the error-handling design, classified by recoverability. Recoverable
/// kinds are absorbed into a state transition by the caller. Fatal kinds are
/// propagated out of [`crate::state::StateMachine::run`] and terminate the
/// process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GatewayError {
    /// Transport send or receive failed once; recover by reconnecting.
    TransientTransport,
    /// Transport connect returned Unauthenticated.
    Auth,
    /// Provisioning protocol failure classified as recoverable.
    ProvisioningRecoverable,
    /// Provisioning protocol failure classified as non-recoverable (wrong CA, fatal).
    ProvisioningFatal,
    /// Storage reported a session-level error.
    StorageSession,
    /// A single drained item failed to normalize or send.
    ItemLevel,
    /// Timestamp normalization failed under the active policy.
    Timestamp,
    /// A bus publish did not complete within its bound.
    BusPublishTimeout,
    /// The owning loop missed a watchdog feed deadline.
    WatchdogExpiry,
    /// The configured processing bound was not tighter than the watchdog window.
    Configuration(String),
}

impl GatewayError {
    /// True if this error must raise a process-fatal signal rather than be
    /// absorbed as a state transition.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::ProvisioningFatal
                | Self::BusPublishTimeout
                | Self::WatchdogExpiry
                | Self::Configuration(_)
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::TransientTransport => "TRANSIENT_TRANSPORT",
            Self::Auth => "AUTH",
            Self::ProvisioningRecoverable => "PROVISIONING_RECOVERABLE",
            Self::ProvisioningFatal => "PROVISIONING_FATAL",
            Self::StorageSession => "STORAGE_SESSION",
            Self::ItemLevel => "ITEM_LEVEL",
            Self::Timestamp => "TIMESTAMP",
            Self::BusPublishTimeout => "BUS_PUBLISH_TIMEOUT",
            Self::WatchdogExpiry => "WATCHDOG_EXPIRY",
            Self::Configuration(_) => "CONFIGURATION",
        }
    }
}

impl fmt::Display for GatewayError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Configuration(msg) => write!(f, "{}: {msg}", self.as_str()),
            other => f.write_str(other.as_str()),
        }
    }
}

impl std::error::Error for GatewayError {}

#[cfg(test)]
#[path = "error_tests.rs"]
mod tests;
