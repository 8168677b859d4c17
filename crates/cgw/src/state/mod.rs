// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The connection state hierarchy and the context it mutates.
//!
//! The hierarchy is encoded as nested tagged enums rather than a flat state
//! plus a separate "parent" lookup table, so the compiler enforces which
//! sub-states are even representable under which parent.

mod machine;

pub use machine::{Event, StateMachine, StateMachineInputs};

use crate::bus::{Channel, SmallMessage};

/// The top-level connection state hierarchy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting(ConnectingState),
    Connected(ConnectedState),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectingState {
    Attempt(AttemptState),
    Backoff,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttemptState {
    Provisioned,
    Provisioning,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectedState {
    Ready,
    Paused,
}

/// A flattened node identifier used only for ancestor-chain entry/exit
/// sequencing; never stored as the canonical state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Node {
    Disconnected,
    Connecting,
    ConnectingAttempt,
    ConnectingAttemptProvisioned,
    ConnectingAttemptProvisioning,
    ConnectingBackoff,
    Connected,
    ConnectedReady,
    ConnectedPaused,
}

impl ConnectionState {
    /// This state's ancestor chain, root first, this state's own node last.
    pub fn ancestors(&self) -> Vec<Node> {
        match self {
            Self::Disconnected => vec![Node::Disconnected],
            Self::Connecting(ConnectingState::Attempt(AttemptState::Provisioned)) => {
                vec![Node::Connecting, Node::ConnectingAttempt, Node::ConnectingAttemptProvisioned]
            }
            Self::Connecting(ConnectingState::Attempt(AttemptState::Provisioning)) => {
                vec![Node::Connecting, Node::ConnectingAttempt, Node::ConnectingAttemptProvisioning]
            }
            Self::Connecting(ConnectingState::Backoff) => {
                vec![Node::Connecting, Node::ConnectingBackoff]
            }
            Self::Connected(ConnectedState::Ready) => vec![Node::Connected, Node::ConnectedReady],
            Self::Connected(ConnectedState::Paused) => vec![Node::Connected, Node::ConnectedPaused],
        }
    }

    pub fn is_ready(&self) -> bool {
        matches!(self, Self::Connected(ConnectedState::Ready))
    }

    pub fn is_connected(&self) -> bool {
        matches!(self, Self::Connected(_))
    }

    pub fn is_provisioning(&self) -> bool {
        matches!(self, Self::Connecting(ConnectingState::Attempt(AttemptState::Provisioning)))
    }
}

/// Process-wide state owned exclusively by the state machine's owning
/// thread. Never shared; passed by mutable reference into handlers.
///
/// `open_session` holds the live [`crate::drain::BatchSession`] guard, not
/// just its id: if the whole context is ever dropped with a session open
/// (e.g. the owning loop exits unexpectedly) the guard's `Drop` impl still
/// fires as a last-resort diagnostic.
#[derive(Debug)]
pub struct StateContext {
    pub current_state: ConnectionState,
    pub last_channel: Option<Channel>,
    pub last_message: Option<SmallMessage>,
    pub network_up: bool,
    pub provisioning_active: bool,
    pub attempt_count: u32,
    pub backoff_seconds: u64,
    pub open_session: Option<crate::drain::BatchSession>,
}

impl StateContext {
    pub fn new() -> Self {
        Self {
            current_state: ConnectionState::Disconnected,
            last_channel: None,
            last_message: None,
            network_up: false,
            provisioning_active: false,
            attempt_count: 0,
            backoff_seconds: 0,
            open_session: None,
        }
    }
}

impl Default for StateContext {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
#[path = "mod_tests.rs"]
mod tests;
