// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The top-level connection state machine: the single `tokio::select!` loop
//! that owns `StateContext` and dispatches one bus message per iteration.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::backoff::BackoffTimer;
use crate::bus::{
    Bus, Channel, CloudInMessage, LocationOutMessage, NetworkMessage, PrivateEvent, SmallMessage,
    StorageControlIn, StorageControlOut, StorageDataMessage,
};
use crate::clock::ClockSource;
use crate::config::GatewayConfig;
use crate::drain::{drain_round, BatchSession, DrainOutcome};
use crate::error::GatewayError;
use crate::provisioning::{spawn_provisioning, ProvisioningClient};
use crate::storage::StorageClient;
use crate::transport::{CloudTransport, ConnectOutcome};
use crate::watchdog::Watchdog;

use super::{AttemptState, ConnectedState, ConnectingState, ConnectionState, Node, StateContext};

/// Events the transition table dispatches on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Event {
    NetworkConnected,
    NetworkDisconnected,
    ConnectAttemptSucceeded,
    ConnectAttemptFailed,
    Unauthenticated,
    ProvisioningFinished,
    ProvisioningFailed,
    BackoffExpired,
    SendRequestFailed,
    ProvisioningRequest,
}

/// A computed transition: just the destination state. Entry/exit side
/// effects are derived separately from the ancestor-chain diff, so this
/// struct (and `transition` below) stay pure data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transition {
    pub next: ConnectionState,
}

/// The pure transition table. No I/O, no wall-clock reads: tests can treat
/// this as data, feeding it every `(state, event, context)` combination the
/// six end-to-end scenarios exercise.
pub fn transition(state: &ConnectionState, event: &Event, ctx: &StateContext) -> Option<Transition> {
    use AttemptState::*;
    use ConnectedState::*;
    use ConnectingState::*;
    use ConnectionState::*;
    use Event::*;

    let next = match (state, event) {
        (Disconnected, NetworkConnected) => Connecting(ConnectingState::Attempt(Provisioned)),

        (Connecting(Attempt(Provisioned)), ConnectAttemptSucceeded) => Connected(Ready),
        (Connecting(Attempt(Provisioned)), Unauthenticated) => {
            Connecting(ConnectingState::Attempt(Provisioning))
        }
        (Connecting(Attempt(Provisioned)), ConnectAttemptFailed) => {
            Connecting(ConnectingState::Backoff)
        }

        (Connecting(Attempt(Provisioning)), ProvisioningFinished) => {
            Connecting(ConnectingState::Attempt(Provisioned))
        }
        (Connecting(Attempt(Provisioning)), ProvisioningFailed) => {
            if ctx.network_up {
                Connecting(ConnectingState::Backoff)
            } else {
                Disconnected
            }
        }

        (Connecting(Backoff), BackoffExpired) => {
            if ctx.provisioning_active {
                Connecting(ConnectingState::Attempt(Provisioning))
            } else {
                Connecting(ConnectingState::Attempt(Provisioned))
            }
        }

        (Connected(Ready), NetworkDisconnected) => Connected(Paused),
        (Connected(Paused), NetworkConnected) => Connected(Ready),
        (Connected(Ready), SendRequestFailed) => Connecting(ConnectingState::Attempt(Provisioned)),
        (Connected(Ready), ProvisioningRequest) => {
            Connecting(ConnectingState::Attempt(Provisioning))
        }

        // Any child of Connecting -> Disconnected on NETWORK Disconnected,
        // except while in Provisioning, where the radio is expected to cycle
        // and network transitions must be absorbed rather than restart the attempt.
        (Connecting(inner), NetworkDisconnected)
            if !matches!(inner, ConnectingState::Attempt(Provisioning)) =>
        {
            Disconnected
        }

        _ => return None,
    };

    Some(Transition { next })
}

fn diff_ancestors(old: &[Node], new: &[Node]) -> (Vec<Node>, Vec<Node>) {
    let common = old.iter().zip(new.iter()).take_while(|(a, b)| a == b).count();
    let exit = old[common..].iter().rev().copied().collect();
    let entry = new[common..].to_vec();
    (exit, entry)
}

/// The connection state machine, generic over its four collaborators so no
/// `dyn` trait object or `async-trait` indirection is ever required.
pub struct StateMachine<T, S, P, C> {
    pub ctx: StateContext,
    config: Arc<GatewayConfig>,
    bus: Bus,
    transport: Arc<T>,
    storage: Arc<S>,
    provisioning: Arc<P>,
    clock: Arc<C>,
    backoff_timer: Option<BackoffTimer>,
    private_tx: mpsc::UnboundedSender<PrivateEvent>,
    private_rx: mpsc::UnboundedReceiver<PrivateEvent>,
    fatal_tx: mpsc::UnboundedSender<GatewayError>,
    fatal_rx: mpsc::UnboundedReceiver<GatewayError>,
    cancel: CancellationToken,
    watchdog: Watchdog,
    network_rx: mpsc::Receiver<NetworkMessage>,
    cloud_in_rx: mpsc::Receiver<CloudInMessage>,
    storage_control_rx: mpsc::Receiver<StorageControlIn>,
    storage_data_rx: mpsc::Receiver<StorageDataMessage>,
}

/// Everything the caller must supply to construct a [`StateMachine`]:
/// collaborators, the outbound bus handle, inbound channel receivers, and
/// configuration. Grouped so construction doesn't take a dozen parameters.
pub struct StateMachineInputs<T, S, P, C> {
    pub config: Arc<GatewayConfig>,
    pub bus: Bus,
    pub transport: Arc<T>,
    pub storage: Arc<S>,
    pub provisioning: Arc<P>,
    pub clock: Arc<C>,
    pub cancel: CancellationToken,
    pub network_rx: mpsc::Receiver<NetworkMessage>,
    pub cloud_in_rx: mpsc::Receiver<CloudInMessage>,
    pub storage_control_rx: mpsc::Receiver<StorageControlIn>,
    pub storage_data_rx: mpsc::Receiver<StorageDataMessage>,
    pub private_rx: mpsc::UnboundedReceiver<PrivateEvent>,
}

impl<T, S, P, C> StateMachine<T, S, P, C>
where
    T: CloudTransport + 'static,
    S: StorageClient + 'static,
    P: ProvisioningClient + 'static,
    C: ClockSource + 'static,
{
    pub fn new(inputs: StateMachineInputs<T, S, P, C>) -> Self {
        let (fatal_tx, fatal_rx) = mpsc::unbounded_channel();
        let watchdog = Watchdog::new(inputs.config.watchdog_timeout());
        let private_tx = inputs.bus.private_tx.clone();
        Self {
            ctx: StateContext::new(),
            config: inputs.config,
            bus: inputs.bus,
            transport: inputs.transport,
            storage: inputs.storage,
            provisioning: inputs.provisioning,
            clock: inputs.clock,
            backoff_timer: None,
            private_tx,
            private_rx: inputs.private_rx,
            fatal_tx,
            fatal_rx,
            cancel: inputs.cancel,
            watchdog,
            network_rx: inputs.network_rx,
            cloud_in_rx: inputs.cloud_in_rx,
            storage_control_rx: inputs.storage_control_rx,
            storage_data_rx: inputs.storage_data_rx,
        }
    }

    /// Run the state machine to completion. Returns `Ok(())` on graceful
    /// shutdown (cancellation), `Err` on any fatal condition — the caller
    /// (`main`) treats `Err` as a process-fatal signal.
    pub async fn run(&mut self) -> Result<(), GatewayError> {
        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => return Ok(()),

                _ = tokio::time::sleep_until(self.watchdog.deadline()) => {
                    return Err(GatewayError::WatchdogExpiry);
                }

                Some(err) = self.fatal_rx.recv() => return Err(err),

                Some(event) = self.private_rx.recv() => {
                    self.ctx.last_channel = Some(Channel::Private);
                    self.ctx.last_message = Some(SmallMessage::from_private(&event));
                    self.handle_private(event).await?;
                    self.watchdog.feed();
                }

                Some(msg) = self.network_rx.recv() => {
                    self.ctx.last_channel = Some(Channel::Network);
                    self.ctx.last_message = Some(SmallMessage::from_network(&msg));
                    self.handle_network(msg).await?;
                    self.watchdog.feed();
                }

                Some(msg) = self.cloud_in_rx.recv() => {
                    self.ctx.last_channel = Some(Channel::Cloud);
                    self.ctx.last_message = Some(SmallMessage::from_cloud_in(&msg));
                    self.handle_cloud_in(msg).await?;
                    self.watchdog.feed();
                }

                Some(msg) = self.storage_control_rx.recv() => {
                    self.ctx.last_channel = Some(Channel::StorageControl);
                    self.ctx.last_message = Some(SmallMessage::from_storage_control_in(&msg));
                    self.handle_storage_control(msg).await?;
                    self.watchdog.feed();
                }

                Some(msg) = self.storage_data_rx.recv() => {
                    self.ctx.last_channel = Some(Channel::StorageData);
                    self.ctx.last_message = Some(SmallMessage::from_storage_data(&msg));
                    self.handle_storage_data(msg).await?;
                    self.watchdog.feed();
                }
            }
        }
    }

    async fn dispatch(&mut self, event: Event) -> Result<(), GatewayError> {
        if let Some(t) = transition(&self.ctx.current_state, &event, &self.ctx) {
            tracing::debug!(
                from = ?self.ctx.current_state,
                to = ?t.next,
                event = ?event,
                "state transition"
            );
            self.apply_transition(t.next).await?;
        } else {
            tracing::trace!(state = ?self.ctx.current_state, event = ?event, "event ignored in current state");
        }
        Ok(())
    }

    async fn apply_transition(&mut self, next: ConnectionState) -> Result<(), GatewayError> {
        let old_ancestors = self.ctx.current_state.ancestors();
        let new_ancestors = next.ancestors();
        let (exit_nodes, entry_nodes) = diff_ancestors(&old_ancestors, &new_ancestors);

        for node in exit_nodes {
            self.exit_node(node).await?;
        }

        self.ctx.current_state = next;

        for node in entry_nodes {
            self.entry_node(node).await?;
        }

        Ok(())
    }

    async fn exit_node(&mut self, node: Node) -> Result<(), GatewayError> {
        match node {
            Node::ConnectingBackoff => {
                self.backoff_timer = None; // Drop cancels.
            }
            Node::Connected => {
                let outcome = self.transport.disconnect().await;
                use crate::transport::DisconnectOutcome::*;
                match outcome {
                    Ok | NotConnected => {}
                    Failed => {
                        tracing::warn!("transport disconnect failed on Connected exit");
                    }
                }
                self.bus
                    .publish_cloud(
                        crate::bus::CloudOutMessage::Disconnected,
                        self.config.bus_publish_timeout(),
                    )
                    .await?;
            }
            _ => {}
        }
        Ok(())
    }

    async fn entry_node(&mut self, node: Node) -> Result<(), GatewayError> {
        match node {
            Node::Disconnected => {}
            Node::Connecting => {
                self.ctx.attempt_count = 0;
                self.ctx.provisioning_active = false;
            }
            Node::ConnectingAttempt => {
                self.ctx.attempt_count += 1;
            }
            Node::ConnectingAttemptProvisioned => {
                self.spawn_connect();
            }
            Node::ConnectingAttemptProvisioning => {
                self.ctx.provisioning_active = true;
                self.bus
                    .publish_location(
                        LocationOutMessage::SearchCancel,
                        self.config.bus_publish_timeout(),
                    )
                    .await?;
                self.spawn_provisioning_dialogue();
            }
            Node::ConnectingBackoff => {
                let schedule = self.config.backoff_schedule();
                let delay = schedule.compute_backoff(self.ctx.attempt_count);
                self.ctx.backoff_seconds = delay.as_secs();
                self.backoff_timer =
                    Some(BackoffTimer::schedule(delay, self.private_tx.clone(), &self.cancel));
            }
            Node::Connected => {
                tracing::info!("cloud connection established");
            }
            Node::ConnectedReady => {
                self.bus
                    .publish_cloud(
                        crate::bus::CloudOutMessage::Connected,
                        self.config.bus_publish_timeout(),
                    )
                    .await?;
            }
            Node::ConnectedPaused => {
                self.bus
                    .publish_cloud(
                        crate::bus::CloudOutMessage::Disconnected,
                        self.config.bus_publish_timeout(),
                    )
                    .await?;
                self.force_close_open_session().await?;
            }
        }
        Ok(())
    }

    fn spawn_connect(&self) {
        let transport = Arc::clone(&self.transport);
        let private_tx = self.private_tx.clone();
        let version = self.config.device_version.clone();
        let cancel = self.cancel.child_token();
        tokio::spawn(async move {
            tokio::select! {
                _ = cancel.cancelled() => {}
                outcome = transport.connect(&version) => {
                    let event = match outcome {
                        ConnectOutcome::Ok => PrivateEvent::ConnectAttemptSucceeded,
                        ConnectOutcome::Unauthenticated => PrivateEvent::Unauthenticated,
                        ConnectOutcome::Failed => PrivateEvent::ConnectAttemptFailed,
                    };
                    let _ = private_tx.send(event);
                }
            }
        });
    }

    fn spawn_provisioning_dialogue(&self) {
        spawn_provisioning(
            Arc::clone(&self.provisioning),
            self.bus.network_out.clone(),
            self.private_tx.clone(),
            self.fatal_tx.clone(),
            self.config.provisioning_settle(),
            self.cancel.child_token(),
        );
    }

    async fn handle_private(&mut self, event: PrivateEvent) -> Result<(), GatewayError> {
        let mapped = match event {
            PrivateEvent::ConnectAttemptSucceeded => Event::ConnectAttemptSucceeded,
            PrivateEvent::ConnectAttemptFailed => Event::ConnectAttemptFailed,
            PrivateEvent::Unauthenticated => Event::Unauthenticated,
            PrivateEvent::ProvisioningFinished => Event::ProvisioningFinished,
            PrivateEvent::ProvisioningFailed => Event::ProvisioningFailed,
            PrivateEvent::BackoffExpired => Event::BackoffExpired,
            PrivateEvent::SendRequestFailed => Event::SendRequestFailed,
        };
        self.dispatch(mapped).await
    }

    async fn handle_network(&mut self, msg: NetworkMessage) -> Result<(), GatewayError> {
        let event = match msg {
            NetworkMessage::Connected => {
                self.ctx.network_up = true;
                Some(Event::NetworkConnected)
            }
            NetworkMessage::Disconnected => {
                self.ctx.network_up = false;
                Some(Event::NetworkDisconnected)
            }
            NetworkMessage::ConnectRequest
            | NetworkMessage::DisconnectRequest
            | NetworkMessage::QualitySampleResponse { .. } => None,
        };
        if let Some(event) = event {
            self.dispatch(event).await?;
        }
        Ok(())
    }

    async fn handle_cloud_in(&mut self, msg: CloudInMessage) -> Result<(), GatewayError> {
        if !self.ctx.current_state.is_ready() {
            tracing::trace!("cloud-in message dropped: not Ready");
            return Ok(());
        }

        match msg {
            CloudInMessage::ProvisioningRequest => {
                self.dispatch(Event::ProvisioningRequest).await
            }
            CloudInMessage::SendJsonPayload(bytes) => {
                let result = self.transport.send_json(&bytes, self.config.confirmable_messages).await;
                if result.is_err() {
                    let _ = self.private_tx.send(PrivateEvent::SendRequestFailed);
                }
                Ok(())
            }
            CloudInMessage::ShadowPollDelta => {
                let outcome = self.transport.shadow_get(true).await;
                self.report_shadow_poll(outcome, true).await
            }
            CloudInMessage::ShadowPollDesired => {
                let outcome = self.transport.shadow_get(false).await;
                self.report_shadow_poll(outcome, false).await
            }
            CloudInMessage::ShadowReportReported(bytes) => {
                let result = self
                    .transport
                    .shadow_patch("reported", &bytes, self.config.confirmable_messages)
                    .await;
                if result.is_err() {
                    let _ = self.private_tx.send(PrivateEvent::SendRequestFailed);
                }
                Ok(())
            }
        }
    }

    async fn report_shadow_poll(
        &mut self,
        outcome: Result<Vec<u8>, ()>,
        delta: bool,
    ) -> Result<(), GatewayError> {
        match outcome {
            Ok(bytes) if bytes.is_empty() && delta => {
                self.bus
                    .publish_cloud(
                        crate::bus::CloudOutMessage::ShadowResponseEmptyDelta,
                        self.config.bus_publish_timeout(),
                    )
                    .await
            }
            Ok(bytes) if bytes.is_empty() => {
                self.bus
                    .publish_cloud(
                        crate::bus::CloudOutMessage::ShadowResponseEmptyDesired,
                        self.config.bus_publish_timeout(),
                    )
                    .await
            }
            Ok(bytes) if delta => {
                self.bus
                    .publish_cloud(
                        crate::bus::CloudOutMessage::ShadowResponseDelta(bytes),
                        self.config.bus_publish_timeout(),
                    )
                    .await
            }
            Ok(bytes) => {
                self.bus
                    .publish_cloud(
                        crate::bus::CloudOutMessage::ShadowResponseDesired(bytes),
                        self.config.bus_publish_timeout(),
                    )
                    .await
            }
            Err(()) => {
                let _ = self.private_tx.send(PrivateEvent::SendRequestFailed);
                Ok(())
            }
        }
    }

    async fn handle_storage_control(&mut self, msg: StorageControlIn) -> Result<(), GatewayError> {
        let ready = self.ctx.current_state.is_ready();
        let paused = matches!(self.ctx.current_state, ConnectionState::Connected(ConnectedState::Paused));

        if !ready && !paused {
            tracing::trace!("storage-control message dropped: not Connected");
            return Ok(());
        }

        match msg {
            StorageControlIn::BatchAvailable { session_id, count, more_data } => {
                if paused {
                    // Radio down: treat as if empty/error, force-close.
                    return self.force_close_session_id(session_id).await;
                }
                self.handle_batch_available(session_id, count, more_data).await
            }
            StorageControlIn::BatchEmpty { session_id } => self.force_close_session_id(session_id).await,
            StorageControlIn::BatchError { session_id } => {
                tracing::warn!(session_id, "storage reported batch error");
                self.force_close_session_id(session_id).await
            }
            StorageControlIn::BatchBusy { session_id } if paused => {
                // Radio down: treat as if empty/error, force-close.
                self.force_close_session_id(session_id).await
            }
            StorageControlIn::BatchBusy { session_id } => {
                tracing::warn!(session_id, "storage busy, no retry timer held");
                Ok(())
            }
        }
    }

    async fn handle_batch_available(
        &mut self,
        session_id: u32,
        _count: u32,
        more_data: bool,
    ) -> Result<(), GatewayError> {
        if self.ctx.open_session.as_ref().map(|s| s.session_id) != Some(session_id) {
            self.ctx.open_session = Some(BatchSession::open(session_id));
        }

        let sample = self.clock.sample().await;
        let clock = Arc::clone(&self.clock);
        let outcome = drain_round(
            session_id,
            self.transport.as_ref(),
            self.storage.as_ref(),
            self.config.storage_read_timeout(),
            self.config.timestamp_policy,
            self.config.future_epoch_threshold_ms,
            sample.uptime_ms,
            sample.wall_clock_valid,
            move |u| clock.uptime_to_unix(u),
            self.config.confirmable_messages,
        )
        .await;

        match outcome {
            DrainOutcome::Done if more_data => {
                self.bus
                    .publish_storage_control(
                        StorageControlOut::BatchRequest { session_id },
                        self.config.bus_publish_timeout(),
                    )
                    .await
            }
            DrainOutcome::Done => self.force_close_session_id(session_id).await,
            DrainOutcome::StorageError => self.force_close_session_id(session_id).await,
            DrainOutcome::ItemFatal => {
                self.force_close_session_id(session_id).await?;
                let _ = self.private_tx.send(PrivateEvent::SendRequestFailed);
                Ok(())
            }
        }
    }

    async fn handle_storage_data(&mut self, msg: StorageDataMessage) -> Result<(), GatewayError> {
        if !self.ctx.current_state.is_ready() {
            return Ok(());
        }
        let StorageDataMessage::RealtimeItem(item) = msg;
        let sample = self.clock.sample().await;
        let clock = Arc::clone(&self.clock);
        let outcome = crate::timestamp::normalize(
            item.timestamp,
            self.config.future_epoch_threshold_ms,
            sample.uptime_ms,
            sample.wall_clock_valid,
            |u| clock.uptime_to_unix(u),
        );
        let clock = Arc::clone(&self.clock);
        let ts = self.config.timestamp_policy.apply(
            item.timestamp,
            outcome,
            |u| {
                crate::timestamp::normalize(
                    u,
                    self.config.future_epoch_threshold_ms,
                    sample.uptime_ms,
                    sample.wall_clock_valid,
                    |u| clock.uptime_to_unix(u),
                )
            },
            sample.uptime_ms,
        );
        let ts = match ts {
            Ok(ts) => ts,
            Err(_) => return Ok(()),
        };
        let confirmable = self.config.confirmable_messages;
        let result = self.transport.send_sensor("REALTIME", 0.0, ts, confirmable).await;
        if result.is_err() {
            let _ = self.private_tx.send(PrivateEvent::SendRequestFailed);
        }
        Ok(())
    }

    async fn force_close_session_id(&mut self, session_id: u32) -> Result<(), GatewayError> {
        if self.ctx.open_session.as_ref().map(|s| s.session_id) == Some(session_id) {
            self.force_close_open_session().await?;
        } else {
            // Not the session we had open (or none open): still announce a
            // close so storage's bookkeeping matches the core's view.
            self.bus
                .publish_storage_control(
                    StorageControlOut::BatchClose { session_id },
                    self.config.bus_publish_timeout(),
                )
                .await?;
        }
        Ok(())
    }

    async fn force_close_open_session(&mut self) -> Result<(), GatewayError> {
        if let Some(session) = self.ctx.open_session.take() {
            session.close(&self.bus, self.config.bus_publish_timeout()).await?;
        }
        Ok(())
    }
}

#[cfg(test)]
#[path = "machine_tests.rs"]
mod tests;
