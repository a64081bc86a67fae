//! Connection supervision.
//!
//! The [`ConnectionManager`] owns the lifecycle of the single radio link:
//!
//! ```text
//! Disconnected -> Connecting -> Connected
//!                     ^   |         |  health check fails / link drops
//!                     |   v         v
//!                   Reconnecting <--+
//! ```
//!
//! Failed connects and lost links both land in `Reconnecting`, which waits out
//! a jittered exponential backoff before the next attempt. When a backoff
//! cycle is used up the attempt counter restarts, so the manager keeps trying
//! for as long as it runs. Cancelling the shutdown token moves to
//! `Disconnected` from any state and releases the link.
//!
//! The active [`Transport`] lives in a [`Link`] slot shared with the relay.
//! Only the manager installs or removes it; every exit path from `Connected`
//! removes and closes it before the state changes.

use bytes::Bytes;
use std::sync::Arc;
use std::time::Duration;
use strum::Display;
use tokio::sync::{watch, Mutex};
use tokio::time::{self, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::backoff::{Backoff, BackoffPolicy};
use crate::breaker::{BreakerState, CircuitBreaker};
use crate::config::ReconnectConfig;
use crate::error::{ConnectError, RelayError};
use crate::interface::InterfaceStatus;
use crate::tracing::prelude::*;
use crate::transport::{Connector, InboundHandler, Transport};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
    /// Terminal failure. Not entered: reconnects continue indefinitely.
    Failed,
}

/// The active transport slot plus the connection state, shared by the
/// manager (sole writer) and the relay.
pub struct Link {
    state: watch::Sender<ConnectionState>,
    transport: Mutex<Option<Transport>>,
    // Closed token of the installed transport, readable without the slot lock.
    active: parking_lot::Mutex<Option<CancellationToken>>,
    breaker: Option<CircuitBreaker>,
    send_timeout: Duration,
}

impl Link {
    pub fn new(breaker: Option<CircuitBreaker>, send_timeout: Duration) -> Self {
        let (state, _) = watch::channel(ConnectionState::Disconnected);
        Self {
            state,
            transport: Mutex::new(None),
            active: parking_lot::Mutex::new(None),
            breaker,
            send_timeout,
        }
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<ConnectionState> {
        self.state.subscribe()
    }

    pub fn breaker(&self) -> Option<&CircuitBreaker> {
        self.breaker.as_ref()
    }

    fn set_state(&self, next: ConnectionState) {
        let prev = self.state.send_replace(next);
        if prev != next {
            info!(from = %prev, to = %next, "Connection state changed.");
        }
    }

    /// Write one broadcast to the active transport, bounded by the send
    /// timeout.
    ///
    /// Gives up as soon as the transport starts closing.
    pub(crate) async fn transmit(&self, payload: Bytes) -> Result<(), RelayError> {
        let closed = self.active.lock().clone().ok_or(RelayError::NotConnected)?;
        let attempt = async {
            let mut slot = time::timeout(self.send_timeout, self.transport.lock())
                .await
                .map_err(|_| RelayError::TransportError("transport busy".into()))?;
            let transport = slot.as_mut().ok_or(RelayError::NotConnected)?;

            match time::timeout(self.send_timeout, transport.send_broadcast(payload)).await {
                Ok(Ok(())) => Ok(()),
                Ok(Err(e)) => Err(RelayError::TransportError(e.to_string())),
                Err(_) => Err(RelayError::TransportError(format!(
                    "send timed out after {:?}",
                    self.send_timeout
                ))),
            }
        };
        tokio::select! {
            _ = closed.cancelled() => Err(RelayError::TransportError("link closed".into())),
            result = attempt => result,
        }
    }

    async fn install(&self, transport: Transport) {
        *self.active.lock() = Some(transport.closed_token());
        *self.transport.lock().await = Some(transport);
    }

    /// Remove and close the transport, if one is installed.
    ///
    /// Cancelling the closed token first makes pending sends and probes drop
    /// the slot lock.
    async fn release(&self) {
        if let Some(closed) = self.active.lock().take() {
            closed.cancel();
        }
        let taken = self.transport.lock().await.take();
        if let Some(transport) = taken {
            transport.close().await;
        }
    }

    async fn probe(&self) -> Result<(), String> {
        // State only: taking the half-open slot is left to real sends.
        if self
            .breaker
            .as_ref()
            .is_some_and(|b| b.state() == BreakerState::Open)
        {
            return Err("circuit breaker open".into());
        }
        let mut slot = time::timeout(self.send_timeout, self.transport.lock())
            .await
            .map_err(|_| "transport busy".to_string())?;
        match slot.as_mut() {
            Some(transport) => transport.probe(self.send_timeout).await,
            None => Err("no transport".into()),
        }
    }
}

enum Supervision {
    Shutdown,
    Lost(String),
}

pub struct ConnectionManager {
    connector: Arc<dyn Connector>,
    link: Arc<Link>,
    status: Arc<InterfaceStatus>,
    on_frame: InboundHandler,
    policy: BackoffPolicy,
    health_interval: Duration,
    connect_timeout: Duration,
}

impl ConnectionManager {
    pub fn new(
        connector: Arc<dyn Connector>,
        link: Arc<Link>,
        status: Arc<InterfaceStatus>,
        on_frame: InboundHandler,
        reconnect: &ReconnectConfig,
    ) -> Self {
        Self {
            connector,
            link,
            status,
            on_frame,
            policy: reconnect.backoff_policy(),
            health_interval: reconnect.health_interval(),
            connect_timeout: reconnect.connect_timeout(),
        }
    }

    /// Connect and keep the link up until `shutdown` is cancelled.
    pub async fn run(self, shutdown: CancellationToken) {
        let label = self.connector.label();
        let mut backoff = Backoff::new(self.policy.clone());
        let mut connected_before = false;
        info!(transport = %label, "Connection manager started.");

        loop {
            self.link.set_state(ConnectionState::Connecting);
            let attempt = tokio::select! {
                _ = shutdown.cancelled() => break,
                attempt = self.connect_once() => attempt,
            };

            match attempt {
                Ok(transport) => {
                    let closed = transport.closed_token();
                    if let Some(breaker) = self.link.breaker() {
                        breaker.reset();
                    }
                    self.link.install(transport).await;
                    backoff.reset();
                    if connected_before {
                        self.status.record_reconnect();
                    }
                    connected_before = true;
                    self.status.set_online(true);
                    self.link.set_state(ConnectionState::Connected);

                    let outcome = self.supervise(&closed, &shutdown).await;

                    self.status.set_online(false);
                    self.link.release().await;
                    match outcome {
                        Supervision::Shutdown => break,
                        Supervision::Lost(reason) => {
                            warn!(transport = %label, reason = %reason, "Link lost.");
                        }
                    }
                }
                Err(e) => {
                    warn!(
                        transport = %label,
                        error = %e,
                        attempt = backoff.attempts() + 1,
                        "Connect attempt failed."
                    );
                }
            }

            self.link.set_state(ConnectionState::Reconnecting);
            let delay = backoff.next_delay();
            info!(
                transport = %label,
                attempt = backoff.attempts(),
                delay_ms = delay.as_millis() as u64,
                "Waiting before reconnect."
            );
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = time::sleep(delay) => {}
            }
        }

        self.status.set_online(false);
        self.link.release().await;
        self.link.set_state(ConnectionState::Disconnected);
        info!(transport = %label, "Connection manager stopped.");
    }

    async fn connect_once(&self) -> Result<Transport, ConnectError> {
        let raw = self.connector.connect().await?;
        Transport::start(
            raw,
            self.connector.label(),
            self.on_frame.clone(),
            self.connect_timeout,
        )
        .await
    }

    async fn supervise(
        &self,
        closed: &CancellationToken,
        shutdown: &CancellationToken,
    ) -> Supervision {
        let mut ticker = time::interval_at(
            Instant::now() + self.health_interval,
            self.health_interval,
        );
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => return Supervision::Shutdown,
                _ = closed.cancelled() => return Supervision::Lost("transport closed".into()),
                _ = ticker.tick() => {}
            }

            let probe = tokio::select! {
                _ = shutdown.cancelled() => return Supervision::Shutdown,
                probe = self.link.probe() => probe,
            };
            match probe {
                Ok(()) => trace!("Health check passed."),
                Err(reason) => {
                    warn!(reason = %reason, "Health check failed.");
                    return Supervision::Lost(reason);
                }
            }
        }
    }
}
