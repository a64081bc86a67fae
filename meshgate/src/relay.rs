//! Moves payloads between the radio link and the host framework.
//!
//! Inbound payloads arrive on the transport's reader task. They are counted
//! and pushed onto a bounded queue without blocking; a separate pump task
//! drains the queue into the host's [`Ingress`]. A full queue drops the frame
//! and counts it, so a slow host can never stall the radio link.
//!
//! Outbound payloads are sent once. Failures are reported to the caller and
//! are never retried here; retransmission belongs to the host's own layer.

use std::sync::Arc;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::error::RelayError;
use crate::frame::Frame;
use crate::interface::{Ingress, InterfaceStatus};
use crate::manager::{ConnectionState, Link};
use crate::proto::{MAX_BROADCAST_PAYLOAD, MAX_MESH_PAYLOAD};
use crate::tracing::prelude::*;
use crate::transport::InboundHandler;

pub struct FrameRelay {
    link: Arc<Link>,
    status: Arc<InterfaceStatus>,
    ingress: mpsc::Sender<Frame>,
}

impl FrameRelay {
    /// Create a relay and the receiving end of its ingress queue.
    pub fn new(
        link: Arc<Link>,
        status: Arc<InterfaceStatus>,
        queue_depth: usize,
    ) -> (Arc<Self>, mpsc::Receiver<Frame>) {
        let (tx, rx) = mpsc::channel(queue_depth.max(1));
        let relay = Arc::new(Self {
            link,
            status,
            ingress: tx,
        });
        (relay, rx)
    }

    /// Callback to register with each new transport.
    pub fn inbound_handler(self: &Arc<Self>) -> InboundHandler {
        let relay = Arc::clone(self);
        Arc::new(move |frame| relay.on_inbound_raw(frame))
    }

    /// Account for one inbound payload and queue it for the host.
    pub fn on_inbound_raw(&self, frame: Frame) {
        let (len, at) = (frame.len(), frame.at);
        match self.ingress.try_send(frame) {
            Ok(()) => self.status.record_inbound(len, at),
            Err(TrySendError::Full(_)) => {
                self.status.record_inbound_dropped();
                warn!(len, "Ingress queue full, dropping inbound frame.");
            }
            Err(TrySendError::Closed(_)) => {
                debug!(len, "Ingress pump stopped, dropping inbound frame.");
            }
        }
    }

    /// Hand one payload to the radio for broadcast.
    pub async fn send_outbound(&self, frame: Frame) -> Result<(), RelayError> {
        let len = frame.len();
        if self.link.state() != ConnectionState::Connected {
            debug!(len, state = %self.link.state(), "Dropping outbound frame, not connected.");
            return Err(RelayError::NotConnected);
        }
        if len > MAX_BROADCAST_PAYLOAD {
            self.status.record_tx_error();
            return Err(RelayError::PayloadTooLarge {
                len,
                max: MAX_BROADCAST_PAYLOAD,
            });
        }
        if len > MAX_MESH_PAYLOAD {
            warn!(
                len,
                limit = MAX_MESH_PAYLOAD,
                "Payload exceeds mesh packet size, radio may drop it."
            );
        }

        let breaker = self.link.breaker();
        if breaker.is_some_and(|b| !b.allow_request()) {
            self.status.record_tx_error();
            return Err(RelayError::CircuitOpen);
        }

        match self.link.transmit(frame.payload).await {
            Ok(()) => {
                if let Some(b) = breaker {
                    b.record_success();
                }
                self.status.record_outbound(len, Instant::now());
                trace!(len, "Outbound frame sent.");
                Ok(())
            }
            Err(e) => {
                if let (Some(b), RelayError::TransportError(_)) = (breaker, &e) {
                    b.record_failure();
                }
                self.status.record_tx_error();
                warn!(len, error = %e, "Outbound frame not sent.");
                Err(e)
            }
        }
    }
}

/// Deliver queued inbound frames to the host until shutdown.
///
/// Frames already accepted when shutdown arrives are still delivered; later
/// ones are refused at the queue.
pub async fn pump_ingress(
    mut queue: mpsc::Receiver<Frame>,
    ingress: Arc<dyn Ingress>,
    shutdown: CancellationToken,
) {
    loop {
        let frame = tokio::select! {
            _ = shutdown.cancelled() => break,
            frame = queue.recv() => match frame {
                Some(frame) => frame,
                None => break,
            },
        };
        ingress.inbound(&frame.payload);
    }

    queue.close();
    let mut drained = 0usize;
    while let Ok(frame) = queue.try_recv() {
        ingress.inbound(&frame.payload);
        drained += 1;
    }
    trace!(drained, "Ingress pump stopped.");
}
