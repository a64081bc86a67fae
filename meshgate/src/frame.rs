//! Frames in transit across the gateway.

use bytes::Bytes;
use tokio::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Radio to host framework
    Inbound,
    /// Host framework to radio
    Outbound,
}

/// One opaque payload crossing the gateway. Lives only for a single relay.
#[derive(Debug, Clone)]
pub struct Frame {
    pub payload: Bytes,
    pub direction: Direction,
    pub at: Instant,
}

impl Frame {
    pub fn inbound(payload: Bytes) -> Self {
        Self {
            payload,
            direction: Direction::Inbound,
            at: Instant::now(),
        }
    }

    pub fn outbound(payload: Bytes) -> Self {
        Self {
            payload,
            direction: Direction::Outbound,
            at: Instant::now(),
        }
    }

    pub fn len(&self) -> usize {
        self.payload.len()
    }

    pub fn is_empty(&self) -> bool {
        self.payload.is_empty()
    }
}
