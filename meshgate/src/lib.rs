//! Meshtastic radio link for overlay network hosts.
//!
//! The crate turns one serial or TCP connection to a Meshtastic radio into a
//! long-lived interface object: it picks the link, keeps it connected with
//! backoff and health checks, relays payloads as mesh broadcasts, and keeps
//! the status fields the host polls valid at all times.

pub mod backoff;
pub mod breaker;
pub mod config;
pub mod error;
pub mod frame;
pub mod gateway;
pub mod interface;
pub mod manager;
pub mod proto;
pub mod relay;
pub mod selector;
pub mod tracing;
pub mod transport;

#[cfg(test)]
mod testing;

pub use config::Config;
pub use error::{Error, Result};
pub use gateway::{MeshInterface, MeshInterfaceBuilder};
pub use interface::{HostInterface, Ingress};
pub use manager::ConnectionState;
