//! Session transport: one physical connection to the browser's debugging
//! endpoint, multiplexed into per-target protocol sessions.
//!
//! The [`Transport`] owns the WebSocket connection and a single run loop
//! that submits commands and correlates responses by call id, which is
//! what gives the per-session FIFO acknowledgement guarantee: commands on
//! one session are submitted and answered in send order, while independent
//! sessions interleave freely. The [`SessionPool`] layers lazy
//! `Target.attachToTarget` session creation on top.

pub mod pool;
pub mod transport;

use serde_json::Value;
use std::time::Duration;

use async_trait::async_trait;
use pagelens_core_types::CoreError;
use tokio::sync::broadcast;

pub use pool::SessionPool;
pub use transport::{Transport, TransportOptions};

/// A raw protocol event fanned out to subscribers.
#[derive(Clone, Debug)]
pub struct CdpEvent {
    pub method: String,
    pub params: Value,
    pub session_id: Option<String>,
}

/// Where a command is addressed: the browser-level connection itself or
/// one attached session.
#[derive(Clone, Debug)]
pub enum CommandTarget {
    Browser,
    Session(String),
}

/// Seam between the physical transport and its consumers. Production code
/// uses [`Transport`]; tests inject stubs.
#[async_trait]
pub trait CdpChannel: Send + Sync {
    /// Send a command and wait for its response, bounded by `deadline`.
    /// A missed deadline surfaces as `ProtocolTimeout`.
    async fn send(
        &self,
        target: CommandTarget,
        method: &str,
        params: Value,
        deadline: Duration,
    ) -> Result<Value, CoreError>;

    /// Subscribe to the raw event stream.
    fn subscribe(&self) -> broadcast::Receiver<CdpEvent>;

    /// Whether the underlying connection is still believed to be up.
    fn is_alive(&self) -> bool;
}
