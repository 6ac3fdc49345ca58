//! Typed publish/subscribe bus.
//!
//! Watchdogs are independent listeners reacting to a shared event stream:
//! each one subscribes on its own receiver and owns only its private
//! mutable state. The bus itself is a thin wrapper over a tokio broadcast
//! channel, one bus instance per event type.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, mpsc};
use tracing::debug;

use pagelens_core_types::{CoreError, SessionId, TargetId};

/// Trait implemented by payload types that can be carried on the bus.
pub trait Event: Clone + Send + Sync + std::fmt::Debug + 'static {}

impl<T> Event for T where T: Clone + Send + Sync + std::fmt::Debug + 'static {}

#[async_trait]
pub trait EventBus<E>: Send + Sync
where
    E: Event,
{
    async fn publish(&self, event: E) -> Result<(), CoreError>;
    fn subscribe(&self) -> broadcast::Receiver<E>;
}

/// In-memory bus backing both production wiring and tests.
pub struct InMemoryBus<E>
where
    E: Event,
{
    sender: broadcast::Sender<E>,
}

impl<E> InMemoryBus<E>
where
    E: Event,
{
    pub fn new(capacity: usize) -> Arc<Self> {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Arc::new(Self { sender })
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

#[async_trait]
impl<E> EventBus<E> for InMemoryBus<E>
where
    E: Event,
{
    async fn publish(&self, event: E) -> Result<(), CoreError> {
        // A bus with no subscribers is not an error: lifecycle events may
        // fire before any watchdog has attached.
        match self.sender.send(event) {
            Ok(_) => Ok(()),
            Err(_) => {
                debug!(target: "event-bus", "event dropped (no subscribers)");
                Ok(())
            }
        }
    }

    fn subscribe(&self) -> broadcast::Receiver<E> {
        self.sender.subscribe()
    }
}

/// Materialise an mpsc receiver from a bus subscription so callers can
/// await events without handling broadcast lag semantics directly.
pub fn to_mpsc<E>(bus: Arc<InMemoryBus<E>>, capacity: usize) -> mpsc::Receiver<E>
where
    E: Event,
{
    let mut rx = bus.subscribe();
    let (tx, out_rx) = mpsc::channel(capacity.max(1));
    tokio::spawn(async move {
        while let Ok(ev) = rx.recv().await {
            if tx.send(ev).await.is_err() {
                break;
            }
        }
    });
    out_rx
}

/// Lifecycle phases of the managed browser process.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub enum LifecycleState {
    Idle,
    Launching,
    Ready,
    Stopping,
    Stopped,
    Killed,
}

/// Events published by the lifecycle watchdog and the session transport.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub enum LifecycleEvent {
    StateChanged {
        from: LifecycleState,
        to: LifecycleState,
    },
    EndpointReady {
        ws_url: String,
        http_url: String,
    },
    SessionAttached {
        target: TargetId,
        session: SessionId,
    },
    SessionDetached {
        target: TargetId,
        session: SessionId,
    },
    /// The physical connection dropped; every session is now invalid.
    Disconnected {
        reason: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn delivers_to_all_subscribers() {
        let bus: Arc<InMemoryBus<LifecycleEvent>> = InMemoryBus::new(16);
        let mut a = bus.subscribe();
        let mut b = bus.subscribe();

        bus.publish(LifecycleEvent::Disconnected {
            reason: "test".into(),
        })
        .await
        .unwrap();

        assert!(matches!(
            a.recv().await.unwrap(),
            LifecycleEvent::Disconnected { .. }
        ));
        assert!(matches!(
            b.recv().await.unwrap(),
            LifecycleEvent::Disconnected { .. }
        ));
    }

    #[tokio::test]
    async fn publish_without_subscribers_is_ok() {
        let bus: Arc<InMemoryBus<LifecycleEvent>> = InMemoryBus::new(4);
        bus.publish(LifecycleEvent::StateChanged {
            from: LifecycleState::Idle,
            to: LifecycleState::Launching,
        })
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn mpsc_adapter_forwards_events() {
        let bus: Arc<InMemoryBus<LifecycleEvent>> = InMemoryBus::new(16);
        let mut rx = to_mpsc(bus.clone(), 16);
        // Give the forwarding task a chance to subscribe.
        tokio::task::yield_now().await;

        bus.publish(LifecycleEvent::EndpointReady {
            ws_url: "ws://127.0.0.1:9222/devtools/browser/x".into(),
            http_url: "http://127.0.0.1:9222".into(),
        })
        .await
        .unwrap();

        let ev = rx.recv().await.unwrap();
        assert!(matches!(ev, LifecycleEvent::EndpointReady { .. }));
    }
}
