use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use serde_json::json;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use pagelens_core_types::{CoreError, CoreErrorKind, SessionId, TargetId};
use pagelens_event_bus::{EventBus, InMemoryBus, LifecycleEvent};

use crate::{CdpChannel, CommandTarget};

/// Lazily attached per-target sessions over one shared channel.
///
/// Session creation is serialized behind `create_lock` so concurrent
/// callers can never attach two sessions to the same target. The pool is
/// the only mutable shared resource in the transport layer; everything it
/// hands out is a plain id.
pub struct SessionPool<C>
where
    C: CdpChannel + 'static,
{
    channel: Arc<C>,
    sessions: Arc<DashMap<TargetId, SessionId>>,
    create_lock: Mutex<()>,
    bus: Arc<InMemoryBus<LifecycleEvent>>,
    deadline: Duration,
    watcher: JoinHandle<()>,
}

impl<C> SessionPool<C>
where
    C: CdpChannel + 'static,
{
    pub fn new(
        channel: Arc<C>,
        bus: Arc<InMemoryBus<LifecycleEvent>>,
        deadline: Duration,
    ) -> Self {
        let sessions: Arc<DashMap<TargetId, SessionId>> = Arc::new(DashMap::new());
        let watcher = spawn_detach_watcher(channel.clone(), sessions.clone(), bus.clone());
        Self {
            channel,
            sessions,
            create_lock: Mutex::new(()),
            bus,
            deadline,
            watcher,
        }
    }

    pub fn channel(&self) -> Arc<C> {
        Arc::clone(&self.channel)
    }

    /// Return the existing session for `target`, attaching one if absent.
    pub async fn get_or_create(&self, target: &TargetId) -> Result<SessionId, CoreError> {
        if let Some(existing) = self.sessions.get(target) {
            return Ok(existing.value().clone());
        }

        let _guard = self.create_lock.lock().await;
        if let Some(existing) = self.sessions.get(target) {
            return Ok(existing.value().clone());
        }

        let result = self
            .channel
            .send(
                CommandTarget::Browser,
                "Target.attachToTarget",
                json!({ "targetId": target.0, "flatten": true }),
                self.deadline,
            )
            .await?;

        let session_id = result
            .get("sessionId")
            .and_then(|v| v.as_str())
            .map(|s| SessionId(s.to_string()))
            .ok_or_else(|| {
                CoreError::new(CoreErrorKind::CdpIo)
                    .with_hint("attachToTarget returned no sessionId")
                    .with_data(result.clone())
            })?;

        self.sessions.insert(target.clone(), session_id.clone());
        info!(target: "cdp-session", target_id = %target, session = %session_id, "session attached");
        let _ = self
            .bus
            .publish(LifecycleEvent::SessionAttached {
                target: target.clone(),
                session: session_id.clone(),
            })
            .await;

        Ok(session_id)
    }

    /// Send a command on an attached session.
    pub async fn send_on(
        &self,
        session: &SessionId,
        method: &str,
        params: serde_json::Value,
        deadline: Duration,
    ) -> Result<serde_json::Value, CoreError> {
        self.channel
            .send(
                CommandTarget::Session(session.0.clone()),
                method,
                params,
                deadline,
            )
            .await
    }

    /// Convenience: resolve (or attach) the session for a target and send.
    pub async fn send_to_target(
        &self,
        target: &TargetId,
        method: &str,
        params: serde_json::Value,
        deadline: Duration,
    ) -> Result<serde_json::Value, CoreError> {
        let session = self.get_or_create(target).await?;
        self.send_on(&session, method, params, deadline).await
    }

    pub fn session_for(&self, target: &TargetId) -> Option<SessionId> {
        self.sessions.get(target).map(|e| e.value().clone())
    }

    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    /// Drop every session. Called when the physical connection dies; the
    /// next `get_or_create` on a fresh connection re-attaches.
    pub fn invalidate_all(&self) {
        let count = self.sessions.len();
        self.sessions.clear();
        if count > 0 {
            debug!(target: "cdp-session", invalidated = count, "all sessions invalidated");
        }
    }
}

impl<C> Drop for SessionPool<C>
where
    C: CdpChannel + 'static,
{
    fn drop(&mut self) {
        self.watcher.abort();
    }
}

/// Watches both streams that can kill a session: per-target detach
/// events on the protocol channel, and connection loss on the lifecycle
/// bus. A `Disconnected` event drops every session at once instead of
/// letting each fail lazily on its next command.
fn spawn_detach_watcher<C>(
    channel: Arc<C>,
    sessions: Arc<DashMap<TargetId, SessionId>>,
    bus: Arc<InMemoryBus<LifecycleEvent>>,
) -> JoinHandle<()>
where
    C: CdpChannel + 'static,
{
    use tokio::sync::broadcast::error::RecvError;

    let mut rx = channel.subscribe();
    let mut lifecycle = bus.subscribe();
    tokio::spawn(async move {
        let mut bus_open = true;
        loop {
            tokio::select! {
                event = rx.recv() => match event {
                    Ok(event) => {
                        if event.method != "Target.detachedFromTarget" {
                            continue;
                        }
                        let detached = event
                            .params
                            .get("sessionId")
                            .and_then(|v| v.as_str())
                            .map(str::to_string);
                        let Some(detached) = detached else { continue };

                        let entry = sessions
                            .iter()
                            .find(|kv| kv.value().0 == detached)
                            .map(|kv| kv.key().clone());
                        if let Some(target) = entry {
                            sessions.remove(&target);
                            debug!(target: "cdp-session", target_id = %target, "session detached");
                            let _ = bus
                                .publish(LifecycleEvent::SessionDetached {
                                    target,
                                    session: SessionId(detached),
                                })
                                .await;
                        }
                    }
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(target: "cdp-session", skipped, "detach watcher lagged");
                    }
                    Err(RecvError::Closed) => {
                        // Transport gone: every session with it.
                        sessions.clear();
                        break;
                    }
                },
                event = lifecycle.recv(), if bus_open => match event {
                    Ok(LifecycleEvent::Disconnected { .. }) => {
                        let count = sessions.len();
                        sessions.clear();
                        if count > 0 {
                            debug!(
                                target: "cdp-session",
                                invalidated = count,
                                "connection lost, sessions invalidated"
                            );
                        }
                    }
                    Ok(_) => {}
                    Err(RecvError::Lagged(_)) => {}
                    Err(RecvError::Closed) => bus_open = false,
                },
            }
        }
    })
}
