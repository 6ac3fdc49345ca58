use std::collections::HashMap;
use std::convert::TryInto;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chromiumoxide::cdp::browser_protocol::target::SessionId as WireSessionId;
use chromiumoxide::cdp::events::CdpEventMessage;
use chromiumoxide::conn::Connection;
use chromiumoxide::error::CdpError;
use chromiumoxide_types::{CallId, CdpJsonEventMessage, Message, MethodId, Response};
use futures::StreamExt;
use serde_json::Value;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use pagelens_core_types::{CoreError, CoreErrorKind};
use pagelens_event_bus::{EventBus, InMemoryBus, LifecycleEvent};

use crate::{CdpChannel, CdpEvent, CommandTarget};

/// Tuning knobs for the physical connection.
#[derive(Clone, Debug)]
pub struct TransportOptions {
    pub default_deadline: Duration,
    /// Zero disables the keep-alive heartbeat.
    pub heartbeat_interval: Duration,
    pub event_buffer: usize,
}

impl Default for TransportOptions {
    fn default() -> Self {
        Self {
            default_deadline: Duration::from_secs(30),
            heartbeat_interval: Duration::from_secs(15),
            event_buffer: 512,
        }
    }
}

struct ControlMessage {
    target: CommandTarget,
    method: String,
    params: Value,
    responder: oneshot::Sender<Result<Value, CoreError>>,
}

/// The single physical connection to the browser endpoint.
pub struct Transport {
    command_tx: mpsc::Sender<ControlMessage>,
    events: broadcast::Sender<CdpEvent>,
    loop_task: JoinHandle<()>,
    heartbeat_task: Option<JoinHandle<()>>,
    alive: Arc<AtomicBool>,
}

impl Transport {
    /// Connect to a browser websocket endpoint and start the run loop.
    pub async fn connect(
        ws_url: &str,
        opts: TransportOptions,
        bus: Arc<InMemoryBus<LifecycleEvent>>,
    ) -> Result<Arc<Self>, CoreError> {
        let conn = Connection::<CdpEventMessage>::connect(ws_url)
            .await
            .map_err(|err| CoreError::new(CoreErrorKind::CdpIo).with_hint(err.to_string()))?;

        let (command_tx, command_rx) = mpsc::channel(128);
        let (events, _) = broadcast::channel(opts.event_buffer.max(16));

        let alive = Arc::new(AtomicBool::new(true));
        let loop_alive = alive.clone();
        let loop_events = events.clone();
        let loop_bus = bus.clone();

        let loop_task = tokio::spawn(async move {
            let result = run_loop(conn, command_rx, loop_events).await;
            loop_alive.store(false, Ordering::Relaxed);
            let reason = match &result {
                Ok(()) => "connection closed".to_string(),
                Err(err) => err.to_string(),
            };
            if let Err(err) = result {
                error!(target: "cdp-session", ?err, "transport loop terminated with error");
            }
            let _ = loop_bus.publish(LifecycleEvent::Disconnected { reason }).await;
        });

        let heartbeat_task = spawn_heartbeat(
            command_tx.clone(),
            alive.clone(),
            opts.heartbeat_interval,
            opts.default_deadline,
        );

        info!(target: "cdp-session", url = %ws_url, "browser connection established");

        let transport = Arc::new(Self {
            command_tx,
            events,
            loop_task,
            heartbeat_task,
            alive,
        });

        transport
            .send(
                CommandTarget::Browser,
                "Target.setDiscoverTargets",
                serde_json::json!({ "discover": true }),
                opts.default_deadline,
            )
            .await?;
        transport
            .send(
                CommandTarget::Browser,
                "Target.setAutoAttach",
                serde_json::json!({
                    "autoAttach": false,
                    "waitForDebuggerOnStart": false,
                    "flatten": true,
                }),
                opts.default_deadline,
            )
            .await?;

        Ok(transport)
    }
}

#[async_trait]
impl CdpChannel for Transport {
    async fn send(
        &self,
        target: CommandTarget,
        method: &str,
        params: Value,
        deadline: Duration,
    ) -> Result<Value, CoreError> {
        let (resp_tx, resp_rx) = oneshot::channel();
        let message = ControlMessage {
            target,
            method: method.to_string(),
            params,
            responder: resp_tx,
        };

        self.command_tx
            .send(message)
            .await
            .map_err(|err| CoreError::new(CoreErrorKind::CdpIo).with_hint(err.to_string()))?;

        match tokio::time::timeout(deadline, resp_rx).await {
            Ok(Ok(Ok(value))) => Ok(value),
            Ok(Ok(Err(err))) => Err(err),
            Ok(Err(_)) => Err(CoreError::new(CoreErrorKind::CdpIo)
                .with_hint("command response channel closed")),
            Err(_) => Err(CoreError::timeout(format!("no response to {method}"))),
        }
    }

    fn subscribe(&self) -> broadcast::Receiver<CdpEvent> {
        self.events.subscribe()
    }

    fn is_alive(&self) -> bool {
        self.alive.load(Ordering::Relaxed)
    }
}

impl Drop for Transport {
    fn drop(&mut self) {
        self.alive.store(false, Ordering::Relaxed);
        self.loop_task.abort();
        if let Some(handle) = &self.heartbeat_task {
            handle.abort();
        }
    }
}

async fn run_loop(
    mut conn: Connection<CdpEventMessage>,
    mut command_rx: mpsc::Receiver<ControlMessage>,
    events: broadcast::Sender<CdpEvent>,
) -> Result<(), CoreError> {
    let mut inflight: HashMap<CallId, oneshot::Sender<Result<Value, CoreError>>> = HashMap::new();

    loop {
        tokio::select! {
            Some(cmd) = command_rx.recv() => {
                handle_command(&mut conn, cmd, &mut inflight)?;
            }
            message = conn.next() => {
                match message {
                    Some(Ok(Message::Response(resp))) => {
                        handle_response(resp, &mut inflight);
                    }
                    Some(Ok(Message::Event(event))) => {
                        if let Err(err) = forward_event(event, &events) {
                            warn!(target: "cdp-session", ?err, "failed to decode event");
                        }
                    }
                    Some(Err(err)) => {
                        let core_err = map_cdp_error(err);
                        for (_, sender) in inflight.drain() {
                            let _ = sender.send(Err(core_err.clone()));
                        }
                        return Err(core_err);
                    }
                    None => {
                        let err = CoreError::new(CoreErrorKind::CdpIo)
                            .with_hint("cdp connection closed");
                        for (_, sender) in inflight.drain() {
                            let _ = sender.send(Err(err.clone()));
                        }
                        return Ok(());
                    }
                }
            }
        }
    }
}

fn handle_command(
    conn: &mut Connection<CdpEventMessage>,
    cmd: ControlMessage,
    inflight: &mut HashMap<CallId, oneshot::Sender<Result<Value, CoreError>>>,
) -> Result<(), CoreError> {
    let session = match cmd.target {
        CommandTarget::Browser => None,
        CommandTarget::Session(session_id) => Some(WireSessionId::from(session_id)),
    };

    let method_id: MethodId = cmd.method.clone().into();
    match conn.submit_command(method_id, session, cmd.params) {
        Ok(call_id) => {
            inflight.insert(call_id, cmd.responder);
            Ok(())
        }
        Err(err) => {
            let core_err = CoreError::new(CoreErrorKind::CdpIo).with_hint(err.to_string());
            let _ = cmd.responder.send(Err(core_err.clone()));
            Err(core_err)
        }
    }
}

fn handle_response(
    resp: Response,
    inflight: &mut HashMap<CallId, oneshot::Sender<Result<Value, CoreError>>>,
) {
    let entry = inflight.remove(&resp.id);
    let result = extract_payload(resp);
    if let Some(sender) = entry {
        let _ = sender.send(result);
    }
}

fn forward_event(
    event: CdpEventMessage,
    events: &broadcast::Sender<CdpEvent>,
) -> Result<(), CoreError> {
    let raw: CdpJsonEventMessage = event
        .try_into()
        .map_err(|err| CoreError::internal(format!("failed to decode cdp event: {err}")))?;

    // Lagging subscribers are their own problem; the broadcast channel
    // drops the oldest events for them rather than blocking the loop.
    let _ = events.send(CdpEvent {
        method: raw.method.into_owned(),
        params: raw.params,
        session_id: raw.session_id,
    });
    Ok(())
}

fn extract_payload(resp: Response) -> Result<Value, CoreError> {
    if let Some(result) = resp.result {
        Ok(result)
    } else if let Some(error) = resp.error {
        let retriable = error.code >= 500;
        Err(CoreError::new(CoreErrorKind::CdpIo)
            .with_hint(format!("cdp error {}: {}", error.code, error.message))
            .retriable(retriable))
    } else {
        Err(CoreError::internal("empty cdp response"))
    }
}

fn map_cdp_error(err: CdpError) -> CoreError {
    let hint = err.to_string();
    match err {
        CdpError::Timeout => CoreError::new(CoreErrorKind::ProtocolTimeout)
            .with_hint(hint)
            .retriable(true),
        CdpError::FrameNotFound(_) | CdpError::JavascriptException(_) | CdpError::Serde(_) => {
            CoreError::new(CoreErrorKind::Internal).with_hint(hint)
        }
        _ => CoreError::new(CoreErrorKind::CdpIo)
            .with_hint(hint)
            .retriable(true),
    }
}

fn spawn_heartbeat(
    sender: mpsc::Sender<ControlMessage>,
    alive: Arc<AtomicBool>,
    interval_duration: Duration,
    deadline: Duration,
) -> Option<JoinHandle<()>> {
    if interval_duration.is_zero() {
        return None;
    }

    let response_deadline = deadline.min(Duration::from_secs(5));

    Some(tokio::spawn(async move {
        let mut ticker = interval(interval_duration);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        while alive.load(Ordering::Relaxed) {
            ticker.tick().await;
            if !alive.load(Ordering::Relaxed) {
                break;
            }

            let (resp_tx, resp_rx) = oneshot::channel();
            let message = ControlMessage {
                target: CommandTarget::Browser,
                method: "Browser.getVersion".to_string(),
                params: Value::Object(Default::default()),
                responder: resp_tx,
            };

            if sender.send(message).await.is_err() {
                debug!(target: "cdp-session", "heartbeat send failed (channel closed)");
                break;
            }

            match tokio::time::timeout(response_deadline, resp_rx).await {
                Ok(Ok(Ok(_))) => {}
                Ok(Ok(Err(err))) => {
                    warn!(target: "cdp-session", ?err, "heartbeat command error");
                    break;
                }
                Ok(Err(_)) => {
                    debug!(target: "cdp-session", "heartbeat response channel closed");
                    break;
                }
                Err(_) => {
                    warn!(target: "cdp-session", "heartbeat timed out");
                    break;
                }
            }
        }
    }))
}
