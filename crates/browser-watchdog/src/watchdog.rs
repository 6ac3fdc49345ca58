use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;

use tempfile::TempDir;
use tokio::net::TcpListener;
use tokio::process::{Child, Command};
use tokio::sync::Mutex;
use tokio::time::{sleep, Instant};
use tracing::{debug, info, warn};

use pagelens_core_types::CoreError;
use pagelens_event_bus::{EventBus, InMemoryBus, LifecycleEvent, LifecycleState};

use crate::exec::resolve_executable;
use crate::profile::{clone_locked_profile, is_profile_locked};
use crate::{Endpoint, WatchdogConfig};

/// Hardened launch args, matching what automation-grade Chromium launches
/// typically pin down.
const BASE_ARGS: &[&str] = &[
    "--disable-background-networking",
    "--disable-background-timer-throttling",
    "--disable-breakpad",
    "--disable-client-side-phishing-detection",
    "--disable-component-update",
    "--disable-default-apps",
    "--disable-dev-shm-usage",
    "--disable-extensions",
    "--disable-hang-monitor",
    "--disable-popup-blocking",
    "--disable-prompt-on-repost",
    "--disable-sync",
    "--metrics-recording-only",
    "--no-first-run",
    "--no-default-browser-check",
    "--password-store=basic",
    "--remote-allow-origins=*",
    "--use-mock-keychain",
];

/// State machine owning the browser subprocess.
///
/// `Idle → Launching → Ready → Stopping → Stopped`, with `Killed`
/// terminal for the process it marks and reachable from any state.
/// `Killed` is final for that subprocess; the watchdog itself stays
/// usable, and a later [`launch`](BrowserWatchdog::launch) starts a
/// fresh process from scratch (the retry path after a failed launch).
/// All transitions are published on the event bus.
pub struct BrowserWatchdog {
    cfg: WatchdogConfig,
    bus: Arc<InMemoryBus<LifecycleEvent>>,
    state: Mutex<LifecycleState>,
    child: Mutex<Option<Child>>,
    temp_profile: Mutex<Option<TempDir>>,
    endpoint: Mutex<Option<Endpoint>>,
    http: reqwest::Client,
}

impl BrowserWatchdog {
    pub fn new(cfg: WatchdogConfig, bus: Arc<InMemoryBus<LifecycleEvent>>) -> Self {
        Self {
            cfg,
            bus,
            state: Mutex::new(LifecycleState::Idle),
            child: Mutex::new(None),
            temp_profile: Mutex::new(None),
            endpoint: Mutex::new(None),
            http: reqwest::Client::new(),
        }
    }

    pub async fn state(&self) -> LifecycleState {
        *self.state.lock().await
    }

    pub async fn endpoint(&self) -> Option<Endpoint> {
        self.endpoint.lock().await.clone()
    }

    async fn transition(&self, to: LifecycleState) {
        let mut guard = self.state.lock().await;
        let from = *guard;
        if from == to {
            return;
        }
        *guard = to;
        drop(guard);
        debug!(target: "browser-watchdog", ?from, ?to, "lifecycle transition");
        let _ = self
            .bus
            .publish(LifecycleEvent::StateChanged { from, to })
            .await;
    }

    /// Launch the browser and return a reachable debugging endpoint.
    ///
    /// Idempotent while `Ready`: a second call returns the live endpoint.
    /// Permitted from `Stopped` and `Killed`, where it starts a brand-new
    /// process; rejected mid-`Launching`/`Stopping`.
    pub async fn launch(&self) -> Result<Endpoint, CoreError> {
        {
            let state = self.state.lock().await;
            match *state {
                LifecycleState::Ready => {
                    drop(state);
                    if let Some(ep) = self.endpoint().await {
                        return Ok(ep);
                    }
                }
                LifecycleState::Launching | LifecycleState::Stopping => {
                    return Err(CoreError::internal(format!(
                        "launch requested while {:?}",
                        *state
                    )));
                }
                _ => {}
            }
        }

        self.transition(LifecycleState::Launching).await;
        match self.launch_inner().await {
            Ok(endpoint) => {
                *self.endpoint.lock().await = Some(endpoint.clone());
                self.transition(LifecycleState::Ready).await;
                let _ = self
                    .bus
                    .publish(LifecycleEvent::EndpointReady {
                        ws_url: endpoint.ws_url.clone(),
                        http_url: endpoint.http_url.clone(),
                    })
                    .await;
                Ok(endpoint)
            }
            Err(err) => {
                // Whatever got spawned is useless now; take it down hard.
                if let Some(mut child) = self.child.lock().await.take() {
                    let _ = child.start_kill();
                    let _ = child.wait().await;
                }
                *self.temp_profile.lock().await = None;
                self.transition(LifecycleState::Killed).await;
                Err(err)
            }
        }
    }

    async fn launch_inner(&self) -> Result<Endpoint, CoreError> {
        let executable = resolve_executable(self.cfg.executable.as_ref())?;
        let profile_path = self.prepare_profile().await?;
        let port = allocate_debug_port().await?;

        let mut command = Command::new(&executable);
        command
            .args(BASE_ARGS)
            .arg(format!("--remote-debugging-port={port}"))
            .arg(format!("--user-data-dir={}", profile_path.display()));
        if self.cfg.headless {
            command
                .arg("--headless=new")
                .arg("--hide-scrollbars")
                .arg("--mute-audio");
        }
        command.args(&self.cfg.extra_args);
        command
            .arg("about:blank")
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true);

        let child = command.spawn().map_err(|err| {
            CoreError::launch(format!(
                "failed to spawn {}: {err}",
                executable.display()
            ))
        })?;
        info!(
            target: "browser-watchdog",
            exe = %executable.display(),
            port,
            pid = child.id(),
            "browser process spawned"
        );
        *self.child.lock().await = Some(child);

        self.poll_until_ready(port).await
    }

    async fn prepare_profile(&self) -> Result<PathBuf, CoreError> {
        match &self.cfg.profile_dir {
            Some(dir) if is_profile_locked(dir) => {
                warn!(
                    target: "browser-watchdog",
                    profile = %dir.display(),
                    "requested profile is locked by a running browser; cloning"
                );
                let temp = clone_locked_profile(dir)?;
                let path = temp.path().to_path_buf();
                *self.temp_profile.lock().await = Some(temp);
                Ok(path)
            }
            Some(dir) => {
                tokio::fs::create_dir_all(dir).await.map_err(|err| {
                    CoreError::launch(format!("failed to create profile dir: {err}"))
                })?;
                Ok(dir.clone())
            }
            None => {
                let temp = TempDir::new().map_err(|err| {
                    CoreError::launch(format!("failed to create temp profile: {err}"))
                })?;
                let path = temp.path().to_path_buf();
                *self.temp_profile.lock().await = Some(temp);
                Ok(path)
            }
        }
    }

    /// Poll `/json/version` until the endpoint answers or the overall
    /// startup deadline lapses. Each poll carries its own short timeout.
    async fn poll_until_ready(&self, port: u16) -> Result<Endpoint, CoreError> {
        let version_url = format!("http://127.0.0.1:{port}/json/version");
        let deadline = Instant::now() + self.cfg.startup_deadline;

        loop {
            if Instant::now() >= deadline {
                return Err(CoreError::launch(format!(
                    "debug endpoint not ready within {:?}",
                    self.cfg.startup_deadline
                )));
            }

            if let Some(child) = self.child.lock().await.as_mut() {
                if let Ok(Some(status)) = child.try_wait() {
                    return Err(CoreError::launch(format!(
                        "browser exited during startup with {status}"
                    )));
                }
            }

            let request = self
                .http
                .get(&version_url)
                .timeout(self.cfg.poll_timeout)
                .send();
            match request.await {
                Ok(resp) => {
                    if let Ok(payload) = resp.json::<serde_json::Value>().await {
                        if let Some(endpoint) = Endpoint::from_version_payload(port, &payload) {
                            return Ok(endpoint);
                        }
                    }
                }
                Err(err) => {
                    debug!(target: "browser-watchdog", ?err, "endpoint not ready yet");
                }
            }

            sleep(self.cfg.poll_interval).await;
        }
    }

    /// Terminate the browser: graceful signal, bounded grace wait, then
    /// force-kill. Killing an already-gone process is a success.
    pub async fn kill(&self) -> Result<(), CoreError> {
        self.transition(LifecycleState::Stopping).await;

        let child = self.child.lock().await.take();
        if let Some(mut child) = child {
            match child.try_wait() {
                Ok(Some(status)) => {
                    debug!(target: "browser-watchdog", %status, "browser already exited");
                }
                _ => {
                    terminate_gracefully(&mut child);
                    match tokio::time::timeout(self.cfg.kill_grace, child.wait()).await {
                        Ok(Ok(status)) => {
                            debug!(target: "browser-watchdog", %status, "browser exited gracefully");
                        }
                        Ok(Err(err)) => {
                            // wait() erroring means the handle is gone; nothing left to kill.
                            debug!(target: "browser-watchdog", ?err, "wait failed after terminate");
                        }
                        Err(_) => {
                            warn!(target: "browser-watchdog", "grace period elapsed; force-killing");
                            let _ = child.start_kill();
                            let _ = child.wait().await;
                        }
                    }
                }
            }
        }

        *self.temp_profile.lock().await = None;
        *self.endpoint.lock().await = None;
        self.transition(LifecycleState::Stopped).await;
        Ok(())
    }
}

#[cfg(unix)]
fn terminate_gracefully(child: &mut Child) {
    if let Some(pid) = child.id() {
        unsafe {
            libc::kill(pid as libc::pid_t, libc::SIGTERM);
        }
    }
}

#[cfg(not(unix))]
fn terminate_gracefully(child: &mut Child) {
    // No portable graceful signal; the bounded wait below goes straight
    // to the force path.
    let _ = child.start_kill();
}

/// Allocate a free debug port by binding port 0 and releasing it.
async fn allocate_debug_port() -> Result<u16, CoreError> {
    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .map_err(|err| CoreError::launch(format!("failed to allocate debug port: {err}")))?;
    let port = listener
        .local_addr()
        .map_err(|err| CoreError::launch(format!("failed to read allocated port: {err}")))?
        .port();
    drop(listener);
    Ok(port)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pagelens_core_types::CoreErrorKind;
    use std::time::Duration;

    fn bus() -> Arc<InMemoryBus<LifecycleEvent>> {
        InMemoryBus::new(64)
    }

    #[tokio::test]
    async fn allocates_distinct_free_ports() {
        let a = allocate_debug_port().await.unwrap();
        let b = allocate_debug_port().await.unwrap();
        assert!(a > 0 && b > 0);
    }

    #[tokio::test]
    async fn kill_without_launch_is_success() {
        let watchdog = BrowserWatchdog::new(WatchdogConfig::default(), bus());
        watchdog.kill().await.unwrap();
        assert_eq!(watchdog.state().await, LifecycleState::Stopped);
    }

    #[tokio::test]
    async fn missing_executable_is_fatal_launch_failure() {
        let cfg = WatchdogConfig {
            executable: Some(PathBuf::from("/no/such/browser")),
            startup_deadline: Duration::from_millis(200),
            ..Default::default()
        };
        let watchdog = BrowserWatchdog::new(cfg, bus());
        let err = watchdog.launch().await.unwrap_err();
        assert_eq!(err.kind, CoreErrorKind::ProcessLaunchFailure);
        assert_eq!(watchdog.state().await, LifecycleState::Killed);
    }

    #[tokio::test]
    async fn relaunch_after_failed_launch_retries_from_killed() {
        let cfg = WatchdogConfig {
            executable: Some(PathBuf::from("/no/such/browser")),
            startup_deadline: Duration::from_millis(200),
            ..Default::default()
        };
        let watchdog = BrowserWatchdog::new(cfg, bus());
        watchdog.launch().await.unwrap_err();
        assert_eq!(watchdog.state().await, LifecycleState::Killed);

        // A retry is a fresh launch attempt, not a state error.
        let err = watchdog.launch().await.unwrap_err();
        assert_eq!(err.kind, CoreErrorKind::ProcessLaunchFailure);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn non_debuggable_process_fails_within_deadline_and_is_killed() {
        let cfg = WatchdogConfig {
            executable: Some(PathBuf::from("/bin/sleep")),
            extra_args: vec!["30".into()],
            startup_deadline: Duration::from_millis(600),
            poll_interval: Duration::from_millis(50),
            poll_timeout: Duration::from_millis(100),
            ..Default::default()
        };
        let watchdog = BrowserWatchdog::new(cfg, bus());
        let err = watchdog.launch().await.unwrap_err();
        assert_eq!(err.kind, CoreErrorKind::ProcessLaunchFailure);
        assert_eq!(watchdog.state().await, LifecycleState::Killed);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn killing_an_already_exited_process_is_success() {
        let watchdog = BrowserWatchdog::new(WatchdogConfig::default(), bus());
        let child = Command::new("/bin/true")
            .stdout(Stdio::null())
            .spawn()
            .unwrap();
        *watchdog.child.lock().await = Some(child);
        sleep(Duration::from_millis(100)).await;
        watchdog.kill().await.unwrap();
        assert_eq!(watchdog.state().await, LifecycleState::Stopped);
    }

    #[tokio::test]
    async fn transitions_are_published() {
        let bus = bus();
        let mut rx = bus.subscribe();
        let watchdog = BrowserWatchdog::new(WatchdogConfig::default(), bus);
        watchdog.kill().await.unwrap();

        let mut seen = Vec::new();
        while let Ok(ev) = rx.try_recv() {
            if let LifecycleEvent::StateChanged { to, .. } = ev {
                seen.push(to);
            }
        }
        assert_eq!(seen, vec![LifecycleState::Stopping, LifecycleState::Stopped]);
    }
}
