//! Lifecycle watchdog: launches the browser subprocess, reports readiness,
//! and tears it down safely.
//!
//! The watchdog owns all of its mutable state (subprocess handle, cloned
//! temp profile, endpoint) privately and talks to the rest of the system
//! only through the shared event bus, publishing state transitions and
//! endpoint readiness.

pub mod exec;
pub mod profile;
pub mod watchdog;

use std::path::PathBuf;
use std::time::Duration;

use serde_json::Value;

pub use exec::resolve_executable;
pub use profile::{clone_locked_profile, is_profile_locked};
pub use watchdog::BrowserWatchdog;

/// Launch/teardown tuning.
#[derive(Clone, Debug)]
pub struct WatchdogConfig {
    /// Explicit executable path; when unset the resolver searches the
    /// environment and well-known per-OS install locations.
    pub executable: Option<PathBuf>,
    /// Persistent profile directory. When unset a throwaway temp profile
    /// is used; when set but locked by a running browser, the
    /// authentication-relevant files are cloned into a temp profile.
    pub profile_dir: Option<PathBuf>,
    pub headless: bool,
    /// Overall startup deadline covering spawn plus readiness polling.
    pub startup_deadline: Duration,
    /// Per-poll HTTP timeout against the debug endpoint.
    pub poll_timeout: Duration,
    pub poll_interval: Duration,
    /// Grace period between terminate and force-kill.
    pub kill_grace: Duration,
    pub extra_args: Vec<String>,
}

impl Default for WatchdogConfig {
    fn default() -> Self {
        Self {
            executable: None,
            profile_dir: None,
            headless: true,
            startup_deadline: Duration::from_secs(30),
            poll_timeout: Duration::from_secs(2),
            poll_interval: Duration::from_millis(200),
            kill_grace: Duration::from_secs(5),
            extra_args: Vec::new(),
        }
    }
}

/// A reachable debugging endpoint for a running browser process.
#[derive(Clone, Debug)]
pub struct Endpoint {
    pub ws_url: String,
    pub http_url: String,
    pub port: u16,
}

impl Endpoint {
    pub(crate) fn from_version_payload(port: u16, payload: &Value) -> Option<Self> {
        let ws_url = payload.get("webSocketDebuggerUrl")?.as_str()?.to_string();
        Some(Self {
            ws_url,
            http_url: format!("http://127.0.0.1:{port}"),
            port,
        })
    }
}
