//! Top-level configuration, assembled from the per-layer knobs.

use std::time::Duration;

use browser_watchdog::WatchdogConfig;
use cdp_session::TransportOptions;
use content_extractor::ExtractOptions;
use dom_builder::BuildConfig;

#[derive(Clone, Debug)]
pub struct KernelConfig {
    pub watchdog: WatchdogConfig,
    pub transport: TransportOptions,
    pub build: BuildConfig,
    pub extract: ExtractOptions,
    /// Deadline for individual protocol commands issued by the facade.
    pub command_deadline: Duration,
    /// How long to wait for the load event after navigation before
    /// proceeding best-effort.
    pub navigation_deadline: Duration,
}

impl Default for KernelConfig {
    fn default() -> Self {
        Self {
            watchdog: WatchdogConfig::default(),
            transport: TransportOptions::default(),
            build: BuildConfig::default(),
            extract: ExtractOptions::default(),
            command_deadline: Duration::from_secs(15),
            navigation_deadline: Duration::from_secs(20),
        }
    }
}
