//! URL-pattern keyed cache of extraction strategies.
//!
//! A strategy remembers what worked for a family of URLs (a selector or
//! script) together with its track record. Lookup picks the best-proven
//! match; the counters only move through the explicit record calls, so
//! lookups are idempotent.

use dashmap::DashMap;
use glob::Pattern;
use serde::{Deserialize, Serialize};
use tracing::debug;
use uuid::Uuid;

use pagelens_core_types::{CoreError, CoreErrorKind};

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ExtractionStrategy {
    pub id: String,
    /// Glob matched against the full URL, e.g. `https://*.example.com/items/*`.
    pub url_glob: String,
    /// The cached selector or script; a strategy without one is a
    /// placeholder and never returned by lookup.
    pub script: Option<String>,
    pub success_count: u64,
    pub failure_count: u64,
}

impl ExtractionStrategy {
    pub fn new(url_glob: impl Into<String>, script: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            url_glob: url_glob.into(),
            script: Some(script.into()),
            success_count: 0,
            failure_count: 0,
        }
    }
}

#[derive(Default)]
pub struct StrategyCache {
    strategies: DashMap<String, ExtractionStrategy>,
}

impl StrategyCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a strategy; the glob is validated here so lookups never
    /// have to deal with broken patterns.
    pub fn register(&self, strategy: ExtractionStrategy) -> Result<(), CoreError> {
        Pattern::new(&strategy.url_glob).map_err(|err| {
            CoreError::new(CoreErrorKind::SchemaValidation)
                .with_hint(format!("invalid url glob {:?}: {err}", strategy.url_glob))
        })?;
        debug!(target: "extraction-cache", id = %strategy.id, glob = %strategy.url_glob, "strategy registered");
        self.strategies.insert(strategy.id.clone(), strategy);
        Ok(())
    }

    /// Best cached strategy for `url`: among glob matches that carry a
    /// script, the one with the most recorded successes. Ties break on
    /// strategy id so repeated lookups against an unchanged cache agree.
    pub fn find_matching(&self, url: &str) -> Option<ExtractionStrategy> {
        let mut best: Option<ExtractionStrategy> = None;
        for entry in self.strategies.iter() {
            let strategy = entry.value();
            if strategy.script.is_none() {
                continue;
            }
            let Ok(pattern) = Pattern::new(&strategy.url_glob) else {
                continue;
            };
            if !pattern.matches(url) {
                continue;
            }
            let better = match &best {
                None => true,
                Some(current) => {
                    strategy.success_count > current.success_count
                        || (strategy.success_count == current.success_count
                            && strategy.id < current.id)
                }
            };
            if better {
                best = Some(strategy.clone());
            }
        }
        best
    }

    pub fn record_success(&self, id: &str) {
        if let Some(mut entry) = self.strategies.get_mut(id) {
            entry.success_count += 1;
        }
    }

    pub fn record_failure(&self, id: &str) {
        if let Some(mut entry) = self.strategies.get_mut(id) {
            entry.failure_count += 1;
        }
    }

    pub fn get(&self, id: &str) -> Option<ExtractionStrategy> {
        self.strategies.get(id).map(|e| e.clone())
    }

    pub fn len(&self) -> usize {
        self.strategies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.strategies.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookup_is_idempotent_and_prefers_success_count() {
        let cache = StrategyCache::new();
        let mut a = ExtractionStrategy::new("https://shop.example/*", ".item");
        a.success_count = 3;
        let mut b = ExtractionStrategy::new("https://shop.example/*", ".card");
        b.success_count = 7;
        let (a_id, b_id) = (a.id.clone(), b.id.clone());
        cache.register(a).unwrap();
        cache.register(b).unwrap();

        let first = cache.find_matching("https://shop.example/items/1").unwrap();
        assert_eq!(first.id, b_id);
        for _ in 0..5 {
            let again = cache.find_matching("https://shop.example/items/1").unwrap();
            assert_eq!(again.id, first.id);
        }

        // Counters only move through explicit recording.
        assert_eq!(cache.get(&b_id).unwrap().success_count, 7);
        cache.record_success(&b_id);
        assert_eq!(cache.get(&b_id).unwrap().success_count, 8);
        cache.record_failure(&a_id);
        assert_eq!(cache.get(&a_id).unwrap().failure_count, 1);
    }

    #[test]
    fn strategies_without_scripts_are_never_returned() {
        let cache = StrategyCache::new();
        let mut placeholder = ExtractionStrategy::new("https://example.com/*", "");
        placeholder.script = None;
        cache.register(placeholder).unwrap();
        assert!(cache.find_matching("https://example.com/page").is_none());
    }

    #[test]
    fn invalid_glob_is_rejected_at_registration() {
        let cache = StrategyCache::new();
        let bad = ExtractionStrategy::new("https://[invalid/*", ".x");
        let err = cache.register(bad).unwrap_err();
        assert_eq!(err.kind, CoreErrorKind::SchemaValidation);
    }

    #[test]
    fn no_match_returns_none() {
        let cache = StrategyCache::new();
        cache
            .register(ExtractionStrategy::new("https://a.example/*", ".x"))
            .unwrap();
        assert!(cache.find_matching("https://b.example/").is_none());
    }
}
