//! Extraction memory: a glob-keyed strategy cache for reusing what
//! worked on a site before, and a pagination aggregator that folds
//! per-page results into one deduplicated collection.

pub mod aggregate;
pub mod cache;

pub use aggregate::{AggregateResult, Aggregator};
pub use cache::{ExtractionStrategy, StrategyCache};
