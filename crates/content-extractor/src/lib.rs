//! Content extraction over built DOM trees: landmark classification,
//! text/link density scoring, markdown-flavoured section rendering with
//! embedded interactive-element ids, and structure-preserving chunking.

pub mod chunker;
pub mod classify;
pub mod extract;
pub mod model;

pub use chunker::chunk;
pub use classify::{classify, find_main_root, score};
pub use extract::{extract, extract_from, ExtractOptions};
pub use model::{DensityScore, ExtractedSection, MarkdownChunk, Region};
