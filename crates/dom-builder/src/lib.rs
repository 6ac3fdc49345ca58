//! DOM tree construction: frame enumeration, snapshot fusion and the
//! interactive-element selector map.
//!
//! The pipeline is stateless per request. [`TreeBuilder::build`] walks
//! the frame hierarchy, fetches each target's DOM snapshot and
//! accessibility tree concurrently, fuses them into one arena-backed
//! [`DomTree`] in root-viewport coordinates, and indexes every
//! interactive element by backend node id.

pub mod builder;
pub mod frames;
pub mod judges;
pub mod model;
pub mod ports;

pub use builder::{merge_detected_elements, BuildConfig, DetectedElement, TreeBuilder};
pub use frames::{enumerate_frames, EnumeratedFrame};
pub use model::{AxProps, BoundingBox, DomTree, FrameRecord, Node, NodeId, NodeKind};
pub use ports::{ChildTarget, PerceptionPort, COMPUTED_STYLE_KEYS};
