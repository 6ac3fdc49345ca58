//! Seam between the tree builder and the protocol layer.
//!
//! The builder never talks to a transport directly; it consumes this
//! trait. Production wires it to the session pool, tests inject stubs
//! serving canned payloads.

use async_trait::async_trait;
use serde_json::Value;

use pagelens_core_types::{BackendNodeId, CoreError, FrameId, TargetId};

use crate::model::BoundingBox;

/// Computed-style properties the DOM snapshot must be captured with, in
/// this order; the per-node style arrays index into it.
pub const COMPUTED_STYLE_KEYS: &[&str] = &["display", "visibility", "opacity", "pointer-events"];

/// A cross-origin child frame hosted by its own target.
#[derive(Clone, Debug)]
pub struct ChildTarget {
    pub frame: FrameId,
    pub target: TargetId,
}

#[async_trait]
pub trait PerceptionPort: Send + Sync {
    /// `Page.getFrameTree` for one target.
    async fn frame_tree(&self, target: &TargetId) -> Result<Value, CoreError>;

    /// Cross-origin iframe targets attached under this target.
    async fn child_targets(&self, target: &TargetId) -> Result<Vec<ChildTarget>, CoreError>;

    /// Backend id of the iframe element owning `frame`, resolved in the
    /// parent target (`DOM.getFrameOwner`).
    async fn frame_owner(
        &self,
        target: &TargetId,
        frame: &FrameId,
    ) -> Result<Option<BackendNodeId>, CoreError>;

    /// Content-box geometry of an element (`DOM.getBoxModel`), in the
    /// target's own viewport coordinates.
    async fn box_model(
        &self,
        target: &TargetId,
        backend: BackendNodeId,
    ) -> Result<Option<BoundingBox>, CoreError>;

    /// `DOMSnapshot.captureSnapshot` with [`COMPUTED_STYLE_KEYS`].
    async fn dom_snapshot(&self, target: &TargetId) -> Result<Value, CoreError>;

    /// `Accessibility.getFullAXTree` for one target.
    async fn ax_tree(&self, target: &TargetId) -> Result<Value, CoreError>;
}
