//! Protocol-backed implementation of the tree builder's perception seam.
//!
//! Every method maps to one or two DevTools calls routed through the
//! session pool, so frame data for independent targets travels on
//! independent sessions.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::trace;

use cdp_session::{CdpChannel, CommandTarget, SessionPool};
use dom_builder::{BoundingBox, ChildTarget, PerceptionPort, COMPUTED_STYLE_KEYS};
use pagelens_core_types::{BackendNodeId, CoreError, FrameId, TargetId};

pub struct CdpPort<C>
where
    C: CdpChannel + 'static,
{
    pool: Arc<SessionPool<C>>,
    deadline: Duration,
}

impl<C> CdpPort<C>
where
    C: CdpChannel + 'static,
{
    pub fn new(pool: Arc<SessionPool<C>>, deadline: Duration) -> Self {
        Self { pool, deadline }
    }

    /// Domains the perception calls depend on; enabling twice is a no-op
    /// on the browser side.
    pub async fn enable_domains(&self, target: &TargetId) -> Result<(), CoreError> {
        for method in ["Page.enable", "DOM.enable", "Accessibility.enable"] {
            self.pool
                .send_to_target(target, method, json!({}), self.deadline)
                .await?;
        }
        Ok(())
    }
}

#[async_trait]
impl<C> PerceptionPort for CdpPort<C>
where
    C: CdpChannel + 'static,
{
    async fn frame_tree(&self, target: &TargetId) -> Result<Value, CoreError> {
        self.pool
            .send_to_target(target, "Page.getFrameTree", json!({}), self.deadline)
            .await
    }

    async fn child_targets(&self, target: &TargetId) -> Result<Vec<ChildTarget>, CoreError> {
        let result = self
            .pool
            .channel()
            .send(
                CommandTarget::Browser,
                "Target.getTargets",
                json!({}),
                self.deadline,
            )
            .await?;

        let mut children = Vec::new();
        let infos = result
            .get("targetInfos")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();
        for info in infos {
            if info.get("type").and_then(Value::as_str) != Some("iframe") {
                continue;
            }
            let Some(target_id) = info.get("targetId").and_then(Value::as_str) else {
                continue;
            };
            // An out-of-process iframe's target id doubles as its frame
            // id; ownership in this parent is proven by resolving the
            // frame's owner element here.
            let frame = FrameId(target_id.to_string());
            if let Ok(Some(_)) = self.frame_owner(target, &frame).await {
                children.push(ChildTarget {
                    frame,
                    target: TargetId(target_id.to_string()),
                });
            }
        }
        trace!(target: "pagelens-kernel", parent = %target, count = children.len(), "cross-origin children resolved");
        Ok(children)
    }

    async fn frame_owner(
        &self,
        target: &TargetId,
        frame: &FrameId,
    ) -> Result<Option<BackendNodeId>, CoreError> {
        let result = self
            .pool
            .send_to_target(
                target,
                "DOM.getFrameOwner",
                json!({ "frameId": frame.0 }),
                self.deadline,
            )
            .await;
        match result {
            Ok(value) => Ok(value
                .get("backendNodeId")
                .and_then(Value::as_u64)
                .map(BackendNodeId)),
            // The frame simply is not owned in this target.
            Err(err) if !err.is_fatal() => Ok(None),
            Err(err) => Err(err),
        }
    }

    async fn box_model(
        &self,
        target: &TargetId,
        backend: BackendNodeId,
    ) -> Result<Option<BoundingBox>, CoreError> {
        let result = self
            .pool
            .send_to_target(
                target,
                "DOM.getBoxModel",
                json!({ "backendNodeId": backend.0 }),
                self.deadline,
            )
            .await;
        let value = match result {
            Ok(value) => value,
            Err(err) if !err.is_fatal() => return Ok(None),
            Err(err) => return Err(err),
        };
        Ok(content_quad_to_box(&value))
    }

    async fn dom_snapshot(&self, target: &TargetId) -> Result<Value, CoreError> {
        self.pool
            .send_to_target(
                target,
                "DOMSnapshot.captureSnapshot",
                json!({
                    "computedStyles": COMPUTED_STYLE_KEYS,
                    "includePaintOrder": true,
                    "includeDOMRects": false,
                }),
                self.deadline,
            )
            .await
    }

    async fn ax_tree(&self, target: &TargetId) -> Result<Value, CoreError> {
        self.pool
            .send_to_target(
                target,
                "Accessibility.getFullAXTree",
                json!({}),
                self.deadline,
            )
            .await
    }
}

/// The content quad is eight numbers (four x,y corners); the box is its
/// axis-aligned hull.
fn content_quad_to_box(value: &Value) -> Option<BoundingBox> {
    let quad = value
        .get("model")
        .and_then(|m| m.get("content"))
        .and_then(Value::as_array)?;
    if quad.len() < 8 {
        return None;
    }
    let coords: Vec<f64> = quad.iter().filter_map(Value::as_f64).collect();
    if coords.len() < 8 {
        return None;
    }
    let xs = [coords[0], coords[2], coords[4], coords[6]];
    let ys = [coords[1], coords[3], coords[5], coords[7]];
    let min_x = xs.iter().copied().fold(f64::INFINITY, f64::min);
    let max_x = xs.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let min_y = ys.iter().copied().fold(f64::INFINITY, f64::min);
    let max_y = ys.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    Some(BoundingBox::new(min_x, min_y, max_x - min_x, max_y - min_y))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn quad_collapses_to_bounding_box() {
        let value = json!({
            "model": { "content": [10.0, 20.0, 110.0, 20.0, 110.0, 70.0, 10.0, 70.0] }
        });
        let bounds = content_quad_to_box(&value).unwrap();
        assert_eq!(bounds.x, 10.0);
        assert_eq!(bounds.y, 20.0);
        assert_eq!(bounds.width, 100.0);
        assert_eq!(bounds.height, 50.0);
    }

    #[test]
    fn malformed_quad_yields_none() {
        assert!(content_quad_to_box(&json!({})).is_none());
        assert!(content_quad_to_box(&json!({ "model": { "content": [1, 2] } })).is_none());
    }
}
