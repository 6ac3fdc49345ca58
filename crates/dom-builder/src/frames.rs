//! Frame enumeration with bounded recursion and composed offsets.
//!
//! The walk threads an explicit depth counter; hitting the cap marks the
//! branch truncated and stops, which is the whole defense against
//! self-referencing or cyclic frame graphs. Each frame's coordinate
//! offset comes from the owning iframe element's box model in the parent
//! and composes additively from root to leaf.

use futures::future::BoxFuture;
use futures::FutureExt;
use serde_json::Value;
use tracing::{debug, warn};

use pagelens_core_types::{BackendNodeId, CoreError, FrameId, TargetId};

use crate::model::FrameRecord;
use crate::ports::PerceptionPort;

/// One frame's linkage into the tree, kept alongside [`FrameRecord`]
/// so the builder can splice child documents under their owners.
#[derive(Clone, Debug)]
pub struct EnumeratedFrame {
    pub record: FrameRecord,
    pub owner_backend: Option<BackendNodeId>,
}

/// Walk the frame graph starting at `root`, depth-capped at `max_depth`.
///
/// A failure to read a child's frame tree degrades that branch to an
/// unavailable record; only the root fetch is fatal.
pub async fn enumerate_frames<P>(
    port: &P,
    root: &TargetId,
    max_depth: usize,
) -> Result<Vec<EnumeratedFrame>, CoreError>
where
    P: PerceptionPort,
{
    let mut frames = Vec::new();
    walk_target(
        port,
        root.clone(),
        None,
        false,
        0,
        (0.0, 0.0),
        max_depth,
        true,
        None,
        &mut frames,
    )
    .await?;
    Ok(frames)
}

#[allow(clippy::too_many_arguments)]
fn walk_target<'a, P>(
    port: &'a P,
    target: TargetId,
    parent: Option<FrameId>,
    is_cross_origin: bool,
    depth: usize,
    offset: (f64, f64),
    max_depth: usize,
    fatal: bool,
    owner_backend: Option<BackendNodeId>,
    frames: &'a mut Vec<EnumeratedFrame>,
) -> BoxFuture<'a, Result<(), CoreError>>
where
    P: PerceptionPort,
{
    async move {
        let tree = match port.frame_tree(&target).await {
            Ok(value) => value,
            Err(err) if !fatal => {
                warn!(target: "dom-builder", target_id = %target, ?err, "child frame tree unavailable");
                if let Some(parent_frame) = parent {
                    frames.push(EnumeratedFrame {
                        record: FrameRecord {
                            frame: FrameId(format!("unavailable:{}", target.0)),
                            target: target.clone(),
                            parent: Some(parent_frame),
                            is_cross_origin,
                            depth,
                            offset_x: offset.0,
                            offset_y: offset.1,
                            truncated: false,
                            ax_unavailable: true,
                            unavailable: true,
                        },
                        owner_backend,
                    });
                }
                return Ok(());
            }
            Err(err) => return Err(err),
        };

        let root_frame = tree
            .get("frameTree")
            .and_then(|t| t.get("frame"))
            .and_then(|f| f.get("id"))
            .and_then(Value::as_str)
            .map(|s| FrameId(s.to_string()))
            .ok_or_else(|| CoreError::internal("frame tree missing root frame id"))?;

        frames.push(EnumeratedFrame {
            record: FrameRecord {
                frame: root_frame.clone(),
                target: target.clone(),
                parent,
                is_cross_origin,
                depth,
                offset_x: offset.0,
                offset_y: offset.1,
                truncated: false,
                ax_unavailable: false,
                unavailable: false,
            },
            owner_backend,
        });

        // Same-origin children share this target's snapshot; only record
        // their identity and offsets.
        if let Some(children) = tree
            .get("frameTree")
            .and_then(|t| t.get("childFrames"))
            .and_then(Value::as_array)
        {
            walk_same_origin(
                port,
                &target,
                children,
                &root_frame,
                depth,
                offset,
                max_depth,
                frames,
            )
            .await;
        }

        // Cross-origin children live in their own targets; recurse.
        let child_targets = port.child_targets(&target).await.unwrap_or_default();
        for child in child_targets {
            if depth + 1 > max_depth {
                debug!(
                    target: "dom-builder",
                    frame = %child.frame,
                    depth = depth + 1,
                    "frame depth cap reached; truncating branch"
                );
                frames.push(EnumeratedFrame {
                    record: FrameRecord {
                        frame: child.frame,
                        target: child.target,
                        parent: Some(root_frame.clone()),
                        is_cross_origin: true,
                        depth: depth + 1,
                        offset_x: offset.0,
                        offset_y: offset.1,
                        truncated: true,
                        ax_unavailable: true,
                        unavailable: false,
                    },
                    owner_backend: None,
                });
                continue;
            }

            // The owner element lives in this (parent) target; resolve it
            // once here for both the offset and the splice linkage.
            let child_owner = port.frame_owner(&target, &child.frame).await.unwrap_or(None);
            let child_offset =
                child_frame_offset_from_owner(port, &target, child_owner, offset).await;
            walk_target(
                port,
                child.target,
                Some(root_frame.clone()),
                true,
                depth + 1,
                child_offset,
                max_depth,
                false,
                child_owner,
                frames,
            )
            .await?;
        }

        Ok(())
    }
    .boxed()
}

#[allow(clippy::too_many_arguments)]
async fn walk_same_origin<P>(
    port: &P,
    target: &TargetId,
    children: &[Value],
    parent_frame: &FrameId,
    depth: usize,
    parent_offset: (f64, f64),
    max_depth: usize,
    frames: &mut Vec<EnumeratedFrame>,
) where
    P: PerceptionPort,
{
    // Iterative with an explicit stack; the JSON is finite per target but
    // the depth accounting must still hold for the combined tree.
    let mut stack: Vec<(&Value, FrameId, usize, (f64, f64))> = children
        .iter()
        .map(|c| (c, parent_frame.clone(), depth + 1, parent_offset))
        .collect();

    while let Some((child, parent, child_depth, base_offset)) = stack.pop() {
        let Some(frame_id) = child
            .get("frame")
            .and_then(|f| f.get("id"))
            .and_then(Value::as_str)
            .map(|s| FrameId(s.to_string()))
        else {
            continue;
        };

        let truncated = child_depth > max_depth;
        let owner_backend = port.frame_owner(target, &frame_id).await.unwrap_or(None);
        let offset = if truncated {
            base_offset
        } else {
            child_frame_offset_from_owner(port, target, owner_backend, base_offset).await
        };

        frames.push(EnumeratedFrame {
            record: FrameRecord {
                frame: frame_id.clone(),
                target: target.clone(),
                parent: Some(parent),
                is_cross_origin: false,
                depth: child_depth,
                offset_x: offset.0,
                offset_y: offset.1,
                truncated,
                ax_unavailable: false,
                unavailable: false,
            },
            owner_backend,
        });

        if truncated {
            continue;
        }
        if let Some(grandchildren) = child.get("childFrames").and_then(Value::as_array) {
            for gc in grandchildren {
                stack.push((gc, frame_id.clone(), child_depth + 1, offset));
            }
        }
    }
}

async fn child_frame_offset_from_owner<P>(
    port: &P,
    parent_target: &TargetId,
    owner: Option<BackendNodeId>,
    parent_offset: (f64, f64),
) -> (f64, f64)
where
    P: PerceptionPort,
{
    let Some(owner) = owner else {
        return parent_offset;
    };
    match port.box_model(parent_target, owner).await {
        Ok(Some(bounds)) => (parent_offset.0 + bounds.x, parent_offset.1 + bounds.y),
        Ok(None) => parent_offset,
        Err(err) => {
            warn!(target: "dom-builder", ?err, "box model lookup failed; keeping parent offset");
            parent_offset
        }
    }
}
