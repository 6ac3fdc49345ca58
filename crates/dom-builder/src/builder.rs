//! Fuses DOM snapshot, accessibility tree and layout data into one
//! indexed tree per request.
//!
//! Every build starts from scratch and produces a fresh immutable
//! [`DomTree`]; concurrent readers keep whatever snapshot they already
//! hold. Per-frame fetches run concurrently, each under its own timeout,
//! so one hung frame can only lose its own data.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use serde_json::Value;
use tokio::time::timeout;
use tracing::{debug, warn};

use pagelens_core_types::{BackendNodeId, CoreError, FrameId, TargetId};

use crate::frames::{enumerate_frames, EnumeratedFrame};
use crate::judges;
use crate::model::{AxProps, BoundingBox, DomTree, Node, NodeId, NodeKind};
use crate::ports::{PerceptionPort, COMPUTED_STYLE_KEYS};

#[derive(Clone, Debug)]
pub struct BuildConfig {
    /// Frame recursion cap; deeper branches are truncated, not errors.
    pub max_iframe_depth: usize,
    /// Budget for one frame's DOM snapshot fetch.
    pub frame_timeout: Duration,
    /// Budget for one frame's accessibility fetch; on expiry the frame
    /// simply carries no AX data.
    pub ax_timeout: Duration,
}

impl Default for BuildConfig {
    fn default() -> Self {
        Self {
            max_iframe_depth: 5,
            frame_timeout: Duration::from_secs(5),
            ax_timeout: Duration::from_millis(1500),
        }
    }
}

/// An element reported by an external detector, merged into the
/// selector-map keyspace without touching the document structure.
#[derive(Clone, Debug)]
pub struct DetectedElement {
    pub label: String,
    pub bounds: BoundingBox,
    pub tag: Option<String>,
}

pub struct TreeBuilder<P>
where
    P: PerceptionPort,
{
    port: Arc<P>,
    cfg: BuildConfig,
}

struct FetchedTarget {
    target: TargetId,
    dom: Option<Value>,
    ax: Option<Value>,
    ax_unavailable: bool,
}

impl<P> TreeBuilder<P>
where
    P: PerceptionPort,
{
    pub fn new(port: Arc<P>, cfg: BuildConfig) -> Self {
        Self { port, cfg }
    }

    /// Build one snapshot rooted at `root_target`.
    pub async fn build(&self, root_target: &TargetId) -> Result<DomTree, CoreError> {
        let enumerated = enumerate_frames(&*self.port, root_target, self.cfg.max_iframe_depth).await?;

        // Distinct targets, enumeration (depth) order, skipping branches
        // with nothing to fetch.
        let mut targets: Vec<TargetId> = Vec::new();
        for frame in &enumerated {
            if frame.record.truncated || frame.record.unavailable {
                continue;
            }
            if !targets.contains(&frame.record.target) {
                targets.push(frame.record.target.clone());
            }
        }

        let fetches = targets.iter().map(|target| {
            let port = Arc::clone(&self.port);
            let target = target.clone();
            let frame_timeout = self.cfg.frame_timeout;
            let ax_timeout = self.cfg.ax_timeout;
            async move {
                let (dom, ax) = tokio::join!(
                    timeout(frame_timeout, port.dom_snapshot(&target)),
                    timeout(ax_timeout, port.ax_tree(&target)),
                );
                let dom = match dom {
                    Ok(Ok(value)) => Some(value),
                    Ok(Err(err)) => {
                        warn!(target: "dom-builder", target_id = %target, ?err, "dom snapshot failed");
                        None
                    }
                    Err(_) => {
                        warn!(target: "dom-builder", target_id = %target, "dom snapshot timed out");
                        None
                    }
                };
                let (ax, ax_unavailable) = match ax {
                    Ok(Ok(value)) => (Some(value), false),
                    Ok(Err(err)) => {
                        warn!(target: "dom-builder", target_id = %target, ?err, "ax fetch failed; degrading");
                        (None, true)
                    }
                    Err(_) => {
                        debug!(target: "dom-builder", target_id = %target, "ax fetch timed out; degrading");
                        (None, true)
                    }
                };
                FetchedTarget {
                    target,
                    dom,
                    ax,
                    ax_unavailable,
                }
            }
        });
        let fetched: Vec<FetchedTarget> = join_all(fetches).await;

        // The primary target's DOM is the tree; losing it is fatal.
        let root_fetch = fetched
            .iter()
            .find(|f| &f.target == root_target)
            .ok_or_else(|| CoreError::internal("root target missing from fetch set"))?;
        if root_fetch.dom.is_none() {
            return Err(CoreError::timeout(format!(
                "dom snapshot unavailable for primary target {root_target}"
            )));
        }

        let mut tree = DomTree::new();
        tree.frames = enumerated.iter().map(|f| f.record.clone()).collect();

        // Fold per-target fetch outcomes back onto the frame records so a
        // failed frame is visibly absent, never silently empty.
        for frame in tree.frames.iter_mut() {
            if let Some(fetch) = fetched.iter().find(|f| f.target == frame.target) {
                if fetch.ax_unavailable {
                    frame.ax_unavailable = true;
                }
                if fetch.dom.is_none() && !frame.truncated {
                    frame.unavailable = true;
                }
            }
        }

        let mut doc_roots: Vec<(FrameId, NodeId)> = Vec::new();
        for fetch in &fetched {
            let Some(dom) = &fetch.dom else { continue };
            let ax_index = fetch.ax.as_ref().map(build_ax_index).unwrap_or_default();
            parse_documents(&mut tree, dom, &ax_index, &enumerated, &fetch.target, &mut doc_roots);
        }

        // Splice every non-primary document under its owning iframe
        // element, when the owner made it into the arena.
        let owner_by_frame: HashMap<&FrameId, BackendNodeId> = enumerated
            .iter()
            .filter_map(|f| f.owner_backend.map(|b| (&f.record.frame, b)))
            .collect();
        let mut root = None;
        for (frame_id, node_id) in &doc_roots {
            if root.is_none() {
                root = Some(*node_id);
                continue;
            }
            if let Some(owner_backend) = owner_by_frame.get(frame_id) {
                let owner = tree
                    .nodes()
                    .find(|n| n.backend_id == Some(*owner_backend))
                    .map(|n| n.id);
                if let Some(owner) = owner {
                    tree.node_mut(owner).children.push(*node_id);
                    tree.node_mut(*node_id).parent = Some(owner);
                    continue;
                }
            }
            // Owner unknown: keep the document reachable from the root.
            if let Some(root) = root {
                tree.node_mut(root).children.push(*node_id);
                tree.node_mut(*node_id).parent = Some(root);
            }
        }
        tree.root = root;

        judge_tree(&mut tree);
        tree.rebuild_selector_map();
        Ok(tree)
    }
}

/// Apply visibility/interactivity judgement across the whole arena, then
/// the occlusion pass over the click candidates.
fn judge_tree(tree: &mut DomTree) {
    let boxes: HashMap<usize, (BoundingBox, i64)> = tree
        .nodes()
        .filter(|n| matches!(n.kind, NodeKind::Element { .. }))
        .filter_map(|n| match (n.bounds, n.paint_order) {
            (Some(b), Some(p)) => Some((n.id.0, (b, p))),
            _ => None,
        })
        .collect();

    let snapshot: &DomTree = tree;
    let verdicts: Vec<(NodeId, bool, bool)> = snapshot
        .nodes()
        .filter(|n| matches!(n.kind, NodeKind::Element { .. }))
        .map(|node| {
            let style_visible = judges::is_style_visible(node);
            let candidate = judges::is_interaction_candidate(node);
            let interactive = candidate
                && style_visible
                && judges::accepts_pointer_events(node)
                && judges::is_topmost_at_center(snapshot, node, &boxes);
            (node.id, style_visible, interactive)
        })
        .collect();

    for (id, visible, interactive) in verdicts {
        let node = tree.node_mut(id);
        node.is_visible = visible;
        node.is_interactive = interactive;
    }
}

/// Merge externally detected elements into the selector-map keyspace.
/// Synthetic backend ids are allocated above the snapshot's own range.
pub fn merge_detected_elements(tree: &mut DomTree, detections: Vec<DetectedElement>) -> Vec<BackendNodeId> {
    let frame = tree
        .frames
        .first()
        .map(|f| f.frame.clone())
        .unwrap_or_else(|| FrameId(String::new()));

    let mut assigned = Vec::new();
    for detection in detections {
        if detection.bounds.is_empty() {
            continue;
        }
        let backend = tree.next_synthetic_backend_id();
        let tag = detection.tag.unwrap_or_else(|| "div".to_string());
        let mut node = Node::new(NodeId(0), NodeKind::Element { tag }, frame.clone());
        node.backend_id = Some(backend);
        node.bounds = Some(detection.bounds);
        node.is_visible = true;
        node.is_interactive = true;
        node.attributes.insert("data-detected".into(), "true".into());
        node.ax = Some(AxProps {
            role: "button".into(),
            name: detection.label,
            properties: Value::Null,
        });
        if let Some(backend) = tree.attach_detached(node) {
            assigned.push(backend);
        }
    }
    assigned
}

fn build_ax_index(ax: &Value) -> HashMap<u64, AxProps> {
    let mut index = HashMap::new();
    let Some(nodes) = ax.get("nodes").and_then(Value::as_array) else {
        return index;
    };
    for node in nodes {
        let Some(backend) = node.get("backendDOMNodeId").and_then(Value::as_u64) else {
            continue;
        };
        let role = node
            .get("role")
            .and_then(|r| r.get("value"))
            .and_then(Value::as_str)
            .unwrap_or("")
            .to_string();
        let name = node
            .get("name")
            .and_then(|n| n.get("value"))
            .and_then(Value::as_str)
            .unwrap_or("")
            .to_string();
        let properties = node.get("properties").cloned().unwrap_or(Value::Null);
        if !role.is_empty() || !name.is_empty() {
            index.insert(backend, AxProps { role, name, properties });
        }
    }
    index
}

/// Decode one target's `DOMSnapshot.captureSnapshot` payload into the
/// arena. Documents carry their frame id; bounds are translated by the
/// frame's composed offset so every box ends up in root coordinates.
fn parse_documents(
    tree: &mut DomTree,
    dom: &Value,
    ax_index: &HashMap<u64, AxProps>,
    enumerated: &[EnumeratedFrame],
    target: &TargetId,
    doc_roots: &mut Vec<(FrameId, NodeId)>,
) {
    let strings: Vec<&str> = dom
        .get("strings")
        .and_then(Value::as_array)
        .map(|arr| arr.iter().map(|v| v.as_str().unwrap_or("")).collect())
        .unwrap_or_default();
    let lookup = |idx: i64| lookup_str(&strings, idx);

    let Some(documents) = dom.get("documents").and_then(Value::as_array) else {
        return;
    };

    let default_frame = enumerated
        .iter()
        .find(|f| &f.record.target == target)
        .map(|f| f.record.frame.clone())
        .unwrap_or_else(|| FrameId(String::new()));

    for doc in documents {
        let frame_id = doc
            .get("frameId")
            .and_then(Value::as_i64)
            .map(lookup)
            .filter(|s| !s.is_empty())
            .map(|s| FrameId(s.to_string()))
            .unwrap_or_else(|| default_frame.clone());

        let offset = enumerated
            .iter()
            .find(|f| f.record.frame == frame_id)
            .map(|f| (f.record.offset_x, f.record.offset_y))
            .unwrap_or((0.0, 0.0));

        let Some(nodes) = doc.get("nodes") else { continue };
        let node_types = int_array(nodes, "nodeType");
        let node_names = int_array(nodes, "nodeName");
        let node_values = int_array(nodes, "nodeValue");
        let backend_ids = int_array(nodes, "backendNodeId");
        let parent_indices = int_array(nodes, "parentIndex");
        let attributes = nodes.get("attributes").and_then(Value::as_array);

        let count = node_types.len();
        let mut arena_ids = Vec::with_capacity(count);

        for i in 0..count {
            let kind = match node_types.get(i).copied().unwrap_or(0) {
                1 => NodeKind::Element {
                    tag: lookup(node_names.get(i).copied().unwrap_or(-1)).to_lowercase(),
                },
                3 => NodeKind::Text {
                    value: lookup(node_values.get(i).copied().unwrap_or(-1)).to_string(),
                },
                8 => NodeKind::Comment {
                    value: lookup(node_values.get(i).copied().unwrap_or(-1)).to_string(),
                },
                9 => NodeKind::Document,
                11 => NodeKind::DocumentFragment,
                // Doctype and friends: keep the slot so parent indices
                // stay aligned, but carry nothing.
                _ => NodeKind::Comment { value: String::new() },
            };

            let mut node = Node::new(NodeId(0), kind, frame_id.clone());
            if let Some(backend) = backend_ids.get(i).copied().filter(|b| *b > 0) {
                let backend = BackendNodeId(backend as u64);
                node.backend_id = Some(backend);
                if let Some(ax) = ax_index.get(&backend.0) {
                    node.ax = Some(ax.clone());
                }
            }
            node.attributes = decode_attributes(attributes, i, &lookup);
            arena_ids.push(tree.push(node));
        }

        // Parent linkage; shadow roots (document fragments) hang off
        // their host's shadow list instead of its child list.
        for i in 0..count {
            let parent = parent_indices.get(i).copied().unwrap_or(-1);
            if parent < 0 || parent as usize >= count {
                doc_roots.push((frame_id.clone(), arena_ids[i]));
                continue;
            }
            let parent_id = arena_ids[parent as usize];
            let child_id = arena_ids[i];
            let is_fragment = matches!(tree.node(child_id).kind, NodeKind::DocumentFragment);
            if is_fragment {
                tree.node_mut(parent_id).shadow_roots.push(child_id);
            } else {
                tree.node_mut(parent_id).children.push(child_id);
            }
            tree.node_mut(child_id).parent = Some(parent_id);
        }

        apply_layout(tree, doc, &arena_ids, offset, &lookup);
    }
}

fn apply_layout<'s, F>(
    tree: &mut DomTree,
    doc: &Value,
    arena_ids: &[NodeId],
    offset: (f64, f64),
    lookup: &F,
) where
    F: Fn(i64) -> &'s str,
{
    let Some(layout) = doc.get("layout") else { return };
    let node_indices = int_array(layout, "nodeIndex");
    let bounds = layout.get("bounds").and_then(Value::as_array);
    let styles = layout.get("styles").and_then(Value::as_array);
    let paint_orders = int_array(layout, "paintOrders");

    for (slot, node_index) in node_indices.iter().enumerate() {
        let Some(&arena_id) = arena_ids.get(*node_index as usize) else {
            continue;
        };

        if let Some(rect) = bounds.and_then(|b| b.get(slot)).and_then(Value::as_array) {
            if rect.len() == 4 {
                let get = |k: usize| rect[k].as_f64().unwrap_or(0.0);
                tree.node_mut(arena_id).bounds = Some(
                    BoundingBox::new(get(0), get(1), get(2), get(3)).translated(offset.0, offset.1),
                );
            }
        }

        if let Some(style_row) = styles.and_then(|s| s.get(slot)).and_then(Value::as_array) {
            let node = tree.node_mut(arena_id);
            for (key, idx) in COMPUTED_STYLE_KEYS.iter().zip(style_row.iter()) {
                let value = lookup(idx.as_i64().unwrap_or(-1));
                if !value.is_empty() {
                    node.computed_style.insert((*key).to_string(), value.to_string());
                }
            }
        }

        if let Some(&order) = paint_orders.get(slot) {
            tree.node_mut(arena_id).paint_order = Some(order);
        }
    }
}

fn lookup_str<'s>(strings: &[&'s str], idx: i64) -> &'s str {
    if idx < 0 {
        return "";
    }
    strings.get(idx as usize).copied().unwrap_or("")
}

fn int_array(value: &Value, key: &str) -> Vec<i64> {
    value
        .get(key)
        .and_then(Value::as_array)
        .map(|arr| arr.iter().map(|v| v.as_i64().unwrap_or(-1)).collect())
        .unwrap_or_default()
}

fn decode_attributes<'s, F>(
    attributes: Option<&Vec<Value>>,
    node_index: usize,
    lookup: &F,
) -> HashMap<String, String>
where
    F: Fn(i64) -> &'s str,
{
    let mut out = HashMap::new();
    let Some(rows) = attributes else { return out };
    let Some(row) = rows.get(node_index).and_then(Value::as_array) else {
        return out;
    };
    for pair in row.chunks(2) {
        if pair.len() != 2 {
            continue;
        }
        let key = lookup(pair[0].as_i64().unwrap_or(-1));
        let value = lookup(pair[1].as_i64().unwrap_or(-1));
        if !key.is_empty() {
            out.insert(key.to_string(), value.to_string());
        }
    }
    out
}
