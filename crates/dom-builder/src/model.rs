//! Arena-backed DOM tree model.
//!
//! The arena owns every node by index; children and shadow roots are index
//! vectors, the parent is an index-only back-reference used for traversal
//! (ancestor walks) and never for lifetime management. A built tree is an
//! immutable snapshot: it is replaced wholesale by the next build, never
//! mutated in place.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use tracing::warn;

use pagelens_core_types::{BackendNodeId, FrameId, SnapshotId, TargetId};

/// Index of a node within one tree's arena.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub struct NodeId(pub usize);

/// Absolute (root-document coordinate space) bounding box.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

impl BoundingBox {
    pub fn new(x: f64, y: f64, width: f64, height: f64) -> Self {
        Self { x, y, width, height }
    }

    pub fn is_empty(&self) -> bool {
        self.width <= 0.0 || self.height <= 0.0
    }

    pub fn center(&self) -> (f64, f64) {
        (self.x + self.width / 2.0, self.y + self.height / 2.0)
    }

    pub fn contains(&self, px: f64, py: f64) -> bool {
        px >= self.x && px <= self.x + self.width && py >= self.y && py <= self.y + self.height
    }

    pub fn translated(&self, dx: f64, dy: f64) -> Self {
        Self {
            x: self.x + dx,
            y: self.y + dy,
            ..*self
        }
    }
}

/// Node kind, matched exhaustively at every consumer.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum NodeKind {
    Element { tag: String },
    Text { value: String },
    Document,
    DocumentFragment,
    Comment { value: String },
}

impl NodeKind {
    pub fn tag(&self) -> Option<&str> {
        match self {
            NodeKind::Element { tag } => Some(tag.as_str()),
            NodeKind::Text { .. }
            | NodeKind::Document
            | NodeKind::DocumentFragment
            | NodeKind::Comment { .. } => None,
        }
    }

    pub fn text(&self) -> Option<&str> {
        match self {
            NodeKind::Text { value } => Some(value.as_str()),
            NodeKind::Element { .. }
            | NodeKind::Document
            | NodeKind::DocumentFragment
            | NodeKind::Comment { .. } => None,
        }
    }
}

/// Accessibility data attached to a node.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct AxProps {
    pub role: String,
    pub name: String,
    pub properties: serde_json::Value,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Node {
    pub id: NodeId,
    pub kind: NodeKind,
    pub backend_id: Option<BackendNodeId>,
    pub frame: FrameId,
    pub attributes: HashMap<String, String>,
    pub ax: Option<AxProps>,
    pub computed_style: HashMap<String, String>,
    pub bounds: Option<BoundingBox>,
    pub paint_order: Option<i64>,
    pub is_visible: bool,
    pub is_interactive: bool,
    pub children: Vec<NodeId>,
    pub shadow_roots: Vec<NodeId>,
    pub parent: Option<NodeId>,
}

impl Node {
    pub fn new(id: NodeId, kind: NodeKind, frame: FrameId) -> Self {
        Self {
            id,
            kind,
            backend_id: None,
            frame,
            attributes: HashMap::new(),
            ax: None,
            computed_style: HashMap::new(),
            bounds: None,
            paint_order: None,
            is_visible: false,
            is_interactive: false,
            children: Vec::new(),
            shadow_roots: Vec::new(),
            parent: None,
        }
    }

    pub fn attr(&self, name: &str) -> Option<&str> {
        self.attributes.get(name).map(String::as_str)
    }
}

/// One enumerated frame with its composed coordinate offset.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct FrameRecord {
    pub frame: FrameId,
    pub target: TargetId,
    pub parent: Option<FrameId>,
    pub is_cross_origin: bool,
    pub depth: usize,
    /// Additively composed offset from the root document's origin.
    pub offset_x: f64,
    pub offset_y: f64,
    /// The depth cap cut this branch; a normal result, not an error.
    pub truncated: bool,
    /// The accessibility fetch for this frame timed out or failed.
    pub ax_unavailable: bool,
    /// The frame's DOM data could not be fetched; it is visibly absent
    /// from the tree rather than silently merged as empty.
    pub unavailable: bool,
}

/// An immutable snapshot of the fused DOM/AX/layout tree.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DomTree {
    pub id: SnapshotId,
    nodes: Vec<Node>,
    pub root: Option<NodeId>,
    selector_map: HashMap<BackendNodeId, NodeId>,
    pub frames: Vec<FrameRecord>,
}

impl DomTree {
    pub fn new() -> Self {
        Self {
            id: SnapshotId::new(),
            nodes: Vec::new(),
            root: None,
            selector_map: HashMap::new(),
            frames: Vec::new(),
        }
    }

    pub fn push(&mut self, mut node: Node) -> NodeId {
        let id = NodeId(self.nodes.len());
        node.id = id;
        self.nodes.push(node);
        id
    }

    pub fn node(&self, id: NodeId) -> &Node {
        &self.nodes[id.0]
    }

    pub fn node_mut(&mut self, id: NodeId) -> &mut Node {
        &mut self.nodes[id.0]
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn nodes(&self) -> impl Iterator<Item = &Node> {
        self.nodes.iter()
    }

    /// The id → node map restricted to interactive elements. Keys are
    /// unique within this snapshot and stable only for its lifetime.
    pub fn selector_map(&self) -> &HashMap<BackendNodeId, NodeId> {
        &self.selector_map
    }

    pub fn by_backend_id(&self, backend: BackendNodeId) -> Option<&Node> {
        self.selector_map.get(&backend).map(|id| self.node(*id))
    }

    /// Ancestor chain from the node's parent up to the root, via the
    /// traversal-only back-references.
    pub fn ancestors(&self, id: NodeId) -> Vec<NodeId> {
        let mut out = Vec::new();
        let mut current = self.node(id).parent;
        while let Some(parent) = current {
            out.push(parent);
            current = self.node(parent).parent;
        }
        out
    }

    /// One pass over the arena collecting interactive nodes into the
    /// selector map. The first node claiming a backend id wins; a
    /// duplicate would mean the upstream snapshot lied about uniqueness.
    pub fn rebuild_selector_map(&mut self) {
        let mut map = HashMap::new();
        for node in &self.nodes {
            if !node.is_interactive {
                continue;
            }
            let Some(backend) = node.backend_id else {
                continue;
            };
            if map.contains_key(&backend) {
                warn!(target: "dom-builder", backend = %backend, "duplicate backend id in snapshot");
                continue;
            }
            map.insert(backend, node.id);
        }
        self.selector_map = map;
    }

    /// Register an externally detected element in the selector-map
    /// keyspace. The node is arena-owned but deliberately left out of any
    /// child list: detection results augment the clickable index without
    /// changing the document structure.
    pub fn attach_detached(&mut self, node: Node) -> Option<BackendNodeId> {
        let backend = node.backend_id?;
        if self.selector_map.contains_key(&backend) {
            return None;
        }
        let id = self.push(node);
        self.selector_map.insert(backend, id);
        Some(backend)
    }

    /// The next backend id above everything the snapshot used; synthetic
    /// entries allocate from here to stay collision-free.
    pub fn next_synthetic_backend_id(&self) -> BackendNodeId {
        let max = self
            .nodes
            .iter()
            .filter_map(|n| n.backend_id)
            .map(|b| b.0)
            .max()
            .unwrap_or(0);
        BackendNodeId(max + 1)
    }
}

impl Default for DomTree {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame() -> FrameId {
        FrameId("f0".into())
    }

    #[test]
    fn selector_map_only_holds_interactive_nodes_with_unique_keys() {
        let mut tree = DomTree::new();
        let mut a = Node::new(NodeId(0), NodeKind::Element { tag: "button".into() }, frame());
        a.backend_id = Some(BackendNodeId(10));
        a.is_interactive = true;
        let mut b = Node::new(NodeId(0), NodeKind::Element { tag: "div".into() }, frame());
        b.backend_id = Some(BackendNodeId(11));
        b.is_interactive = false;
        let mut dup = Node::new(NodeId(0), NodeKind::Element { tag: "a".into() }, frame());
        dup.backend_id = Some(BackendNodeId(10));
        dup.is_interactive = true;

        tree.push(a);
        tree.push(b);
        tree.push(dup);
        tree.rebuild_selector_map();

        assert_eq!(tree.selector_map().len(), 1);
        let node = tree.by_backend_id(BackendNodeId(10)).unwrap();
        assert!(node.is_interactive);
        assert_eq!(node.kind.tag(), Some("button"));
    }

    #[test]
    fn ancestors_follow_parent_back_references() {
        let mut tree = DomTree::new();
        let root = tree.push(Node::new(NodeId(0), NodeKind::Document, frame()));
        let mut mid = Node::new(NodeId(0), NodeKind::Element { tag: "div".into() }, frame());
        mid.parent = Some(root);
        let mid = tree.push(mid);
        let mut leaf = Node::new(NodeId(0), NodeKind::Text { value: "hi".into() }, frame());
        leaf.parent = Some(mid);
        let leaf = tree.push(leaf);

        assert_eq!(tree.ancestors(leaf), vec![mid, root]);
    }

    #[test]
    fn synthetic_backend_ids_do_not_collide() {
        let mut tree = DomTree::new();
        let mut a = Node::new(NodeId(0), NodeKind::Element { tag: "button".into() }, frame());
        a.backend_id = Some(BackendNodeId(42));
        a.is_interactive = true;
        tree.push(a);
        tree.rebuild_selector_map();

        let next = tree.next_synthetic_backend_id();
        assert_eq!(next, BackendNodeId(43));

        let mut detected = Node::new(NodeId(0), NodeKind::Element { tag: "div".into() }, frame());
        detected.backend_id = Some(next);
        detected.is_interactive = true;
        detected.is_visible = true;
        assert_eq!(tree.attach_detached(detected), Some(BackendNodeId(43)));
        assert_eq!(tree.selector_map().len(), 2);
    }
}
