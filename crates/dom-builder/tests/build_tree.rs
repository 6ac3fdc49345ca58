//! End-to-end tree builds against a stubbed protocol port: snapshot
//! fusion, shadow roots, cross-origin splicing, depth caps and per-frame
//! timeout degradation.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};

use pagelens_core_types::{BackendNodeId, CoreError, CoreErrorKind, FrameId, TargetId};
use dom_builder::{
    BuildConfig, BoundingBox, ChildTarget, NodeKind, PerceptionPort, TreeBuilder,
};

/// Incremental `DOMSnapshot.captureSnapshot` fixture. Indices returned by
/// the push methods are snapshot node indices, usable as parents.
#[derive(Default)]
struct Snap {
    strings: Vec<String>,
    frame_id: i64,
    node_type: Vec<i64>,
    node_name: Vec<i64>,
    node_value: Vec<i64>,
    backend: Vec<i64>,
    parent: Vec<i64>,
    attrs: Vec<Value>,
    layout_node: Vec<i64>,
    layout_bounds: Vec<Value>,
    layout_styles: Vec<Value>,
    paint: Vec<i64>,
}

impl Snap {
    fn new(frame: &str) -> Self {
        let mut snap = Self::default();
        snap.frame_id = snap.intern(frame);
        snap
    }

    fn intern(&mut self, s: &str) -> i64 {
        if let Some(pos) = self.strings.iter().position(|x| x == s) {
            return pos as i64;
        }
        self.strings.push(s.to_string());
        (self.strings.len() - 1) as i64
    }

    fn push_node(&mut self, node_type: i64, name: &str, value: &str, parent: i64, backend: i64) -> usize {
        let name = self.intern(name);
        let value = self.intern(value);
        self.node_type.push(node_type);
        self.node_name.push(name);
        self.node_value.push(value);
        self.backend.push(backend);
        self.parent.push(parent);
        self.attrs.push(json!([]));
        self.node_type.len() - 1
    }

    fn document(&mut self) -> usize {
        self.push_node(9, "#document", "", -1, 0)
    }

    fn element(&mut self, tag: &str, parent: usize, backend: i64, attrs: &[(&str, &str)]) -> usize {
        let idx = self.push_node(1, &tag.to_uppercase(), "", parent as i64, backend);
        let mut row = Vec::new();
        for (k, v) in attrs {
            row.push(self.intern(k));
            row.push(self.intern(v));
        }
        self.attrs[idx] = json!(row);
        idx
    }

    fn text(&mut self, value: &str, parent: usize) -> usize {
        self.push_node(3, "#text", value, parent as i64, 0)
    }

    fn fragment(&mut self, parent: usize) -> usize {
        self.push_node(11, "#document-fragment", "", parent as i64, 0)
    }

    /// Style tuple follows the captured key order:
    /// display, visibility, opacity, pointer-events.
    fn layout(&mut self, node: usize, bounds: [f64; 4], styles: (&str, &str, &str, &str), paint: i64) {
        let style_row = json!([
            self.intern(styles.0),
            self.intern(styles.1),
            self.intern(styles.2),
            self.intern(styles.3),
        ]);
        self.layout_node.push(node as i64);
        self.layout_bounds.push(json!(bounds));
        self.layout_styles.push(style_row);
        self.paint.push(paint);
    }

    fn build(self) -> Value {
        json!({
            "documents": [{
                "frameId": self.frame_id,
                "nodes": {
                    "nodeType": self.node_type,
                    "nodeName": self.node_name,
                    "nodeValue": self.node_value,
                    "backendNodeId": self.backend,
                    "parentIndex": self.parent,
                    "attributes": self.attrs,
                },
                "layout": {
                    "nodeIndex": self.layout_node,
                    "bounds": self.layout_bounds,
                    "styles": self.layout_styles,
                    "paintOrders": self.paint,
                },
            }],
            "strings": self.strings,
        })
    }
}

fn ax_node(backend: u64, role: &str, name: &str) -> Value {
    json!({
        "backendDOMNodeId": backend,
        "role": { "value": role },
        "name": { "value": name },
    })
}

fn frame_tree(frame: &str) -> Value {
    json!({ "frameTree": { "frame": { "id": frame }, "childFrames": [] } })
}

#[derive(Default)]
struct StubPort {
    frame_trees: HashMap<String, Value>,
    children: HashMap<String, Vec<ChildTarget>>,
    owners: HashMap<String, BackendNodeId>,
    boxes: HashMap<u64, BoundingBox>,
    doms: HashMap<String, Value>,
    axes: HashMap<String, Value>,
    ax_delay: HashMap<String, Duration>,
    fail_dom: bool,
}

#[async_trait]
impl PerceptionPort for StubPort {
    async fn frame_tree(&self, target: &TargetId) -> Result<Value, CoreError> {
        self.frame_trees
            .get(&target.0)
            .cloned()
            .ok_or_else(|| CoreError::internal("no frame tree"))
    }

    async fn child_targets(&self, target: &TargetId) -> Result<Vec<ChildTarget>, CoreError> {
        Ok(self.children.get(&target.0).cloned().unwrap_or_default())
    }

    async fn frame_owner(
        &self,
        _target: &TargetId,
        frame: &FrameId,
    ) -> Result<Option<BackendNodeId>, CoreError> {
        Ok(self.owners.get(&frame.0).copied())
    }

    async fn box_model(
        &self,
        _target: &TargetId,
        backend: BackendNodeId,
    ) -> Result<Option<BoundingBox>, CoreError> {
        Ok(self.boxes.get(&backend.0).copied())
    }

    async fn dom_snapshot(&self, target: &TargetId) -> Result<Value, CoreError> {
        if self.fail_dom {
            return Err(CoreError::timeout("stub dom failure"));
        }
        self.doms
            .get(&target.0)
            .cloned()
            .ok_or_else(|| CoreError::internal("no dom"))
    }

    async fn ax_tree(&self, target: &TargetId) -> Result<Value, CoreError> {
        if let Some(delay) = self.ax_delay.get(&target.0) {
            tokio::time::sleep(*delay).await;
        }
        self.axes
            .get(&target.0)
            .cloned()
            .ok_or_else(|| CoreError::internal("no ax"))
    }
}

fn visible() -> (&'static str, &'static str, &'static str, &'static str) {
    ("block", "visible", "1", "auto")
}

#[tokio::test]
async fn selector_map_covers_interactive_elements_including_shadow_roots() {
    let mut snap = Snap::new("f-root");
    let doc = snap.document();
    let html = snap.element("html", doc, 1, &[]);
    let body = snap.element("body", html, 2, &[]);
    let button = snap.element("button", body, 10, &[]);
    snap.text("Go", button);
    let host = snap.element("div", body, 15, &[]);
    let shadow = snap.fragment(host);
    let link = snap.element("a", shadow, 20, &[("href", "/next")]);
    snap.layout(button, [10.0, 10.0, 80.0, 20.0], visible(), 3);
    snap.layout(link, [10.0, 50.0, 60.0, 16.0], visible(), 4);

    let mut port = StubPort::default();
    port.frame_trees.insert("t1".into(), frame_tree("f-root"));
    port.doms.insert("t1".into(), snap.build());
    port.axes
        .insert("t1".into(), json!({ "nodes": [ax_node(10, "button", "Go")] }));

    let builder = TreeBuilder::new(Arc::new(port), BuildConfig::default());
    let tree = builder.build(&TargetId("t1".into())).await.unwrap();

    let button = tree.by_backend_id(BackendNodeId(10)).unwrap();
    assert!(button.is_interactive);
    assert_eq!(button.ax.as_ref().unwrap().name, "Go");

    // The shadow-hosted link is reachable through the selector map even
    // though it sits under a document fragment.
    let link = tree.by_backend_id(BackendNodeId(20)).unwrap();
    assert!(link.is_interactive);
    assert_eq!(link.attr("href"), Some("/next"));

    // Non-interactive structure is not in the map.
    assert!(tree.by_backend_id(BackendNodeId(2)).is_none());
}

#[tokio::test]
async fn occluded_candidate_is_excluded_from_selector_map() {
    let mut snap = Snap::new("f-root");
    let doc = snap.document();
    let body = snap.element("body", doc, 2, &[]);
    let button = snap.element("button", body, 10, &[]);
    let overlay = snap.element("div", body, 11, &[]);
    snap.layout(button, [10.0, 10.0, 80.0, 20.0], visible(), 2);
    snap.layout(overlay, [0.0, 0.0, 500.0, 500.0], visible(), 9);

    let mut port = StubPort::default();
    port.frame_trees.insert("t1".into(), frame_tree("f-root"));
    port.doms.insert("t1".into(), snap.build());
    port.axes.insert("t1".into(), json!({ "nodes": [] }));

    let builder = TreeBuilder::new(Arc::new(port), BuildConfig::default());
    let tree = builder.build(&TargetId("t1".into())).await.unwrap();

    let button = tree.by_backend_id(BackendNodeId(10));
    assert!(button.is_none(), "covered button must not be clickable");
    let node = tree.nodes().find(|n| n.backend_id == Some(BackendNodeId(10))).unwrap();
    assert!(node.is_visible);
    assert!(!node.is_interactive);
}

#[tokio::test]
async fn button_with_painted_label_span_stays_clickable() {
    let mut snap = Snap::new("f-root");
    let doc = snap.document();
    let body = snap.element("body", doc, 2, &[]);
    let button = snap.element("button", body, 10, &[]);
    let span = snap.element("span", button, 11, &[]);
    snap.text("Buy now", span);
    // The label span paints after its parent and covers its center, the
    // usual shape of a real snapshot.
    snap.layout(button, [10.0, 10.0, 80.0, 20.0], visible(), 2);
    snap.layout(span, [14.0, 12.0, 72.0, 16.0], visible(), 3);

    let mut port = StubPort::default();
    port.frame_trees.insert("t1".into(), frame_tree("f-root"));
    port.doms.insert("t1".into(), snap.build());
    port.axes.insert("t1".into(), json!({ "nodes": [] }));

    let builder = TreeBuilder::new(Arc::new(port), BuildConfig::default());
    let tree = builder.build(&TargetId("t1".into())).await.unwrap();

    let button = tree.by_backend_id(BackendNodeId(10)).unwrap();
    assert!(button.is_interactive, "own descendant must not occlude");
}

#[tokio::test]
async fn cross_origin_document_is_spliced_with_composed_offsets() {
    let mut root = Snap::new("f-root");
    let doc = root.document();
    let body = root.element("body", doc, 2, &[]);
    let iframe = root.element("iframe", body, 7, &[("src", "https://other.example/")]);
    root.layout(iframe, [100.0, 200.0, 400.0, 300.0], visible(), 2);

    let mut child = Snap::new("f-child");
    let cdoc = child.document();
    let cbody = child.element("body", cdoc, 3, &[]);
    let button = child.element("button", cbody, 40, &[]);
    child.layout(button, [10.0, 10.0, 50.0, 20.0], visible(), 1);

    let mut port = StubPort::default();
    port.frame_trees.insert("t-root".into(), frame_tree("f-root"));
    port.frame_trees.insert("t-child".into(), frame_tree("f-child"));
    port.children.insert(
        "t-root".into(),
        vec![ChildTarget {
            frame: FrameId("f-child".into()),
            target: TargetId("t-child".into()),
        }],
    );
    port.owners.insert("f-child".into(), BackendNodeId(7));
    port.boxes.insert(7, BoundingBox::new(100.0, 200.0, 400.0, 300.0));
    port.doms.insert("t-root".into(), root.build());
    port.doms.insert("t-child".into(), child.build());
    port.axes.insert("t-root".into(), json!({ "nodes": [] }));
    port.axes.insert("t-child".into(), json!({ "nodes": [] }));

    let builder = TreeBuilder::new(Arc::new(port), BuildConfig::default());
    let tree = builder.build(&TargetId("t-root".into())).await.unwrap();

    let button = tree.by_backend_id(BackendNodeId(40)).unwrap();
    let bounds = button.bounds.unwrap();
    assert_eq!(bounds.x, 110.0);
    assert_eq!(bounds.y, 210.0);

    // The child document hangs below the owning iframe element.
    let ancestors = tree.ancestors(button.id);
    let iframe_node = tree.by_backend_id(BackendNodeId(7)).is_some();
    assert!(!iframe_node, "iframe itself is not interactive");
    let owner = tree
        .nodes()
        .find(|n| n.backend_id == Some(BackendNodeId(7)))
        .unwrap();
    assert!(ancestors.contains(&owner.id));

    let child_record = tree
        .frames
        .iter()
        .find(|f| f.frame.0 == "f-child")
        .unwrap();
    assert!(child_record.is_cross_origin);
    assert_eq!(child_record.offset_x, 100.0);
    assert_eq!(child_record.offset_y, 200.0);
}

#[tokio::test]
async fn cyclic_frame_graph_terminates_at_depth_cap() {
    let mut snap = Snap::new("f-loop");
    let doc = snap.document();
    snap.element("body", doc, 2, &[]);

    let mut port = StubPort::default();
    port.frame_trees.insert("t-loop".into(), frame_tree("f-loop"));
    // The target reports itself as its own cross-origin child.
    port.children.insert(
        "t-loop".into(),
        vec![ChildTarget {
            frame: FrameId("f-loop".into()),
            target: TargetId("t-loop".into()),
        }],
    );
    port.doms.insert("t-loop".into(), snap.build());
    port.axes.insert("t-loop".into(), json!({ "nodes": [] }));

    let cfg = BuildConfig {
        max_iframe_depth: 3,
        ..BuildConfig::default()
    };
    let builder = TreeBuilder::new(Arc::new(port), cfg);
    let tree = builder.build(&TargetId("t-loop".into())).await.unwrap();

    assert!(tree.frames.iter().any(|f| f.truncated));
    assert!(tree.frames.iter().all(|f| f.depth <= 4));
}

#[tokio::test]
async fn slow_ax_frame_does_not_delay_siblings() {
    let mut root = Snap::new("f-root");
    let doc = root.document();
    root.element("body", doc, 2, &[]);

    let make_child = |frame: &str, backend: i64| {
        let mut snap = Snap::new(frame);
        let doc = snap.document();
        let body = snap.element("body", doc, backend, &[]);
        let button = snap.element("button", body, backend + 1, &[]);
        snap.layout(button, [5.0, 5.0, 40.0, 20.0], visible(), 1);
        snap.build()
    };
    let slow_dom = make_child("f-slow", 30);
    let fast_dom = make_child("f-fast", 50);

    let mut port = StubPort::default();
    port.frame_trees.insert("t-root".into(), frame_tree("f-root"));
    port.frame_trees.insert("t-slow".into(), frame_tree("f-slow"));
    port.frame_trees.insert("t-fast".into(), frame_tree("f-fast"));
    port.children.insert(
        "t-root".into(),
        vec![
            ChildTarget {
                frame: FrameId("f-slow".into()),
                target: TargetId("t-slow".into()),
            },
            ChildTarget {
                frame: FrameId("f-fast".into()),
                target: TargetId("t-fast".into()),
            },
        ],
    );
    port.doms.insert("t-root".into(), root.build());
    port.doms.insert("t-slow".into(), slow_dom);
    port.doms.insert("t-fast".into(), fast_dom);
    port.axes.insert("t-root".into(), json!({ "nodes": [] }));
    port.axes.insert("t-slow".into(), json!({ "nodes": [ax_node(31, "button", "slow")] }));
    port.axes.insert("t-fast".into(), json!({ "nodes": [ax_node(51, "button", "fast")] }));
    port.ax_delay.insert("t-slow".into(), Duration::from_secs(30));

    let cfg = BuildConfig {
        ax_timeout: Duration::from_millis(150),
        ..BuildConfig::default()
    };
    let builder = TreeBuilder::new(Arc::new(port), cfg);
    let started = std::time::Instant::now();
    let tree = builder.build(&TargetId("t-root".into())).await.unwrap();
    assert!(
        started.elapsed() < Duration::from_secs(5),
        "slow sibling must not stall the build"
    );

    let slow = tree.frames.iter().find(|f| f.frame.0 == "f-slow").unwrap();
    assert!(slow.ax_unavailable);
    let fast = tree.frames.iter().find(|f| f.frame.0 == "f-fast").unwrap();
    assert!(!fast.ax_unavailable);

    // The fast sibling's accessibility data landed on its nodes.
    let fast_button = tree.by_backend_id(BackendNodeId(51)).unwrap();
    assert_eq!(fast_button.ax.as_ref().unwrap().name, "fast");
    // The slow frame's DOM is still present, only without AX props.
    let slow_button = tree.by_backend_id(BackendNodeId(31)).unwrap();
    assert!(slow_button.ax.is_none());
    assert!(matches!(&slow_button.kind, NodeKind::Element { tag } if tag == "button"));
}

#[tokio::test]
async fn primary_target_snapshot_failure_is_fatal() {
    let mut port = StubPort::default();
    port.frame_trees.insert("t1".into(), frame_tree("f-root"));
    port.fail_dom = true;
    port.axes.insert("t1".into(), json!({ "nodes": [] }));

    let builder = TreeBuilder::new(Arc::new(port), BuildConfig::default());
    let err = builder.build(&TargetId("t1".into())).await.unwrap_err();
    assert_eq!(err.kind, CoreErrorKind::ProtocolTimeout);
}
