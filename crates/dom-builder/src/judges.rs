//! Visibility and interactivity judgement over fused node data.
//!
//! A node is interactive+visible when its box is non-zero, it is not
//! hidden by style (display/visibility/opacity), it accepts pointer
//! events, and it is the topmost element at its own center point. The
//! occlusion check runs as a second pass in the builder once every box
//! and paint order is known.

use std::collections::HashMap;

use crate::model::{BoundingBox, DomTree, Node, NodeId, NodeKind};

/// Tags interactive by nature.
const INTERACTIVE_TAGS: &[&str] = &[
    "a", "button", "input", "select", "textarea", "option", "label", "summary", "details",
];

/// Tags that become interactive only with the right attributes.
const POTENTIALLY_INTERACTIVE_TAGS: &[&str] =
    &["div", "span", "li", "tr", "td", "th", "img", "svg", "path"];

/// Attributes that indicate interactivity on their own.
const INTERACTIVE_ATTRIBUTES: &[&str] = &[
    "onclick",
    "onmousedown",
    "onmouseup",
    "ontouchstart",
    "tabindex",
    "contenteditable",
    "draggable",
];

/// ARIA roles that indicate interactivity.
const INTERACTIVE_ROLES: &[&str] = &[
    "button",
    "link",
    "checkbox",
    "radio",
    "textbox",
    "combobox",
    "listbox",
    "option",
    "menuitem",
    "tab",
    "switch",
    "slider",
    "spinbutton",
    "searchbox",
    "gridcell",
    "treeitem",
];

/// Does the node's tag/role/attribute shape make it a click candidate?
/// Geometry and style are judged separately.
pub fn is_interaction_candidate(node: &Node) -> bool {
    let tag = match &node.kind {
        NodeKind::Element { tag } => tag.as_str(),
        NodeKind::Text { .. }
        | NodeKind::Document
        | NodeKind::DocumentFragment
        | NodeKind::Comment { .. } => return false,
    };

    if INTERACTIVE_TAGS.contains(&tag) {
        return true;
    }

    for attr in INTERACTIVE_ATTRIBUTES {
        if let Some(value) = node.attr(attr) {
            if *attr == "tabindex" && value.trim() == "-1" {
                continue;
            }
            return true;
        }
    }

    if let Some(role) = effective_role(node) {
        if INTERACTIVE_ROLES.contains(&role.to_ascii_lowercase().as_str()) {
            return true;
        }
    }

    if POTENTIALLY_INTERACTIVE_TAGS.contains(&tag) {
        if node.attr("onclick").is_some() || node.attr("data-action").is_some() {
            return true;
        }
    }

    false
}

/// Explicit `role` attribute first, then the AX-computed role.
pub fn effective_role(node: &Node) -> Option<&str> {
    if let Some(role) = node.attr("role") {
        if !role.is_empty() {
            return Some(role);
        }
    }
    node.ax.as_ref().map(|ax| ax.role.as_str()).filter(|r| !r.is_empty())
}

/// Style/geometry visibility, excluding occlusion.
pub fn is_style_visible(node: &Node) -> bool {
    let Some(bounds) = &node.bounds else {
        return false;
    };
    if bounds.is_empty() {
        return false;
    }

    if node.attr("hidden").is_some() {
        return false;
    }
    if node.attr("aria-hidden").map(|v| v != "false").unwrap_or(false) {
        return false;
    }

    if style_is(node, "display", "none") || style_is(node, "visibility", "hidden") {
        return false;
    }
    if let Some(opacity) = node.computed_style.get("opacity") {
        if opacity.parse::<f64>().map(|o| o <= 0.0).unwrap_or(false) {
            return false;
        }
    }
    true
}

/// Pointer-events acceptance.
pub fn accepts_pointer_events(node: &Node) -> bool {
    !style_is(node, "pointer-events", "none")
}

fn style_is(node: &Node, property: &str, value: &str) -> bool {
    node.computed_style
        .get(property)
        .map(|v| v.eq_ignore_ascii_case(value))
        .unwrap_or(false)
}

/// Topmost-at-own-center check over a candidate set: a box occludes the
/// candidate when it covers the candidate's center with a strictly
/// higher paint order. Paint orders are scoped to a single snapshot
/// document, so only boxes from the candidate's own frame are compared;
/// a candidate's ancestors and descendants never count as occluders
/// (a button's own label span paints after the button without hiding
/// it).
pub fn is_topmost_at_center(
    tree: &DomTree,
    candidate: &Node,
    boxes: &HashMap<usize, (BoundingBox, i64)>,
) -> bool {
    let (Some(bounds), Some(order)) = (&candidate.bounds, candidate.paint_order) else {
        // Without paint data there is nothing to compare against; give
        // the candidate the benefit of the doubt.
        return true;
    };
    let (cx, cy) = bounds.center();

    for (other_id, (other_box, other_order)) in boxes {
        if *other_id == candidate.id.0 {
            continue;
        }
        if *other_order <= order || !other_box.contains(cx, cy) {
            continue;
        }
        let other = tree.node(NodeId(*other_id));
        if other.frame != candidate.frame {
            continue;
        }
        if is_lineal(tree, candidate.id, other.id) {
            continue;
        }
        return false;
    }
    true
}

/// True when one node sits on the other's ancestor chain.
fn is_lineal(tree: &DomTree, a: NodeId, b: NodeId) -> bool {
    tree.ancestors(a).contains(&b) || tree.ancestors(b).contains(&a)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{AxProps, NodeId};
    use pagelens_core_types::FrameId;

    fn element(tag: &str) -> Node {
        Node::new(
            NodeId(0),
            NodeKind::Element { tag: tag.into() },
            FrameId("f".into()),
        )
    }

    #[test]
    fn native_controls_are_candidates() {
        assert!(is_interaction_candidate(&element("button")));
        assert!(is_interaction_candidate(&element("input")));
        assert!(!is_interaction_candidate(&element("div")));
    }

    #[test]
    fn click_handler_promotes_generic_tags() {
        let mut div = element("div");
        div.attributes.insert("onclick".into(), "go()".into());
        assert!(is_interaction_candidate(&div));
    }

    #[test]
    fn ax_role_promotes_generic_tags() {
        let mut span = element("span");
        span.ax = Some(AxProps {
            role: "button".into(),
            name: "Buy".into(),
            properties: serde_json::Value::Null,
        });
        assert!(is_interaction_candidate(&span));
    }

    #[test]
    fn negative_tabindex_alone_is_not_interactive() {
        let mut div = element("div");
        div.attributes.insert("tabindex".into(), "-1".into());
        assert!(!is_interaction_candidate(&div));
    }

    #[test]
    fn explicit_role_attribute_wins_over_ax_role() {
        let mut node = element("div");
        node.attributes.insert("role".into(), "navigation".into());
        node.ax = Some(AxProps {
            role: "button".into(),
            name: String::new(),
            properties: serde_json::Value::Null,
        });
        assert_eq!(effective_role(&node), Some("navigation"));
    }

    #[test]
    fn zero_area_and_hidden_styles_are_invisible() {
        let mut node = element("button");
        assert!(!is_style_visible(&node)); // no box at all

        node.bounds = Some(BoundingBox::new(0.0, 0.0, 0.0, 10.0));
        assert!(!is_style_visible(&node));

        node.bounds = Some(BoundingBox::new(0.0, 0.0, 10.0, 10.0));
        assert!(is_style_visible(&node));

        node.computed_style.insert("display".into(), "none".into());
        assert!(!is_style_visible(&node));

        node.computed_style.insert("display".into(), "block".into());
        node.computed_style.insert("opacity".into(), "0".into());
        assert!(!is_style_visible(&node));
    }

    fn push_painted(
        tree: &mut DomTree,
        tag: &str,
        frame: &str,
        bounds: BoundingBox,
        paint_order: i64,
    ) -> NodeId {
        let mut node = Node::new(
            NodeId(0),
            NodeKind::Element { tag: tag.into() },
            FrameId(frame.into()),
        );
        node.bounds = Some(bounds);
        node.paint_order = Some(paint_order);
        tree.push(node)
    }

    fn boxes_of(tree: &DomTree) -> HashMap<usize, (BoundingBox, i64)> {
        tree.nodes()
            .filter_map(|n| match (n.bounds, n.paint_order) {
                (Some(b), Some(p)) => Some((n.id.0, (b, p))),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn occluded_center_is_not_topmost() {
        let mut tree = DomTree::new();
        let button =
            push_painted(&mut tree, "button", "f", BoundingBox::new(0.0, 0.0, 100.0, 20.0), 3);
        // An overlay painted later, covering the button's center.
        let overlay =
            push_painted(&mut tree, "div", "f", BoundingBox::new(0.0, 0.0, 200.0, 200.0), 7);
        let mut boxes = boxes_of(&tree);
        assert!(!is_topmost_at_center(&tree, tree.node(button), &boxes));

        // Same overlay painted earlier does not occlude.
        boxes.insert(overlay.0, (BoundingBox::new(0.0, 0.0, 200.0, 200.0), 1));
        assert!(is_topmost_at_center(&tree, tree.node(button), &boxes));
    }

    #[test]
    fn descendant_label_does_not_occlude_its_button() {
        let mut tree = DomTree::new();
        let button =
            push_painted(&mut tree, "button", "f", BoundingBox::new(0.0, 0.0, 100.0, 20.0), 2);
        // The label span paints after its parent and covers its center.
        let span =
            push_painted(&mut tree, "span", "f", BoundingBox::new(10.0, 2.0, 80.0, 16.0), 3);
        tree.node_mut(button).children.push(span);
        tree.node_mut(span).parent = Some(button);

        let boxes = boxes_of(&tree);
        assert!(is_topmost_at_center(&tree, tree.node(button), &boxes));
        // The span itself is not occluded by its parent either.
        assert!(is_topmost_at_center(&tree, tree.node(span), &boxes));
    }

    #[test]
    fn boxes_from_another_frame_do_not_occlude() {
        let mut tree = DomTree::new();
        // The owner iframe element carries a high order in the parent
        // document, but orders are not comparable across frames.
        let _iframe =
            push_painted(&mut tree, "iframe", "parent", BoundingBox::new(0.0, 0.0, 400.0, 300.0), 9);
        let button =
            push_painted(&mut tree, "button", "child", BoundingBox::new(20.0, 20.0, 100.0, 20.0), 1);

        let boxes = boxes_of(&tree);
        assert!(is_topmost_at_center(&tree, tree.node(button), &boxes));
    }
}
