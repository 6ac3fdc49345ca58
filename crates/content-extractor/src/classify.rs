//! Region classification and density scoring.

use dom_builder::{DomTree, Node, NodeId, NodeKind};

use crate::model::{DensityScore, Region};

const SKIPPED_TAGS: &[&str] = &["script", "style", "noscript", "template"];

/// Map a node to its landmark region. An explicit `role` attribute wins
/// over tag inference; unknown roles fall through to the tag.
pub fn classify(node: &Node) -> Region {
    if let Some(role) = node.attr("role") {
        if let Some(region) = region_from_role(role) {
            return region;
        }
    }
    let Some(tag) = node.kind.tag() else {
        return Region::Unknown;
    };
    match tag {
        "main" => Region::Main,
        "article" => Region::Article,
        "nav" => Region::Navigation,
        "header" => Region::Banner,
        "aside" => Region::Complementary,
        "footer" => Region::Contentinfo,
        "form" => Region::Form,
        "search" => Region::Search,
        _ => Region::Unknown,
    }
}

fn region_from_role(role: &str) -> Option<Region> {
    match role.to_ascii_lowercase().as_str() {
        "main" => Some(Region::Main),
        "article" => Some(Region::Article),
        "navigation" => Some(Region::Navigation),
        "banner" => Some(Region::Banner),
        "complementary" => Some(Region::Complementary),
        "contentinfo" => Some(Region::Contentinfo),
        "form" => Some(Region::Form),
        "search" => Some(Region::Search),
        _ => None,
    }
}

/// Density score for the subtree rooted at `id`. Text characters count
/// trimmed text-node content outside script/style; link characters are
/// the subset sitting under an anchor.
pub fn score(tree: &DomTree, id: NodeId) -> DensityScore {
    let mut tags = 0usize;
    let mut text_chars = 0usize;
    let mut link_chars = 0usize;
    walk(tree, id, false, &mut tags, &mut text_chars, &mut link_chars);

    DensityScore {
        text_density: text_chars as f64 / tags.max(1) as f64,
        link_density: if text_chars == 0 {
            0.0
        } else {
            link_chars as f64 / text_chars as f64
        },
    }
}

fn walk(
    tree: &DomTree,
    id: NodeId,
    in_link: bool,
    tags: &mut usize,
    text_chars: &mut usize,
    link_chars: &mut usize,
) {
    let node = tree.node(id);
    let mut in_link = in_link;
    match &node.kind {
        NodeKind::Element { tag } => {
            if SKIPPED_TAGS.contains(&tag.as_str()) {
                return;
            }
            *tags += 1;
            if tag == "a" {
                in_link = true;
            }
        }
        NodeKind::Text { value } => {
            let len = value.trim().chars().count();
            *text_chars += len;
            if in_link {
                *link_chars += len;
            }
            return;
        }
        NodeKind::Comment { .. } => return,
        NodeKind::Document | NodeKind::DocumentFragment => {}
    }
    for child in node.children.iter().chain(node.shadow_roots.iter()) {
        walk(tree, *child, in_link, tags, text_chars, link_chars);
    }
}

/// Pick the extraction root: the first main/article landmark in document
/// order, shadow roots included, else `<body>`, else the tree root.
pub fn find_main_root(tree: &DomTree) -> Option<NodeId> {
    let root = tree.root?;

    let mut body = None;
    let mut stack = vec![root];
    // Depth-first preorder; children pushed reversed so document order
    // is preserved while popping.
    while let Some(id) = stack.pop() {
        let node = tree.node(id);
        if matches!(node.kind, NodeKind::Element { .. }) {
            if classify(node).is_content_bearing() {
                return Some(id);
            }
            if body.is_none() && node.kind.tag() == Some("body") {
                body = Some(id);
            }
        }
        for child in node
            .children
            .iter()
            .chain(node.shadow_roots.iter())
            .rev()
        {
            stack.push(*child);
        }
    }
    body.or(Some(root))
}
