//! Section extraction: walks a built DOM tree, renders content regions
//! to markdown-flavoured lines and records the selector-map id of every
//! interactive element it mentions.

use dom_builder::{DomTree, Node, NodeId, NodeKind};
use tracing::debug;

use crate::classify::{classify, find_main_root};
use crate::model::{ExtractedSection, Region};

/// Attributes worth carrying into an interactive element's rendering.
const RENDERED_ATTRIBUTES: &[&str] = &[
    "href",
    "type",
    "name",
    "value",
    "placeholder",
    "aria-label",
    "title",
    "alt",
];

const INLINE_TAGS: &[&str] = &[
    "a", "abbr", "b", "code", "em", "i", "label", "mark", "small", "span", "strong", "sub", "sup",
    "time", "u",
];

#[derive(Clone, Debug)]
pub struct ExtractOptions {
    pub include_navigation: bool,
    pub include_banner: bool,
    pub include_complementary: bool,
    pub include_contentinfo: bool,
    /// Hard cap on rendered table rows per table.
    pub max_table_rows: usize,
}

impl Default for ExtractOptions {
    fn default() -> Self {
        Self {
            include_navigation: false,
            include_banner: false,
            include_complementary: false,
            include_contentinfo: false,
            max_table_rows: 30,
        }
    }
}

impl ExtractOptions {
    fn includes(&self, region: Region) -> bool {
        match region {
            Region::Navigation => self.include_navigation,
            Region::Banner => self.include_banner,
            Region::Complementary => self.include_complementary,
            Region::Contentinfo => self.include_contentinfo,
            _ => true,
        }
    }
}

/// Extract the content of `tree` starting from its main root.
pub fn extract(tree: &DomTree, opts: &ExtractOptions) -> ExtractedSection {
    let Some(root) = find_main_root(tree) else {
        return ExtractedSection::new(Region::Unknown);
    };
    let region = match &tree.node(root).kind {
        NodeKind::Element { .. } => classify(tree.node(root)),
        _ => Region::Unknown,
    };
    debug!(target: "content-extractor", ?region, "extraction root selected");

    let mut section = ExtractedSection::new(region);
    render_children(tree, root, &mut section, opts);
    section
}

/// Extract from an explicit root instead of the detected main region.
pub fn extract_from(tree: &DomTree, root: NodeId, opts: &ExtractOptions) -> ExtractedSection {
    let mut section = ExtractedSection::new(classify(tree.node(root)));
    render_children(tree, root, &mut section, opts);
    section
}

fn render_children(tree: &DomTree, id: NodeId, section: &mut ExtractedSection, opts: &ExtractOptions) {
    let node = tree.node(id);
    let mut buffer = String::new();

    for child_id in node.children.iter().chain(node.shadow_roots.iter()) {
        let child = tree.node(*child_id);
        match &child.kind {
            NodeKind::Text { .. } => inline(tree, *child_id, &mut buffer, section),
            NodeKind::Element { tag } => {
                if is_interactive(tree, child) || INLINE_TAGS.contains(&tag.as_str()) {
                    inline(tree, *child_id, &mut buffer, section);
                } else {
                    flush(&mut buffer, section);
                    render_block(tree, *child_id, section, opts);
                }
            }
            NodeKind::DocumentFragment | NodeKind::Document => {
                flush(&mut buffer, section);
                render_children(tree, *child_id, section, opts);
            }
            NodeKind::Comment { .. } => {}
        }
    }
    flush(&mut buffer, section);
}

fn render_block(tree: &DomTree, id: NodeId, section: &mut ExtractedSection, opts: &ExtractOptions) {
    let node = tree.node(id);
    let Some(tag) = node.kind.tag() else {
        render_children(tree, id, section, opts);
        return;
    };

    if matches!(tag, "script" | "style" | "noscript" | "template") {
        return;
    }

    let region = classify(node);
    if region != Region::Unknown {
        if region.is_peripheral() && !opts.includes(region) {
            // Banners and footers still surface when they host a form;
            // login boxes live there.
            let keep_for_form = matches!(region, Region::Banner | Region::Contentinfo)
                && contains_form(tree, id);
            if !keep_for_form {
                return;
            }
        }
        let mut sub = ExtractedSection::new(region);
        render_children(tree, id, &mut sub, opts);
        if !sub.is_empty() {
            section.subsections.push(sub);
        }
        return;
    }

    match tag {
        "h1" | "h2" | "h3" | "h4" | "h5" | "h6" => {
            let level = tag.as_bytes()[1] - b'0';
            let text = inline_text(tree, id, section);
            if !text.is_empty() {
                let line = format!("{} {}", "#".repeat(level as usize), text);
                if section.heading.is_none() && section.lines.is_empty() {
                    section.heading = Some(line);
                } else {
                    section.lines.push(line);
                }
            }
        }
        "ul" | "ol" => render_list(tree, id, tag == "ol", section),
        "table" => render_table(tree, id, section, opts),
        "pre" => {
            let text = inline_text(tree, id, section);
            if !text.is_empty() {
                section.lines.push("```".into());
                for line in text.lines() {
                    section.lines.push(line.to_string());
                }
                section.lines.push("```".into());
            }
        }
        "br" | "hr" | "img" => {}
        _ => render_children(tree, id, section, opts),
    }
}

fn render_list(tree: &DomTree, id: NodeId, ordered: bool, section: &mut ExtractedSection) {
    let mut index = 0usize;
    for child_id in &tree.node(id).children {
        let child = tree.node(*child_id);
        if child.kind.tag() != Some("li") {
            continue;
        }
        let text = inline_text(tree, *child_id, section);
        if text.is_empty() {
            continue;
        }
        index += 1;
        if ordered {
            section.lines.push(format!("{index}. {text}"));
        } else {
            section.lines.push(format!("- {text}"));
        }
    }
}

fn render_table(tree: &DomTree, id: NodeId, section: &mut ExtractedSection, opts: &ExtractOptions) {
    let mut rows: Vec<Vec<String>> = Vec::new();
    collect_rows(tree, id, section, &mut rows);
    if rows.is_empty() {
        return;
    }

    let total = rows.len();
    let header = rows.remove(0);
    section.lines.push(format!("| {} |", header.join(" | ")));
    section
        .lines
        .push(format!("| {} |", vec!["---"; header.len().max(1)].join(" | ")));

    let rendered = rows.len().min(opts.max_table_rows);
    for row in rows.iter().take(rendered) {
        section.lines.push(format!("| {} |", row.join(" | ")));
    }
    if total - 1 > rendered {
        section
            .lines
            .push(format!("({} rows omitted)", total - 1 - rendered));
    }
}

fn collect_rows(
    tree: &DomTree,
    id: NodeId,
    section: &mut ExtractedSection,
    rows: &mut Vec<Vec<String>>,
) {
    for child_id in &tree.node(id).children {
        let child = tree.node(*child_id);
        match child.kind.tag() {
            Some("tr") => {
                let mut cells = Vec::new();
                for cell_id in &tree.node(*child_id).children {
                    let cell = tree.node(*cell_id);
                    if matches!(cell.kind.tag(), Some("td") | Some("th")) {
                        cells.push(inline_text(tree, *cell_id, section));
                    }
                }
                if !cells.is_empty() {
                    rows.push(cells);
                }
            }
            Some("thead") | Some("tbody") | Some("tfoot") => {
                collect_rows(tree, *child_id, section, rows)
            }
            _ => {}
        }
    }
}

/// Append a node's inline rendering to `buffer`: plain text for text
/// nodes, a correlation token for interactive elements, recursion for
/// everything else.
fn inline(tree: &DomTree, id: NodeId, buffer: &mut String, section: &mut ExtractedSection) {
    let node = tree.node(id);
    match &node.kind {
        NodeKind::Text { value } => append_word(buffer, value.trim()),
        NodeKind::Element { tag } => {
            if is_interactive(tree, node) {
                let token = interactive_token(tree, node);
                append_word(buffer, &token);
                if let Some(backend) = node.backend_id {
                    if !section.referenced.contains(&backend) {
                        section.referenced.push(backend);
                    }
                }
                return;
            }
            if matches!(tag.as_str(), "script" | "style" | "noscript" | "template") {
                return;
            }
            for child in node.children.iter().chain(node.shadow_roots.iter()) {
                inline(tree, *child, buffer, section);
            }
        }
        NodeKind::Document | NodeKind::DocumentFragment => {
            for child in node.children.iter().chain(node.shadow_roots.iter()) {
                inline(tree, *child, buffer, section);
            }
        }
        NodeKind::Comment { .. } => {}
    }
}

/// `[id]<tag attr="value">text</tag>`; the id is the selector-map key,
/// so a caller can act on any element it reads.
fn interactive_token(tree: &DomTree, node: &Node) -> String {
    let tag = node.kind.tag().unwrap_or("element");
    let id = node.backend_id.map(|b| b.0).unwrap_or(0);

    let mut attrs = String::new();
    for name in RENDERED_ATTRIBUTES {
        if let Some(value) = node.attr(name) {
            if !value.is_empty() {
                attrs.push_str(&format!(" {name}=\"{value}\""));
            }
        }
    }

    let mut text = String::new();
    let mut scratch = ExtractedSection::new(Region::Unknown);
    for child in node.children.iter().chain(node.shadow_roots.iter()) {
        inline(tree, *child, &mut text, &mut scratch);
    }
    if text.is_empty() {
        if let Some(ax) = &node.ax {
            text = ax.name.clone();
        }
    }

    format!("[{id}]<{tag}{attrs}>{text}</{tag}>")
}

fn inline_text(tree: &DomTree, id: NodeId, section: &mut ExtractedSection) -> String {
    let mut buffer = String::new();
    let node = tree.node(id);
    if is_interactive(tree, node) {
        let token = interactive_token(tree, node);
        if let Some(backend) = node.backend_id {
            if !section.referenced.contains(&backend) {
                section.referenced.push(backend);
            }
        }
        return token;
    }
    for child in node.children.iter().chain(node.shadow_roots.iter()) {
        inline(tree, *child, &mut buffer, section);
    }
    buffer.trim().to_string()
}

fn is_interactive(tree: &DomTree, node: &Node) -> bool {
    node.backend_id
        .map(|backend| tree.selector_map().contains_key(&backend))
        .unwrap_or(false)
}

fn contains_form(tree: &DomTree, id: NodeId) -> bool {
    let node = tree.node(id);
    if let Some(tag) = node.kind.tag() {
        if matches!(tag, "form" | "input" | "select" | "textarea") {
            return true;
        }
    }
    if node.attr("role") == Some("form") {
        return true;
    }
    node.children
        .iter()
        .chain(node.shadow_roots.iter())
        .any(|child| contains_form(tree, *child))
}

fn append_word(buffer: &mut String, word: &str) {
    if word.is_empty() {
        return;
    }
    if !buffer.is_empty() && !buffer.ends_with(' ') {
        buffer.push(' ');
    }
    buffer.push_str(word);
}

fn flush(buffer: &mut String, section: &mut ExtractedSection) {
    let line = buffer.trim();
    if !line.is_empty() {
        section.lines.push(line.to_string());
    }
    buffer.clear();
}
