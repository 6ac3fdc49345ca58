//! Output types of the extraction pipeline.

use serde::{Deserialize, Serialize};

use pagelens_core_types::BackendNodeId;

/// Landmark region a subtree belongs to. Explicit ARIA roles always win
/// over tag inference.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Region {
    Main,
    Article,
    Navigation,
    Banner,
    Complementary,
    Contentinfo,
    Form,
    Search,
    Unknown,
}

impl Region {
    /// Regions skipped by default during extraction.
    pub fn is_peripheral(self) -> bool {
        matches!(
            self,
            Region::Navigation | Region::Banner | Region::Complementary | Region::Contentinfo
        )
    }

    pub fn is_content_bearing(self) -> bool {
        matches!(self, Region::Main | Region::Article)
    }
}

/// Text-vs-markup density of a subtree. The thresholds consuming this
/// are deliberately simple and documented by the tests.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct DensityScore {
    /// Text characters per element.
    pub text_density: f64,
    /// Share of text characters sitting inside anchors.
    pub link_density: f64,
}

impl DensityScore {
    pub fn is_content_like(&self, region: Region) -> bool {
        region.is_content_bearing() || (self.text_density > 25.0 && self.link_density < 0.3)
    }

    pub fn is_boilerplate_like(&self, region: Region) -> bool {
        region.is_peripheral()
            || self.link_density > 0.5
            || (self.text_density < 10.0 && self.link_density > 0.3)
    }
}

/// One extracted region: rendered lines plus the ids of every
/// interactive element the lines mention, so a caller can act on what
/// it just read.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ExtractedSection {
    pub region: Region,
    pub heading: Option<String>,
    pub lines: Vec<String>,
    pub referenced: Vec<BackendNodeId>,
    pub subsections: Vec<ExtractedSection>,
}

impl ExtractedSection {
    pub fn new(region: Region) -> Self {
        Self {
            region,
            heading: None,
            lines: Vec::new(),
            referenced: Vec::new(),
            subsections: Vec::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty() && self.subsections.iter().all(|s| s.is_empty())
    }

    /// Flatten the section tree into one markdown document.
    pub fn to_markdown(&self) -> String {
        let mut out = String::new();
        self.render(&mut out);
        while out.ends_with('\n') {
            out.pop();
        }
        out
    }

    fn render(&self, out: &mut String) {
        if let Some(heading) = &self.heading {
            out.push_str(heading);
            out.push('\n');
        }
        for line in &self.lines {
            out.push_str(line);
            out.push('\n');
        }
        for sub in &self.subsections {
            if !sub.is_empty() {
                sub.render(out);
            }
        }
    }

    /// All referenced ids, depth-first, duplicates removed.
    pub fn all_referenced(&self) -> Vec<BackendNodeId> {
        let mut out = Vec::new();
        self.collect_referenced(&mut out);
        out
    }

    fn collect_referenced(&self, out: &mut Vec<BackendNodeId>) {
        for id in &self.referenced {
            if !out.contains(id) {
                out.push(*id);
            }
        }
        for sub in &self.subsections {
            sub.collect_referenced(out);
        }
    }
}

/// A slice of a markdown document produced by the chunker. Offsets are
/// char positions into the source document, excluding any carried-over
/// overlap or repeated table header.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MarkdownChunk {
    pub content: String,
    pub start_char: usize,
    pub end_char: usize,
    pub index: usize,
    pub total: usize,
    pub has_table_header: bool,
}
