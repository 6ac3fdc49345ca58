//! Structure-preserving markdown chunking.
//!
//! One forward scan groups the document into blocks (header, paragraph,
//! fenced code, table) and packs whole blocks into chunks. A fence or a
//! table row is never split; a table spilling into the next chunk gets
//! its header repeated there. Char offsets always refer to the source
//! document and exclude carried-over material.

use crate::model::MarkdownChunk;

#[derive(Clone, Copy, Debug, PartialEq)]
enum BlockKind {
    Header,
    Paragraph,
    Fence,
    Table,
}

#[derive(Debug)]
struct Line<'a> {
    text: &'a str,
    start: usize,
    end: usize,
}

#[derive(Debug)]
struct Block {
    kind: BlockKind,
    lines: std::ops::Range<usize>,
    /// Line count of the table header (header row + separator), when the
    /// block is a table that has one.
    header_lines: usize,
}

#[derive(Default)]
struct ChunkDraft {
    prefix: Vec<String>,
    lines: Vec<usize>,
    /// Synthetic closing lines emitted after the real lines, used to
    /// terminate a fence that continues in the next chunk. Never counted
    /// into offsets.
    suffix: Vec<String>,
    has_table_header: bool,
}

/// Split `content` into chunks of at most `max_size` chars. The last
/// `overlap_lines` lines of each chunk are repeated at the top of the
/// next one for context; repeated lines do not count into offsets.
pub fn chunk(content: &str, max_size: usize, overlap_lines: usize) -> Vec<MarkdownChunk> {
    if content.trim().is_empty() {
        return Vec::new();
    }
    let lines = index_lines(content);
    let blocks = scan_blocks(&lines);

    let mut drafts: Vec<ChunkDraft> = Vec::new();
    let mut current = ChunkDraft::default();
    let mut current_size = 0usize;

    let flush = |current: &mut ChunkDraft, current_size: &mut usize, drafts: &mut Vec<ChunkDraft>| {
        if current.lines.is_empty() {
            return;
        }
        let done = std::mem::take(current);
        let mut next = ChunkDraft::default();
        if overlap_lines > 0 {
            next.prefix = done
                .lines
                .iter()
                .rev()
                .take(overlap_lines)
                .rev()
                .map(|&i| lines[i].text.to_string())
                .collect();
        }
        drafts.push(done);
        *current = next;
        *current_size = 0;
    };

    for block in &blocks {
        let block_size = block_char_size(&lines, block.lines.clone());

        if !current.lines.is_empty() && current_size + 1 + block_size > max_size {
            flush(&mut current, &mut current_size, &mut drafts);
        }

        if block_size > max_size {
            // A single oversized block: force-split at line boundaries,
            // repeating the table header on each continuation and
            // re-opening a fence that spills over.
            if !current.lines.is_empty() {
                flush(&mut current, &mut current_size, &mut drafts);
            }
            let (carry, closer): (Vec<String>, Option<String>) = match block.kind {
                BlockKind::Table if block.header_lines > 0 => (
                    lines[block.lines.start..block.lines.start + block.header_lines]
                        .iter()
                        .map(|l| l.text.to_string())
                        .collect(),
                    None,
                ),
                BlockKind::Fence => (
                    vec![lines[block.lines.start].text.to_string()],
                    Some("```".to_string()),
                ),
                _ => (Vec::new(), None),
            };

            let mut first_slice = true;
            for idx in block.lines.clone() {
                let line_size = lines[idx].text.chars().count();
                if !current.lines.is_empty() && current_size + 1 + line_size > max_size {
                    if let Some(closer) = &closer {
                        current.suffix.push(closer.clone());
                    }
                    flush(&mut current, &mut current_size, &mut drafts);
                    if !carry.is_empty() {
                        current.prefix = carry.clone();
                        if block.kind == BlockKind::Table {
                            current.has_table_header = true;
                        }
                    }
                    first_slice = false;
                }
                if block.kind == BlockKind::Table
                    && first_slice
                    && idx < block.lines.start + block.header_lines
                {
                    current.has_table_header = true;
                }
                current.lines.push(idx);
                current_size += line_size + 1;
            }
            continue;
        }

        if block.kind == BlockKind::Table && block.header_lines > 0 {
            current.has_table_header = true;
        }
        for idx in block.lines.clone() {
            current.lines.push(idx);
            current_size += lines[idx].text.chars().count() + 1;
        }
    }
    flush(&mut current, &mut current_size, &mut drafts);

    // Totals and offsets are stamped only after the whole pass.
    let total = drafts.len();
    drafts
        .into_iter()
        .enumerate()
        .map(|(index, draft)| {
            let mut content = String::new();
            for line in &draft.prefix {
                content.push_str(line);
                content.push('\n');
            }
            for (i, &line_idx) in draft.lines.iter().enumerate() {
                if i > 0 {
                    content.push('\n');
                }
                content.push_str(lines[line_idx].text);
            }
            for line in &draft.suffix {
                content.push('\n');
                content.push_str(line);
            }
            let start_char = draft.lines.first().map(|&i| lines[i].start).unwrap_or(0);
            let end_char = draft.lines.last().map(|&i| lines[i].end).unwrap_or(0);
            MarkdownChunk {
                content,
                start_char,
                end_char,
                index,
                total,
                has_table_header: draft.has_table_header,
            }
        })
        .collect()
}

fn index_lines(content: &str) -> Vec<Line<'_>> {
    let mut lines = Vec::new();
    let mut offset = 0usize;
    for text in content.split('\n') {
        let chars = text.chars().count();
        lines.push(Line {
            text,
            start: offset,
            end: offset + chars,
        });
        offset += chars + 1;
    }
    lines
}

fn block_char_size(lines: &[Line<'_>], range: std::ops::Range<usize>) -> usize {
    let mut size = 0;
    for line in &lines[range] {
        size += line.text.chars().count() + 1;
    }
    size.saturating_sub(1)
}

fn scan_blocks(lines: &[Line<'_>]) -> Vec<Block> {
    let mut blocks = Vec::new();
    let mut i = 0usize;

    while i < lines.len() {
        let text = lines[i].text.trim_end();
        if text.trim().is_empty() {
            i += 1;
            continue;
        }

        if text.trim_start().starts_with("```") {
            let start = i;
            i += 1;
            while i < lines.len() && !lines[i].text.trim_start().starts_with("```") {
                i += 1;
            }
            if i < lines.len() {
                i += 1; // closing fence
            }
            blocks.push(Block {
                kind: BlockKind::Fence,
                lines: start..i,
                header_lines: 0,
            });
            continue;
        }

        if is_table_row(text) {
            let start = i;
            while i < lines.len() && is_table_row(lines[i].text.trim_end()) {
                i += 1;
            }
            let header_lines = if i - start >= 2 && is_separator_row(lines[start + 1].text) {
                2
            } else {
                0
            };
            blocks.push(Block {
                kind: BlockKind::Table,
                lines: start..i,
                header_lines,
            });
            continue;
        }

        if text.starts_with('#') {
            blocks.push(Block {
                kind: BlockKind::Header,
                lines: i..i + 1,
                header_lines: 0,
            });
            i += 1;
            continue;
        }

        let start = i;
        while i < lines.len() {
            let t = lines[i].text.trim_end();
            if t.trim().is_empty()
                || t.starts_with('#')
                || t.trim_start().starts_with("```")
                || is_table_row(t)
            {
                break;
            }
            i += 1;
        }
        blocks.push(Block {
            kind: BlockKind::Paragraph,
            lines: start..i,
            header_lines: 0,
        });
    }
    blocks
}

fn is_table_row(line: &str) -> bool {
    let trimmed = line.trim_start();
    trimmed.starts_with('|') && trimmed.len() > 1
}

fn is_separator_row(line: &str) -> bool {
    let trimmed = line.trim();
    trimmed.starts_with('|')
        && trimmed
            .chars()
            .all(|c| matches!(c, '|' | '-' | ':' | ' '))
        && trimmed.contains('-')
}
