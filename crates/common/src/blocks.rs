//! Managed blocks in generated source
//!
//! Machine-owned regions are delimited by marker comments on their own lines:
//!
//! ```text
//! // ARTK:BEGIN GENERATED id=AC-1
//! ...generated content...
//! // ARTK:END GENERATED
//! ```
//!
//! Everything outside a well-formed block is preserved byte-for-byte. Regeneration
//! replaces the content of blocks whose id matches, appends blocks with no match after
//! the last existing block, and leaves other existing blocks alone. Anonymous blocks
//! are never matched: they are always appended.
//!
//! Malformed regions (a `BEGIN` with no `END`, a `BEGIN` nested inside an open block, a
//! stray `END`, an invalid id) are reported as warnings and kept as preserved text.

use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::{Error, Result};

pub const BEGIN_MARKER: &str = "// ARTK:BEGIN GENERATED";
pub const END_MARKER: &str = "// ARTK:END GENERATED";

fn begin_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^(\s*)// ARTK:BEGIN GENERATED(?:\s+id=(\S*))?\s*$").expect("static regex")
    })
}

fn is_end(line: &str) -> bool {
    line.trim() == END_MARKER
}

fn is_marker(line: &str) -> bool {
    let t = line.trim();
    t.starts_with(BEGIN_MARKER) || t.starts_with(END_MARKER)
}

/// Allowed block id: non-empty, alphanumeric plus `-` and `_`
pub fn is_valid_block_id(id: &str) -> bool {
    !id.is_empty()
        && id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}

/// A generated region to inject
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManagedBlock {
    pub id: Option<String>,
    pub content: String,
}

impl ManagedBlock {
    pub fn new(id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            id: Some(id.into()),
            content: content.into(),
        }
    }

    pub fn anonymous(content: impl Into<String>) -> Self {
        Self {
            id: None,
            content: content.into(),
        }
    }

    fn label(&self) -> String {
        self.id.clone().unwrap_or_else(|| "<anonymous>".to_string())
    }

    fn validate(&self) -> Result<()> {
        if let Some(id) = &self.id {
            if !is_valid_block_id(id) {
                return Err(Error::InvalidBlockId(id.clone()));
            }
        }
        if self.content.split('\n').any(is_marker) {
            return Err(Error::NestedMarker { block: self.label() });
        }
        Ok(())
    }

    pub fn begin_line(&self, indent: &str) -> String {
        match &self.id {
            Some(id) => format!("{indent}{BEGIN_MARKER} id={id}"),
            None => format!("{indent}{BEGIN_MARKER}"),
        }
    }

    fn content_lines(&self) -> Vec<&str> {
        if self.content.is_empty() {
            Vec::new()
        } else {
            self.content.split('\n').collect()
        }
    }

    /// Marker and content lines, markers indented by `indent`
    pub fn render_lines(&self, indent: &str) -> Vec<String> {
        let mut lines = Vec::with_capacity(self.content_lines().len() + 2);
        lines.push(self.begin_line(indent));
        lines.extend(self.content_lines().into_iter().map(str::to_string));
        lines.push(format!("{indent}{END_MARKER}"));
        lines
    }

    pub fn render(&self, indent: &str) -> String {
        self.render_lines(indent).join("\n")
    }
}

/// A well-formed block found in existing source
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractedBlock {
    pub block: ManagedBlock,
    /// Leading whitespace of the BEGIN marker
    pub indent: String,
    /// 1-based line of the BEGIN marker
    pub start_line: usize,
    /// 1-based line of the END marker
    pub end_line: usize,
}

impl ExtractedBlock {
    /// Whether 1-based `line` falls inside the block's content
    pub fn contains_line(&self, line: usize) -> bool {
        line > self.start_line && line < self.end_line
    }
}

#[derive(Debug, Clone)]
enum Segment {
    /// Raw lines kept verbatim
    Preserved(Vec<String>),
    Block {
        extracted: ExtractedBlock,
        begin: String,
        /// Content lines exactly as read; an empty block and a single blank line differ
        body: Vec<String>,
        end: String,
    },
}

fn malformed(warnings: &mut Vec<String>, message: String) {
    warn!("{message}");
    warnings.push(message);
}

#[derive(Debug, Clone)]
struct ParsedSource {
    segments: Vec<Segment>,
    warnings: Vec<String>,
}

impl ParsedSource {
    fn parse(source: &str) -> Self {
        let lines: Vec<&str> = source.split('\n').collect();
        let mut segments = Vec::new();
        let mut warnings = Vec::new();
        let mut preserved: Vec<String> = Vec::new();
        let mut i = 0;

        while i < lines.len() {
            let line = lines[i];

            if is_end(line) {
                malformed(
                    &mut warnings,
                    format!("line {}: END GENERATED without a matching BEGIN, kept as text", i + 1),
                );
                preserved.push(line.to_string());
                i += 1;
                continue;
            }

            let Some(caps) = begin_re().captures(line) else {
                preserved.push(line.to_string());
                i += 1;
                continue;
            };

            // Find the closing marker, watching for a nested BEGIN
            let mut close = None;
            let mut nested = None;
            for (j, candidate) in lines.iter().enumerate().skip(i + 1) {
                if is_end(candidate) {
                    close = Some(j);
                    break;
                }
                if nested.is_none() && begin_re().is_match(candidate) {
                    nested = Some(j);
                }
            }

            let id = caps.get(2).map(|m| m.as_str().to_string());
            let bad_id = id.as_deref().map(|id| !is_valid_block_id(id)).unwrap_or(false);

            match (close, nested) {
                (None, _) => {
                    malformed(
                        &mut warnings,
                        format!("line {}: BEGIN GENERATED is never closed, kept as text", i + 1),
                    );
                    preserved.extend(lines[i..].iter().map(|l| l.to_string()));
                    i = lines.len();
                }
                (Some(j), Some(k)) => {
                    malformed(
                        &mut warnings,
                        format!(
                            "line {}: BEGIN GENERATED nested inside the block opened at line {}, kept as text",
                            k + 1,
                            i + 1
                        ),
                    );
                    preserved.extend(lines[i..=j].iter().map(|l| l.to_string()));
                    i = j + 1;
                }
                (Some(j), None) if bad_id => {
                    malformed(
                        &mut warnings,
                        format!(
                            "line {}: invalid block id '{}', kept as text",
                            i + 1,
                            id.unwrap_or_default()
                        ),
                    );
                    preserved.extend(lines[i..=j].iter().map(|l| l.to_string()));
                    i = j + 1;
                }
                (Some(j), None) => {
                    if !preserved.is_empty() {
                        segments.push(Segment::Preserved(std::mem::take(&mut preserved)));
                    }
                    let content = lines[i + 1..j].join("\n");
                    let indent = caps.get(1).map(|m| m.as_str()).unwrap_or("").to_string();
                    segments.push(Segment::Block {
                        extracted: ExtractedBlock {
                            block: ManagedBlock { id, content },
                            indent,
                            start_line: i + 1,
                            end_line: j + 1,
                        },
                        begin: line.to_string(),
                        body: lines[i + 1..j].iter().map(|l| l.to_string()).collect(),
                        end: lines[j].to_string(),
                    });
                    i = j + 1;
                }
            }
        }

        if !preserved.is_empty() {
            segments.push(Segment::Preserved(preserved));
        }
        Self { segments, warnings }
    }

    fn blocks(&self) -> impl Iterator<Item = &ExtractedBlock> {
        self.segments.iter().filter_map(|s| match s {
            Segment::Block { extracted, .. } => Some(extracted),
            Segment::Preserved(_) => None,
        })
    }
}

/// Well-formed blocks in `source`, plus warnings for malformed regions
pub fn extract_blocks(source: &str) -> (Vec<ExtractedBlock>, Vec<String>) {
    let parsed = ParsedSource::parse(source);
    let blocks = parsed.blocks().cloned().collect();
    (blocks, parsed.warnings)
}

/// What a merge did
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MergeReport {
    pub replaced: Vec<String>,
    pub appended: Vec<String>,
    pub untouched: Vec<String>,
    pub warnings: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergeResult {
    pub content: String,
    pub report: MergeReport,
}

fn take_by_id<'a>(pending: &mut [Option<&'a ManagedBlock>], id: &str) -> Option<&'a ManagedBlock> {
    pending
        .iter_mut()
        .find(|slot| matches!(slot, Some(b) if b.id.as_deref() == Some(id)))
        .and_then(Option::take)
}

/// Merge `blocks` into `existing` source
pub fn inject_blocks(existing: &str, blocks: &[ManagedBlock]) -> Result<MergeResult> {
    for block in blocks {
        block.validate()?;
    }

    let parsed = ParsedSource::parse(existing);
    let mut report = MergeReport {
        warnings: parsed.warnings.clone(),
        ..Default::default()
    };

    let mut pending: Vec<Option<&ManagedBlock>> = blocks.iter().map(Some).collect();
    let last_block = parsed
        .segments
        .iter()
        .rposition(|s| matches!(s, Segment::Block { .. }));

    let mut out: Vec<String> = Vec::new();
    let mut insert_at = None;
    let mut append_indent = String::new();

    for (index, segment) in parsed.segments.iter().enumerate() {
        match segment {
            Segment::Preserved(lines) => out.extend(lines.iter().cloned()),
            Segment::Block {
                extracted,
                begin,
                body,
                end,
            } => {
                let replacement = extracted
                    .block
                    .id
                    .as_deref()
                    .and_then(|id| take_by_id(&mut pending, id));
                out.push(begin.clone());
                match replacement {
                    Some(new) => {
                        out.extend(new.content_lines().into_iter().map(str::to_string));
                        report.replaced.push(new.label());
                    }
                    None => {
                        out.extend(body.iter().cloned());
                        report.untouched.push(extracted.block.label());
                    }
                }
                out.push(end.clone());
                if Some(index) == last_block {
                    insert_at = Some(out.len());
                    append_indent = extracted.indent.clone();
                }
            }
        }
    }

    let mut appended: Vec<String> = Vec::new();
    for block in pending.into_iter().flatten() {
        appended.push(String::new());
        appended.extend(block.render_lines(&append_indent));
        report.appended.push(block.label());
    }

    if !appended.is_empty() {
        match insert_at {
            Some(pos) => {
                out.splice(pos..pos, appended);
            }
            None => {
                // No existing blocks: append at end of file
                if out.last().map(|l| l.is_empty()).unwrap_or(false) {
                    out.pop();
                }
                if out.iter().all(|l| l.is_empty()) {
                    out.clear();
                    appended.remove(0);
                }
                out.extend(appended);
                out.push(String::new());
            }
        }
    }

    let content = out.join("\n");
    Ok(MergeResult { content, report })
}
