//! Line based grammar of the spec text format
//!
//! ```text
//! # Optional title
//! ---- App.svelte ----
//! shared line
//! ::0 line only present in variant 0
//! ::1::
//!   lines only present in variant 1
//! ::
//! ****
//! ::0 <h1>expected for 0</h1>
//! ::1:: optional block title
//!   <h1>expected for 1</h1>
//! ::
//! ```
//!
//! Indentation common to every non-blank line is ignored, so specs can be
//! written indented inside Rust string literals. Part spans are byte ranges into
//! the unmodified input, which keeps interpolated values anchored.

use once_cell::sync::Lazy;
use regex::Regex;

use super::{FileAst, Label, Part, SpecAst};
use crate::error::{HotError, HotResult};

static TITLE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^#\s+(.*?)\s*$").unwrap());
static FILE_SEP: Lazy<Regex> = Lazy::new(|| Regex::new(r"^-{3,}\s+(\S.*?)\s+-{3,}\s*$").unwrap());
static EXPECT_SEP: Lazy<Regex> = Lazy::new(|| Regex::new(r"^(?:\*\s*){3,}$").unwrap());
static BLOCK_OPEN: Lazy<Regex> = Lazy::new(|| Regex::new(r"^::([\w.-]+)::(?:\s+(.*?))?\s*$").unwrap());
static BLOCK_CLOSE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^:+\s*$").unwrap());
static CONDITION: Lazy<Regex> = Lazy::new(|| Regex::new(r"^::([\w.-]+)(?:\s|$)").unwrap());

/// One physical line of the source
struct Line<'a> {
    number: usize,
    /// Offset of the first byte of the line
    offset: usize,
    /// Offset of the first byte after the common indentation
    start: usize,
    /// Offset just past the line terminator
    end: usize,
    /// Line text without indentation and terminator
    text: &'a str,
}

fn split_lines(source: &str) -> Vec<Line<'_>> {
    let mut raw = Vec::new();
    let mut offset = 0;
    for (number, chunk) in source.split_inclusive('\n').enumerate() {
        raw.push((number + 1, offset, chunk));
        offset += chunk.len();
    }

    let indent = raw
        .iter()
        .filter(|(_, _, chunk)| !chunk.trim().is_empty())
        .map(|(_, _, chunk)| chunk.len() - chunk.trim_start().len())
        .min()
        .unwrap_or(0);

    raw.into_iter()
        .map(|(number, offset, chunk)| {
            let body = chunk.trim_end_matches(['\n', '\r']);
            let strip = indent.min(body.len() - body.trim_start().len());
            Line {
                number,
                offset,
                start: offset + strip,
                end: offset + chunk.len(),
                text: &body[strip..],
            }
        })
        .collect()
}

enum Section {
    Preamble,
    File(usize),
    Expectations,
}

struct OpenBlock {
    label: Label,
    title: Option<String>,
    line: usize,
    /// Offset of the first inner line
    start: usize,
}

/// Parse spec text into its AST
pub fn parse(source: &str) -> HotResult<SpecAst> {
    let mut ast = SpecAst::default();
    let mut section = Section::Preamble;
    let mut block: Option<OpenBlock> = None;

    for line in split_lines(source) {
        let trimmed = line.text.trim();

        if block.is_some() {
            if BLOCK_CLOSE.is_match(trimmed) {
                if let Some(open) = block.take() {
                    close_block(&mut ast, &section, open, line.offset)?;
                }
                continue;
            }
            let Some(open) = block.as_ref() else {
                continue;
            };
            if FILE_SEP.is_match(trimmed) || EXPECT_SEP.is_match(trimmed) {
                return Err(unclosed(open));
            }
            if CONDITION.is_match(trimmed) {
                return Err(HotError::compile(format!(
                    "line {}: nested condition inside ::{}:: block",
                    line.number, open.label
                )));
            }
            if let Section::File(index) = section {
                ast.files[index].parts.push(Part {
                    condition: Some(open.label.clone()),
                    span: line.start..line.end,
                    block: true,
                    title: None,
                });
            }
            continue;
        }

        if let Some(caps) = FILE_SEP.captures(trimmed) {
            if matches!(section, Section::Expectations) {
                return Err(HotError::compile(format!(
                    "line {}: file section after the expectations section",
                    line.number
                )));
            }
            finish_file(&mut ast, &section, source);
            ast.files.push(FileAst {
                path: caps[1].to_string(),
                parts: Vec::new(),
            });
            section = Section::File(ast.files.len() - 1);
            continue;
        }

        if EXPECT_SEP.is_match(trimmed) {
            if matches!(section, Section::Expectations) {
                return Err(HotError::compile(format!(
                    "line {}: duplicate expectations separator",
                    line.number
                )));
            }
            finish_file(&mut ast, &section, source);
            ast.expectations = Some(Vec::new());
            section = Section::Expectations;
            continue;
        }

        if let Section::Preamble = section {
            if trimmed.is_empty() {
                continue;
            }
            if let Some(caps) = TITLE.captures(trimmed) {
                if ast.title.is_none() {
                    ast.title = Some(caps[1].to_string());
                    continue;
                }
            }
            return Err(HotError::compile(format!(
                "line {}: unexpected content before the first section: {:?}",
                line.number, trimmed
            )));
        }

        if let Some(caps) = BLOCK_OPEN.captures(trimmed) {
            block = Some(OpenBlock {
                label: Label::new(&caps[1]),
                title: caps.get(2).map(|m| m.as_str().to_string()).filter(|t| !t.is_empty()),
                line: line.number,
                start: line.end,
            });
            continue;
        }

        if BLOCK_CLOSE.is_match(trimmed) {
            return Err(HotError::compile(format!(
                "line {}: block closer without an open block",
                line.number
            )));
        }

        let content = line.text.trim_start();
        let part = if let Some(caps) = CONDITION.captures(content) {
            let label = caps.get(1).map(|m| m.as_str()).unwrap_or_default();
            let head = line.text.len() - content.len() + caps.get(0).map(|m| m.end()).unwrap_or_default();
            Part {
                condition: Some(Label::new(label)),
                span: line.start + head..line.end,
                block: false,
                title: None,
            }
        } else {
            Part {
                condition: None,
                span: line.start..line.end,
                block: false,
                title: None,
            }
        };

        match section {
            Section::File(index) => ast.files[index].parts.push(part),
            Section::Expectations => {
                if let Some(parts) = ast.expectations.as_mut() {
                    parts.push(part);
                }
            }
            Section::Preamble => {}
        }
    }

    if let Some(open) = block {
        return Err(unclosed(&open));
    }
    finish_file(&mut ast, &section, source);

    Ok(ast)
}

fn unclosed(open: &OpenBlock) -> HotError {
    HotError::compile(format!(
        "line {}: unclosed block ::{}::",
        open.line, open.label
    ))
}

fn close_block(ast: &mut SpecAst, section: &Section, open: OpenBlock, end: usize) -> HotResult<()> {
    match section {
        Section::Expectations => {
            if let Some(parts) = ast.expectations.as_mut() {
                parts.push(Part {
                    condition: Some(open.label),
                    span: open.start..end.max(open.start),
                    block: true,
                    title: open.title,
                });
            }
            Ok(())
        }
        Section::File(_) => Ok(()),
        Section::Preamble => Err(HotError::compile(format!(
            "line {}: block outside of any section",
            open.line
        ))),
    }
}

/// Drop blank lines surrounding the content of the current file
fn finish_file(ast: &mut SpecAst, section: &Section, source: &str) {
    let Section::File(index) = section else {
        return;
    };
    let parts = &mut ast.files[*index].parts;
    let blank = |part: &Part| part.condition.is_none() && source[part.span.clone()].trim().is_empty();
    while parts.last().is_some_and(blank) {
        parts.pop();
    }
    while parts.first().is_some_and(blank) {
        parts.remove(0);
    }
}
