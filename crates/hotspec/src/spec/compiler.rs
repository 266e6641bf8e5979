//! Spec compiler: AST + anchored embeds -> file table and expectation queue
//!
//! Compilation is pure. The same AST, source and embeds always produce the
//! same [`CompiledSpec`].

use std::mem;
use std::ops::Range;
use tracing::debug;

use super::{
    Anchored, CompiledSpec, Embed, Expectation, FileAst, FileVariants, Label, Part, SpecAst, Step,
};
use crate::co::{Callback, Sub};
use crate::error::{HotError, HotResult};
use crate::html::{HtmlExpect, HtmlToken};

/// Compile a parsed spec
pub fn compile(ast: &SpecAst, source: &str, embeds: &[Anchored]) -> HotResult<CompiledSpec> {
    let mut anchored: Vec<&Anchored> = embeds.iter().collect();
    anchored.sort_by_key(|a| a.index);

    let mut files = super::FileTable::new();
    for file in &ast.files {
        if let Some(embed) = anchored.iter().find(|a| in_file(file, a.index)) {
            return Err(HotError::compile(format!(
                "{} can not be interpolated into file {}; only text is allowed in file content",
                embed_kind(&embed.value),
                file.path
            )));
        }
        files.insert(file.path.clone(), compile_file(file, source));
    }

    let expects = match &ast.expectations {
        Some(parts) => compile_expectations(parts, source, &anchored)?,
        None => {
            if !anchored.is_empty() {
                return Err(HotError::compile(
                    "interpolated values require an expectations section",
                ));
            }
            Vec::new()
        }
    };

    debug!(
        "Compiled spec {:?}: {} file(s), {} expectation(s)",
        ast.title,
        files.len(),
        expects.len()
    );

    Ok(CompiledSpec {
        title: ast.title.clone(),
        files,
        expects,
    })
}

fn in_file(file: &FileAst, index: usize) -> bool {
    file.parts.iter().any(|part| part.span.contains(&index))
}

fn embed_kind(embed: &Embed) -> &'static str {
    match embed {
        Embed::Coroutine(_) => "a sub handler",
        Embed::Function(_) => "a function",
        Embed::Matcher(_) => "a matcher",
    }
}

fn line_text<'a>(source: &'a str, part: &Part) -> &'a str {
    source[part.span.clone()].trim_end_matches(['\n', '\r'])
}

/// Labels in order of first appearance
fn labels_of(parts: &[Part]) -> Vec<Label> {
    let mut labels: Vec<Label> = Vec::new();
    for label in parts.iter().filter_map(|p| p.condition.as_ref()) {
        if !labels.contains(label) {
            labels.push(label.clone());
        }
    }
    labels
}

// ============================================================================
// FILES
// ============================================================================

fn compile_file(file: &FileAst, source: &str) -> FileVariants {
    let labels = labels_of(&file.parts);
    let mut wildcard: Vec<&str> = Vec::new();
    let mut buckets: Vec<Vec<&str>> = vec![Vec::new(); labels.len()];

    for part in &file.parts {
        let text = line_text(source, part);
        match &part.condition {
            None => {
                wildcard.push(text);
                for bucket in buckets.iter_mut() {
                    bucket.push(text);
                }
            }
            Some(label) => {
                if let Some(i) = labels.iter().position(|l| l == label) {
                    buckets[i].push(text);
                }
            }
        }
    }

    if labels.is_empty() {
        return FileVariants::unconditional(wildcard.join("\n"));
    }

    let mut variants = FileVariants::default();
    for (label, lines) in labels.into_iter().zip(buckets) {
        variants.insert(label, lines.join("\n"));
    }
    variants
}

// ============================================================================
// EXPECTATIONS
// ============================================================================

#[derive(Default)]
struct Bucket {
    title: Option<String>,
    lines_before: Vec<String>,
    region: Option<Vec<Step>>,
    lines_after: Vec<String>,
    hooks: Vec<Callback>,
}

impl Bucket {
    fn push_lines(&mut self, lines: &[String]) {
        let target = if self.region.is_some() {
            &mut self.lines_after
        } else {
            &mut self.lines_before
        };
        target.extend(lines.iter().cloned());
    }

    fn push_hook(&mut self, hook: &Callback) -> HotResult<()> {
        if self.hooks.len() == 2 {
            return Err(HotError::compile("Only two root level hooks are allowed"));
        }
        self.hooks.push(hook.clone());
        Ok(())
    }

    fn into_expectation(self, label: &Label) -> HotResult<Expectation> {
        let mut hooks = self.hooks.into_iter().map(Sub::Callback);
        let before = hooks.next();
        let after = hooks.next();

        let steps = match self.region {
            Some(mut steps) => {
                let has_lines = !self.lines_before.is_empty() || !self.lines_after.is_empty();
                if has_lines && !steps.iter().any(Step::is_html) {
                    return Err(HotError::compile(format!(
                        "HTML expectations would be ignored for [{}]: its step block has no html step to carry them",
                        label
                    )));
                }
                if !self.lines_before.is_empty() {
                    let text = self.lines_before.join("\n");
                    if let Some(Step::Html(html)) = steps.iter_mut().find(|s| s.is_html()) {
                        let mut tokens = vec![HtmlToken::Literal(text)];
                        tokens.extend(mem::replace(html, HtmlExpect::Tokens(Vec::new())).into_tokens());
                        *html = HtmlExpect::from_tokens(tokens);
                    }
                }
                if !self.lines_after.is_empty() {
                    let text = self.lines_after.join("\n");
                    if let Some(Step::Html(html)) = steps.iter_mut().rev().find(|s| s.is_html()) {
                        let mut tokens = mem::replace(html, HtmlExpect::Tokens(Vec::new())).into_tokens();
                        tokens.push(HtmlToken::Literal(text));
                        *html = HtmlExpect::from_tokens(tokens);
                    }
                }
                steps
            }
            None => {
                let lines: Vec<String> = self.lines_before.into_iter().chain(self.lines_after).collect();
                if lines.is_empty() {
                    Vec::new()
                } else {
                    vec![Step::Html(HtmlExpect::Text(lines.join("\n")))]
                }
            }
        };

        Ok(Expectation {
            title: self.title,
            before,
            after,
            steps,
        })
    }
}

fn compile_expectations(
    parts: &[Part],
    source: &str,
    anchored: &[&Anchored],
) -> HotResult<Vec<(Label, Expectation)>> {
    let mut labels = labels_of(parts);
    if labels.is_empty() && parts.iter().any(|p| !line_text(source, p).trim().is_empty()) {
        labels.push(Label::wildcard());
    }
    let mut buckets: Vec<Bucket> = labels.iter().map(|_| Bucket::default()).collect();
    let mut consumed = 0;

    for part in parts {
        let embeds = embeds_in(anchored, &part.span);
        consumed += embeds.len();

        let lines: Vec<String> = line_text(source, part)
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .map(str::to_string)
            .collect();

        let Some(label) = &part.condition else {
            for embed in &embeds {
                match &embed.value {
                    Embed::Coroutine(_) => {
                        return Err(HotError::compile(
                            "Sub handler must be inside an assertion condition",
                        ))
                    }
                    Embed::Matcher(_) => {
                        return Err(HotError::compile(
                            "Matchers must be inside an assertion condition",
                        ))
                    }
                    Embed::Function(_) if buckets.is_empty() => {
                        return Err(HotError::compile(
                            "Root level hooks need an expectation to attach to",
                        ))
                    }
                    Embed::Function(hook) => {
                        for bucket in buckets.iter_mut() {
                            bucket.push_hook(hook)?;
                        }
                    }
                }
            }
            for bucket in buckets.iter_mut() {
                bucket.push_lines(&lines);
            }
            continue;
        };

        let Some(i) = labels.iter().position(|l| l == label) else {
            continue;
        };
        let bucket = &mut buckets[i];
        if part.block && bucket.title.is_none() {
            bucket.title = part.title.clone();
        }

        let is_region = embeds
            .iter()
            .any(|e| matches!(e.value, Embed::Coroutine(_) | Embed::Matcher(_)));

        if is_region {
            if bucket.region.is_some() {
                return Err(HotError::compile(format!(
                    "Only one step block is allowed per condition, found another for [{}]",
                    label
                )));
            }
            bucket.region = Some(interleave(source, &part.span, &embeds, label)?);
        } else {
            for embed in &embeds {
                if let Embed::Function(hook) = &embed.value {
                    bucket.push_hook(hook)?;
                }
            }
            bucket.push_lines(&lines);
        }
    }

    if consumed != anchored.len() {
        return Err(HotError::compile(
            "interpolated values must be placed inside spec content, not on separator lines",
        ));
    }

    labels
        .into_iter()
        .zip(buckets)
        .map(|(label, bucket)| {
            let expectation = bucket.into_expectation(&label)?;
            Ok((label, expectation))
        })
        .collect()
}

fn embeds_in<'a>(anchored: &[&'a Anchored], span: &Range<usize>) -> Vec<&'a Anchored> {
    anchored
        .iter()
        .filter(|a| span.contains(&a.index))
        .copied()
        .collect()
}

/// Split a step region into html and sub steps at every coroutine embed
fn interleave(
    source: &str,
    span: &Range<usize>,
    embeds: &[&Anchored],
    label: &Label,
) -> HotResult<Vec<Step>> {
    let mut steps = Vec::new();
    let mut tokens = Vec::new();
    let mut cursor = span.start;

    for embed in embeds {
        push_literal(&mut tokens, &source[cursor..embed.index]);
        match &embed.value {
            Embed::Coroutine(sub) => {
                flush(&mut steps, &mut tokens);
                steps.push(Step::Sub(sub.clone()));
            }
            Embed::Matcher(re) => tokens.push(HtmlToken::Matcher(re.clone())),
            Embed::Function(_) => {
                return Err(HotError::compile(format!(
                    "Hook functions are not allowed inside the step block of [{}]",
                    label
                )))
            }
        }
        cursor = embed.index;
    }
    push_literal(&mut tokens, &source[cursor..span.end]);
    flush(&mut steps, &mut tokens);

    Ok(steps)
}

fn push_literal(tokens: &mut Vec<HtmlToken>, text: &str) {
    let text = text.trim();
    if !text.is_empty() {
        tokens.push(HtmlToken::Literal(text.to_string()));
    }
}

fn flush(steps: &mut Vec<Step>, tokens: &mut Vec<HtmlToken>) {
    if !tokens.is_empty() {
        steps.push(Step::Html(HtmlExpect::from_tokens(mem::take(tokens))));
    }
}
