//! Spec model: condition labels, file tables, expectations and the source builder
//!
//! ```text
//! SpecSource (text + anchored embeds)
//!     │  grammar::parse
//!     ▼
//! SpecAst { title, files: [FileAst { path, parts }], expectations: [Part] }
//!     │  compiler::compile
//!     ▼
//! CompiledSpec { files: FileTable, expects: [(Label, Expectation)] }
//! ```

pub mod compiler;
pub mod grammar;

use regex::Regex;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use std::ops::Range;

use crate::co::{Callback, Sub};
use crate::error::{HotError, HotResult};
use crate::html::HtmlExpect;

pub use compiler::compile;
pub use grammar::parse;

/// Key of the unconditional variant of a file
pub const WILDCARD: &str = "*";

/// Identifier selecting one variant of a file or one expected outcome
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct Label(String);

impl Label {
    pub fn new(label: impl Into<String>) -> Self {
        Self(label.into())
    }

    pub fn wildcard() -> Self {
        Self(WILDCARD.to_string())
    }

    pub fn is_wildcard(&self) -> bool {
        self.0 == WILDCARD
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Label {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Label {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for Label {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&Label> for Label {
    fn from(label: &Label) -> Self {
        label.clone()
    }
}

macro_rules! label_from_int {
    ($($t:ty),*) => {
        $(impl From<$t> for Label {
            fn from(n: $t) -> Self {
                Self(n.to_string())
            }
        })*
    };
}

label_from_int!(i32, i64, u32, u64, usize);

/// Content variants of one file, keyed by label
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct FileVariants(BTreeMap<Label, String>);

impl FileVariants {
    /// A file without conditions: only the wildcard variant
    pub fn unconditional(content: impl Into<String>) -> Self {
        let mut map = BTreeMap::new();
        map.insert(Label::wildcard(), content.into());
        Self(map)
    }

    pub(crate) fn insert(&mut self, label: Label, content: String) {
        self.0.insert(label, content);
    }

    /// Raw lookup, without wildcard fallback
    pub fn get(&self, label: &Label) -> Option<&str> {
        self.0.get(label).map(String::as_str)
    }

    /// Content for `label`, falling back to the wildcard variant
    pub fn resolve(&self, label: &Label) -> Option<&str> {
        self.get(label).or_else(|| self.get(&Label::wildcard()))
    }

    pub fn labels(&self) -> impl Iterator<Item = &Label> {
        self.0.keys()
    }
}

/// `path -> variants` for every file of a spec
pub type FileTable = BTreeMap<String, FileVariants>;

/// Resolve every file of `table` for `label`. Files with no matching variant are skipped.
pub fn render_label(table: &FileTable, label: &Label) -> BTreeMap<String, String> {
    table
        .iter()
        .filter_map(|(path, variants)| {
            variants
                .resolve(label)
                .map(|content| (path.clone(), content.to_string()))
        })
        .collect()
}

/// One unit of an expectation
#[derive(Clone)]
pub enum Step {
    Html(HtmlExpect),
    Sub(Sub),
    Function(Callback),
}

impl Step {
    pub fn html(html: impl Into<String>) -> Self {
        Step::Html(HtmlExpect::Text(html.into()))
    }

    pub fn sub(sub: impl Into<Sub>) -> Self {
        Step::Sub(sub.into())
    }

    pub fn function(callback: Callback) -> Self {
        Step::Function(callback)
    }

    pub fn is_html(&self) -> bool {
        matches!(self, Step::Html(_))
    }
}

impl From<&str> for Step {
    fn from(html: &str) -> Self {
        Step::html(html)
    }
}

impl From<HtmlExpect> for Step {
    fn from(html: HtmlExpect) -> Self {
        Step::Html(html)
    }
}

impl fmt::Debug for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Step::Html(html) => f.debug_tuple("Html").field(html).finish(),
            Step::Sub(sub) => f.debug_tuple("Sub").field(sub).finish(),
            Step::Function(_) => f.write_str("Function(..)"),
        }
    }
}

/// Ordered steps asserted for one label, bracketed by optional hooks
#[derive(Debug, Clone, Default)]
pub struct Expectation {
    pub title: Option<String>,
    pub before: Option<Sub>,
    pub after: Option<Sub>,
    pub steps: Vec<Step>,
}

impl Expectation {
    pub fn with_steps(steps: Vec<Step>) -> Self {
        Self {
            steps,
            ..Default::default()
        }
    }

    /// Append `other` into this expectation. Hooks may only be set once.
    pub fn merge(&mut self, label: &Label, other: Expectation) -> HotResult<()> {
        if self.title.is_none() {
            self.title = other.title;
        }
        merge_hook(&mut self.before, other.before, label, "before")?;
        merge_hook(&mut self.after, other.after, label, "after")?;
        self.steps.extend(other.steps);
        Ok(())
    }
}

fn merge_hook(slot: &mut Option<Sub>, hook: Option<Sub>, label: &Label, name: &str) -> HotResult<()> {
    match (slot.is_some(), hook) {
        (true, Some(_)) => Err(HotError::usage(format!(
            "a {} hook is already registered for [{}]",
            name, label
        ))),
        (false, Some(hook)) => {
            *slot = Some(hook);
            Ok(())
        }
        (_, None) => Ok(()),
    }
}

/// Expectations in registration order
pub type Expects = Vec<(Label, Expectation)>;

/// Merge `expectation` into the entry for `label`, appending a new entry when absent
pub fn merge_expect(expects: &mut Expects, label: Label, expectation: Expectation) -> HotResult<()> {
    match expects.iter_mut().find(|(l, _)| *l == label) {
        Some((_, existing)) => existing.merge(&label, expectation),
        None => {
            expects.push((label, expectation));
            Ok(())
        }
    }
}

/// Result of compiling one spec
#[derive(Debug, Clone, Default)]
pub struct CompiledSpec {
    pub title: Option<String>,
    pub files: FileTable,
    pub expects: Expects,
}

// ============================================================================
// AST
// ============================================================================

/// A fragment of a file or of the expectations section
#[derive(Debug, Clone, PartialEq)]
pub struct Part {
    pub condition: Option<Label>,
    /// Byte range into the source, trailing newline included
    pub span: Range<usize>,
    /// Multi-line `::label::` region
    pub block: bool,
    /// Free text following a block opener
    pub title: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FileAst {
    pub path: String,
    pub parts: Vec<Part>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SpecAst {
    pub title: Option<String>,
    pub files: Vec<FileAst>,
    pub expectations: Option<Vec<Part>>,
}

// ============================================================================
// SOURCE BUILDER
// ============================================================================

/// A value interpolated into spec source
#[derive(Clone)]
pub enum Embed {
    /// Step break inside an assertion condition
    Coroutine(Sub),
    /// Root level before/after hook
    Function(Callback),
    /// Inline matcher token of an html step
    Matcher(Regex),
}

impl fmt::Debug for Embed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Embed::Coroutine(sub) => f.debug_tuple("Coroutine").field(sub).finish(),
            Embed::Function(_) => f.write_str("Function(..)"),
            Embed::Matcher(re) => f.debug_tuple("Matcher").field(re).finish(),
        }
    }
}

/// An embedded value anchored at a byte offset of the source
#[derive(Debug, Clone)]
pub struct Anchored {
    pub index: usize,
    pub value: Embed,
}

/// Spec text with interpolated values
///
/// Plain values are spliced into the text; functions and matchers are kept
/// aside, anchored at the offset where they were inserted.
#[derive(Debug, Clone, Default)]
pub struct SpecSource {
    text: String,
    embeds: Vec<Anchored>,
}

impl SpecSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn text(mut self, text: impl fmt::Display) -> Self {
        self.text.push_str(&text.to_string());
        self
    }

    pub fn sub(self, sub: impl Into<Sub>) -> Self {
        self.embed(Embed::Coroutine(sub.into()))
    }

    pub fn function(self, callback: Callback) -> Self {
        self.embed(Embed::Function(callback))
    }

    pub fn matcher(self, matcher: Regex) -> Self {
        self.embed(Embed::Matcher(matcher))
    }

    fn embed(mut self, value: Embed) -> Self {
        self.embeds.push(Anchored {
            index: self.text.len(),
            value,
        });
        self
    }

    pub fn as_str(&self) -> &str {
        &self.text
    }

    pub fn embeds(&self) -> &[Anchored] {
        &self.embeds
    }

    /// Parse and compile this source
    pub fn compile(&self) -> HotResult<CompiledSpec> {
        let mut text = self.text.clone();
        if !text.ends_with('\n') {
            text.push('\n');
        }
        let ast = parse(&text)?;
        compile(&ast, &text, &self.embeds)
    }
}

impl From<&str> for SpecSource {
    fn from(text: &str) -> Self {
        Self::new().text(text)
    }
}

impl From<String> for SpecSource {
    fn from(text: String) -> Self {
        Self::new().text(text)
    }
}
