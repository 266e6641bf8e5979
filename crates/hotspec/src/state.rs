//! Per-test mutable state

use parking_lot::RwLock;
use serde::Serialize;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::Arc;

use crate::commands::{FileContent, Files, Template};
use crate::console::{ConsolePolicy, SharedPolicy};
use crate::env::{BeforeLoadHook, FileMap, Page};
use crate::error::{HotError, HotResult};
use crate::spec::{self, merge_expect, CompiledSpec, Expectation, Expects, FileTable, Label};

/// Everything one test invocation accumulates, owned by its interpreter
pub struct TestState {
    pub title: Option<String>,
    pub templates: BTreeMap<String, Template>,
    pub specs: FileTable,
    /// Files the environment is reset to when the run phase starts
    pub inits: FileMap,
    pub expects: Expects,
    /// Pending expectations, materialized once when the run phase starts
    pub remaining_expects: Option<VecDeque<(Label, Expectation)>>,
    pub page: Option<Arc<dyn Page>>,
    /// Member values read from the page, keyed by dotted path
    pub page_cache: HashMap<String, Value>,
    pub console: SharedPolicy,
    pub before_load: Option<BeforeLoadHook>,
    pub started: bool,
    /// Label passed to `init`; its expectation must be the first one
    pub init_spec_label: Option<Label>,
}

impl Default for TestState {
    fn default() -> Self {
        Self {
            title: None,
            templates: BTreeMap::new(),
            specs: FileTable::new(),
            inits: FileMap::new(),
            expects: Expects::new(),
            remaining_expects: None,
            page: None,
            page_cache: HashMap::new(),
            console: Arc::new(RwLock::new(ConsolePolicy::default())),
            before_load: None,
            started: false,
            init_spec_label: None,
        }
    }
}

impl TestState {
    /// Merge a compiled spec: files by path, expectations by label
    pub fn register(&mut self, compiled: CompiledSpec) -> HotResult<()> {
        if self.title.is_none() {
            self.title = compiled.title;
        }
        self.specs.extend(compiled.files);
        for (label, expectation) in compiled.expects {
            merge_expect(&mut self.expects, label, expectation)?;
        }
        Ok(())
    }

    /// Files of `label` with templates applied
    pub fn render_label(&self, label: &Label) -> FileMap {
        spec::render_label(&self.specs, label)
            .into_iter()
            .map(|(path, content)| {
                let content = match self.templates.get(&path) {
                    Some(template) => template(&content),
                    None => content,
                };
                (path, content)
            })
            .collect()
    }

    /// Render explicitly provided files
    pub fn render_files(&self, files: &Files) -> HotResult<FileMap> {
        files
            .iter()
            .map(|(path, content)| {
                let rendered = match content {
                    FileContent::Text(text) => text.clone(),
                    FileContent::Body(body) => {
                        let template = self.templates.get(path).ok_or_else(|| {
                            HotError::usage(format!("no template registered for {}", path))
                        })?;
                        template(body)
                    }
                };
                Ok((path.clone(), rendered))
            })
            .collect()
    }

    pub fn pending_labels(&self) -> Vec<Label> {
        self.remaining_expects
            .iter()
            .flatten()
            .map(|(label, _)| label.clone())
            .collect()
    }

    pub fn is_pending(&self, label: &Label) -> bool {
        self.remaining_expects
            .as_ref()
            .is_some_and(|queue| queue.iter().any(|(l, _)| l == label))
    }

    /// Drop every pending expectation
    pub fn discard(&mut self) {
        if let Some(queue) = self.remaining_expects.as_mut() {
            queue.clear();
        }
    }

    pub fn snapshot(&self) -> StateSnapshot {
        let console = self.console.read();
        StateSnapshot {
            title: self.title.clone(),
            started: self.started,
            templates: self.templates.keys().cloned().collect(),
            specs: self.specs.clone(),
            inits: self.inits.clone(),
            expects: self
                .expects
                .iter()
                .map(|(label, expectation)| ExpectSummary {
                    label: label.clone(),
                    title: expectation.title.clone(),
                    steps: expectation.steps.len(),
                    before: expectation.before.is_some(),
                    after: expectation.after.is_some(),
                })
                .collect(),
            remaining_expects: self.remaining_expects.as_ref().map(|_| self.pending_labels()),
            init_spec_label: self.init_spec_label.clone(),
            page_loaded: self.page.is_some(),
            ignore_warnings: console.ignore_warnings.describe(),
            ignore_errors: console.ignore_errors.describe(),
        }
    }
}

/// Serializable view of [`TestState`], the value of the `$$debug` command
#[derive(Debug, Clone, Serialize)]
pub struct StateSnapshot {
    pub title: Option<String>,
    pub started: bool,
    pub templates: Vec<String>,
    pub specs: FileTable,
    pub inits: FileMap,
    pub expects: Vec<ExpectSummary>,
    pub remaining_expects: Option<Vec<Label>>,
    pub init_spec_label: Option<Label>,
    pub page_loaded: bool,
    pub ignore_warnings: String,
    pub ignore_errors: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ExpectSummary {
    pub label: Label,
    pub title: Option<String>,
    pub steps: usize,
    pub before: bool,
    pub after: bool,
}
