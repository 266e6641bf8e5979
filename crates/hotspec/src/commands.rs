//! Command catalog
//!
//! Constructors for every command a test script may send. Commands are plain
//! values; the interpreter looks up their handler by kind and phase.

use futures::future::{BoxFuture, FutureExt};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use crate::co::Sub;
use crate::console::{IgnorePolicy, PageErrorHook};
use crate::env::BeforeLoadHook;
use crate::error::HotResult;
use crate::spec::{CompiledSpec, Expectation, Label, SpecSource, Step};

/// Wraps spec-provided content into a complete file
pub type Template = Arc<dyn Fn(&str) -> String + Send + Sync>;

/// Content of an explicitly provided file
#[derive(Debug, Clone, PartialEq)]
pub enum FileContent {
    /// Written verbatim
    Text(String),
    /// Rendered through the template registered for the file's path
    Body(String),
}

impl From<&str> for FileContent {
    fn from(text: &str) -> Self {
        FileContent::Text(text.to_string())
    }
}

impl From<String> for FileContent {
    fn from(text: String) -> Self {
        FileContent::Text(text)
    }
}

/// Files keyed by path
pub type Files = BTreeMap<String, FileContent>;

/// Either a condition label or an explicit set of files
#[derive(Debug, Clone)]
pub enum Target {
    Label(Label),
    Files(Files),
}

pub enum SpecCommand {
    Source(SpecSource),
    Compiled(CompiledSpec),
    Expect(Label, Expectation),
    Flush,
    Discard,
}

pub enum Wait {
    Duration(Duration),
    Future(BoxFuture<'static, HotResult<Value>>),
}

impl Wait {
    pub(crate) fn into_future(self) -> BoxFuture<'static, HotResult<Value>> {
        match self {
            Wait::Duration(duration) => async move {
                tokio::time::sleep(duration).await;
                Ok(Value::Null)
            }
            .boxed(),
            Wait::Future(future) => future,
        }
    }
}

pub enum ConsoleCommand {
    IgnoreWarnings(IgnorePolicy),
    IgnoreErrors(IgnorePolicy),
    OnPageError(PageErrorHook),
}

/// Member path on the live page, e.g. `page().member("keyboard").member("press")`
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PagePath {
    path: Vec<String>,
}

impl PagePath {
    pub fn member(mut self, name: impl Into<String>) -> Self {
        self.path.push(name.into());
        self
    }

    /// Call the member as a method. Without arguments this resolves the
    /// member itself, like `Command::from(path)`.
    pub fn call(self, args: Vec<Value>) -> Command {
        Command::Page(PageCall {
            path: self.path,
            args: Some(args),
        })
    }
}

/// Resolve the value of the member
impl From<PagePath> for Command {
    fn from(path: PagePath) -> Self {
        Command::Page(PageCall {
            path: path.path,
            args: None,
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PageCall {
    pub path: Vec<String>,
    /// `None` or no arguments reads the member, arguments invoke it
    pub args: Option<Vec<Value>>,
}

impl PageCall {
    /// Whether this resolves the member instead of invoking it
    pub fn is_read(&self) -> bool {
        self.args.as_ref().map_or(true, Vec::is_empty)
    }

    pub fn display_path(&self) -> String {
        std::iter::once("page")
            .chain(self.path.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(".")
    }
}

pub enum Command {
    Spec(SpecCommand),
    Init(Target),
    Templates(BTreeMap<String, Template>),
    Change(Target),
    Wait(Wait),
    Page(PageCall),
    InnerText(String),
    Debug,
    Console(ConsoleCommand),
    BeforeLoad(BeforeLoadHook),
}

impl Command {
    pub fn kind(&self) -> &'static str {
        match self {
            Command::Spec(_) => "spec",
            Command::Init(_) => "init",
            Command::Templates(_) => "templates",
            Command::Change(_) => "change",
            Command::Wait(_) => "wait",
            Command::Page(_) => "page",
            Command::InnerText(_) => "innerText",
            Command::Debug => "$$debug",
            Command::Console(_) => "cons",
            Command::BeforeLoad(_) => "beforeLoad",
        }
    }

    /// Whether the command resolves without a live page.
    /// The first command without one moves the test to the run phase.
    pub fn has_init_handler(&self) -> bool {
        match self {
            Command::Spec(SpecCommand::Flush | SpecCommand::Discard) => false,
            Command::Spec(_)
            | Command::Init(_)
            | Command::Templates(_)
            | Command::Debug
            | Command::Console(_)
            | Command::BeforeLoad(_) => true,
            Command::Change(_) | Command::Wait(_) | Command::Page(_) | Command::InnerText(_) => false,
        }
    }
}

impl fmt::Debug for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Command::Init(target) | Command::Change(target) => {
                f.debug_tuple(self.kind()).field(target).finish()
            }
            Command::Page(call) if call.args.is_none() => f.write_str(&call.display_path()),
            Command::Page(call) => write!(
                f,
                "{}({} args)",
                call.display_path(),
                call.args.as_ref().map_or(0, Vec::len)
            ),
            Command::InnerText(selector) => f.debug_tuple(self.kind()).field(selector).finish(),
            _ => f.write_str(self.kind()),
        }
    }
}

// ============================================================================
// CONSTRUCTORS
// ============================================================================

/// Register spec text (files and expectations)
pub fn spec(source: impl Into<SpecSource>) -> Command {
    Command::Spec(SpecCommand::Source(source.into()))
}

/// Register an already compiled spec
pub fn spec_compiled(compiled: CompiledSpec) -> Command {
    Command::Spec(SpecCommand::Compiled(compiled))
}

/// Append steps to the expectation of `label`
pub fn expect(label: impl Into<Label>, steps: Vec<Step>) -> Command {
    Command::Spec(SpecCommand::Expect(label.into(), Expectation::with_steps(steps)))
}

/// Set the before hook of `label`
pub fn before(label: impl Into<Label>, hook: impl Into<Sub>) -> Command {
    Command::Spec(SpecCommand::Expect(
        label.into(),
        Expectation {
            before: Some(hook.into()),
            ..Default::default()
        },
    ))
}

/// Set the after hook of `label`
pub fn after(label: impl Into<Label>, hook: impl Into<Sub>) -> Command {
    Command::Spec(SpecCommand::Expect(
        label.into(),
        Expectation {
            after: Some(hook.into()),
            ..Default::default()
        },
    ))
}

/// Assert every pending expectation now
pub fn flush() -> Command {
    Command::Spec(SpecCommand::Flush)
}

/// Drop every pending expectation without asserting it
pub fn discard() -> Command {
    Command::Spec(SpecCommand::Discard)
}

/// Start from the files of `label`; its expectation must be the first one
pub fn init(label: impl Into<Label>) -> Command {
    Command::Init(Target::Label(label.into()))
}

/// Start from explicit files
pub fn init_files(files: Files) -> Command {
    Command::Init(Target::Files(files))
}

pub fn templates(templates: BTreeMap<String, Template>) -> Command {
    Command::Templates(templates)
}

/// Write the files of `label`, asserting pending expectations up to it
pub fn change(label: impl Into<Label>) -> Command {
    Command::Change(Target::Label(label.into()))
}

/// Write explicit files without asserting anything
pub fn change_files(files: Files) -> Command {
    Command::Change(Target::Files(files))
}

pub fn wait(duration: Duration) -> Command {
    Command::Wait(Wait::Duration(duration))
}

/// Wait for an arbitrary future; its value is the command's value
pub fn wait_for<F>(future: F) -> Command
where
    F: Future<Output = HotResult<Value>> + Send + 'static,
{
    Command::Wait(Wait::Future(future.boxed()))
}

pub fn page() -> PagePath {
    PagePath::default()
}

pub fn inner_text(selector: impl Into<String>) -> Command {
    Command::InnerText(selector.into())
}

/// Snapshot of the test state
pub fn debug() -> Command {
    Command::Debug
}

pub fn ignore_warnings(policy: impl Into<IgnorePolicy>) -> Command {
    Command::Console(ConsoleCommand::IgnoreWarnings(policy.into()))
}

pub fn ignore_errors(policy: impl Into<IgnorePolicy>) -> Command {
    Command::Console(ConsoleCommand::IgnoreErrors(policy.into()))
}

/// Let the test claim uncaught page errors as expected (hook returns `true`)
pub fn on_page_error(hook: PageErrorHook) -> Command {
    Command::Console(ConsoleCommand::OnPageError(hook))
}

pub fn before_load(hook: BeforeLoadHook) -> Command {
    Command::BeforeLoad(hook)
}
