//! Collaborator contracts of the live environment
//!
//! The bundler/dev-server, its virtual filesystem and the browser driver live
//! outside this crate. The interpreter only talks to them through the
//! [`Environment`] and [`Page`] traits.

use async_trait::async_trait;
use futures::future::BoxFuture;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::broadcast;

use crate::console::FailSignal;
use crate::error::HotResult;

/// Rendered file contents keyed by path
pub type FileMap = BTreeMap<String, String>;

/// Hook run against the page before it navigates to the application
pub type BeforeLoadHook = Arc<dyn Fn(Arc<dyn Page>) -> BoxFuture<'static, HotResult<()>> + Send + Sync>;

/// Kind of a console message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsoleKind {
    Log,
    Debug,
    Info,
    Warning,
    Error,
}

impl ConsoleKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConsoleKind::Log => "log",
            ConsoleKind::Debug => "debug",
            ConsoleKind::Info => "info",
            ConsoleKind::Warning => "warning",
            ConsoleKind::Error => "error",
        }
    }
}

/// Event emitted by a live page
#[derive(Debug, Clone, PartialEq)]
pub enum PageEvent {
    Console { kind: ConsoleKind, text: String },
    /// Uncaught exception in the page
    PageError(String),
    /// Generic page failure (crash)
    Crash(String),
    /// Graceful teardown of the page
    Closed,
}

/// What a member path of the page resolves to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageMember {
    Property,
    Method,
}

/// Handle on the live page
#[async_trait]
pub trait Page: Send + Sync {
    /// Subscribe to console, error and teardown events
    fn events(&self) -> broadcast::Receiver<PageEvent>;

    /// Inner HTML of the first element matching `selector`
    async fn inner_html(&self, selector: &str) -> HotResult<Option<String>>;

    /// Inner text of the first element matching `selector`
    async fn inner_text(&self, selector: &str) -> HotResult<Option<String>>;

    /// Describe the member at `path`, `None` when it does not exist
    fn member(&self, path: &[String]) -> Option<PageMember>;

    /// Read the value at `path`
    async fn get(&self, path: &[String]) -> HotResult<Value>;

    /// Call the method at `path`
    async fn call(&self, path: &[String], args: Vec<Value>) -> HotResult<Value>;

    /// Close the page; emits [`PageEvent::Closed`]
    async fn close(&self) -> HotResult<()>;
}

/// Dev server plus virtual filesystem
#[async_trait]
pub trait Environment: Send + Sync {
    /// Called once per test with the signal collaborators use to fail it asynchronously
    fn attach(&self, _fail: FailSignal) {}

    /// Reset the filesystem to exactly `files`
    async fn reset(&self, files: &FileMap) -> HotResult<()>;

    /// Write `files` then wait until the page has reloaded or the change was found to be a no-op
    async fn write_and_settle(&self, page: &dyn Page, files: &FileMap) -> HotResult<()>;

    /// Open a page on `url`, running `before_goto` before navigation
    async fn load_page(&self, url: &str, before_goto: Option<BeforeLoadHook>) -> HotResult<Arc<dyn Page>>;
}
