//! Console monitor and the shared failure signal
//!
//! The monitor runs as its own task for the lifetime of a page session. It
//! never sits on the command path: it fails the test by rejecting the
//! [`FailSignal`] that the harness races against the main command flow.

use parking_lot::{Mutex, RwLock};
use regex::Regex;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{sleep_until, Instant};
use tracing::{debug, trace, warn};

use crate::env::{ConsoleKind, PageEvent};
use crate::error::{HotError, HotResult};

/// Returns `true` when the test claims the page error as expected
pub type PageErrorHook = Arc<dyn Fn(&str) -> bool + Send + Sync>;

/// Matches one console message
#[derive(Debug, Clone)]
pub enum MessageMatcher {
    Exact(String),
    Pattern(Regex),
}

impl MessageMatcher {
    /// Compile `pattern` into a regex matcher
    pub fn pattern(pattern: &str) -> HotResult<Self> {
        Ok(MessageMatcher::Pattern(Regex::new(pattern)?))
    }

    pub fn matches(&self, text: &str) -> bool {
        match self {
            MessageMatcher::Exact(expected) => expected == text,
            MessageMatcher::Pattern(re) => re.is_match(text),
        }
    }
}

impl From<&str> for MessageMatcher {
    fn from(text: &str) -> Self {
        MessageMatcher::Exact(text.to_string())
    }
}

impl From<String> for MessageMatcher {
    fn from(text: String) -> Self {
        MessageMatcher::Exact(text)
    }
}

impl From<Regex> for MessageMatcher {
    fn from(re: Regex) -> Self {
        MessageMatcher::Pattern(re)
    }
}

/// Which messages of one console kind are tolerated
#[derive(Debug, Clone, Default)]
pub enum IgnorePolicy {
    #[default]
    Nothing,
    All,
    Matching(Vec<MessageMatcher>),
}

impl IgnorePolicy {
    pub fn ignores(&self, text: &str) -> bool {
        match self {
            IgnorePolicy::Nothing => false,
            IgnorePolicy::All => true,
            IgnorePolicy::Matching(matchers) => matchers.iter().any(|m| m.matches(text)),
        }
    }

    pub fn describe(&self) -> String {
        match self {
            IgnorePolicy::Nothing => "none".to_string(),
            IgnorePolicy::All => "all".to_string(),
            IgnorePolicy::Matching(matchers) => format!("{} matcher(s)", matchers.len()),
        }
    }
}

impl From<bool> for IgnorePolicy {
    fn from(all: bool) -> Self {
        if all {
            IgnorePolicy::All
        } else {
            IgnorePolicy::Nothing
        }
    }
}

impl From<Vec<MessageMatcher>> for IgnorePolicy {
    fn from(matchers: Vec<MessageMatcher>) -> Self {
        IgnorePolicy::Matching(matchers)
    }
}

/// Console configuration of one test
#[derive(Clone, Default)]
pub struct ConsolePolicy {
    pub ignore_warnings: IgnorePolicy,
    pub ignore_errors: IgnorePolicy,
    pub on_page_error: Option<PageErrorHook>,
}

impl ConsolePolicy {
    /// Only errors and warnings can fail a test
    pub fn ignores(&self, kind: ConsoleKind, text: &str) -> bool {
        match kind {
            ConsoleKind::Warning => self.ignore_warnings.ignores(text),
            ConsoleKind::Error => self.ignore_errors.ignores(text),
            _ => true,
        }
    }

    pub fn claims(&self, error: &str) -> bool {
        self.on_page_error.as_ref().is_some_and(|hook| hook(error))
    }
}

/// Policy shared between the interpreter (which edits it) and the monitor
pub type SharedPolicy = Arc<RwLock<ConsolePolicy>>;

// ============================================================================
// FAIL SIGNAL
// ============================================================================

/// Rejects the running test from outside the command flow. First rejection wins.
#[derive(Clone)]
pub struct FailSignal {
    tx: Arc<Mutex<Option<oneshot::Sender<HotError>>>>,
}

impl FailSignal {
    pub fn new() -> (Self, Failure) {
        let (tx, rx) = oneshot::channel();
        (
            Self {
                tx: Arc::new(Mutex::new(Some(tx))),
            },
            Failure { rx },
        )
    }

    /// Reject the test; returns `false` when it was already rejected
    pub fn fail(&self, error: HotError) -> bool {
        match self.tx.lock().take() {
            Some(tx) => {
                warn!("Test failed outside the command flow: {}", error);
                let _ = tx.send(error);
                true
            }
            None => false,
        }
    }
}

/// Receiving side of a [`FailSignal`]
pub struct Failure {
    rx: oneshot::Receiver<HotError>,
}

impl Failure {
    /// Resolves with the first rejection; pending forever if nobody rejects
    pub async fn wait(self) -> HotError {
        match self.rx.await {
            Ok(error) => error,
            Err(_) => futures::future::pending().await,
        }
    }
}

// ============================================================================
// MONITOR
// ============================================================================

/// Task watching the console of one page session
pub struct ConsoleMonitor {
    handle: JoinHandle<()>,
    done: oneshot::Receiver<()>,
}

impl ConsoleMonitor {
    pub fn spawn(
        events: broadcast::Receiver<PageEvent>,
        policy: SharedPolicy,
        fail: FailSignal,
        window: Duration,
    ) -> Self {
        let (done_tx, done) = oneshot::channel();
        let handle = tokio::spawn(watch(events, policy, fail, window, done_tx));
        Self { handle, done }
    }

    /// Resolves after a graceful page teardown. Stays pending when the monitor
    /// rejected the test or was still collecting messages, so the failure wins the race.
    pub async fn completion(self) {
        if self.done.await.is_err() {
            futures::future::pending::<()>().await;
        }
    }

    pub fn abort(&self) {
        self.handle.abort();
    }
}

async fn watch(
    mut events: broadcast::Receiver<PageEvent>,
    policy: SharedPolicy,
    fail: FailSignal,
    window: Duration,
    done: oneshot::Sender<()>,
) {
    let mut buffered: Vec<String> = Vec::new();
    let mut deadline: Option<Instant> = None;
    let mut closed = false;

    loop {
        tokio::select! {
            _ = sleep_until(deadline.unwrap_or_else(Instant::now)), if deadline.is_some() => {
                fail.fail(HotError::Console(format!(
                    "unexpected console output:\n{}",
                    buffered.join("\n")
                )));
                return;
            }
            event = events.recv(), if !closed => match event {
                Ok(PageEvent::Console { kind, text }) => {
                    if policy.read().ignores(kind, &text) {
                        trace!("[console.{}] {}", kind.as_str(), text);
                        continue;
                    }
                    debug!("Collecting console {}: {}", kind.as_str(), text);
                    buffered.push(format!("[{}] {}", kind.as_str(), text));
                    deadline.get_or_insert_with(|| Instant::now() + window);
                }
                Ok(PageEvent::PageError(error)) | Ok(PageEvent::Crash(error)) => {
                    if policy.read().claims(&error) {
                        debug!("Page error claimed by test: {}", error);
                        continue;
                    }
                    fail.fail(HotError::PageError(error));
                    return;
                }
                Ok(PageEvent::Closed) | Err(broadcast::error::RecvError::Closed) => {
                    if buffered.is_empty() {
                        let _ = done.send(());
                        return;
                    }
                    closed = true;
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!("Console monitor lagged, {} event(s) skipped", skipped);
                }
            },
        }
    }
}
