//! Command interpreter and coroutine driver
//!
//! ```text
//!   script(co) ──send──▶ mpsc ──▶ pump ──▶ process ─┬─ INIT handlers (no page)
//!        ▲                                          │
//!        └──────────── oneshot reply ◀──────────────┴─ RUN handlers (live page)
//! ```
//!
//! The first command without an init handler starts the run phase: the
//! environment is reset to the init files, the expectation queue is
//! materialized, the page is loaded and the console monitor spawned.

use futures::future::{BoxFuture, FutureExt};
use futures::stream::{FuturesUnordered, StreamExt};
use parking_lot::Mutex;
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, info, warn};

use crate::co::{Co, Request, Script, Sub};
use crate::commands::{Command, ConsoleCommand, PageCall, SpecCommand, Target};
use crate::config::HarnessConfig;
use crate::console::{ConsoleMonitor, FailSignal};
use crate::env::{BeforeLoadHook, Environment, Page, PageEvent, PageMember};
use crate::error::{HotError, HotResult};
use crate::spec::merge_expect;
use crate::state::TestState;

/// Drives one test script against one environment
pub struct Interpreter {
    pub(crate) env: Arc<dyn Environment>,
    pub(crate) config: HarnessConfig,
    fail: FailSignal,
    pub(crate) state: TestState,
    monitor: Option<ConsoleMonitor>,
}

impl Interpreter {
    pub fn new(env: Arc<dyn Environment>, config: HarnessConfig, fail: FailSignal) -> Self {
        Self {
            env,
            config,
            fail,
            state: TestState::default(),
            monitor: None,
        }
    }

    /// Drive `script` to completion, then assert what is still pending and close the page
    pub async fn run(&mut self, script: &Script) -> HotResult<()> {
        let (co, rx) = Co::channel();
        let future = script(co);
        self.pump(future, rx).await?;
        self.complete().await
    }

    /// Release the page and the monitor, whatever the outcome of the test
    pub async fn teardown(&mut self) {
        if let Some(monitor) = self.monitor.take() {
            monitor.abort();
        }
        if let Some(page) = self.state.page.take() {
            if let Err(e) = page.close().await {
                warn!("Failed to close page: {}", e);
            }
        }
    }

    pub(crate) fn page(&self) -> HotResult<Arc<dyn Page>> {
        self.state
            .page
            .clone()
            .ok_or_else(|| HotError::usage("no page is loaded"))
    }

    /// Run `future` while resolving the commands its coroutines send on `rx`.
    /// Commands are processed one at a time; waits are parked and polled
    /// alongside so sibling coroutines keep running.
    async fn pump(
        &mut self,
        mut future: BoxFuture<'static, HotResult<()>>,
        mut rx: mpsc::UnboundedReceiver<Request>,
    ) -> HotResult<()> {
        let mut waits: FuturesUnordered<BoxFuture<'static, ()>> = FuturesUnordered::new();
        loop {
            tokio::select! {
                result = &mut future => return result,
                Some(()) = waits.next() => {}
                Some(Request { command, reply }) = rx.recv() => {
                    let result = match command {
                        Command::Wait(wait) => match self.begin().await {
                            Ok(()) => {
                                debug!("Parking wait, {} already pending", waits.len());
                                let wait = wait.into_future();
                                waits.push(async move { let _ = reply.send(wait.await); }.boxed());
                                continue;
                            }
                            Err(e) => Err(e),
                        },
                        command => self.process(command).await,
                    };
                    if let Err(e) = &result {
                        debug!("Command failed: {}", e);
                    }
                    let _ = reply.send(result);
                }
            }
        }
    }

    /// Drive a nested coroutine with this interpreter's command processor
    pub(crate) async fn consume_sub(&mut self, sub: &Sub) -> HotResult<()> {
        let (co, rx) = Co::channel();
        let future = sub.start(&co);
        drop(co);
        self.pump(future, rx).await
    }

    /// Enter the run phase if the test has not started yet
    fn begin(&mut self) -> BoxFuture<'_, HotResult<()>> {
        async move {
            if !self.state.started {
                self.start().await?;
            }
            Ok(())
        }
        .boxed()
    }

    fn process(&mut self, command: Command) -> BoxFuture<'_, HotResult<Value>> {
        async move {
            debug!("Processing {:?}", command);
            if !self.state.started && command.has_init_handler() {
                return self.process_init(command);
            }
            self.begin().await?;
            self.process_run(command).await
        }
        .boxed()
    }

    async fn complete(&mut self) -> HotResult<()> {
        if !self.state.started {
            if self.state.expects.is_empty() {
                debug!("Script finished without expectations");
                return Ok(());
            }
            self.start().await?;
        }
        self.flush_expects().await?;

        if let Some(page) = self.state.page.take() {
            page.close().await?;
        }
        if let Some(monitor) = self.monitor.take() {
            monitor.completion().await;
        }
        info!("Test completed: {}", self.state.title.as_deref().unwrap_or("untitled"));
        Ok(())
    }

    /// INIT -> RUN transition
    async fn start(&mut self) -> HotResult<()> {
        info!(
            "Starting run phase with {} init file(s) and {} expectation(s)",
            self.state.inits.len(),
            self.state.expects.len()
        );
        self.env.reset(&self.state.inits).await?;

        if self.state.remaining_expects.is_none() {
            self.state.remaining_expects = Some(self.state.expects.iter().cloned().collect());
        }

        let init = self.state.init_spec_label.take();
        if let Some(init) = &init {
            let pending = self.state.pending_labels();
            if pending.first() != Some(init) {
                self.state.discard();
                return Err(HotError::usage(format!(
                    "Must init with first step: init [{}] but the first expectation is {}",
                    init,
                    pending
                        .first()
                        .map(|l| format!("[{}]", l))
                        .unwrap_or_else(|| "missing".to_string())
                )));
            }
        }

        let page = self.load_page().await?;
        self.state.page = Some(page);
        self.state.started = true;

        if let Some(init) = init {
            debug!("Asserting initial state [{}]", init);
            self.consume_expects(Some(&init), true).await?;
        }
        Ok(())
    }

    /// Load the page, subscribing the console monitor before navigation
    async fn load_page(&mut self) -> HotResult<Arc<dyn Page>> {
        let subscription: Arc<Mutex<Option<broadcast::Receiver<PageEvent>>>> = Arc::default();
        let capture = subscription.clone();
        let user_hook = self.state.before_load.clone();
        let hook: BeforeLoadHook = Arc::new(move |page: Arc<dyn Page>| {
            *capture.lock() = Some(page.events());
            match &user_hook {
                Some(hook) => hook(page),
                None => async { Ok(()) }.boxed(),
            }
        });

        let page = self.env.load_page(&self.config.page_url, Some(hook)).await?;
        let events = subscription.lock().take().unwrap_or_else(|| page.events());
        self.monitor = Some(ConsoleMonitor::spawn(
            events,
            self.state.console.clone(),
            self.fail.clone(),
            self.config.console_window(),
        ));
        info!("Page loaded: {}", self.config.page_url);
        Ok(page)
    }

    fn process_init(&mut self, command: Command) -> HotResult<Value> {
        match command {
            Command::Spec(SpecCommand::Source(source)) => {
                let compiled = source.compile()?;
                self.state.register(compiled)?;
            }
            Command::Spec(SpecCommand::Compiled(compiled)) => self.state.register(compiled)?,
            Command::Spec(SpecCommand::Expect(label, expectation)) => {
                merge_expect(&mut self.state.expects, label, expectation)?;
            }
            Command::Init(Target::Label(label)) => {
                let files = self.state.render_label(&label);
                debug!("Init [{}] with {} file(s)", label, files.len());
                self.state.inits.extend(files);
                self.state.init_spec_label = Some(label);
            }
            Command::Init(Target::Files(files)) => {
                let files = self.state.render_files(&files)?;
                self.state.inits.extend(files);
            }
            Command::Templates(templates) => self.state.templates.extend(templates),
            Command::Debug => return Ok(serde_json::to_value(self.state.snapshot())?),
            Command::Console(command) => self.configure_console(command),
            Command::BeforeLoad(hook) => self.state.before_load = Some(hook),
            other => {
                return Err(HotError::usage(format!(
                    "{} cannot be used before the test has started",
                    other.kind()
                )))
            }
        }
        Ok(Value::Null)
    }

    async fn process_run(&mut self, command: Command) -> HotResult<Value> {
        match command {
            Command::Spec(SpecCommand::Flush) => self.flush_expects().await?,
            Command::Spec(SpecCommand::Discard) => {
                debug!("Discarding pending expectations: {:?}", self.state.pending_labels());
                self.state.discard();
            }
            Command::Spec(_) => {
                return Err(HotError::usage(
                    "specs can only be registered before the test has started",
                ))
            }
            Command::Init(_) | Command::BeforeLoad(_) => {
                return Err(HotError::usage(format!(
                    "{} can only be used before the test has started",
                    command.kind()
                )))
            }
            Command::Templates(templates) => self.state.templates.extend(templates),
            Command::Change(Target::Label(label)) => self.change(&label).await?,
            Command::Change(Target::Files(files)) => {
                let files = self.state.render_files(&files)?;
                self.write_files(&files).await?;
            }
            Command::Wait(wait) => return wait.into_future().await,
            Command::Page(call) => return self.page_command(call).await,
            Command::InnerText(selector) => {
                let text = self.page()?.inner_text(&selector).await?;
                return Ok(text.map(Value::String).unwrap_or(Value::Null));
            }
            Command::Debug => return Ok(serde_json::to_value(self.state.snapshot())?),
            Command::Console(command) => self.configure_console(command),
        }
        Ok(Value::Null)
    }

    async fn page_command(&mut self, call: PageCall) -> HotResult<Value> {
        let page = self.page()?;
        if call.is_read() {
            let key = call.path.join(".");
            if let Some(value) = self.state.page_cache.get(&key) {
                return Ok(value.clone());
            }
            let value = page.get(&call.path).await?;
            self.state.page_cache.insert(key, value.clone());
            return Ok(value);
        }

        let display = call.display_path();
        let PageCall { path, args } = call;
        match page.member(&path) {
            Some(PageMember::Method) => page.call(&path, args.unwrap_or_default()).await,
            _ => Err(HotError::usage(format!("{} is not a function", display))),
        }
    }

    fn configure_console(&mut self, command: ConsoleCommand) {
        let mut policy = self.state.console.write();
        match command {
            ConsoleCommand::IgnoreWarnings(ignore) => {
                debug!("Ignoring warnings: {}", ignore.describe());
                policy.ignore_warnings = ignore;
            }
            ConsoleCommand::IgnoreErrors(ignore) => {
                debug!("Ignoring errors: {}", ignore.describe());
                policy.ignore_errors = ignore;
            }
            ConsoleCommand::OnPageError(hook) => policy.on_page_error = Some(hook),
        }
    }
}

/// Runs test scripts, each with a fresh interpreter raced against its failure signal
pub struct Harness {
    env: Arc<dyn Environment>,
    config: HarnessConfig,
}

impl Harness {
    pub fn new(env: Arc<dyn Environment>, config: HarnessConfig) -> Self {
        Self { env, config }
    }

    pub fn config(&self) -> &HarnessConfig {
        &self.config
    }

    /// Run one test script. The outcome is the first of script completion
    /// or an asynchronous failure (console monitor, environment).
    pub async fn run(&self, script: &Script) -> HotResult<()> {
        let (fail, failure) = FailSignal::new();
        self.env.attach(fail.clone());

        let mut interpreter = Interpreter::new(self.env.clone(), self.config.clone(), fail);
        let outcome = tokio::select! {
            result = interpreter.run(script) => result,
            error = failure.wait() => Err(error),
        };
        interpreter.teardown().await;

        match &outcome {
            Ok(()) => debug!("Test passed"),
            Err(e) => warn!("Test failed: {}", e),
        }
        outcome
    }
}
