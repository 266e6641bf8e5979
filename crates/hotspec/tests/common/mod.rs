//! In-memory environment shared by the integration tests
//!
//! The fake dev server keeps a virtual filesystem and renders `App.svelte`
//! into the `#app` element: every line starting with `<` is markup. Lines of
//! the form `!error msg`, `!warn msg` or `!throw msg` are emitted as console
//! errors, warnings or page errors each time the page loads or reloads.

#![allow(dead_code)]

use async_trait::async_trait;
use hotspec::console::FailSignal;
use hotspec::env::{BeforeLoadHook, ConsoleKind, Environment, FileMap, Page, PageEvent, PageMember};
use hotspec::HotResult;
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;

pub const APP: &str = "App.svelte";

type Renderer = Arc<dyn Fn(&FileMap) -> Option<String> + Send + Sync>;

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn render_markup(files: &FileMap) -> Option<String> {
    let app = files.get(APP)?;
    Some(
        app.lines()
            .map(str::trim)
            .filter(|line| line.starts_with('<'))
            .collect::<Vec<_>>()
            .join(""),
    )
}

fn directives(files: &FileMap) -> Vec<PageEvent> {
    files
        .values()
        .flat_map(|content| content.lines())
        .filter_map(|line| {
            let line = line.trim();
            if let Some(text) = line.strip_prefix("!error ") {
                Some(PageEvent::Console {
                    kind: ConsoleKind::Error,
                    text: text.to_string(),
                })
            } else if let Some(text) = line.strip_prefix("!warn ") {
                Some(PageEvent::Console {
                    kind: ConsoleKind::Warning,
                    text: text.to_string(),
                })
            } else {
                line.strip_prefix("!throw ")
                    .map(|text| PageEvent::PageError(text.to_string()))
            }
        })
        .collect()
}

pub struct FakeEnv {
    files: Arc<Mutex<FileMap>>,
    ops: Arc<Mutex<Vec<String>>>,
    page: Mutex<Option<Arc<FakePage>>>,
    renderer: Renderer,
    settle_delay: Mutex<Duration>,
    fail: Mutex<Option<FailSignal>>,
}

impl FakeEnv {
    pub fn new() -> Arc<Self> {
        Self::with_renderer(render_markup)
    }

    pub fn with_renderer(renderer: impl Fn(&FileMap) -> Option<String> + Send + Sync + 'static) -> Arc<Self> {
        Arc::new(Self {
            files: Arc::default(),
            ops: Arc::default(),
            page: Mutex::new(None),
            renderer: Arc::new(renderer),
            settle_delay: Mutex::new(Duration::ZERO),
            fail: Mutex::new(None),
        })
    }

    /// Every operation performed on the environment and its pages, in order
    pub fn ops(&self) -> Vec<String> {
        self.ops.lock().clone()
    }

    /// Operations starting with `prefix`
    pub fn ops_matching(&self, prefix: &str) -> Vec<String> {
        self.ops().into_iter().filter(|op| op.starts_with(prefix)).collect()
    }

    pub fn file(&self, path: &str) -> Option<String> {
        self.files.lock().get(path).cloned()
    }

    pub fn page(&self) -> Option<Arc<FakePage>> {
        self.page.lock().clone()
    }

    pub fn set_settle_delay(&self, delay: Duration) {
        *self.settle_delay.lock() = delay;
    }

    /// Signal handed over by the harness for the running test
    pub fn fail_signal(&self) -> Option<FailSignal> {
        self.fail.lock().clone()
    }

    fn record(&self, op: String) {
        self.ops.lock().push(op);
    }
}

#[async_trait]
impl Environment for FakeEnv {
    fn attach(&self, fail: FailSignal) {
        *self.fail.lock() = Some(fail);
    }

    async fn reset(&self, files: &FileMap) -> HotResult<()> {
        self.record(format!("reset {}", files.keys().cloned().collect::<Vec<_>>().join(",")));
        *self.files.lock() = files.clone();
        Ok(())
    }

    async fn write_and_settle(&self, _page: &dyn Page, files: &FileMap) -> HotResult<()> {
        let summary = files
            .iter()
            .map(|(path, content)| format!("{}={}", path, content.trim().replace('\n', "|")))
            .collect::<Vec<_>>()
            .join(" ");
        self.record(format!("write {}", summary));
        self.files.lock().extend(files.clone());

        let delay = *self.settle_delay.lock();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        if let Some(page) = self.page() {
            page.replay(files);
        }
        Ok(())
    }

    async fn load_page(&self, url: &str, before_goto: Option<BeforeLoadHook>) -> HotResult<Arc<dyn Page>> {
        let page = Arc::new(FakePage::new(self.files.clone(), self.ops.clone(), self.renderer.clone()));
        if let Some(hook) = before_goto {
            hook(page.clone() as Arc<dyn Page>).await?;
        }
        self.record(format!("load {}", url));
        *self.page.lock() = Some(page.clone());

        let files = self.files.lock().clone();
        page.replay(&files);
        Ok(page)
    }
}

pub struct FakePage {
    files: Arc<Mutex<FileMap>>,
    ops: Arc<Mutex<Vec<String>>>,
    renderer: Renderer,
    events: broadcast::Sender<PageEvent>,
}

impl FakePage {
    fn new(files: Arc<Mutex<FileMap>>, ops: Arc<Mutex<Vec<String>>>, renderer: Renderer) -> Self {
        let (events, _) = broadcast::channel(64);
        Self {
            files,
            ops,
            renderer,
            events,
        }
    }

    pub fn emit(&self, event: PageEvent) {
        let _ = self.events.send(event);
    }

    fn replay(&self, files: &FileMap) {
        for event in directives(files) {
            self.emit(event);
        }
    }

    fn rendered(&self) -> Option<String> {
        (self.renderer)(&*self.files.lock())
    }
}

#[async_trait]
impl Page for FakePage {
    fn events(&self) -> broadcast::Receiver<PageEvent> {
        self.events.subscribe()
    }

    async fn inner_html(&self, selector: &str) -> HotResult<Option<String>> {
        match selector {
            "#app" => {
                let html = self.rendered();
                self.ops.lock().push(format!("html {}", html.clone().unwrap_or_default()));
                Ok(html)
            }
            _ => Ok(None),
        }
    }

    async fn inner_text(&self, selector: &str) -> HotResult<Option<String>> {
        let tag = selector.trim_start_matches('#');
        let Some(html) = self.rendered() else {
            return Ok(None);
        };
        let open = format!("<{}>", tag);
        let close = format!("</{}>", tag);
        Ok(html.find(&open).and_then(|start| {
            let body = &html[start + open.len()..];
            body.find(&close).map(|end| body[..end].to_string())
        }))
    }

    fn member(&self, path: &[String]) -> Option<PageMember> {
        let path: Vec<&str> = path.iter().map(String::as_str).collect();
        match path.as_slice() {
            ["url"] | ["viewport", "width"] => Some(PageMember::Property),
            ["keyboard", "press"] | ["reload"] => Some(PageMember::Method),
            _ => None,
        }
    }

    async fn get(&self, path: &[String]) -> HotResult<Value> {
        self.ops.lock().push(format!("get {}", path.join(".")));
        let path: Vec<&str> = path.iter().map(String::as_str).collect();
        Ok(match path.as_slice() {
            ["url"] => json!("http://localhost:8080/"),
            ["viewport", "width"] => json!(1280),
            _ => Value::Null,
        })
    }

    async fn call(&self, path: &[String], args: Vec<Value>) -> HotResult<Value> {
        self.ops
            .lock()
            .push(format!("call {} {}", path.join("."), Value::Array(args.clone())));
        Ok(json!({ "called": path.join("."), "args": args }))
    }

    async fn close(&self) -> HotResult<()> {
        self.ops.lock().push("close".to_string());
        self.emit(PageEvent::Closed);
        Ok(())
    }
}
