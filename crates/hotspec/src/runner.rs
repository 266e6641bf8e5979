//! Suite runner: test registration, spec-file discovery and result reporting

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info, warn};

use crate::co::{script, Callback, Script};
use crate::commands::spec;
use crate::config::RunnerConfig;
use crate::env::Environment;
use crate::error::{HotError, HotResult};
use crate::interpreter::Harness;
use crate::spec::parse;

/// Extension of spec files picked up by [`load_spec_dir`]
pub const SPEC_EXTENSION: &str = "hmr";

/// Result of running a single test
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestResult {
    pub name: String,
    pub success: bool,
    pub skipped: bool,
    pub duration_ms: u64,
    pub error: Option<String>,
}

/// Result of running all tests
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestSuiteResult {
    pub total: usize,
    pub passed: usize,
    pub failed: usize,
    pub skipped: usize,
    pub duration_ms: u64,
    pub results: Vec<TestResult>,
}

/// Where tests are declared
pub trait TestRegistry {
    /// Register a test
    fn it(&mut self, name: &str, script: Script);

    /// Register a test that is reported but not run
    fn skip(&mut self, name: &str, script: Script);

    /// Group tests; `body` registers into the nested suite
    fn describe(&mut self, name: &str, body: &mut dyn FnMut(&mut dyn TestRegistry));

    /// Run `hook` before every test of this suite and its nested suites
    fn before(&mut self, hook: Callback);
}

struct TestCase {
    name: String,
    script: Script,
    skip: bool,
}

/// Tree of registered tests
#[derive(Default)]
pub struct Suite {
    name: String,
    before: Vec<Callback>,
    tests: Vec<TestCase>,
    children: Vec<Suite>,
}

impl Suite {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    /// Number of tests, nested suites included
    pub fn len(&self) -> usize {
        self.tests.len() + self.children.iter().map(Suite::len).sum::<usize>()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Tests in registration order with their full name and inherited hooks
    fn flatten<'a>(&'a self, prefix: &str, hooks: &[Callback], out: &mut Vec<PlannedTest<'a>>) {
        let prefix = match (prefix.is_empty(), self.name.is_empty()) {
            (_, true) => prefix.to_string(),
            (true, false) => self.name.clone(),
            (false, false) => format!("{} > {}", prefix, self.name),
        };
        let mut hooks = hooks.to_vec();
        hooks.extend(self.before.iter().cloned());

        for test in &self.tests {
            let name = if prefix.is_empty() {
                test.name.clone()
            } else {
                format!("{} > {}", prefix, test.name)
            };
            out.push(PlannedTest {
                name,
                hooks: hooks.clone(),
                test,
            });
        }
        for child in &self.children {
            child.flatten(&prefix, &hooks, out);
        }
    }
}

impl TestRegistry for Suite {
    fn it(&mut self, name: &str, script: Script) {
        self.tests.push(TestCase {
            name: name.to_string(),
            script,
            skip: false,
        });
    }

    fn skip(&mut self, name: &str, script: Script) {
        self.tests.push(TestCase {
            name: name.to_string(),
            script,
            skip: true,
        });
    }

    fn describe(&mut self, name: &str, body: &mut dyn FnMut(&mut dyn TestRegistry)) {
        let mut child = Suite::new(name);
        body(&mut child);
        self.children.push(child);
    }

    fn before(&mut self, hook: Callback) {
        self.before.push(hook);
    }
}

struct PlannedTest<'a> {
    name: String,
    hooks: Vec<Callback>,
    test: &'a TestCase,
}

/// Runs suites through a [`Harness`]
pub struct TestRunner {
    harness: Harness,

    /// Spec files directory
    specs_dir: PathBuf,

    /// Output directory for results
    output_dir: PathBuf,
    results_path: PathBuf,
}

impl TestRunner {
    pub fn new(env: Arc<dyn Environment>, config: RunnerConfig) -> Self {
        Self {
            results_path: config.results_path(),
            harness: Harness::new(env, config.harness),
            specs_dir: config.specs_dir,
            output_dir: config.output_dir,
        }
    }

    /// Run every spec file of the specs directory
    pub async fn run_all(&self) -> HotResult<TestSuiteResult> {
        let suite = load_spec_dir(&self.specs_dir)?;
        Ok(self.run_suite(&suite).await)
    }

    /// Run every test of `suite` in registration order
    pub async fn run_suite(&self, suite: &Suite) -> TestSuiteResult {
        let start = Instant::now();
        let mut planned = Vec::new();
        suite.flatten("", &[], &mut planned);

        info!("Running {} test(s)...", planned.len());

        let mut results = Vec::new();
        let (mut passed, mut failed, mut skipped) = (0, 0, 0);
        for plan in &planned {
            if plan.test.skip {
                skipped += 1;
                info!("- {} (skipped)", plan.name);
                results.push(TestResult {
                    name: plan.name.clone(),
                    success: false,
                    skipped: true,
                    duration_ms: 0,
                    error: None,
                });
                continue;
            }

            let result = self.run_test(plan).await;
            if result.success {
                passed += 1;
                info!("✓ {} ({} ms)", result.name, result.duration_ms);
            } else {
                failed += 1;
                error!(
                    "✗ {} - {}",
                    result.name,
                    result.error.as_deref().unwrap_or("unknown error")
                );
            }
            results.push(result);
        }

        let duration_ms = start.elapsed().as_millis() as u64;
        info!(
            "Test Results: {} passed, {} failed, {} skipped ({} ms)",
            passed, failed, skipped, duration_ms
        );

        TestSuiteResult {
            total: planned.len(),
            passed,
            failed,
            skipped,
            duration_ms,
            results,
        }
    }

    async fn run_test(&self, plan: &PlannedTest<'_>) -> TestResult {
        let start = Instant::now();
        debug!("Running test: {}", plan.name);

        let mut outcome = Ok(());
        for hook in &plan.hooks {
            outcome = hook().await;
            if outcome.is_err() {
                break;
            }
        }
        if outcome.is_ok() {
            outcome = self.harness.run(&plan.test.script).await;
        }

        TestResult {
            name: plan.name.clone(),
            success: outcome.is_ok(),
            skipped: false,
            duration_ms: start.elapsed().as_millis() as u64,
            error: outcome.err().map(|e| e.to_string()),
        }
    }

    /// Write test results to JSON file
    pub fn write_results(&self, results: &TestSuiteResult) -> HotResult<PathBuf> {
        std::fs::create_dir_all(&self.output_dir)?;

        let json = serde_json::to_string_pretty(results)?;
        std::fs::write(&self.results_path, json)?;

        info!("Results written to: {}", self.results_path.display());
        Ok(self.results_path.clone())
    }
}

/// Build a suite with one test per spec file under `dir`.
///
/// Each test registers the file text as its spec; the test is named after the
/// spec's `# Title`, or the file stem when it has none.
pub fn load_spec_dir(dir: &Path) -> HotResult<Suite> {
    if !dir.is_dir() {
        return Err(HotError::usage(format!(
            "spec directory {} does not exist",
            dir.display()
        )));
    }
    let mut suite = Suite::default();

    for entry in walkdir::WalkDir::new(dir)
        .sort_by_file_name()
        .into_iter()
        .filter_map(|e| match e {
            Ok(entry) => Some(entry),
            Err(e) => {
                warn!("Skipping unreadable spec entry: {}", e);
                None
            }
        })
        .filter(|e| {
            e.path()
                .extension()
                .map(|ext| ext == SPEC_EXTENSION)
                .unwrap_or(false)
        })
    {
        let text: Arc<str> = std::fs::read_to_string(entry.path())?.into();
        let stem = entry
            .path()
            .file_stem()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_default();
        let name = parse(&text).ok().and_then(|ast| ast.title).unwrap_or(stem);
        debug!("Loaded spec {} from {}", name, entry.path().display());

        suite.it(
            &name,
            script(move |co| {
                let text = text.clone();
                async move {
                    co.send(spec(text.as_ref())).await?;
                    Ok(())
                }
            }),
        );
    }

    Ok(suite)
}
