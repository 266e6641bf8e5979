//! hotspec: hot-reload spec language and HMR test interpreter
//!
//! This crate verifies incremental (hot module replacement) behavior of a live
//! reloading application:
//! - Compiles a compact spec format with conditional file variants
//! - Drives async test scripts that send commands through a [`Co`] handle
//! - Writes each variant, waits for the page to settle and asserts its HTML
//! - Fails the test on unexpected console output, racing the main flow
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                         Harness                             │
//! │    select! { interpreter.run(script), failure.wait() }      │
//! ├─────────────────────────────────────────────────────────────┤
//! │  Interpreter                                                │
//! │    ├── pump(script, rx)       resolve commands one by one   │
//! │    ├── INIT: spec, init, templates, cons.*, beforeLoad      │
//! │    ├── start()                reset, load page, monitor     │
//! │    └── RUN: change, wait, page, innerText, flush, discard   │
//! ├─────────────────────────────────────────────────────────────┤
//! │  Engine                                                     │
//! │    ├── consume_expects(until)  FIFO: write, settle, assert  │
//! │    └── assert_expect           before, steps, after         │
//! ├─────────────────────────────────────────────────────────────┤
//! │  ConsoleMonitor (task)         errors/warnings -> FailSignal │
//! ├─────────────────────────────────────────────────────────────┤
//! │  Spec text ── grammar::parse ──▶ SpecAst ── compile ──▶     │
//! │              CompiledSpec { files, expects }                │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! The bundler, its virtual filesystem and the browser are reached through the
//! [`Environment`] and [`Page`] traits.

pub mod co;
pub mod commands;
pub mod config;
pub mod console;
mod engine;
pub mod env;
pub mod error;
pub mod html;
pub mod interpreter;
pub mod runner;
pub mod spec;
pub mod state;

pub use co::{callback, script, Callback, Co, Script, Sub};
pub use config::{HarnessConfig, RunnerConfig};
pub use console::{FailSignal, IgnorePolicy, MessageMatcher};
pub use env::{Environment, FileMap, Page, PageEvent, PageMember};
pub use error::{HotError, HotResult};
pub use interpreter::{Harness, Interpreter};
pub use runner::{load_spec_dir, Suite, TestRegistry, TestRunner, TestSuiteResult};
pub use spec::{CompiledSpec, Expectation, Label, SpecSource, Step};
