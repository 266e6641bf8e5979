//! Coroutine primitives
//!
//! A test script is an async closure receiving a [`Co`] handle. Every
//! `co.send(cmd).await` pushes one command to the driver and suspends the script
//! until the driver has resolved it, mirroring a generator that yields a command
//! and is resumed with the resolved value (or has the error thrown into it).

use futures::future::{try_join_all, BoxFuture, FutureExt};
use serde_json::Value;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};

use crate::commands::Command;
use crate::error::{HotError, HotResult};

/// A command waiting for resolution, with the channel its value is returned on
pub(crate) struct Request {
    pub command: Command,
    pub reply: oneshot::Sender<HotResult<Value>>,
}

/// Handle through which a script sends commands to the driver
#[derive(Clone)]
pub struct Co {
    tx: mpsc::UnboundedSender<Request>,
}

impl Co {
    pub(crate) fn channel() -> (Self, mpsc::UnboundedReceiver<Request>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    /// Send a command and wait for its resolved value.
    ///
    /// A failing command comes back as `Err`, which the script may handle or
    /// propagate with `?` to fail the test.
    pub async fn send(&self, command: impl Into<Command>) -> HotResult<Value> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(Request {
                command: command.into(),
                reply,
            })
            .map_err(|_| HotError::usage("command sent after its driver finished"))?;
        rx.await
            .map_err(|_| HotError::usage("driver dropped the command before resolving it"))?
    }
}

/// A coroutine function: called with a fresh [`Co`] each time it is driven
pub type Script = Arc<dyn Fn(Co) -> BoxFuture<'static, HotResult<()>> + Send + Sync>;

/// A plain async callback
pub type Callback = Arc<dyn Fn() -> BoxFuture<'static, HotResult<()>> + Send + Sync>;

/// Build a [`Script`] from an async closure
pub fn script<F, Fut>(f: F) -> Script
where
    F: Fn(Co) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = HotResult<()>> + Send + 'static,
{
    Arc::new(move |co| f(co).boxed())
}

/// Build a [`Callback`] from an async closure
pub fn callback<F, Fut>(f: F) -> Callback
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = HotResult<()>> + Send + 'static,
{
    Arc::new(move || f().boxed())
}

/// A nested coroutine usable as a step or as a before/after hook
#[derive(Clone)]
pub enum Sub {
    /// Driven with the same command processor as the parent script
    Script(Script),
    /// Awaited directly
    Callback(Callback),
    /// Driven concurrently; all must finish, the first error wins
    All(Vec<Sub>),
}

impl Sub {
    /// Start the sub, handing every coroutine a clone of `co`
    pub(crate) fn start(&self, co: &Co) -> BoxFuture<'static, HotResult<()>> {
        match self {
            Sub::Script(script) => script(co.clone()),
            Sub::Callback(callback) => callback(),
            Sub::All(subs) => {
                let futures: Vec<_> = subs.iter().map(|sub| sub.start(co)).collect();
                async move { try_join_all(futures).await.map(|_| ()) }.boxed()
            }
        }
    }
}

impl From<Script> for Sub {
    fn from(script: Script) -> Self {
        Sub::Script(script)
    }
}

impl From<Vec<Sub>> for Sub {
    fn from(subs: Vec<Sub>) -> Self {
        Sub::All(subs)
    }
}

impl fmt::Debug for Sub {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Sub::Script(_) => f.write_str("Sub::Script(..)"),
            Sub::Callback(_) => f.write_str("Sub::Callback(..)"),
            Sub::All(subs) => f.debug_tuple("Sub::All").field(subs).finish(),
        }
    }
}
