//! Task model for the execution graph.
//!
//! A task is a named, immutable unit of build work. Invoking it yields a
//! future that resolves to the task's completion signal.

use std::fmt;
use std::future::Future;
use std::sync::Arc;

use futures::future::BoxFuture;
use futures::FutureExt;
use tokio_util::sync::CancellationToken;

use crate::Result;

/// The future a task action returns.
pub type TaskFuture = BoxFuture<'static, Result<()>>;

type TaskAction = Arc<dyn Fn(CancellationToken) -> TaskFuture + Send + Sync>;

/// A named unit of work.
///
/// The action receives the cancellation token of the scope it runs in.
/// Long-running actions should check it between units of work (files,
/// requests) and return [`crate::Error::Cancelled`] once it fires.
///
/// Cloning a task is cheap; clones share the same action.
#[derive(Clone)]
pub struct Task {
    name: Arc<str>,
    action: TaskAction,
}

impl Task {
    /// Create a task from a name and an async action.
    pub fn new<F, Fut>(name: impl Into<String>, action: F) -> Self
    where
        F: Fn(CancellationToken) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        let name: String = name.into();
        Self {
            name: Arc::from(name),
            action: Arc::new(move |cancel| action(cancel).boxed()),
        }
    }

    /// The task's identifier, as printed in progress output.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Start the action. Its async body runs when the returned future is polled.
    pub fn invoke(&self, cancel: CancellationToken) -> TaskFuture {
        (self.action)(cancel)
    }
}

impl fmt::Debug for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Task").field("name", &self.name).finish()
    }
}

/// Check a cancellation token at a task checkpoint.
pub fn checkpoint(cancel: &CancellationToken, task: &str) -> Result<()> {
    if cancel.is_cancelled() {
        Err(crate::Error::Cancelled(task.to_string()))
    } else {
        Ok(())
    }
}
