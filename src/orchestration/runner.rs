//! Composite runner for execution graphs.
//!
//! The runner walks a [`Node`] tree on the current task: sequences await each
//! member in turn, parallel nodes start every member within one poll and
//! await them together. Nothing is spawned, so a graph interleaves on a single
//! thread and only codec work inside tasks leaves it (via `util::blocking`).

use std::time::{Duration, Instant};

use futures::future::{join_all, BoxFuture};
use futures::FutureExt;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::core::{Node, Task};
use crate::error::{Error, Result};
use crate::{klog, klog_debug, klog_error, klog_warn};

/// What a parallel node does with its other members once one fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicy {
    /// Cancel the node's scope; siblings stop at their next checkpoint.
    #[default]
    CancelSiblings,
    /// Let siblings that already started run to completion.
    RunToCompletion,
}

/// Task lifecycle events emitted while a graph runs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunEvent {
    /// A task's action was invoked.
    Started {
        /// The task that started.
        task: String,
    },
    /// A task signalled success.
    Finished {
        /// The task that finished.
        task: String,
        /// Wall time from start to completion.
        elapsed: Duration,
    },
    /// A task signalled failure.
    Failed {
        /// The task that failed.
        task: String,
        /// The failure reason reported by the task.
        error: String,
    },
    /// A task stopped, or never started, because its scope was cancelled.
    Cancelled {
        /// The task that was cancelled.
        task: String,
    },
}

impl RunEvent {
    pub fn task(&self) -> &str {
        match self {
            RunEvent::Started { task }
            | RunEvent::Finished { task, .. }
            | RunEvent::Failed { task, .. }
            | RunEvent::Cancelled { task } => task,
        }
    }
}

/// Executes execution graphs.
///
/// # Example
///
/// ```ignore
/// use kiln::core::{parallel, sequence, Task};
/// use kiln::orchestration::{FailurePolicy, Runner};
///
/// let graph = sequence([clean, parallel([styles, html])]);
/// Runner::new(FailurePolicy::CancelSiblings).run(&graph).await?;
/// ```
#[derive(Debug, Clone, Default)]
pub struct Runner {
    policy: FailurePolicy,
    events: Option<mpsc::UnboundedSender<RunEvent>>,
}

impl Runner {
    pub fn new(policy: FailurePolicy) -> Self {
        Self {
            policy,
            events: None,
        }
    }

    /// Report task lifecycle events on `events`.
    pub fn with_events(mut self, events: mpsc::UnboundedSender<RunEvent>) -> Self {
        self.events = Some(events);
        self
    }

    pub fn policy(&self) -> FailurePolicy {
        self.policy
    }

    /// Run a graph to completion.
    pub async fn run(&self, node: &Node) -> Result<()> {
        self.run_scoped(node, CancellationToken::new()).await
    }

    /// Run a graph inside an existing cancellation scope.
    pub async fn run_scoped(&self, node: &Node, cancel: CancellationToken) -> Result<()> {
        klog_debug!("Runner::run {}", node);
        self.run_node(node, cancel).await
    }

    fn run_node<'a>(&'a self, node: &'a Node, cancel: CancellationToken) -> BoxFuture<'a, Result<()>> {
        match node {
            Node::Task(task) => self.run_task(task, cancel).boxed(),
            Node::Sequence(steps) => async move {
                for step in steps {
                    self.run_node(step, cancel.clone()).await?;
                }
                Ok(())
            }
            .boxed(),
            Node::Parallel(members) => self.run_parallel(members, cancel).boxed(),
        }
    }

    async fn run_parallel(&self, members: &[Node], cancel: CancellationToken) -> Result<()> {
        let scope = cancel.child_token();
        let runs = members.iter().map(|member| {
            let scope = scope.clone();
            async move {
                let result = self.run_node(member, scope.clone()).await;
                if let Err(e) = &result {
                    if !e.is_cancelled() && self.policy == FailurePolicy::CancelSiblings {
                        klog_debug!("Parallel member failed, cancelling siblings: {}", e);
                        scope.cancel();
                    }
                }
                result
            }
        });

        let results = join_all(runs).await;
        first_failure(results)
    }

    async fn run_task(&self, task: &Task, cancel: CancellationToken) -> Result<()> {
        let name = task.name().to_string();
        if cancel.is_cancelled() {
            klog_debug!("Skipping '{}': scope cancelled", name);
            self.emit(RunEvent::Cancelled { task: name.clone() });
            return Err(Error::Cancelled(name));
        }

        klog!("Starting '{}'", name);
        self.emit(RunEvent::Started { task: name.clone() });
        let started = Instant::now();

        match task.invoke(cancel).await {
            Ok(()) => {
                let elapsed = started.elapsed();
                klog!("Finished '{}' after {:?}", name, elapsed);
                self.emit(RunEvent::Finished {
                    task: name,
                    elapsed,
                });
                Ok(())
            }
            Err(e) if e.is_cancelled() => {
                klog_warn!("'{}' cancelled", name);
                self.emit(RunEvent::Cancelled { task: name.clone() });
                Err(Error::Cancelled(name))
            }
            Err(e) => {
                klog_error!("'{}' errored: {}", name, e);
                self.emit(RunEvent::Failed {
                    task: name.clone(),
                    error: e.to_string(),
                });
                Err(Error::Task {
                    task: name,
                    source: Box::new(e),
                })
            }
        }
    }

    pub(crate) fn emit(&self, event: RunEvent) {
        if let Some(tx) = &self.events {
            let _ = tx.send(event);
        }
    }
}

/// Pick the error a parallel node reports.
///
/// A real failure wins over the cancellations it caused; among failures the
/// first in declared order wins.
fn first_failure(results: Vec<Result<()>>) -> Result<()> {
    let mut cancelled = None;
    let mut failed = None;
    let mut failures = 0;
    for result in results {
        match result {
            Ok(()) => {}
            Err(e) if e.is_cancelled() => {
                cancelled.get_or_insert(e);
            }
            Err(e) => {
                failures += 1;
                failed.get_or_insert(e);
            }
        }
    }
    if failures > 1 {
        klog_warn!("{} parallel members failed; reporting the first", failures);
    }
    match failed.or(cancelled) {
        Some(e) => Err(e),
        None => Ok(()),
    }
}
