//! Orchestration: running execution graphs, reacting to file changes and
//! composing the named pipelines.

mod pipeline;
mod runner;
mod watcher;

pub use pipeline::{Pipeline, TASK_NAMES};
pub use runner::{FailurePolicy, RunEvent, Runner};
pub use watcher::{WatchBinding, Watcher};
