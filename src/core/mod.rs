//! Core domain model: tasks and the execution graph they compose into.

pub mod graph;
pub mod task;

pub use graph::{parallel, sequence, Node};
pub use task::{checkpoint, Task, TaskFuture};
