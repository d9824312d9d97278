//! Execution graph nodes.
//!
//! A graph is a tree of tasks composed with [`sequence`] and [`parallel`].
//! Building a graph never runs anything; execution belongs to
//! [`crate::orchestration::Runner`].

use std::fmt;

use crate::core::task::Task;

/// A node of the execution graph.
#[derive(Debug, Clone)]
pub enum Node {
    /// A single task.
    Task(Task),
    /// Members run one after another; each must succeed before the next starts.
    Sequence(Vec<Node>),
    /// Members are all started together; the node completes when all have.
    Parallel(Vec<Node>),
}

/// Compose nodes to run strictly in order.
pub fn sequence(nodes: impl IntoIterator<Item = impl Into<Node>>) -> Node {
    Node::Sequence(nodes.into_iter().map(Into::into).collect())
}

/// Compose nodes to run concurrently.
pub fn parallel(nodes: impl IntoIterator<Item = impl Into<Node>>) -> Node {
    Node::Parallel(nodes.into_iter().map(Into::into).collect())
}

impl From<Task> for Node {
    fn from(task: Task) -> Self {
        Node::Task(task)
    }
}

impl Node {
    /// Names of every task in the tree, depth-first in declared order.
    pub fn task_names(&self) -> Vec<&str> {
        let mut names = Vec::new();
        self.collect_names(&mut names);
        names
    }

    fn collect_names<'a>(&'a self, names: &mut Vec<&'a str>) {
        match self {
            Node::Task(task) => names.push(task.name()),
            Node::Sequence(members) | Node::Parallel(members) => {
                for member in members {
                    member.collect_names(names);
                }
            }
        }
    }

    /// Number of tasks in the tree.
    pub fn task_count(&self) -> usize {
        match self {
            Node::Task(_) => 1,
            Node::Sequence(members) | Node::Parallel(members) => {
                members.iter().map(Node::task_count).sum()
            }
        }
    }

    /// Whether the tree contains a task with this name.
    pub fn contains(&self, name: &str) -> bool {
        self.task_names().contains(&name)
    }
}

impl fmt::Display for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (label, members) = match self {
            Node::Task(task) => return write!(f, "{}", task.name()),
            Node::Sequence(members) => ("series", members),
            Node::Parallel(members) => ("parallel", members),
        };
        write!(f, "{}(", label)?;
        for (i, member) in members.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}", member)?;
        }
        write!(f, ")")
    }
}
