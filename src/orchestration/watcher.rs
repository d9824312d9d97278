//! Filesystem watch bindings.
//!
//! A [`Watcher`] owns a set of [`WatchBinding`]s over one directory. Each
//! create/modify/remove event is matched against every binding's globs, and
//! every matching binding's reaction graph is spawned as its own tokio task.
//! Reactions are independent: they may overlap, and a failing one is logged
//! without affecting the watcher or other reactions.

use std::path::{Path, PathBuf};

use notify::{Config as NotifyConfig, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher as _};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::core::Node;
use crate::orchestration::runner::Runner;
use crate::tasks::sources::matches_glob;
use crate::{klog, klog_debug, klog_error, klog_trace, klog_warn, Error, Result};

/// Globs mapped to the graph that re-runs when a matching file changes.
#[derive(Debug, Clone)]
pub struct WatchBinding {
    name: String,
    patterns: Vec<String>,
    reaction: Node,
}

impl WatchBinding {
    /// Patterns are relative to the watched directory and use forward slashes.
    pub fn new(name: impl Into<String>, patterns: &[&str], reaction: impl Into<Node>) -> Self {
        Self {
            name: name.into(),
            patterns: patterns.iter().map(|p| p.to_string()).collect(),
            reaction: reaction.into(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn patterns(&self) -> &[String] {
        &self.patterns
    }

    pub fn reaction(&self) -> &Node {
        &self.reaction
    }

    pub fn matches(&self, relative: &Path) -> bool {
        self.patterns.iter().any(|p| matches_glob(p, relative))
    }
}

/// Watches one directory and dispatches bindings.
#[derive(Debug, Clone)]
pub struct Watcher {
    root: PathBuf,
    bindings: Vec<WatchBinding>,
    runner: Runner,
}

impl Watcher {
    pub fn new(root: impl Into<PathBuf>, runner: Runner) -> Self {
        Self {
            root: root.into(),
            bindings: Vec::new(),
            runner,
        }
    }

    pub fn bind(mut self, binding: WatchBinding) -> Self {
        self.bindings.push(binding);
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn bindings(&self) -> &[WatchBinding] {
        &self.bindings
    }

    /// Bindings whose globs match `path` (absolute, or relative to the root).
    pub fn matching(&self, path: &Path) -> Vec<&WatchBinding> {
        let relative = path.strip_prefix(&self.root).unwrap_or(path);
        self.bindings
            .iter()
            .filter(|binding| binding.matches(relative))
            .collect()
    }

    /// Spawn the reaction of every binding matching `path`.
    ///
    /// Reactions run in a child scope of `shutdown`. The returned handles
    /// may be dropped; reactions keep running detached.
    pub fn dispatch(&self, path: &Path, shutdown: &CancellationToken) -> Vec<JoinHandle<Result<()>>> {
        self.matching(path)
            .into_iter()
            .map(|binding| {
                klog!("'{}' changed, running {}", path.display(), binding.name());
                let runner = self.runner.clone();
                let reaction = binding.reaction().clone();
                let name = binding.name().to_string();
                let scope = shutdown.child_token();
                tokio::spawn(async move {
                    let result = runner.run_scoped(&reaction, scope).await;
                    match &result {
                        Ok(()) => klog_debug!("Watch reaction '{}' done", name),
                        Err(e) if e.is_cancelled() => klog_debug!("Watch reaction '{}' cancelled", name),
                        Err(e) => klog_error!("Watch reaction '{}' failed: {}", name, e),
                    }
                    result
                })
            })
            .collect()
    }

    /// Watch the root recursively until `shutdown` fires.
    pub async fn run(&self, shutdown: CancellationToken) -> Result<()> {
        if !self.root.is_dir() {
            return Err(Error::SourceMissing(self.root.clone()));
        }
        // Event paths may come back canonicalized (symlinked temp dirs).
        let canonical = self.root.canonicalize()?;

        let (tx, mut rx) = mpsc::unbounded_channel::<notify::Result<Event>>();
        let mut watcher = RecommendedWatcher::new(
            move |res| {
                let _ = tx.send(res);
            },
            NotifyConfig::default(),
        )?;
        watcher.watch(&self.root, RecursiveMode::Recursive)?;
        klog!(
            "Watching {} ({} bindings)",
            self.root.display(),
            self.bindings.len()
        );

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                event = rx.recv() => match event {
                    Some(Ok(event)) => {
                        klog_trace!("notify event: {:?}", event);
                        if !is_change(&event.kind) {
                            continue;
                        }
                        for path in &event.paths {
                            let path = match path.strip_prefix(&canonical) {
                                Ok(relative) => relative.to_path_buf(),
                                Err(_) => path.clone(),
                            };
                            self.dispatch(&path, &shutdown);
                        }
                    }
                    Some(Err(e)) => klog_warn!("Watch error: {}", e),
                    None => break,
                },
            }
        }

        klog!("Stopped watching {}", self.root.display());
        Ok(())
    }
}

fn is_change(kind: &EventKind) -> bool {
    matches!(
        kind,
        EventKind::Create(_) | EventKind::Modify(_) | EventKind::Remove(_)
    )
}
