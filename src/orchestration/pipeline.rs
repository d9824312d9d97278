//! Named tasks and the build/develop graphs composed from them.

use std::future::Future;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::config::Config;
use crate::core::{parallel, sequence, Node, Task};
use crate::orchestration::runner::{RunEvent, Runner};
use crate::orchestration::watcher::{WatchBinding, Watcher};
use crate::server::{DevServer, LiveReload, ReloadMessage};
use crate::tasks::{self, copy, html, images, sprite, styles, webp};
use crate::{klog, klog_error, Result};

/// Names accepted by [`Pipeline::by_name`], in help order.
pub const TASK_NAMES: &[&str] = &[
    "build", "develop", "clean", "styles", "html", "images", "webp", "sprite", "copy", "server",
    "reload", "watcher",
];

/// Builds tasks bound to one project configuration, live reload hub and
/// shutdown token.
#[derive(Debug, Clone)]
pub struct Pipeline {
    config: Arc<Config>,
    reload: LiveReload,
    shutdown: CancellationToken,
    runner: Runner,
}

impl Pipeline {
    pub fn new(config: Config, reload: LiveReload, shutdown: CancellationToken) -> Self {
        let runner = Runner::new(config.failure_policy);
        Self {
            config: Arc::new(config),
            reload,
            shutdown,
            runner,
        }
    }

    /// Use `runner` for graphs and watch reactions, e.g. one reporting events.
    pub fn with_runner(mut self, runner: Runner) -> Self {
        self.runner = runner;
        self
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn reload(&self) -> &LiveReload {
        &self.reload
    }

    pub fn runner(&self) -> &Runner {
        &self.runner
    }

    /// Run a graph in a child scope of the shutdown token.
    pub async fn run(&self, node: &Node) -> Result<()> {
        self.runner
            .run_scoped(node, self.shutdown.child_token())
            .await
    }

    fn transform<F, Fut>(&self, name: &'static str, action: F) -> Task
    where
        F: Fn(Arc<Config>, CancellationToken) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        let config = self.config.clone();
        Task::new(name, move |cancel| action(config.clone(), cancel))
    }

    pub fn clean(&self) -> Task {
        self.transform("clean", |config, _| async move {
            tasks::clean(&config).await.map(|_| ())
        })
    }

    pub fn styles(&self) -> Task {
        let reload = self.reload.clone();
        self.transform(styles::NAME, move |config, cancel| {
            let reload = reload.clone();
            async move { tasks::styles(&config, &reload, &cancel).await }
        })
    }

    pub fn html(&self) -> Task {
        self.transform(html::NAME, |config, cancel| async move {
            tasks::html(&config, &cancel).await
        })
    }

    pub fn images(&self) -> Task {
        self.transform(images::NAME, |config, cancel| async move {
            tasks::images(&config, &cancel).await
        })
    }

    pub fn webp(&self) -> Task {
        self.transform(webp::NAME, |config, cancel| async move {
            tasks::webp(&config, &cancel).await
        })
    }

    pub fn sprite(&self) -> Task {
        self.transform(sprite::NAME, |config, cancel| async move {
            tasks::sprite(&config, &cancel).await
        })
    }

    pub fn copy(&self) -> Task {
        self.transform(copy::NAME, |config, cancel| async move {
            tasks::copy(&config, &cancel).await
        })
    }

    /// Full page reload of every live session.
    pub fn reload_task(&self) -> Task {
        let reload = self.reload.clone();
        Task::new("reload", move |_| {
            let reload = reload.clone();
            async move {
                let sessions = reload.broadcast(ReloadMessage::Reload);
                klog!("Reloaded {} sessions", sessions);
                Ok(())
            }
        })
    }

    /// Start the dev server. Completes once the listener is bound; the server
    /// keeps running until shutdown.
    pub fn server(&self) -> Task {
        let reload = self.reload.clone();
        let shutdown = self.shutdown.clone();
        self.transform("server", move |config, _| {
            let server = DevServer::from_config(&config, reload.clone());
            let shutdown = shutdown.clone();
            async move {
                server.start(&config.server_addr(), shutdown).await?;
                Ok(())
            }
        })
    }

    /// Watch the sources until shutdown.
    pub fn watcher(&self) -> Task {
        let watcher = self.file_watcher();
        let shutdown = self.shutdown.clone();
        Task::new("watcher", move |_| {
            let watcher = watcher.clone();
            let shutdown = shutdown.clone();
            async move { watcher.run(shutdown).await }
        })
    }

    /// Stylesheet edits recompile and push CSS; markup edits rebuild and
    /// reload once. Patterns are relative to the source directory.
    pub fn watch_bindings(&self) -> Vec<WatchBinding> {
        vec![
            WatchBinding::new("styles", &["scss/**/*.scss"], sequence([self.styles()])),
            WatchBinding::new(
                "html",
                &[html::PATTERN],
                sequence([self.html(), self.reload_task()]),
            ),
        ]
    }

    /// A watcher over the source directory with [`Pipeline::watch_bindings`].
    pub fn file_watcher(&self) -> Watcher {
        self.watch_bindings()
            .into_iter()
            .fold(
                Watcher::new(self.config.source_path(), self.runner.clone()),
                Watcher::bind,
            )
    }

    /// Production build. Copy runs before Images so the optimized images
    /// replace the copied originals.
    pub fn build(&self) -> Node {
        sequence([
            Node::from(self.clean()),
            parallel([
                Node::from(self.styles()),
                Node::from(self.html()),
                Node::from(self.sprite()),
                sequence([self.copy(), self.images()]),
                Node::from(self.webp()),
            ]),
        ])
    }

    /// Report a failure of `task` and succeed anyway.
    ///
    /// Used for sources that are edited while developing: a broken
    /// stylesheet or include is reported on the console, and the server and
    /// watcher still start so that fixing the file rebuilds it.
    pub fn forgiving(&self, task: Task) -> Task {
        let runner = self.runner.clone();
        let name = task.name().to_string();
        Task::new(name.clone(), move |cancel| {
            let task = task.clone();
            let runner = runner.clone();
            let name = name.clone();
            async move {
                match task.invoke(cancel).await {
                    Err(e) if !e.is_cancelled() => {
                        klog_error!("'{}' failed, continuing: {}", name, e);
                        runner.emit(RunEvent::Failed {
                            task: name,
                            error: e.to_string(),
                        });
                        Ok(())
                    }
                    other => other,
                }
            }
        })
    }

    /// Development loop: build without image optimization, then serve and
    /// watch until shutdown. Styles and html failures do not stop the loop.
    pub fn develop(&self) -> Node {
        sequence([
            Node::from(self.clean()),
            parallel([
                self.forgiving(self.styles()),
                self.forgiving(self.html()),
                self.sprite(),
                self.copy(),
                self.webp(),
            ]),
            sequence([self.server(), self.watcher()]),
        ])
    }

    /// The graph for a command-line task name.
    pub fn by_name(&self, name: &str) -> Option<Node> {
        let node = match name {
            "build" => self.build(),
            "develop" | "default" => self.develop(),
            "clean" => self.clean().into(),
            "styles" => self.styles().into(),
            "html" => self.html().into(),
            "images" => self.images().into(),
            "webp" => self.webp().into(),
            "sprite" => self.sprite().into(),
            "copy" => self.copy().into(),
            "server" => self.server().into(),
            "reload" => self.reload_task().into(),
            "watcher" => self.watcher().into(),
            _ => return None,
        };
        Some(node)
    }
}
