use std::path::PathBuf;
use std::process::ExitCode;

use chrono::Local;
use clap::{Parser, Subcommand};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use kiln::config::Config;
use kiln::orchestration::{Pipeline, RunEvent, Runner};
use kiln::server::{self, LiveReload};
use kiln::{klog, klog_warn, Error, Result};

/// kiln - static site asset pipeline
#[derive(Parser, Debug)]
#[command(name = "kiln")]
#[command(version, about, long_about = None)]
#[command(after_help = "ENVIRONMENT:\n    KILN_DEBUG=1    Enable debug logging (alternative to --debug)")]
pub struct Cli {
    /// Project root containing kiln.toml and the source directory
    #[arg(long, global = true, default_value = ".")]
    pub root: PathBuf,

    /// Enable debug logging (writes to ~/.kiln/kiln.log)
    #[arg(short = 'd', long, global = true)]
    pub debug: bool,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand, Debug, Clone, PartialEq)]
pub enum Command {
    /// Delete the build directory
    Clean,
    /// Clean, then run every transform into the build directory
    Build,
    /// Build, serve and rebuild on change (the default)
    Develop,
    /// Compile, prefix and minify the stylesheet
    Styles,
    /// Expand includes and minify markup
    Html,
    /// Optimize images
    Images,
    /// Convert raster images to WebP
    Webp,
    /// Merge icons into an SVG sprite
    Sprite,
    /// Copy fonts, favicons and images unchanged
    Copy,
    /// Serve the build directory with live reload
    Server,
    /// Reload every browser connected to a running dev server
    Reload,
    /// Rebuild on source changes
    Watcher,
    /// Print the task graphs
    Tasks,
}

impl Command {
    fn task_name(&self) -> &'static str {
        match self {
            Command::Clean => "clean",
            Command::Build => "build",
            Command::Develop => "develop",
            Command::Styles => "styles",
            Command::Html => "html",
            Command::Images => "images",
            Command::Webp => "webp",
            Command::Sprite => "sprite",
            Command::Copy => "copy",
            Command::Server => "server",
            Command::Reload => "reload",
            Command::Watcher => "watcher",
            Command::Tasks => "tasks",
        }
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    kiln::log::init(cli.debug, None);

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) if e.is_cancelled() => {
            eprintln!("kiln: interrupted");
            ExitCode::from(130)
        }
        Err(e) => {
            let mut lines = e.chain().into_iter();
            if let Some(first) = lines.next() {
                eprintln!("kiln: {}", first);
            }
            for cause in lines {
                eprintln!("  caused by: {}", cause);
            }
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> Result<()> {
    let command = cli.command.unwrap_or(Command::Develop);
    klog!("kiln {} in {}", command.task_name(), cli.root.display());
    let config = Config::load(&cli.root)?;

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;
    runtime.block_on(execute(command, config))
}

async fn execute(command: Command, config: Config) -> Result<()> {
    let shutdown = CancellationToken::new();
    spawn_interrupt_handler(shutdown.clone());

    let (events_tx, events_rx) = mpsc::unbounded_channel();
    let reporter = tokio::spawn(report(events_rx));
    let runner = Runner::new(config.failure_policy).with_events(events_tx);
    let addr = config.server_addr();
    let pipeline = Pipeline::new(config, LiveReload::new(), shutdown.clone()).with_runner(runner);

    let result = match command {
        Command::Tasks => {
            print_tasks(&pipeline);
            Ok(())
        }
        Command::Reload => reload_running_server(&addr).await,
        Command::Server => {
            pipeline.run(&pipeline.server().into()).await?;
            println!("Serving at http://{} (Ctrl-C to stop)", addr);
            shutdown.cancelled().await;
            Ok(())
        }
        other => {
            let name = other.task_name();
            let graph = pipeline
                .by_name(name)
                .ok_or_else(|| Error::Validation(format!("unknown task '{}'", name)))?;
            if other == Command::Develop {
                println!("Serving at http://{} (Ctrl-C to stop)", addr);
            }
            pipeline.run(&graph).await
        }
    };

    // Closing the last sender ends the reporter once queued events print.
    drop(pipeline);
    let _ = reporter.await;
    result
}

fn spawn_interrupt_handler(shutdown: CancellationToken) {
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                klog!("Interrupt received, shutting down");
                shutdown.cancel();
            }
            Err(e) => klog_warn!("Cannot listen for Ctrl-C: {}", e),
        }
    });
}

/// Print task lifecycle events with wall-clock timestamps.
async fn report(mut events: mpsc::UnboundedReceiver<RunEvent>) {
    while let Some(event) = events.recv().await {
        let now = Local::now().format("%H:%M:%S");
        match event {
            RunEvent::Started { task } => println!("[{}] Starting '{}'...", now, task),
            RunEvent::Finished { task, elapsed } => {
                println!("[{}] Finished '{}' after {} ms", now, task, elapsed.as_millis())
            }
            RunEvent::Failed { task, error } => {
                eprintln!("[{}] '{}' errored: {}", now, task, error)
            }
            RunEvent::Cancelled { task } => println!("[{}] '{}' cancelled", now, task),
        }
    }
}

async fn reload_running_server(addr: &str) -> Result<()> {
    match server::request_reload(addr).await {
        Ok(sessions) => {
            println!("Reloaded {} sessions", sessions);
            Ok(())
        }
        Err(Error::Server(message)) => {
            klog_warn!("Reload skipped: {}", message);
            println!("No dev server running at {}; nothing to reload", addr);
            Ok(())
        }
        Err(e) => Err(e),
    }
}

fn print_tasks(pipeline: &Pipeline) {
    for name in kiln::orchestration::TASK_NAMES {
        if let Some(graph) = pipeline.by_name(name) {
            println!("{:<8} {}", name, graph);
        }
    }
    println!();
    println!("watch bindings:");
    for binding in pipeline.watch_bindings() {
        println!(
            "  {} [{}] -> {}",
            binding.name(),
            binding.patterns().join(", "),
            binding.reaction()
        );
    }
}
