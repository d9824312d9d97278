use std::path::PathBuf;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),

    #[error("Invalid glob pattern: {0}")]
    Pattern(#[from] glob::PatternError),

    #[error("Glob error: {0}")]
    Glob(#[from] glob::GlobError),

    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Watch error: {0}")]
    Watch(#[from] notify::Error),

    #[error("Sass error: {0}")]
    Sass(String),

    #[error("CSS error: {0}")]
    Css(String),

    #[error("Include error in {}: {message}", .file.display())]
    Include { file: PathBuf, message: String },

    #[error("Sprite error in {}: {message}", .file.display())]
    Sprite { file: PathBuf, message: String },

    #[error("Source not found: {}", .0.display())]
    SourceMissing(PathBuf),

    #[error("Task '{task}' failed: {source}")]
    Task {
        task: String,
        #[source]
        source: Box<Error>,
    },

    #[error("Task '{0}' cancelled")]
    Cancelled(String),

    #[error("Task join error: {0}")]
    TaskJoin(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Server error: {0}")]
    Server(String),
}

impl Error {
    /// True for cancellation, including a cancellation wrapped by a task.
    pub fn is_cancelled(&self) -> bool {
        match self {
            Error::Cancelled(_) => true,
            Error::Task { source, .. } => source.is_cancelled(),
            _ => false,
        }
    }

    /// Name of the task that failed, if the error came out of the runner.
    pub fn task_name(&self) -> Option<&str> {
        match self {
            Error::Task { task, .. } => Some(task),
            Error::Cancelled(task) => Some(task),
            _ => None,
        }
    }

    /// The error followed by its causes, skipping causes whose text is
    /// already part of the line before.
    pub fn chain(&self) -> Vec<String> {
        let mut lines = vec![self.to_string()];
        let mut source = std::error::Error::source(self);
        while let Some(cause) = source {
            let text = cause.to_string();
            if !lines.last().is_some_and(|last| last.contains(&text)) {
                lines.push(text);
            }
            source = cause.source();
        }
        lines
    }
}

pub type Result<T> = std::result::Result<T, Error>;
