//! Verbatim copy of static assets.

use tokio_util::sync::CancellationToken;

use crate::config::Config;
use crate::core::checkpoint;
use crate::tasks::sources::SourceSet;
use crate::{klog, klog_debug, Result};

pub const NAME: &str = "copy";

/// Copied globs, relative to the source directory. Outputs mirror the source
/// directory itself.
pub const PATTERNS: &[&str] = &["fonts/*.{woff2,woff}", "*.ico", "img/**/*.{jpg,png,svg}"];

/// Copy fonts, favicons and images unchanged. Completes once every file is
/// written.
pub async fn copy(config: &Config, cancel: &CancellationToken) -> Result<()> {
    let source = config.source_path();
    let build = config.build_path();
    let files = SourceSet::new(&source, PATTERNS).with_base("").resolve()?;

    for file in &files {
        checkpoint(cancel, NAME)?;
        let target = build.join(&file.relative);
        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        klog_debug!("{} -> {}", file.path.display(), target.display());
        tokio::fs::copy(&file.path, &target).await?;
    }

    klog!("Copied {} files", files.len());
    Ok(())
}
