//! Output directory removal.

use std::io::ErrorKind;
use std::path::Path;

use crate::config::Config;
use crate::{klog, klog_debug, Error, Result};

/// Delete the build directory tree.
///
/// Returns `false` when there was nothing to delete.
pub async fn clean(config: &Config) -> Result<bool> {
    let build = config.build_path();
    guard(config, &build)?;

    match tokio::fs::remove_dir_all(&build).await {
        Ok(()) => {
            klog!("Removed {}", build.display());
            Ok(true)
        }
        Err(e) if e.kind() == ErrorKind::NotFound => {
            klog_debug!("{} already clean", build.display());
            Ok(false)
        }
        Err(e) => Err(Error::Io(e)),
    }
}

/// Refuse to delete the project root or anything that holds the sources.
fn guard(config: &Config, build: &Path) -> Result<()> {
    let root = crate::util::normalize(&config.root);
    if build.as_os_str().is_empty() || *build == root || config.source_path().starts_with(build) {
        return Err(Error::Validation(format!(
            "refusing to clean {}: it contains the project sources",
            build.display()
        )));
    }
    Ok(())
}
