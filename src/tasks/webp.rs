//! WebP conversion of raster images.

use std::path::{Path, PathBuf};

use image::codecs::webp::WebPEncoder;
use image::DynamicImage;
use tokio_util::sync::CancellationToken;

use crate::config::Config;
use crate::core::checkpoint;
use crate::tasks::sources::SourceSet;
use crate::util::{blocking, write_output};
use crate::{klog, Result};

pub const NAME: &str = "webp";

/// Raster glob, relative to the source directory. Outputs mirror `img/`.
pub const PATTERN: &str = "img/**/*.{jpg,png}";

/// Write a `.webp` sibling for every raster image.
pub async fn webp(config: &Config, cancel: &CancellationToken) -> Result<()> {
    let files = SourceSet::new(config.source_path(), &[PATTERN]).resolve()?;
    let output_dir = config.build_path().join("img");

    for file in &files {
        checkpoint(cancel, NAME)?;
        let path = file.path.clone();
        let encoded = blocking(move || encode_webp(&std::fs::read(&path)?)).await?;
        write_output(&output_dir.join(webp_name(&file.relative)), encoded).await?;
    }

    klog!("Converted {} images to WebP", files.len());
    Ok(())
}

/// Decode any supported raster and encode it as lossless WebP.
pub fn encode_webp(input: &[u8]) -> Result<Vec<u8>> {
    let image = image::load_from_memory(input)?;
    let mut out = Vec::new();
    DynamicImage::ImageRgba8(image.to_rgba8()).write_with_encoder(WebPEncoder::new_lossless(&mut out))?;
    Ok(out)
}

fn webp_name(relative: &Path) -> PathBuf {
    relative.with_extension("webp")
}
