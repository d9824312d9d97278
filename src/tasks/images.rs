//! Image optimization for the build output.

use std::path::Path;
use std::sync::LazyLock;

use image::codecs::jpeg::JpegEncoder;
use image::codecs::png::{CompressionType, FilterType, PngEncoder};
use image::{DynamicImage, ImageFormat};
use regex::Regex;
use tokio_util::sync::CancellationToken;

use crate::config::{Config, ImageConfig};
use crate::core::checkpoint;
use crate::tasks::sources::SourceSet;
use crate::util::{blocking, write_output};
use crate::{klog, klog_debug, Result};

pub const NAME: &str = "images";

/// Images glob, relative to the source directory. Outputs mirror `img/`.
pub const PATTERN: &str = "img/**/*.{png,jpg,svg}";

static SVG_NOISE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?is)<\?xml.*?\?>|<!doctype[^>]*>|<!--.*?-->|<metadata\b.*?</metadata\s*>")
        .expect("valid svg noise regex")
});

static BETWEEN_TAGS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r">\s+<").expect("valid inter-tag regex"));

static WHITESPACE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\s+").expect("valid whitespace regex"));

/// Optimize every image under `img/` into the build directory.
pub async fn images(config: &Config, cancel: &CancellationToken) -> Result<()> {
    let files = SourceSet::new(config.source_path(), &[PATTERN]).resolve()?;
    let output_dir = config.build_path().join("img");

    let mut before = 0usize;
    let mut after = 0usize;
    for file in &files {
        checkpoint(cancel, NAME)?;
        let path = file.path.clone();
        let settings = config.images.clone();
        let (input_len, optimized) = blocking(move || {
            let input = std::fs::read(&path)?;
            let optimized = optimize(&path, &input, &settings)?;
            Ok((input.len(), optimized))
        })
        .await?;

        klog_debug!(
            "{}: {} -> {} bytes",
            file.relative.display(),
            input_len,
            optimized.len()
        );
        before += input_len;
        after += optimized.len();
        write_output(&output_dir.join(&file.relative), &optimized).await?;
    }

    klog!(
        "Optimized {} images ({} -> {} bytes)",
        files.len(),
        before,
        after
    );
    Ok(())
}

/// Optimize one image by its extension. Unknown types pass through.
pub fn optimize(path: &Path, input: &[u8], settings: &ImageConfig) -> Result<Vec<u8>> {
    let extension = path
        .extension()
        .map(|e| e.to_string_lossy().to_ascii_lowercase());
    let optimized = match extension.as_deref() {
        Some("jpg" | "jpeg") => encode_jpeg(input, settings.jpeg_quality)?,
        Some("png") => encode_png(input)?,
        Some("svg") => minify_svg(&String::from_utf8_lossy(input)).into_bytes(),
        _ => return Ok(input.to_vec()),
    };

    if settings.never_grow && optimized.len() > input.len() {
        klog_debug!("{} grew when optimized, keeping original", path.display());
        return Ok(input.to_vec());
    }
    Ok(optimized)
}

fn encode_jpeg(input: &[u8], quality: u8) -> Result<Vec<u8>> {
    let image = image::load_from_memory_with_format(input, ImageFormat::Jpeg)?;
    let mut out = Vec::new();
    DynamicImage::ImageRgb8(image.to_rgb8())
        .write_with_encoder(JpegEncoder::new_with_quality(&mut out, quality))?;
    Ok(out)
}

fn encode_png(input: &[u8]) -> Result<Vec<u8>> {
    let image = image::load_from_memory_with_format(input, ImageFormat::Png)?;
    let mut out = Vec::new();
    image.write_with_encoder(PngEncoder::new_with_quality(
        &mut out,
        CompressionType::Best,
        FilterType::Adaptive,
    ))?;
    Ok(out)
}

/// Strip the prolog, doctype, comments, metadata and formatting whitespace.
pub fn minify_svg(svg: &str) -> String {
    let stripped = SVG_NOISE.replace_all(svg, "");
    let tight = BETWEEN_TAGS.replace_all(&stripped, "><");
    WHITESPACE.replace_all(&tight, " ").trim().to_string()
}
