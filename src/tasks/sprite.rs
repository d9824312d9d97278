//! SVG sprite: icons merged into one document of `<symbol>` elements.

use std::path::Path;
use std::sync::LazyLock;

use regex::Regex;
use tokio_util::sync::CancellationToken;

use crate::config::Config;
use crate::core::checkpoint;
use crate::tasks::images::minify_svg;
use crate::tasks::sources::SourceSet;
use crate::util::write_output;
use crate::{klog, klog_debug, Error, Result};

pub const NAME: &str = "sprite";

/// Icon glob, relative to the source directory.
pub const PATTERN: &str = "img/icons/*-icon.svg";

/// Sprite path, relative to the build directory.
pub const OUTPUT: &str = "img/sprite.svg";

const SVG_NS: &str = "http://www.w3.org/2000/svg";
const XLINK_NS: &str = "http://www.w3.org/1999/xlink";

static SVG_ROOT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?is)<svg\b([^>]*)>(.*)</svg\s*>").expect("valid svg root regex"));

static EMPTY_SVG_ROOT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?is)<svg\b([^>]*?)/\s*>").expect("valid empty svg regex"));

static VIEW_BOX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"\bviewBox\s*=\s*(?:"([^"]*)"|'([^']*)')"#).expect("valid viewBox regex")
});

/// One icon converted to a symbol.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Symbol {
    pub id: String,
    pub view_box: Option<String>,
    pub body: String,
    uses_xlink: bool,
}

impl Symbol {
    /// Parse an icon document; `id` becomes the symbol id.
    pub fn parse(id: &str, svg: &str, file: &Path) -> Result<Self> {
        let (attributes, body) = match SVG_ROOT.captures(svg) {
            Some(caps) => (caps[1].to_string(), minify_svg(&caps[2])),
            None => match EMPTY_SVG_ROOT.captures(svg) {
                Some(caps) => (caps[1].to_string(), String::new()),
                None => {
                    return Err(Error::Sprite {
                        file: file.to_path_buf(),
                        message: "no <svg> root element".to_string(),
                    })
                }
            },
        };
        let view_box = VIEW_BOX
            .captures(&attributes)
            .and_then(|v| v.get(1).or_else(|| v.get(2)))
            .map(|m| m.as_str().to_string());
        let uses_xlink = attributes.contains("xmlns:xlink") || body.contains("xlink:");

        Ok(Self {
            id: id.to_string(),
            view_box,
            body,
            uses_xlink,
        })
    }

    fn render(&self) -> String {
        match &self.view_box {
            Some(view_box) => format!(
                r#"<symbol id="{}" viewBox="{}">{}</symbol>"#,
                self.id, view_box, self.body
            ),
            None => format!(r#"<symbol id="{}">{}</symbol>"#, self.id, self.body),
        }
    }
}

/// Concatenate symbols into one inline `<svg>` document.
pub fn render_sprite(symbols: &[Symbol]) -> String {
    let mut out = format!(r#"<svg xmlns="{}""#, SVG_NS);
    if symbols.iter().any(|s| s.uses_xlink) {
        out.push_str(&format!(r#" xmlns:xlink="{}""#, XLINK_NS));
    }
    out.push('>');
    for symbol in symbols {
        out.push_str(&symbol.render());
    }
    out.push_str("</svg>");
    out
}

/// Build `img/sprite.svg` from the icons. Writes nothing when there are none.
pub async fn sprite(config: &Config, cancel: &CancellationToken) -> Result<()> {
    let files = SourceSet::new(config.source_path(), &[PATTERN]).resolve()?;
    if files.is_empty() {
        klog!("No icons found, skipping sprite");
        return Ok(());
    }

    let mut symbols = Vec::with_capacity(files.len());
    for file in &files {
        checkpoint(cancel, NAME)?;
        let svg = tokio::fs::read_to_string(&file.path).await?;
        let id = file
            .path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        klog_debug!("Adding symbol '{}'", id);
        symbols.push(Symbol::parse(&id, &svg, &file.path)?);
    }

    let output = config.build_path().join(OUTPUT);
    write_output(&output, render_sprite(&symbols)).await?;
    klog!("Wrote {} with {} symbols", output.display(), symbols.len());
    Ok(())
}
