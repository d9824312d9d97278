//! Stylesheet compilation: Sass -> prefixed, minified CSS with a source map.

use std::path::Path;

use lightningcss::stylesheet::{MinifyOptions, ParserOptions, PrinterOptions, StyleSheet};
use lightningcss::targets::{Browsers, Targets};
use parcel_sourcemap::SourceMap;
use tokio_util::sync::CancellationToken;

use crate::config::{BrowserTargets, Config};
use crate::core::checkpoint;
use crate::server::{LiveReload, ReloadMessage};
use crate::util::{blocking, slash_path, write_output};
use crate::{klog, klog_debug, Error, Result};

pub const NAME: &str = "styles";

/// Output of [`minify`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompiledStyles {
    /// Minified CSS, ending with a `sourceMappingURL` comment when a map exists.
    pub css: String,
    /// Source map JSON.
    pub map: Option<String>,
}

/// Compile the entry stylesheet and push the result to live sessions.
pub async fn styles(config: &Config, reload: &LiveReload, cancel: &CancellationToken) -> Result<()> {
    let entry = config.source_path().join(&config.styles.entry);
    if !entry.is_file() {
        return Err(Error::SourceMissing(entry));
    }
    checkpoint(cancel, NAME)?;

    let output = config.build_path().join(&config.styles.output);
    let source_name = compiled_source_name(&entry, &config.root);
    let map_name = format!(
        "{}.map",
        output
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()
    );
    let targets = config.styles.targets.clone();
    let with_map = config.styles.source_map;

    klog_debug!("Compiling {} -> {}", entry.display(), output.display());
    let compiled = blocking(move || {
        let css = compile_sass(&entry)?;
        minify(&css, &source_name, with_map.then_some(map_name.as_str()), &targets)
    })
    .await?;
    checkpoint(cancel, NAME)?;

    write_output(&output, &compiled.css).await?;
    if let Some(map) = &compiled.map {
        let mut map_path = output.clone().into_os_string();
        map_path.push(".map");
        write_output(Path::new(&map_path), map).await?;
    }
    klog!("Wrote {} ({} bytes)", output.display(), compiled.css.len());

    let sessions = reload.broadcast(ReloadMessage::Css {
        path: config.styles.output.trim_start_matches('/').to_string(),
    });
    klog_debug!("Stylesheet pushed to {} sessions", sessions);
    Ok(())
}

/// Sass to CSS.
pub fn compile_sass(entry: &Path) -> Result<String> {
    grass::from_path(entry, &grass::Options::default()).map_err(|e| Error::Sass(e.to_string()))
}

/// Name of the compiled Sass output as it appears in the source map.
///
/// The map is built from the CSS that grass produced, so it names
/// `scss/style.css` rather than the `.scss` entry, whose line numbers it
/// does not track.
fn compiled_source_name(entry: &Path, root: &Path) -> String {
    let compiled = entry.with_extension("css");
    compiled
        .strip_prefix(root)
        .map(slash_path)
        .unwrap_or_else(|_| compiled.to_string_lossy().into_owned())
}

/// Prefix and minify CSS; with `map_name`, also produce a source map linked
/// from the CSS under that file name.
pub fn minify(
    css: &str,
    source_name: &str,
    map_name: Option<&str>,
    targets: &BrowserTargets,
) -> Result<CompiledStyles> {
    let mut sheet = StyleSheet::parse(
        css,
        ParserOptions {
            filename: source_name.to_string(),
            ..ParserOptions::default()
        },
    )
    .map_err(|e| Error::Css(e.to_string()))?;

    sheet
        .minify(MinifyOptions {
            targets: browser_targets(targets),
            ..MinifyOptions::default()
        })
        .map_err(|e| Error::Css(e.to_string()))?;

    let mut source_map = match map_name {
        Some(_) => {
            let mut map = SourceMap::new("/");
            map.add_source(source_name);
            map.set_source_content(0, css)
                .map_err(|e| Error::Css(format!("source map: {:?}", e)))?;
            Some(map)
        }
        None => None,
    };

    let printed = sheet
        .to_css(PrinterOptions {
            minify: true,
            source_map: source_map.as_mut(),
            targets: browser_targets(targets),
            ..PrinterOptions::default()
        })
        .map_err(|e| Error::Css(e.to_string()))?;

    let mut code = printed.code;
    let map = match (source_map.as_mut(), map_name) {
        (Some(map), Some(name)) => {
            code.push_str(&format!("\n/*# sourceMappingURL={} */\n", name));
            Some(
                map.to_json(None)
                    .map_err(|e| Error::Css(format!("source map: {:?}", e)))?,
            )
        }
        _ => None,
    };

    Ok(CompiledStyles { css: code, map })
}

fn browser_targets(targets: &BrowserTargets) -> Targets {
    let version = |major: Option<u32>| major.map(|m| m << 16);
    Targets {
        browsers: Some(Browsers {
            chrome: version(targets.chrome),
            firefox: version(targets.firefox),
            safari: version(targets.safari),
            edge: version(targets.edge),
            ios_saf: version(targets.ios_saf),
            samsung: version(targets.samsung),
            ..Browsers::default()
        }),
        ..Targets::default()
    }
}
