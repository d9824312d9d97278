//! Markup processing: include expansion followed by whitespace collapsing.
//!
//! Include directives look like `@@include('parts/header.html')` or
//! `@@include("card.html", {"title": "Hello"})`. Paths are relative to the
//! including file. Inside an included file, `@@title` is replaced with the
//! matching value of the JSON context; nested includes inherit it.

use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use regex::{Captures, Regex};
use serde_json::{Map, Value};
use tokio_util::sync::CancellationToken;

use crate::config::Config;
use crate::core::checkpoint;
use crate::tasks::sources::SourceSet;
use crate::util::{blocking, normalize, write_output};
use crate::{klog, klog_debug, Error, Result};

pub const NAME: &str = "html";

/// Markup glob, relative to the source directory.
pub const PATTERN: &str = "**/*.html";

static RAW_BLOCK: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?is)<pre\b.*?</pre\s*>|<textarea\b.*?</textarea\s*>|<script\b.*?</script\s*>|<style\b.*?</style\s*>",
    )
    .expect("valid raw block regex")
});

static WHITESPACE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\s+").expect("valid whitespace regex"));

static BLOCK_TAG: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(concat!(
        r"(?i)\s*(<!doctype[^>]*>|</?(?:address|article|aside|base|blockquote|body|br|dd|div|dl|dt|",
        r"fieldset|figcaption|figure|footer|form|h[1-6]|head|header|hr|html|li|link|main|meta|nav|",
        r"noscript|ol|option|p|picture|section|select|source|table|tbody|td|template|tfoot|th|",
        r"thead|title|tr|ul)\b[^>]*>)\s*"
    ))
    .expect("valid block tag regex")
});

/// Process every markup file under the source directory.
pub async fn html(config: &Config, cancel: &CancellationToken) -> Result<()> {
    let source = config.source_path();
    let build = config.build_path();
    let files = SourceSet::new(&source, &[PATTERN]).resolve()?;
    let includer = Includer::new(&config.html.include_prefix)?;
    let collapse = config.html.collapse_whitespace;

    for file in &files {
        checkpoint(cancel, NAME)?;
        let includer = includer.clone();
        let path = file.path.clone();
        let markup = blocking(move || {
            let expanded = includer.expand_file(&path)?;
            Ok(if collapse {
                collapse_whitespace(&expanded)
            } else {
                expanded
            })
        })
        .await?;
        let output = build.join(&file.relative);
        klog_debug!("{} -> {}", file.path.display(), output.display());
        write_output(&output, markup).await?;
    }

    klog!("Processed {} markup files", files.len());
    Ok(())
}

/// Expands include directives with a configurable prefix.
#[derive(Debug, Clone)]
pub struct Includer {
    directive: Regex,
    variable: Regex,
}

impl Includer {
    pub fn new(prefix: &str) -> Result<Self> {
        let escaped = regex::escape(prefix);
        let directive = Regex::new(&format!(r"{}include\s*\(", escaped))
            .map_err(|e| Error::Validation(format!("include prefix: {}", e)))?;
        let variable = Regex::new(&format!(r"{}([A-Za-z_]\w*(?:\.\w+)*)", escaped))
            .map_err(|e| Error::Validation(format!("include prefix: {}", e)))?;
        Ok(Self {
            directive,
            variable,
        })
    }

    /// Read a file and expand its directives.
    pub fn expand_file(&self, path: &Path) -> Result<String> {
        let text = std::fs::read_to_string(path)?;
        let mut stack = vec![normalize(path)];
        self.expand(&text, path, &Map::new(), &mut stack)
    }

    /// Expand directives in `text`, which was read from `file`.
    pub fn expand(
        &self,
        text: &str,
        file: &Path,
        context: &Map<String, Value>,
        stack: &mut Vec<PathBuf>,
    ) -> Result<String> {
        let include_error = |message: String| Error::Include {
            file: file.to_path_buf(),
            message,
        };

        let mut out = String::with_capacity(text.len());
        let mut rest = text;
        while let Some(found) = self.directive.find(rest) {
            out.push_str(&rest[..found.start()]);
            let args = &rest[found.end()..];
            let (target, params, consumed) = parse_arguments(args).map_err(include_error)?;

            let dir = file.parent().unwrap_or_else(|| Path::new("."));
            let child = normalize(&dir.join(&target));
            if stack.contains(&child) {
                return Err(include_error(format!("include cycle through {}", child.display())));
            }
            let child_text = std::fs::read_to_string(&child)
                .map_err(|e| include_error(format!("cannot include {}: {}", target, e)))?;

            let mut child_context = context.clone();
            if let Some(params) = params {
                child_context.extend(params);
            }

            stack.push(child.clone());
            let expanded = self.expand(&child_text, &child, &child_context, stack)?;
            stack.pop();

            out.push_str(&expanded);
            rest = &args[consumed..];
        }
        out.push_str(rest);

        if context.is_empty() {
            return Ok(out);
        }
        Ok(self.substitute(&out, context))
    }

    /// Replace `@@name` (and `@@a.b` for nested objects) with context values;
    /// unknown names are left alone.
    fn substitute(&self, text: &str, context: &Map<String, Value>) -> String {
        self.variable
            .replace_all(text, |caps: &Captures| {
                match lookup(context, &caps[1]) {
                    Some(Value::String(s)) => s.clone(),
                    Some(other) => other.to_string(),
                    None => caps[0].to_string(),
                }
            })
            .into_owned()
    }
}

fn lookup<'a>(context: &'a Map<String, Value>, dotted: &str) -> Option<&'a Value> {
    let mut parts = dotted.split('.');
    let mut value = context.get(parts.next()?)?;
    for part in parts {
        value = value.get(part)?;
    }
    Some(value)
}

/// Parse `'path'[, {json}])` following `include(`.
///
/// Returns the path, the optional JSON object and the number of bytes
/// consumed including the closing parenthesis.
fn parse_arguments(
    input: &str,
) -> std::result::Result<(String, Option<Map<String, Value>>, usize), String> {
    let bytes = input.as_bytes();
    let mut pos = skip_whitespace(input, 0);

    let quote = match bytes.get(pos) {
        Some(&q @ (b'\'' | b'"')) => q,
        _ => return Err("include path must be a quoted string".to_string()),
    };
    let start = pos + 1;
    let end = input[start..]
        .find(quote as char)
        .map(|i| start + i)
        .ok_or_else(|| "unterminated include path".to_string())?;
    let path = input[start..end].to_string();
    pos = skip_whitespace(input, end + 1);

    let mut params = None;
    if bytes.get(pos) == Some(&b',') {
        pos = skip_whitespace(input, pos + 1);
        if bytes.get(pos) != Some(&b'{') {
            return Err("include context must be a JSON object".to_string());
        }
        let close = matching_brace(input, pos).ok_or_else(|| "unterminated include context".to_string())?;
        let value: Value = serde_json::from_str(&input[pos..=close])
            .map_err(|e| format!("invalid include context: {}", e))?;
        match value {
            Value::Object(map) => params = Some(map),
            _ => return Err("include context must be a JSON object".to_string()),
        }
        pos = skip_whitespace(input, close + 1);
    }

    if bytes.get(pos) != Some(&b')') {
        return Err("expected ')' after include arguments".to_string());
    }
    Ok((path, params, pos + 1))
}

fn skip_whitespace(input: &str, from: usize) -> usize {
    input[from..]
        .find(|c: char| !c.is_whitespace())
        .map(|i| from + i)
        .unwrap_or(input.len())
}

/// Index of the `}` closing the `{` at `open`, skipping quoted strings.
fn matching_brace(input: &str, open: usize) -> Option<usize> {
    let mut depth = 0usize;
    let mut in_string: Option<char> = None;
    let mut escaped = false;
    for (i, c) in input[open..].char_indices() {
        if let Some(q) = in_string {
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == q {
                in_string = None;
            }
            continue;
        }
        match c {
            '"' | '\'' => in_string = Some(c),
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(open + i);
                }
            }
            _ => {}
        }
    }
    None
}

/// Collapse insignificant whitespace.
///
/// Runs of whitespace become one space, whitespace next to block-level tags
/// and the doctype disappears, and `pre`, `textarea`, `script` and `style`
/// bodies are kept verbatim.
pub fn collapse_whitespace(html: &str) -> String {
    let mut out = String::with_capacity(html.len());
    let mut last = 0;
    let mut after_raw = false;

    for raw in RAW_BLOCK.find_iter(html) {
        let collapsed = collapse_segment(&html[last..raw.start()]);
        out.push_str(if after_raw { collapsed.trim_start() } else { collapsed.as_str() });
        out.truncate(out.trim_end().len());
        out.push_str(raw.as_str());
        last = raw.end();
        after_raw = true;
    }

    let collapsed = collapse_segment(&html[last..]);
    out.push_str(if after_raw { collapsed.trim_start() } else { collapsed.as_str() });
    out.trim().to_string()
}

fn collapse_segment(segment: &str) -> String {
    let single = WHITESPACE.replace_all(segment, " ");
    BLOCK_TAG.replace_all(&single, "$1").into_owned()
}
