//! Minimal HTTP/1.1 pieces for the dev server.
//!
//! One request per connection: the server reads a request head (and a small
//! body), writes one response and closes, except for event streams.

use std::path::{Component, Path, PathBuf};

use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt};

use crate::{Error, Result};

const MAX_HEAD: usize = 16 * 1024;
const MAX_BODY: usize = 64 * 1024;

/// Tag inserted into served HTML pages.
pub const CLIENT_TAG: &str = r#"<script src="/__kiln/client.js"></script>"#;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    pub method: String,
    /// Request target without query string or fragment, still percent-encoded.
    pub path: String,
    /// Header names are lowercased.
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl Request {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }
}

/// Read one request. `Ok(None)` means the peer closed before sending anything.
pub async fn read_request<R>(reader: &mut R) -> Result<Option<Request>>
where
    R: AsyncBufRead + Unpin,
{
    // The head is read through a limited view so an endless line cannot
    // grow the buffer past MAX_HEAD.
    let mut head = (&mut *reader).take(MAX_HEAD as u64);
    let mut line = String::new();
    if head.read_line(&mut line).await? == 0 {
        return Ok(None);
    }
    if head_truncated(&line, head.limit()) {
        return Err(head_too_large());
    }
    let mut parts = line.split_whitespace();
    let (Some(method), Some(target)) = (parts.next(), parts.next()) else {
        return Err(Error::Server(format!("malformed request line: {:?}", line.trim_end())));
    };
    let method = method.to_ascii_uppercase();
    let path = target
        .split(['?', '#'])
        .next()
        .unwrap_or_default()
        .to_string();

    let mut headers = Vec::new();
    loop {
        line.clear();
        let read = head.read_line(&mut line).await?;
        if head_truncated(&line, head.limit()) {
            return Err(head_too_large());
        }
        let trimmed = line.trim_end();
        if read == 0 || trimmed.is_empty() {
            break;
        }
        if let Some((key, value)) = trimmed.split_once(':') {
            headers.push((key.trim().to_ascii_lowercase(), value.trim().to_string()));
        }
    }

    let mut request = Request {
        method,
        path,
        headers,
        body: Vec::new(),
    };
    let length = request
        .header("content-length")
        .and_then(|v| v.parse::<usize>().ok())
        .unwrap_or(0);
    if length > MAX_BODY {
        return Err(Error::Server(format!("request body too large ({} bytes)", length)));
    }
    if length > 0 {
        request.body = vec![0; length];
        reader.read_exact(&mut request.body).await?;
    }
    Ok(Some(request))
}

/// A line cut short by the head limit rather than by a newline or EOF.
fn head_truncated(line: &str, remaining: u64) -> bool {
    remaining == 0 && !line.ends_with('\n')
}

fn head_too_large() -> Error {
    Error::Server("request head too large".to_string())
}

/// A buffered response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl Response {
    pub fn new(status: u16) -> Self {
        Self {
            status,
            headers: Vec::new(),
            body: Vec::new(),
        }
    }

    pub fn text(status: u16, text: &str) -> Self {
        Self::new(status).with_body(text.as_bytes().to_vec(), "text/plain; charset=utf-8")
    }

    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        self.headers.push((name.to_string(), value.to_string()));
        self
    }

    pub fn with_body(mut self, body: Vec<u8>, content_type: &str) -> Self {
        self.body = body;
        self.with_header("Content-Type", content_type)
    }

    /// Serialize head and, unless `head_only`, the body.
    pub fn to_bytes(&self, head_only: bool) -> Vec<u8> {
        let mut out = status_line(self.status).into_bytes();
        for (name, value) in &self.headers {
            out.extend_from_slice(format!("{}: {}\r\n", name, value).as_bytes());
        }
        out.extend_from_slice(format!("Content-Length: {}\r\n", self.body.len()).as_bytes());
        out.extend_from_slice(b"Connection: close\r\n\r\n");
        if !head_only {
            out.extend_from_slice(&self.body);
        }
        out
    }
}

/// Head of a `text/event-stream` response; the body follows as events.
pub fn event_stream_head(cors: bool) -> Vec<u8> {
    let mut head = status_line(200);
    head.push_str("Content-Type: text/event-stream\r\n");
    head.push_str("Cache-Control: no-store\r\n");
    head.push_str("Connection: keep-alive\r\n");
    if cors {
        head.push_str("Access-Control-Allow-Origin: *\r\n");
    }
    head.push_str("\r\n");
    head.into_bytes()
}

fn status_line(status: u16) -> String {
    format!("HTTP/1.1 {} {}\r\n", status, reason(status))
}

fn reason(status: u16) -> &'static str {
    match status {
        200 => "OK",
        204 => "No Content",
        400 => "Bad Request",
        403 => "Forbidden",
        404 => "Not Found",
        405 => "Method Not Allowed",
        _ => "Internal Server Error",
    }
}

/// Map a request path onto a file below `root`.
///
/// Returns `None` for paths that are not valid UTF-8 after decoding or that
/// try to leave the root.
pub fn resolve_path(root: &Path, url_path: &str) -> Option<PathBuf> {
    let decoded = percent_decode(url_path)?;
    let mut path = root.to_path_buf();
    for segment in decoded.split('/') {
        match segment {
            "" | "." => {}
            ".." => return None,
            _ => {
                // Reject separators and prefixes smuggled inside one segment.
                let mut components = Path::new(segment).components();
                match (components.next(), components.next()) {
                    (Some(Component::Normal(part)), None) => path.push(part),
                    _ => return None,
                }
            }
        }
    }
    Some(path)
}

fn percent_decode(input: &str) -> Option<String> {
    let bytes = input.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' && i + 2 < bytes.len() {
            let hex = std::str::from_utf8(&bytes[i + 1..i + 3]).ok()?;
            out.push(u8::from_str_radix(hex, 16).ok()?);
            i += 3;
        } else {
            out.push(bytes[i]);
            i += 1;
        }
    }
    String::from_utf8(out).ok()
}

/// Content type by file extension.
pub fn content_type(path: &Path) -> &'static str {
    let extension = path
        .extension()
        .map(|e| e.to_string_lossy().to_ascii_lowercase())
        .unwrap_or_default();
    match extension.as_str() {
        "html" | "htm" => "text/html; charset=utf-8",
        "css" => "text/css; charset=utf-8",
        "js" | "mjs" => "application/javascript; charset=utf-8",
        "json" | "map" => "application/json",
        "svg" => "image/svg+xml",
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "webp" => "image/webp",
        "gif" => "image/gif",
        "ico" => "image/x-icon",
        "woff" => "font/woff",
        "woff2" => "font/woff2",
        "txt" => "text/plain; charset=utf-8",
        "xml" => "application/xml",
        _ => "application/octet-stream",
    }
}

/// Insert the live reload client before the last `</body>`, or append it.
pub fn inject_client(html: &str) -> String {
    let lower = html.to_ascii_lowercase();
    match lower.rfind("</body>") {
        Some(index) => format!("{}{}{}", &html[..index], CLIENT_TAG, &html[index..]),
        None => format!("{}{}", html, CLIENT_TAG),
    }
}
