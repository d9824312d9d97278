//! Development server: static files from the build directory plus live reload
//! over Server-Sent Events.
//!
//! Routes:
//! - `GET /__kiln/events`: event stream; each connection is one live session.
//! - `GET /__kiln/client.js`: browser client for the event stream.
//! - `POST /__kiln/reload`: broadcast a full reload to every session.
//! - `GET`/`HEAD` anything else: a file below the root; directories serve
//!   their `index.html`, HTML pages get the client script injected.

pub mod http;
pub mod reload;

use std::io::ErrorKind;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use reqwest::Client;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::config::Config;
use crate::{klog, klog_debug, klog_warn, Error, Result};

pub use http::{Request, Response};
pub use reload::{LiveReload, ReloadMessage, SessionId, CLIENT_SCRIPT};

pub const EVENTS_PATH: &str = "/__kiln/events";
pub const CLIENT_PATH: &str = "/__kiln/client.js";
pub const RELOAD_PATH: &str = "/__kiln/reload";

/// Interval between comment lines on idle event streams.
pub const KEEPALIVE_INTERVAL: Duration = Duration::from_secs(15);

/// Static file server with a live reload session set.
#[derive(Debug, Clone)]
pub struct DevServer {
    root: PathBuf,
    cors: bool,
    reload: LiveReload,
}

/// A running server.
#[derive(Debug)]
pub struct ServerHandle {
    local_addr: SocketAddr,
    task: JoinHandle<()>,
}

impl ServerHandle {
    /// The bound address; differs from the requested one when port 0 was used.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Wait for the accept loop to exit after shutdown.
    pub async fn stopped(self) -> Result<()> {
        self.task.await.map_err(|e| Error::TaskJoin(e.to_string()))
    }
}

impl DevServer {
    pub fn new(root: impl Into<PathBuf>, reload: LiveReload) -> Self {
        Self {
            root: root.into(),
            cors: true,
            reload,
        }
    }

    /// Server rooted at the configured build directory.
    pub fn from_config(config: &Config, reload: LiveReload) -> Self {
        Self::new(config.build_path(), reload).with_cors(config.server.cors)
    }

    pub fn with_cors(mut self, cors: bool) -> Self {
        self.cors = cors;
        self
    }

    pub fn reload(&self) -> &LiveReload {
        &self.reload
    }

    /// Bind `addr` and serve in the background until `shutdown` fires.
    pub async fn start(self, addr: &str, shutdown: CancellationToken) -> Result<ServerHandle> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| Error::Server(format!("cannot bind {}: {}", addr, e)))?;
        let local_addr = listener.local_addr()?;
        klog!("Serving {} at http://{}", self.root.display(), local_addr);

        let task = tokio::spawn(self.accept_loop(listener, shutdown));
        Ok(ServerHandle { local_addr, task })
    }

    async fn accept_loop(self, listener: TcpListener, shutdown: CancellationToken) {
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                accepted = listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        let server = self.clone();
                        let shutdown = shutdown.clone();
                        tokio::spawn(async move {
                            if let Err(e) = server.handle_connection(stream, shutdown).await {
                                klog_debug!("Connection from {} ended: {}", peer, e);
                            }
                        });
                    }
                    Err(e) => klog_warn!("Accept failed: {}", e),
                },
            }
        }
        klog!("Dev server stopped");
    }

    async fn handle_connection(&self, mut stream: TcpStream, shutdown: CancellationToken) -> Result<()> {
        let (read_half, write_half) = stream.split();
        self.handle(read_half, write_half, shutdown).await
    }

    /// Serve one request read from `input`, writing the response to `output`.
    pub async fn handle<R, W>(&self, input: R, mut output: W, shutdown: CancellationToken) -> Result<()>
    where
        R: AsyncRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        let mut reader = BufReader::new(input);
        let request = match http::read_request(&mut reader).await {
            Ok(Some(request)) => request,
            Ok(None) => return Ok(()),
            Err(e) => {
                let response = self.finish(Response::text(400, "Bad Request"));
                output.write_all(&response.to_bytes(false)).await?;
                return Err(e);
            }
        };
        klog_debug!("{} {}", request.method, request.path);

        let response = match (request.method.as_str(), request.path.as_str()) {
            ("OPTIONS", _) => Response::new(204)
                .with_header("Access-Control-Allow-Methods", "GET, HEAD, POST, OPTIONS")
                .with_header("Access-Control-Allow-Headers", "*"),
            ("GET", EVENTS_PATH) => return self.stream_events(output, shutdown).await,
            ("GET" | "HEAD", CLIENT_PATH) => Response::new(200).with_body(
                CLIENT_SCRIPT.as_bytes().to_vec(),
                "application/javascript; charset=utf-8",
            ),
            ("POST", RELOAD_PATH) => {
                let sessions = self.reload.broadcast(ReloadMessage::Reload);
                klog!("Reload requested, {} sessions notified", sessions);
                let body = serde_json::json!({ "sessions": sessions }).to_string();
                Response::new(200).with_body(body.into_bytes(), "application/json")
            }
            ("GET" | "HEAD", path) => self.serve_file(path).await,
            _ => Response::text(405, "Method Not Allowed"),
        };

        let head_only = request.method == "HEAD";
        output.write_all(&self.finish(response).to_bytes(head_only)).await?;
        output.flush().await?;
        Ok(())
    }

    fn finish(&self, response: Response) -> Response {
        let response = response.with_header("Cache-Control", "no-store");
        if self.cors {
            response.with_header("Access-Control-Allow-Origin", "*")
        } else {
            response
        }
    }

    async fn serve_file(&self, url_path: &str) -> Response {
        let Some(mut path) = http::resolve_path(&self.root, url_path) else {
            return Response::text(403, "Forbidden");
        };
        if tokio::fs::metadata(&path).await.map(|m| m.is_dir()).unwrap_or(false) {
            path.push("index.html");
        }

        match tokio::fs::read(&path).await {
            Ok(bytes) => {
                let content_type = http::content_type(&path);
                let body = if content_type.starts_with("text/html") {
                    http::inject_client(&String::from_utf8_lossy(&bytes)).into_bytes()
                } else {
                    bytes
                };
                Response::new(200).with_body(body, content_type)
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Response::text(404, "Not Found"),
            Err(e) => {
                klog_warn!("Cannot read {}: {}", path.display(), e);
                Response::text(500, "Internal Server Error")
            }
        }
    }

    /// Hold an event stream open as one live session until the peer goes
    /// away or the server shuts down.
    async fn stream_events<W>(&self, mut output: W, shutdown: CancellationToken) -> Result<()>
    where
        W: AsyncWrite + Unpin,
    {
        output.write_all(&http::event_stream_head(self.cors)).await?;
        output.write_all(b": connected\n\n").await?;
        output.flush().await?;

        let (id, mut messages) = self.reload.connect();
        let mut keepalive = tokio::time::interval(KEEPALIVE_INTERVAL);
        keepalive.tick().await;

        let result = loop {
            let frame = tokio::select! {
                _ = shutdown.cancelled() => break Ok(()),
                message = messages.recv() => match message {
                    Some(message) => match serde_json::to_string(&message) {
                        Ok(json) => format!("data: {}\n\n", json),
                        Err(e) => break Err(Error::Json(e)),
                    },
                    None => break Ok(()),
                },
                _ = keepalive.tick() => ": keepalive\n\n".to_string(),
            };
            if let Err(e) = write_frame(&mut output, &frame).await {
                break Err(e);
            }
        };

        self.reload.disconnect(id);
        result
    }
}

async fn write_frame<W: AsyncWrite + Unpin>(output: &mut W, frame: &str) -> Result<()> {
    output.write_all(frame.as_bytes()).await?;
    output.flush().await?;
    Ok(())
}

/// Ask a running dev server at `addr` to reload its sessions.
///
/// Returns the number of sessions notified. A refused connection is
/// reported as [`Error::Server`].
pub async fn request_reload(addr: &str) -> Result<usize> {
    let url = format!("http://{}{}", addr, RELOAD_PATH);
    // The dev server is local; environment proxies must not intercept it.
    let client = Client::builder().no_proxy().build()?;
    let response = client.post(&url).send().await.map_err(|e| {
        if e.is_connect() {
            Error::Server(format!("no dev server at {}: {}", addr, e))
        } else {
            Error::Http(e)
        }
    })?;
    let reply: serde_json::Value = response.error_for_status()?.json().await?;
    Ok(reply["sessions"].as_u64().unwrap_or(0) as usize)
}
