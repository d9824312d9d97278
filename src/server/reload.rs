//! Live reload session set.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::klog_debug;

/// Message pushed to connected browsers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ReloadMessage {
    /// Reload the whole page.
    Reload,
    /// Re-fetch the stylesheet at `path` (relative to the server root).
    Css { path: String },
}

/// Identifier of one connected browser.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionId(Uuid);

impl SessionId {
    fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

type Sessions = HashMap<SessionId, mpsc::UnboundedSender<ReloadMessage>>;

/// The set of live browser sessions.
///
/// Clones share the same set. Sessions are added by [`LiveReload::connect`],
/// removed by [`LiveReload::disconnect`] or pruned by
/// [`LiveReload::broadcast`] once their receiver is gone.
#[derive(Debug, Clone, Default)]
pub struct LiveReload {
    sessions: Arc<Mutex<Sessions>>,
}

impl LiveReload {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a session; messages arrive on the returned receiver.
    pub fn connect(&self) -> (SessionId, mpsc::UnboundedReceiver<ReloadMessage>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let id = SessionId::new();
        self.lock().insert(id, tx);
        klog_debug!("Live reload session {} connected", id);
        (id, rx)
    }

    pub fn disconnect(&self, id: SessionId) {
        if self.lock().remove(&id).is_some() {
            klog_debug!("Live reload session {} disconnected", id);
        }
    }

    /// Send `message` to every session. Returns how many received it.
    pub fn broadcast(&self, message: ReloadMessage) -> usize {
        let mut sessions = self.lock();
        sessions.retain(|id, tx| {
            let alive = tx.send(message.clone()).is_ok();
            if !alive {
                klog_debug!("Pruning closed session {}", id);
            }
            alive
        });
        sessions.len()
    }

    pub fn session_count(&self) -> usize {
        self.lock().len()
    }

    fn lock(&self) -> MutexGuard<'_, Sessions> {
        self.sessions.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Browser side of the reload channel, served at [`super::CLIENT_PATH`].
pub const CLIENT_SCRIPT: &str = r#"(function () {
  var source = new EventSource("/__kiln/events");
  source.onmessage = function (event) {
    var message = JSON.parse(event.data);
    if (message.type === "reload") {
      window.location.reload();
    } else if (message.type === "css") {
      var links = document.querySelectorAll('link[rel="stylesheet"]');
      for (var i = 0; i < links.length; i++) {
        var url = new URL(links[i].href);
        if (url.pathname.replace(/^\//, "") === message.path) {
          url.searchParams.set("kiln", Date.now());
          links[i].href = url.toString();
        }
      }
    }
  };
})();
"#;
