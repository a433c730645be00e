//! Notify Server
//!
//! Accepts override payloads on a Unix socket and routes them to notifiable
//! widgets through the shared [`NotifyRegistry`]. The protocol is one JSON
//! object per line in each direction:
//!
//! ```text
//!   client ─► {"widget": "alerts", "payload": {"text": "Door open", "duration": 10}}
//!   server ─► {"ok": true}
//!
//!   client ─► {"widget": "nope", "payload": {}}
//!   server ─► {"ok": false, "error": "widget not found: nope"}
//! ```
//!
//! Delivery only enqueues; the render thread picks the payload up on its next
//! tick.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{UnixListener, UnixStream};
use tracing::{debug, error, info, warn, Instrument};

use grydgets_core::NotifyRegistry;

/// Longest request line accepted
pub const MAX_REQUEST_BYTES: usize = 64 * 1024;

/// How often the accept loop checks the shutdown flag
const ACCEPT_POLL: Duration = Duration::from_millis(100);

/// One inbound line
#[derive(Debug, Clone, Deserialize)]
pub struct NotifyRequest {
    /// Target widget name
    pub widget: String,
    /// Override payload
    pub payload: Value,
}

/// One outbound line
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NotifyResponse {
    /// Whether the payload was queued
    pub ok: bool,
    /// Why it was not
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl NotifyResponse {
    fn accepted() -> Self {
        Self { ok: true, error: None }
    }

    fn rejected(error: impl Into<String>) -> Self {
        Self {
            ok: false,
            error: Some(error.into()),
        }
    }
}

/// Parse one request line and deliver it
pub fn handle_line(registry: &NotifyRegistry, line: &str) -> NotifyResponse {
    if line.len() > MAX_REQUEST_BYTES {
        return NotifyResponse::rejected(format!("request larger than {MAX_REQUEST_BYTES} bytes"));
    }
    let request: NotifyRequest = match serde_json::from_str(line) {
        Ok(request) => request,
        Err(e) => return NotifyResponse::rejected(format!("malformed request: {e}")),
    };
    match registry.notify(&request.widget, request.payload) {
        Ok(()) => {
            debug!(widget = %request.widget, "Notification queued");
            NotifyResponse::accepted()
        }
        Err(e) => {
            debug!(widget = %request.widget, error = %e, "Notification rejected");
            NotifyResponse::rejected(e.to_string())
        }
    }
}

/// Unix-socket front end of a [`NotifyRegistry`]
#[derive(Debug)]
pub struct NotifyServer {
    socket_path: PathBuf,
    registry: NotifyRegistry,
}

impl NotifyServer {
    /// Server for `registry` on `socket_path`
    pub fn new(socket_path: PathBuf, registry: NotifyRegistry) -> Self {
        Self { socket_path, registry }
    }

    /// Socket this server binds
    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }

    /// Create the parent directory and remove a stale socket
    fn prepare_socket(&self) -> Result<()> {
        if let Some(parent) = self.socket_path.parent() {
            if !parent.exists() {
                fs::create_dir_all(parent)
                    .with_context(|| format!("Failed to create socket directory: {parent:?}"))?;
                info!(path = ?parent, "Created socket directory");
            }
        }
        if self.socket_path.exists() {
            warn!(path = ?self.socket_path, "Removing stale socket file");
            fs::remove_file(&self.socket_path)
                .with_context(|| format!("Failed to remove stale socket: {:?}", self.socket_path))?;
        }
        Ok(())
    }

    /// Bind the socket
    pub fn bind(&self) -> Result<UnixListener> {
        self.prepare_socket()?;
        let listener = UnixListener::bind(&self.socket_path)
            .with_context(|| format!("Failed to bind to {:?}", self.socket_path))?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(&self.socket_path, fs::Permissions::from_mode(0o600))?;
        }

        info!(path = ?self.socket_path, "Listening for notifications");
        Ok(listener)
    }

    /// Accept connections until `shutdown` is set, then remove the socket
    pub async fn run(&self, listener: UnixListener, shutdown: Arc<AtomicBool>) -> Result<()> {
        let mut next_id = 0u64;
        while !shutdown.load(Ordering::SeqCst) {
            let stream = match tokio::time::timeout(ACCEPT_POLL, listener.accept()).await {
                Ok(Ok((stream, _addr))) => stream,
                Ok(Err(e)) => {
                    error!(error = %e, "Accept failed");
                    continue;
                }
                Err(_) => continue,
            };
            next_id += 1;
            let registry = self.registry.clone();
            tokio::spawn(
                handle_connection(stream, registry).instrument(tracing::info_span!("connection", id = next_id)),
            );
        }

        info!("Notify server stopping");
        if self.socket_path.exists() {
            fs::remove_file(&self.socket_path)
                .with_context(|| format!("Failed to remove socket: {:?}", self.socket_path))?;
        }
        Ok(())
    }
}

async fn handle_connection(stream: UnixStream, registry: NotifyRegistry) {
    debug!("Client connected");
    let (read_half, mut write_half) = stream.into_split();
    let mut lines = BufReader::new(read_half).lines();

    loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => break,
            Err(e) => {
                warn!(error = %e, "Read error");
                break;
            }
        };
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        let response = handle_line(&registry, line);
        let mut encoded = match serde_json::to_vec(&response) {
            Ok(encoded) => encoded,
            Err(e) => {
                error!(error = %e, "Failed to encode response");
                break;
            }
        };
        encoded.push(b'\n');
        if let Err(e) = write_half.write_all(&encoded).await {
            warn!(error = %e, "Write error");
            break;
        }
    }
    debug!("Client disconnected");
}

#[cfg(test)]
mod tests {
    use super::*;
    use grydgets_core::node::{Inbox, NotifyHandle, TextPayload};
    use serde_json::json;

    fn registry_with(name: &str) -> (NotifyRegistry, Arc<Inbox<TextPayload>>) {
        let registry = NotifyRegistry::new();
        let inbox = Arc::new(Inbox::<TextPayload>::new(name));
        registry.register(name, Arc::clone(&inbox) as NotifyHandle);
        (registry, inbox)
    }

    #[test]
    fn test_handle_line_delivers() {
        let (registry, inbox) = registry_with("alerts");

        let response = handle_line(&registry, r#"{"widget": "alerts", "payload": {"text": "hi"}}"#);

        assert_eq!(response, NotifyResponse::accepted());
        assert_eq!(inbox.pop().map(|p| p.text), Some("hi".to_string()));
    }

    #[test]
    fn test_handle_line_errors() {
        let (registry, inbox) = registry_with("alerts");

        let unknown = handle_line(&registry, r#"{"widget": "nope", "payload": {}}"#);
        assert!(!unknown.ok);
        assert!(unknown.error.unwrap().contains("nope"));

        let malformed = handle_line(&registry, "not json");
        assert!(malformed.error.unwrap().starts_with("malformed request"));

        let bad_payload = handle_line(&registry, r#"{"widget": "alerts", "payload": {"duration": 3}}"#);
        assert!(!bad_payload.ok);
        assert!(inbox.is_empty());
    }

    #[test]
    fn test_response_encoding() {
        assert_eq!(serde_json::to_value(NotifyResponse::accepted()).unwrap(), json!({"ok": true}));
        assert_eq!(
            serde_json::to_value(NotifyResponse::rejected("boom")).unwrap(),
            json!({"ok": false, "error": "boom"})
        );
    }

    #[tokio::test]
    async fn test_socket_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let (registry, inbox) = registry_with("alerts");
        let server = NotifyServer::new(dir.path().join("sub").join("notify.sock"), registry);
        let listener = server.bind().unwrap();
        let shutdown = Arc::new(AtomicBool::new(false));

        let path = server.socket_path().to_path_buf();
        let stop = Arc::clone(&shutdown);
        let task = tokio::spawn(async move { server.run(listener, stop).await });

        let stream = UnixStream::connect(&path).await.unwrap();
        let (read_half, mut write_half) = stream.into_split();
        let mut replies = BufReader::new(read_half).lines();

        write_half
            .write_all(b"{\"widget\": \"alerts\", \"payload\": {\"text\": \"door\"}}\n\n{\"widget\": \"x\", \"payload\": {}}\n")
            .await
            .unwrap();

        let first: Value = serde_json::from_str(&replies.next_line().await.unwrap().unwrap()).unwrap();
        let second: Value = serde_json::from_str(&replies.next_line().await.unwrap().unwrap()).unwrap();
        assert_eq!(first, json!({"ok": true}));
        assert_eq!(second["ok"], json!(false));
        assert_eq!(inbox.len(), 1);

        shutdown.store(true, Ordering::SeqCst);
        task.await.unwrap().unwrap();
        assert!(!path.exists());
    }
}
