//! [`FrontendHost`] – HTTP + WebSocket server for the Alcove console.
//!
//! * Regular HTTP requests → 200 OK with the embedded console HTML.
//! * WebSocket upgrades → bidirectional bridge: outbound kernel events are
//!   forwarded down to the browser as JSON, `{"op":"execute"}` frames coming
//!   up are submitted to the kernel's shell inbox.
//!
//! The server runs on its own thread with a current-thread runtime; the
//! accept loop wakes every few seconds even when idle so a stop request
//! never waits on traffic. On start the host writes a server-info file next
//! to the other runtime metadata (url, port, token) and removes it again on
//! stop.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use alcove_transport::TransportContext;
use alcove_types::{AlcoveError, Event, EventPayload, ExecuteRequest};
use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::oneshot;
use tokio_tungstenite::{accept_async, tungstenite::Message};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Default TCP port for the console server; `0` picks an ephemeral port.
pub const DEFAULT_PORT: u16 = 8877;

/// Idle wake interval of the accept loop.
const IDLE_WAKE: Duration = Duration::from_secs(5);

/// The compiled-in console single-page application.
const CONSOLE_HTML: &str = include_str!("console.html");

// ---------------------------------------------------------------------------
// FrontendHost
// ---------------------------------------------------------------------------

/// Owns the frontend event-loop thread. Start/stop lifecycle is independent
/// of any kernel; see the crate docs for the one shutdown-ordering caveat.
pub struct FrontendHost {
    transport: Arc<TransportContext>,
    port: u16,
    token: String,
    info_path: Option<PathBuf>,
    bound: Option<BoundServer>,
}

struct BoundServer {
    port: u16,
    shutdown: oneshot::Sender<()>,
    thread: std::thread::JoinHandle<()>,
}

impl FrontendHost {
    /// Create a host bridging `transport`, listening on the [`DEFAULT_PORT`].
    pub fn new(transport: Arc<TransportContext>) -> Self {
        Self {
            transport,
            port: DEFAULT_PORT,
            token: Uuid::new_v4().to_string(),
            info_path: None,
            bound: None,
        }
    }

    /// Override the listening port (builder-style). `0` = ephemeral.
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Write a server-info file at `path` while the server runs.
    pub fn with_info_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.info_path = Some(path.into());
        self
    }

    /// The configured (not necessarily bound) port.
    pub fn port(&self) -> u16 {
        self.port
    }

    /// The bound port once the server is running.
    pub fn bound_port(&self) -> Option<u16> {
        self.bound.as_ref().map(|b| b.port)
    }

    pub fn is_running(&self) -> bool {
        self.bound.is_some()
    }

    /// Console URL including the access token, once running.
    pub fn url_with_token(&self) -> Option<String> {
        self.bound
            .as_ref()
            .map(|b| format!("http://127.0.0.1:{}/?token={}", b.port, self.token))
    }

    /// Bind the listener and spawn the event-loop thread.
    ///
    /// # Errors
    ///
    /// [`AlcoveError::AlreadyRunning`] when called twice without `stop()`;
    /// [`AlcoveError::Startup`] when the port cannot be bound or the
    /// server-info file cannot be written.
    pub fn start(&mut self) -> Result<(), AlcoveError> {
        if self.bound.is_some() {
            return Err(AlcoveError::AlreadyRunning("frontend host".to_string()));
        }

        // Bind synchronously so a port conflict surfaces here, not on the
        // event-loop thread.
        let addr = SocketAddr::from(([127, 0, 0, 1], self.port));
        let listener = std::net::TcpListener::bind(addr)
            .map_err(|e| AlcoveError::Startup(format!("console bind on {addr}: {e}")))?;
        listener
            .set_nonblocking(true)
            .map_err(|e| AlcoveError::Startup(format!("console listener setup: {e}")))?;
        let port = listener
            .local_addr()
            .map_err(|e| AlcoveError::Startup(format!("console local addr: {e}")))?
            .port();

        if let Some(path) = &self.info_path {
            let info = serde_json::json!({
                "url": format!("http://127.0.0.1:{port}/?token={}", self.token),
                "port": port,
                "token": self.token,
            });
            std::fs::write(path, info.to_string()).map_err(|e| {
                AlcoveError::Startup(format!("server info file {}: {e}", path.display()))
            })?;
        }

        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let transport = Arc::clone(&self.transport);
        let thread = std::thread::Builder::new()
            .name("alcove-frontend".to_string())
            .spawn(move || {
                let runtime = match tokio::runtime::Builder::new_current_thread()
                    .enable_all()
                    .build()
                {
                    Ok(rt) => rt,
                    Err(e) => {
                        warn!(error = %e, "console runtime failed to build");
                        return;
                    }
                };
                runtime.block_on(accept_loop(listener, transport, shutdown_rx));
            })
            .map_err(|e| AlcoveError::Startup(format!("console thread: {e}")))?;

        info!(port, "console listening");
        let _ = self.transport.publish(Event::new(
            "alcove-frontend::server",
            EventPayload::ServerNotice(format!("console listening on port {port}")),
        ));

        self.bound = Some(BoundServer {
            port,
            shutdown: shutdown_tx,
            thread,
        });
        Ok(())
    }

    /// Stop the event-loop thread and remove the server-info file.
    ///
    /// Must not run concurrently with a kernel `cleanup()`; the caller
    /// serialises the two. Idempotent.
    pub fn stop(&mut self) {
        let Some(bound) = self.bound.take() else {
            return;
        };
        let _ = bound.shutdown.send(());
        if bound.thread.join().is_err() {
            warn!("console thread panicked during stop");
        }
        if let Some(path) = &self.info_path
            && path.exists()
            && let Err(e) = std::fs::remove_file(path)
        {
            warn!(path = %path.display(), error = %e, "could not remove server info file");
        }
        info!("console stopped");
    }
}

// ---------------------------------------------------------------------------
// Accept loop
// ---------------------------------------------------------------------------

async fn accept_loop(
    listener: std::net::TcpListener,
    transport: Arc<TransportContext>,
    mut shutdown: oneshot::Receiver<()>,
) {
    let listener = match TcpListener::from_std(listener) {
        Ok(l) => l,
        Err(e) => {
            warn!(error = %e, "console listener conversion failed");
            return;
        }
    };
    // Wakes the loop even when no client ever connects.
    let mut idle = tokio::time::interval(IDLE_WAKE);

    loop {
        tokio::select! {
            _ = &mut shutdown => break,
            _ = idle.tick() => {}
            accepted = listener.accept() => {
                match accepted {
                    Ok((stream, peer)) => {
                        let transport = Arc::clone(&transport);
                        tokio::spawn(async move {
                            if let Err(e) = handle_connection(stream, peer, transport).await {
                                debug!(%peer, error = %e, "console client error");
                            }
                        });
                    }
                    Err(e) => warn!(error = %e, "console accept error"),
                }
            }
        }
    }
    debug!("console accept loop exited");
}

// ---------------------------------------------------------------------------
// Per-connection handler
// ---------------------------------------------------------------------------

async fn handle_connection(
    stream: TcpStream,
    peer: SocketAddr,
    transport: Arc<TransportContext>,
) -> Result<(), AlcoveError> {
    // Peek at the request head to decide between a WebSocket upgrade and the
    // static console page; `peek` leaves the bytes for the WS handshaker.
    let mut buf = [0u8; 1024];
    let n = stream
        .peek(&mut buf)
        .await
        .map_err(|e| AlcoveError::Channel(format!("peek from {peer}: {e}")))?;

    let head = String::from_utf8_lossy(&buf[..n]);
    let is_ws_upgrade = head.lines().any(|line| {
        line.to_lowercase().starts_with("upgrade:") && line.to_lowercase().contains("websocket")
    });

    if is_ws_upgrade {
        handle_ws(stream, peer, transport).await
    } else {
        serve_html(stream).await
    }
}

async fn serve_html(mut stream: TcpStream) -> Result<(), AlcoveError> {
    let body = CONSOLE_HTML;
    let response = format!(
        "HTTP/1.1 200 OK\r\n\
         Content-Type: text/html; charset=utf-8\r\n\
         Content-Length: {}\r\n\
         Connection: close\r\n\
         \r\n\
         {}",
        body.len(),
        body
    );
    stream
        .write_all(response.as_bytes())
        .await
        .map_err(|e| AlcoveError::Channel(format!("HTTP write error: {e}")))
}

async fn handle_ws(
    stream: TcpStream,
    peer: SocketAddr,
    transport: Arc<TransportContext>,
) -> Result<(), AlcoveError> {
    let ws_stream = accept_async(stream)
        .await
        .map_err(|e| AlcoveError::Channel(format!("WS handshake from {peer}: {e}")))?;

    let (mut ws_tx, mut ws_rx) = ws_stream.split();
    let mut events = transport.subscribe();

    loop {
        tokio::select! {
            // ── Downstream: kernel events → browser ────────────────────────
            result = events.recv() => {
                match result {
                    Ok(event) => {
                        match serde_json::to_string(&event) {
                            Ok(json) => {
                                if ws_tx.send(Message::Text(json.into())).await.is_err() {
                                    break;
                                }
                            }
                            Err(e) => warn!(error = %e, "event serialization failed"),
                        }
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                        warn!(%peer, lagged_by = n, "console client lagged");
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                }
            }
            // ── Upstream: browser → kernel ─────────────────────────────────
            msg = ws_rx.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        handle_upstream_message(text.as_str(), &transport);
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Err(_)) => break,
                    _ => {}
                }
            }
        }
    }

    Ok(())
}

// ---------------------------------------------------------------------------
// Upstream message parser
// ---------------------------------------------------------------------------

/// Parse an incoming WebSocket text frame and act on it.
///
/// Recognised operations:
///
/// | `op` | Effect |
/// |---|---|
/// | `execute` | Submits `code` to the kernel's shell inbox |
///
/// Unknown frames are silently ignored.
pub(crate) fn handle_upstream_message(text: &str, transport: &Arc<TransportContext>) {
    let Ok(json) = serde_json::from_str::<Value>(text) else {
        return;
    };

    let op = json.get("op").and_then(|o| o.as_str()).unwrap_or("");
    if op == "execute" {
        if let Some(code) = json.get("code").and_then(|c| c.as_str()) {
            if transport.submit(ExecuteRequest::new(code)).is_err() {
                debug!("execute frame dropped; kernel inbox gone");
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
