//! Listener role: accept WebSocket peers, fan the local console out to all of
//! them, merge whatever they send back onto local output.
//!
//! Every accepted connection gets a [`Peer`] with two pumps. The read pump is
//! the sole detector of "peer is gone" on the receive side; it pushes
//! received frames onto the hub's merged stream. The write pump drains the
//! bounded outbound queue the hub fans out into. Either pump funnels teardown
//! through [`Peer::close`], which runs the notify / wait / hard-close
//! handshake exactly once no matter how many callers race into it.
//!
//! Non-WebSocket paths serve a static directory, so a page that dials the
//! relay endpoint can be hosted by the relay itself.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use anyhow::Result;
use axum::Router;
use axum::extract::ws::{CloseFrame, Message, Utf8Bytes, WebSocket, close_code};
use axum::extract::{State, WebSocketUpgrade};
use axum::response::Response;
use axum::routing::get;
use clap::Parser;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::{Mutex, mpsc, watch};
use tokio::time::timeout;
use tower_http::services::ServeDir;
use tracing::{debug, error, info, warn};

use crate::WS_PATH;
use crate::console;
use crate::frame::{CLOSE_GRACE, FRAME_BUFFER, Frame, FrameMode};
use crate::hub::HubHandle;

#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about = "Accept WebSocket peers and fan the local console out to all of them"
)]
pub struct Args {
    /// Host to bind the listener to
    #[arg(long, default_value = "0.0.0.0")]
    pub host: String,

    /// Port to bind the listener to
    #[arg(short, long, default_value_t = 8080)]
    pub port: u16,

    /// Relay opaque binary chunks instead of text lines
    #[arg(short, long, default_value_t = false)]
    pub binary: bool,

    /// Directory served over plain HTTP on non-WebSocket paths
    #[arg(long, default_value = ".")]
    pub serve_dir: PathBuf,
}

#[derive(Clone)]
struct ListenerState {
    hub: HubHandle,
    queue_capacity: usize,
}

/// One established connection to a remote peer.
///
/// Owned jointly by its two pump tasks through an `Arc`. The closing flag is
/// the only cross-task mutable state: its swap decides the single winner of
/// the close handshake.
struct Peer {
    id: u64,
    hub: HubHandle,
    closing: AtomicBool,
    sink: Mutex<SplitSink<WebSocket, Message>>,
    reader_done: watch::Receiver<bool>,
}

impl Peer {
    /// Tears the connection down: deregister from the hub (closing the
    /// outbound queue), notify the peer, wait up to [`CLOSE_GRACE`] for its
    /// acknowledgment, then hard-close the transport.
    ///
    /// Idempotent. Concurrent callers after the flag is set return
    /// immediately; only the winner runs the handshake and waits.
    async fn close(&self) {
        if self.closing.swap(true, Ordering::SeqCst) {
            return;
        }

        self.hub.unregister(self.id).await;

        {
            let mut sink = self.sink.lock().await;
            let frame = CloseFrame {
                code: close_code::NORMAL,
                reason: Utf8Bytes::from_static(""),
            };
            if let Err(e) = sink.send(Message::Close(Some(frame))).await {
                // Best effort: the connection is being torn down regardless.
                debug!(peer = self.id, "close notification failed: {e}");
            }
        }

        let mut done = self.reader_done.clone();
        let _ = timeout(CLOSE_GRACE, done.wait_for(|exited| *exited)).await;

        if let Err(e) = self.sink.lock().await.close().await {
            debug!(peer = self.id, "transport close failed: {e}");
        }
        info!(peer = self.id, "peer disconnected");
    }
}

static NEXT_PEER_ID: AtomicU64 = AtomicU64::new(1);

fn next_peer_id() -> u64 {
    NEXT_PEER_ID.fetch_add(1, Ordering::Relaxed)
}

/// Builds the listener router: the relay WebSocket endpoint plus a static
/// file fallback rooted at `serve_dir`.
pub fn app(hub: HubHandle, queue_capacity: usize, serve_dir: &Path) -> Router {
    let state = ListenerState { hub, queue_capacity };
    Router::new()
        .route(WS_PATH, get(handle_ws))
        .fallback_service(ServeDir::new(serve_dir))
        .with_state(state)
}

async fn handle_ws(State(state): State<ListenerState>, ws: WebSocketUpgrade) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: ListenerState) {
    let id = next_peer_id();
    let (sink, stream) = socket.split();
    let (done_tx, done_rx) = watch::channel(false);
    let (queue_tx, queue_rx) = mpsc::channel(state.queue_capacity);

    let peer = Arc::new(Peer {
        id,
        hub: state.hub.clone(),
        closing: AtomicBool::new(false),
        sink: Mutex::new(sink),
        reader_done: done_rx,
    });

    // Register before the pumps start so the first fan-out after the
    // handshake already sees this member.
    peer.hub.register(id, queue_tx).await;
    info!(peer = id, "peer connected");

    tokio::spawn(write_pump(peer.clone(), queue_rx));
    read_pump(peer, stream, done_tx).await;
}

/// Inbound pump: receives frames from the peer and pushes them onto the
/// merged stream. Any receive failure means "peer gone".
async fn read_pump(peer: Arc<Peer>, mut stream: SplitStream<WebSocket>, done: watch::Sender<bool>) {
    loop {
        let msg = match stream.next().await {
            Some(Ok(msg)) => msg,
            Some(Err(e)) => {
                debug!(peer = peer.id, "receive failed: {e}");
                break;
            }
            None => break,
        };
        let frame = match msg {
            Message::Binary(data) => Frame::Binary(data.to_vec()),
            Message::Text(text) => Frame::Text(text.as_str().to_owned()),
            Message::Close(_) => break,
            // Ping/pong are answered by the protocol layer.
            _ => continue,
        };
        if peer.hub.deliver(frame).await.is_err() {
            break;
        }
    }
    // Signal before closing so the handshake's wait sees the exit.
    let _ = done.send(true);
    peer.close().await;
}

/// Outbound pump: drains the bounded queue the hub fans out into. Exits when
/// the queue closes (unregistration or eviction); frames still queued at that
/// point are dropped, best-effort delivery at shutdown.
async fn write_pump(peer: Arc<Peer>, mut queue: mpsc::Receiver<Frame>) {
    while let Some(frame) = queue.recv().await {
        let mut sink = peer.sink.lock().await;
        if let Err(e) = sink.send(frame.into()).await {
            debug!(peer = peer.id, "send failed: {e}");
            break;
        }
    }
    peer.close().await;
}

/// Runs the listener until process termination.
pub async fn run_listener(args: Args) -> Result<()> {
    let mode = if args.binary { FrameMode::Binary } else { FrameMode::Text };
    let hub = HubHandle::spawn(tokio::io::stdout());

    // Fan-out driver: local input goes through the hub's serialized command
    // channel, never around it.
    let (input_tx, mut input_rx) = mpsc::channel(1);
    let fan_out = hub.clone();
    tokio::spawn(async move {
        while let Some(frame) = input_rx.recv().await {
            if fan_out.broadcast(frame).await.is_err() {
                break;
            }
        }
    });
    tokio::spawn(async move {
        match console::pump_input(mode, tokio::io::stdin(), tokio::io::stdout(), input_tx).await {
            Ok(()) => info!("local input closed"),
            Err(e) => error!("local input failed: {e}"),
        }
    });

    let app = app(hub, FRAME_BUFFER, &args.serve_dir);
    let addr = format!("{}:{}", args.host, args.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    info!(
        "listening on {addr} (relay on {WS_PATH}, serving {})",
        args.serve_dir.display()
    );

    if let Err(e) = axum::serve(listener, app).await {
        warn!("server error: {e:?}");
    }
    Ok(())
}
