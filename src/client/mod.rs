//! Initiator role: dial a listener and bridge the local console to that one
//! connection.
//!
//! A [`Session`] is the single-peer counterpart of the listener's hub: the
//! same bounded outbound queue and the same close handshake, but no
//! membership set, and the backpressure policy flips - with only one peer
//! there is nobody else to starve, so a full queue stalls local input instead
//! of evicting.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::Result;
use clap::Parser;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::io::AsyncWrite;
use tokio::net::TcpStream;
use tokio::sync::{Mutex, mpsc, watch};
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tracing::{error, info, warn};

use crate::WS_PATH;
use crate::console;
use crate::frame::{CLOSE_GRACE, FRAME_BUFFER, Frame, FrameMode};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about = "Dial a listener and bridge the local console to it"
)]
pub struct Args {
    /// Listener host to dial
    #[arg(long, default_value = "localhost")]
    pub host: String,

    /// Listener port to dial
    #[arg(short, long, default_value_t = 8080)]
    pub port: u16,

    /// Relay opaque binary chunks instead of text lines
    #[arg(short, long, default_value_t = false)]
    pub binary: bool,
}

/// One dialed connection and its close state.
///
/// Shared by the pump tasks and the interrupt handler through an `Arc`; the
/// closing flag collapses concurrent teardown attempts into one handshake.
pub struct Session {
    closing: AtomicBool,
    sink: Mutex<SplitSink<WsStream, Message>>,
    done: watch::Receiver<bool>,
}

impl Session {
    /// Splits the connection and starts its two pumps. Returns the session,
    /// the bounded outbound queue's sender, and the `done` signal that turns
    /// true once the inbound pump has exited.
    ///
    /// Received frames are written to `output` as they arrive.
    pub fn start<W>(
        ws: WsStream,
        queue_capacity: usize,
        output: W,
    ) -> (Arc<Session>, mpsc::Sender<Frame>, watch::Receiver<bool>)
    where
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let (sink, stream) = ws.split();
        let (done_tx, done_rx) = watch::channel(false);
        let (queue_tx, queue_rx) = mpsc::channel(queue_capacity);

        let session = Arc::new(Session {
            closing: AtomicBool::new(false),
            sink: Mutex::new(sink),
            done: done_rx.clone(),
        });

        tokio::spawn(write_pump(session.clone(), queue_rx));
        tokio::spawn(read_pump(stream, output, done_tx));

        (session, queue_tx, done_rx)
    }

    /// Notify the peer, wait up to [`CLOSE_GRACE`] for its acknowledgment
    /// (the inbound pump exiting), then hard-close the transport.
    ///
    /// Idempotent: concurrent callers after the first return immediately and
    /// never block on the wait.
    pub async fn close(&self) {
        if self.closing.swap(true, Ordering::SeqCst) {
            return;
        }

        {
            let mut sink = self.sink.lock().await;
            let frame = CloseFrame {
                code: CloseCode::Normal,
                reason: "".into(),
            };
            if let Err(e) = sink.send(Message::Close(Some(frame))).await {
                warn!("close notification failed: {e}");
            }
        }

        let mut done = self.done.clone();
        let _ = timeout(CLOSE_GRACE, done.wait_for(|exited| *exited)).await;

        let _ = self.sink.lock().await.close().await;
    }
}

/// Inbound pump: mirrors everything the peer sends onto the local output and
/// flips the `done` signal on exit.
async fn read_pump<W>(mut stream: SplitStream<WsStream>, mut output: W, done: watch::Sender<bool>)
where
    W: AsyncWrite + Unpin,
{
    loop {
        let frame = match stream.next().await {
            Some(Ok(Message::Binary(data))) => Frame::Binary(data.to_vec()),
            Some(Ok(Message::Text(text))) => Frame::Text(text.as_str().to_owned()),
            Some(Ok(Message::Close(_))) => break,
            Some(Ok(_)) => continue,
            Some(Err(e)) => {
                warn!("receive failed: {e}");
                break;
            }
            None => break,
        };
        if let Err(e) = console::write_frame(&mut output, &frame).await {
            error!("local output failed: {e}");
            break;
        }
    }
    let _ = done.send(true);
}

/// Outbound pump: drains the bounded queue into the transport. A send
/// failure only ends the pump; teardown is detected on the read side.
async fn write_pump(session: Arc<Session>, mut queue: mpsc::Receiver<Frame>) {
    while let Some(frame) = queue.recv().await {
        let mut sink = session.sink.lock().await;
        if let Err(e) = sink.send(frame.into()).await {
            warn!("send failed: {e}");
            break;
        }
    }
}

/// Dials the listener and runs until the connection reaches its terminal
/// state or an interrupt finishes the close sequence.
pub async fn run_client(args: Args) -> Result<()> {
    let mode = if args.binary { FrameMode::Binary } else { FrameMode::Text };
    let url = format!("ws://{}:{}{}", args.host, args.port, WS_PATH);

    info!("dialing {url}");
    let (ws, _) = connect_async(&url).await?;
    info!("connected to {url}");

    let (session, outbound, mut done) = Session::start(ws, FRAME_BUFFER, tokio::io::stdout());

    let input_session = session.clone();
    tokio::spawn(async move {
        match console::pump_input(mode, tokio::io::stdin(), tokio::io::stdout(), outbound).await {
            Ok(()) => info!("local input closed"),
            Err(e) => error!("local input failed: {e}"),
        }
        input_session.close().await;
    });

    tokio::select! {
        _ = done.wait_for(|exited| *exited) => {
            info!("connection closed by peer");
        }
        _ = tokio::signal::ctrl_c() => {
            info!("interrupt received, closing connection");
            session.close().await;
        }
    }

    // The stdin pump may still be parked on a blocking read; returning here
    // would leave the runtime shutdown waiting on it.
    std::process::exit(0);
}
