//! End-to-end listener tests: a real axum server on an ephemeral port driven
//! by real tokio-tungstenite peers, with a duplex stream standing in for the
//! local output.

use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::io::{AsyncBufReadExt, BufReader, DuplexStream, Lines};
use tokio::net::{TcpListener, TcpStream};
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};

use wspipe::WS_PATH;
use wspipe::frame::Frame;
use wspipe::hub::HubHandle;
use wspipe::listener::app;

type Ws = WebSocketStream<MaybeTlsStream<TcpStream>>;
type Output = Lines<BufReader<DuplexStream>>;

const WAIT: Duration = Duration::from_secs(5);

async fn start_listener() -> (SocketAddr, HubHandle, Output) {
    let (reader, writer) = tokio::io::duplex(64 * 1024);
    let hub = HubHandle::spawn(writer);
    let router = app(hub.clone(), 64, Path::new("."));

    let tcp = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = tcp.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(tcp, router).await.unwrap();
    });

    (addr, hub, BufReader::new(reader).lines())
}

/// Connects a peer and waits until the hub demonstrably has it registered:
/// a probe line delivered to the merged output can only have been pushed by
/// the peer's read pump, which starts after registration.
async fn join(addr: SocketAddr, tag: &str, output: &mut Output) -> Ws {
    let (mut ws, _) = connect_async(format!("ws://{addr}{WS_PATH}")).await.unwrap();
    let probe = format!("join {tag}");
    ws.send(Message::Text(probe.clone().into())).await.unwrap();
    loop {
        let line = timeout(WAIT, output.next_line())
            .await
            .expect("no merged output")
            .unwrap()
            .expect("local output closed");
        if line == probe {
            return ws;
        }
    }
}

async fn expect_text(ws: &mut Ws) -> String {
    loop {
        let msg = timeout(WAIT, ws.next())
            .await
            .expect("no frame from listener")
            .expect("connection ended")
            .expect("websocket error");
        match msg {
            Message::Text(text) => return text.as_str().to_owned(),
            Message::Ping(_) | Message::Pong(_) => continue,
            other => panic!("unexpected message: {other:?}"),
        }
    }
}

#[tokio::test]
async fn fan_out_reaches_every_peer_in_order() {
    let (addr, hub, mut output) = start_listener().await;
    let mut p1 = join(addr, "p1", &mut output).await;
    let mut p2 = join(addr, "p2", &mut output).await;

    assert!(hub.broadcast(Frame::Text("a".into())).await.is_ok());
    assert!(hub.broadcast(Frame::Text("b".into())).await.is_ok());

    assert_eq!(expect_text(&mut p1).await, "a");
    assert_eq!(expect_text(&mut p1).await, "b");
    assert_eq!(expect_text(&mut p2).await, "a");
    assert_eq!(expect_text(&mut p2).await, "b");
}

#[tokio::test]
async fn late_joiner_only_sees_later_frames() {
    let (addr, hub, mut output) = start_listener().await;
    let mut p1 = join(addr, "p1", &mut output).await;

    assert!(hub.broadcast(Frame::Text("early".into())).await.is_ok());
    assert_eq!(expect_text(&mut p1).await, "early");

    let mut p2 = join(addr, "p2", &mut output).await;
    assert!(hub.broadcast(Frame::Text("late".into())).await.is_ok());

    assert_eq!(expect_text(&mut p1).await, "late");
    assert_eq!(expect_text(&mut p2).await, "late");
}

#[tokio::test]
async fn peer_frames_merge_onto_local_output() {
    let (addr, _hub, mut output) = start_listener().await;
    let mut p1 = join(addr, "p1", &mut output).await;
    let _p2 = join(addr, "p2", &mut output).await;

    // Per-connection FIFO: p1's lines arrive in the order sent.
    p1.send(Message::Text("one".into())).await.unwrap();
    p1.send(Message::Text("two".into())).await.unwrap();

    let first = timeout(WAIT, output.next_line()).await.unwrap().unwrap();
    let second = timeout(WAIT, output.next_line()).await.unwrap().unwrap();
    assert_eq!(first.as_deref(), Some("one"));
    assert_eq!(second.as_deref(), Some("two"));
}

#[tokio::test]
async fn listener_answers_peer_close_and_keeps_serving() {
    let (addr, hub, mut output) = start_listener().await;
    let mut leaving = join(addr, "leaving", &mut output).await;
    let mut staying = join(addr, "staying", &mut output).await;

    leaving.send(Message::Close(None)).await.unwrap();

    // The close handshake answers with a close frame, then the stream ends.
    let mut saw_close = false;
    while let Some(msg) = timeout(WAIT, leaving.next()).await.expect("close handshake hung") {
        match msg {
            Ok(Message::Close(_)) => saw_close = true,
            Ok(_) => {}
            Err(_) => break,
        }
    }
    assert!(saw_close, "no close acknowledgment from listener");

    // The remaining peer is unaffected.
    assert!(hub.broadcast(Frame::Text("still here".into())).await.is_ok());
    assert_eq!(expect_text(&mut staying).await, "still here");
}

#[tokio::test]
async fn binary_frames_pass_through_untouched() {
    let (addr, hub, mut output) = start_listener().await;
    let mut p1 = join(addr, "p1", &mut output).await;

    let payload = vec![0u8, 159, 146, 150]; // not valid UTF-8
    assert!(hub.broadcast(Frame::Binary(payload.clone())).await.is_ok());

    let msg = timeout(WAIT, p1.next()).await.unwrap().unwrap().unwrap();
    match msg {
        Message::Binary(bytes) => assert_eq!(&bytes[..], &payload[..]),
        other => panic!("unexpected message: {other:?}"),
    }
}
