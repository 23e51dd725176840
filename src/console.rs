//! Local I/O pump: the bridge between the process's console streams and the
//! relay core.
//!
//! Input is consumed as discrete units - one line per frame in text mode, one
//! chunk of at most [`FRAME_BUFFER`] bytes in binary mode. Each unit is
//! mirrored to the local output first, then forwarded as a [`Frame`] into the
//! channel the caller wired up (the hub's fan-out driver or the session's
//! outbound queue). Forwarding applies backpressure: the send awaits until
//! the channel has room or the receiving side is gone.

use anyhow::Result;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::mpsc;

use crate::frame::{FRAME_BUFFER, Frame, FrameMode};

/// Reads the local input stream until EOF or error, mirroring every unit to
/// `mirror` and forwarding it on `forward`.
///
/// Returns `Ok(())` on clean EOF or when the forward channel closes (the
/// relay is shutting down and no longer accepts frames); returns the error
/// when the local stream itself fails.
pub async fn pump_input<R, W>(
    mode: FrameMode,
    input: R,
    mut mirror: W,
    forward: mpsc::Sender<Frame>,
) -> Result<()>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    match mode {
        FrameMode::Text => {
            let mut lines = BufReader::new(input).lines();
            while let Some(line) = lines.next_line().await? {
                mirror.write_all(line.as_bytes()).await?;
                mirror.write_all(b"\n").await?;
                mirror.flush().await?;
                // Owned copy: the frame must not alias a buffer this pump
                // reuses before the peer send happens.
                if forward.send(Frame::Text(line)).await.is_err() {
                    break;
                }
            }
        }
        FrameMode::Binary => {
            let mut input = BufReader::new(input);
            let mut buf = vec![0u8; FRAME_BUFFER];
            loop {
                let n = input.read(&mut buf).await?;
                if n == 0 {
                    break;
                }
                mirror.write_all(&buf[..n]).await?;
                mirror.flush().await?;
                if forward.send(Frame::Binary(buf[..n].to_vec())).await.is_err() {
                    break;
                }
            }
        }
    }
    Ok(())
}

/// Writes one received frame to the local output stream: binary frames as raw
/// bytes, text frames as one line.
pub async fn write_frame<W>(out: &mut W, frame: &Frame) -> std::io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    match frame {
        Frame::Binary(bytes) => out.write_all(bytes).await?,
        Frame::Text(line) => {
            out.write_all(line.as_bytes()).await?;
            out.write_all(b"\n").await?;
        }
    }
    out.flush().await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn text_mode_mirrors_and_forwards_lines() {
        let (tx, mut rx) = mpsc::channel(8);
        let mut mirror = Vec::new();

        pump_input(FrameMode::Text, &b"a\nb\n"[..], &mut mirror, tx)
            .await
            .unwrap();

        assert_eq!(mirror, b"a\nb\n");
        assert_eq!(rx.recv().await, Some(Frame::Text("a".into())));
        assert_eq!(rx.recv().await, Some(Frame::Text("b".into())));
        assert_eq!(rx.recv().await, None);
    }

    #[tokio::test]
    async fn binary_mode_forwards_chunks() {
        let (tx, mut rx) = mpsc::channel(8);
        let mut mirror = Vec::new();
        let data = vec![7u8; 100];

        pump_input(FrameMode::Binary, &data[..], &mut mirror, tx)
            .await
            .unwrap();

        assert_eq!(mirror, data);
        assert_eq!(rx.recv().await, Some(Frame::Binary(data)));
        assert_eq!(rx.recv().await, None);
    }

    #[tokio::test]
    async fn binary_mode_splits_oversized_input() {
        let (tx, mut rx) = mpsc::channel(8);
        let data = vec![1u8; FRAME_BUFFER + 1];

        pump_input(FrameMode::Binary, &data[..], Vec::new(), tx)
            .await
            .unwrap();

        let mut received = Vec::new();
        while let Some(frame) = rx.recv().await {
            received.extend_from_slice(frame.payload());
        }
        assert_eq!(received, data);
    }

    #[tokio::test]
    async fn pump_stops_when_forward_channel_closes() {
        let (tx, rx) = mpsc::channel(1);
        drop(rx);

        let result = pump_input(FrameMode::Text, &b"a\nb\n"[..], Vec::new(), tx).await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn write_frame_renders_text_as_line() {
        let mut out = Vec::new();
        write_frame(&mut out, &Frame::Text("hello".into()))
            .await
            .unwrap();
        write_frame(&mut out, &Frame::Binary(vec![0x01]))
            .await
            .unwrap();
        assert_eq!(out, b"hello\n\x01");
    }
}
