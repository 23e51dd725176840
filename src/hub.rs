//! Broadcast hub: the listener-role core that owns the set of live peer
//! connections.
//!
//! The membership map is owned by a single serializing task. Registration,
//! deregistration and fan-out all travel over one command channel, so a
//! membership change can never interleave with a fan-out: a frame is either
//! queued to a member or that member was already gone, never half of each.
//! Frames received from any peer arrive on a separate merged channel and are
//! written to the local output stream in arrival order.
//!
//! Fan-out never blocks. A member whose outbound queue is full is treated
//! exactly like one that disconnected: it is dropped from membership and its
//! queue is closed, letting its write pump run the close handshake. Liveness
//! for fast peers wins over delivery to slow ones.

use std::collections::HashMap;

use tokio::io::AsyncWrite;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tracing::{debug, error, warn};

use crate::console::write_frame;
use crate::frame::{FRAME_BUFFER, Frame};

/// Membership and fan-out messages, processed one at a time by the hub task.
pub enum HubCommand {
    Register { id: u64, sender: mpsc::Sender<Frame> },
    Unregister { id: u64 },
    Broadcast(Frame),
}

/// Cloneable handle to a running hub task.
///
/// Peer read pumps use [`deliver`](HubHandle::deliver) to push received
/// frames onto the merged stream; the local input pump drives fan-out through
/// [`broadcast`](HubHandle::broadcast).
#[derive(Clone)]
pub struct HubHandle {
    cmd_tx: mpsc::Sender<HubCommand>,
    merged_tx: mpsc::Sender<Frame>,
}

impl HubHandle {
    /// Spawns the serializing hub task. `output` is the local output stream
    /// that merged inbound frames are written to.
    pub fn spawn<W>(output: W) -> Self
    where
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let (cmd_tx, cmd_rx) = mpsc::channel(64);
        let (merged_tx, merged_rx) = mpsc::channel(FRAME_BUFFER);
        tokio::spawn(run_hub(cmd_rx, merged_rx, output));
        HubHandle { cmd_tx, merged_tx }
    }

    /// Adds a connection to the membership set. Idempotent; a second
    /// registration under the same id is ignored.
    pub async fn register(&self, id: u64, sender: mpsc::Sender<Frame>) {
        let _ = self.cmd_tx.send(HubCommand::Register { id, sender }).await;
    }

    /// Removes a connection and closes its outbound queue. Safe to call for
    /// ids that were never registered or were already removed.
    pub async fn unregister(&self, id: u64) {
        let _ = self.cmd_tx.send(HubCommand::Unregister { id }).await;
    }

    /// Fans one frame out to every current member. Errors only when the hub
    /// task itself is gone.
    pub async fn broadcast(&self, frame: Frame) -> Result<(), mpsc::error::SendError<HubCommand>> {
        self.cmd_tx.send(HubCommand::Broadcast(frame)).await
    }

    /// Pushes one received frame onto the merged inbound stream. Awaits when
    /// the stream is full: a stalled consumer of merged input stalls all
    /// peers equally rather than dropping data.
    pub async fn deliver(&self, frame: Frame) -> Result<(), mpsc::error::SendError<Frame>> {
        self.merged_tx.send(frame).await
    }
}

async fn run_hub<W>(
    mut cmd_rx: mpsc::Receiver<HubCommand>,
    mut merged_rx: mpsc::Receiver<Frame>,
    mut output: W,
) where
    W: AsyncWrite + Unpin,
{
    let mut members: HashMap<u64, mpsc::Sender<Frame>> = HashMap::new();

    loop {
        tokio::select! {
            cmd = cmd_rx.recv() => {
                let Some(cmd) = cmd else { break };
                match cmd {
                    HubCommand::Register { id, sender } => {
                        members.entry(id).or_insert(sender);
                        debug!(peer = id, members = members.len(), "peer registered");
                    }
                    HubCommand::Unregister { id } => {
                        // Dropping the sender closes the outbound queue and
                        // lets the peer's write pump exit.
                        if members.remove(&id).is_some() {
                            debug!(peer = id, members = members.len(), "peer unregistered");
                        }
                    }
                    HubCommand::Broadcast(frame) => {
                        let mut dropped = Vec::new();
                        for (id, sender) in &members {
                            match sender.try_send(frame.clone()) {
                                Ok(()) => {}
                                Err(TrySendError::Full(_)) => {
                                    warn!(peer = *id, "outbound queue full, evicting slow peer");
                                    dropped.push(*id);
                                }
                                Err(TrySendError::Closed(_)) => dropped.push(*id),
                            }
                        }
                        for id in dropped {
                            members.remove(&id);
                        }
                    }
                }
            }
            frame = merged_rx.recv() => {
                let Some(frame) = frame else { break };
                if let Err(e) = write_frame(&mut output, &frame).await {
                    error!("local output failed: {e}");
                    break;
                }
            }
        }
    }
}
