//! # wspipe - console-over-WebSocket relay
//!
//! wspipe pipes the process's standard input/output through persistent
//! WebSocket connections. A listener fans every unit of local input out to
//! all connected peers and merges whatever any peer sends back into one
//! output stream; an initiator dials a listener and bridges the local
//! console to that single connection.
//!
//! ## Quick Start
//!
//! ```bash
//! # One side accepts connections and broadcasts its stdin
//! wspipe listen -p 8080
//!
//! # Any number of other sides dial in
//! wspipe connect --host example.com -p 8080
//! ```
//!
//! Both ends must agree on the framing mode: line-oriented text by default,
//! or opaque 4 KiB chunks with `--binary`.
//!
//! ## Architecture
//!
//! - **[Hub](hub)**: single serializing task owning the set of live peer
//!   connections; fan-out never blocks on a slow peer, it evicts instead.
//! - **[Listener](listener)**: WebSocket accept loop, per-peer read/write
//!   pumps and the close handshake; also serves a static directory so a
//!   browser page can be a peer.
//! - **[Client](client)**: the single-connection session with the same
//!   close and backpressure contract.
//! - **[Console](console)**: the local I/O pump gluing stdin/stdout to
//!   either role.
//!
//! Delivery is best effort: frames queued to a connection that closes are
//! dropped, and a peer that cannot keep up is disconnected rather than
//! allowed to stall the rest.

pub mod client;
pub mod console;
pub mod frame;
pub mod hub;
pub mod listener;

/// The reserved path WebSocket peers dial; every other path serves static
/// files in the listener role.
pub const WS_PATH: &str = "/_pipe";
