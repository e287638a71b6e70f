//! The seam between the dispatcher's state machine and a real socket.
//!
//! Kept deliberately narrow (SPEC_FULL.md §1): a transport adapter owns
//! whatever network stack it wants (WebSocket, raw TCP, an in-process
//! channel for tests/demos) and exposes three duplex primitives. The
//! dispatcher never sees bytes on the wire, only [`ControlMessage`]s in and
//! `EventMessage`/encoded-frame bytes out.

use std::time::Duration;

use async_trait::async_trait;
use ingest_core::ReplayError;

use crate::protocol::EventMessage;

/// Distinguishes a clean disconnect from a transport-level error so the
/// dispatcher can log the former at `info` and unregister cleanly, without
/// the transport needing to decide that for itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecvOutcome {
    Closed,
}

#[async_trait]
pub trait ClientTransport: Send {
    /// Wait up to `timeout` for one raw control message. `Ok(None)` on a
    /// clean timeout (the common case, keeps the dispatch tick unstarved);
    /// `Err(RecvOutcome::Closed)` once the peer disconnects. Parsing and
    /// validating the text (spec.md §7 `ProtocolError` semantics) is the
    /// dispatcher's job, not the transport's.
    async fn recv_raw(&mut self, timeout: Duration) -> Result<Option<String>, RecvOutcome>;

    async fn send_event(&mut self, event: &EventMessage) -> Result<(), ReplayError>;

    async fn send_frame(&mut self, bytes: Vec<u8>) -> Result<(), ReplayError>;
}
