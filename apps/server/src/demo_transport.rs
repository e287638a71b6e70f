//! An in-process [`ClientTransport`] that stands in for the out-of-scope
//! network layer (spec.md §1): it feeds the dispatcher a scripted sequence
//! of control messages instead of reading a socket, and logs outgoing
//! events/frames instead of writing them to a wire. This is how the demo
//! binary exercises the full load → dispatch → playback path end to end.

use std::time::Duration;

use async_trait::async_trait;
use dispatch::{ClientTransport, EventMessage, RecvOutcome};
use ingest_core::ReplayError;

/// A fixed script of `(delay_before_send, raw JSON control message)` pairs,
/// replayed once each on `recv_raw`, then the transport reports `Closed` so
/// the dispatcher's playback loop runs for a bounded demo window before the
/// process exits.
pub struct ScriptedTransport {
    script: std::vec::IntoIter<String>,
    frames_seen: u64,
    max_frames: u64,
}

impl ScriptedTransport {
    pub fn new(script: Vec<String>, max_frames: u64) -> Self {
        Self {
            script: script.into_iter(),
            frames_seen: 0,
            max_frames,
        }
    }

    pub fn frames_seen(&self) -> u64 {
        self.frames_seen
    }
}

#[async_trait]
impl ClientTransport for ScriptedTransport {
    async fn recv_raw(&mut self, timeout: Duration) -> Result<Option<String>, RecvOutcome> {
        if self.frames_seen >= self.max_frames {
            return Err(RecvOutcome::Closed);
        }
        tokio::time::sleep(timeout).await;
        Ok(self.script.next())
    }

    async fn send_event(&mut self, event: &EventMessage) -> Result<(), ReplayError> {
        tracing::info!(event = %event.to_json(), "demo: event");
        Ok(())
    }

    async fn send_frame(&mut self, bytes: Vec<u8>) -> Result<(), ReplayError> {
        self.frames_seen += 1;
        if self.frames_seen % 50 == 0 {
            tracing::info!(
                frame_no = self.frames_seen,
                bytes = bytes.len(),
                "demo: frame sent"
            );
        }
        Ok(())
    }
}
