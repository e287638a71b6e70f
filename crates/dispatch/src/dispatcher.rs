//! Client Dispatcher: one instance per connected client (spec.md §4.5).
//!
//! Two phases. First, the load-wait/late-joiner phase mirrors
//! `handle_replay_websocket` in the original implementation
//! (`original_source/backend/app/websocket.py`): send an initial progress
//! snapshot, then either catch up immediately (session already loaded) or
//! subscribe to progress fan-out and wait, bounded at 300s. Second, the 60Hz
//! playback loop: a control read bounded at 10ms so it never starves frame
//! dispatch, then pacing per spec.md §4.5's exact formula.

use std::sync::Arc;
use std::time::Duration;

use ingest_core::ReplayError;
use model::{Session, SessionMetadata};
use store::{LoadState, SessionEntry};
use tokio::sync::mpsc;
use tokio::time::Instant;

use crate::protocol::{parse_control_message, ControlMessage, EventMessage};
use crate::transport::{ClientTransport, RecvOutcome};

const TICK_HZ: f64 = 60.0;
const SOURCE_RATE_HZ: f64 = 25.0;
const CONTROL_READ_BUDGET: Duration = Duration::from_millis(10);
const PROGRESS_FANOUT_PERIOD: Duration = Duration::from_millis(500);
const LOAD_WAIT_TIMEOUT: Duration = Duration::from_secs(300);

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DispatcherConfig {
    pub tick_hz: f64,
    pub source_rate_hz: f64,
    pub control_read_budget: Duration,
    pub load_wait_timeout: Duration,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            tick_hz: TICK_HZ,
            source_rate_hz: SOURCE_RATE_HZ,
            control_read_budget: CONTROL_READ_BUDGET,
            load_wait_timeout: LOAD_WAIT_TIMEOUT,
        }
    }
}

/// Playback state for one client (spec.md §4.5). `frame_index` is
/// fractional so speed changes accumulate sub-frame precision instead of
/// rounding away a slow-motion request.
#[derive(Debug, Clone, Copy, PartialEq)]
struct PlaybackState {
    frame_index: f64,
    playback_speed: f64,
    is_playing: bool,
    last_frame_sent: i64,
}

impl PlaybackState {
    fn new() -> Self {
        Self {
            frame_index: 0.0,
            playback_speed: 1.0,
            is_playing: false,
            last_frame_sent: -1,
        }
    }

    fn apply(&mut self, message: ControlMessage) {
        match message {
            ControlMessage::Play { speed } => {
                self.is_playing = true;
                self.playback_speed = speed;
            }
            ControlMessage::Pause => self.is_playing = false,
            ControlMessage::Seek { frame } => {
                self.frame_index = frame as f64;
                self.last_frame_sent = -1;
            }
        }
    }

    /// Advance one tick and report which frame (if any) should be sent.
    /// `len` is the total frame count; once `frame_index` reaches it
    /// playback clamps to the final index and pauses, per spec.md §4.5.
    fn tick(&mut self, config: &DispatcherConfig, len: usize) -> Option<usize> {
        if self.is_playing {
            self.frame_index +=
                self.playback_speed * (1.0 / config.tick_hz) * config.source_rate_hz;
        }

        if len == 0 {
            return None;
        }

        if self.frame_index >= len as f64 {
            self.frame_index = (len - 1) as f64;
            self.is_playing = false;
        }

        let current = self.frame_index.floor() as i64;
        if current != self.last_frame_sent && current >= 0 && (current as usize) < len {
            self.last_frame_sent = current;
            Some(current as usize)
        } else {
            None
        }
    }
}

/// Outcome of the load-wait phase, with the data to hand off to playback.
enum LoadOutcome {
    Ready,
    Failed,
    Disconnected,
}

pub struct ClientDispatcher<T: ClientTransport> {
    entry: Arc<SessionEntry>,
    transport: T,
    config: DispatcherConfig,
}

impl<T: ClientTransport> ClientDispatcher<T> {
    pub fn new(entry: Arc<SessionEntry>, transport: T) -> Self {
        Self::with_config(entry, transport, DispatcherConfig::default())
    }

    pub fn with_config(entry: Arc<SessionEntry>, transport: T, config: DispatcherConfig) -> Self {
        Self {
            entry,
            transport,
            config,
        }
    }

    /// Drive this client end to end: load-wait / late-joiner catch-up, then
    /// the 60Hz playback loop until either side disconnects. Errors
    /// returned here are transport failures surfaced for logging; protocol
    /// and cache errors are already handled internally per spec.md §7.
    pub async fn run(mut self) -> Result<(), ReplayError> {
        match self.wait_for_load().await {
            LoadOutcome::Ready => {}
            LoadOutcome::Failed | LoadOutcome::Disconnected => return Ok(()),
        }
        self.playback_loop().await
    }

    async fn wait_for_load(&mut self) -> LoadOutcome {
        let session = self.entry.session.clone();

        if self.send_progress_snapshot(&session).await.is_err() {
            return LoadOutcome::Disconnected;
        }

        if session.is_loaded() {
            return self.emit_terminal_state(&session, 0.0).await;
        }

        let (tx, mut rx) = mpsc::unbounded_channel::<(LoadState, u8, String)>();
        let callback_id = self.entry.register_progress_callback(Box::new(move |state, progress, message| {
            let _ = tx.send((state, progress, message));
        }));

        let start = Instant::now();
        let outcome = loop {
            if session.is_loaded() {
                break self.emit_terminal_state(&session, start.elapsed().as_secs_f64()).await;
            }
            if start.elapsed() >= self.config.load_wait_timeout {
                let _ = self
                    .transport
                    .send_event(&EventMessage::LoadingError {
                        message: format!(
                            "session load timeout after {:.0}s",
                            start.elapsed().as_secs_f64()
                        ),
                    })
                    .await;
                break LoadOutcome::Failed;
            }

            match tokio::time::timeout(PROGRESS_FANOUT_PERIOD, rx.recv()).await {
                Ok(Some((_state, progress, message))) => {
                    if self
                        .transport
                        .send_event(&EventMessage::LoadingProgress {
                            progress,
                            message,
                            elapsed_seconds: start.elapsed().as_secs(),
                        })
                        .await
                        .is_err()
                    {
                        break LoadOutcome::Disconnected;
                    }
                }
                Ok(None) => {
                    // sender side dropped without a final notify; fall through
                    // to re-check `is_loaded` on the next loop iteration.
                }
                Err(_elapsed) => {
                    // no progress update this period; still bounded by the
                    // overall load-wait timeout checked above.
                }
            }
        };

        self.entry.unregister_progress_callback(callback_id);
        outcome
    }

    async fn send_progress_snapshot(&mut self, session: &Session) -> Result<(), ReplayError> {
        self.transport
            .send_event(&EventMessage::LoadingProgress {
                progress: session.progress(),
                message: session.loading_status(),
                elapsed_seconds: 0,
            })
            .await
    }

    /// Session has just transitioned (or already was) `is_loaded`. Emit
    /// either `LoadingComplete` or `LoadingError`, whichever spec.md §7
    /// guarantees is exactly one per failed/successful load.
    async fn emit_terminal_state(&mut self, session: &Session, load_time_seconds: f64) -> LoadOutcome {
        if let Some(error) = session.load_error() {
            let _ = self
                .transport
                .send_event(&EventMessage::LoadingError { message: error })
                .await;
            return LoadOutcome::Failed;
        }

        let Some(data) = session.data() else {
            let _ = self
                .transport
                .send_event(&EventMessage::LoadingError {
                    message: "session reported loaded with no data and no error".to_string(),
                })
                .await;
            return LoadOutcome::Failed;
        };

        let metadata = SessionMetadata::from_session(session.key, data, None);
        let result = self
            .transport
            .send_event(&EventMessage::LoadingComplete {
                frames: data.frames.len(),
                load_time_seconds,
                metadata: Box::new(metadata),
            })
            .await;

        if result.is_err() {
            LoadOutcome::Disconnected
        } else {
            LoadOutcome::Ready
        }
    }

    async fn playback_loop(&mut self) -> Result<(), ReplayError> {
        let session = self.entry.session.clone();
        let Some(data) = session.data() else {
            return Ok(());
        };
        let frames = &data.frames;
        let mut state = PlaybackState::new();
        let tick_period = Duration::from_secs_f64(1.0 / self.config.tick_hz);

        loop {
            let tick_deadline = Instant::now() + tick_period;

            match self.transport.recv_raw(self.config.control_read_budget).await {
                Ok(Some(text)) => match parse_control_message(&text) {
                    Ok(message) => state.apply(message),
                    Err(err) => {
                        tracing::warn!(error = %err, "dispatch: discarding malformed control message");
                    }
                },
                Ok(None) => {}
                Err(RecvOutcome::Closed) => {
                    tracing::info!("dispatch: client disconnected during control read");
                    return Ok(());
                }
            }

            if let Some(index) = state.tick(&self.config, frames.len()) {
                let bytes = codec::encode_frame(&frames[index])
                    .map_err(|err| ReplayError::Other(anyhow::Error::new(err)))?;
                if self.transport.send_frame(bytes).await.is_err() {
                    tracing::info!("dispatch: client disconnected during frame send");
                    return Ok(());
                }
            }

            let now = Instant::now();
            if now < tick_deadline {
                tokio::time::sleep(tick_deadline - now).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> DispatcherConfig {
        DispatcherConfig::default()
    }

    #[test]
    fn playback_advances_at_speed_scaled_source_rate() {
        let mut state = PlaybackState::new();
        state.apply(ControlMessage::Play { speed: 1.0 });
        let sent = state.tick(&config(), 1_000_000);
        // 1.0 * (1/60) * 25 = 0.41666..., floor = 0, same as last_frame_sent(-1)? no: -1 != 0
        assert_eq!(sent, Some(0));
        assert!((state.frame_index - (25.0 / 60.0)).abs() < 1e-9);
    }

    #[test]
    fn paused_playback_never_advances() {
        let mut state = PlaybackState::new();
        for _ in 0..10 {
            assert_eq!(state.tick(&config(), 1000), None);
        }
        assert_eq!(state.frame_index, 0.0);
    }

    #[test]
    fn seek_resets_last_frame_sent_for_immediate_resend() {
        let mut state = PlaybackState::new();
        state.last_frame_sent = 500;
        state.apply(ControlMessage::Seek { frame: 500 });
        assert_eq!(state.last_frame_sent, -1);
        let sent = state.tick(&config(), 1000);
        assert_eq!(sent, Some(500));
    }

    #[test]
    fn playback_clamps_and_pauses_at_the_final_frame() {
        let mut state = PlaybackState::new();
        state.apply(ControlMessage::Seek { frame: 9 });
        state.apply(ControlMessage::Play { speed: 100.0 });
        state.tick(&config(), 10);
        assert_eq!(state.frame_index, 9.0);
        assert!(!state.is_playing);
    }

    #[test]
    fn same_frame_twice_in_a_row_is_not_resent() {
        let mut state = PlaybackState::new();
        state.apply(ControlMessage::Play { speed: 0.001 });
        let first = state.tick(&config(), 1000);
        let second = state.tick(&config(), 1000);
        assert_eq!(first, Some(0));
        assert_eq!(second, None);
    }

    #[test]
    fn empty_frame_sequence_never_emits_a_send() {
        let mut state = PlaybackState::new();
        state.apply(ControlMessage::Play { speed: 1.0 });
        assert_eq!(state.tick(&config(), 0), None);
    }
}
