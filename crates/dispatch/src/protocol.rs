//! Control/event channel shapes (spec.md §6), modeled as Rust types rather
//! than literal wire bytes since terminating a real socket is out of scope
//! (SPEC_FULL.md §1). A transport adapter is responsible for turning bytes
//! into [`ControlMessage`] and [`EventMessage`] into bytes.

use ingest_core::ReplayError;
use model::SessionMetadata;
use serde::{Deserialize, Serialize};

/// Client -> server. Unknown `action` values are ignored by the transport
/// before they ever reach [`parse_control_message`] (spec.md §6); malformed
/// or out-of-range payloads for a recognized action are a [`ReplayError::Protocol`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ControlMessage {
    Play { speed: f64 },
    Pause,
    Seek { frame: i64 },
}

/// Wire shape of an incoming control message, before validation.
#[derive(Debug, Deserialize)]
#[serde(tag = "action", rename_all = "lowercase")]
enum RawControlMessage {
    Play {
        #[serde(default = "default_speed")]
        speed: f64,
    },
    Pause,
    Seek {
        frame: i64,
    },
}

fn default_speed() -> f64 {
    1.0
}

/// Parse one JSON control message. Negative/zero speed and negative seek
/// targets are rejected here (SPEC_FULL.md §9 Open Question resolutions)
/// rather than silently clamped, so a buggy client finds out immediately.
pub fn parse_control_message(text: &str) -> Result<ControlMessage, ReplayError> {
    let raw: RawControlMessage = serde_json::from_str(text)
        .map_err(|err| ReplayError::Protocol(format!("malformed control message: {err}")))?;
    match raw {
        RawControlMessage::Play { speed } => {
            if !(speed > 0.0) {
                return Err(ReplayError::Protocol(format!(
                    "play speed must be > 0, got {speed}"
                )));
            }
            Ok(ControlMessage::Play { speed })
        }
        RawControlMessage::Pause => Ok(ControlMessage::Pause),
        RawControlMessage::Seek { frame } => {
            if frame < 0 {
                return Err(ReplayError::Protocol(format!(
                    "seek frame must be >= 0, got {frame}"
                )));
            }
            Ok(ControlMessage::Seek { frame })
        }
    }
}

/// Server -> client, text channel (spec.md §6). Binary frame messages are
/// carried separately via [`codec::encode_frame`], not through this enum.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EventMessage {
    LoadingProgress {
        progress: u8,
        message: String,
        elapsed_seconds: u64,
    },
    LoadingComplete {
        frames: usize,
        load_time_seconds: f64,
        metadata: Box<SessionMetadata>,
    },
    LoadingError {
        message: String,
    },
}

impl EventMessage {
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).expect("EventMessage always serializes")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_play_with_explicit_speed() {
        let msg = parse_control_message(r#"{"action":"play","speed":2.5}"#).unwrap();
        assert_eq!(msg, ControlMessage::Play { speed: 2.5 });
    }

    #[test]
    fn play_defaults_speed_to_one() {
        let msg = parse_control_message(r#"{"action":"play"}"#).unwrap();
        assert_eq!(msg, ControlMessage::Play { speed: 1.0 });
    }

    #[test]
    fn rejects_zero_or_negative_speed() {
        assert!(parse_control_message(r#"{"action":"play","speed":0}"#).is_err());
        assert!(parse_control_message(r#"{"action":"play","speed":-1.0}"#).is_err());
    }

    #[test]
    fn parses_pause() {
        assert_eq!(
            parse_control_message(r#"{"action":"pause"}"#).unwrap(),
            ControlMessage::Pause
        );
    }

    #[test]
    fn parses_seek() {
        assert_eq!(
            parse_control_message(r#"{"action":"seek","frame":1200}"#).unwrap(),
            ControlMessage::Seek { frame: 1200 }
        );
    }

    #[test]
    fn rejects_negative_seek() {
        assert!(parse_control_message(r#"{"action":"seek","frame":-1}"#).is_err());
    }

    #[test]
    fn rejects_unknown_action() {
        assert!(parse_control_message(r#"{"action":"rewind"}"#).is_err());
    }

    #[test]
    fn rejects_malformed_json() {
        assert!(parse_control_message("not json").is_err());
    }

    #[test]
    fn event_message_serializes_with_tagged_type() {
        let event = EventMessage::LoadingError {
            message: "boom".to_string(),
        };
        let json = event.to_json();
        assert!(json.contains(r#""type":"loading_error""#));
        assert!(json.contains("boom"));
    }
}
