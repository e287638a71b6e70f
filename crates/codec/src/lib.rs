//! Frame Codec: one [`model::Frame`] to one self-describing MessagePack
//! message and back.
//!
//! The wire shape narrows `dist` to `f32` (spec: "natural IEEE-754 32-bit
//! form where precision allows") and drops `pos_raw`, which clients never
//! need — `position` is the already-finalized ordering. Map keys stay
//! fixed (`t, lap, track_status, drivers`, and per-driver
//! `x,y,speed,dist,position,gap,interval,lap,status`) so the message is
//! self-describing on the wire, matching how the original implementation's
//! `serialize_frame_msgpack` framed a frame.

use std::collections::BTreeMap;

use model::{DriverCode, DriverSample, DriverStatus, Frame, TrackStatus};
use serde::{Deserialize, Serialize};

#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("failed to encode frame: {0}")]
    Encode(#[from] rmp_serde::encode::Error),
    #[error("failed to decode frame: {0}")]
    Decode(#[from] rmp_serde::decode::Error),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WireDriverSample {
    pub x: f32,
    pub y: f32,
    pub speed: f32,
    pub dist: f32,
    pub position: u16,
    pub gap: Option<f32>,
    pub interval: Option<f32>,
    pub lap: u32,
    pub status: WireDriverStatus,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum WireDriverStatus {
    Running,
    Pit,
    Retired,
    Finished,
}

impl From<DriverStatus> for WireDriverStatus {
    fn from(status: DriverStatus) -> Self {
        match status {
            DriverStatus::Running => WireDriverStatus::Running,
            DriverStatus::Pit => WireDriverStatus::Pit,
            DriverStatus::Retired => WireDriverStatus::Retired,
            DriverStatus::Finished => WireDriverStatus::Finished,
        }
    }
}

impl From<&DriverSample> for WireDriverSample {
    fn from(sample: &DriverSample) -> Self {
        Self {
            x: sample.x,
            y: sample.y,
            speed: sample.speed,
            dist: sample.dist as f32,
            position: sample.position,
            gap: sample.gap_to_leader,
            interval: sample.interval_smooth,
            lap: sample.lap,
            status: sample.status.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WireFrame {
    pub t: f64,
    pub lap: u32,
    pub track_status: String,
    pub drivers: BTreeMap<DriverCode, WireDriverSample>,
}

impl From<&Frame> for WireFrame {
    fn from(frame: &Frame) -> Self {
        Self {
            t: frame.t,
            lap: frame.lap,
            track_status: frame.track_status.code().to_string(),
            drivers: frame
                .drivers
                .iter()
                .map(|(code, sample)| (code.clone(), WireDriverSample::from(sample)))
                .collect(),
        }
    }
}

/// Encode one frame as a single MessagePack message.
pub fn encode_frame(frame: &Frame) -> Result<Vec<u8>, CodecError> {
    let wire = WireFrame::from(frame);
    Ok(rmp_serde::to_vec_named(&wire)?)
}

/// Decode a MessagePack message back into its wire representation. This is
/// not guaranteed to reconstruct the original `model::Frame` byte-for-byte
/// (`pos_raw` is not carried on the wire); it reconstructs exactly what a
/// client received.
pub fn decode_frame(bytes: &[u8]) -> Result<WireFrame, CodecError> {
    Ok(rmp_serde::from_slice(bytes)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use model::TrackStatus;

    fn sample_frame() -> Frame {
        let mut drivers = BTreeMap::new();
        drivers.insert(
            "HAM".to_string(),
            DriverSample {
                x: 123.25,
                y: -45.5,
                speed: 287.0,
                dist: 1234.5,
                position: 1,
                pos_raw: 1,
                interval_smooth: Some(0.0),
                gap_to_leader: Some(0.0),
                lap: 12,
                status: DriverStatus::Running,
            },
        );
        drivers.insert(
            "VER".to_string(),
            DriverSample {
                x: 130.0,
                y: -40.0,
                speed: 291.5,
                dist: 1220.0,
                position: 2,
                pos_raw: 2,
                interval_smooth: None,
                gap_to_leader: None,
                lap: 12,
                status: DriverStatus::Pit,
            },
        );
        Frame {
            t: 512.04,
            lap: 12,
            track_status: TrackStatus::SafetyCar,
            drivers,
        }
    }

    #[test]
    fn round_trips_integers_exactly_and_floats_within_one_ulp() {
        let frame = sample_frame();
        let bytes = encode_frame(&frame).expect("encode");
        let decoded = decode_frame(&bytes).expect("decode");

        assert_eq!(decoded.lap, frame.lap);
        assert_eq!(decoded.track_status, frame.track_status.code());
        assert_eq!(decoded.drivers.len(), frame.drivers.len());

        let ham = &decoded.drivers["HAM"];
        let original = &frame.drivers["HAM"];
        assert_eq!(ham.position, original.position);
        assert_eq!(ham.lap, original.lap);
        assert!((ham.x - original.x).abs() <= f32::EPSILON);
        assert!((ham.dist - original.dist as f32).abs() <= f32::EPSILON);

        let ver = &decoded.drivers["VER"];
        assert_eq!(ver.status, WireDriverStatus::Pit);
        assert_eq!(ver.interval, None);
    }

    #[test]
    fn encoded_size_stays_compact_for_a_twenty_car_frame() {
        let mut drivers = BTreeMap::new();
        for i in 0..20 {
            drivers.insert(
                format!("D{:02}", i),
                DriverSample {
                    x: i as f32 * 10.0,
                    y: i as f32 * 5.0,
                    speed: 250.0,
                    dist: i as f64 * 100.0,
                    position: i + 1,
                    pos_raw: i + 1,
                    interval_smooth: Some(0.5),
                    gap_to_leader: Some(i as f32 * 0.5),
                    lap: 10,
                    status: DriverStatus::Running,
                },
            );
        }
        let frame = Frame {
            t: 100.0,
            lap: 10,
            track_status: TrackStatus::Green,
            drivers,
        };
        let bytes = encode_frame(&frame).expect("encode");
        assert!(
            bytes.len() < 1200,
            "expected a compact encoding, got {} bytes",
            bytes.len()
        );
    }

    #[test]
    fn null_fields_survive_as_none() {
        let frame = sample_frame();
        let bytes = encode_frame(&frame).expect("encode");
        let decoded = decode_frame(&bytes).expect("decode");
        assert_eq!(decoded.drivers["VER"].interval, None);
        assert_eq!(decoded.drivers["VER"].gap, None);
    }
}
