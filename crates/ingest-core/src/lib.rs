//! The seam between a concrete timing-data provider and the frame builder.
//!
//! [`RawAdapter`] is deliberately narrow: four row-fetching methods plus a
//! catalogue lookup, each returning data already shaped close to the wire
//! format FastF1-style adapters hand back (timedeltas pre-converted to
//! float seconds, one row per observation). Everything downstream of this
//! trait — resampling, fusion, position ordering — is adapter-agnostic.

use std::collections::BTreeMap;

use async_trait::async_trait;
use model::{DriverCode, Rgb, SessionKey};
use serde::{Deserialize, Serialize};

/// One row of the "stream timing" feed: position/gap/interval as reported
/// live, before any smoothing or re-ordering.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct StreamTimingRow {
    pub t: f64,
    pub position_raw: u16,
    pub gap_to_leader_s: Option<f64>,
    pub interval_s: Option<f64>,
}

/// One row of the track status feed: a single-digit code effective from `t`
/// onward until the next row.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TrackStatusRow {
    pub t: f64,
    pub status_code: String,
}

/// One row of the lap timing feed: what lap a driver started at what time,
/// the official classification at that lap start (the Tier C ground truth,
/// spec.md §3 `LapBoundaries`), plus that lap's sector splits once known.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LapTimingRow {
    pub lap_number: u32,
    pub lap_start_time: f64,
    /// Official position at this lap's start, 1-indexed. Sparse: `None`
    /// when the upstream provider has no classification for this lap.
    pub official_position: Option<u16>,
    pub lap_time_s: Option<f64>,
    pub sector_1_s: Option<f64>,
    pub sector_2_s: Option<f64>,
    pub sector_3_s: Option<f64>,
    pub pit_in_time: Option<f64>,
    pub pit_out_time: Option<f64>,
}

/// One row of the position feed: where a car physically was at `t`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PositionRow {
    pub t: f64,
    pub x: f64,
    pub y: f64,
    pub on_track: bool,
}

/// Static per-driver facts that don't vary over the session.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DriverCatalogue {
    pub colors: BTreeMap<DriverCode, Rgb>,
    pub numbers: BTreeMap<DriverCode, u32>,
    pub teams: BTreeMap<DriverCode, String>,
}

/// Raw per-driver row sets for one of the four timing streams
/// (spec.md §4.1): stream timing, track status is session-wide and fetched
/// separately via [`RawAdapter::track_status`].
pub type RowsByDriver<T> = BTreeMap<DriverCode, Vec<T>>;

#[derive(Debug, thiserror::Error)]
pub enum ReplayError {
    /// The adapter reached its upstream source but got back something it
    /// couldn't use (malformed response, unexpected schema).
    #[error("adapter error: {0}")]
    Adapter(String),

    /// The adapter's response was well-formed but too sparse to build a
    /// trustworthy session from (spec.md §4.2 coverage check, empty
    /// required stream).
    #[error("data quality error: {0}")]
    DataQuality(String),

    /// Reading or writing the cache tier failed.
    #[error("cache error: {0}")]
    Cache(String),

    /// A control or event message violated the wire protocol.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// The client transport dropped or failed mid-session.
    #[error("transport error: {0}")]
    Transport(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// A live or replayed connection to a timing data provider for one session.
/// Implementations own whatever HTTP client, disk cache, or fixture data
/// they need; `RawAdapter` itself carries no I/O policy.
#[async_trait]
pub trait RawAdapter: Send + Sync {
    async fn stream_timing(&self, key: &SessionKey) -> Result<RowsByDriver<StreamTimingRow>, ReplayError>;

    async fn track_status(&self, key: &SessionKey) -> Result<Vec<TrackStatusRow>, ReplayError>;

    async fn lap_timing(&self, key: &SessionKey) -> Result<RowsByDriver<LapTimingRow>, ReplayError>;

    async fn position_data(&self, key: &SessionKey) -> Result<RowsByDriver<PositionRow>, ReplayError>;

    async fn driver_catalogue(&self, key: &SessionKey) -> Result<DriverCatalogue, ReplayError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn replay_error_messages_are_stable() {
        let err = ReplayError::DataQuality("position coverage 0.42 below threshold 0.80".into());
        assert_eq!(
            err.to_string(),
            "data quality error: position coverage 0.42 below threshold 0.80"
        );
    }
}
