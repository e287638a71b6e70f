//! Data model shared by the frame builder, position engine, cache, store
//! and dispatcher. Every type here is plain data: no I/O, no locking beyond
//! what [`Session`] needs to publish itself once to many readers.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::{OnceLock, RwLock};

use serde::{Deserialize, Serialize};

/// FIA-style three/four letter driver code, e.g. `"HAM"`.
pub type DriverCode = String;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum SessionType {
    R,
    S,
    Q,
    FP1,
    FP2,
    FP3,
}

impl SessionType {
    pub fn as_str(self) -> &'static str {
        match self {
            SessionType::R => "R",
            SessionType::S => "S",
            SessionType::Q => "Q",
            SessionType::FP1 => "FP1",
            SessionType::FP2 => "FP2",
            SessionType::FP3 => "FP3",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "R" => Some(SessionType::R),
            "S" => Some(SessionType::S),
            "Q" => Some(SessionType::Q),
            "FP1" => Some(SessionType::FP1),
            "FP2" => Some(SessionType::FP2),
            "FP3" => Some(SessionType::FP3),
            _ => None,
        }
    }
}

/// Identity basis for caching and store indexing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SessionKey {
    pub year: u32,
    pub round: u32,
    pub session_type: SessionType,
}

impl SessionKey {
    pub fn new(year: u32, round: u32, session_type: SessionType) -> Self {
        Self {
            year,
            round,
            session_type,
        }
    }

    /// `<year>_<round>_<session>`, used both as the cache key and as the
    /// stem of the on-disk cache file name.
    pub fn cache_stem(&self) -> String {
        format!("{}_{}_{}", self.year, self.round, self.session_type.as_str())
    }
}

/// Track status transitions, wire-coded as single digits by the upstream
/// adapter (`1..8`), per spec.md GLOSSARY.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TrackStatus {
    Green,
    Yellow,
    SafetyCar,
    Red,
    Vsc,
    VscEnding,
    Chequered,
}

impl TrackStatus {
    pub fn from_code(code: &str) -> Option<Self> {
        match code {
            "1" => Some(TrackStatus::Green),
            "2" => Some(TrackStatus::Yellow),
            "4" => Some(TrackStatus::SafetyCar),
            "5" => Some(TrackStatus::Red),
            "6" => Some(TrackStatus::Vsc),
            "7" => Some(TrackStatus::VscEnding),
            "8" => Some(TrackStatus::Chequered),
            _ => None,
        }
    }

    pub fn code(self) -> &'static str {
        match self {
            TrackStatus::Green => "1",
            TrackStatus::Yellow => "2",
            TrackStatus::SafetyCar => "4",
            TrackStatus::Red => "5",
            TrackStatus::Vsc => "6",
            TrackStatus::VscEnding => "7",
            TrackStatus::Chequered => "8",
        }
    }

    /// Tier B of the position engine shortens the hysteresis window under
    /// these statuses (spec.md §4.2).
    pub fn is_caution(self) -> bool {
        matches!(
            self,
            TrackStatus::SafetyCar | TrackStatus::Red | TrackStatus::Vsc | TrackStatus::VscEnding
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DriverStatus {
    Running,
    Pit,
    Retired,
    Finished,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Point2 {
    pub x: f64,
    pub y: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rgb(pub u8, pub u8, pub u8);

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TrackStatusTransition {
    pub t: f64,
    pub status: TrackStatus,
}

/// One driver's state within a single [`Frame`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DriverSample {
    pub x: f32,
    pub y: f32,
    pub speed: f32,
    pub dist: f64,
    pub position: u16,
    pub pos_raw: u16,
    pub interval_smooth: Option<f32>,
    pub gap_to_leader: Option<f32>,
    pub lap: u32,
    pub status: DriverStatus,
}

/// One time sample over the whole field, on the uniform 40 ms grid.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Frame {
    pub t: f64,
    pub lap: u32,
    pub track_status: TrackStatus,
    pub drivers: BTreeMap<DriverCode, DriverSample>,
}

/// Per-driver `lap_number -> official_position_at_lap_start`. Sparse; the
/// Tier C ground-truth override for the position engine.
pub type LapBoundaries = BTreeMap<DriverCode, BTreeMap<u32, u16>>;

/// Everything the loader fills in before publishing. Constructed once,
/// never mutated after [`Session::publish`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionData {
    pub frames: Vec<Frame>,
    pub total_laps: u32,
    pub track_geometry: Vec<Point2>,
    pub driver_colors: BTreeMap<DriverCode, Rgb>,
    pub driver_numbers: BTreeMap<DriverCode, u32>,
    pub driver_teams: BTreeMap<DriverCode, String>,
    pub track_statuses: Vec<TrackStatusTransition>,
    pub race_start_time: Option<f64>,
    pub low_position_coverage: bool,
}

/// The central core artifact: an identity, a lifecycle readable from any
/// thread while the loader is still working, and a write-once payload.
///
/// Readers never take a lock to reach `frames`/catalogues once
/// `is_loaded()` is true: [`OnceLock`] gives the happens-before edge that
/// spec.md §9 asks for ("publish ... with a release fence") for free.
pub struct Session {
    pub key: SessionKey,
    is_loaded: AtomicBool,
    progress: AtomicU8,
    loading_status: RwLock<String>,
    load_error: RwLock<Option<String>>,
    data: OnceLock<SessionData>,
}

impl Session {
    pub fn new(key: SessionKey) -> Self {
        Self {
            key,
            is_loaded: AtomicBool::new(false),
            progress: AtomicU8::new(0),
            loading_status: RwLock::new("queued".to_string()),
            load_error: RwLock::new(None),
            data: OnceLock::new(),
        }
    }

    pub fn is_loaded(&self) -> bool {
        self.is_loaded.load(Ordering::Acquire)
    }

    pub fn progress(&self) -> u8 {
        self.progress.load(Ordering::Relaxed)
    }

    pub fn loading_status(&self) -> String {
        self.loading_status
            .read()
            .expect("loading_status lock poisoned")
            .clone()
    }

    pub fn load_error(&self) -> Option<String> {
        self.load_error
            .read()
            .expect("load_error lock poisoned")
            .clone()
    }

    /// Only populated once [`Session::is_loaded`] is true and
    /// [`Session::load_error`] is `None`.
    pub fn data(&self) -> Option<&SessionData> {
        self.data.get()
    }

    /// Called by the loader. `progress` is clamped to `0..=100` and must be
    /// supplied in non-decreasing order by the caller (spec.md invariant).
    pub fn set_progress(&self, progress: u8, message: impl Into<String>) {
        self.progress.store(progress.min(100), Ordering::Relaxed);
        *self
            .loading_status
            .write()
            .expect("loading_status lock poisoned") = message.into();
    }

    /// Publish the finished artifact. Sets `is_loaded` last, with Release
    /// ordering, so any thread that observes `is_loaded() == true` via
    /// Acquire is guaranteed to see a fully written `data`.
    pub fn publish(&self, data: SessionData) {
        let _ = self.data.set(data);
        self.progress.store(100, Ordering::Relaxed);
        self.is_loaded.store(true, Ordering::Release);
    }

    /// Record a fatal load failure. `data` stays unset; `load_error` is
    /// always consulted before touching `data`.
    pub fn fail(&self, message: impl Into<String>) {
        *self.load_error.write().expect("load_error lock poisoned") = Some(message.into());
        self.is_loaded.store(true, Ordering::Release);
    }
}

/// Event-channel payload for `loading_complete` (spec.md §6).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionMetadata {
    pub year: u32,
    pub round: u32,
    pub session_type: String,
    pub total_frames: usize,
    pub total_laps: u32,
    pub driver_colors: BTreeMap<DriverCode, Rgb>,
    pub driver_numbers: BTreeMap<DriverCode, u32>,
    pub driver_teams: BTreeMap<DriverCode, String>,
    pub track_geometry: Vec<Point2>,
    pub track_statuses: Vec<TrackStatusTransition>,
    pub race_start_time: Option<f64>,
    pub error: Option<String>,
}

impl SessionMetadata {
    pub fn from_session(key: SessionKey, data: &SessionData, error: Option<String>) -> Self {
        Self {
            year: key.year,
            round: key.round,
            session_type: key.session_type.as_str().to_string(),
            total_frames: data.frames.len(),
            total_laps: data.total_laps,
            driver_colors: data.driver_colors.clone(),
            driver_numbers: data.driver_numbers.clone(),
            driver_teams: data.driver_teams.clone(),
            track_geometry: data.track_geometry.clone(),
            track_statuses: data.track_statuses.clone(),
            race_start_time: data.race_start_time,
            error,
        }
    }
}

/// Per-lap detail shapes for the (out-of-scope) external request layer.
/// Defined here so that layer, when built, reuses the same types the core
/// already knows about rather than re-deriving them.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LapTelemetryPoint {
    pub distance: f64,
    pub speed: f64,
    pub throttle: f64,
    pub brake: f64,
    pub rpm: u32,
    pub gear: i8,
    pub x: f64,
    pub y: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SectorTimes {
    pub sector_1: Option<f64>,
    pub sector_2: Option<f64>,
    pub sector_3: Option<f64>,
    pub lap_time: Option<f64>,
}
