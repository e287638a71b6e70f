//! Frame Builder and Position Engine: turns four raw per-driver timing
//! streams into one immutable, randomly-addressable [`model::Frame`]
//! sequence.

mod build;
mod position;
mod resample;
mod smoothing;

pub use build::{build_session, BuildConfig};
pub use position::{
    apply_lap_anchor, detect_retirement, position_coverage, sort_key_hybrid, DriverCandidate,
    PositionEngine, PositionEngineConfig, PositionSmoothing,
};
pub use resample::{resample_position_series, speed_and_distance};
pub use smoothing::smooth_interval_series;
