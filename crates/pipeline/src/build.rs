//! Frame Builder orchestration: pulls the four raw streams through a
//! `RawAdapter`, fuses them onto a uniform 40ms grid, and hands the result
//! to the position engine.

use std::collections::BTreeMap;

use ingest_core::{LapTimingRow, RawAdapter, ReplayError, RowsByDriver};
use model::{
    DriverCode, DriverSample, DriverStatus, Frame, LapBoundaries, Point2, Rgb, SessionData,
    SessionKey, TrackStatus, TrackStatusTransition,
};

use crate::position::{DriverCandidate, PositionEngine, PositionEngineConfig};
use crate::resample::{resample_position_series, speed_and_distance};
use crate::smoothing::smooth_interval_series;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BuildConfig {
    pub grid_dt: f64,
    pub position_engine: PositionEngineConfig,
}

impl Default for BuildConfig {
    fn default() -> Self {
        Self {
            grid_dt: 0.04,
            position_engine: PositionEngineConfig::default(),
        }
    }
}

/// Fetch and fuse one session's raw streams into the immutable frame
/// sequence and catalogues that `Session::publish` expects.
pub async fn build_session(
    adapter: &dyn RawAdapter,
    key: &SessionKey,
    config: BuildConfig,
) -> Result<SessionData, ReplayError> {
    tracing::info!(year = key.year, round = key.round, "frame_builder.fetch: start");
    let stream_timing = adapter.stream_timing(key).await?;
    let track_status_rows = adapter.track_status(key).await?;
    let lap_timing = adapter.lap_timing(key).await?;
    let position_data = adapter.position_data(key).await?;
    let catalogue = adapter.driver_catalogue(key).await?;
    tracing::debug!(
        drivers = position_data.len(),
        track_status_rows = track_status_rows.len(),
        "frame_builder.fetch: done"
    );

    if stream_timing.is_empty() {
        return Err(ReplayError::DataQuality("stream_timing is empty".into()));
    }
    if position_data.is_empty() {
        return Err(ReplayError::DataQuality("position_data is empty".into()));
    }

    let drivers: Vec<DriverCode> = position_data.keys().cloned().collect();

    let t0 = position_data
        .values()
        .filter_map(|rows| rows.first().map(|r| r.t))
        .fold(f64::INFINITY, f64::min);
    let t_last = position_data
        .values()
        .filter_map(|rows| rows.last().map(|r| r.t))
        .fold(f64::NEG_INFINITY, f64::max);

    if !t0.is_finite() || !t_last.is_finite() || t_last <= t0 {
        return Err(ReplayError::DataQuality(
            "position_data has no usable time span".into(),
        ));
    }

    let grid = build_time_grid(t0, t_last, config.grid_dt);
    tracing::debug!(frames = grid.len(), t0, t_last, "frame_builder.grid: built uniform grid");

    let mut xy_by_driver: BTreeMap<DriverCode, Vec<Option<(f32, f32)>>> = BTreeMap::new();
    let mut speed_by_driver: BTreeMap<DriverCode, Vec<f32>> = BTreeMap::new();
    let mut dist_by_driver: BTreeMap<DriverCode, Vec<f64>> = BTreeMap::new();

    for driver in &drivers {
        let rows = position_data.get(driver).map(Vec::as_slice).unwrap_or(&[]);
        let xy = resample_position_series(rows, &grid);
        let (speed, dist) = speed_and_distance(&xy, config.grid_dt);
        xy_by_driver.insert(driver.clone(), xy);
        speed_by_driver.insert(driver.clone(), speed);
        dist_by_driver.insert(driver.clone(), dist);
    }

    let interval_timeline: BTreeMap<DriverCode, Vec<(f64, Option<f64>)>> = stream_timing
        .iter()
        .map(|(driver, rows)| {
            let raw: Vec<Option<f64>> = rows.iter().map(|r| r.interval_s).collect();
            let smoothed = smooth_interval_series(&raw);
            let timeline = rows
                .iter()
                .zip(smoothed)
                .map(|(r, v)| (r.t, v))
                .collect();
            (driver.clone(), timeline)
        })
        .collect();

    let pos_raw_timeline: BTreeMap<DriverCode, Vec<(f64, u16)>> = stream_timing
        .iter()
        .map(|(driver, rows)| {
            (
                driver.clone(),
                rows.iter().map(|r| (r.t, r.position_raw)).collect(),
            )
        })
        .collect();

    let gap_timeline: BTreeMap<DriverCode, Vec<(f64, Option<f64>)>> = stream_timing
        .iter()
        .map(|(driver, rows)| {
            (
                driver.clone(),
                rows.iter().map(|r| (r.t, r.gap_to_leader_s)).collect(),
            )
        })
        .collect();

    let lap_timeline: BTreeMap<DriverCode, Vec<(f64, &LapTimingRow)>> = lap_timing
        .iter()
        .map(|(driver, rows)| {
            (
                driver.clone(),
                rows.iter().map(|r| (r.lap_start_time, r)).collect(),
            )
        })
        .collect();

    let track_status_timeline: Vec<(f64, TrackStatus)> = track_status_rows
        .iter()
        .filter_map(|r| TrackStatus::from_code(&r.status_code).map(|s| (r.t, s)))
        .collect();

    let position_samples_per_driver: BTreeMap<DriverCode, usize> = stream_timing
        .iter()
        .map(|(driver, rows)| (driver.clone(), rows.iter().filter(|r| r.position_raw > 0).count()))
        .collect();
    let total_position_rows: usize = position_samples_per_driver.values().sum();
    let total_stream_rows: usize = stream_timing.values().map(Vec::len).sum();
    let coverage = if total_stream_rows == 0 {
        0.0
    } else {
        total_position_rows as f64 / total_stream_rows as f64
    };
    let low_position_coverage = coverage < config.position_engine.coverage_threshold;
    if low_position_coverage {
        tracing::warn!(
            coverage,
            threshold = config.position_engine.coverage_threshold,
            "frame_builder.quality: position coverage below threshold, degrading to progress-only ordering"
        );
    }

    let lap_boundaries: LapBoundaries = build_lap_boundaries(&lap_timing);

    let mut engine = PositionEngine::new(config.position_engine);
    let mut frames = Vec::with_capacity(grid.len());

    for (i, &t) in grid.iter().enumerate() {
        let track_status = as_of(&track_status_timeline, t).unwrap_or(TrackStatus::Green);

        let mut candidates: BTreeMap<DriverCode, DriverCandidate> = BTreeMap::new();
        let mut driver_laps: BTreeMap<DriverCode, u32> = BTreeMap::new();

        for driver in &drivers {
            let xy = xy_by_driver[driver][i];
            let on_track = xy.is_some();

            let lap_row = lap_timeline
                .get(driver)
                .and_then(|timeline| as_of_ref(timeline, t));
            let current_lap = lap_row.map(|r| r.lap_number).unwrap_or(0);
            driver_laps.insert(driver.clone(), current_lap);

            let in_pit = lap_row
                .map(|r| match (r.pit_in_time, r.pit_out_time) {
                    (Some(pit_in), Some(pit_out)) => t >= pit_in && t < pit_out,
                    (Some(pit_in), None) => t >= pit_in,
                    _ => false,
                })
                .unwrap_or(false);

            let has_future_samples = dist_by_driver[driver]
                .get(i..)
                .map(|rest| rest.len() > 1)
                .unwrap_or(false);
            let retired = !on_track && i > 0 && !has_future_samples;

            let status = if retired {
                DriverStatus::Retired
            } else if in_pit {
                DriverStatus::Pit
            } else if i == grid.len() - 1 {
                DriverStatus::Finished
            } else {
                DriverStatus::Running
            };

            let pos_raw = pos_raw_timeline
                .get(driver)
                .and_then(|timeline| as_of(timeline, t))
                .unwrap_or(0);
            let interval_smooth = interval_timeline
                .get(driver)
                .and_then(|timeline| as_of(timeline, t))
                .flatten();
            let race_progress = dist_by_driver[driver][i];

            // A driver not yet on track (no GPS sample at this tick) is not
            // part of the field being ranked this frame; it is also the
            // driver excluded below when the frame's `drivers` map is
            // assembled, so leaving it out here keeps `position` a dense
            // permutation of `1..=K` over exactly the K drivers present.
            if on_track {
                candidates.insert(
                    driver.clone(),
                    DriverCandidate {
                        pos_raw,
                        interval_smooth: interval_smooth.map(|v| v as f32),
                        race_progress,
                        status,
                        explicit_retired: retired,
                    },
                );
            }
        }

        let leader_lap = driver_laps.values().copied().max().unwrap_or(0);
        let ranking = engine.rank_frame(t, track_status, leader_lap, &lap_boundaries, &candidates);

        let mut drivers_in_frame = BTreeMap::new();
        for driver in &drivers {
            let Some((x, y)) = xy_by_driver[driver][i] else {
                continue;
            };
            let candidate = &candidates[driver];
            let gap_to_leader = gap_timeline
                .get(driver)
                .and_then(|timeline| as_of(timeline, t))
                .flatten();

            drivers_in_frame.insert(
                driver.clone(),
                DriverSample {
                    x,
                    y,
                    speed: speed_by_driver[driver][i],
                    dist: dist_by_driver[driver][i],
                    position: ranking.get(driver).copied().unwrap_or(0),
                    pos_raw: candidate.pos_raw,
                    interval_smooth: candidate.interval_smooth,
                    gap_to_leader: gap_to_leader.map(|v| v as f32),
                    lap: driver_laps[driver],
                    status: candidate.status,
                },
            );
        }

        frames.push(Frame {
            t,
            lap: leader_lap,
            track_status,
            drivers: drivers_in_frame,
        });
    }

    let total_laps = lap_timing
        .values()
        .flat_map(|rows| rows.iter().map(|r| r.lap_number))
        .max()
        .unwrap_or(0);

    let track_geometry: Vec<Point2> = drivers
        .first()
        .and_then(|d| position_data.get(d))
        .map(|rows| rows.iter().map(|r| Point2 { x: r.x, y: r.y }).collect())
        .unwrap_or_default();

    let track_statuses = track_status_timeline
        .into_iter()
        .map(|(t, status)| TrackStatusTransition { t, status })
        .collect();

    let driver_colors: BTreeMap<DriverCode, Rgb> = catalogue.colors;
    let driver_numbers = catalogue.numbers;
    let driver_teams = catalogue.teams;

    tracing::info!(
        frames = frames.len(),
        total_laps,
        low_position_coverage,
        "frame_builder.fuse: session built"
    );

    Ok(SessionData {
        frames,
        total_laps,
        track_geometry,
        driver_colors,
        driver_numbers,
        driver_teams,
        track_statuses,
        race_start_time: Some(t0),
        low_position_coverage,
    })
}

fn build_time_grid(t0: f64, t_last: f64, dt: f64) -> Vec<f64> {
    let mut grid = Vec::new();
    let mut t = t0;
    while t <= t_last {
        grid.push(t);
        t += dt;
    }
    if grid.is_empty() {
        grid.push(t0);
    }
    grid
}

fn build_lap_boundaries(lap_timing: &RowsByDriver<LapTimingRow>) -> LapBoundaries {
    let mut boundaries = LapBoundaries::new();
    for (driver, rows) in lap_timing {
        let mut per_lap: BTreeMap<u32, u16> = BTreeMap::new();
        for row in rows {
            if let Some(official_position) = row.official_position {
                per_lap.insert(row.lap_number, official_position);
            }
        }
        boundaries.insert(driver.clone(), per_lap);
    }
    boundaries
}

fn as_of<T: Copy>(timeline: &[(f64, T)], t: f64) -> Option<T> {
    as_of_ref(timeline, t).copied()
}

fn as_of_ref<'a, T>(timeline: &'a [(f64, T)], t: f64) -> Option<&'a T> {
    if timeline.is_empty() {
        return None;
    }
    match timeline.binary_search_by(|(rt, _)| rt.partial_cmp(&t).expect("non-NaN timestamp")) {
        Ok(i) => Some(&timeline[i].1),
        Err(0) => None,
        Err(i) => Some(&timeline[i - 1].1),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn time_grid_covers_the_full_span_inclusive() {
        let grid = build_time_grid(0.0, 0.12, 0.04);
        assert_eq!(grid.len(), 4);
        assert!((grid[3] - 0.12).abs() < 1e-9);
    }

    #[test]
    fn time_grid_degenerate_span_still_yields_one_point() {
        let grid = build_time_grid(5.0, 5.0, 0.04);
        assert_eq!(grid, vec![5.0]);
    }

    #[test]
    fn as_of_returns_none_before_first_entry() {
        let timeline = vec![(1.0, "a"), (2.0, "b")];
        assert_eq!(as_of(&timeline, 0.5), None);
        assert_eq!(as_of(&timeline, 1.5), Some("a"));
        assert_eq!(as_of(&timeline, 5.0), Some("b"));
    }
}
