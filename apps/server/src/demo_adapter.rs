//! Synthetic [`RawAdapter`] used by the demo binary. Stands in for the
//! out-of-scope upstream provider (spec.md §1): it fabricates a short
//! multi-driver race on a circular track so the rest of the pipeline has
//! something concrete to build a [`model::Session`] from without a network
//! dependency.

use std::collections::BTreeMap;
use std::f64::consts::PI;

use async_trait::async_trait;
use ingest_core::{
    DriverCatalogue, LapTimingRow, PositionRow, RawAdapter, ReplayError, RowsByDriver,
    StreamTimingRow, TrackStatusRow,
};
use model::{DriverCode, Rgb, SessionKey};

#[derive(Debug, Clone, Copy)]
pub struct DemoAdapterConfig {
    pub driver_count: u32,
    pub laps: u32,
    pub lap_duration_s: f64,
    pub track_radius_m: f64,
}

impl Default for DemoAdapterConfig {
    fn default() -> Self {
        Self {
            driver_count: 8,
            laps: 3,
            lap_duration_s: 20.0,
            track_radius_m: 300.0,
        }
    }
}

pub struct DemoAdapter {
    config: DemoAdapterConfig,
}

impl DemoAdapter {
    pub fn new(config: DemoAdapterConfig) -> Self {
        Self { config }
    }

    fn driver_codes(&self) -> Vec<DriverCode> {
        (0..self.config.driver_count)
            .map(|i| format!("D{:02}", i))
            .collect()
    }

    /// Driver `i` is `2%` per field-position slower than the previous one,
    /// so the initial hybrid sort key already resembles a real spread
    /// instead of every car lapping in lockstep.
    fn lap_duration_for(&self, index: u32) -> f64 {
        self.config.lap_duration_s * (1.0 + 0.02 * index as f64)
    }
}

#[async_trait]
impl RawAdapter for DemoAdapter {
    async fn stream_timing(&self, _key: &SessionKey) -> Result<RowsByDriver<StreamTimingRow>, ReplayError> {
        let total_duration = self.lap_duration_for(self.config.driver_count.saturating_sub(1)) * self.config.laps as f64;
        let mut rows: RowsByDriver<StreamTimingRow> = BTreeMap::new();

        for (i, code) in self.driver_codes().into_iter().enumerate() {
            let lap_duration = self.lap_duration_for(i as u32);
            let mut driver_rows = Vec::new();
            let mut t = 0.0;
            while t <= total_duration {
                let progress = t / lap_duration;
                driver_rows.push(StreamTimingRow {
                    t,
                    position_raw: (i as u16) + 1,
                    gap_to_leader_s: Some(progress.fract() * 0.01 * i as f64),
                    interval_s: Some(0.4 + 0.1 * i as f64),
                });
                t += 0.24;
            }
            rows.insert(code, driver_rows);
        }
        Ok(rows)
    }

    async fn track_status(&self, _key: &SessionKey) -> Result<Vec<TrackStatusRow>, ReplayError> {
        Ok(vec![TrackStatusRow {
            t: 0.0,
            status_code: "1".to_string(),
        }])
    }

    async fn lap_timing(&self, _key: &SessionKey) -> Result<RowsByDriver<LapTimingRow>, ReplayError> {
        let mut rows: RowsByDriver<LapTimingRow> = BTreeMap::new();
        for (i, code) in self.driver_codes().into_iter().enumerate() {
            let lap_duration = self.lap_duration_for(i as u32);
            let mut driver_rows = Vec::new();
            for lap in 1..=self.config.laps {
                let lap_start_time = lap_duration * (lap - 1) as f64;
                driver_rows.push(LapTimingRow {
                    lap_number: lap,
                    lap_start_time,
                    official_position: Some((i as u16) + 1),
                    lap_time_s: if lap > 1 { Some(lap_duration) } else { None },
                    sector_1_s: Some(lap_duration / 3.0),
                    sector_2_s: Some(lap_duration / 3.0),
                    sector_3_s: Some(lap_duration / 3.0),
                    pit_in_time: None,
                    pit_out_time: None,
                });
            }
            rows.insert(code, driver_rows);
        }
        Ok(rows)
    }

    async fn position_data(&self, _key: &SessionKey) -> Result<RowsByDriver<PositionRow>, ReplayError> {
        let total_duration = self.lap_duration_for(self.config.driver_count.saturating_sub(1)) * self.config.laps as f64;
        let mut rows: RowsByDriver<PositionRow> = BTreeMap::new();

        for (i, code) in self.driver_codes().into_iter().enumerate() {
            let lap_duration = self.lap_duration_for(i as u32);
            let mut driver_rows = Vec::new();
            let mut t = 0.0;
            while t <= total_duration {
                let theta = 2.0 * PI * (t / lap_duration);
                driver_rows.push(PositionRow {
                    t,
                    x: self.config.track_radius_m * theta.cos(),
                    y: self.config.track_radius_m * theta.sin(),
                    on_track: true,
                });
                t += 0.04;
            }
            rows.insert(code, driver_rows);
        }
        Ok(rows)
    }

    async fn driver_catalogue(&self, _key: &SessionKey) -> Result<DriverCatalogue, ReplayError> {
        let palette = [
            Rgb(230, 0, 0),
            Rgb(0, 100, 230),
            Rgb(0, 180, 90),
            Rgb(240, 200, 0),
            Rgb(160, 0, 200),
            Rgb(0, 200, 200),
            Rgb(255, 140, 0),
            Rgb(120, 120, 120),
        ];
        let mut colors = BTreeMap::new();
        let mut numbers = BTreeMap::new();
        let mut teams = BTreeMap::new();
        for (i, code) in self.driver_codes().into_iter().enumerate() {
            colors.insert(code.clone(), palette[i % palette.len()]);
            numbers.insert(code.clone(), (i as u32) + 1);
            teams.insert(code, format!("Team {}", (i / 2) + 1));
        }
        Ok(DriverCatalogue {
            colors,
            numbers,
            teams,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn produces_one_timing_stream_per_driver() {
        let adapter = DemoAdapter::new(DemoAdapterConfig {
            driver_count: 3,
            laps: 1,
            lap_duration_s: 5.0,
            track_radius_m: 100.0,
        });
        let key = SessionKey::new(2024, 1, model::SessionType::R);
        let timing = adapter.stream_timing(&key).await.unwrap();
        assert_eq!(timing.len(), 3);
        let positions = adapter.position_data(&key).await.unwrap();
        assert_eq!(positions.len(), 3);
        assert!(positions["D00"].len() > 1);
    }

    #[tokio::test]
    async fn catalogue_covers_every_driver() {
        let adapter = DemoAdapter::new(DemoAdapterConfig::default());
        let key = SessionKey::new(2024, 1, model::SessionType::R);
        let catalogue = adapter.driver_catalogue(&key).await.unwrap();
        assert_eq!(catalogue.colors.len(), 8);
        assert_eq!(catalogue.numbers.len(), 8);
    }
}
