//! Three-tier position ordering: hybrid sort key, temporal hysteresis,
//! lap-boundary anchor. Applied in that exact precedence each frame.

use std::cmp::Ordering;
use std::collections::BTreeMap;

use model::{DriverCode, DriverStatus, LapBoundaries, TrackStatus};

/// Tunable knobs for the position engine. `coverage_threshold` resolves the
/// "what counts as enough position coverage" open question: a field with a
/// documented default rather than a buried literal.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PositionEngineConfig {
    pub coverage_threshold: f64,
}

impl Default for PositionEngineConfig {
    fn default() -> Self {
        Self {
            coverage_threshold: 0.8,
        }
    }
}

/// Everything the hybrid sort key and retirement check need for one driver
/// at one instant.
#[derive(Debug, Clone, Copy)]
pub struct DriverCandidate {
    pub pos_raw: u16,
    pub interval_smooth: Option<f32>,
    pub race_progress: f64,
    pub status: DriverStatus,
    pub explicit_retired: bool,
}

/// Tier A: `(primary, secondary, tertiary)`, ascending, lexicographic.
pub fn sort_key_hybrid(
    pos_raw: u16,
    interval_smooth: Option<f32>,
    race_progress: f64,
) -> (u32, f64, f64) {
    let primary = if pos_raw > 0 { pos_raw as u32 } else { 9999 };
    let secondary = interval_smooth
        .filter(|v| v.is_finite())
        .map(|v| v as f64)
        .unwrap_or(9999.0);
    let tertiary = if race_progress.is_finite() {
        -race_progress
    } else {
        0.0
    };
    (primary, secondary, tertiary)
}

pub fn detect_retirement(status: DriverStatus, explicit_retired: bool) -> bool {
    matches!(status, DriverStatus::Retired) || explicit_retired
}

/// Fraction of the field with a non-null `Position` reading this frame.
pub fn position_coverage(total_drivers: usize, rows_with_position: usize) -> f64 {
    if total_drivers == 0 {
        return 0.0;
    }
    rows_with_position as f64 / total_drivers as f64
}

/// Tier B: accepts a proposed order only once it has stood unchanged for at
/// least `H` seconds, `H` shortened under caution.
#[derive(Debug, Clone)]
pub struct PositionSmoothing {
    accepted_order: Vec<DriverCode>,
    candidate_order: Vec<DriverCode>,
    candidate_since: f64,
}

impl PositionSmoothing {
    pub fn new() -> Self {
        Self {
            accepted_order: Vec::new(),
            candidate_order: Vec::new(),
            candidate_since: f64::NEG_INFINITY,
        }
    }

    pub fn accepted(&self) -> &[DriverCode] {
        &self.accepted_order
    }

    /// `candidate` is the Tier A order for this instant. Returns the order
    /// actually in force after applying hysteresis.
    pub fn apply(&mut self, t: f64, candidate: Vec<DriverCode>, track_status: TrackStatus) -> Vec<DriverCode> {
        let hysteresis = if track_status.is_caution() { 0.3 } else { 1.0 };

        if self.accepted_order.is_empty() {
            self.accepted_order = candidate.clone();
            self.candidate_order = candidate;
            self.candidate_since = t;
            return self.accepted_order.clone();
        }

        if candidate == self.accepted_order {
            self.candidate_order = candidate;
            self.candidate_since = t;
            return self.accepted_order.clone();
        }

        if candidate != self.candidate_order {
            self.candidate_order = candidate;
            self.candidate_since = t;
        }

        if t - self.candidate_since >= hysteresis {
            self.accepted_order = self.candidate_order.clone();
        }

        self.accepted_order.clone()
    }
}

impl Default for PositionSmoothing {
    fn default() -> Self {
        Self::new()
    }
}

/// Tier C: overlay official per-lap positions onto `order`. Collisions
/// (two drivers wanting the same official slot, or a slot already taken by
/// a displaced driver) resolve to the lower official position winning; the
/// loser takes the winner's pre-overlay slot. Non-anchored drivers keep
/// their relative order in whatever slots remain.
pub fn apply_lap_anchor(
    order: Vec<DriverCode>,
    current_lap: u32,
    lap_boundaries: &LapBoundaries,
) -> Vec<DriverCode> {
    let n = order.len();
    if n == 0 {
        return order;
    }

    let mut result = order.clone();
    let mut slot_of: BTreeMap<DriverCode, usize> =
        order.iter().enumerate().map(|(i, d)| (d.clone(), i)).collect();

    let mut anchors: Vec<(DriverCode, u16)> = lap_boundaries
        .iter()
        .filter_map(|(driver, laps)| laps.get(&current_lap).map(|pos| (driver.clone(), *pos)))
        .filter(|(driver, _)| slot_of.contains_key(driver))
        .collect();
    anchors.sort_by_key(|(_, official_pos)| *official_pos);

    for (driver, official_pos) in anchors {
        let target_idx = match (official_pos as usize).checked_sub(1) {
            Some(idx) if idx < n => idx,
            _ => continue,
        };
        let driver_idx = slot_of[&driver];
        if driver_idx == target_idx {
            continue;
        }
        let displaced = result[target_idx].clone();
        result.swap(driver_idx, target_idx);
        slot_of.insert(driver, target_idx);
        slot_of.insert(displaced, driver_idx);
    }

    result
}

/// Ties the three tiers together into one per-frame ranking. Retired
/// drivers are carried separately so they sink to the tail and stay frozen
/// there regardless of what Tier A/B/C would otherwise propose for them.
pub struct PositionEngine {
    config: PositionEngineConfig,
    smoothing: PositionSmoothing,
}

impl PositionEngine {
    pub fn new(config: PositionEngineConfig) -> Self {
        Self {
            config,
            smoothing: PositionSmoothing::new(),
        }
    }

    pub fn config(&self) -> PositionEngineConfig {
        self.config
    }

    pub fn rank_frame(
        &mut self,
        t: f64,
        track_status: TrackStatus,
        current_lap: u32,
        lap_boundaries: &LapBoundaries,
        entries: &BTreeMap<DriverCode, DriverCandidate>,
    ) -> BTreeMap<DriverCode, u16> {
        let mut active: Vec<DriverCode> = Vec::new();
        let mut retired: Vec<DriverCode> = Vec::new();

        for (code, candidate) in entries {
            if detect_retirement(candidate.status, candidate.explicit_retired) {
                retired.push(code.clone());
            } else {
                active.push(code.clone());
            }
        }

        active.sort_by(|a, b| {
            let ca = &entries[a];
            let cb = &entries[b];
            sort_key_hybrid(ca.pos_raw, ca.interval_smooth, ca.race_progress)
                .partial_cmp(&sort_key_hybrid(cb.pos_raw, cb.interval_smooth, cb.race_progress))
                .unwrap_or(Ordering::Equal)
                .then_with(|| a.cmp(b))
        });
        retired.sort();

        let smoothed = self.smoothing.apply(t, active, track_status);
        let anchored = apply_lap_anchor(smoothed, current_lap, lap_boundaries);

        let mut result = BTreeMap::new();
        for (i, code) in anchored.iter().enumerate() {
            result.insert(code.clone(), (i + 1) as u16);
        }
        let offset = anchored.len();
        for (i, code) in retired.iter().enumerate() {
            result.insert(code.clone(), (offset + i + 1) as u16);
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sort_key_hybrid_basic_sorting() {
        let ham = sort_key_hybrid(1, Some(0.5), 1000.0);
        let ver = sort_key_hybrid(2, Some(1.2), 950.0);
        let sai = sort_key_hybrid(3, Some(2.1), 900.0);
        assert_eq!(ham, (1, 0.5, -1000.0));
        assert_eq!(ver, (2, 1.2, -950.0));
        assert_eq!(sai, (3, 2.1, -900.0));
        assert!(ham < ver && ver < sai);
    }

    #[test]
    fn sort_key_hybrid_none_interval_smooth_falls_back_to_sentinel() {
        let key = sort_key_hybrid(4, None, 800.0);
        assert_eq!(key, (4, 9999.0, -800.0));
    }

    #[test]
    fn sort_key_hybrid_nan_race_progress_falls_back_to_zero() {
        let key = sort_key_hybrid(5, Some(0.1), f64::NAN);
        assert_eq!(key, (5, 0.1, 0.0));
    }

    #[test]
    fn sort_key_hybrid_retired_driver_sinks_via_sentinel_primary() {
        let key = sort_key_hybrid(0, None, 500.0);
        assert_eq!(key, (9999, 9999.0, -500.0));
    }

    #[test]
    fn sort_key_hybrid_tuple_ordering_is_lexicographic() {
        let a = sort_key_hybrid(1, Some(5.0), 0.0);
        let b = sort_key_hybrid(1, Some(1.0), 0.0);
        assert!(b < a, "lower secondary should sort first within equal primary");
    }

    #[test]
    fn position_smoothing_initial_state_adopts_first_candidate() {
        let mut sm = PositionSmoothing::new();
        let order = vec!["HAM".to_string(), "VER".to_string()];
        let accepted = sm.apply(0.0, order.clone(), TrackStatus::Green);
        assert_eq!(accepted, order);
    }

    #[test]
    fn position_smoothing_no_change_is_a_no_op() {
        let mut sm = PositionSmoothing::new();
        let order = vec!["HAM".to_string(), "VER".to_string()];
        sm.apply(0.0, order.clone(), TrackStatus::Green);
        let accepted = sm.apply(0.5, order.clone(), TrackStatus::Green);
        assert_eq!(accepted, order);
    }

    #[test]
    fn position_smoothing_change_too_fast_is_rejected() {
        let mut sm = PositionSmoothing::new();
        let order = vec!["HAM".to_string(), "VER".to_string()];
        let swapped = vec!["VER".to_string(), "HAM".to_string()];
        sm.apply(0.0, order.clone(), TrackStatus::Green);
        // well within the 1.0s green-flag hysteresis window
        let accepted = sm.apply(0.4, swapped, TrackStatus::Green);
        assert_eq!(accepted, order);
    }

    #[test]
    fn position_smoothing_change_accepted_past_threshold() {
        let mut sm = PositionSmoothing::new();
        let order = vec!["HAM".to_string(), "VER".to_string()];
        let swapped = vec!["VER".to_string(), "HAM".to_string()];
        sm.apply(0.0, order, TrackStatus::Green);
        sm.apply(0.1, swapped.clone(), TrackStatus::Green);
        let accepted = sm.apply(1.2, swapped.clone(), TrackStatus::Green);
        assert_eq!(accepted, swapped);
    }

    #[test]
    fn position_smoothing_safety_car_shortens_hysteresis() {
        let mut sm = PositionSmoothing::new();
        let order = vec!["HAM".to_string(), "VER".to_string()];
        let swapped = vec!["VER".to_string(), "HAM".to_string()];
        sm.apply(0.0, order, TrackStatus::SafetyCar);
        sm.apply(0.1, swapped.clone(), TrackStatus::SafetyCar);
        // 0.35s later clears the 0.3s SC threshold but would not clear 1.0s
        let accepted = sm.apply(0.45, swapped.clone(), TrackStatus::SafetyCar);
        assert_eq!(accepted, swapped);
    }

    #[test]
    fn position_smoothing_vsc_also_shortens_hysteresis() {
        let mut sm = PositionSmoothing::new();
        let order = vec!["HAM".to_string(), "VER".to_string()];
        let swapped = vec!["VER".to_string(), "HAM".to_string()];
        sm.apply(0.0, order, TrackStatus::Vsc);
        sm.apply(0.1, swapped.clone(), TrackStatus::Vsc);
        let accepted = sm.apply(0.45, swapped.clone(), TrackStatus::Vsc);
        assert_eq!(accepted, swapped);
    }

    #[test]
    fn position_smoothing_multiple_driver_changes_track_latest_candidate() {
        let mut sm = PositionSmoothing::new();
        let order = vec!["HAM".to_string(), "VER".to_string(), "SAI".to_string()];
        sm.apply(0.0, order, TrackStatus::Green);
        let first_candidate = vec!["VER".to_string(), "HAM".to_string(), "SAI".to_string()];
        sm.apply(0.1, first_candidate, TrackStatus::Green);
        // a different candidate arrives before the first one's window elapses;
        // the clock restarts against this new candidate
        let second_candidate = vec!["SAI".to_string(), "HAM".to_string(), "VER".to_string()];
        let accepted = sm.apply(0.5, second_candidate.clone(), TrackStatus::Green);
        assert_ne!(accepted, second_candidate);
        let accepted = sm.apply(1.6, second_candidate.clone(), TrackStatus::Green);
        assert_eq!(accepted, second_candidate);
    }

    #[test]
    fn apply_lap_anchor_no_anchors_is_identity() {
        let order = vec!["HAM".to_string(), "VER".to_string()];
        let boundaries = LapBoundaries::new();
        assert_eq!(apply_lap_anchor(order.clone(), 3, &boundaries), order);
    }

    #[test]
    fn apply_lap_anchor_partial_anchors_moves_only_anchored_driver() {
        let order = vec!["HAM".to_string(), "VER".to_string(), "SAI".to_string()];
        let mut boundaries = LapBoundaries::new();
        boundaries
            .entry("SAI".to_string())
            .or_default()
            .insert(3, 1);
        let anchored = apply_lap_anchor(order, 3, &boundaries);
        assert_eq!(anchored[0], "SAI");
    }

    #[test]
    fn apply_lap_anchor_all_drivers_anchored_reconstructs_official_order() {
        let order = vec!["HAM".to_string(), "VER".to_string(), "SAI".to_string()];
        let mut boundaries = LapBoundaries::new();
        boundaries.entry("HAM".to_string()).or_default().insert(5, 3);
        boundaries.entry("VER".to_string()).or_default().insert(5, 1);
        boundaries.entry("SAI".to_string()).or_default().insert(5, 2);
        let anchored = apply_lap_anchor(order, 5, &boundaries);
        assert_eq!(anchored, vec!["VER", "SAI", "HAM"]);
    }

    #[test]
    fn apply_lap_anchor_uses_boundaries_for_the_requested_lap_only() {
        let order = vec!["HAM".to_string(), "VER".to_string()];
        let mut boundaries = LapBoundaries::new();
        boundaries.entry("VER".to_string()).or_default().insert(2, 1);
        boundaries.entry("VER".to_string()).or_default().insert(3, 2);
        let anchored_lap2 = apply_lap_anchor(order.clone(), 2, &boundaries);
        assert_eq!(anchored_lap2[0], "VER");
        let anchored_lap4 = apply_lap_anchor(order.clone(), 4, &boundaries);
        assert_eq!(anchored_lap4, order);
    }

    #[test]
    fn apply_lap_anchor_missing_lap_boundary_is_identity() {
        let order = vec!["HAM".to_string(), "VER".to_string()];
        let mut boundaries = LapBoundaries::new();
        boundaries.entry("HAM".to_string()).or_default().insert(1, 1);
        assert_eq!(apply_lap_anchor(order.clone(), 9, &boundaries), order);
    }

    #[test]
    fn apply_lap_anchor_empty_order_returns_empty() {
        let boundaries = LapBoundaries::new();
        assert!(apply_lap_anchor(Vec::new(), 1, &boundaries).is_empty());
    }

    #[test]
    fn apply_lap_anchor_single_driver_is_identity() {
        let order = vec!["HAM".to_string()];
        let mut boundaries = LapBoundaries::new();
        boundaries.entry("HAM".to_string()).or_default().insert(1, 1);
        assert_eq!(apply_lap_anchor(order.clone(), 1, &boundaries), order);
    }

    #[test]
    fn detect_retirement_from_status() {
        assert!(detect_retirement(DriverStatus::Retired, false));
        assert!(!detect_retirement(DriverStatus::Running, false));
    }

    #[test]
    fn detect_retirement_explicit_flag_overrides_status() {
        assert!(detect_retirement(DriverStatus::Running, true));
    }

    #[test]
    fn position_coverage_good_and_poor_and_empty() {
        assert!((position_coverage(20, 20) - 1.0).abs() < 1e-12);
        assert!((position_coverage(20, 5) - 0.25).abs() < 1e-12);
        assert_eq!(position_coverage(0, 0), 0.0);
    }

    #[test]
    fn position_engine_sinks_retired_drivers_to_the_tail() {
        let mut engine = PositionEngine::new(PositionEngineConfig::default());
        let mut entries = BTreeMap::new();
        entries.insert(
            "HAM".to_string(),
            DriverCandidate {
                pos_raw: 2,
                interval_smooth: Some(0.8),
                race_progress: 900.0,
                status: DriverStatus::Running,
                explicit_retired: false,
            },
        );
        entries.insert(
            "RET".to_string(),
            DriverCandidate {
                pos_raw: 0,
                interval_smooth: None,
                race_progress: 500.0,
                status: DriverStatus::Retired,
                explicit_retired: false,
            },
        );
        entries.insert(
            "VER".to_string(),
            DriverCandidate {
                pos_raw: 1,
                interval_smooth: Some(0.0),
                race_progress: 1000.0,
                status: DriverStatus::Running,
                explicit_retired: false,
            },
        );
        let boundaries = LapBoundaries::new();
        let ranked = engine.rank_frame(0.0, TrackStatus::Green, 1, &boundaries, &entries);
        assert_eq!(ranked["VER"], 1);
        assert_eq!(ranked["HAM"], 2);
        assert_eq!(ranked["RET"], 3);
    }
}
