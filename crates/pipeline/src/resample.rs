//! Stage 2-3 of the frame builder: linear GPS resampling onto the uniform
//! grid, then first-difference speed and trapezoidal cumulative distance.

use ingest_core::PositionRow;

/// Resample one driver's raw GPS rows onto `grid`. `None` before the
/// driver's first sample ("not yet on track"); frozen at the last known
/// position for every grid point at or after the last sample.
pub fn resample_position_series(rows: &[PositionRow], grid: &[f64]) -> Vec<Option<(f32, f32)>> {
    if rows.is_empty() {
        return vec![None; grid.len()];
    }

    let first_t = rows[0].t;
    let last = rows[rows.len() - 1];
    let mut seg = 0usize;
    let mut out = Vec::with_capacity(grid.len());

    for &t in grid {
        if t < first_t {
            out.push(None);
            continue;
        }
        if t >= last.t {
            out.push(Some((last.x as f32, last.y as f32)));
            continue;
        }
        while seg + 1 < rows.len() && rows[seg + 1].t <= t {
            seg += 1;
        }
        let a = rows[seg];
        let b = rows[(seg + 1).min(rows.len() - 1)];
        if (b.t - a.t).abs() < f64::EPSILON {
            out.push(Some((a.x as f32, a.y as f32)));
            continue;
        }
        let frac = (t - a.t) / (b.t - a.t);
        let x = a.x + (b.x - a.x) * frac;
        let y = a.y + (b.y - a.y) * frac;
        out.push(Some((x as f32, y as f32)));
    }

    out
}

/// First-difference speed (km/h, clamped to `[0, 400]`) and cumulative
/// trapezoidal distance (metres) over a resampled position series.
pub fn speed_and_distance(points: &[Option<(f32, f32)>], dt: f64) -> (Vec<f32>, Vec<f64>) {
    let n = points.len();
    let mut speed_kph = vec![0.0f32; n];
    let mut dist_m = vec![0.0f64; n];
    let mut prev_point: Option<(f32, f32)> = None;
    let mut prev_speed_mps = 0.0f64;
    let mut cumulative = 0.0f64;

    for i in 0..n {
        match (prev_point, points[i]) {
            (Some((px, py)), Some((x, y))) => {
                let dx = (x - px) as f64;
                let dy = (y - py) as f64;
                let step_m = (dx * dx + dy * dy).sqrt();
                let speed_mps = (step_m / dt).max(0.0);
                let speed_mps_clamped = speed_mps.min(400.0 / 3.6);
                speed_kph[i] = (speed_mps_clamped * 3.6) as f32;
                cumulative += 0.5 * (prev_speed_mps + speed_mps_clamped) * dt;
                dist_m[i] = cumulative;
                prev_speed_mps = speed_mps_clamped;
            }
            _ => {
                dist_m[i] = cumulative;
                prev_speed_mps = 0.0;
            }
        }
        prev_point = points[i];
    }

    (speed_kph, dist_m)
}
