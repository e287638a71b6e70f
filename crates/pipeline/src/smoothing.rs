//! Interval smoothing, ported from `_smooth_interval_data` in the original
//! implementation: a Savitzky-Golay-style filter, window 5, polynomial
//! order 1.
//!
//! For a symmetric window a first-order (linear) least-squares fit's
//! intercept at the window's center is exactly the arithmetic mean of the
//! window (the odd terms cancel by symmetry), so this reduces to a
//! NaN-skipping moving average with a half-window of 2, clipped at the
//! series ends rather than padded.

const HALF_WINDOW: usize = 2;

/// Smooth a per-driver `interval_smooth` series. `None` entries are left as
/// `None` (a car with no interval reading stays unreadable) but still
/// contribute no value to neighboring windows; they are simply skipped.
pub fn smooth_interval_series(values: &[Option<f64>]) -> Vec<Option<f64>> {
    if values.is_empty() {
        return Vec::new();
    }

    values
        .iter()
        .enumerate()
        .map(|(i, v)| {
            v.as_ref()?;
            let lo = i.saturating_sub(HALF_WINDOW);
            let hi = (i + HALF_WINDOW).min(values.len() - 1);
            let mut sum = 0.0;
            let mut count = 0usize;
            for value in values[lo..=hi].iter().flatten() {
                sum += *value;
                count += 1;
            }
            if count == 0 {
                None
            } else {
                Some(sum / count as f64)
            }
        })
        .collect()
}
