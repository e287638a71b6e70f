//! Process-wide configuration, in the same typed-struct-with-`Default`
//! idiom as the teacher's per-title `F1Config`/`GT7Config`. Every field is
//! env-overridable via `REPLAY_*` so a deployment never needs a recompile
//! to change the cache directory or tune the position engine threshold.

use pipeline::{BuildConfig, PositionEngineConfig};

#[derive(Debug, Clone)]
pub struct ReplayConfig {
    pub cache_dir: String,
    pub build: BuildConfig,
}

impl Default for ReplayConfig {
    fn default() -> Self {
        Self {
            cache_dir: "./.replay-cache".into(),
            build: BuildConfig::default(),
        }
    }
}

impl ReplayConfig {
    /// Overlay `REPLAY_CACHE_DIR` / `REPLAY_COVERAGE_THRESHOLD` on top of
    /// the defaults, matching the env-override convention the original
    /// implementation used for its own settings module.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Ok(dir) = std::env::var("REPLAY_CACHE_DIR") {
            config.cache_dir = dir;
        }
        if let Ok(raw) = std::env::var("REPLAY_COVERAGE_THRESHOLD") {
            if let Ok(threshold) = raw.parse::<f64>() {
                config.build.position_engine = PositionEngineConfig {
                    coverage_threshold: threshold,
                };
            }
        }
        config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_the_documented_coverage_threshold() {
        let config = ReplayConfig::default();
        assert_eq!(config.build.position_engine.coverage_threshold, 0.8);
    }
}
