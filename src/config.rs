use crate::models::{
    DEFAULT_DAY_DURATION_HOURS, DEFAULT_TOTAL_DAYS, MAX_DAY_DURATION_HOURS, MAX_TOTAL_DAYS,
};
use crate::reconcile::DEFAULT_INTERVAL;
use crate::repository::ChallengeDefaults;
use std::{env, path::PathBuf, time::Duration};

#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub data_path: PathBuf,
    pub marker_path: PathBuf,
    pub reconcile_interval: Duration,
    pub defaults: ChallengeDefaults,
}

impl Config {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Builds the config from any key lookup; unparsable values fall back to defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let data_path = lookup("APP_DATA_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("data/state.json"));
        let marker_path = lookup("APP_MARKER_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|| data_path.with_file_name("markers.json"));

        Self {
            port: parsed(&lookup, "PORT").unwrap_or(8080),
            data_path,
            marker_path,
            reconcile_interval: parsed(&lookup, "RECONCILE_INTERVAL_SECS")
                .filter(|secs| *secs > 0)
                .map(Duration::from_secs)
                .unwrap_or(DEFAULT_INTERVAL),
            defaults: ChallengeDefaults {
                challenge_id: lookup("CHALLENGE_ID").filter(|id| !id.trim().is_empty()),
                total_days: parsed(&lookup, "CHALLENGE_TOTAL_DAYS")
                    .filter(|days| (1..=MAX_TOTAL_DAYS).contains(days))
                    .unwrap_or(DEFAULT_TOTAL_DAYS),
                day_duration: parsed(&lookup, "CHALLENGE_DAY_DURATION_HOURS")
                    .filter(|hours| (1..=MAX_DAY_DURATION_HOURS).contains(hours))
                    .unwrap_or(DEFAULT_DAY_DURATION_HOURS),
                trial_enabled: parsed(&lookup, "CHALLENGE_TRIAL_ENABLED").unwrap_or(true),
            },
        }
    }
}

fn parsed<T: std::str::FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<T> {
    lookup(key).and_then(|value| value.trim().parse().ok())
}
