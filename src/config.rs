use std::env;
use std::time::Duration;

/// Business-hours window, local to each mailbox's own `tz`.
#[derive(Debug, Clone)]
pub struct BusinessHoursConfig {
    pub start_hour: u32,
    pub end_hour: u32,
}

impl Default for BusinessHoursConfig {
    fn default() -> Self {
        Self {
            start_hour: 9,
            end_hour: 18,
        }
    }
}

#[derive(Debug, Clone)]
pub struct BandWeights {
    pub peak: f64,
    pub normal: f64,
    pub low: f64,
}

impl Default for BandWeights {
    fn default() -> Self {
        Self {
            peak: 0.60,
            normal: 0.30,
            low: 0.10,
        }
    }
}

#[derive(Debug, Clone)]
pub struct EngagementConfig {
    pub open_delay_min: Duration,
    pub open_delay_max: Duration,
    pub reply_delay_min: Duration,
    pub reply_delay_max: Duration,
    pub star_probability: f64,
}

impl Default for EngagementConfig {
    fn default() -> Self {
        Self {
            open_delay_min: Duration::from_secs(30),
            open_delay_max: Duration::from_secs(10 * 60),
            reply_delay_min: Duration::from_secs(5 * 60),
            reply_delay_max: Duration::from_secs(30 * 60),
            star_probability: 0.20,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Intervals {
    pub dispatch: Duration,
    pub engagement: Duration,
    pub reply_poll: Duration,
    pub spam_recovery: Duration,
    pub score: Duration,
    pub day_advance: Duration,
}

impl Default for Intervals {
    fn default() -> Self {
        Self {
            dispatch: Duration::from_secs(2 * 60),
            engagement: Duration::from_secs(3 * 60),
            reply_poll: Duration::from_secs(5 * 60),
            spam_recovery: Duration::from_secs(6 * 60 * 60),
            score: Duration::from_secs(6 * 60 * 60),
            day_advance: Duration::from_secs(60 * 60),
        }
    }
}

#[derive(Debug, Clone)]
pub struct PlanConfig {
    pub grace_window: Duration,
    pub fire_window: Duration,
    pub retention: Duration,
}

impl Default for PlanConfig {
    fn default() -> Self {
        Self {
            grace_window: Duration::from_secs(5 * 60),
            fire_window: Duration::from_secs(2 * 60),
            retention: Duration::from_secs(7 * 24 * 60 * 60),
        }
    }
}

#[derive(Clone)]
pub struct Config {
    pub database_url: String,
    pub encryption_key: Option<String>,
    pub business_hours: BusinessHoursConfig,
    pub band_weights: BandWeights,
    pub engagement: EngagementConfig,
    pub intervals: Intervals,
    pub plan: PlanConfig,
    pub score_window_days: i64,
}

impl std::fmt::Debug for Config {
    /// `encryption_key` and `database_url` (which may carry a password in
    /// its connection string) are redacted; only the tunable knobs are
    /// useful to see in a log line anyway.
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field("database_url", &"<redacted>")
            .field("encryption_key", &self.encryption_key.as_ref().map(|_| "<redacted>"))
            .field("business_hours", &self.business_hours)
            .field("band_weights", &self.band_weights)
            .field("engagement", &self.engagement)
            .field("intervals", &self.intervals)
            .field("plan", &self.plan)
            .field("score_window_days", &self.score_window_days)
            .finish()
    }
}

impl Config {
    pub fn from_env() -> Self {
        Self {
            database_url: env::var("DATABASE_URL").expect("DATABASE_URL must be set"),
            encryption_key: env::var("ENCRYPTION_KEY").ok(),
            business_hours: BusinessHoursConfig {
                start_hour: env_parse("BUSINESS_HOURS_START", 9),
                end_hour: env_parse("BUSINESS_HOURS_END", 18),
            },
            band_weights: BandWeights {
                peak: env_parse("BANDS_PEAK_WEIGHT", 0.60),
                normal: env_parse("BANDS_NORMAL_WEIGHT", 0.30),
                low: env_parse("BANDS_LOW_WEIGHT", 0.10),
            },
            engagement: EngagementConfig::default(),
            intervals: Intervals::default(),
            plan: PlanConfig::default(),
            score_window_days: env_parse("SCORE_WINDOW_DAYS", 30),
        }
    }
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}
