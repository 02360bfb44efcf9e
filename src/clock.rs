use chrono::{DateTime, Datelike, NaiveDateTime, Timelike, Utc, Weekday};
use chrono_tz::Tz;

use crate::config::BusinessHoursConfig;

/// Time-of-day band used by the planner and (indirectly) the score engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Band {
    Peak,
    Normal,
    Low,
}

impl Band {
    pub fn as_str(&self) -> &'static str {
        match self {
            Band::Peak => "PEAK",
            Band::Normal => "NORMAL",
            Band::Low => "LOW",
        }
    }
}

/// Projects an absolute instant into a mailbox's local time zone.
pub fn now_in(tz: Tz) -> NaiveDateTime {
    Utc::now().with_timezone(&tz).naive_local()
}

pub fn to_local(instant: DateTime<Utc>, tz: Tz) -> NaiveDateTime {
    instant.with_timezone(&tz).naive_local()
}

/// Weekday Mon-Fri and within [start_hour, end_hour).
pub fn is_business_hours(local_dt: NaiveDateTime, cfg: &BusinessHoursConfig) -> bool {
    !is_weekend(local_dt)
        && local_dt.time().hour() as u32 >= cfg.start_hour
        && (local_dt.time().hour() as u32) < cfg.end_hour
}

pub fn is_weekend(local_dt: NaiveDateTime) -> bool {
    matches!(local_dt.weekday(), Weekday::Sat | Weekday::Sun)
}

/// Fixed hour ranges: PEAK = [9,11) ∪ [14,16); LOW = [12,14); NORMAL = [11,12) ∪ [16,18).
/// These bucket boundaries are independent of the configurable business-hours
/// window; they describe *shape* of the day, not its edges.
pub fn band_for(local_hour: u32) -> Band {
    match local_hour {
        9 | 10 | 14 | 15 => Band::Peak,
        12 | 13 => Band::Low,
        11 | 16 | 17 => Band::Normal,
        _ => Band::Normal,
    }
}
