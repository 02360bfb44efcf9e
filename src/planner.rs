use chrono::{DateTime, Duration as ChronoDuration, NaiveDate, TimeZone, Utc};
use chrono_tz::Tz;

use crate::clock::{is_business_hours, is_weekend, Band};
use crate::config::{BandWeights, BusinessHoursConfig};
use crate::rand_source::RandSource;

#[derive(Debug, Clone)]
pub struct PlannedSend {
    pub fire_at: DateTime<Utc>,
    pub band: Band,
}

/// Splits `n` into (peak, normal, low) counts per the configured weights,
/// rounding peak and low independently and assigning the remainder to
/// normal so the three always sum exactly to `n`.
pub fn band_counts(n: i32, weights: &BandWeights) -> (i32, i32, i32) {
    if n <= 0 {
        return (0, 0, 0);
    }
    let n_peak = (weights.peak * n as f64).round() as i32;
    let n_low = (weights.low * n as f64).round() as i32;
    let n_peak = n_peak.clamp(0, n);
    let n_low = n_low.clamp(0, n - n_peak);
    let n_normal = n - n_peak - n_low;
    (n_peak, n_normal, n_low)
}

/// Hour ranges (local, half-open) covered by each band, restricted to the
/// configured business-hours window.
fn band_hour_ranges(band: Band, hours: &BusinessHoursConfig) -> Vec<(u32, u32)> {
    let candidates: &[(u32, u32)] = match band {
        Band::Peak => &[(9, 11), (14, 16)],
        Band::Low => &[(12, 14)],
        Band::Normal => &[(11, 12), (16, 18)],
    };
    candidates
        .iter()
        .filter_map(|&(s, e)| {
            let s = s.max(hours.start_hour);
            let e = e.min(hours.end_hour);
            if s < e {
                Some((s, e))
            } else {
                None
            }
        })
        .collect()
}

/// Produces an ordered list of absolute send timestamps for one sender on
/// one local calendar date. Empty on weekends. The returned list is sorted,
/// strictly increasing with >= 60s spacing, and its band split is the
/// deterministic function of `daily_limit` computed by [`band_counts`].
#[allow(clippy::too_many_arguments)]
pub fn plan_day(
    local_date: NaiveDate,
    daily_limit: i32,
    tz: Tz,
    hours: &BusinessHoursConfig,
    weights: &BandWeights,
    rand: &dyn RandSource,
) -> Vec<PlannedSend> {
    if daily_limit <= 0 {
        return vec![];
    }
    if is_weekend(local_date.and_hms_opt(12, 0, 0).unwrap()) {
        return vec![];
    }

    let (n_peak, n_normal, n_low) = band_counts(daily_limit, weights);
    let mut local_times: Vec<(chrono::NaiveDateTime, Band)> = Vec::with_capacity(daily_limit as usize);

    for (band, count) in [(Band::Peak, n_peak), (Band::Normal, n_normal), (Band::Low, n_low)] {
        let ranges = band_hour_ranges(band, hours);
        if ranges.is_empty() {
            continue;
        }
        let total_minutes: u32 = ranges.iter().map(|&(s, e)| (e - s) * 60).sum();
        if total_minutes == 0 {
            continue;
        }

        let mut placed = 0;
        let mut guard = 0;
        while placed < count && guard < count * 50 + 50 {
            guard += 1;
            let offset_minutes = rand.uniform(0.0, total_minutes as f64) as u32;
            let mut remaining = offset_minutes;
            let mut chosen_hour = ranges[0].0;
            let mut chosen_minute = 0u32;
            for &(s, e) in &ranges {
                let span = (e - s) * 60;
                if remaining < span {
                    chosen_hour = s + remaining / 60;
                    chosen_minute = remaining % 60;
                    break;
                }
                remaining -= span;
            }

            let base = local_date.and_hms_opt(chosen_hour, chosen_minute, 0).unwrap();
            let jitter_minutes = rand.gaussian_ish(0.0, 3.0);
            let jitter_seconds = rand.uniform(-30.0, 30.0);
            let candidate = base
                + ChronoDuration::seconds((jitter_minutes * 60.0) as i64)
                + ChronoDuration::seconds(jitter_seconds as i64);

            if !is_business_hours(candidate, hours) {
                continue;
            }
            if local_times
                .iter()
                .any(|(t, _)| (*t - candidate).num_seconds().abs() < 60)
            {
                continue;
            }

            local_times.push((candidate, band));
            placed += 1;
        }
    }

    local_times.sort_by_key(|(t, _)| *t);

    local_times
        .into_iter()
        .map(|(local_dt, band)| {
            let utc = tz
                .from_local_datetime(&local_dt)
                .single()
                .unwrap_or_else(|| tz.from_utc_datetime(&local_dt))
                .with_timezone(&Utc);
            PlannedSend { fire_at: utc, band }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rand_source::SeededRandSource;
    use chrono::NaiveDate;

    #[test]
    fn band_counts_sum_exactly() {
        let weights = BandWeights::default();
        for n in 0..200 {
            let (p, no, l) = band_counts(n, &weights);
            assert_eq!(p + no + l, n);
        }
    }

    #[test]
    fn band_counts_within_one_of_target_share() {
        let weights = BandWeights::default();
        for n in [10, 20, 50, 100] {
            let (p, _, l) = band_counts(n, &weights);
            assert!((p as f64 - 0.6 * n as f64).abs() <= 1.0);
            assert!((l as f64 - 0.1 * n as f64).abs() <= 1.0);
        }
    }

    #[test]
    fn e1_phase_one_plan_size_and_bands() {
        let rand = SeededRandSource::new(1);
        let hours = BusinessHoursConfig::default();
        let weights = BandWeights::default();
        let tz: Tz = "Asia/Kolkata".parse().unwrap();
        let date = NaiveDate::from_ymd_opt(2025, 10, 6).unwrap(); // Monday

        let plan = plan_day(date, 5, tz, &hours, &weights, &rand);
        assert_eq!(plan.len(), 5);

        let peak = plan.iter().filter(|p| matches!(p.band, Band::Peak)).count();
        let normal = plan.iter().filter(|p| matches!(p.band, Band::Normal)).count();
        let low = plan.iter().filter(|p| matches!(p.band, Band::Low)).count();
        assert_eq!((peak, normal, low), (3, 1, 1));

        for w in plan.windows(2) {
            assert!(w[1].fire_at > w[0].fire_at);
            assert!((w[1].fire_at - w[0].fire_at).num_seconds() >= 60);
        }

        for send in &plan {
            let local = send.fire_at.with_timezone(&tz).naive_local();
            assert!(is_business_hours(local, &hours));
        }
    }

    #[test]
    fn e2_weekend_plan_is_empty() {
        let rand = SeededRandSource::new(2);
        let hours = BusinessHoursConfig::default();
        let weights = BandWeights::default();
        let tz: Tz = "Asia/Kolkata".parse().unwrap();
        let saturday = NaiveDate::from_ymd_opt(2025, 10, 11).unwrap();

        let plan = plan_day(saturday, 5, tz, &hours, &weights, &rand);
        assert!(plan.is_empty());
    }

    #[test]
    fn minimum_spacing_holds_for_larger_plans() {
        let rand = SeededRandSource::new(99);
        let hours = BusinessHoursConfig::default();
        let weights = BandWeights::default();
        let tz: Tz = "UTC".parse().unwrap();
        let date = NaiveDate::from_ymd_opt(2025, 10, 6).unwrap();

        let plan = plan_day(date, 40, tz, &hours, &weights, &rand);
        for w in plan.windows(2) {
            assert!((w[1].fire_at - w[0].fire_at).num_seconds() >= 60);
        }
    }
}
