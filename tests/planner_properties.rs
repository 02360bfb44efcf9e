use chrono::NaiveDate;
use chrono_tz::Tz;
use proptest::prelude::*;
use warmup_engine::clock::is_business_hours;
use warmup_engine::config::{BandWeights, BusinessHoursConfig};
use warmup_engine::planner::{band_counts, plan_day};
use warmup_engine::rand_source::SeededRandSource;

proptest! {
    /// Invariant #4: for N >= 10, the peak/low band shares stay within one
    /// of the configured weight's exact share.
    #[test]
    fn band_distribution_within_one_of_share(n in 10i32..500) {
        let weights = BandWeights::default();
        let (peak, normal, low) = band_counts(n, &weights);

        prop_assert_eq!(peak + normal + low, n);
        prop_assert!((peak as f64 - weights.peak * n as f64).abs() <= 1.0);
        prop_assert!((low as f64 - weights.low * n as f64).abs() <= 1.0);
    }

    /// Invariants #2 and #3: every planned send falls inside business
    /// hours on a weekday, and adjacent sends in one day's plan are at
    /// least 60 seconds apart.
    #[test]
    fn plan_respects_business_hours_and_spacing(
        seed in any::<u64>(),
        daily_limit in 1i32..60,
    ) {
        let rand = SeededRandSource::new(seed);
        let hours = BusinessHoursConfig::default();
        let weights = BandWeights::default();
        let tz: Tz = "America/New_York".parse().unwrap();
        let monday = NaiveDate::from_ymd_opt(2025, 10, 6).unwrap();

        let plan = plan_day(monday, daily_limit, tz, &hours, &weights, &rand);

        for send in &plan {
            let local = send.fire_at.with_timezone(&tz).naive_local();
            prop_assert!(is_business_hours(local, &hours));
        }

        for pair in plan.windows(2) {
            let gap = (pair[1].fire_at - pair[0].fire_at).num_seconds();
            prop_assert!(gap >= 60);
            prop_assert!(pair[1].fire_at > pair[0].fire_at);
        }
    }

    /// Weekends never produce a plan, regardless of daily_limit.
    #[test]
    fn weekend_plan_always_empty(daily_limit in 0i32..200) {
        let rand = SeededRandSource::new(1);
        let hours = BusinessHoursConfig::default();
        let weights = BandWeights::default();
        let tz: Tz = "UTC".parse().unwrap();
        let saturday = NaiveDate::from_ymd_opt(2025, 10, 11).unwrap();

        let plan = plan_day(saturday, daily_limit, tz, &hours, &weights, &rand);
        prop_assert!(plan.is_empty());
    }
}
