/// Maps (warmup_day, target) to a ramp phase and today's daily send limit.
///
/// Day 0 means "not started": phase 1, limit 0. Phases 1-5 follow the fixed
/// weekly bands in the spec; phase 5 (day >= 29) sends at `target`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PhaseResult {
    pub phase: u8,
    pub daily_limit: i32,
}

pub fn phase_for(warmup_day: i32, target: i32) -> PhaseResult {
    if warmup_day <= 0 {
        return PhaseResult {
            phase: 1,
            daily_limit: 0,
        };
    }

    let (phase, limit) = match warmup_day {
        1..=7 => (1, (0.10 * target as f64).floor() as i32),
        8..=14 => (2, (0.25 * target as f64).floor() as i32),
        15..=21 => (3, (0.50 * target as f64).floor() as i32),
        22..=28 => (4, (0.75 * target as f64).floor() as i32),
        _ => (5, target),
    };

    let floor = match phase {
        1 => 5,
        2 => 10,
        3 => 15,
        4 => 20,
        _ => 0,
    };

    PhaseResult {
        phase,
        daily_limit: limit.max(floor),
    }
}

/// Day numbers on which a phase boundary is crossed (used by the Day
/// Advancer to decide whether to emit a phase-transition log record).
pub fn is_phase_boundary(warmup_day: i32) -> bool {
    matches!(warmup_day, 1 | 8 | 15 | 22 | 29)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn day_zero_is_inactive() {
        let r = phase_for(0, 50);
        assert_eq!(r.phase, 1);
        assert_eq!(r.daily_limit, 0);
    }

    #[test]
    fn phase_one_floor_applies() {
        // target=30 -> 0.10*30 = 3, floored by the phase-1 minimum of 5.
        let r = phase_for(1, 30);
        assert_eq!(r.phase, 1);
        assert_eq!(r.daily_limit, 5);
    }

    #[test]
    fn phase_progression_for_target_50() {
        assert_eq!(phase_for(1, 50).daily_limit, 5);
        assert_eq!(phase_for(7, 50).daily_limit, 5);
        assert_eq!(phase_for(8, 50).daily_limit, 12);
        assert_eq!(phase_for(14, 50).daily_limit, 12);
        assert_eq!(phase_for(15, 50).daily_limit, 25);
        assert_eq!(phase_for(22, 50).daily_limit, 37);
        assert_eq!(phase_for(29, 50).daily_limit, 50);
        assert_eq!(phase_for(100, 50).daily_limit, 50);
    }

    #[test]
    fn phase_boundaries() {
        for d in [1, 8, 15, 22, 29] {
            assert!(is_phase_boundary(d));
        }
        for d in [0, 2, 7, 9, 14, 16, 21, 23, 28, 30] {
            assert!(!is_phase_boundary(d));
        }
    }
}
