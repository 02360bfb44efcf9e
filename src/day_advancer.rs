use chrono::NaiveDate;
use sqlx::PgPool;
use std::sync::Arc;

use crate::clock::now_in;
use crate::error::EngineResult;
use crate::models::Mailbox;
use crate::phase::{is_phase_boundary, phase_for};
use crate::schedule_store::ScheduleStore;

/// Advances each sender's `warmup_day` once per local calendar day and
/// recomputes `daily_limit` from the phase table. `last_advance_date`
/// guarantees at-most-once-per-local-day even if the tick interval fires
/// more often than daily (it usually does). Also applies the Schedule
/// Store's 7-day PlanEntry retention window, since both are naturally
/// once-a-day-scale housekeeping sharing this loop's cadence.
pub struct DayAdvancer {
    pool: Arc<PgPool>,
    store: ScheduleStore,
    retention: chrono::Duration,
}

#[derive(Debug, Default)]
pub struct DayAdvanceReport {
    pub advanced: u32,
    pub phase_transitions: u32,
    pub purged: u64,
}

/// The fields E6 (spec §8) requires a phase-transition record to carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PhaseTransitionRecord {
    pub mailbox_id: i64,
    pub from_phase: u8,
    pub to_phase: u8,
    pub old_limit: i32,
    pub new_limit: i32,
}

impl DayAdvancer {
    pub fn new(pool: Arc<PgPool>, retention: chrono::Duration) -> Self {
        Self {
            store: ScheduleStore::new(pool.clone()),
            pool,
            retention,
        }
    }

    pub async fn tick(&self) -> EngineResult<DayAdvanceReport> {
        let mut report = DayAdvanceReport::default();
        report.purged = self.store.purge(self.retention).await?;
        let senders = self.active_senders().await?;

        for sender in senders {
            let tz = match sender.parsed_tz() {
                Ok(tz) => tz,
                Err(e) => {
                    tracing::warn!(mailbox_id = sender.id, error = %e, "invalid timezone, skipping advance");
                    continue;
                }
            };
            let local_today = now_in(tz).date();

            if sender.last_advance_date == Some(local_today) {
                continue;
            }

            let target = match sender.target {
                Some(t) => t,
                None => continue,
            };

            let old_phase = phase_for(sender.warmup_day, target).phase;
            let old_limit = sender.daily_limit;

            let next_day = sender.warmup_day + 1;
            let result = phase_for(next_day, target);

            self.advance(sender.id, next_day, result.daily_limit, local_today)
                .await?;
            report.advanced += 1;

            if is_phase_boundary(next_day) {
                report.phase_transitions += 1;
                let record = PhaseTransitionRecord {
                    mailbox_id: sender.id,
                    from_phase: old_phase,
                    to_phase: result.phase,
                    old_limit,
                    new_limit: result.daily_limit,
                };
                tracing::info!(
                    mailbox_id = record.mailbox_id,
                    from_phase = record.from_phase,
                    to_phase = record.to_phase,
                    old_limit = record.old_limit,
                    new_limit = record.new_limit,
                    "warmup phase transition"
                );
            }
        }

        Ok(report)
    }

    async fn advance(
        &self,
        mailbox_id: i64,
        warmup_day: i32,
        daily_limit: i32,
        local_today: NaiveDate,
    ) -> EngineResult<()> {
        sqlx::query(
            r#"
            UPDATE mailboxes
            SET warmup_day = $2, daily_limit = $3, last_advance_date = $4, updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(mailbox_id)
        .bind(warmup_day)
        .bind(daily_limit)
        .bind(local_today)
        .execute(self.pool.as_ref())
        .await?;
        Ok(())
    }

    async fn active_senders(&self) -> EngineResult<Vec<Mailbox>> {
        let rows = sqlx::query_as::<_, Mailbox>(
            r#"
            SELECT id, email, provider, role, credentials_enc, credentials_key_id, active, tz, target,
                   warmup_day, daily_limit, open_rate_target, reply_rate_target, score,
                   needs_reauth, last_advance_date, created_at, updated_at
            FROM mailboxes WHERE active = TRUE AND role = 'SENDER'
            "#,
        )
        .fetch_all(self.pool.as_ref())
        .await?;
        Ok(rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn phase_boundary_fires_at_day_one_after_zero() {
        // A sender at warmup_day=0 advancing to day 1 crosses the first
        // phase boundary and should be counted as a transition.
        assert!(is_phase_boundary(1));
        assert_eq!(phase_for(1, 40).phase, 1);
    }

    #[test]
    fn non_boundary_day_keeps_same_phase() {
        assert!(!is_phase_boundary(5));
        assert_eq!(phase_for(4, 40).phase, phase_for(5, 40).phase);
    }

    #[test]
    fn e6_phase_transition_record_carries_from_and_to() {
        // Sender at warmup_day=7, target=50 advancing to day 8 per E6.
        let target = 50;
        let old = phase_for(7, target);
        let next_day = 8;
        let new = phase_for(next_day, target);

        let record = PhaseTransitionRecord {
            mailbox_id: 1,
            from_phase: old.phase,
            to_phase: new.phase,
            old_limit: old.daily_limit,
            new_limit: new.daily_limit,
        };

        assert_eq!(record.from_phase, 1);
        assert_eq!(record.to_phase, 2);
        assert_eq!(record.old_limit, 5);
        assert_eq!(record.new_limit, 12);
    }
}
