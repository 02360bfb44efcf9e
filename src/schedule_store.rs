use chrono::{DateTime, NaiveDate, Utc};
use sqlx::PgPool;
use std::sync::Arc;

use crate::clock::Band;
use crate::error::EngineResult;
use crate::models::{PlanEntry, PlanEntryStatus};
use crate::planner::PlannedSend;

pub struct ScheduleStore {
    pool: Arc<PgPool>,
}

impl ScheduleStore {
    pub fn new(pool: Arc<PgPool>) -> Self {
        Self { pool }
    }

    /// Idempotent. If the sender already has a PENDING plan for this date
    /// and no entry in it has reached SENT, the existing PENDING rows are
    /// replaced; otherwise the call is a no-op (the one-way PENDING->SENT
    /// invariant forbids rewriting a day that has already started sending).
    pub async fn upsert_plan(
        &self,
        sender_id: i64,
        local_date: NaiveDate,
        sends: &[PlannedSend],
    ) -> EngineResult<usize> {
        let mut tx = self.pool.begin().await?;

        let any_sent: Option<i64> = sqlx::query_scalar(
            "SELECT 1 FROM plan_entries WHERE sender_id = $1 AND local_date = $2 AND status = 'SENT' LIMIT 1",
        )
        .bind(sender_id)
        .bind(local_date)
        .fetch_optional(&mut *tx)
        .await?;

        if any_sent.is_some() {
            tx.commit().await?;
            return Ok(0);
        }

        sqlx::query(
            "DELETE FROM plan_entries WHERE sender_id = $1 AND local_date = $2 AND status = 'PENDING'",
        )
        .bind(sender_id)
        .bind(local_date)
        .execute(&mut *tx)
        .await?;

        for send in sends {
            sqlx::query(
                r#"
                INSERT INTO plan_entries (sender_id, local_date, fire_at, band, status, attempts, created_at, updated_at)
                VALUES ($1, $2, $3, $4, 'PENDING', 0, NOW(), NOW())
                "#,
            )
            .bind(sender_id)
            .bind(local_date)
            .bind(send.fire_at)
            .bind(band_str(send.band))
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(sends.len())
    }

    /// PENDING entries whose fire_at falls in `(now - grace, now + window]`.
    pub async fn due_pending(
        &self,
        now: DateTime<Utc>,
        grace: chrono::Duration,
        window: chrono::Duration,
    ) -> EngineResult<Vec<PlanEntry>> {
        let from = now - grace;
        let to = now + window;
        let rows = sqlx::query_as::<_, PlanEntry>(
            r#"
            SELECT id, sender_id, local_date, fire_at, band, status, message_id, attempts,
                   last_error, created_at, updated_at
            FROM plan_entries
            WHERE status = 'PENDING' AND fire_at > $1 AND fire_at <= $2
            ORDER BY fire_at ASC
            "#,
        )
        .bind(from)
        .bind(to)
        .fetch_all(self.pool.as_ref())
        .await?;
        Ok(rows)
    }

    pub async fn has_any_for_date(&self, sender_id: i64, local_date: NaiveDate) -> EngineResult<bool> {
        let row: Option<i64> = sqlx::query_scalar(
            "SELECT 1 FROM plan_entries WHERE sender_id = $1 AND local_date = $2 LIMIT 1",
        )
        .bind(sender_id)
        .bind(local_date)
        .fetch_optional(self.pool.as_ref())
        .await?;
        Ok(row.is_some())
    }

    /// Atomically claims a single PENDING row by transitioning it to SENT,
    /// returning `false` (no error) if another worker already claimed it.
    /// `PlanEntry.status` is one-way PENDING -> {SENT|FAILED|SKIPPED}; this
    /// conditional UPDATE is what makes that transition race-free without a
    /// row lock held across the mail-client call.
    pub async fn try_mark_sent(&self, entry_id: i64, message_id: i64) -> EngineResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE plan_entries
            SET status = 'SENT', message_id = $2, updated_at = NOW()
            WHERE id = $1 AND status = 'PENDING'
            "#,
        )
        .bind(entry_id)
        .bind(message_id)
        .execute(self.pool.as_ref())
        .await?;

        if result.rows_affected() == 0 {
            return Ok(false);
        }
        Ok(true)
    }

    pub async fn mark_failed(&self, entry_id: i64, error: &str) -> EngineResult<()> {
        sqlx::query(
            r#"
            UPDATE plan_entries
            SET status = 'FAILED', attempts = attempts + 1, last_error = $2, updated_at = NOW()
            WHERE id = $1 AND status = 'PENDING'
            "#,
        )
        .bind(entry_id)
        .bind(error)
        .execute(self.pool.as_ref())
        .await?;
        Ok(())
    }

    pub async fn mark_skipped(&self, entry_id: i64, reason: &str) -> EngineResult<()> {
        sqlx::query(
            r#"
            UPDATE plan_entries
            SET status = 'SKIPPED', last_error = $2, updated_at = NOW()
            WHERE id = $1 AND status = 'PENDING'
            "#,
        )
        .bind(entry_id)
        .bind(reason)
        .execute(self.pool.as_ref())
        .await?;
        Ok(())
    }

    /// Marks every PENDING entry from `now` forward SKIPPED, used when a
    /// mailbox is flagged needs-reauth.
    pub async fn skip_future_for_sender(&self, sender_id: i64, now: DateTime<Utc>) -> EngineResult<u64> {
        let result = sqlx::query(
            r#"
            UPDATE plan_entries
            SET status = 'SKIPPED', last_error = 'mailbox needs reauthorization', updated_at = NOW()
            WHERE sender_id = $1 AND status = 'PENDING' AND fire_at >= $2
            "#,
        )
        .bind(sender_id)
        .bind(now)
        .execute(self.pool.as_ref())
        .await?;
        Ok(result.rows_affected())
    }

    pub async fn purge(&self, older_than: chrono::Duration) -> EngineResult<u64> {
        let cutoff = Utc::now() - older_than;
        let result = sqlx::query(
            "DELETE FROM plan_entries WHERE status <> 'PENDING' AND updated_at < $1",
        )
        .bind(cutoff)
        .execute(self.pool.as_ref())
        .await?;
        Ok(result.rows_affected())
    }
}

fn band_str(band: Band) -> &'static str {
    band.as_str()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::Band;
    use crate::planner::PlannedSend;
    use chrono::{NaiveDate, TimeZone};

    async fn insert_sender(pool: &PgPool) -> i64 {
        sqlx::query_scalar(
            r#"
            INSERT INTO mailboxes (email, provider, role, credentials_enc, credentials_key_id, tz, daily_limit)
            VALUES ($1, 'gmail', 'SENDER', $2, 'test', 'UTC', 5)
            RETURNING id
            "#,
        )
        .bind(format!("sender-{}@example.com", uuid_like()))
        .bind(vec![0u8; 16])
        .fetch_one(pool)
        .await
        .unwrap()
    }

    fn uuid_like() -> u64 {
        use std::time::{SystemTime, UNIX_EPOCH};
        SystemTime::now().duration_since(UNIX_EPOCH).unwrap().as_nanos() as u64
    }

    #[sqlx::test]
    async fn upsert_then_due_pending_roundtrips(pool: PgPool) {
        let pool = Arc::new(pool);
        let store = ScheduleStore::new(pool.clone());
        let sender_id = insert_sender(&pool).await;
        let date = NaiveDate::from_ymd_opt(2025, 10, 6).unwrap();
        let fire_at = Utc.with_ymd_and_hms(2025, 10, 6, 9, 30, 0).unwrap();

        let sends = vec![PlannedSend { fire_at, band: Band::Peak }];
        let inserted = store.upsert_plan(sender_id, date, &sends).await.unwrap();
        assert_eq!(inserted, 1);

        let due = store
            .due_pending(fire_at, chrono::Duration::minutes(5), chrono::Duration::minutes(2))
            .await
            .unwrap();
        assert_eq!(due.len(), 1);
        assert_eq!(due[0].sender_id, sender_id);
    }

    #[sqlx::test]
    async fn try_mark_sent_is_claim_once(pool: PgPool) {
        let pool = Arc::new(pool);
        let store = ScheduleStore::new(pool.clone());
        let sender_id = insert_sender(&pool).await;
        let date = NaiveDate::from_ymd_opt(2025, 10, 6).unwrap();
        let fire_at = Utc.with_ymd_and_hms(2025, 10, 6, 9, 30, 0).unwrap();

        store
            .upsert_plan(sender_id, date, &[PlannedSend { fire_at, band: Band::Peak }])
            .await
            .unwrap();

        let entry_id: i64 = sqlx::query_scalar("SELECT id FROM plan_entries WHERE sender_id = $1")
            .bind(sender_id)
            .fetch_one(pool.as_ref())
            .await
            .unwrap();

        let msg_id: i64 = sqlx::query_scalar(
            r#"
            INSERT INTO messages (sender_id, plan_entry_id, recipient_address, subject, body,
                provider_msg_id, provider_thread_id, sent_at, open_rate_target_snapshot, reply_rate_target_snapshot)
            VALUES ($1, $2, 'to@example.com', 'hi', 'body', 'pm-1', 'th-1', NOW(), 0.5, 0.1)
            RETURNING id
            "#,
        )
        .bind(sender_id)
        .bind(entry_id)
        .fetch_one(pool.as_ref())
        .await
        .unwrap();

        let first = store.try_mark_sent(entry_id, msg_id).await.unwrap();
        let second = store.try_mark_sent(entry_id, msg_id).await.unwrap();
        assert!(first);
        assert!(!second);
    }

    #[sqlx::test]
    async fn upsert_is_noop_once_any_entry_sent(pool: PgPool) {
        let pool = Arc::new(pool);
        let store = ScheduleStore::new(pool.clone());
        let sender_id = insert_sender(&pool).await;
        let date = NaiveDate::from_ymd_opt(2025, 10, 6).unwrap();
        let fire_at = Utc.with_ymd_and_hms(2025, 10, 6, 9, 30, 0).unwrap();

        store
            .upsert_plan(sender_id, date, &[PlannedSend { fire_at, band: Band::Peak }])
            .await
            .unwrap();
        sqlx::query("UPDATE plan_entries SET status = 'SENT' WHERE sender_id = $1")
            .bind(sender_id)
            .execute(pool.as_ref())
            .await
            .unwrap();

        let replaced = store
            .upsert_plan(sender_id, date, &[PlannedSend { fire_at, band: Band::Low }])
            .await
            .unwrap();
        assert_eq!(replaced, 0);
    }
}
