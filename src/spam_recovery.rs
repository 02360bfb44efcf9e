use chrono::Utc;
use sqlx::PgPool;
use std::sync::Arc;

use crate::encryption::EncryptionService;
use crate::error::EngineResult;
use crate::mail_client::MailClient;
use crate::models::{Mailbox, SpamEvent, SpamEventStatus};

const MAX_RETRIES: i32 = 3;

/// Finds warmup mail that landed in a recipient's spam folder and pulls it
/// back out, recording each attempt in `spam_events` so retries are bounded
/// and recoveries are auditable.
pub struct SpamRecovery {
    pool: Arc<PgPool>,
    mail_client: Arc<dyn MailClient>,
    encryption: Arc<EncryptionService>,
}

#[derive(Debug, Default)]
pub struct SpamRecoveryReport {
    pub detected: u32,
    pub recovered: u32,
    pub gave_up: u32,
}

impl SpamRecovery {
    pub fn new(
        pool: Arc<PgPool>,
        mail_client: Arc<dyn MailClient>,
        encryption: Arc<EncryptionService>,
    ) -> Self {
        Self {
            pool,
            mail_client,
            encryption,
        }
    }

    pub async fn tick(&self) -> EngineResult<SpamRecoveryReport> {
        let mut report = SpamRecoveryReport::default();
        let recipients = self.active_recipients().await?;
        let senders = self.active_senders().await?;
        if senders.is_empty() {
            return Ok(report);
        }
        let sender_addresses: Vec<String> = senders.iter().map(|s| s.email.clone()).collect();

        for recipient in recipients {
            let credentials = match recipient.credentials(&self.encryption) {
                Ok(c) => c,
                Err(_) => continue,
            };

            let spam_messages = match self
                .mail_client
                .list_spam_from(&credentials, &sender_addresses)
                .await
            {
                Ok(messages) => messages,
                Err(_) => continue,
            };

            for spam_message in spam_messages {
                let sender_id = senders
                    .iter()
                    .find(|s| s.email == spam_message.from)
                    .map(|s| s.id);

                let event = self
                    .record_detection(recipient.id, sender_id, &spam_message.provider_msg_id)
                    .await?;
                if event.is_new {
                    report.detected += 1;
                }

                if event.retry_count > MAX_RETRIES {
                    continue;
                }

                match self.mail_client.unspam(&credentials, &spam_message.provider_msg_id).await {
                    Ok(()) => {
                        self.mark_recovered(event.id).await?;
                        report.recovered += 1;
                    }
                    Err(_) => {
                        let retry_count = self.increment_retry(event.id).await?;
                        if retry_count > MAX_RETRIES {
                            self.mark_failed(event.id).await?;
                            report.gave_up += 1;
                        }
                    }
                }
            }
        }

        Ok(report)
    }

    /// Inserts a DETECTED row if one doesn't already exist for this
    /// recipient/message pair; the partial unique index on
    /// `(recipient_id, provider_msg_id) WHERE status = 'DETECTED'` makes
    /// re-detecting the same still-stuck message a no-op rather than a
    /// duplicate row.
    async fn record_detection(
        &self,
        recipient_id: i64,
        sender_id: Option<i64>,
        provider_msg_id: &str,
    ) -> EngineResult<DetectionOutcome> {
        if let Some(existing) = sqlx::query_as::<_, SpamEvent>(
            r#"
            SELECT id, recipient_id, sender_id, message_id, provider_msg_id, detected_at, recovered_at,
                   status, error, retry_count
            FROM spam_events
            WHERE recipient_id = $1 AND provider_msg_id = $2 AND status = 'DETECTED'
            "#,
        )
        .bind(recipient_id)
        .bind(provider_msg_id)
        .fetch_optional(self.pool.as_ref())
        .await?
        {
            return Ok(DetectionOutcome {
                id: existing.id,
                retry_count: existing.retry_count,
                is_new: false,
            });
        }

        let id: i64 = sqlx::query_scalar(
            r#"
            INSERT INTO spam_events (recipient_id, sender_id, provider_msg_id, detected_at, status, retry_count)
            VALUES ($1, $2, $3, NOW(), 'DETECTED', 0)
            RETURNING id
            "#,
        )
        .bind(recipient_id)
        .bind(sender_id)
        .bind(provider_msg_id)
        .fetch_one(self.pool.as_ref())
        .await?;

        Ok(DetectionOutcome {
            id,
            retry_count: 0,
            is_new: true,
        })
    }

    async fn mark_recovered(&self, event_id: i64) -> EngineResult<()> {
        sqlx::query(
            "UPDATE spam_events SET status = 'RECOVERED', recovered_at = NOW() WHERE id = $1",
        )
        .bind(event_id)
        .execute(self.pool.as_ref())
        .await?;
        Ok(())
    }

    async fn mark_failed(&self, event_id: i64) -> EngineResult<()> {
        sqlx::query("UPDATE spam_events SET status = 'FAILED' WHERE id = $1")
            .bind(event_id)
            .execute(self.pool.as_ref())
            .await?;
        Ok(())
    }

    async fn increment_retry(&self, event_id: i64) -> EngineResult<i32> {
        let retry_count: i32 = sqlx::query_scalar(
            "UPDATE spam_events SET retry_count = retry_count + 1 WHERE id = $1 RETURNING retry_count",
        )
        .bind(event_id)
        .fetch_one(self.pool.as_ref())
        .await?;
        Ok(retry_count)
    }

    async fn active_recipients(&self) -> EngineResult<Vec<Mailbox>> {
        let rows = sqlx::query_as::<_, Mailbox>(
            r#"
            SELECT id, email, provider, role, credentials_enc, credentials_key_id, active, tz, target,
                   warmup_day, daily_limit, open_rate_target, reply_rate_target, score,
                   needs_reauth, last_advance_date, created_at, updated_at
            FROM mailboxes WHERE active = TRUE AND role = 'RECIPIENT'
            "#,
        )
        .fetch_all(self.pool.as_ref())
        .await?;
        Ok(rows)
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

struct DetectionOutcome {
    id: i64,
    retry_count: i32,
    is_new: bool,
}

#[allow(dead_code)]
fn status_after_retries(retry_count: i32) -> SpamEventStatus {
    if retry_count > MAX_RETRIES {
        SpamEventStatus::Failed
    } else {
        SpamEventStatus::Detected
    }
}
