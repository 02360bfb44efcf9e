use chrono::Utc;
use sqlx::PgPool;
use std::sync::Arc;

use crate::encryption::EncryptionService;
use crate::error::EngineResult;
use crate::mail_client::MailClient;
use crate::models::Mailbox;

/// Polls each sender's own inbox for unread mail matching one of its
/// outbound warmup messages, so a reply sent on the provider side (not one
/// the Engagement Simulator generated itself) still stamps
/// `messages.replied_at`. This is the sender-side counterpart to the
/// recipient-side reply the simulator may already have sent — both paths
/// are idempotent against the same `replied_at IS NULL` guard, and both
/// require `opened_at` to already be set (invariant #5: a message can't be
/// replied to before it's opened).
pub struct ReplyMatcher {
    pool: Arc<PgPool>,
    mail_client: Arc<dyn MailClient>,
    encryption: Arc<EncryptionService>,
    lookback: chrono::Duration,
}

#[derive(Debug, Default)]
pub struct ReplyMatchReport {
    pub matched: u32,
    pub unmatched: u32,
}

impl ReplyMatcher {
    pub fn new(
        pool: Arc<PgPool>,
        mail_client: Arc<dyn MailClient>,
        encryption: Arc<EncryptionService>,
        lookback: chrono::Duration,
    ) -> Self {
        Self {
            pool,
            mail_client,
            encryption,
            lookback,
        }
    }

    pub async fn tick(&self) -> EngineResult<ReplyMatchReport> {
        let mut report = ReplyMatchReport::default();
        let since = Utc::now() - self.lookback;
        let senders = self.active_senders().await?;

        for sender in senders {
            let credentials = match sender.credentials(&self.encryption) {
                Ok(c) => c,
                Err(_) => continue,
            };
            let unread = match self.mail_client.list_unread_to(&credentials, since).await {
                Ok(messages) => messages,
                Err(_) => continue,
            };

            for unread_message in unread {
                if self.match_by_thread(&sender, &unread_message.thread_id).await? {
                    report.matched += 1;
                    continue;
                }
                if self
                    .match_by_subject(&sender, &unread_message.subject)
                    .await?
                {
                    report.matched += 1;
                } else {
                    report.unmatched += 1;
                }
            }
        }

        Ok(report)
    }

    /// Primary match: the provider's own thread id ties an inbound reply,
    /// arriving in the sender's own inbox, to the outbound message that
    /// same sender produced.
    async fn match_by_thread(&self, sender: &Mailbox, thread_id: &str) -> EngineResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE messages
            SET replied_at = NOW()
            WHERE sender_id = $1 AND provider_thread_id = $2 AND replied_at IS NULL
              AND opened_at IS NOT NULL
            "#,
        )
        .bind(sender.id)
        .bind(thread_id)
        .execute(self.pool.as_ref())
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Fallback when the provider doesn't preserve thread ids across a
    /// reply: normalize "Re: " / "RE: " prefixes and match on subject.
    async fn match_by_subject(&self, sender: &Mailbox, subject: &str) -> EngineResult<bool> {
        let normalized = normalize_subject(subject);
        let result = sqlx::query(
            r#"
            UPDATE messages
            SET replied_at = NOW()
            WHERE sender_id = $1 AND replied_at IS NULL
              AND opened_at IS NOT NULL
              AND lower(regexp_replace(subject, '^(re:\s*)+', '', 'i')) = $2
            "#,
        )
        .bind(sender.id)
        .bind(normalized)
        .execute(self.pool.as_ref())
        .await?;
        Ok(result.rows_affected() > 0)
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

fn normalize_subject(subject: &str) -> String {
    let re = regex::Regex::new(r"(?i)^(re:\s*)+").unwrap();
    re.replace(subject.trim(), "").trim().to_ascii_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_strips_repeated_re_prefixes() {
        assert_eq!(normalize_subject("Re: Re: checking in"), "checking in");
        assert_eq!(normalize_subject("RE: checking in"), "checking in");
        assert_eq!(normalize_subject("checking in"), "checking in");
    }

    #[test]
    fn normalize_is_case_insensitive_on_subject_body() {
        assert_eq!(normalize_subject("Re: Checking In"), "checking in");
    }
}
