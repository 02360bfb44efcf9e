use chrono::Utc;
use sqlx::PgPool;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use crate::clock::{is_business_hours, is_weekend, to_local};
use crate::config::Config;
use crate::content_generator::ContentGenerator;
use crate::error::{EngineError, EngineResult};
use crate::encryption::EncryptionService;
use crate::mail_client::{MailClient, MailClientError};
use crate::models::{Mailbox, PlanEntry};
use crate::planner::plan_day;
use crate::rand_source::RandSource;
use crate::schedule_store::ScheduleStore;

const SEND_TIMEOUT: Duration = Duration::from_secs(30);

pub struct Dispatcher {
    pool: Arc<PgPool>,
    store: ScheduleStore,
    mail_client: Arc<dyn MailClient>,
    content_generator: Arc<dyn ContentGenerator>,
    rand: Arc<dyn RandSource>,
    encryption: Arc<EncryptionService>,
    config: Config,
}

#[derive(Debug, Default)]
pub struct DispatchReport {
    pub sent: u32,
    pub failed: u32,
}

impl Dispatcher {
    pub fn new(
        pool: Arc<PgPool>,
        mail_client: Arc<dyn MailClient>,
        content_generator: Arc<dyn ContentGenerator>,
        rand: Arc<dyn RandSource>,
        encryption: Arc<EncryptionService>,
        config: Config,
    ) -> Self {
        Self {
            store: ScheduleStore::new(pool.clone()),
            pool,
            mail_client,
            content_generator,
            rand,
            encryption,
            config,
        }
    }

    /// One dispatcher tick: group active senders by zone, dispatch due
    /// entries for zones currently in business hours, planning the day on
    /// demand if no entries exist yet for today.
    pub async fn tick(&self) -> EngineResult<DispatchReport> {
        let mut report = DispatchReport::default();
        let now = Utc::now();

        let senders = self.active_senders().await?;
        let recipients = self.active_recipients().await?;
        if recipients.is_empty() {
            return Ok(report);
        }

        let mut by_zone: HashMap<String, Vec<Mailbox>> = HashMap::new();
        for sender in senders {
            by_zone.entry(sender.tz.clone()).or_default().push(sender);
        }

        for (_zone, zone_senders) in by_zone {
            for sender in zone_senders {
                let tz = match sender.parsed_tz() {
                    Ok(tz) => tz,
                    Err(e) => {
                        tracing::warn!(mailbox_id = sender.id, error = %e, "invalid timezone, skipping");
                        continue;
                    }
                };
                let local_now = crate::clock::now_in(tz);
                if is_weekend(local_now) || !is_business_hours(local_now, &self.config.business_hours) {
                    continue;
                }

                let local_today = local_now.date();
                if !self.store.has_any_for_date(sender.id, local_today).await? {
                    self.plan_today(&sender, local_today, tz).await?;
                }

                let due = self
                    .store
                    .due_pending(now, chrono::Duration::from_std(self.config.plan.grace_window).unwrap(), chrono::Duration::from_std(self.config.plan.fire_window).unwrap())
                    .await?
                    .into_iter()
                    .filter(|e| e.sender_id == sender.id)
                    .collect::<Vec<_>>();

                for entry in due {
                    match self.dispatch_one(&sender, &entry, &recipients).await {
                        Ok(()) => report.sent += 1,
                        Err(e) => {
                            tracing::warn!(entry_id = entry.id, error = %e, "dispatch failed");
                            let _ = self.store.mark_failed(entry.id, &e.to_string()).await;
                            report.failed += 1;
                        }
                    }
                }
            }
        }

        Ok(report)
    }

    async fn plan_today(
        &self,
        sender: &Mailbox,
        local_today: chrono::NaiveDate,
        tz: chrono_tz::Tz,
    ) -> EngineResult<()> {
        let sends = plan_day(
            local_today,
            sender.daily_limit,
            tz,
            &self.config.business_hours,
            &self.config.band_weights,
            self.rand.as_ref(),
        );
        self.store.upsert_plan(sender.id, local_today, &sends).await?;
        Ok(())
    }

    async fn dispatch_one(
        &self,
        sender: &Mailbox,
        entry: &PlanEntry,
        recipients: &[Mailbox],
    ) -> EngineResult<()> {
        if sender.needs_reauth {
            self.store.mark_skipped(entry.id, "mailbox needs reauthorization").await?;
            return Ok(());
        }

        let recipient_idx = self.rand.uniform_index(recipients.len());
        let recipient = &recipients[recipient_idx];

        let mut credentials = sender
            .credentials(&self.encryption)
            .map_err(|e| EngineError::InvalidPlan(format!("bad credentials blob: {e}")))?;

        let content = tokio::time::timeout(SEND_TIMEOUT, self.content_generator.generate("general"))
            .await
            .map_err(|_| EngineError::Transient("content generator timed out".into()))?
            .map_err(|_| EngineError::ContentGeneratorEmpty)?;

        if content.subject.trim().is_empty() || content.body_html.trim().is_empty() {
            return Err(EngineError::ContentGeneratorEmpty);
        }

        let send_result = match tokio::time::timeout(
            SEND_TIMEOUT,
            self.mail_client.send(&credentials, &sender.email, &recipient.email, &content.subject, &content.body_html),
        )
        .await
        {
            Ok(Ok(result)) => result,
            Ok(Err(MailClientError::PermanentAuth(detail))) => {
                // Try one refresh before giving up, per the token-refresh contract.
                match self.mail_client.refresh(&credentials).await {
                    Ok(new_creds) => {
                        self.persist_refreshed_credentials(sender.id, &new_creds).await?;
                        credentials = new_creds;
                        match tokio::time::timeout(
                            SEND_TIMEOUT,
                            self.mail_client.send(
                                &credentials,
                                &sender.email,
                                &recipient.email,
                                &content.subject,
                                &content.body_html,
                            ),
                        )
                        .await
                        {
                            Ok(Ok(result)) => result,
                            Ok(Err(_)) => {
                                self.flag_needs_reauth(sender.id).await?;
                                return Err(EngineError::NeedsReauth {
                                    mailbox_id: sender.id,
                                    detail,
                                });
                            }
                            Err(_) => {
                                return Err(EngineError::Transient("send timed out after refresh".into()));
                            }
                        }
                    }
                    Err(_) => {
                        self.flag_needs_reauth(sender.id).await?;
                        return Err(EngineError::NeedsReauth {
                            mailbox_id: sender.id,
                            detail,
                        });
                    }
                }
            }
            Ok(Err(MailClientError::Transient(msg))) => return Err(EngineError::Transient(msg)),
            Ok(Err(MailClientError::PermanentOther(msg))) => return Err(EngineError::Transient(msg)),
            Err(_) => return Err(EngineError::Transient("send timed out".into())),
        };

        let message_id = self
            .insert_message(sender, entry, recipient, &content, &send_result)
            .await?;

        let claimed = self.store.try_mark_sent(entry.id, message_id).await?;
        if !claimed {
            return Err(EngineError::DuplicateDispatch);
        }

        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    async fn insert_message(
        &self,
        sender: &Mailbox,
        entry: &PlanEntry,
        recipient: &Mailbox,
        content: &crate::content_generator::GeneratedContent,
        send_result: &crate::mail_client::SendResult,
    ) -> EngineResult<i64> {
        let id: i64 = sqlx::query_scalar(
            r#"
            INSERT INTO messages (
                sender_id, plan_entry_id, recipient_address, subject, body,
                provider_msg_id, provider_thread_id, sent_at,
                open_rate_target_snapshot, reply_rate_target_snapshot
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, NOW(), $8, $9)
            RETURNING id
            "#,
        )
        .bind(sender.id)
        .bind(entry.id)
        .bind(&recipient.email)
        .bind(&content.subject)
        .bind(&content.body_html)
        .bind(&send_result.provider_msg_id)
        .bind(&send_result.provider_thread_id)
        .bind(sender.open_rate_target)
        .bind(sender.reply_rate_target)
        .fetch_one(self.pool.as_ref())
        .await?;
        Ok(id)
    }

    async fn persist_refreshed_credentials(
        &self,
        mailbox_id: i64,
        credentials: &crate::models::mailbox::Credentials,
    ) -> EngineResult<()> {
        let (encrypted, key_id) = self
            .encryption
            .encrypt_credentials(credentials)
            .map_err(|e| EngineError::InvalidPlan(format!("could not encrypt credentials: {e}")))?;
        sqlx::query(
            "UPDATE mailboxes SET credentials_enc = $2, credentials_key_id = $3, updated_at = NOW() WHERE id = $1",
        )
        .bind(mailbox_id)
        .bind(encrypted)
        .bind(key_id)
        .execute(self.pool.as_ref())
        .await?;
        Ok(())
    }

    async fn flag_needs_reauth(&self, mailbox_id: i64) -> EngineResult<()> {
        sqlx::query("UPDATE mailboxes SET needs_reauth = TRUE, updated_at = NOW() WHERE id = $1")
            .bind(mailbox_id)
            .execute(self.pool.as_ref())
            .await?;
        self.store.skip_future_for_sender(mailbox_id, Utc::now()).await?;
        Ok(())
    }

    async fn active_senders(&self) -> EngineResult<Vec<Mailbox>> {
        let rows = sqlx::query_as::<_, Mailbox>(
            r#"
            SELECT id, email, provider, role, credentials_enc, credentials_key_id, active, tz, target,
                   warmup_day, daily_limit, open_rate_target, reply_rate_target, score,
                   needs_reauth, last_advance_date, created_at, updated_at
            FROM mailboxes WHERE active = TRUE AND role = 'SENDER' AND daily_limit > 0
            "#,
        )
        .fetch_all(self.pool.as_ref())
        .await?;
        Ok(rows)
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
}
