use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use std::sync::{Arc, Mutex};
use warmup_engine::encryption::EncryptionService;
use warmup_engine::mail_client::{MailClient, MailClientError, SendResult, SpamMessage, UnreadMessage};
use warmup_engine::models::mailbox::Credentials;
use warmup_engine::spam_recovery::SpamRecovery;

fn dummy_credentials() -> Credentials {
    Credentials {
        access: "a".into(),
        refresh: "r".into(),
        expiry: Utc::now(),
        client_id: "c".into(),
        client_secret: "s".into(),
        scopes: vec![],
    }
}

fn test_encryption() -> Arc<EncryptionService> {
    Arc::new(EncryptionService::new_with_key(&[0u8; 32], "test-key").unwrap())
}

/// Reports exactly one spam-folder hit (E5's provider_msg_id=X from an
/// active sender) and records every `unspam` call it receives.
struct SingleSpamClient {
    provider_msg_id: String,
    sender_email: String,
    unspammed: Mutex<Vec<String>>,
}

#[async_trait]
impl MailClient for SingleSpamClient {
    async fn send(
        &self,
        _c: &Credentials,
        _from: &str,
        _to: &str,
        _s: &str,
        _h: &str,
    ) -> Result<SendResult, MailClientError> {
        unreachable!("not exercised by this test")
    }

    async fn send_reply(
        &self,
        _c: &Credentials,
        _from: &str,
        _thread: &str,
        _msg: &str,
        _s: &str,
        _h: &str,
    ) -> Result<SendResult, MailClientError> {
        unreachable!("not exercised by this test")
    }

    async fn list_unread_to(
        &self,
        _c: &Credentials,
        _since: DateTime<Utc>,
    ) -> Result<Vec<UnreadMessage>, MailClientError> {
        Ok(vec![])
    }

    async fn mark_read(&self, _c: &Credentials, _id: &str) -> Result<(), MailClientError> {
        Ok(())
    }

    async fn mark_important(&self, _c: &Credentials, _id: &str) -> Result<(), MailClientError> {
        Ok(())
    }

    async fn list_spam_from(
        &self,
        _c: &Credentials,
        sender_addresses: &[String],
    ) -> Result<Vec<SpamMessage>, MailClientError> {
        if sender_addresses.contains(&self.sender_email) {
            Ok(vec![SpamMessage {
                provider_msg_id: self.provider_msg_id.clone(),
                from: self.sender_email.clone(),
            }])
        } else {
            Ok(vec![])
        }
    }

    async fn unspam(&self, _c: &Credentials, provider_msg_id: &str) -> Result<(), MailClientError> {
        self.unspammed.lock().unwrap().push(provider_msg_id.to_string());
        Ok(())
    }

    async fn refresh(&self, credentials: &Credentials) -> Result<Credentials, MailClientError> {
        Ok(credentials.clone())
    }
}

/// Like `SingleSpamClient` but every `unspam` call fails, so a still-stuck
/// message stays DETECTED tick over tick until the retry budget is spent.
struct AlwaysFailsUnspamClient {
    provider_msg_id: String,
    sender_email: String,
}

#[async_trait]
impl MailClient for AlwaysFailsUnspamClient {
    async fn send(
        &self,
        _c: &Credentials,
        _from: &str,
        _to: &str,
        _s: &str,
        _h: &str,
    ) -> Result<SendResult, MailClientError> {
        unreachable!("not exercised by this test")
    }

    async fn send_reply(
        &self,
        _c: &Credentials,
        _from: &str,
        _thread: &str,
        _msg: &str,
        _s: &str,
        _h: &str,
    ) -> Result<SendResult, MailClientError> {
        unreachable!("not exercised by this test")
    }

    async fn list_unread_to(
        &self,
        _c: &Credentials,
        _since: DateTime<Utc>,
    ) -> Result<Vec<UnreadMessage>, MailClientError> {
        Ok(vec![])
    }

    async fn mark_read(&self, _c: &Credentials, _id: &str) -> Result<(), MailClientError> {
        Ok(())
    }

    async fn mark_important(&self, _c: &Credentials, _id: &str) -> Result<(), MailClientError> {
        Ok(())
    }

    async fn list_spam_from(
        &self,
        _c: &Credentials,
        sender_addresses: &[String],
    ) -> Result<Vec<SpamMessage>, MailClientError> {
        if sender_addresses.contains(&self.sender_email) {
            Ok(vec![SpamMessage {
                provider_msg_id: self.provider_msg_id.clone(),
                from: self.sender_email.clone(),
            }])
        } else {
            Ok(vec![])
        }
    }

    async fn unspam(&self, _c: &Credentials, _provider_msg_id: &str) -> Result<(), MailClientError> {
        Err(MailClientError::Transient("spam folder API unavailable".into()))
    }

    async fn refresh(&self, credentials: &Credentials) -> Result<Credentials, MailClientError> {
        Ok(credentials.clone())
    }
}

/// E5: a recipient's spam folder contains a message from an active sender.
/// After one tick, a RECOVERED SpamEvent exists for it and `unspam` was
/// called exactly once with that provider_msg_id.
#[sqlx::test]
async fn e5_spam_message_is_detected_and_recovered(pool: PgPool) {
    let pool = Arc::new(pool);

    let sender_email = "sender@example.com";
    let recipient_email = "recipient@example.com";
    let encryption = test_encryption();
    let (sender_enc, sender_key) = encryption.encrypt_credentials(&dummy_credentials()).unwrap();
    let (recipient_enc, recipient_key) = encryption.encrypt_credentials(&dummy_credentials()).unwrap();

    sqlx::query(
        r#"
        INSERT INTO mailboxes (email, provider, role, credentials_enc, credentials_key_id, tz, active, daily_limit)
        VALUES ($1, 'gmail', 'SENDER', $2, $3, 'UTC', TRUE, 5)
        "#,
    )
    .bind(sender_email)
    .bind(sender_enc)
    .bind(sender_key)
    .execute(pool.as_ref())
    .await
    .unwrap();

    sqlx::query(
        r#"
        INSERT INTO mailboxes (email, provider, role, credentials_enc, credentials_key_id, tz, active, daily_limit)
        VALUES ($1, 'gmail', 'RECIPIENT', $2, $3, 'UTC', TRUE, 0)
        "#,
    )
    .bind(recipient_email)
    .bind(recipient_enc)
    .bind(recipient_key)
    .execute(pool.as_ref())
    .await
    .unwrap();

    let mail_client = Arc::new(SingleSpamClient {
        provider_msg_id: "X".to_string(),
        sender_email: sender_email.to_string(),
        unspammed: Mutex::new(vec![]),
    });

    let recovery = SpamRecovery::new(pool.clone(), mail_client.clone(), encryption.clone());
    let report = recovery.tick().await.unwrap();

    assert_eq!(report.detected, 1);
    assert_eq!(report.recovered, 1);
    assert_eq!(mail_client.unspammed.lock().unwrap().as_slice(), ["X"]);

    let (status, sender_id): (String, Option<i64>) = sqlx::query_as(
        "SELECT status, sender_id FROM spam_events WHERE provider_msg_id = $1",
    )
    .bind("X")
    .fetch_one(pool.as_ref())
    .await
    .unwrap();

    assert_eq!(status, "RECOVERED");
    assert!(sender_id.is_some());
}

/// A message that keeps failing to unspam stays a single open DETECTED
/// row across ticks (no duplicate events for the same still-stuck
/// placement) until the retry budget (3) is spent, at which point it
/// flips to FAILED and stops being retried.
#[sqlx::test]
async fn repeated_failures_stay_one_row_until_retry_budget_spent(pool: PgPool) {
    let pool = Arc::new(pool);
    let sender_email = "sender2@example.com";
    let recipient_email = "recipient2@example.com";
    let encryption = test_encryption();
    let (sender_enc, sender_key) = encryption.encrypt_credentials(&dummy_credentials()).unwrap();
    let (recipient_enc, recipient_key) = encryption.encrypt_credentials(&dummy_credentials()).unwrap();

    sqlx::query(
        r#"
        INSERT INTO mailboxes (email, provider, role, credentials_enc, credentials_key_id, tz, active, daily_limit)
        VALUES ($1, 'gmail', 'SENDER', $2, $3, 'UTC', TRUE, 5)
        "#,
    )
    .bind(sender_email)
    .bind(sender_enc)
    .bind(sender_key)
    .execute(pool.as_ref())
    .await
    .unwrap();

    sqlx::query(
        r#"
        INSERT INTO mailboxes (email, provider, role, credentials_enc, credentials_key_id, tz, active, daily_limit)
        VALUES ($1, 'gmail', 'RECIPIENT', $2, $3, 'UTC', TRUE, 0)
        "#,
    )
    .bind(recipient_email)
    .bind(recipient_enc)
    .bind(recipient_key)
    .execute(pool.as_ref())
    .await
    .unwrap();

    let mail_client = Arc::new(AlwaysFailsUnspamClient {
        provider_msg_id: "Y".to_string(),
        sender_email: sender_email.to_string(),
    });

    let recovery = SpamRecovery::new(pool.clone(), mail_client.clone(), encryption.clone());

    // Ticks 1-4: detected once, retried up to the budget, then given up.
    for _ in 0..4 {
        recovery.tick().await.unwrap();
    }

    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM spam_events WHERE provider_msg_id = $1")
        .bind("Y")
        .fetch_one(pool.as_ref())
        .await
        .unwrap();
    assert_eq!(count, 1, "no duplicate row for the same open placement");

    let (status, retry_count): (String, i32) = sqlx::query_as(
        "SELECT status, retry_count FROM spam_events WHERE provider_msg_id = $1",
    )
    .bind("Y")
    .fetch_one(pool.as_ref())
    .await
    .unwrap();

    assert_eq!(status, "FAILED");
    assert!(retry_count > 3);
}
