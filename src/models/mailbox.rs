use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "lowercase")]
pub enum Provider {
    Gmail,
    Other,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "UPPERCASE")]
pub enum MailboxRole {
    Sender,
    Recipient,
}

/// Opaque credential bundle. Treated as a blob by every component except
/// the encryption boundary at the persistence edge; never included in log
/// output (the custom `Debug` impl below redacts every field).
#[derive(Clone, Serialize, Deserialize)]
pub struct Credentials {
    pub access: String,
    pub refresh: String,
    pub expiry: DateTime<Utc>,
    pub client_id: String,
    pub client_secret: String,
    pub scopes: Vec<String>,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials").field("access", &"<redacted>").finish()
    }
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct Mailbox {
    pub id: i64,
    pub email: String,
    pub provider: Provider,
    pub role: MailboxRole,
    /// AES-256-GCM-encrypted, JSON-serialized `Credentials` blob; typed at
    /// the persistence boundary via `Mailbox::credentials()`, which needs
    /// the process's `EncryptionService` to decrypt it.
    pub credentials_enc: Vec<u8>,
    pub credentials_key_id: String,
    pub active: bool,
    pub tz: String,
    pub target: Option<i32>,
    pub warmup_day: i32,
    pub daily_limit: i32,
    pub open_rate_target: f64,
    pub reply_rate_target: f64,
    pub score: f64,
    pub needs_reauth: bool,
    pub last_advance_date: Option<NaiveDate>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Mailbox {
    /// Decrypts the credential bundle for this mailbox. The key id column
    /// is informational for now (single-key deployments); a future
    /// multi-key rotation would dispatch on `credentials_key_id` to pick
    /// the right `EncryptionService`.
    pub fn credentials(
        &self,
        encryption: &crate::encryption::EncryptionService,
    ) -> Result<Credentials, String> {
        encryption.decrypt_credentials(&self.credentials_enc)
    }

    pub fn parsed_tz(&self) -> Result<chrono_tz::Tz, String> {
        self.tz
            .parse()
            .map_err(|_| format!("invalid IANA time zone: {}", self.tz))
    }
}
