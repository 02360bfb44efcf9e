use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::models::mailbox::Credentials;

#[derive(Debug, Clone)]
pub struct SendResult {
    pub provider_msg_id: String,
    pub provider_thread_id: String,
}

#[derive(Debug, Clone)]
pub struct UnreadMessage {
    pub provider_msg_id: String,
    pub thread_id: String,
    pub from: String,
    pub subject: String,
    pub received_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct SpamMessage {
    pub provider_msg_id: String,
    pub from: String,
}

/// Error taxonomy a provider adapter must surface, per the spec's §6/§7.
#[derive(Debug, thiserror::Error)]
pub enum MailClientError {
    #[error("transient mail client error: {0}")]
    Transient(String),

    #[error("authentication permanently invalid: {0}")]
    PermanentAuth(String),

    #[error("mail client error: {0}")]
    PermanentOther(String),
}

/// The out-of-scope mail-provider client, modeled only as the interface the
/// engine calls through. A concrete Gmail/Graph/IMAP adapter lives outside
/// this crate; `FakeMailClient` below exists purely for component tests.
#[async_trait]
pub trait MailClient: Send + Sync {
    async fn send(
        &self,
        credentials: &Credentials,
        from: &str,
        to: &str,
        subject: &str,
        html: &str,
    ) -> Result<SendResult, MailClientError>;

    async fn send_reply(
        &self,
        credentials: &Credentials,
        from: &str,
        original_thread_id: &str,
        original_msg_id: &str,
        subject: &str,
        html: &str,
    ) -> Result<SendResult, MailClientError>;

    async fn list_unread_to(
        &self,
        credentials: &Credentials,
        since: DateTime<Utc>,
    ) -> Result<Vec<UnreadMessage>, MailClientError>;

    async fn mark_read(
        &self,
        credentials: &Credentials,
        provider_msg_id: &str,
    ) -> Result<(), MailClientError>;

    async fn mark_important(
        &self,
        credentials: &Credentials,
        provider_msg_id: &str,
    ) -> Result<(), MailClientError>;

    async fn list_spam_from(
        &self,
        credentials: &Credentials,
        sender_addresses: &[String],
    ) -> Result<Vec<SpamMessage>, MailClientError>;

    async fn unspam(
        &self,
        credentials: &Credentials,
        provider_msg_id: &str,
    ) -> Result<(), MailClientError>;

    async fn refresh(&self, credentials: &Credentials) -> Result<Credentials, MailClientError>;
}

pub mod fake {
    use super::*;
    use std::sync::Mutex;

    /// In-memory stand-in for the out-of-scope provider adapter. Used by
    /// component tests and, until a real OAuth/IMAP/Gmail adapter crate is
    /// wired in, as the binary's default `MailClient` so the worker is at
    /// least runnable end to end against a local database.
    #[derive(Default)]
    pub struct FakeMailClient {
        pub sent: Mutex<Vec<(String, String)>>,
        pub unspammed: Mutex<Vec<String>>,
        pub marked_read: Mutex<Vec<String>>,
        pub fail_send: Mutex<bool>,
    }

    #[async_trait]
    impl MailClient for FakeMailClient {
        async fn send(
            &self,
            _credentials: &Credentials,
            from: &str,
            to: &str,
            _subject: &str,
            _html: &str,
        ) -> Result<SendResult, MailClientError> {
            if *self.fail_send.lock().unwrap() {
                return Err(MailClientError::Transient("simulated failure".into()));
            }
            self.sent.lock().unwrap().push((from.to_string(), to.to_string()));
            let n = self.sent.lock().unwrap().len();
            Ok(SendResult {
                provider_msg_id: format!("msg-{n}"),
                provider_thread_id: format!("thread-{n}"),
            })
        }

        async fn send_reply(
            &self,
            _credentials: &Credentials,
            from: &str,
            original_thread_id: &str,
            _original_msg_id: &str,
            _subject: &str,
            _html: &str,
        ) -> Result<SendResult, MailClientError> {
            self.sent.lock().unwrap().push((from.to_string(), original_thread_id.to_string()));
            Ok(SendResult {
                provider_msg_id: "reply-msg".to_string(),
                provider_thread_id: original_thread_id.to_string(),
            })
        }

        async fn list_unread_to(
            &self,
            _credentials: &Credentials,
            _since: DateTime<Utc>,
        ) -> Result<Vec<UnreadMessage>, MailClientError> {
            Ok(vec![])
        }

        async fn mark_read(
            &self,
            _credentials: &Credentials,
            provider_msg_id: &str,
        ) -> Result<(), MailClientError> {
            self.marked_read.lock().unwrap().push(provider_msg_id.to_string());
            Ok(())
        }

        async fn mark_important(
            &self,
            _credentials: &Credentials,
            _provider_msg_id: &str,
        ) -> Result<(), MailClientError> {
            Ok(())
        }

        async fn list_spam_from(
            &self,
            _credentials: &Credentials,
            _sender_addresses: &[String],
        ) -> Result<Vec<SpamMessage>, MailClientError> {
            Ok(vec![])
        }

        async fn unspam(
            &self,
            _credentials: &Credentials,
            provider_msg_id: &str,
        ) -> Result<(), MailClientError> {
            self.unspammed.lock().unwrap().push(provider_msg_id.to_string());
            Ok(())
        }

        async fn refresh(&self, credentials: &Credentials) -> Result<Credentials, MailClientError> {
            Ok(credentials.clone())
        }
    }
}
