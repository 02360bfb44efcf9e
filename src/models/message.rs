use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Message {
    pub id: i64,
    pub sender_id: i64,
    pub plan_entry_id: i64,
    pub recipient_address: String,
    pub subject: String,
    pub body: String,
    pub provider_msg_id: String,
    pub provider_thread_id: String,
    pub sent_at: DateTime<Utc>,
    pub opened_at: Option<DateTime<Utc>>,
    pub starred_at: Option<DateTime<Utc>>,
    pub replied_at: Option<DateTime<Utc>>,
    /// Engagement policy captured from the sender at send time, so later
    /// simulation is driven by the policy that existed when the mail was
    /// produced, not whatever the operator has since changed it to.
    pub open_rate_target_snapshot: f64,
    pub reply_rate_target_snapshot: f64,
}
