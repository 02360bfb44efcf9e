use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "UPPERCASE")]
pub enum SpamEventStatus {
    Detected,
    Recovered,
    Failed,
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct SpamEvent {
    pub id: i64,
    pub recipient_id: i64,
    pub sender_id: Option<i64>,
    pub message_id: Option<i64>,
    pub provider_msg_id: Option<String>,
    pub detected_at: DateTime<Utc>,
    pub recovered_at: Option<DateTime<Utc>>,
    pub status: SpamEventStatus,
    pub error: Option<String>,
    pub retry_count: i32,
}
