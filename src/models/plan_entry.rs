use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "UPPERCASE")]
pub enum PlanEntryStatus {
    Pending,
    Sent,
    Failed,
    Skipped,
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct PlanEntry {
    pub id: i64,
    pub sender_id: i64,
    pub local_date: NaiveDate,
    pub fire_at: DateTime<Utc>,
    pub band: String,
    pub status: PlanEntryStatus,
    pub message_id: Option<i64>,
    pub attempts: i32,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}
