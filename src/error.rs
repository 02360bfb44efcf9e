use thiserror::Error;

/// Error taxonomy shared by every periodic component.
///
/// Mirrors the policy table: transient errors fail only the current entry,
/// `NeedsReauth` pauses the mailbox, everything else is either dropped or
/// surfaced for the next tick to retry.
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("transient failure: {0}")]
    Transient(String),

    #[error("credential token expired")]
    ExpiredToken,

    #[error("mailbox {mailbox_id} needs reauthorization: {detail}")]
    NeedsReauth { mailbox_id: i64, detail: String },

    #[error("invalid plan: {0}")]
    InvalidPlan(String),

    #[error("duplicate dispatch detected")]
    DuplicateDispatch,

    #[error("content generator returned empty output")]
    ContentGeneratorEmpty,

    #[error("unknown mail provider: {0}")]
    UnknownProvider(String),

    #[error("database error: {0}")]
    Db(#[from] sqlx::Error),
}

pub type EngineResult<T> = Result<T, EngineError>;
