pub mod mailbox;
pub mod message;
pub mod plan_entry;
pub mod spam_event;

pub use mailbox::{Mailbox, MailboxRole, Provider};
pub use message::Message;
pub use plan_entry::{PlanEntry, PlanEntryStatus};
pub use spam_event::{SpamEvent, SpamEventStatus};
