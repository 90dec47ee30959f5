mod action_type;
mod channel;
mod chat_number;
mod display_name;
mod email_address;
mod event_type;
mod outbox_status;
mod redaction;
mod task_status;
// allow external `use` statements to skip `action_type` etc
pub use action_type::ActionType;
pub use action_type::Tone;
pub use channel::Channel;
pub use chat_number::ChatNumber;
pub use display_name::DisplayName;
pub use email_address::EmailAddress;
pub use event_type::EventType;
pub use outbox_status::OutboxStatus;
pub use redaction::redact_pii;
pub use redaction::RETENTION_MARKER;
pub use task_status::TaskStatus;
