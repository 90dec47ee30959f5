use std::fmt;

/// Outbox row lifecycle: queued -> sending -> sent, or back to queued on a
/// recoverable send failure, or failed once attempts run out. `failed` is
/// terminal until an admin retry resets the row.
///
/// Unlike `TaskStatus`, nothing ever branches on a stored outbox status; the
/// claim and completion statements assert it in their `WHERE` clauses, so
/// only `as_str` is needed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutboxStatus {
    Queued,
    Sending,
    Sent,
    Failed,
}

impl OutboxStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Sending => "sending",
            Self::Sent => "sent",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for OutboxStatus {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
