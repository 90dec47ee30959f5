use std::fmt;

/// Audit event vocabulary; one entry per observable task transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventType {
    Created,
    ClarificationSent,
    Scheduled,
    Due,
    Executing,
    DraftGenerated,
    Sending,
    Sent,
    Done,
    Failed,
    Retried,
}

impl EventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::ClarificationSent => "clarification_sent",
            Self::Scheduled => "scheduled",
            Self::Due => "due",
            Self::Executing => "executing",
            Self::DraftGenerated => "draft_generated",
            Self::Sending => "sending",
            Self::Sent => "sent",
            Self::Done => "done",
            Self::Failed => "failed",
            Self::Retried => "retried",
        }
    }
}

impl fmt::Display for EventType {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
