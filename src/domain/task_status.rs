use std::fmt;

/// Task lifecycle. Transitions only ever move rightwards:
///
/// ```text
/// pending -> due -> executing -> sending -> done
///                                   |
///                                   +-> failed  (admin retry: failed -> due)
/// needs_clarification is terminal; a user reply creates a new task
/// ```
///
/// The enum is the in-process view; every cross-process transition is still
/// guarded by a `WHERE status = '...'` clause on the row itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskStatus {
    Pending,
    NeedsClarification,
    Due,
    Executing,
    Sending,
    Done,
    Failed,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::NeedsClarification => "needs_clarification",
            Self::Due => "due",
            Self::Executing => "executing",
            Self::Sending => "sending",
            Self::Done => "done",
            Self::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Result<Self, String> {
        match s {
            "pending" => Ok(Self::Pending),
            "needs_clarification" => Ok(Self::NeedsClarification),
            "due" => Ok(Self::Due),
            "executing" => Ok(Self::Executing),
            "sending" => Ok(Self::Sending),
            "done" => Ok(Self::Done),
            "failed" => Ok(Self::Failed),
            other => Err(format!("Unknown task status: {other:?}")),
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
