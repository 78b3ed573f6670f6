//! Stage outcome threaded through the orchestrator

use datagate_core::{LogOutcome, StageError, Verdict};

/// Result of one pipeline stage
#[derive(Debug, Clone, PartialEq)]
pub enum StageOutcome<T> {
    /// Proceed
    Continue(T),

    /// Proceed, recording the reasons as warnings
    Warn(T, Vec<String>),

    /// End the run as blocked; the payload is kept when one was produced
    Stop(Option<T>, StageError),
}

impl<T> StageOutcome<T> {
    /// Warn when there are reasons, continue otherwise
    pub fn warn_if(payload: T, reasons: Vec<String>) -> Self {
        if reasons.is_empty() {
            Self::Continue(payload)
        } else {
            Self::Warn(payload, reasons)
        }
    }

    pub fn is_stop(&self) -> bool {
        matches!(self, Self::Stop(..))
    }

    pub fn payload(&self) -> Option<&T> {
        match self {
            Self::Continue(payload) | Self::Warn(payload, _) => Some(payload),
            Self::Stop(payload, _) => payload.as_ref(),
        }
    }

    pub fn into_payload(self) -> Option<T> {
        match self {
            Self::Continue(payload) | Self::Warn(payload, _) => Some(payload),
            Self::Stop(payload, _) => payload,
        }
    }

    /// Verdict this outcome contributes
    pub fn verdict(&self) -> Verdict {
        match self {
            Self::Continue(_) => Verdict::Passed,
            Self::Warn(..) => Verdict::Warning,
            Self::Stop(..) => Verdict::Blocked,
        }
    }

    pub fn log_outcome(&self) -> LogOutcome {
        match self {
            Self::Continue(_) => LogOutcome::Continue,
            Self::Warn(..) => LogOutcome::Warn,
            Self::Stop(..) => LogOutcome::CriticalStop,
        }
    }

    /// Downgrade to a warning with an extra reason; stops are kept as they are
    pub fn with_warning(self, reason: impl Into<String>) -> Self {
        match self {
            Self::Continue(payload) => Self::Warn(payload, vec![reason.into()]),
            Self::Warn(payload, mut reasons) => {
                reasons.push(reason.into());
                Self::Warn(payload, reasons)
            }
            stop @ Self::Stop(..) => stop,
        }
    }

    /// Transform the payload, keeping the outcome
    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> StageOutcome<U> {
        match self {
            Self::Continue(payload) => StageOutcome::Continue(f(payload)),
            Self::Warn(payload, reasons) => StageOutcome::Warn(f(payload), reasons),
            Self::Stop(payload, err) => StageOutcome::Stop(payload.map(f), err),
        }
    }
}
