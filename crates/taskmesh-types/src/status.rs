use core::fmt::{Display, Error as FmtError, Formatter};
use std::time::SystemTime;

use serde_derive::{Deserialize, Serialize};

use crate::error::Error;
use crate::value::{BlobEnvelope, WireValue};

/// Execution mode of a submitted task.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    Pending,
    Running,
    Finished,
}

impl Display for Mode {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), FmtError> {
        match self {
            Mode::Pending => write!(f, "pending"),
            Mode::Running => write!(f, "running"),
            Mode::Finished => write!(f, "finished"),
        }
    }
}

/// Result slot of a finished task: either a plain wire value, or an opaque
/// envelope that must be decoded lazily.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum TaskResult {
    Plain(WireValue),
    Enveloped(BlobEnvelope),
}

impl TaskResult {
    /// Unwrap to the actual value, decoding the envelope if present.
    pub fn into_value(self) -> Result<WireValue, Error> {
        match self {
            TaskResult::Plain(value) => Ok(value),
            TaskResult::Enveloped(envelope) => envelope.extract(),
        }
    }

    pub fn is_enveloped(&self) -> bool {
        matches!(self, TaskResult::Enveloped(_))
    }
}

/// What a worker reports about one of its tasks.
///
/// `starttime` is present once the mode reaches `Running` and never changes
/// afterwards; `result` is present once the mode is `Finished`, and a
/// finished mode never regresses.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StatusRecord {
    pub mode: Mode,
    pub starttime: Option<SystemTime>,
    pub result: Option<TaskResult>,
}

impl StatusRecord {
    pub fn pending() -> Self {
        Self {
            mode: Mode::Pending,
            starttime: None,
            result: None,
        }
    }

    pub fn running(starttime: SystemTime) -> Self {
        Self {
            mode: Mode::Running,
            starttime: Some(starttime),
            result: None,
        }
    }

    pub fn finished(starttime: Option<SystemTime>, result: TaskResult) -> Self {
        Self {
            mode: Mode::Finished,
            starttime,
            result: Some(result),
        }
    }

    pub fn is_finished(&self) -> bool {
        self.mode == Mode::Finished
    }

    pub fn started(&self) -> bool {
        self.starttime.is_some()
    }

    /// Fold a fresh observation into this record, upholding the record's
    /// monotonicity: a finished mode never regresses, and a start time
    /// never changes once present.
    pub fn absorb(&self, fresh: StatusRecord) -> StatusRecord {
        if self.is_finished() {
            return self.clone();
        }

        StatusRecord {
            mode: fresh.mode,
            starttime: self.starttime.or(fresh.starttime),
            result: fresh.result,
        }
    }

    /// Terminal copy of this record carrying an error description as its
    /// result, used to complete a task whose polling failed unrecoverably.
    pub fn finished_with_error(self, error: impl Into<String>) -> StatusRecord {
        StatusRecord {
            mode: Mode::Finished,
            starttime: self.starttime,
            result: Some(TaskResult::Plain(WireValue::String(error.into()))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn finished_mode_never_regresses() {
        let finished = StatusRecord::finished(None, TaskResult::Plain(WireValue::Int(1)));
        let absorbed = finished.absorb(StatusRecord::pending());

        assert_eq!(absorbed, finished);
    }

    #[test]
    fn starttime_is_immutable_once_present() {
        let start = SystemTime::UNIX_EPOCH;
        let running = StatusRecord::running(start);

        let later = StatusRecord::running(SystemTime::now());
        let absorbed = running.absorb(later);

        assert_eq!(absorbed.starttime, Some(start));
        assert_eq!(absorbed.mode, Mode::Running);
    }

    #[test]
    fn error_completion_is_finished_and_named() {
        let record = StatusRecord::running(SystemTime::UNIX_EPOCH);
        let completed = record.finished_with_error("boom");

        assert!(completed.is_finished());
        assert_eq!(completed.starttime, Some(SystemTime::UNIX_EPOCH));

        let value = completed.result.unwrap().into_value().unwrap();
        assert_eq!(value.as_str(), Some("boom"));
    }
}
