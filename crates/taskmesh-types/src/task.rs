use core::fmt::{Display, Error as FmtError, Formatter};

use serde_derive::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::Error;
use crate::value::WireValue;

/// Display name of a task. Guaranteed non-empty.
#[derive(Clone, Debug, Hash, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct TaskName(String);

impl TaskName {
    pub fn new(name: impl Into<String>) -> Result<Self, Error> {
        let name = name.into();

        if name.is_empty() {
            return Err(Error::empty_task_name());
        }

        Ok(Self(name))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for TaskName {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), FmtError> {
        write!(f, "{}", self.0)
    }
}

impl TryFrom<String> for TaskName {
    type Error = Error;

    fn try_from(name: String) -> Result<Self, Error> {
        Self::new(name)
    }
}

impl From<TaskName> for String {
    fn from(name: TaskName) -> Self {
        name.0
    }
}

/// Priority hint forwarded to workers, which use it to compute wait-time
/// estimates. Higher values run earlier.
#[derive(Clone, Copy, Debug, Default, PartialEq, PartialOrd, Serialize, Deserialize)]
pub struct Priority(f64);

impl Priority {
    pub fn new(priority: f64) -> Self {
        Self(priority)
    }

    pub fn value(&self) -> f64 {
        self.0
    }
}

impl Display for Priority {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), FmtError> {
        write!(f, "{}", self.0)
    }
}

/// What a caller hands to the scheduler: a named, prioritized, otherwise
/// opaque payload.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TaskSpec {
    pub name: TaskName,
    pub priority: Priority,
    pub payload: WireValue,
}

impl TaskSpec {
    pub fn new(name: TaskName, priority: Priority, payload: WireValue) -> Self {
        Self {
            name,
            priority,
            payload,
        }
    }

    /// A task with the given name, default priority and no payload.
    pub fn named(name: impl Into<String>) -> Result<Self, Error> {
        Ok(Self::new(
            TaskName::new(name)?,
            Priority::default(),
            WireValue::Nil,
        ))
    }
}

/// Server-assigned identifier of a submitted task, opaque to clients.
#[derive(Clone, Debug, Hash, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TaskId(String);

impl TaskId {
    /// A fresh, unique id. Called by workers at submission time.
    pub fn fresh() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for TaskId {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), FmtError> {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_task_names_are_rejected() {
        assert!(TaskName::new("").is_err());
        assert!(TaskSpec::named("").is_err());
    }

    #[test]
    fn named_spec_carries_defaults() {
        let spec = TaskSpec::named("t1").unwrap();
        assert_eq!(spec.name.as_str(), "t1");
        assert_eq!(spec.priority, Priority::default());
        assert_eq!(spec.payload, WireValue::Nil);
    }

    #[test]
    fn fresh_task_ids_are_unique() {
        assert_ne!(TaskId::fresh(), TaskId::fresh());
    }
}
