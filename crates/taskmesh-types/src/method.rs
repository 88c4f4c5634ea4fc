use core::fmt::{Display, Error as FmtError, Formatter};
use std::collections::BTreeSet;

use itertools::Itertools;
use serde_derive::{Deserialize, Serialize};

use crate::error::Error;
use crate::value::{BlobEnvelope, WireValue};

/// Wire names of the methods workers may publish.
pub mod names {
    /// Catalog retrieval itself; answered by every reachable worker.
    pub const LIST_METHODS: &str = "system.listMethods";

    pub const SUBMIT: &str = "Submit";
    pub const STATUS_INFO: &str = "StatusInfo";
    pub const UPDATED_HANDLE: &str = "UpdatedHandle";
    pub const EST_WAIT_TIME: &str = "EstWaitTime";
    pub const CPU_LOAD: &str = "CpuLoad";
    pub const KILL: &str = "Kill";
    pub const CLEANUP: &str = "Cleanup";
    pub const TERMINATE: &str = "Terminate";
    pub const SHOW_QUEUE: &str = "ShowQueue";
    pub const CLEAN_OLD_TASKS: &str = "CleanOldTasks";
}

/// The method catalog a worker publishes.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MethodSet(BTreeSet<String>);

impl MethodSet {
    pub fn contains(&self, name: &str) -> bool {
        self.0.contains(name)
    }

    /// Whether the worker publishes at least one load metric. Workers
    /// publishing neither cannot take part in placement.
    pub fn supports_load_query(&self) -> bool {
        self.contains(names::EST_WAIT_TIME) || self.contains(names::CPU_LOAD)
    }

    /// The full catalog served by endpoints implemented in this crate.
    pub fn full() -> Self {
        [
            names::LIST_METHODS,
            names::SUBMIT,
            names::STATUS_INFO,
            names::UPDATED_HANDLE,
            names::EST_WAIT_TIME,
            names::CPU_LOAD,
            names::KILL,
            names::CLEANUP,
            names::TERMINATE,
            names::SHOW_QUEUE,
            names::CLEAN_OLD_TASKS,
        ]
        .into_iter()
        .map(String::from)
        .collect()
    }

    /// Decode a catalog reply.
    ///
    /// Current workers answer with a plain list of method names; legacy
    /// workers wrap the list in a [`BlobEnvelope`]. Both forms are accepted.
    pub fn from_wire(value: &WireValue) -> Result<Self, Error> {
        match value {
            WireValue::List(items) => items
                .iter()
                .map(|item| match item {
                    WireValue::String(name) => Ok(name.clone()),
                    other => Err(Error::catalog_shape(format!(
                        "expected a method name, got {other:?}"
                    ))),
                })
                .collect(),
            WireValue::Bytes(blob) => {
                let inner = BlobEnvelope::from_bytes(blob.clone()).extract()?;
                Self::from_wire(&inner)
            }
            other => match BlobEnvelope::from_wire(other) {
                Some(envelope) => Self::from_wire(&envelope.extract()?),
                None => Err(Error::catalog_shape(format!(
                    "expected a list of method names, got {other:?}"
                ))),
            },
        }
    }
}

impl FromIterator<String> for MethodSet {
    fn from_iter<I: IntoIterator<Item = String>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl Display for MethodSet {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), FmtError> {
        write!(f, "{}", self.0.iter().join(", "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn plain_catalog() -> WireValue {
        WireValue::List(vec![
            WireValue::String(names::SUBMIT.to_string()),
            WireValue::String(names::EST_WAIT_TIME.to_string()),
        ])
    }

    #[test]
    fn plain_catalogs_decode() {
        let methods = MethodSet::from_wire(&plain_catalog()).unwrap();

        assert!(methods.contains(names::SUBMIT));
        assert!(methods.supports_load_query());
        assert!(!methods.contains(names::CPU_LOAD));
    }

    #[test]
    fn enveloped_catalogs_decode() {
        let envelope = BlobEnvelope::wrap(&plain_catalog()).unwrap();

        let from_struct = MethodSet::from_wire(&envelope.clone().into_wire()).unwrap();
        let from_bytes =
            MethodSet::from_wire(&WireValue::Bytes(envelope.as_bytes().to_vec())).unwrap();

        assert_eq!(from_struct, from_bytes);
        assert!(from_struct.contains(names::EST_WAIT_TIME));
    }

    #[test]
    fn non_catalog_values_are_rejected() {
        assert!(MethodSet::from_wire(&WireValue::Int(3)).is_err());
        assert!(MethodSet::from_wire(&WireValue::List(vec![WireValue::Int(3)])).is_err());
    }

    #[test]
    fn load_query_support() {
        let legacy: MethodSet = [names::SUBMIT, names::CPU_LOAD]
            .into_iter()
            .map(String::from)
            .collect();
        assert!(legacy.supports_load_query());

        let bare: MethodSet = [names::SUBMIT].into_iter().map(String::from).collect();
        assert!(!bare.supports_load_query());
    }
}
