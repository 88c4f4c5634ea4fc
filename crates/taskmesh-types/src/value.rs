use std::collections::BTreeMap;

use serde_derive::{Deserialize, Serialize};

use crate::error::Error;

/// An RPC-native value: what workers and clients exchange without any
/// further encoding.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum WireValue {
    Nil,
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
    Bytes(Vec<u8>),
    List(Vec<WireValue>),
    Struct(BTreeMap<String, WireValue>),
}

impl WireValue {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            WireValue::String(s) => Some(s),
            _ => None,
        }
    }
}

impl From<bool> for WireValue {
    fn from(value: bool) -> Self {
        WireValue::Bool(value)
    }
}

impl From<i64> for WireValue {
    fn from(value: i64) -> Self {
        WireValue::Int(value)
    }
}

impl From<f64> for WireValue {
    fn from(value: f64) -> Self {
        WireValue::Float(value)
    }
}

impl From<&str> for WireValue {
    fn from(value: &str) -> Self {
        WireValue::String(value.to_string())
    }
}

impl From<String> for WireValue {
    fn from(value: String) -> Self {
        WireValue::String(value)
    }
}

/// Field name of the envelope struct on the wire.
const BLOB_FIELD: &str = "blob";

/// A serialized-value envelope: the well-known single-field struct whose
/// payload is a CBOR byte string produced by another worker implementation,
/// possibly in another language.
///
/// Consumers call [`extract`](BlobEnvelope::extract) to obtain the real
/// value; the manager does so transparently before delivering results.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BlobEnvelope {
    blob: Vec<u8>,
}

impl BlobEnvelope {
    /// Encode a value into an envelope.
    pub fn wrap(value: &WireValue) -> Result<Self, Error> {
        let blob = serde_cbor::to_vec(value).map_err(Error::blob_encode)?;
        Ok(Self { blob })
    }

    /// Deserialize the enveloped value.
    pub fn extract(&self) -> Result<WireValue, Error> {
        serde_cbor::from_slice(&self.blob).map_err(Error::blob_decode)
    }

    pub fn from_bytes(blob: Vec<u8>) -> Self {
        Self { blob }
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.blob
    }

    /// Recognize the envelope's wire form, a struct with the single field
    /// `blob` holding a byte string.
    pub fn from_wire(value: &WireValue) -> Option<Self> {
        match value {
            WireValue::Struct(fields) if fields.len() == 1 => match fields.get(BLOB_FIELD) {
                Some(WireValue::Bytes(blob)) => Some(Self { blob: blob.clone() }),
                _ => None,
            },
            _ => None,
        }
    }

    pub fn into_wire(self) -> WireValue {
        let mut fields = BTreeMap::new();
        fields.insert(BLOB_FIELD.to_string(), WireValue::Bytes(self.blob));
        WireValue::Struct(fields)
    }
}
