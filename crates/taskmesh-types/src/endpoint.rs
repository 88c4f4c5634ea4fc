use core::fmt::{Display, Error as FmtError, Formatter};
use core::str::FromStr;

use once_cell::sync::Lazy;
use serde_derive::{Deserialize, Serialize};

use crate::error::Error;

/// Well-known port workers listen on when none is configured.
pub const DEFAULT_PORT: u16 = 9287;

static COMPUTER_NAME: Lazy<String> =
    Lazy::new(|| gethostname::gethostname().to_string_lossy().into_owned());

/// Name of the machine this process runs on.
///
/// `localhost` endpoint references are canonicalized to this name so local
/// and remote references to the same machine collapse to one key.
pub fn computer_name() -> &'static str {
    &COMPUTER_NAME
}

/// Identity of a worker endpoint: an immutable `(host, port)` pair.
#[derive(Clone, Debug, Hash, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct EndpointId {
    host: String,
    port: u16,
}

impl EndpointId {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        let host = host.into();
        let host = if host == "localhost" {
            computer_name().to_string()
        } else {
            host
        };

        Self { host, port }
    }

    /// The endpoint a worker on this machine listens on by default.
    pub fn local() -> Self {
        Self::new("localhost", DEFAULT_PORT)
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }
}

impl Display for EndpointId {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), FmtError> {
        write!(f, "{}:{}", self.host, self.port)
    }
}

impl TryFrom<String> for EndpointId {
    type Error = Error;

    fn try_from(address: String) -> Result<Self, Error> {
        let mut parts = address.split(':');

        let host = match parts.next() {
            Some(host) if !host.is_empty() => host,
            _ => return Err(Error::malformed_endpoint(address.clone())),
        };

        let port = match parts.next() {
            None => DEFAULT_PORT,
            Some(port) => port
                .parse()
                .map_err(|e| Error::invalid_port(address.clone(), e))?,
        };

        if parts.next().is_some() {
            return Err(Error::malformed_endpoint(address));
        }

        Ok(Self::new(host, port))
    }
}

impl FromStr for EndpointId {
    type Err = Error;

    fn from_str(address: &str) -> Result<Self, Error> {
        Self::try_from(address.to_string())
    }
}

impl From<EndpointId> for String {
    fn from(id: EndpointId) -> Self {
        id.to_string()
    }
}
