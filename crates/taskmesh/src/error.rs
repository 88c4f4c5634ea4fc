use flex_error::{define_error, TraceError};

use taskmesh_types::endpoint::EndpointId;
use taskmesh_types::error::Error as TypesError;

define_error! {
    /// Faults raised by a single worker endpoint.
    #[derive(Debug)]
    EndpointError {
        Transport
            { reason: String }
            | e | { format_args!("transport error: {}", e.reason) },

        MethodMissing
            { method: String }
            | e | { format_args!("worker does not publish method {}", e.method) },

        Refused
            { reason: String }
            | e | { format_args!("worker refused the request: {}", e.reason) },

        Protocol
            [ TypesError ]
            | _ | { "could not decode worker reply" },

        Other
            { reason: String }
            | e | { format_args!("{}", e.reason) },
    }
}

impl EndpointError {
    /// Socket-class faults are transient: callers assume the peer's state
    /// is unchanged and try again on the next sweep. Everything else is
    /// unrecoverable for the affected task.
    pub fn is_transport(&self) -> bool {
        matches!(self.detail(), EndpointErrorDetail::Transport(_))
    }
}

define_error! {
    Error {
        ConfigIo
            [ TraceError<std::io::Error> ]
            | _ | { "config I/O error" },

        ConfigDecode
            [ TraceError<toml::de::Error> ]
            | _ | { "invalid config" },

        ConfigEncode
            [ TraceError<toml::ser::Error> ]
            | _ | { "config serialization failed" },

        DuplicateEndpoint
            { endpoint: EndpointId }
            | e | { format_args!("endpoint {} was specified more than once", e.endpoint) },

        UnknownEndpoint
            { endpoint: EndpointId }
            | e | { format_args!("no transport available for endpoint {}", e.endpoint) },

        NoReachableEndpoint
            { timeout_secs: u64 }
            | e | {
                format_args!(
                    "no server could be reached within {} seconds, retry later",
                    e.timeout_secs
                )
            },

        Endpoint
            { endpoint: EndpointId }
            [ EndpointError ]
            | e | { format_args!("endpoint {} failed", e.endpoint) },

        SpawnLocalServer
            { reason: String }
            | e | { format_args!("could not start the local server: {}", e.reason) },

        LocalServerUnreachable
            | _ | { "could not connect to the local server" },

        Types
            [ TypesError ]
            | _ | { "invalid value" },
    }
}
