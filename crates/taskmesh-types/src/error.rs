use flex_error::{define_error, TraceError};

define_error! {
    Error {
        EmptyTaskName
            | _ | { "task must have a non-empty name" },

        MalformedEndpoint
            { address: String }
            | e | { format_args!("`{}` is not a valid host or host:port pair", e.address) },

        InvalidPort
            { address: String }
            [ TraceError<std::num::ParseIntError> ]
            | e | { format_args!("invalid port in `{}`", e.address) },

        BlobEncode
            [ TraceError<serde_cbor::Error> ]
            | _ | { "failed to encode value into a blob envelope" },

        BlobDecode
            [ TraceError<serde_cbor::Error> ]
            | _ | { "failed to decode blob envelope" },

        CatalogShape
            { reason: String }
            | e | { format_args!("malformed method catalog: {}", e.reason) },
    }
}
