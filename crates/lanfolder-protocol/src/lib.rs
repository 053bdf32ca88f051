//! LAN Folder Protocol -- wire types and datagram codec.
//!
//! One UDP datagram per message, no length prefix. Payload is flat
//! `;`-delimited key/value text behind a fixed namespace token:
//!
//! ```text
//! LAN-Folder;type;<KIND>;uuid;<peer_id>[;path;<path>;ver;<version>;size;<size>]
//! ```

pub mod codec;
pub mod messages;
pub mod version;

pub use codec::DatagramCodec;
pub use messages::*;
pub use version::Version;

/// Namespace token prefixed to every datagram of this protocol.
pub const NAMESPACE: &str = "LAN-Folder";

/// Field delimiter inside a datagram.
pub const DELIMITER: char = ';';

/// Default port for both the UDP listener and the HTTP endpoint.
pub const DEFAULT_PORT: u16 = 12777;

/// Largest payload a single UDP datagram can carry.
pub const MAX_DATAGRAM_SIZE: usize = 65_507;

/// Default timeout for index and file fetches, in seconds.
pub const FETCH_TIMEOUT_SECS: u64 = 3;

#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("missing namespace token")]
    MissingNamespace,
    #[error("unknown message kind: {0}")]
    UnknownKind(String),
    #[error("missing required field: {0}")]
    MissingField(&'static str),
    #[error("invalid value for field {field}: {value:?}")]
    InvalidField { field: &'static str, value: String },
    #[error("dangling key without value: {0}")]
    DanglingKey(String),
    #[error("invalid path {path:?}: {reason}")]
    InvalidPath { path: String, reason: &'static str },
    #[error("datagram too large: {size} bytes (max {max})")]
    DatagramTooLarge { size: usize, max: usize },
    #[error("payload is not utf-8")]
    NotUtf8(#[from] std::str::Utf8Error),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Check that `path` is a relative, slash-separated path that stays inside
/// the shared folder and survives the wire format.
pub fn validate_path(path: &str) -> Result<(), ProtocolError> {
    let invalid = |reason| ProtocolError::InvalidPath {
        path: path.to_string(),
        reason,
    };

    if path.is_empty() {
        return Err(invalid("empty"));
    }
    if path.starts_with('/') {
        return Err(invalid("leading slash"));
    }
    if path.contains(DELIMITER) {
        return Err(invalid("contains delimiter"));
    }
    if path.contains('\\') {
        return Err(invalid("contains backslash"));
    }
    for segment in path.split('/') {
        match segment {
            "" => return Err(invalid("empty segment")),
            "." | ".." => return Err(invalid("relative segment")),
            _ => {}
        }
    }
    Ok(())
}
