//! Error taxonomy for the value-store protocol.

use thiserror::Error;

use crate::cid::ContentId;

/// Failures surfaced by the codec, the resolver adapter and the put/get
/// operations.
///
/// Inbound handlers never propagate these to the remote side; the protocol has
/// no error frames, so they are logged and the frame is dropped.
#[derive(Error, Debug)]
pub enum ValueError {
    /// The stream was closed or reset. Treat as "peer disconnected".
    #[error("stream i/o failed: {0}")]
    Io(#[from] std::io::Error),

    /// Dialing the peer or opening a stream failed.
    #[error("connection failed: {0}")]
    Connect(String),

    /// The DHT could not resolve a closest peer, a provider or an address.
    #[error("resolution failed: {0}")]
    Resolution(String),

    #[error("no providers found for {0}")]
    NoProviders(ContentId),

    /// We are the announced provider but the value is not in the local store.
    #[error("{0} is not held locally")]
    NotFound(ContentId),

    /// A line that does not match any known frame shape.
    #[error("malformed frame: {0}")]
    Encoding(String),

    #[error("invalid content id: {0}")]
    InvalidCid(String),

    #[error("invalid peer address: {0}")]
    InvalidAddress(String),
}
