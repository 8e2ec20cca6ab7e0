use std::io;
use std::net::IpAddr;
use std::path::PathBuf;

use thiserror::Error;

/// Errors surfaced by the sync peer.
///
/// Listener-loop errors are terminal for that loop: they are logged and the
/// service stays down until the whole peer is restarted. Per-connection and
/// per-file errors never escalate past the connection or file they belong to.
#[derive(Error, Debug)]
pub enum Error {
    /// Local IP detection failed, so there is no usable network address.
    #[error("no usable local network address: {0}")]
    NoLocalAddress(#[from] local_ip_address::Error),

    /// The outbox or inbox directory is missing or not a directory.
    #[error("missing '{role}' directory: {path}")]
    MissingDirectory { role: &'static str, path: PathBuf },

    /// A config file that cannot be read or parsed.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// Bind, accept or connect failure.
    #[error("connection error: {0}")]
    Connection(#[source] io::Error),

    /// Malformed or undecodable inventory/record payload.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Failure reading or writing file bytes mid-stream.
    #[error("transfer I/O error for '{name}': {source}")]
    TransferIo {
        name: String,
        #[source]
        source: io::Error,
    },

    /// A peer's inventory could not be fetched; the peer gets evicted.
    #[error("peer {addr} unreachable: {reason}")]
    UnreachablePeer { addr: IpAddr, reason: String },
}

impl Error {
    pub(crate) fn protocol(msg: impl Into<String>) -> Self {
        Error::Protocol(msg.into())
    }
}

pub type Result<T> = std::result::Result<T, Error>;
