//! lancopy - serverless LAN file synchronization
//!
//! Machines on the same local network discover each other over UDP
//! broadcast and exchange files between per-host outbox and inbox
//! directories, with no central server.
//!
//! - [`host`]: discovered hosts and the shared registry
//! - [`discovery`]: presence broadcast and the discovery listener
//! - [`inventory`]: outbox listing and the push-only inventory service
//! - [`sync`]: client-side diff and file pulls
//! - [`peer`]: lifecycle coordination of all of it
//!
//! All traffic is unauthenticated and unencrypted; this is a LAN tool.

pub mod config;
pub mod discovery;
pub mod error;
pub mod host;
pub mod inventory;
pub mod peer;
pub mod protocol;
pub mod sync;
mod transfer;

pub use config::Config;
pub use error::{Error, Result};
pub use host::{Host, Registry};
pub use peer::{Lifecycle, Peer};
pub use protocol::{FileRecord, Inventory};
pub use sync::SyncClient;
