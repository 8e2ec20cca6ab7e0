//! Outbox listing and the push-only inventory service.
//!
//! A peer that connects to the inventory port receives one framed
//! [`Inventory`] of the local outbox and nothing else; the server never
//! reads from the connection. The listing is computed fresh per connection.

use std::net::{Ipv4Addr, SocketAddr};
use std::path::Path;
use std::sync::{Arc, Mutex};

use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::error::{Error, Result};
use crate::protocol::{self, FileRecord, Inventory};

/// Slot holding the most recent connection handler, so shutdown can wait
/// for an in-flight response before closing the listener.
pub(crate) type HandlerSlot = Arc<Mutex<Option<JoinHandle<()>>>>;

/// Lists a directory as an inventory, sorted by file name.
///
/// Only regular files are listed. A missing or unreadable directory is a
/// configuration error for whichever operation needed it.
pub fn scan(dir: &Path, role: &'static str) -> Result<Inventory> {
    let entries = std::fs::read_dir(dir).map_err(|_| Error::MissingDirectory {
        role,
        path: dir.to_path_buf(),
    })?;

    let mut records = Vec::new();
    for entry in entries.flatten() {
        let meta = match entry.metadata() {
            Ok(meta) => meta,
            Err(e) => {
                debug!("skipping unreadable entry {:?}: {}", entry.path(), e);
                continue;
            }
        };
        if !meta.is_file() {
            continue;
        }
        let name = entry.file_name().to_string_lossy().into_owned();
        records.push(FileRecord::from_metadata(name, &meta));
    }
    records.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(records)
}

/// Accept loop for the inventory port. Any accept error, a missing outbox,
/// or cancellation ends the loop; the service stays down afterwards.
pub(crate) async fn serve(config: Config, inflight: HandlerSlot, cancel: CancellationToken) {
    if let Err(e) = run_server(config, inflight, cancel).await {
        warn!("in inventory interface: {}", e);
    }
}

async fn run_server(
    config: Config,
    inflight: HandlerSlot,
    cancel: CancellationToken,
) -> Result<()> {
    let listener = TcpListener::bind((Ipv4Addr::UNSPECIFIED, config.inventory_port))
        .await
        .map_err(Error::Connection)?;
    info!("inventory interface up on port {}", config.inventory_port);

    loop {
        let (stream, remote) = tokio::select! {
            _ = cancel.cancelled() => {
                debug!("inventory interface cancelled");
                return Ok(());
            }
            res = listener.accept() => res.map_err(Error::Connection)?,
        };

        // Computed in the accept loop: a missing outbox kills the service,
        // not just this connection.
        let inventory = scan(&config.outbox, "outbox")?;
        let handle = tokio::spawn(push_inventory(stream, remote, inventory));
        *inflight.lock().unwrap() = Some(handle);
    }
}

async fn push_inventory(mut stream: TcpStream, remote: SocketAddr, inventory: Inventory) {
    debug!("sending inventory ({} files) to {}", inventory.len(), remote);
    if let Err(e) = protocol::write_frame(&mut stream, &inventory).await {
        debug!("inventory push to {} failed: {}", remote, e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn scan_lists_files_sorted_by_name() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("b.txt"), b"bb").unwrap();
        fs::write(dir.path().join("a.txt"), b"a").unwrap();
        fs::create_dir(dir.path().join("nested")).unwrap();
        fs::write(dir.path().join("nested").join("c.txt"), b"ccc").unwrap();

        let inventory = scan(dir.path(), "outbox").unwrap();
        let names: Vec<_> = inventory.iter().map(|r| r.name.as_str()).collect();
        assert_eq!(names, ["a.txt", "b.txt"]);
        assert_eq!(inventory[0].size, 1);
        assert_eq!(inventory[1].size, 2);
        assert!(inventory[0].modified > 0);
    }

    #[test]
    fn scan_of_missing_directory_fails() {
        let dir = tempfile::tempdir().unwrap();
        let err = scan(&dir.path().join("gone"), "outbox").unwrap_err();
        assert!(matches!(
            err,
            Error::MissingDirectory { role: "outbox", .. }
        ));
    }

    #[test]
    fn scan_of_empty_directory_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        assert!(scan(dir.path(), "inbox").unwrap().is_empty());
    }
}
