//! Client half of the protocol: inventory fetch, diff, and file pulls.

use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::error::{Error, Result};
use crate::host::{Host, Registry};
use crate::inventory;
use crate::protocol::{self, FileRecord, Inventory};
use crate::transfer::CHUNK_SIZE;

/// Read deadline applied when only the file list is wanted.
pub const LIST_FETCH_TIMEOUT: Duration = Duration::from_millis(500);

/// Decides whether a remote record is worth fetching.
///
/// Needed when no local record shares its name, or the local namesake is
/// strictly older. Equal timestamps count as up to date.
fn is_needed(remote: &FileRecord, local: &[FileRecord]) -> bool {
    match local.iter().find(|l| l.name == remote.name) {
        None => true,
        Some(l) => l.modified < remote.modified,
    }
}

/// Remote records that are missing or newer locally, in remote order.
pub fn diff(remote: &[FileRecord], local: &[FileRecord]) -> Vec<FileRecord> {
    remote
        .iter()
        .filter(|r| is_needed(r, local))
        .cloned()
        .collect()
}

/// Pulls files from one remote peer at a time.
///
/// Cheap to clone; independent clients against different hosts may run
/// concurrently.
#[derive(Clone)]
pub struct SyncClient {
    config: Config,
    registry: Registry,
}

impl SyncClient {
    pub fn new(config: Config, registry: Registry) -> Self {
        Self { config, registry }
    }

    /// Fetches a peer's file list under the short list-only deadline.
    ///
    /// On any I/O, timeout or decode failure the host is evicted from the
    /// registry and `None` is returned; nothing surfaces to the caller.
    pub async fn list_files(&self, host: &Host) -> Option<Inventory> {
        self.fetch_inventory(host, Some(LIST_FETCH_TIMEOUT)).await
    }

    /// Pulls every file the diff says is needed into the inbox.
    ///
    /// Returns how many files arrived. An unreachable peer yields `Ok(0)`
    /// after eviction; a missing inbox is a configuration error. Per-file
    /// failures are logged and never abort the batch.
    pub async fn sync_all(&self, host: &Host) -> Result<usize> {
        let Some(remote) = self.fetch_inventory(host, None).await else {
            return Ok(0);
        };
        let local = inventory::scan(&self.config.inbox, "inbox")?;
        let needed = diff(&remote, &local);
        info!("receiving {} files from {}", needed.len(), host.addr);
        Ok(self.fetch_batch(host, &needed).await)
    }

    /// Pulls only the caller-chosen records that the peer actually offers,
    /// bypassing the diff.
    pub async fn sync_selected(&self, host: &Host, wanted: &[FileRecord]) -> Result<usize> {
        if wanted.is_empty() {
            return Ok(0);
        }
        let Some(remote) = self.fetch_inventory(host, None).await else {
            return Ok(0);
        };
        let chosen: Vec<FileRecord> = remote
            .into_iter()
            .filter(|r| wanted.contains(r))
            .collect();
        info!("receiving {} selected files from {}", chosen.len(), host.addr);
        Ok(self.fetch_batch(host, &chosen).await)
    }

    /// Pulls one named file to an explicit destination path, bypassing the
    /// diff. Returns whether the peer offered the file and it arrived.
    pub async fn fetch_file_to(&self, host: &Host, name: &str, dest: &Path) -> Result<bool> {
        let Some(remote) = self.fetch_inventory(host, None).await else {
            return Ok(false);
        };
        let Some(record) = remote.into_iter().find(|r| r.name == name) else {
            debug!("{} does not offer {}", host.addr, name);
            return Ok(false);
        };

        info!("client requests {}", record.name);
        match self.fetch_file(host, &record, dest).await {
            Ok(()) => Ok(true),
            Err(e) => {
                warn!("error {}", e);
                Ok(false)
            }
        }
    }

    /// Reproduces the diff rule for one candidate record against the
    /// current inbox, without any network round trip. Errors (including a
    /// missing inbox) answer "no".
    pub fn needs_file(&self, remote: &FileRecord) -> bool {
        match inventory::scan(&self.config.inbox, "inbox") {
            Ok(local) => is_needed(remote, &local),
            Err(e) => {
                warn!("{}", e);
                false
            }
        }
    }

    async fn fetch_inventory(&self, host: &Host, deadline: Option<Duration>) -> Option<Inventory> {
        let fetch = self.fetch_inventory_raw(host);
        let result = match deadline {
            Some(d) => match time::timeout(d, fetch).await {
                Ok(result) => result,
                Err(_) => Err(Error::UnreachablePeer {
                    addr: host.addr,
                    reason: "inventory fetch timed out".into(),
                }),
            },
            None => fetch.await,
        };

        match result {
            Ok(inventory) => {
                debug!("received file list from {}", host.addr);
                Some(inventory)
            }
            Err(e) => {
                warn!("in inventory fetch from {}: {}", host.name, e);
                if self.registry.remove(host.addr) {
                    info!("host {} is unreachable, removing", host.name);
                }
                None
            }
        }
    }

    async fn fetch_inventory_raw(&self, host: &Host) -> Result<Inventory> {
        let addr = SocketAddr::new(host.addr, self.config.inventory_port);
        let mut stream = TcpStream::connect(addr)
            .await
            .map_err(|e| Error::UnreachablePeer {
                addr: host.addr,
                reason: e.to_string(),
            })?;
        protocol::read_frame(&mut stream).await
    }

    async fn fetch_batch(&self, host: &Host, records: &[FileRecord]) -> usize {
        let mut fetched = 0;
        for record in records {
            if !record.has_plain_name() {
                warn!("ignoring remote record with unsafe name '{}'", record.name);
                continue;
            }
            info!("client requests {}", record.name);
            let dest = self.config.inbox.join(&record.name);
            match self.fetch_file(host, record, &dest).await {
                Ok(()) => fetched += 1,
                // Isolated per file; the batch moves on.
                Err(e) => warn!("error {}", e),
            }
        }
        fetched
    }

    async fn fetch_file(&self, host: &Host, record: &FileRecord, dest: &Path) -> Result<()> {
        let addr = SocketAddr::new(host.addr, self.config.data_port);
        let mut stream = TcpStream::connect(addr).await.map_err(Error::Connection)?;
        protocol::write_frame(&mut stream, record).await?;

        let mut file = File::create(dest).await.map_err(|e| Error::TransferIo {
            name: record.name.clone(),
            source: e,
        })?;

        // No length header on the wire; read until the server closes.
        let mut buf = [0u8; CHUNK_SIZE];
        loop {
            let n = stream.read(&mut buf).await.map_err(|e| Error::TransferIo {
                name: record.name.clone(),
                source: e,
            })?;
            if n == 0 {
                break;
            }
            file.write_all(&buf[..n])
                .await
                .map_err(|e| Error::TransferIo {
                    name: record.name.clone(),
                    source: e,
                })?;
        }
        file.flush().await.map_err(|e| Error::TransferIo {
            name: record.name.clone(),
            source: e,
        })?;
        info!("file {} received", record.name);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(name: &str, modified: u64) -> FileRecord {
        FileRecord::new(name, 100, modified)
    }

    #[test]
    fn unknown_remote_file_is_needed() {
        let remote = [record("report.txt", 100)];
        let local = [record("other.txt", 100)];
        assert_eq!(diff(&remote, &local), vec![record("report.txt", 100)]);
    }

    #[test]
    fn newer_remote_file_is_needed() {
        let remote = [record("report.txt", 200)];
        let local = [record("report.txt", 100)];
        assert_eq!(diff(&remote, &local).len(), 1);
    }

    #[test]
    fn equal_timestamp_is_up_to_date() {
        let remote = [record("report.txt", 100)];
        let local = [record("report.txt", 100)];
        assert!(diff(&remote, &local).is_empty());
    }

    #[test]
    fn older_remote_file_is_not_needed() {
        let remote = [record("report.txt", 100)];
        let local = [record("report.txt", 200)];
        assert!(diff(&remote, &local).is_empty());
    }

    #[test]
    fn diff_preserves_remote_order() {
        let remote = [record("b", 100), record("a", 100)];
        let needed = diff(&remote, &[]);
        assert_eq!(needed[0].name, "b");
        assert_eq!(needed[1].name, "a");
    }

    #[test]
    fn needs_file_against_scratch_inbox() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("report.txt"), b"hello").unwrap();
        let local = inventory::scan(dir.path(), "inbox").unwrap();
        let have = &local[0];

        let config = Config::new("atlas", dir.path().to_path_buf(), dir.path().to_path_buf());
        let client = SyncClient::new(config, Registry::new());

        assert!(client.needs_file(&record("missing.txt", 1)));
        assert!(client.needs_file(&record("report.txt", have.modified + 1)));
        assert!(!client.needs_file(&record("report.txt", have.modified)));
        assert!(!client.needs_file(&record("report.txt", have.modified - 1)));
    }

    #[test]
    fn needs_file_answers_no_when_inbox_is_missing() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::new(
            "atlas",
            dir.path().join("out"),
            dir.path().join("gone"),
        );
        let client = SyncClient::new(config, Registry::new());
        assert!(!client.needs_file(&record("report.txt", 1)));
    }
}
