//! TCP file transfer service.
//!
//! One connection serves one file: the client sends a framed [`FileRecord`]
//! naming what it wants, the server answers with the raw bytes and closes.
//! There is no length header; end of file is signalled by end of stream.
//! Failures abort the handler silently, so the client only ever observes a
//! short read or a reset.

use std::net::{Ipv4Addr, SocketAddr};
use std::path::PathBuf;

use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::error::{Error, Result};
use crate::inventory::HandlerSlot;
use crate::protocol::{self, FileRecord};

/// File bytes are streamed and flushed in chunks of this size.
pub(crate) const CHUNK_SIZE: usize = 1024;

/// Accept loop for the data port. Any accept error or cancellation ends the
/// loop permanently.
pub(crate) async fn serve(config: Config, inflight: HandlerSlot, cancel: CancellationToken) {
    if let Err(e) = run_server(config, inflight, cancel).await {
        warn!("in data interface: {}", e);
    }
}

async fn run_server(
    config: Config,
    inflight: HandlerSlot,
    cancel: CancellationToken,
) -> Result<()> {
    let listener = TcpListener::bind((Ipv4Addr::UNSPECIFIED, config.data_port))
        .await
        .map_err(Error::Connection)?;
    info!("data interface up on port {}", config.data_port);

    loop {
        let (stream, remote) = tokio::select! {
            _ = cancel.cancelled() => {
                debug!("data interface cancelled");
                return Ok(());
            }
            res = listener.accept() => res.map_err(Error::Connection)?,
        };

        let handle = tokio::spawn(handle_request(stream, remote, config.outbox.clone()));
        *inflight.lock().unwrap() = Some(handle);
    }
}

async fn handle_request(mut stream: TcpStream, remote: SocketAddr, outbox: PathBuf) {
    let record: FileRecord = match protocol::read_frame(&mut stream).await {
        Ok(record) => record,
        Err(e) => {
            debug!("bad transfer request from {}: {}", remote, e);
            return;
        }
    };

    if !record.has_plain_name() {
        debug!("rejecting request for '{}' from {}", record.name, remote);
        return;
    }
    debug!("{} requests {}", remote, record.name);

    let path = outbox.join(&record.name);
    let mut file = match File::open(&path).await {
        Ok(file) => file,
        Err(e) => {
            debug!("cannot open {}: {}", path.display(), e);
            return;
        }
    };

    let mut buf = [0u8; CHUNK_SIZE];
    loop {
        let n = match file.read(&mut buf).await {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) => {
                debug!("reading {}: {}", path.display(), e);
                return;
            }
        };
        if let Err(e) = stream.write_all(&buf[..n]).await {
            debug!("sending {} to {}: {}", record.name, remote, e);
            return;
        }
        if let Err(e) = stream.flush().await {
            debug!("flushing {} to {}: {}", record.name, remote, e);
            return;
        }
    }
    debug!("served {} to {}", record.name, remote);
}
