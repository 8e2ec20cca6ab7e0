//! UDP presence broadcast and discovery.
//!
//! Every second the broadcaster sends one datagram to the limited broadcast
//! address on the discovery port; the payload is the advertised name as raw
//! UTF-8, no framing. Repetition is the only reliability mechanism. The
//! listener turns every foreign datagram into a [`Host`] in the registry.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Duration;

use tokio::net::UdpSocket;
use tokio::time;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::host::{Host, Registry};

/// Cadence of presence datagrams.
pub const BROADCAST_INTERVAL: Duration = Duration::from_secs(1);

/// Advertised names longer than this are truncated by the receive buffer.
const MAX_DATAGRAM: usize = 1024;

/// Detects this machine's non-loopback address.
pub fn detect_local_ip() -> Result<IpAddr> {
    local_ip_address::local_ip().map_err(Error::from)
}

/// Self-filter for inbound datagrams.
///
/// A datagram is ours when the sender is the loopback address, the address
/// detected at startup, or a freshly re-detected local address. The fresh
/// re-detection is deliberately redundant: it keeps the filter working when
/// detection failed at startup (`local` is `None`) but succeeds later.
pub(crate) fn is_self_addr(sender: IpAddr, local: Option<IpAddr>, fresh: Option<IpAddr>) -> bool {
    sender.is_loopback() || local == Some(sender) || fresh == Some(sender)
}

/// Broadcasts this host's advertised name until cancelled.
pub(crate) async fn broadcast_presence(name: String, discovery_port: u16, cancel: CancellationToken) {
    let socket = match UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0)).await {
        Ok(socket) => socket,
        Err(e) => {
            warn!("broadcaster: cannot create socket: {}", e);
            return;
        }
    };
    if let Err(e) = socket.set_broadcast(true) {
        warn!("broadcaster: cannot enable broadcast: {}", e);
        return;
    }

    let target = SocketAddr::from((Ipv4Addr::BROADCAST, discovery_port));
    let mut ticker = time::interval(BROADCAST_INTERVAL);
    info!("broadcasting up");

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                debug!("broadcaster cancelled");
                return;
            }
            _ = ticker.tick() => {
                // Delivery is best-effort; the next tick retries anyway.
                if let Err(e) = socket.send_to(name.as_bytes(), target).await {
                    warn!("in broadcast: {}", e);
                }
            }
        }
    }
}

/// Receives presence datagrams and populates the registry until cancelled.
///
/// Any bind or receive error ends the loop permanently; discovery stays down
/// until the whole peer is restarted.
pub(crate) async fn listen(
    registry: Registry,
    discovery_port: u16,
    local_ip: Option<IpAddr>,
    cancel: CancellationToken,
) {
    if let Err(e) = run_listener(registry, discovery_port, local_ip, cancel).await {
        warn!("in discovery: {}", e);
    }
}

async fn run_listener(
    registry: Registry,
    discovery_port: u16,
    local_ip: Option<IpAddr>,
    cancel: CancellationToken,
) -> Result<()> {
    let socket = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, discovery_port))
        .await
        .map_err(Error::Connection)?;
    info!("discovery up on port {}", discovery_port);

    let mut buf = [0u8; MAX_DATAGRAM];
    loop {
        let (len, from) = tokio::select! {
            _ = cancel.cancelled() => {
                debug!("discovery listener cancelled");
                return Ok(());
            }
            res = socket.recv_from(&mut buf) => res.map_err(Error::Connection)?,
        };

        let sender = from.ip();
        if is_self_addr(sender, local_ip, detect_local_ip().ok()) {
            continue;
        }

        let name = String::from_utf8_lossy(&buf[..len]).into_owned();
        debug!("discovered {} ({})", name, sender);
        registry.insert(Host::new(sender, name));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const LOCAL: IpAddr = IpAddr::V4(Ipv4Addr::new(192, 168, 1, 7));
    const OTHER: IpAddr = IpAddr::V4(Ipv4Addr::new(192, 168, 1, 20));

    #[test]
    fn loopback_is_always_filtered() {
        let lo = IpAddr::V4(Ipv4Addr::LOCALHOST);
        assert!(is_self_addr(lo, None, None));
        assert!(is_self_addr(lo, Some(LOCAL), Some(LOCAL)));
    }

    #[test]
    fn own_address_is_filtered() {
        assert!(is_self_addr(LOCAL, Some(LOCAL), None));
    }

    #[test]
    fn fresh_detection_covers_missed_startup_detection() {
        // Startup detection failed but the address resolves now.
        assert!(is_self_addr(LOCAL, None, Some(LOCAL)));
    }

    #[test]
    fn foreign_address_passes() {
        assert!(!is_self_addr(OTHER, Some(LOCAL), Some(LOCAL)));
        assert!(!is_self_addr(OTHER, None, None));
    }
}
