use std::collections::HashSet;
use std::hash::{Hash, Hasher};
use std::net::IpAddr;
use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};

/// A machine discovered on the LAN.
///
/// Identity is the address alone: two sightings of the same address are the
/// same host even when the advertised name differs. Immutable once built.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Host {
    pub addr: IpAddr,
    pub name: String,
}

impl Host {
    pub fn new(addr: IpAddr, name: impl Into<String>) -> Self {
        Self {
            addr,
            name: name.into(),
        }
    }
}

impl PartialEq for Host {
    fn eq(&self, other: &Self) -> bool {
        self.addr == other.addr
    }
}

impl Eq for Host {}

impl Hash for Host {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.addr.hash(state);
    }
}

/// The set of currently known hosts.
///
/// Mutated by the discovery listener (insertions) and by client operations
/// that prove a host unreachable (removals); a single lock serializes all
/// access. Readers get a point-in-time copy. Hosts never expire on their
/// own.
#[derive(Clone, Default)]
pub struct Registry {
    hosts: Arc<Mutex<HashSet<Host>>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, host: Host) {
        let mut hosts = self.hosts.lock().unwrap();
        hosts.insert(host);
    }

    pub fn remove(&self, addr: IpAddr) -> bool {
        let mut hosts = self.hosts.lock().unwrap();
        let before = hosts.len();
        hosts.retain(|h| h.addr != addr);
        hosts.len() != before
    }

    pub fn snapshot(&self) -> Vec<Host> {
        let hosts = self.hosts.lock().unwrap();
        hosts.iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.hosts.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    fn addr(last: u8) -> IpAddr {
        IpAddr::V4(Ipv4Addr::new(192, 168, 1, last))
    }

    #[test]
    fn insert_is_idempotent_by_address() {
        let registry = Registry::new();
        registry.insert(Host::new(addr(10), "atlas"));
        registry.insert(Host::new(addr(10), "renamed-atlas"));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn different_addresses_are_different_hosts() {
        let registry = Registry::new();
        registry.insert(Host::new(addr(10), "atlas"));
        registry.insert(Host::new(addr(11), "atlas"));
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn remove_by_address() {
        let registry = Registry::new();
        registry.insert(Host::new(addr(10), "atlas"));
        assert!(registry.remove(addr(10)));
        assert!(!registry.remove(addr(10)));
        assert!(registry.is_empty());
    }

    #[test]
    fn snapshot_is_a_copy() {
        let registry = Registry::new();
        registry.insert(Host::new(addr(10), "atlas"));
        let snap = registry.snapshot();
        registry.remove(addr(10));
        assert_eq!(snap.len(), 1);
        assert!(registry.is_empty());
    }
}
