//! Peer Selection
//!
//! Picks the adapter to talk to from the set of previously bonded peers.

use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::{info, warn};
use uuid::Uuid;

/// Serial Port Profile service id, used when a peer advertises none
pub const SERIAL_PORT_SERVICE: Uuid = Uuid::from_u128(0x00001101_0000_1000_8000_00805f9b34fb);

/// A bonded peer as reported by the enumeration layer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerRecord {
    pub name: String,
    pub address: String,
    /// Service ids advertised by the peer, most preferred first
    #[serde(default)]
    pub service_ids: Vec<Uuid>,
}

/// The adapter selected for a session
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Peer {
    pub name: String,
    pub address: String,
    /// Service id the channel is bound to
    pub security_id: Uuid,
}

impl fmt::Display for Peer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} [{}]", self.name, self.address)
    }
}

/// Source of bonded peers, in enumeration order
pub trait PeerEnumerator {
    fn bonded_peers(&self) -> Vec<PeerRecord>;
}

/// Fixed peer list, typically loaded from configuration
#[derive(Debug, Clone, Default)]
pub struct StaticPeers(pub Vec<PeerRecord>);

impl PeerEnumerator for StaticPeers {
    fn bonded_peers(&self) -> Vec<PeerRecord> {
        self.0.clone()
    }
}

/// Chooses the last enumerated bonded peer
#[derive(Debug, Clone)]
pub struct PeerSelector {
    default_service: Uuid,
}

impl PeerSelector {
    pub fn new(default_service: Uuid) -> Self {
        Self { default_service }
    }

    /// Select a peer; `None` when nothing is bonded.
    ///
    /// An empty set is a configuration problem, so callers report it
    /// instead of retrying.
    pub fn select(&self, bonded: &[PeerRecord]) -> Option<Peer> {
        let Some(record) = bonded.last() else {
            warn!("There are no bonded peers to select");
            return None;
        };

        let security_id = record
            .service_ids
            .first()
            .copied()
            .unwrap_or(self.default_service);

        let peer = Peer {
            name: record.name.clone(),
            address: record.address.clone(),
            security_id,
        };
        info!("Using peer {} with service {}", peer, peer.security_id);
        Some(peer)
    }

    /// Enumerate and select in one step
    pub fn select_from<E: PeerEnumerator + ?Sized>(&self, enumerator: &E) -> Option<Peer> {
        self.select(&enumerator.bonded_peers())
    }
}

impl Default for PeerSelector {
    fn default() -> Self {
        Self::new(SERIAL_PORT_SERVICE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn record(name: &str, address: &str, service_ids: Vec<Uuid>) -> PeerRecord {
        PeerRecord {
            name: name.into(),
            address: address.into(),
            service_ids,
        }
    }

    #[test]
    fn test_empty_set() {
        assert_eq!(PeerSelector::default().select(&[]), None);
    }

    #[test]
    fn test_picks_last_enumerated() {
        let peers = vec![
            record("Headset", "00:11:22:33:44:55", vec![]),
            record("OBDII", "AA:BB:CC:DD:EE:FF", vec![]),
        ];
        let peer = PeerSelector::default().select(&peers).unwrap();
        assert_eq!(peer.name, "OBDII");
        assert_eq!(peer.address, "AA:BB:CC:DD:EE:FF");
        assert_eq!(peer.security_id, SERIAL_PORT_SERVICE);
    }

    #[test]
    fn test_advertised_service_preferred() {
        let advertised = Uuid::from_u128(0x1234);
        let peers = vec![record("OBDII", "AA:BB", vec![advertised, SERIAL_PORT_SERVICE])];
        let peer = PeerSelector::default().select(&peers).unwrap();
        assert_eq!(peer.security_id, advertised);
    }

    #[test]
    fn test_default_service_uuid() {
        assert_eq!(
            SERIAL_PORT_SERVICE.to_string(),
            "00001101-0000-1000-8000-00805f9b34fb"
        );
    }

    #[test]
    fn test_static_enumerator() {
        let peers = StaticPeers(vec![record("ELM327", "10.0.0.10:35000", vec![])]);
        let peer = PeerSelector::default().select_from(&peers).unwrap();
        assert_eq!(peer.address, "10.0.0.10:35000");
    }

    proptest! {
        #[test]
        fn prop_selected_peer_is_bonded(
            entries in proptest::collection::vec(("[a-z]{1,8}", "[0-9A-F:]{2,17}", proptest::option::of(any::<u128>())), 1..10)
        ) {
            let bonded: Vec<PeerRecord> = entries
                .iter()
                .map(|(n, a, s)| record(n, a, s.map(Uuid::from_u128).into_iter().collect()))
                .collect();
            let selector = PeerSelector::default();
            let peer = selector.select(&bonded).unwrap();
            prop_assert!(bonded.iter().any(|r| r.name == peer.name && r.address == peer.address));
            // Deterministic for a fixed enumeration order
            prop_assert_eq!(selector.select(&bonded), Some(peer));
        }
    }
}
