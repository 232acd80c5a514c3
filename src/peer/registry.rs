use super::PeerConnection;
use crate::error::{LeechError, Result};
use std::collections::HashSet;
use std::net::SocketAddr;
use tracing::debug;

/// A registered connection and what its peer advertised
pub struct PeerEntry {
    pub connection: PeerConnection,
    pub bitfield: Option<Vec<u32>>,
}

/// Candidate addresses plus the bounded set of live connections.
///
/// Connections are kept in insertion order; that order is the order the
/// scheduler visits them in.
pub struct PeerRegistry {
    candidates: Vec<SocketAddr>,
    cursor: usize,
    /// Addresses that connected once and went away; never retried
    retired: HashSet<SocketAddr>,
    entries: Vec<PeerEntry>,
    max_peers: usize,
}

impl PeerRegistry {
    pub fn new(max_peers: usize) -> Self {
        Self {
            candidates: Vec::new(),
            cursor: 0,
            retired: HashSet::new(),
            entries: Vec::new(),
            max_peers,
        }
    }

    /// Add an address to the candidate pool. Returns false when it is
    /// already pooled or was retired.
    pub fn add_candidate(&mut self, addr: SocketAddr) -> bool {
        if self.retired.contains(&addr) || self.candidates.contains(&addr) {
            return false;
        }
        self.candidates.push(addr);
        true
    }

    /// Next address from the pool, round-robin with a wrapping cursor
    pub fn next_candidate(&mut self) -> Option<SocketAddr> {
        if self.candidates.is_empty() {
            return None;
        }
        if self.cursor >= self.candidates.len() {
            self.cursor = 0;
        }

        let addr = self.candidates[self.cursor];
        self.cursor = (self.cursor + 1) % self.candidates.len();
        Some(addr)
    }

    /// Register a connection with no bitfield yet. Rejected when the
    /// address is already registered or the ceiling is reached.
    pub fn promote(&mut self, connection: PeerConnection) -> Result<()> {
        let addr = connection.addr();

        if self.contains(&addr) {
            return Err(LeechError::Peer(format!("{} is already connected", addr)));
        }
        if self.is_full() {
            return Err(LeechError::Peer(format!(
                "connection limit of {} reached",
                self.max_peers
            )));
        }

        debug!("Promoted {} ({} connections)", addr, self.entries.len() + 1);
        self.entries.push(PeerEntry {
            connection,
            bitfield: None,
        });
        Ok(())
    }

    /// Attach advertised pieces. No-op when the peer was already removed.
    pub fn record_bitfield(&mut self, addr: &SocketAddr, indices: Vec<u32>) {
        if let Some(entry) = self.get_mut(addr) {
            entry.bitfield = Some(indices);
        }
    }

    /// Deregister a connection and retire its address. Returns the entry
    /// only on the first call for a given registration.
    pub fn remove(&mut self, addr: &SocketAddr) -> Option<PeerEntry> {
        let position = self.entries.iter().position(|e| e.connection.addr() == *addr)?;

        self.retired.insert(*addr);
        if let Some(i) = self.candidates.iter().position(|c| c == addr) {
            self.candidates.remove(i);
            if i < self.cursor {
                self.cursor -= 1;
            }
        }

        Some(self.entries.remove(position))
    }

    /// Addresses whose connection can take a new request, in insertion order
    pub fn eligible_peers(&self) -> Vec<SocketAddr> {
        self.entries
            .iter()
            .filter(|e| e.connection.is_free())
            .map(|e| e.connection.addr())
            .collect()
    }

    /// Pooled addresses that are not connected right now
    pub fn untried_count(&self) -> usize {
        self.candidates.iter().filter(|c| !self.contains(c)).count()
    }

    pub fn candidate_count(&self) -> usize {
        self.candidates.len()
    }

    pub fn contains(&self, addr: &SocketAddr) -> bool {
        self.entries.iter().any(|e| e.connection.addr() == *addr)
    }

    pub fn get_mut(&mut self, addr: &SocketAddr) -> Option<&mut PeerEntry> {
        self.entries.iter_mut().find(|e| e.connection.addr() == *addr)
    }

    pub fn connections(&self) -> impl Iterator<Item = &PeerConnection> {
        self.entries.iter().map(|e| &e.connection)
    }

    pub fn connections_mut(&mut self) -> impl Iterator<Item = &mut PeerConnection> {
        self.entries.iter_mut().map(|e| &mut e.connection)
    }

    /// Remove every entry, for shutdown
    pub fn drain(&mut self) -> Vec<PeerEntry> {
        self.entries.drain(..).collect()
    }

    pub fn is_full(&self) -> bool {
        self.entries.len() >= self.max_peers
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
