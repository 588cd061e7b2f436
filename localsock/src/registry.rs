//! Process-wide endpoint registry
//!
//! One mutex guards endpoint membership, the two per-kind lists, and every
//! control block's linkage fields. Ids are allocated monotonically and
//! never reused; the generation counter advances on every attach and
//! detach so snapshot consumers can classify entries created after (or
//! torn down since) their snapshot without dereferencing them.

use alloc::{collections::BTreeMap, sync::Arc, vec::Vec};
use core::sync::atomic::{AtomicU64, Ordering};

use lazy_static::lazy_static;
use spin::Mutex;

use crate::{
    addr::LocalAddr,
    endpoint::{Endpoint, EndpointId},
    socket::{Socket, SocketKind},
};

/// Operation counters behind the observability surface
pub(crate) struct RegistryStats {
    pub(crate) attached: AtomicU64,
    pub(crate) detached: AtomicU64,
    pub(crate) binds: AtomicU64,
    pub(crate) connects: AtomicU64,
}

/// Copy-out summary of the registry counters
#[derive(Debug, Clone, Copy)]
pub struct RegistryStatsSummary {
    pub attached: u64,
    pub detached: u64,
    pub binds: u64,
    pub connects: u64,
    pub live: u64,
    pub generation: u64,
}

pub(crate) struct Registry {
    endpoints: BTreeMap<EndpointId, Endpoint>,
    dgram: Vec<EndpointId>,
    stream: Vec<EndpointId>,
    next_id: u64,
    generation: u64,
    pub(crate) stats: RegistryStats,
}

impl Registry {
    fn new() -> Self {
        Self {
            endpoints: BTreeMap::new(),
            dgram: Vec::new(),
            stream: Vec::new(),
            next_id: 1,
            generation: 0,
            stats: RegistryStats {
                attached: AtomicU64::new(0),
                detached: AtomicU64::new(0),
                binds: AtomicU64::new(0),
                connects: AtomicU64::new(0),
            },
        }
    }

    /// Insert a fresh endpoint for `socket`, assigning its id and
    /// generation.
    pub(crate) fn insert(&mut self, kind: SocketKind, socket: Arc<Socket>) -> EndpointId {
        let id = EndpointId(self.next_id);
        self.next_id += 1;
        self.generation += 1;
        let ep = Endpoint::new(id, kind, socket, self.generation);
        self.endpoints.insert(id, ep);
        match kind {
            SocketKind::Datagram => self.dgram.push(id),
            SocketKind::Stream => self.stream.push(id),
        }
        self.stats.attached.fetch_add(1, Ordering::Relaxed);
        id
    }

    /// Remove an endpoint, advancing the generation.
    pub(crate) fn remove(&mut self, id: EndpointId) -> Option<Endpoint> {
        let ep = self.endpoints.remove(&id)?;
        match ep.kind() {
            SocketKind::Datagram => self.dgram.retain(|e| *e != id),
            SocketKind::Stream => self.stream.retain(|e| *e != id),
        }
        self.generation += 1;
        self.stats.detached.fetch_add(1, Ordering::Relaxed);
        Some(ep)
    }

    pub(crate) fn get(&self, id: EndpointId) -> Option<&Endpoint> {
        self.endpoints.get(&id)
    }

    pub(crate) fn get_mut(&mut self, id: EndpointId) -> Option<&mut Endpoint> {
        self.endpoints.get_mut(&id)
    }

    fn list(&self, kind: SocketKind) -> &Vec<EndpointId> {
        match kind {
            SocketKind::Datagram => &self.dgram,
            SocketKind::Stream => &self.stream,
        }
    }
}

lazy_static! {
    static ref REGISTRY: Mutex<Registry> = Mutex::new(Registry::new());
}

/// Run `f` with the registry locked.
pub(crate) fn with<T>(f: impl FnOnce(&mut Registry) -> T) -> T {
    f(&mut REGISTRY.lock())
}

/// A point-in-time view of one kind's endpoint list
#[derive(Debug, Clone)]
pub struct Snapshot {
    /// Registry generation at snapshot time
    pub generation: u64,
    /// Ids of the endpoints then on the list
    pub ids: Vec<EndpointId>,
}

/// Copy-out record describing one endpoint
#[derive(Debug, Clone)]
pub struct EndpointInfo {
    pub id: EndpointId,
    pub kind: SocketKind,
    pub generation: u64,
    pub bound_name: Option<LocalAddr>,
    pub peer: Option<EndpointId>,
    pub connected: bool,
}

/// Snapshot one kind's list for later per-entry revalidation.
pub fn snapshot(kind: SocketKind) -> Snapshot {
    with(|r| Snapshot {
        generation: r.generation,
        ids: r.list(kind).clone(),
    })
}

/// Revalidate and describe one snapshot entry.
///
/// Returns `None` when the endpoint is gone or was created after the
/// snapshot was taken (its generation exceeds the snapshot's).
pub fn inspect(snap: &Snapshot, id: EndpointId) -> Option<EndpointInfo> {
    with(|r| {
        let ep = r.get(id)?;
        if ep.generation > snap.generation {
            return None;
        }
        Some(EndpointInfo {
            id: ep.id,
            kind: ep.kind,
            generation: ep.generation,
            bound_name: ep.bound_name.clone(),
            peer: ep.peer,
            connected: ep.socket.is_connected(),
        })
    })
}

/// Number of live endpoints across both kinds.
pub fn live_count() -> usize {
    with(|r| r.endpoints.len())
}

/// Copy out the registry counters.
pub fn stats() -> RegistryStatsSummary {
    with(|r| RegistryStatsSummary {
        attached: r.stats.attached.load(Ordering::Relaxed),
        detached: r.stats.detached.load(Ordering::Relaxed),
        binds: r.stats.binds.load(Ordering::Relaxed),
        connects: r.stats.connects.load(Ordering::Relaxed),
        live: r.endpoints.len() as u64,
        generation: r.generation,
    })
}
