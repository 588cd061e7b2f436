//! Endpoint control blocks and per-endpoint queries
//!
//! The control block carries everything the subsystem knows about one
//! socket: its pairing, bound name, rendezvous node, flow-control credit
//! caches, and cached peer credentials. All mutable fields are guarded by
//! the registry lock; the block itself lives inside the registry.

use alloc::{sync::Arc, vec::Vec};
use core::sync::atomic::{AtomicU64, Ordering};

use bitflags::bitflags;

use crate::{
    addr::LocalAddr,
    cred::Credentials,
    error::{Result, SockError},
    namespace::NameNode,
    registry,
    socket::{Socket, SocketKind},
};

/// Endpoint identifier; never reused within a process lifetime
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct EndpointId(pub u64);

bitflags! {
    /// Per-endpoint state bits
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct EndpointFlags: u32 {
        /// `peer_cred` holds the credentials of the remote endpoint
        const HAVE_PEER_CRED = 1 << 0;
        /// `peer_cred` holds the credentials cached at listen time
        const HAVE_LISTENER_CRED = 1 << 1;
    }
}

/// Per-socket control block
pub struct Endpoint {
    pub(crate) id: EndpointId,
    pub(crate) kind: SocketKind,
    /// Owning socket; alive for the endpoint's whole lifetime
    pub(crate) socket: Arc<Socket>,
    /// Stream: the symmetric peer. Datagram: the (possibly transient)
    /// destination, recorded asymmetrically.
    pub(crate) peer: Option<EndpointId>,
    /// Datagram endpoints whose `peer` points back here
    pub(crate) refs: Vec<EndpointId>,
    /// Owned copy of the bound address, if any
    pub(crate) bound_name: Option<LocalAddr>,
    /// Rendezvous node installed by the binder; listener children carry a
    /// name copy without a node
    pub(crate) node: Option<Arc<NameNode>>,
    /// Last observed byte occupancy of the peer's receive buffer
    pub(crate) snd_credit_bytes: usize,
    /// Last observed segment occupancy of the peer's receive buffer
    pub(crate) snd_credit_msgs: usize,
    /// Cached credentials; validity governed by `flags`
    pub(crate) peer_cred: Credentials,
    pub(crate) flags: EndpointFlags,
    /// Registry generation at creation; snapshots compare against it
    pub(crate) generation: u64,
    /// Lazily assigned synthetic inode, never zero once set
    pub(crate) fake_inode: u64,
}

impl Endpoint {
    pub(crate) fn new(
        id: EndpointId,
        kind: SocketKind,
        socket: Arc<Socket>,
        generation: u64,
    ) -> Self {
        Self {
            id,
            kind,
            socket,
            peer: None,
            refs: Vec::new(),
            bound_name: None,
            node: None,
            snd_credit_bytes: 0,
            snd_credit_msgs: 0,
            peer_cred: Credentials::default(),
            flags: EndpointFlags::empty(),
            generation,
            fake_inode: 0,
        }
    }

    pub fn id(&self) -> EndpointId {
        self.id
    }

    pub fn kind(&self) -> SocketKind {
        self.kind
    }
}

/// Result of a stat-like query
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SockStat {
    /// Synthetic inode number
    pub inode: u64,
    /// Apparent blocksize: send high-water plus, for a connected stream,
    /// the bytes already queued at the peer
    pub blocksize: usize,
}

static FAKE_INODE: AtomicU64 = AtomicU64::new(0);

fn next_fake_inode() -> u64 {
    // Zero is reserved for "unassigned"; skip it on wrap.
    loop {
        let v = FAKE_INODE.fetch_add(1, Ordering::Relaxed).wrapping_add(1);
        if v != 0 {
            return v;
        }
    }
}

/// Stat-like query on an attached socket.
pub fn stat(sock: &Arc<Socket>) -> Result<SockStat> {
    let id = sock.endpoint().ok_or(SockError::InvalidArgument)?;
    registry::with(|r| {
        let (inode, kind, peer_id) = {
            let ep = r.get_mut(id).ok_or(SockError::InvalidArgument)?;
            if ep.fake_inode == 0 {
                ep.fake_inode = next_fake_inode();
            }
            (ep.fake_inode, ep.kind, ep.peer)
        };
        let mut blocksize = sock.snd.hiwat();
        if kind == SocketKind::Stream {
            if let Some(peer) = peer_id.and_then(|p| r.get(p)) {
                blocksize += peer.socket.rcv.occupancy().0;
            }
        }
        Ok(SockStat { inode, blocksize })
    })
}

/// The address this endpoint is bound to, or the unnamed sentinel.
pub fn sock_addr(sock: &Arc<Socket>) -> Result<Option<LocalAddr>> {
    let id = sock.endpoint().ok_or(SockError::InvalidArgument)?;
    registry::with(|r| {
        let ep = r.get(id).ok_or(SockError::InvalidArgument)?;
        Ok(ep.bound_name.clone())
    })
}

/// The peer's bound address, or the unnamed sentinel.
pub fn peer_addr(sock: &Arc<Socket>) -> Result<Option<LocalAddr>> {
    let id = sock.endpoint().ok_or(SockError::InvalidArgument)?;
    registry::with(|r| {
        let ep = r.get(id).ok_or(SockError::InvalidArgument)?;
        Ok(ep
            .peer
            .and_then(|p| r.get(p))
            .and_then(|peer| peer.bound_name.clone()))
    })
}

/// Cached credentials of the remote endpoint.
///
/// Streams report `NotConnected` until a connect has populated the cache;
/// datagram endpoints never carry one and report `InvalidArgument`.
pub fn peer_cred(sock: &Arc<Socket>) -> Result<Credentials> {
    let id = sock.endpoint().ok_or(SockError::InvalidArgument)?;
    registry::with(|r| {
        let ep = r.get(id).ok_or(SockError::InvalidArgument)?;
        match ep.kind {
            SocketKind::Datagram => Err(SockError::InvalidArgument),
            SocketKind::Stream => {
                if ep.flags.contains(EndpointFlags::HAVE_PEER_CRED) {
                    Ok(ep.peer_cred.clone())
                } else {
                    Err(SockError::NotConnected)
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conn;

    #[test]
    fn test_queries_require_attach() {
        let s = Socket::new(SocketKind::Stream);
        assert_eq!(stat(&s).unwrap_err(), SockError::InvalidArgument);
        assert_eq!(sock_addr(&s).unwrap_err(), SockError::InvalidArgument);
    }

    #[test]
    fn test_stat_assigns_stable_inode() {
        let s = Socket::new(SocketKind::Datagram);
        conn::attach(&s).unwrap();
        let a = stat(&s).unwrap();
        let b = stat(&s).unwrap();
        assert_ne!(a.inode, 0);
        assert_eq!(a.inode, b.inode);
        assert_eq!(a.blocksize, s.snd.hiwat());
        conn::detach(&s).unwrap();
    }

    #[test]
    fn test_peer_cred_on_datagram_rejected() {
        let s = Socket::new(SocketKind::Datagram);
        conn::attach(&s).unwrap();
        assert_eq!(peer_cred(&s).unwrap_err(), SockError::InvalidArgument);
        conn::detach(&s).unwrap();
    }
}
