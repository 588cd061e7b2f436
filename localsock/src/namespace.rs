//! Rendezvous namespace
//!
//! An in-memory stand-in for the host filesystem as the endpoint layer
//! sees it: a flat path table holding socket-typed rendezvous nodes,
//! symlinks, and plain files. A rendezvous node advertises a bound
//! endpoint through a back-pointer that lookup returns; unlink removes
//! the name while the node lives on behind any outstanding references.

use alloc::{
    collections::BTreeMap,
    string::{String, ToString},
    sync::Arc,
};
use core::sync::atomic::{AtomicU64, Ordering};

use lazy_static::lazy_static;
use spin::{Mutex, RwLock};

use crate::{
    addr::LocalAddr,
    cred::Credentials,
    endpoint::EndpointId,
    error::{Result, SockError},
};

/// Symlink hops tolerated during lookup
const SYMLINK_MAX: usize = 8;

/// A socket-typed filesystem node advertising a bound endpoint
#[derive(Debug)]
pub struct NameNode {
    name: LocalAddr,
    mode: u32,
    uid: u32,
    gid: u32,
    inode: u64,
    endpoint: Mutex<Option<EndpointId>>,
}

impl NameNode {
    pub fn name(&self) -> &LocalAddr {
        &self.name
    }

    pub fn mode(&self) -> u32 {
        self.mode
    }

    pub fn inode(&self) -> u64 {
        self.inode
    }

    /// The advertised endpoint; `None` once the binder detached it.
    pub fn endpoint(&self) -> Option<EndpointId> {
        *self.endpoint.lock()
    }

    pub(crate) fn set_endpoint(&self, id: EndpointId) {
        *self.endpoint.lock() = Some(id);
    }

    pub(crate) fn clear_endpoint(&self) {
        *self.endpoint.lock() = None;
    }

    /// Write-access check against the node's mode bits.
    fn may_write(&self, cred: &Credentials) -> bool {
        if cred.euid == 0 {
            return true;
        }
        if cred.euid == self.uid {
            return self.mode & 0o200 != 0;
        }
        if cred.gid == self.gid || cred.groups.contains(&self.gid) {
            return self.mode & 0o020 != 0;
        }
        self.mode & 0o002 != 0
    }
}

enum NamespaceEntry {
    Socket(Arc<NameNode>),
    Symlink(String),
    File,
}

lazy_static! {
    static ref NAMESPACE: RwLock<BTreeMap<String, NamespaceEntry>> = RwLock::new(BTreeMap::new());
}

static NODE_INODE: AtomicU64 = AtomicU64::new(1);

/// Create a socket-typed node at `addr`, exclusively.
///
/// Fails with `AddressInUse` when any entry already occupies the path.
pub fn create_socket_node(addr: LocalAddr, mode: u32, cred: &Credentials) -> Result<Arc<NameNode>> {
    let mut ns = NAMESPACE.write();
    if ns.contains_key(addr.as_str()) {
        return Err(SockError::AddressInUse);
    }
    let node = Arc::new(NameNode {
        name: addr.clone(),
        mode,
        uid: cred.euid,
        gid: cred.gid,
        inode: NODE_INODE.fetch_add(1, Ordering::Relaxed),
        endpoint: Mutex::new(None),
    });
    ns.insert(addr.as_str().to_string(), NamespaceEntry::Socket(node.clone()));
    Ok(node)
}

/// Create a plain (non-socket) file entry.
pub fn create_file_node(path: &str) -> Result<()> {
    let mut ns = NAMESPACE.write();
    if ns.contains_key(path) {
        return Err(SockError::AddressInUse);
    }
    ns.insert(path.to_string(), NamespaceEntry::File);
    Ok(())
}

/// Create a symlink entry pointing at `target`.
pub fn symlink(path: &str, target: &str) -> Result<()> {
    let mut ns = NAMESPACE.write();
    if ns.contains_key(path) {
        return Err(SockError::AddressInUse);
    }
    ns.insert(path.to_string(), NamespaceEntry::Symlink(target.to_string()));
    Ok(())
}

/// Remove the name at `path`. Outstanding node references stay valid.
pub fn unlink(path: &str) -> Result<()> {
    match NAMESPACE.write().remove(path) {
        Some(_) => Ok(()),
        None => Err(SockError::InvalidArgument),
    }
}

/// Resolve `path` to a rendezvous node, following symlinks and checking
/// write access with the caller's credentials.
///
/// A missing path reads as `ConnectionRefused` (there is nothing there to
/// rendezvous with); a non-socket entry as `NotSocket`; a failed access
/// check as `PermissionDenied`.
pub fn lookup(path: &str, cred: &Credentials) -> Result<Arc<NameNode>> {
    let ns = NAMESPACE.read();
    let mut current = path;
    for _ in 0..SYMLINK_MAX {
        match ns.get(current) {
            None => return Err(SockError::ConnectionRefused),
            Some(NamespaceEntry::Symlink(target)) => current = target,
            Some(NamespaceEntry::File) => return Err(SockError::NotSocket),
            Some(NamespaceEntry::Socket(node)) => {
                if !node.may_write(cred) {
                    return Err(SockError::PermissionDenied);
                }
                return Ok(node.clone());
            }
        }
    }
    Err(SockError::InvalidArgument)
}
