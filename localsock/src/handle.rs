//! Global handle table and per-task handle spaces
//!
//! Every open object lives once in the process-wide table; tasks refer to
//! entries through small integer indices in their own [`HandleSpace`]. Two
//! counters on each entry drive both lifetime and the in-flight collector:
//! `ref_count` is the total number of strong references (task slots plus
//! queued rights), `msg_count` the portion held by in-flight messages. An
//! entry is externally accessible only while `ref_count > msg_count` or it
//! is reachable from one that is.

use alloc::{collections::BTreeMap, sync::Arc, vec::Vec};
use core::sync::atomic::{AtomicU64, Ordering};

use bitflags::bitflags;
use lazy_static::lazy_static;
use spin::{Mutex, RwLock};

use crate::{
    pipe::{Pipe, PipeEnd},
    socket::Socket,
};

/// Handle id type
pub type HandleId = u64;

/// Default slot limit of a task's handle space
pub const HANDLE_SPACE_LIMIT: usize = 1024;

bitflags! {
    /// Collector bookkeeping flags on a handle entry
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct GcFlags: u8 {
        /// Known externally reachable in the current pass
        const MARKED = 1 << 0;
        /// Reachable via a queue scan; propagation still pending
        const DEFERRED = 1 << 1;
    }
}

/// The object a handle refers to
pub enum HandleObject {
    /// A local-domain socket; its receive queue can carry further rights
    Socket(Arc<Socket>),
    /// One end of a byte pipe
    Pipe { pipe: Arc<Pipe>, end: PipeEnd },
    /// An event queue; deliberately not transferable between tasks
    EventQueue,
}

impl HandleObject {
    /// Whether this object type may travel inside a rights payload
    pub fn passable(&self) -> bool {
        !matches!(self, Self::EventQueue)
    }

    /// The socket behind this handle, when it is one
    pub fn as_socket(&self) -> Option<&Arc<Socket>> {
        match self {
            Self::Socket(s) => Some(s),
            _ => None,
        }
    }
}

/// Mutable counters of a handle entry, behind the per-handle lock
pub struct HandleState {
    pub ref_count: u32,
    pub msg_count: u32,
    pub gc: GcFlags,
}

/// One entry in the global handle table
pub struct HandleEntry {
    id: HandleId,
    pub object: HandleObject,
    pub state: Mutex<HandleState>,
}

impl HandleEntry {
    pub fn id(&self) -> HandleId {
        self.id
    }
}

struct HandleTable {
    entries: RwLock<BTreeMap<HandleId, Arc<HandleEntry>>>,
    next_id: AtomicU64,
}

lazy_static! {
    static ref TABLE: HandleTable = HandleTable {
        entries: RwLock::new(BTreeMap::new()),
        next_id: AtomicU64::new(1),
    };
}

/// Rights currently held by in-flight messages, process-wide
static INFLIGHT_RIGHTS: AtomicU64 = AtomicU64::new(0);

pub fn inflight_rights() -> u64 {
    INFLIGHT_RIGHTS.load(Ordering::SeqCst)
}

/// Install a new object into the global table with one strong reference.
pub fn install(object: HandleObject) -> Arc<HandleEntry> {
    let id = TABLE.next_id.fetch_add(1, Ordering::Relaxed);
    let entry = Arc::new(HandleEntry {
        id,
        object,
        state: Mutex::new(HandleState {
            ref_count: 1,
            msg_count: 0,
            gc: GcFlags::empty(),
        }),
    });
    TABLE.entries.write().insert(id, entry.clone());
    entry
}

/// Number of live entries in the global table.
pub fn live_handles() -> usize {
    TABLE.entries.read().len()
}

/// Snapshot the table for a collector walk.
pub(crate) fn all_entries() -> Vec<Arc<HandleEntry>> {
    TABLE.entries.read().values().cloned().collect()
}

/// Add a plain strong reference.
pub fn retain(entry: &Arc<HandleEntry>) {
    entry.state.lock().ref_count += 1;
}

/// Account a handle into an in-flight message: one strong reference plus
/// one message reference, and the global in-flight count.
pub(crate) fn message_attach(entry: &Arc<HandleEntry>) {
    let mut st = entry.state.lock();
    st.ref_count += 1;
    st.msg_count += 1;
    drop(st);
    INFLIGHT_RIGHTS.fetch_add(1, Ordering::SeqCst);
}

/// Deliver a message-held handle into a receiver slot: the message's strong
/// reference is handed over, only the in-flight accounting is undone.
pub(crate) fn message_deliver(entry: &Arc<HandleEntry>) {
    let mut st = entry.state.lock();
    debug_assert!(st.msg_count > 0);
    st.msg_count -= 1;
    drop(st);
    INFLIGHT_RIGHTS.fetch_sub(1, Ordering::SeqCst);
}

/// Discard a message-held handle without delivering it.
pub(crate) fn message_discard(entry: &Arc<HandleEntry>) {
    {
        let mut st = entry.state.lock();
        debug_assert!(st.msg_count > 0);
        st.msg_count -= 1;
    }
    INFLIGHT_RIGHTS.fetch_sub(1, Ordering::SeqCst);
    release(entry);
}

/// Drop one strong reference; the last one disposes the object.
///
/// Must not be called with the registry lock held: disposing a socket
/// handle detaches its endpoint.
pub fn release(entry: &Arc<HandleEntry>) {
    let remaining = {
        let mut st = entry.state.lock();
        debug_assert!(st.ref_count > 0, "release of a dead handle");
        st.ref_count -= 1;
        st.ref_count
    };
    if remaining == 0 {
        dispose(entry);
    }
}

fn dispose(entry: &Arc<HandleEntry>) {
    TABLE.entries.write().remove(&entry.id);
    match &entry.object {
        HandleObject::Socket(sock) => {
            // Last reference to the socket handle closes the socket.
            let _ = crate::conn::detach(sock);
        }
        HandleObject::Pipe { pipe, end } => {
            if *end == PipeEnd::Write {
                pipe.close_write();
            }
        }
        HandleObject::EventQueue => {}
    }
    log::trace!("handle {} disposed", entry.id);
}

/// A task's index-to-entry map
pub struct HandleSpace {
    slots: Mutex<BTreeMap<u32, Arc<HandleEntry>>>,
    limit: usize,
}

impl HandleSpace {
    pub fn new() -> Self {
        Self::with_limit(HANDLE_SPACE_LIMIT)
    }

    pub fn with_limit(limit: usize) -> Self {
        Self {
            slots: Mutex::new(BTreeMap::new()),
            limit,
        }
    }

    /// Look up a slot; the returned entry is not additionally retained.
    pub fn get(&self, idx: u32) -> Option<Arc<HandleEntry>> {
        self.slots.lock().get(&idx).cloned()
    }

    /// Number of free slots
    pub fn available(&self) -> usize {
        self.limit - self.slots.lock().len()
    }

    /// Install an entry at the lowest free index. The slot takes over the
    /// caller's strong reference. Returns `None` when the space is full.
    pub fn insert(&self, entry: Arc<HandleEntry>) -> Option<u32> {
        let mut slots = self.slots.lock();
        let idx = Self::lowest_free(&slots, self.limit)?;
        slots.insert(idx, entry);
        Some(idx)
    }

    /// Install several entries or none: fails without side effects when the
    /// space cannot take them all.
    pub fn insert_all(&self, entries: &[Arc<HandleEntry>]) -> Option<Vec<u32>> {
        let mut slots = self.slots.lock();
        if self.limit - slots.len() < entries.len() {
            return None;
        }
        let mut idxs = Vec::with_capacity(entries.len());
        for entry in entries {
            let idx = Self::lowest_free(&slots, self.limit).expect("capacity checked");
            slots.insert(idx, entry.clone());
            idxs.push(idx);
        }
        Some(idxs)
    }

    fn lowest_free(slots: &BTreeMap<u32, Arc<HandleEntry>>, limit: usize) -> Option<u32> {
        let mut idx: u32 = 0;
        for k in slots.keys() {
            if *k == idx {
                idx += 1;
            } else {
                break;
            }
        }
        if (idx as usize) < limit {
            Some(idx)
        } else {
            None
        }
    }

    /// Remove a slot without dropping its reference; the caller owns it.
    pub fn take(&self, idx: u32) -> Option<Arc<HandleEntry>> {
        self.slots.lock().remove(&idx)
    }

    /// Close a slot, dropping its strong reference.
    pub fn close(&self, idx: u32) -> bool {
        match self.take(idx) {
            Some(entry) => {
                release(&entry);
                true
            }
            None => false,
        }
    }

    /// Number of occupied slots
    pub fn len(&self) -> usize {
        self.slots.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.lock().is_empty()
    }
}

impl Default for HandleSpace {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for HandleSpace {
    /// A task exiting closes every slot it still holds.
    fn drop(&mut self) {
        let slots = core::mem::take(&mut *self.slots.lock());
        for (_, entry) in slots {
            release(&entry);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_install_and_release() {
        let entry = install(HandleObject::EventQueue);
        let id = entry.id();
        assert!(all_entries().iter().any(|e| e.id() == id));
        release(&entry);
        assert!(!all_entries().iter().any(|e| e.id() == id));
    }

    #[test]
    fn test_space_lowest_free_index() {
        let space = HandleSpace::with_limit(4);
        let a = install(HandleObject::EventQueue);
        let b = install(HandleObject::EventQueue);
        let c = install(HandleObject::EventQueue);
        assert_eq!(space.insert(a), Some(0));
        assert_eq!(space.insert(b), Some(1));
        assert!(space.close(0));
        assert_eq!(space.insert(c), Some(0));
    }

    #[test]
    fn test_space_exhaustion() {
        let space = HandleSpace::with_limit(2);
        let a = install(HandleObject::EventQueue);
        let b = install(HandleObject::EventQueue);
        let c = install(HandleObject::EventQueue);
        space.insert(a).unwrap();
        space.insert(b).unwrap();
        assert_eq!(space.insert(c.clone()), None);
        release(&c);
    }

    #[test]
    fn test_insert_all_is_atomic() {
        let space = HandleSpace::with_limit(2);
        let a = install(HandleObject::EventQueue);
        let b = install(HandleObject::EventQueue);
        let c = install(HandleObject::EventQueue);
        assert!(space
            .insert_all(&[a.clone(), b.clone(), c.clone()])
            .is_none());
        assert_eq!(space.len(), 0);
        assert!(space.insert_all(&[a, b]).is_some());
        release(&c);
    }

    #[test]
    fn test_pipe_write_end_disposal_closes_pipe() {
        let pipe = Pipe::new();
        let w = install(HandleObject::Pipe {
            pipe: pipe.clone(),
            end: PipeEnd::Write,
        });
        release(&w);
        assert!(pipe.write_closed());
    }
}
