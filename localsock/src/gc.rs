//! Collector for rights trapped in unreachable message cycles
//!
//! A rights payload can carry a handle to a socket whose own receive queue
//! carries rights back to the first socket. Once every user reference to
//! both is gone, the cycle keeps itself alive: each handle's references
//! all come from in-flight messages. This collector finds such handles by
//! mark-and-sweep over the global table and reclaims them.
//!
//! Reclamation takes an extra reference on every swept handle before any
//! queue is flushed. Flushing one socket releases its queued rights, which
//! recursively releases handles in the sweep set; the shield reference
//! keeps each of those alive until the final drop at the end, so every
//! handle's terminal close runs exactly once. Disposal of a socket handle
//! re-enters [`collect`] through detach; the running flag turns that into
//! a no-op.

use alloc::{sync::Arc, vec::Vec};
use core::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use crate::{
    control,
    handle::{self, GcFlags, HandleEntry, HandleObject},
    socket::Socket,
};

static RUNNING: AtomicBool = AtomicBool::new(false);
static RUNS: AtomicU64 = AtomicU64::new(0);
static RECLAIMED: AtomicU64 = AtomicU64::new(0);

/// Collector passes completed so far
pub fn runs() -> u64 {
    RUNS.load(Ordering::Relaxed)
}

/// Handles reclaimed from cycles over the process lifetime
pub fn reclaimed_total() -> u64 {
    RECLAIMED.load(Ordering::Relaxed)
}

fn queued_rights(sock: &Arc<Socket>) -> Vec<Arc<HandleEntry>> {
    let mut out = Vec::new();
    sock.rcv
        .for_each_segment(|seg| out.extend(control::rights_handles(&seg.control)));
    out
}

/// Run one collection pass. Not re-entrant: a nested call returns
/// immediately.
pub fn collect() {
    if RUNNING.swap(true, Ordering::Acquire) {
        return;
    }
    let entries = handle::all_entries();
    for entry in &entries {
        entry.state.lock().gc = GcFlags::empty();
    }

    // Mark phase. A handle with references beyond its message count is an
    // externally reachable root; anything its queued rights name becomes
    // reachable too, deferred for the next pass until nothing new appears.
    let mut pending = true;
    while pending {
        pending = false;
        for entry in &entries {
            {
                let mut st = entry.state.lock();
                if st.ref_count == 0 {
                    continue;
                }
                if st.gc.contains(GcFlags::DEFERRED) {
                    st.gc.remove(GcFlags::DEFERRED);
                } else {
                    if st.gc.contains(GcFlags::MARKED) {
                        continue;
                    }
                    if st.ref_count == st.msg_count {
                        continue;
                    }
                    st.gc.insert(GcFlags::MARKED);
                }
            }
            let HandleObject::Socket(sock) = &entry.object else {
                continue;
            };
            for referent in queued_rights(sock) {
                let mut rst = referent.state.lock();
                if !rst.gc.contains(GcFlags::MARKED) {
                    rst.gc.insert(GcFlags::MARKED | GcFlags::DEFERRED);
                    pending = true;
                }
            }
        }
    }

    // Sweep phase: unmarked handles whose every reference sits in a
    // message are reachable only from cycles. Shield each with an extra
    // reference before touching any queue.
    let mut sweep: Vec<Arc<HandleEntry>> = Vec::new();
    for entry in &entries {
        let mut st = entry.state.lock();
        if st.ref_count > 0 && st.ref_count == st.msg_count && !st.gc.contains(GcFlags::MARKED) {
            st.ref_count += 1;
            sweep.push(entry.clone());
        }
    }

    // Reclaim: force-flush swept sockets so their queued rights unwind,
    // then drop the shields. Only the final drop can reach zero.
    for entry in &sweep {
        if let HandleObject::Socket(sock) = &entry.object {
            for seg in sock.rcv.flush() {
                control::dispose(seg.control);
            }
        }
    }
    for entry in &sweep {
        handle::release(entry);
    }

    if !sweep.is_empty() {
        RECLAIMED.fetch_add(sweep.len() as u64, Ordering::Relaxed);
        log::warn!("reclaimed {} handle(s) from in-flight cycles", sweep.len());
    }
    RUNS.fetch_add(1, Ordering::Relaxed);
    RUNNING.store(false, Ordering::Release);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_idle_collection_completes() {
        let before = runs();
        collect();
        assert!(runs() > before);
        // A second pass must not be blocked by the first.
        collect();
        assert!(runs() > before + 1);
    }
}
