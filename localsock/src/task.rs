//! Caller context
//!
//! A `Task` bundles what the subsystem needs to know about the caller of
//! an operation: its credentials, its handle space, and its file-creation
//! mask. The host's process layer owns the real thing; this is the view
//! the endpoint operations consume.

use core::sync::atomic::{AtomicU32, Ordering};

use crate::{cred::Credentials, handle::HandleSpace};

/// The caller of an endpoint operation
pub struct Task {
    cred: Credentials,
    handles: HandleSpace,
    umask: AtomicU32,
}

impl Task {
    /// Create a task with fresh credentials and a default handle space.
    pub fn new(pid: u32, uid: u32, gid: u32) -> Self {
        Self::with_cred(Credentials::new(pid, uid, gid))
    }

    pub fn with_cred(cred: Credentials) -> Self {
        Self {
            cred,
            handles: HandleSpace::new(),
            umask: AtomicU32::new(0o022),
        }
    }

    pub fn cred(&self) -> &Credentials {
        &self.cred
    }

    pub fn handles(&self) -> &HandleSpace {
        &self.handles
    }

    pub fn umask(&self) -> u32 {
        self.umask.load(Ordering::Relaxed)
    }

    pub fn set_umask(&self, mask: u32) {
        self.umask.store(mask & 0o777, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_umask() {
        let t = Task::new(1, 1000, 1000);
        assert_eq!(t.umask(), 0o022);
        t.set_umask(0o077);
        assert_eq!(t.umask(), 0o077);
    }
}
