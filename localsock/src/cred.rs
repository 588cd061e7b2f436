//! Process credentials and the credential control record

use alloc::vec::Vec;

/// Maximum number of supplementary groups copied into a [`CredRecord`]
pub const CRED_GROUP_MAX: usize = 16;

/// Credentials of a process as known to the caller context
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Credentials {
    /// Process id
    pub pid: u32,
    /// Real user id
    pub uid: u32,
    /// Real group id
    pub gid: u32,
    /// Effective user id
    pub euid: u32,
    /// Supplementary groups, unbounded on the process side
    pub groups: Vec<u32>,
}

impl Credentials {
    /// Create credentials with matching real and effective user ids
    pub fn new(pid: u32, uid: u32, gid: u32) -> Self {
        let mut groups = Vec::new();
        groups.push(gid);
        Self {
            pid,
            uid,
            gid,
            euid: uid,
            groups,
        }
    }
}

/// The bounded credential record synthesized into a control message
///
/// Carries the first [`CRED_GROUP_MAX`] supplementary groups only.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CredRecord {
    pub pid: u32,
    pub uid: u32,
    pub gid: u32,
    pub euid: u32,
    pub groups: [u32; CRED_GROUP_MAX],
    pub ngroups: usize,
}

impl CredRecord {
    /// Synthesize a record from live credentials
    pub fn from_credentials(cred: &Credentials) -> Self {
        let ngroups = cred.groups.len().min(CRED_GROUP_MAX);
        let mut groups = [0u32; CRED_GROUP_MAX];
        groups[..ngroups].copy_from_slice(&cred.groups[..ngroups]);
        Self {
            pid: cred.pid,
            uid: cred.uid,
            gid: cred.gid,
            euid: cred.euid,
            groups,
            ngroups,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_bounds_groups() {
        let mut cred = Credentials::new(7, 100, 100);
        for g in 0..32u32 {
            cred.groups.push(g);
        }
        let rec = CredRecord::from_credentials(&cred);
        assert_eq!(rec.ngroups, CRED_GROUP_MAX);
        assert_eq!(rec.pid, 7);
        assert_eq!(rec.euid, 100);
    }
}
