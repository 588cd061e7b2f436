//! Local-domain rendezvous addresses
//!
//! An address is an owned filesystem path naming a rendezvous node. The
//! "no name" sentinel of the wire layer is represented as the absence of an
//! address (`Option<LocalAddr>` = `None`); it carries only the `local`
//! domain tag and no path bytes.

use alloc::string::{String, ToString};
use core::fmt;

use crate::error::{Result, SockError};

/// Maximum path length an address may carry
pub const ADDR_MAX: usize = 104;

/// Domain tag carried by every local address, named or not
pub const DOMAIN_TAG: &str = "local";

/// An owned copy of a bound rendezvous path
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct LocalAddr {
    path: String,
}

impl LocalAddr {
    /// Create an address from a path
    ///
    /// Fails with `InvalidArgument` when the path is empty or longer than
    /// [`ADDR_MAX`].
    pub fn new(path: &str) -> Result<Self> {
        if path.is_empty() || path.len() > ADDR_MAX {
            return Err(SockError::InvalidArgument);
        }
        Ok(Self {
            path: path.to_string(),
        })
    }

    /// The path this address names
    pub fn as_str(&self) -> &str {
        &self.path
    }

    /// Length of the path in bytes
    pub fn len(&self) -> usize {
        self.path.len()
    }

    /// Addresses are never empty by construction
    pub fn is_empty(&self) -> bool {
        false
    }
}

impl fmt::Display for LocalAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", DOMAIN_TAG, self.path)
    }
}
