//! Local-domain socket subsystem
//!
//! Connection-oriented and datagram endpoints for same-host IPC. Endpoints
//! rendezvous through filesystem names, move bytes with buffer-coupled
//! backpressure, and carry ancillary payloads between handle spaces:
//! transferred rights, sender credentials, and timestamps. Rights that end
//! up referenced only by messages queued inside a cycle of dead sockets
//! are reclaimed by a mark-and-sweep collector.
//!
//! The crate is freestanding (`no_std` + `alloc`); the embedder supplies a
//! logger for the `log` facade and a clock through [`time::set_clock`].

#![no_std]

extern crate alloc;

#[cfg(test)]
extern crate std;

pub mod addr;
pub mod buffer;
pub mod conn;
pub mod control;
pub mod cred;
pub mod endpoint;
pub mod error;
pub mod gc;
pub mod handle;
pub mod namespace;
pub mod pipe;
pub mod registry;
pub mod socket;
pub mod task;
pub mod time;
pub mod transfer;
pub mod tunables;

pub use addr::LocalAddr;
pub use conn::{
    abort, accept, attach, bind, connect, connect_pair, detach, disconnect, drop_with, listen,
    shutdown,
};
pub use control::{dispose as dispose_control, ControlOutput, ControlRequest};
pub use cred::{CredRecord, Credentials};
pub use endpoint::{peer_addr, peer_cred, sock_addr, stat, EndpointId, SockStat};
pub use error::{Result, SockError};
pub use handle::{HandleObject, HandleSpace};
pub use socket::{Socket, SocketKind};
pub use task::Task;
pub use transfer::{rcvd, send, SendFlags};

/// Bring the process-wide state up and log that the subsystem is live.
///
/// The registry, handle table, and namespace initialize lazily on first
/// touch; calling this at startup just front-loads that and gives the
/// boot log a line to show for it.
pub fn init() {
    let _ = registry::live_count();
    let _ = handle::live_handles();
    log::info!("local-domain socket subsystem initialized");
}
