//! Runtime-adjustable buffer defaults
//!
//! Stream sockets reserve the full send/receive space in each direction,
//! although a paired sender and receiver together consume only one space's
//! worth. Datagram sockets use the send space as the maximum datagram size
//! and the receive space as real queue capacity.

use core::sync::atomic::{AtomicUsize, Ordering};

static STREAM_SEND_SPACE: AtomicUsize = AtomicUsize::new(8192);
static STREAM_RECV_SPACE: AtomicUsize = AtomicUsize::new(8192);
static DATAGRAM_MAX: AtomicUsize = AtomicUsize::new(2 * 1024);
static DATAGRAM_RECV_SPACE: AtomicUsize = AtomicUsize::new(4 * 1024);

/// Default send-buffer reservation for stream endpoints
pub fn stream_send_space() -> usize {
    STREAM_SEND_SPACE.load(Ordering::Relaxed)
}

pub fn set_stream_send_space(n: usize) {
    STREAM_SEND_SPACE.store(n, Ordering::Relaxed);
}

/// Default receive-buffer reservation for stream endpoints
pub fn stream_recv_space() -> usize {
    STREAM_RECV_SPACE.load(Ordering::Relaxed)
}

pub fn set_stream_recv_space(n: usize) {
    STREAM_RECV_SPACE.store(n, Ordering::Relaxed);
}

/// Maximum datagram size (doubles as the datagram send reservation)
pub fn datagram_max() -> usize {
    DATAGRAM_MAX.load(Ordering::Relaxed)
}

pub fn set_datagram_max(n: usize) {
    DATAGRAM_MAX.store(n, Ordering::Relaxed);
}

/// Receive-buffer reservation for datagram endpoints
pub fn datagram_recv_space() -> usize {
    DATAGRAM_RECV_SPACE.load(Ordering::Relaxed)
}

pub fn set_datagram_recv_space(n: usize) {
    DATAGRAM_RECV_SPACE.store(n, Ordering::Relaxed);
}

/// Read-only observation of rights currently held by in-flight messages
pub fn inflight_rights() -> u64 {
    crate::handle::inflight_rights()
}
