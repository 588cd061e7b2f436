//! Minimal socket objects backing the endpoint layer
//!
//! A `Socket` is the buffer-owning object the endpoint layer attaches to:
//! a pair of [`SockBuf`]s, a small state block, and an accept queue for
//! listeners. The state transitions here (connected, shut directions,
//! pending error) are the generic socket-layer half of the protocol; the
//! endpoint layer drives them.

use alloc::{collections::VecDeque, sync::Arc};

use spin::Mutex;

use crate::{buffer::SockBuf, endpoint::EndpointId, error::SockError};

/// The two endpoint kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SocketKind {
    Datagram,
    Stream,
}

#[derive(Default)]
struct SockState {
    connected: bool,
    send_shut: bool,
    recv_shut: bool,
    listening: bool,
    error: Option<SockError>,
}

/// A socket object
pub struct Socket {
    kind: SocketKind,
    /// Send-side buffer; only its marks are used for local-domain flow
    /// control, data lands directly in the peer's receive buffer.
    pub snd: SockBuf,
    /// Receive-side buffer
    pub rcv: SockBuf,
    state: Mutex<SockState>,
    accept_queue: Mutex<VecDeque<Arc<Socket>>>,
    pcb: Mutex<Option<EndpointId>>,
}

impl Socket {
    pub fn new(kind: SocketKind) -> Arc<Self> {
        Arc::new(Self {
            kind,
            snd: SockBuf::new(),
            rcv: SockBuf::new(),
            state: Mutex::new(SockState::default()),
            accept_queue: Mutex::new(VecDeque::new()),
            pcb: Mutex::new(None),
        })
    }

    pub fn kind(&self) -> SocketKind {
        self.kind
    }

    /// The attached endpoint, if any
    pub fn endpoint(&self) -> Option<EndpointId> {
        *self.pcb.lock()
    }

    pub(crate) fn set_endpoint(&self, id: EndpointId) {
        *self.pcb.lock() = Some(id);
    }

    pub(crate) fn clear_endpoint(&self) {
        *self.pcb.lock() = None;
    }

    pub fn is_connected(&self) -> bool {
        self.state.lock().connected
    }

    pub(crate) fn set_connected(&self, connected: bool) {
        self.state.lock().connected = connected;
    }

    /// Whether this side may queue further sends
    pub fn is_send_shut(&self) -> bool {
        self.state.lock().send_shut
    }

    /// Mark the send direction closed and wake writers so they observe it.
    pub fn shut_send(&self) {
        self.state.lock().send_shut = true;
        self.snd.wr_wakeup();
    }

    /// Whether the receive direction has been closed
    pub fn is_recv_shut(&self) -> bool {
        self.state.lock().recv_shut
    }

    /// Mark the receive direction closed. Already-queued data stays
    /// readable; only new deliveries are refused.
    pub fn shut_recv(&self) {
        self.state.lock().recv_shut = true;
        self.rcv.rd_wakeup();
    }

    pub fn is_listening(&self) -> bool {
        self.state.lock().listening
    }

    pub(crate) fn set_listening(&self) {
        self.state.lock().listening = true;
    }

    /// Take the pending asynchronous error, if one was recorded.
    pub fn take_error(&self) -> Option<SockError> {
        self.state.lock().error.take()
    }

    pub(crate) fn set_error(&self, err: SockError) {
        self.state.lock().error = Some(err);
    }

    /// Pop one completed connection from the accept queue.
    pub fn accept_pop(&self) -> Option<Arc<Socket>> {
        self.accept_queue.lock().pop_front()
    }

    pub(crate) fn accept_push(&self, child: Arc<Socket>) {
        self.accept_queue.lock().push_back(child);
    }

    /// Number of completed connections waiting to be accepted
    pub fn pending_accepts(&self) -> usize {
        self.accept_queue.lock().len()
    }
}
