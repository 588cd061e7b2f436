//! Data transfer: the send and receive-acknowledge paths
//!
//! Sends append directly into the peer's receive buffer. Streams keep
//! backpressure without credit messages by coupling the sender's marks to
//! the peer's occupancy: every send shrinks the sender's high-water mark
//! by the occupancy growth it caused, and every receive-side drain (via
//! [`rcvd`], the sole release path) grows it back. Datagrams skip the
//! coupling and instead refuse appends past the receiver's marks.

use alloc::{sync::Arc, vec::Vec};

use bitflags::bitflags;

use crate::{
    addr::LocalAddr,
    conn,
    control::{self, ControlRequest},
    error::{Result, SockError},
    registry,
    socket::{Socket, SocketKind},
    task::Task,
};

bitflags! {
    /// Modifiers to a send operation
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct SendFlags: u32 {
        /// Close the send direction once the payload is queued
        const EOF = 1 << 0;
    }
}

/// Send `payload` with optional control and, for datagrams, an optional
/// destination address.
///
/// Control is internalized before any linkage lock is taken; whatever is
/// not delivered is released before the error returns.
pub fn send(
    sock: &Arc<Socket>,
    payload: &[u8],
    control_in: Vec<ControlRequest>,
    addr: Option<&LocalAddr>,
    flags: SendFlags,
    task: &Task,
) -> Result<()> {
    sock.endpoint().ok_or(SockError::InvalidArgument)?;
    if let Some(err) = sock.take_error() {
        return Err(err);
    }
    let mut ctrl = Some(control::internalize(control_in, task)?);
    let res = match sock.kind() {
        SocketKind::Datagram => send_datagram(sock, payload, &mut ctrl, addr, task),
        SocketKind::Stream => send_stream(sock, payload, &mut ctrl, addr, task),
    };
    if let Some(leftover) = ctrl.take() {
        // Never delivered; unwind the internalized rights.
        control::dispose(leftover);
    }
    if res.is_ok() && flags.contains(SendFlags::EOF) {
        conn::shutdown(sock)?;
    }
    res
}

fn send_datagram(
    sock: &Arc<Socket>,
    payload: &[u8],
    ctrl: &mut Option<Vec<control::ControlMessage>>,
    addr: Option<&LocalAddr>,
    task: &Task,
) -> Result<()> {
    if payload.len() > sock.snd.hiwat() {
        return Err(SockError::MessageTooBig);
    }
    let transient = addr.is_some();
    if let Some(a) = addr {
        if sock.is_connected() {
            return Err(SockError::AlreadyConnected);
        }
        conn::connect(sock, a, task)?;
    } else if !sock.is_connected() {
        return Err(SockError::NotConnected);
    }
    let id = sock.endpoint().ok_or(SockError::InvalidArgument)?;
    let res = registry::with(|r| {
        let ep = r.get(id).ok_or(SockError::NotConnected)?;
        let peer_id = ep.peer.ok_or(SockError::NotConnected)?;
        let from = ep.bound_name.clone();
        let peer = r.get(peer_id).ok_or(SockError::NotConnected)?;
        let peer_sock = peer.socket.clone();
        match peer_sock
            .rcv
            .append_from(from, payload, ctrl.take().unwrap_or_default())
        {
            Ok(()) => {
                peer_sock.rcv.rd_wakeup();
                Ok(())
            }
            Err(returned) => {
                *ctrl = Some(returned);
                Err(SockError::NoBufferSpace)
            }
        }
    });
    if transient {
        let _ = conn::disconnect(sock);
    }
    res
}

fn send_stream(
    sock: &Arc<Socket>,
    payload: &[u8],
    ctrl: &mut Option<Vec<control::ControlMessage>>,
    addr: Option<&LocalAddr>,
    task: &Task,
) -> Result<()> {
    if !sock.is_connected() {
        match addr {
            Some(a) => conn::connect(sock, a, task)?,
            None => return Err(SockError::NotConnected),
        }
    }
    if sock.is_send_shut() {
        return Err(SockError::BrokenPipe);
    }
    let id = sock.endpoint().ok_or(SockError::InvalidArgument)?;
    registry::with(|r| {
        let peer_id = {
            let ep = r.get(id).ok_or(SockError::NotConnected)?;
            ep.peer.ok_or(SockError::NotConnected)?
        };
        let peer = r.get(peer_id).ok_or(SockError::NotConnected)?;
        let peer_sock = peer.socket.clone();
        if peer_sock.is_recv_shut() {
            return Err(SockError::BrokenPipe);
        }
        peer_sock
            .rcv
            .append_stream(payload, ctrl.take().unwrap_or_default());
        // Coupled accounting: this side's marks shrink by the occupancy
        // growth the append just caused at the peer.
        let (pbytes, pmsgs) = peer_sock.rcv.occupancy();
        let ep = r.get_mut(id).ok_or(SockError::NotConnected)?;
        sock.snd
            .add_hiwat(ep.snd_credit_bytes as isize - pbytes as isize);
        sock.snd
            .add_msgmax(ep.snd_credit_msgs as isize - pmsgs as isize);
        ep.snd_credit_bytes = pbytes;
        ep.snd_credit_msgs = pmsgs;
        peer_sock.rcv.rd_wakeup();
        Ok(())
    })
}

/// Receive-side drain notification; the sole backpressure release path.
///
/// Grows the sending peer's marks back by however much occupancy the drain
/// removed, refreshes the credit caches, and wakes the peer's writers.
/// Datagram endpoints never acknowledge drains this way.
pub fn rcvd(sock: &Arc<Socket>, drained: usize) -> Result<()> {
    if sock.kind() == SocketKind::Datagram {
        panic!("receive acknowledgement on a datagram endpoint");
    }
    let id = sock.endpoint().ok_or(SockError::InvalidArgument)?;
    log::trace!("endpoint {} drained {} bytes", id.0, drained);
    let peer_sock = registry::with(|r| {
        let ep = r.get(id).ok_or(SockError::InvalidArgument)?;
        let Some(peer_id) = ep.peer else {
            return Ok(None);
        };
        let Some(peer) = r.get(peer_id) else {
            return Ok(None);
        };
        let peer_sock = peer.socket.clone();
        let (bytes, msgs) = sock.rcv.occupancy();
        let peer = r.get_mut(peer_id).expect("peer resolved above");
        peer_sock
            .snd
            .add_hiwat(peer.snd_credit_bytes as isize - bytes as isize);
        peer_sock
            .snd
            .add_msgmax(peer.snd_credit_msgs as isize - msgs as isize);
        peer.snd_credit_bytes = bytes;
        peer.snd_credit_msgs = msgs;
        Ok(Some(peer_sock))
    })?;
    if let Some(peer_sock) = peer_sock {
        peer_sock.snd.wr_wakeup();
    }
    Ok(())
}
