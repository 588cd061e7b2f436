//! Connection management: attach, naming, pairing, and teardown
//!
//! State transitions for both endpoint kinds. Stream pairing is symmetric
//! (each side names the other); datagram pairing records the sender on the
//! destination's back-reference list so teardown can notify it. Path
//! resolution and child allocation run without the registry lock and
//! re-validate before committing.

use alloc::sync::Arc;
use core::sync::atomic::Ordering;

use crate::{
    addr::LocalAddr,
    control,
    endpoint::{EndpointFlags, EndpointId},
    error::{Result, SockError},
    gc, handle, namespace,
    registry::{self, Registry},
    socket::{Socket, SocketKind},
    task::Task,
    tunables,
};

/// Segment quota granted per this many bytes of buffer reservation
const SEG_QUOTA_DIVISOR: usize = 32;

fn seg_quota(hiwat: usize) -> usize {
    (hiwat / SEG_QUOTA_DIVISOR).max(1)
}

fn reserve_default(sock: &Arc<Socket>) {
    match sock.kind() {
        SocketKind::Stream => {
            let snd = tunables::stream_send_space();
            let rcv = tunables::stream_recv_space();
            sock.snd.reserve(snd, seg_quota(snd));
            sock.rcv.reserve(rcv, seg_quota(rcv));
        }
        SocketKind::Datagram => {
            let snd = tunables::datagram_max();
            let rcv = tunables::datagram_recv_space();
            sock.snd.reserve(snd, seg_quota(snd));
            sock.rcv.reserve(rcv, seg_quota(rcv));
        }
    }
}

/// Create an endpoint for `sock` and register it.
///
/// Buffer space is reserved only where the socket has none yet, so callers
/// that sized their buffers beforehand keep those sizes.
pub fn attach(sock: &Arc<Socket>) -> Result<EndpointId> {
    if sock.endpoint().is_some() {
        return Err(SockError::InvalidArgument);
    }
    reserve_default(sock);
    let id = registry::with(|r| r.insert(sock.kind(), sock.clone()));
    sock.set_endpoint(id);
    log::debug!("endpoint {} attached", id.0);
    Ok(id)
}

/// Tear an endpoint down: unregister, unadvertise, unpair, notify
/// datagram senders, release queued control, and collect in-flight cycles
/// when any rights remain in flight anywhere.
pub fn detach(sock: &Arc<Socket>) -> Result<()> {
    let id = sock.endpoint().ok_or(SockError::InvalidArgument)?;
    registry::with(|r| {
        let mut ep = r.remove(id).ok_or(SockError::InvalidArgument)?;
        if let Some(node) = ep.node.take() {
            node.clear_endpoint();
        }
        // Unpair directly; the control block is already off the map.
        if let Some(peer_id) = ep.peer.take() {
            match ep.kind() {
                SocketKind::Stream => {
                    if let Some(peer) = r.get_mut(peer_id) {
                        peer.peer = None;
                        peer.socket.set_connected(false);
                    }
                }
                SocketKind::Datagram => {
                    if let Some(peer) = r.get_mut(peer_id) {
                        peer.refs.retain(|e| *e != id);
                    }
                }
            }
        }
        // Datagram senders still aimed here observe a reset.
        let refs = core::mem::take(&mut ep.refs);
        for rid in refs {
            drop_locked(r, rid, SockError::ConnectionReset);
        }
        ep.socket.set_connected(false);
        Ok(())
    })?;
    sock.clear_endpoint();
    // Rights hiding in the queue must not outlive the endpoint
    // unaccounted; release them before anything else can observe them.
    for seg in sock.rcv.flush() {
        control::dispose(seg.control);
    }
    if handle::inflight_rights() > 0 {
        gc::collect();
    }
    log::debug!("endpoint {} detached", id.0);
    Ok(())
}

/// Publish the endpoint at a rendezvous path.
pub fn bind(sock: &Arc<Socket>, addr: &LocalAddr, task: &Task) -> Result<()> {
    let id = sock.endpoint().ok_or(SockError::InvalidArgument)?;
    registry::with(|r| {
        let ep = r.get(id).ok_or(SockError::InvalidArgument)?;
        if ep.bound_name.is_some() {
            return Err(SockError::InvalidArgument);
        }
        Ok(())
    })?;
    // Node creation can suspend in a real filesystem, so the registry lock
    // is not held across it; the commit below re-validates.
    let mode = 0o777 & !task.umask();
    let node = namespace::create_socket_node(addr.clone(), mode, task.cred())?;
    let committed = registry::with(|r| {
        let ep = r.get_mut(id).ok_or(SockError::InvalidArgument)?;
        if ep.bound_name.is_some() {
            return Err(SockError::InvalidArgument);
        }
        node.set_endpoint(id);
        ep.bound_name = Some(addr.clone());
        ep.node = Some(node.clone());
        r.stats.binds.fetch_add(1, Ordering::Relaxed);
        Ok(())
    });
    match &committed {
        Ok(()) => log::debug!("endpoint {} bound to {}", id.0, addr),
        Err(_) => {
            // Lost the window; take the half-made name back out.
            let _ = namespace::unlink(addr.as_str());
        }
    }
    committed
}

/// Start accepting connections, caching the caller's credentials for
/// hand-out to future connectors. Idempotent.
pub fn listen(sock: &Arc<Socket>, task: &Task) -> Result<()> {
    let id = sock.endpoint().ok_or(SockError::InvalidArgument)?;
    registry::with(|r| {
        let ep = r.get_mut(id).ok_or(SockError::InvalidArgument)?;
        if ep.kind() != SocketKind::Stream || ep.node.is_none() {
            return Err(SockError::InvalidArgument);
        }
        ep.peer_cred = task.cred().clone();
        ep.flags.insert(EndpointFlags::HAVE_LISTENER_CRED);
        ep.socket.set_listening();
        Ok(())
    })
}

/// Connect to the endpoint advertised at `addr`.
///
/// For streams the listener spawns a child endpoint that the connector
/// pairs with; the child lands on the listener's accept queue. Datagram
/// connects simply re-target the endpoint.
pub fn connect(sock: &Arc<Socket>, addr: &LocalAddr, task: &Task) -> Result<()> {
    let id = sock.endpoint().ok_or(SockError::InvalidArgument)?;
    // Path resolution happens without the registry lock held.
    let node = namespace::lookup(addr.as_str(), task.cred())?;
    let peer_id = node.endpoint().ok_or(SockError::ConnectionRefused)?;
    match sock.kind() {
        SocketKind::Stream => connect_stream(sock, id, peer_id, task),
        SocketKind::Datagram => registry::with(|r| {
            disconnect_locked(r, id);
            connect2_locked(r, id, peer_id)
        }),
    }
}

fn connect_stream(
    sock: &Arc<Socket>,
    id: EndpointId,
    peer_id: EndpointId,
    task: &Task,
) -> Result<()> {
    if sock.is_connected() {
        return Err(SockError::AlreadyConnected);
    }
    // Validate the peer and capture what the child inherits.
    let listener_sock = registry::with(|r| {
        let peer = r.get(peer_id).ok_or(SockError::ConnectionRefused)?;
        if peer.kind() != SocketKind::Stream {
            return Err(SockError::ProtocolMismatch);
        }
        if !peer.socket.is_listening() {
            return Err(SockError::ConnectionRefused);
        }
        Ok(peer.socket.clone())
    })?;
    // Allocate the child while no locks are held.
    let child_sock = Socket::new(SocketKind::Stream);
    child_sock
        .snd
        .reserve(listener_sock.snd.hiwat(), listener_sock.snd.msgmax());
    child_sock
        .rcv
        .reserve(listener_sock.rcv.hiwat(), listener_sock.rcv.msgmax());
    let child_id = attach(&child_sock)?;
    let res = registry::with(|r| {
        // The listener may have gone away or stopped listening meanwhile.
        let peer = r.get(peer_id).ok_or(SockError::ConnectionRefused)?;
        if !peer.socket.is_listening() {
            return Err(SockError::ConnectionRefused);
        }
        assert!(
            peer.flags.contains(EndpointFlags::HAVE_LISTENER_CRED),
            "listening endpoint without cached credentials"
        );
        let listener_name = peer.bound_name.clone();
        let listener_cred = peer.peer_cred.clone();
        {
            let child = r.get_mut(child_id).expect("child endpoint just attached");
            child.bound_name = listener_name;
            child.peer_cred = task.cred().clone();
            child.flags.insert(EndpointFlags::HAVE_PEER_CRED);
        }
        {
            let me = r.get_mut(id).ok_or(SockError::InvalidArgument)?;
            me.peer_cred = listener_cred;
            me.flags.insert(EndpointFlags::HAVE_PEER_CRED);
        }
        connect2_locked(r, id, child_id)
    });
    match res {
        Ok(()) => {
            listener_sock.accept_push(child_sock);
            listener_sock.rcv.rd_wakeup();
            Ok(())
        }
        Err(err) => {
            let _ = detach(&child_sock);
            Err(err)
        }
    }
}

/// Pair two already-attached endpoints directly.
pub fn connect_pair(a: &Arc<Socket>, b: &Arc<Socket>) -> Result<()> {
    let a_id = a.endpoint().ok_or(SockError::InvalidArgument)?;
    let b_id = b.endpoint().ok_or(SockError::InvalidArgument)?;
    registry::with(|r| connect2_locked(r, a_id, b_id))
}

fn connect2_locked(r: &mut Registry, a_id: EndpointId, b_id: EndpointId) -> Result<()> {
    let b_kind = r.get(b_id).ok_or(SockError::ConnectionRefused)?.kind();
    let a = r.get_mut(a_id).ok_or(SockError::InvalidArgument)?;
    if a.kind() != b_kind {
        return Err(SockError::ProtocolMismatch);
    }
    a.peer = Some(b_id);
    let kind = a.kind();
    let a_sock = a.socket.clone();
    match kind {
        SocketKind::Datagram => {
            let b = r.get_mut(b_id).expect("peer validated above");
            b.refs.push(a_id);
            a_sock.set_connected(true);
        }
        SocketKind::Stream => {
            let b = r.get_mut(b_id).expect("peer validated above");
            b.peer = Some(a_id);
            let b_sock = b.socket.clone();
            a_sock.set_connected(true);
            b_sock.set_connected(true);
        }
    }
    r.stats.connects.fetch_add(1, Ordering::Relaxed);
    Ok(())
}

/// Peer address of an accepted connection (the connector's bound name,
/// usually the unnamed sentinel).
pub fn accept(sock: &Arc<Socket>) -> Result<Option<LocalAddr>> {
    let id = sock.endpoint().ok_or(SockError::InvalidArgument)?;
    registry::with(|r| {
        let ep = r.get(id).ok_or(SockError::InvalidArgument)?;
        Ok(ep
            .peer
            .and_then(|p| r.get(p))
            .and_then(|peer| peer.bound_name.clone()))
    })
}

/// Unpair the endpoint. No-op when not paired; a datagram peer is left
/// untouched apart from its back-reference list.
pub fn disconnect(sock: &Arc<Socket>) -> Result<()> {
    let id = sock.endpoint().ok_or(SockError::InvalidArgument)?;
    registry::with(|r| {
        disconnect_locked(r, id);
        Ok(())
    })
}

fn disconnect_locked(r: &mut Registry, id: EndpointId) {
    let Some(ep) = r.get_mut(id) else { return };
    let Some(peer_id) = ep.peer.take() else { return };
    let kind = ep.kind();
    let sock = ep.socket.clone();
    sock.set_connected(false);
    match kind {
        SocketKind::Datagram => {
            if let Some(peer) = r.get_mut(peer_id) {
                peer.refs.retain(|e| *e != id);
            }
        }
        SocketKind::Stream => {
            if let Some(peer) = r.get_mut(peer_id) {
                peer.peer = None;
                peer.socket.set_connected(false);
            }
        }
    }
}

/// Close the send direction and tell a live stream peer it cannot receive
/// more. Datagram shutdown is a no-op.
pub fn shutdown(sock: &Arc<Socket>) -> Result<()> {
    let id = sock.endpoint().ok_or(SockError::InvalidArgument)?;
    if sock.kind() == SocketKind::Datagram {
        return Ok(());
    }
    registry::with(|r| {
        let ep = r.get(id).ok_or(SockError::InvalidArgument)?;
        sock.shut_send();
        if let Some(peer) = ep.peer.and_then(|p| r.get(p)) {
            peer.socket.shut_recv();
        }
        Ok(())
    })
}

/// Record an asynchronous error on the endpoint and unpair it; the error
/// surfaces on the socket's next operation.
pub fn drop_with(sock: &Arc<Socket>, err: SockError) -> Result<()> {
    let id = sock.endpoint().ok_or(SockError::InvalidArgument)?;
    registry::with(|r| {
        drop_locked(r, id, err);
        Ok(())
    })
}

fn drop_locked(r: &mut Registry, id: EndpointId, err: SockError) {
    if let Some(ep) = r.get(id) {
        ep.socket.set_error(err);
    }
    disconnect_locked(r, id);
}

/// Abort the endpoint: record `ConnectionAborted`, then tear it down.
pub fn abort(sock: &Arc<Socket>) -> Result<()> {
    drop_with(sock, SockError::ConnectionAborted)?;
    detach(sock)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::endpoint;

    #[test]
    fn test_attach_reserves_defaults() {
        let s = Socket::new(SocketKind::Stream);
        attach(&s).unwrap();
        assert_eq!(s.snd.hiwat(), tunables::stream_send_space());
        assert_eq!(s.rcv.hiwat(), tunables::stream_recv_space());
        detach(&s).unwrap();

        let d = Socket::new(SocketKind::Datagram);
        attach(&d).unwrap();
        assert_eq!(d.snd.hiwat(), tunables::datagram_max());
        assert_eq!(d.rcv.hiwat(), tunables::datagram_recv_space());
        detach(&d).unwrap();
    }

    #[test]
    fn test_reattach_rejected() {
        let s = Socket::new(SocketKind::Stream);
        attach(&s).unwrap();
        assert_eq!(attach(&s).unwrap_err(), SockError::InvalidArgument);
        detach(&s).unwrap();
    }

    #[test]
    fn test_pair_symmetry_and_disconnect() {
        let a = Socket::new(SocketKind::Stream);
        let b = Socket::new(SocketKind::Stream);
        attach(&a).unwrap();
        attach(&b).unwrap();
        connect_pair(&a, &b).unwrap();
        assert!(a.is_connected() && b.is_connected());

        disconnect(&a).unwrap();
        assert!(!a.is_connected() && !b.is_connected());
        // Idempotent.
        disconnect(&a).unwrap();
        detach(&a).unwrap();
        detach(&b).unwrap();
    }

    #[test]
    fn test_pair_kind_mismatch() {
        let a = Socket::new(SocketKind::Stream);
        let b = Socket::new(SocketKind::Datagram);
        attach(&a).unwrap();
        attach(&b).unwrap();
        assert_eq!(
            connect_pair(&a, &b).unwrap_err(),
            SockError::ProtocolMismatch
        );
        detach(&a).unwrap();
        detach(&b).unwrap();
    }

    #[test]
    fn test_datagram_peer_death_resets_sender() {
        let a = Socket::new(SocketKind::Datagram);
        let b = Socket::new(SocketKind::Datagram);
        attach(&a).unwrap();
        attach(&b).unwrap();
        connect_pair(&a, &b).unwrap();
        assert!(a.is_connected());

        detach(&b).unwrap();
        assert!(!a.is_connected());
        assert_eq!(a.take_error(), Some(SockError::ConnectionReset));
        detach(&a).unwrap();
    }

    #[test]
    fn test_double_shutdown_is_noop() {
        let a = Socket::new(SocketKind::Stream);
        let b = Socket::new(SocketKind::Stream);
        attach(&a).unwrap();
        attach(&b).unwrap();
        connect_pair(&a, &b).unwrap();
        shutdown(&a).unwrap();
        shutdown(&a).unwrap();
        assert!(a.is_send_shut());
        assert!(b.is_recv_shut());
        detach(&a).unwrap();
        detach(&b).unwrap();
    }

    #[test]
    fn test_detach_of_stale_socket_fails_cleanly() {
        let s = Socket::new(SocketKind::Stream);
        attach(&s).unwrap();
        detach(&s).unwrap();
        assert_eq!(detach(&s).unwrap_err(), SockError::InvalidArgument);
    }

    #[test]
    fn test_abort_records_error_then_detaches() {
        let a = Socket::new(SocketKind::Stream);
        let b = Socket::new(SocketKind::Stream);
        attach(&a).unwrap();
        attach(&b).unwrap();
        connect_pair(&a, &b).unwrap();
        abort(&a).unwrap();
        assert!(a.endpoint().is_none());
        assert_eq!(a.take_error(), Some(SockError::ConnectionAborted));
        assert!(!b.is_connected());
        detach(&b).unwrap();
    }

    #[test]
    fn test_accept_reports_peer_name() {
        let a = Socket::new(SocketKind::Stream);
        let b = Socket::new(SocketKind::Stream);
        attach(&a).unwrap();
        attach(&b).unwrap();
        connect_pair(&a, &b).unwrap();
        // Neither side bound: the unnamed sentinel.
        assert_eq!(accept(&a).unwrap(), None);
        assert_eq!(endpoint::peer_addr(&a).unwrap(), None);
        detach(&a).unwrap();
        detach(&b).unwrap();
    }
}
