//! Stream endpoint scenarios: echo flow control, shutdown mid-transfer,
//! byte-exact round trips, and operation idempotence.

use std::sync::Arc;

use localsock::{
    conn, endpoint, transfer, tunables, SendFlags, SockError, Socket, SocketKind, Task,
};

fn stream_pair() -> (Arc<Socket>, Arc<Socket>) {
    let a = Socket::new(SocketKind::Stream);
    let b = Socket::new(SocketKind::Stream);
    conn::attach(&a).unwrap();
    conn::attach(&b).unwrap();
    conn::connect_pair(&a, &b).unwrap();
    (a, b)
}

fn send_bytes(sock: &Arc<Socket>, data: &[u8], task: &Task) -> localsock::Result<()> {
    transfer::send(sock, data, Vec::new(), None, SendFlags::empty(), task)
}

#[test]
fn stream_echo_hundred_rounds() {
    let (a, b) = stream_pair();
    let task = Task::new(1, 1000, 1000);
    let space = tunables::stream_send_space();
    let mut total = 0usize;

    for round in 0..100u32 {
        let chunk: Vec<u8> = (0..1000).map(|i| (round as usize + i) as u8).collect();
        send_bytes(&a, &chunk, &task).unwrap();
        let (data, _) = b.rcv.recv_stream(usize::MAX);
        assert_eq!(data, chunk, "round {round} corrupted");
        total += data.len();
        transfer::rcvd(&b, data.len()).unwrap();
    }

    assert_eq!(total, 100_000);
    // Quiescent: every byte drained, so the full send space is back.
    assert_eq!(a.snd.hiwat(), space);
    assert_eq!(b.rcv.occupancy(), (0, 0));

    conn::detach(&a).unwrap();
    conn::detach(&b).unwrap();
}

#[test]
fn stream_backpressure_tracks_undrained_bytes() {
    let (a, b) = stream_pair();
    let task = Task::new(1, 1000, 1000);
    let space = tunables::stream_send_space();

    send_bytes(&a, &[1u8; 2000], &task).unwrap();
    send_bytes(&a, &[2u8; 500], &task).unwrap();
    assert_eq!(a.snd.hiwat(), space - 2500);

    // Partial drain releases exactly the drained portion.
    let (data, _) = b.rcv.recv_stream(1500);
    assert_eq!(data.len(), 1500);
    transfer::rcvd(&b, data.len()).unwrap();
    assert_eq!(a.snd.hiwat(), space - 1000);

    let (rest, _) = b.rcv.recv_stream(usize::MAX);
    assert_eq!(rest.len(), 1000);
    transfer::rcvd(&b, rest.len()).unwrap();
    assert_eq!(a.snd.hiwat(), space);

    conn::detach(&a).unwrap();
    conn::detach(&b).unwrap();
}

#[test]
fn shutdown_during_transfer() {
    let (a, b) = stream_pair();
    let task = Task::new(1, 1000, 1000);
    let space = tunables::stream_send_space();

    for _ in 0..4 {
        send_bytes(&a, &[9u8; 1000], &task).unwrap();
    }
    // Receiver closes its read side mid-stream.
    b.shut_recv();
    assert_eq!(
        send_bytes(&a, &[9u8; 1000], &task).unwrap_err(),
        SockError::BrokenPipe
    );

    // Already-queued bytes stay readable and still release backpressure.
    let (data, _) = b.rcv.recv_stream(usize::MAX);
    assert_eq!(data.len(), 4000);
    transfer::rcvd(&b, data.len()).unwrap();
    assert_eq!(a.snd.hiwat(), space);

    conn::detach(&a).unwrap();
    conn::detach(&b).unwrap();
}

#[test]
fn shutdown_propagates_to_peer() {
    let (a, b) = stream_pair();
    let task = Task::new(1, 1000, 1000);

    conn::shutdown(&a).unwrap();
    assert_eq!(
        send_bytes(&a, b"x", &task).unwrap_err(),
        SockError::BrokenPipe
    );
    assert!(b.is_recv_shut());
    // The other direction is untouched: the peer may still send here.
    send_bytes(&b, b"y", &task).unwrap();
    let (data, _) = a.rcv.recv_stream(usize::MAX);
    assert_eq!(data, b"y");
    transfer::rcvd(&a, data.len()).unwrap();

    conn::detach(&a).unwrap();
    conn::detach(&b).unwrap();
}

#[test]
fn stat_blocksize_counts_peer_occupancy() {
    let (a, b) = stream_pair();
    let task = Task::new(1, 1000, 1000);
    let space = tunables::stream_send_space();

    send_bytes(&a, &[5u8; 300], &task).unwrap();
    let st = endpoint::stat(&a).unwrap();
    // Send space already shrank by 300; the peer's queue holds the 300.
    assert_eq!(st.blocksize, (space - 300) + 300);
    assert_ne!(st.inode, 0);

    conn::detach(&a).unwrap();
    conn::detach(&b).unwrap();
}

#[test]
fn peer_cred_requires_connection() {
    let a = Socket::new(SocketKind::Stream);
    conn::attach(&a).unwrap();
    assert_eq!(
        endpoint::peer_cred(&a).unwrap_err(),
        SockError::NotConnected
    );
    conn::detach(&a).unwrap();
}

#[test]
fn double_teardown_is_safe() {
    let (a, b) = stream_pair();
    conn::disconnect(&a).unwrap();
    conn::disconnect(&a).unwrap();
    conn::shutdown(&a).unwrap();
    conn::shutdown(&a).unwrap();
    conn::detach(&a).unwrap();
    assert_eq!(conn::detach(&a).unwrap_err(), SockError::InvalidArgument);
    conn::detach(&b).unwrap();
}

#[test]
fn async_error_surfaces_once_on_send() {
    let (a, b) = stream_pair();
    let task = Task::new(1, 1000, 1000);
    conn::drop_with(&a, SockError::ConnectionReset).unwrap();
    assert_eq!(
        send_bytes(&a, b"x", &task).unwrap_err(),
        SockError::ConnectionReset
    );
    // Dropped endpoints are disconnected, so the retry reports that.
    assert_eq!(
        send_bytes(&a, b"x", &task).unwrap_err(),
        SockError::NotConnected
    );
    conn::detach(&a).unwrap();
    conn::detach(&b).unwrap();
}
