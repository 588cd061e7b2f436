//! Socket buffer primitives
//!
//! A buffer is a queue of segments with byte and segment occupancy
//! accounting against a high-water mark and a segment quota. The endpoint
//! layer adjusts the marks to couple a sender's quota to its peer's
//! occupancy; the buffer itself only counts.
//!
//! Wakeups are counters standing in for the host's sleep/wakeup hooks: a
//! poll loop or test can watch them, and nothing here ever blocks.

use alloc::{collections::VecDeque, vec::Vec};
use core::sync::atomic::{AtomicU64, Ordering};

use spin::Mutex;

use crate::{addr::LocalAddr, control::ControlMessage};

/// One queued message: payload bytes, the source address (datagram only),
/// and any internalized control attached at this stream position.
pub struct Segment {
    pub from: Option<LocalAddr>,
    pub data: Vec<u8>,
    pub control: Vec<ControlMessage>,
}

struct SockBufInner {
    segs: VecDeque<Segment>,
    /// Occupancy in bytes
    bytes: usize,
    /// High-water mark in bytes
    hiwat: usize,
    /// Occupancy in segments
    msgs: usize,
    /// Segment quota
    msgmax: usize,
}

/// A send or receive buffer
pub struct SockBuf {
    inner: Mutex<SockBufInner>,
    rd_wakeups: AtomicU64,
    wr_wakeups: AtomicU64,
}

impl SockBuf {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(SockBufInner {
                segs: VecDeque::new(),
                bytes: 0,
                hiwat: 0,
                msgs: 0,
                msgmax: 0,
            }),
            rd_wakeups: AtomicU64::new(0),
            wr_wakeups: AtomicU64::new(0),
        }
    }

    /// Reserve capacity; only fields still at zero are set.
    pub fn reserve(&self, hiwat: usize, msgmax: usize) {
        let mut b = self.inner.lock();
        if b.hiwat == 0 {
            b.hiwat = hiwat;
        }
        if b.msgmax == 0 {
            b.msgmax = msgmax;
        }
    }

    pub fn hiwat(&self) -> usize {
        self.inner.lock().hiwat
    }

    pub fn msgmax(&self) -> usize {
        self.inner.lock().msgmax
    }

    /// Current occupancy as `(bytes, segments)`
    pub fn occupancy(&self) -> (usize, usize) {
        let b = self.inner.lock();
        (b.bytes, b.msgs)
    }

    /// Bytes still available below the high-water mark
    pub fn space(&self) -> usize {
        let b = self.inner.lock();
        b.hiwat.saturating_sub(b.bytes)
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().segs.is_empty()
    }

    /// Adjust the high-water mark, saturating at zero.
    pub fn add_hiwat(&self, delta: isize) {
        let mut b = self.inner.lock();
        b.hiwat = (b.hiwat as isize).saturating_add(delta).max(0) as usize;
    }

    /// Adjust the segment quota, saturating at zero.
    pub fn add_msgmax(&self, delta: isize) {
        let mut b = self.inner.lock();
        b.msgmax = (b.msgmax as isize).saturating_add(delta).max(0) as usize;
    }

    /// Append stream bytes, coalescing into the tail segment when neither
    /// side carries control or a source address. Never fails: stream
    /// overcommit is bounded by the sender-side mark coupling, not here.
    pub fn append_stream(&self, data: &[u8], control: Vec<ControlMessage>) {
        let mut b = self.inner.lock();
        b.bytes += data.len();
        if control.is_empty() {
            if let Some(tail) = b.segs.back_mut() {
                if tail.from.is_none() && tail.control.is_empty() {
                    tail.data.extend_from_slice(data);
                    return;
                }
            }
        }
        b.msgs += 1;
        b.segs.push_back(Segment {
            from: None,
            data: data.into(),
            control,
        });
    }

    /// Append one datagram with its source address. Refuses when the bytes
    /// would cross the high-water mark or the segment quota is exhausted,
    /// handing the control back so the caller can release it.
    pub fn append_from(
        &self,
        from: Option<LocalAddr>,
        data: &[u8],
        control: Vec<ControlMessage>,
    ) -> core::result::Result<(), Vec<ControlMessage>> {
        let mut b = self.inner.lock();
        if b.bytes + data.len() > b.hiwat || b.msgs >= b.msgmax {
            return Err(control);
        }
        b.bytes += data.len();
        b.msgs += 1;
        b.segs.push_back(Segment {
            from,
            data: data.into(),
            control,
        });
        Ok(())
    }

    /// Drain up to `max` stream bytes. Control attached to a segment is
    /// delivered with that segment's first drained byte; a partially
    /// drained segment keeps its remaining bytes at the front.
    pub fn recv_stream(&self, max: usize) -> (Vec<u8>, Vec<ControlMessage>) {
        let mut b = self.inner.lock();
        let mut data = Vec::new();
        let mut control = Vec::new();
        while data.len() < max {
            let Some(mut seg) = b.segs.pop_front() else {
                break;
            };
            control.append(&mut seg.control);
            let want = max - data.len();
            if seg.data.len() <= want {
                b.bytes -= seg.data.len();
                b.msgs = b.msgs.saturating_sub(1);
                data.extend_from_slice(&seg.data);
            } else {
                b.bytes -= want;
                data.extend_from_slice(&seg.data[..want]);
                seg.data.drain(..want);
                b.segs.push_front(seg);
                break;
            }
        }
        (data, control)
    }

    /// Pop one whole datagram.
    pub fn recv_datagram(&self) -> Option<Segment> {
        let mut b = self.inner.lock();
        let seg = b.segs.pop_front()?;
        b.bytes -= seg.data.len();
        b.msgs = b.msgs.saturating_sub(1);
        Some(seg)
    }

    /// Visit queued segments in order without draining them.
    pub(crate) fn for_each_segment(&self, mut f: impl FnMut(&Segment)) {
        let b = self.inner.lock();
        for seg in &b.segs {
            f(seg);
        }
    }

    /// Remove everything, returning the segments so the caller can release
    /// any rights still attached to them.
    pub fn flush(&self) -> Vec<Segment> {
        let mut b = self.inner.lock();
        b.bytes = 0;
        b.msgs = 0;
        b.segs.drain(..).collect()
    }

    /// Wake readers (delivery happened).
    pub fn rd_wakeup(&self) {
        self.rd_wakeups.fetch_add(1, Ordering::Relaxed);
    }

    /// Wake writers (space opened up).
    pub fn wr_wakeup(&self) {
        self.wr_wakeups.fetch_add(1, Ordering::Relaxed);
    }

    pub fn rd_wakeup_count(&self) -> u64 {
        self.rd_wakeups.load(Ordering::Relaxed)
    }

    pub fn wr_wakeup_count(&self) -> u64 {
        self.wr_wakeups.load(Ordering::Relaxed)
    }
}

impl Default for SockBuf {
    fn default() -> Self {
        Self::new()
    }
}
