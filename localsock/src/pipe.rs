//! Byte pipes used as transferable handle objects
//!
//! Provides a unidirectional byte stream between a writer and a reader.
//! Pipes exist here so the rights-transfer path has a concrete non-socket
//! object to move between handle spaces.

use alloc::{collections::VecDeque, sync::Arc};

use spin::Mutex;

/// Default pipe capacity (16 KB).
const PIPE_CAPACITY: usize = 16 * 1024;

/// Which end of a pipe a handle refers to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipeEnd {
    Read,
    Write,
}

/// Internal shared state of a pipe.
struct PipeInner {
    /// Data buffer.
    buffer: VecDeque<u8>,
    /// Maximum capacity in bytes.
    capacity: usize,
    /// True when the write end has been closed.
    write_closed: bool,
}

/// A bounded in-memory byte pipe.
pub struct Pipe {
    inner: Mutex<PipeInner>,
}

impl Pipe {
    /// Create a pipe with the default capacity.
    pub fn new() -> Arc<Self> {
        Self::with_capacity(PIPE_CAPACITY)
    }

    /// Create a pipe with a custom capacity.
    pub fn with_capacity(capacity: usize) -> Arc<Self> {
        Arc::new(Self {
            inner: Mutex::new(PipeInner {
                buffer: VecDeque::new(),
                capacity,
                write_closed: false,
            }),
        })
    }

    /// Write as much of `data` as fits; returns the number of bytes taken.
    ///
    /// Returns 0 once the write end has been closed.
    pub fn try_write(&self, data: &[u8]) -> usize {
        let mut pipe = self.inner.lock();
        if pipe.write_closed {
            return 0;
        }
        let room = pipe.capacity.saturating_sub(pipe.buffer.len());
        let n = data.len().min(room);
        pipe.buffer.extend(&data[..n]);
        n
    }

    /// Read up to `buf.len()` bytes; returns the number of bytes read.
    ///
    /// Returns 0 when the buffer is empty, whether or not the write end is
    /// still open; callers distinguish EOF via [`Pipe::write_closed`].
    pub fn try_read(&self, buf: &mut [u8]) -> usize {
        let mut pipe = self.inner.lock();
        let n = buf.len().min(pipe.buffer.len());
        for byte in buf.iter_mut().take(n) {
            *byte = pipe.buffer.pop_front().unwrap_or(0);
        }
        n
    }

    /// Close the write end; readers drain what remains and then see EOF.
    pub fn close_write(&self) {
        self.inner.lock().write_closed = true;
    }

    /// Whether the write end has been closed.
    pub fn write_closed(&self) -> bool {
        self.inner.lock().write_closed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_write_then_read() {
        let p = Pipe::new();
        assert_eq!(p.try_write(b"abc"), 3);
        let mut buf = [0u8; 8];
        assert_eq!(p.try_read(&mut buf), 3);
        assert_eq!(&buf[..3], b"abc");
    }

    #[test]
    fn test_capacity_bound() {
        let p = Pipe::with_capacity(4);
        assert_eq!(p.try_write(b"abcdef"), 4);
        assert_eq!(p.try_write(b"x"), 0);
    }

    #[test]
    fn test_closed_write_end() {
        let p = Pipe::new();
        p.try_write(b"z");
        p.close_write();
        assert_eq!(p.try_write(b"y"), 0);
        let mut buf = [0u8; 1];
        assert_eq!(p.try_read(&mut buf), 1);
        assert!(p.write_closed());
    }
}
