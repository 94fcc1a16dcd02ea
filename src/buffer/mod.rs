//! Fixed-capacity mutable buffer and the owned copy buffer used to hand
//! bytes off the poll thread's shared read buffer to a send queue.
//!
//! The original source's `MutableBuffer`/`CopyBuffer` split exists because
//! C++ has no borrow checker: a `Buffer::Ptr` handed to a callback might
//! outlive the poll thread's reuse of its backing storage, so anything that
//! needs to survive past the callback has to be copied into a `CopyBuffer`.
//! In Rust the equivalent borrowed view is just `&[u8]`, scoped by the
//! compiler to the read callback's invocation; `MutableBuffer` and
//! `CopyBuffer` remain because they model genuinely distinct ownership:
//! "resizable scratch space reused every recv" vs. "owned bytes that must
//! outlive the scratch space".

use crate::error::{Error, ErrorCode, Result};

pub mod envelope;
pub use envelope::SendEnvelope;

const SHRINK_FLOOR: usize = 2 * 1024;

/// A contiguous, resizable byte region with a write cursor (`content_size`)
/// separate from its allocated `capacity`. Used as the poll thread's shared
/// read buffer and anywhere else a socket needs scratch space that is
/// reused across many small reads.
#[derive(Debug)]
pub struct MutableBuffer {
    data: Vec<u8>,
    content_size: usize,
}

impl MutableBuffer {
    pub fn with_capacity(capacity: usize) -> Self {
        MutableBuffer {
            data: vec![0u8; capacity],
            content_size: 0,
        }
    }

    pub fn capacity(&self) -> usize {
        self.data.len()
    }

    pub fn content_size(&self) -> usize {
        self.content_size
    }

    pub fn available_space(&self) -> usize {
        self.capacity() - self.content_size
    }

    /// The filled prefix.
    pub fn data(&self) -> &[u8] {
        &self.data[..self.content_size]
    }

    /// The unfilled suffix, ready to be written into directly (e.g. by
    /// `recvfrom`) before calling [`MutableBuffer::increase_content_size`].
    pub fn writable_tail(&mut self) -> &mut [u8] {
        &mut self.data[self.content_size..]
    }

    pub fn append(&mut self, bytes: &[u8]) -> Result<()> {
        if bytes.len() > self.available_space() {
            return Err(Error::new(ErrorCode::BufferNotEnoughCapacity));
        }
        let start = self.content_size;
        self.data[start..start + bytes.len()].copy_from_slice(bytes);
        self.content_size += bytes.len();
        Ok(())
    }

    /// Advances `content_size` after bytes were written directly into
    /// [`MutableBuffer::writable_tail`].
    pub fn increase_content_size(&mut self, increased_size: usize) -> Result<()> {
        if increased_size > self.available_space() {
            return Err(Error::new(ErrorCode::BufferNotEnoughCapacity));
        }
        self.content_size += increased_size;
        Ok(())
    }

    /// Shifts the prefix of length `n` out of the buffer. `n >= content_size`
    /// resets to empty.
    pub fn consume(&mut self, n: usize) {
        if n >= self.content_size {
            self.reset();
            return;
        }
        self.data.copy_within(n..self.content_size, 0);
        self.content_size -= n;
    }

    pub fn reset(&mut self) {
        self.content_size = 0;
    }

    /// Resizes the backing allocation following the source's thrash-avoiding
    /// policy:
    ///
    /// - refuses to shrink below `content_size`;
    /// - grows exactly to `requested` when it exceeds the current capacity;
    /// - otherwise keeps the current allocation unless `requested` would
    ///   free at least half of it (and the buffer is already above the
    ///   2 KiB floor), in which case it reallocates to exactly `requested`.
    pub fn reserve(&mut self, requested: usize) -> Result<()> {
        if requested < self.content_size {
            return Err(Error::new(ErrorCode::BufferNotEnoughCapacity));
        }

        let capacity = self.capacity();

        if requested > capacity {
            self.data.resize(requested, 0);
            return Ok(());
        }

        if capacity < SHRINK_FLOOR {
            return Ok(());
        }

        if 2 * requested > capacity {
            return Ok(());
        }

        let mut data = vec![0u8; requested];
        data[..self.content_size].copy_from_slice(&self.data[..self.content_size]);
        self.data = data;
        Ok(())
    }
}

/// An owned byte region copied out of a borrowed view, plus a trailing zero
/// byte kept only for safe textual printing of the payload in logs/tests.
#[derive(Debug, Clone)]
pub struct CopyBuffer {
    data: Vec<u8>,
}

impl CopyBuffer {
    pub fn from_slice(bytes: &[u8]) -> Self {
        let mut data = Vec::with_capacity(bytes.len() + 1);
        data.extend_from_slice(bytes);
        data.push(0);
        CopyBuffer { data }
    }

    pub fn data(&self) -> &[u8] {
        &self.data[..self.data.len() - 1]
    }

    pub fn content_size(&self) -> usize {
        self.data.len() - 1
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn append_then_consume_prefix() {
        let mut buf = MutableBuffer::with_capacity(16);
        buf.append(b"hello").unwrap();
        assert_eq!(buf.data(), b"hello");
        buf.consume(2);
        assert_eq!(buf.data(), b"llo");
    }

    #[test]
    fn append_beyond_capacity_fails() {
        let mut buf = MutableBuffer::with_capacity(4);
        let err = buf.append(b"hello").unwrap_err();
        assert_eq!(err.code(), ErrorCode::BufferNotEnoughCapacity);
    }

    #[test]
    fn consume_past_content_size_resets() {
        let mut buf = MutableBuffer::with_capacity(16);
        buf.append(b"hi").unwrap();
        buf.consume(100);
        assert_eq!(buf.content_size(), 0);
    }

    #[test]
    fn writable_tail_and_increase_content_size_round_trip() {
        let mut buf = MutableBuffer::with_capacity(8);
        buf.writable_tail()[..3].copy_from_slice(b"abc");
        buf.increase_content_size(3).unwrap();
        assert_eq!(buf.data(), b"abc");
    }

    #[test]
    fn reserve_refuses_to_shrink_below_content_size() {
        let mut buf = MutableBuffer::with_capacity(4096);
        buf.append(b"0123456789").unwrap();
        let err = buf.reserve(4).unwrap_err();
        assert_eq!(err.code(), ErrorCode::BufferNotEnoughCapacity);
    }

    #[test]
    fn reserve_grows_exactly() {
        let mut buf = MutableBuffer::with_capacity(16);
        buf.append(b"hi").unwrap();
        buf.reserve(64).unwrap();
        assert_eq!(buf.capacity(), 64);
        assert_eq!(buf.data(), b"hi");
    }

    #[test]
    fn reserve_below_floor_never_reallocates() {
        let mut buf = MutableBuffer::with_capacity(1024);
        buf.reserve(16).unwrap();
        assert_eq!(buf.capacity(), 1024);
    }

    #[test]
    fn reserve_keeps_buffer_when_request_wastes_less_than_half() {
        let mut buf = MutableBuffer::with_capacity(4096);
        buf.reserve(3000).unwrap();
        assert_eq!(buf.capacity(), 4096);
    }

    #[test]
    fn reserve_reallocates_when_request_wastes_more_than_half() {
        let mut buf = MutableBuffer::with_capacity(4096);
        buf.reserve(1000).unwrap();
        assert_eq!(buf.capacity(), 1000);
    }

    #[test]
    fn reserve_idempotent_second_call_does_not_reallocate() {
        let mut buf = MutableBuffer::with_capacity(4096);
        buf.reserve(1000).unwrap();
        assert_eq!(buf.capacity(), 1000);
        buf.reserve(1000).unwrap();
        assert_eq!(buf.capacity(), 1000);
    }

    #[test]
    fn copy_buffer_copies_exact_bytes() {
        let copy = CopyBuffer::from_slice(b"payload");
        assert_eq!(copy.data(), b"payload");
        assert_eq!(copy.content_size(), 7);
    }
}
