//! Bounds-checked reads over a fetched buffer.
//!
//! Container headers, info tables and property lists are all addressed by
//! raw offsets taken from untrusted data.  Every read goes through
//! [`ByteView`], which turns an out-of-range offset into [`OutOfBounds`]
//! instead of a panic.  Callers map that into their own `TruncatedInput`.

use byteorder::{BigEndian, ByteOrder, LittleEndian};
use thiserror::Error;

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("read of {len} bytes at offset {offset:#x} exceeds buffer of {available} bytes")]
pub struct OutOfBounds {
    pub offset:    usize,
    pub len:       usize,
    pub available: usize,
}

/// Read-only view over a byte buffer with checked, offset-addressed reads.
#[derive(Debug, Clone, Copy)]
pub struct ByteView<'a> {
    buf: &'a [u8],
}

impl<'a> ByteView<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.buf.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn as_slice(&self) -> &'a [u8] {
        self.buf
    }

    /// Borrow `len` bytes starting at `offset`.
    pub fn slice(&self, offset: usize, len: usize) -> Result<&'a [u8], OutOfBounds> {
        offset
            .checked_add(len)
            .and_then(|end| self.buf.get(offset..end))
            .ok_or(OutOfBounds { offset, len, available: self.buf.len() })
    }

    pub fn array<const N: usize>(&self, offset: usize) -> Result<[u8; N], OutOfBounds> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.slice(offset, N)?);
        Ok(out)
    }

    pub fn u8(&self, offset: usize) -> Result<u8, OutOfBounds> {
        Ok(self.slice(offset, 1)?[0])
    }

    pub fn be_u32(&self, offset: usize) -> Result<u32, OutOfBounds> {
        self.slice(offset, 4).map(BigEndian::read_u32)
    }

    pub fn be_u64(&self, offset: usize) -> Result<u64, OutOfBounds> {
        self.slice(offset, 8).map(BigEndian::read_u64)
    }

    pub fn le_u16(&self, offset: usize) -> Result<u16, OutOfBounds> {
        self.slice(offset, 2).map(LittleEndian::read_u16)
    }

    pub fn le_u32(&self, offset: usize) -> Result<u32, OutOfBounds> {
        self.slice(offset, 4).map(LittleEndian::read_u32)
    }

    pub fn le_u64(&self, offset: usize) -> Result<u64, OutOfBounds> {
        self.slice(offset, 8).map(LittleEndian::read_u64)
    }

    /// Bytes from `offset` up to (not including) the first NUL.
    ///
    /// A string that runs to the end of the buffer without a terminator is
    /// an out-of-bounds read.
    pub fn cstr(&self, offset: usize) -> Result<&'a [u8], OutOfBounds> {
        let tail = self.buf.get(offset..).ok_or(OutOfBounds {
            offset,
            len: 1,
            available: self.buf.len(),
        })?;
        match tail.iter().position(|&b| b == 0) {
            Some(end) => Ok(&tail[..end]),
            None => Err(OutOfBounds { offset, len: tail.len() + 1, available: self.buf.len() }),
        }
    }
}
