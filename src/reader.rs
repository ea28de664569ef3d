//! Bounded read cursor shared by all parsers.
//!
//! Every format in this library reads from a [`BoundedReader`]: a seekable
//! source whose total length is known up front. Knowing the length lets each
//! decode step check counts and offsets *before* touching the stream, so a
//! corrupted field fails cleanly instead of reading out of bounds or looping
//! forever.
//!
//! Each read consumes exactly the bytes it promises or returns an error -
//! there is no partial-read ambiguity. All multi-byte reads are
//! little-endian; every format in this library is.

use std::fs::File;
use std::io::{BufReader, Cursor, Read, Seek, SeekFrom};
use std::path::Path;

use crate::{Error, Result};

/// A seekable, length-known read cursor.
///
/// Construction rejects empty sources and sources whose initial position is
/// already past the end, so parsers can assume a non-empty, in-bounds stream.
/// The cursor is exclusively owned by one parse at a time; entries decoded
/// from it never retain it.
#[derive(Debug)]
pub struct BoundedReader<R> {
    inner: R,
    len: u64,
    pos: u64,
}

impl<R: Read + Seek> BoundedReader<R> {
    /// Wrap a seekable source, discovering its total length.
    ///
    /// The source's current position is preserved and becomes the cursor's
    /// starting position. Fails with [`Error::UnexpectedEof`] on an empty
    /// source and [`Error::InvalidRange`] if the source is already positioned
    /// at or past its own end.
    pub fn new(mut inner: R) -> Result<Self> {
        let pos = inner.stream_position()?;
        let len = inner.seek(SeekFrom::End(0))?;
        if len == 0 {
            return Err(Error::UnexpectedEof);
        }
        if pos >= len {
            return Err(Error::InvalidRange);
        }
        inner.seek(SeekFrom::Start(pos))?;
        Ok(Self { inner, len, pos })
    }

    /// Total length of the underlying source in bytes.
    pub fn len(&self) -> u64 {
        self.len
    }

    /// Always `false`; empty sources are rejected at construction.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Current absolute read position.
    pub fn position(&self) -> u64 {
        self.pos
    }

    /// Bytes remaining between the current position and the end.
    pub fn remaining(&self) -> u64 {
        self.len - self.pos
    }

    /// Validate that `offset` is a readable position, i.e. strictly inside
    /// the source.
    pub fn check_offset(&self, offset: u64) -> Result<u64> {
        if offset >= self.len {
            return Err(Error::InvalidRange);
        }
        Ok(offset)
    }

    /// Validate that `count` records of `record_size` bytes fit in the
    /// remaining input.
    ///
    /// Returns [`Error::UnexpectedEof`] when they do not: a count that
    /// overruns the input is indistinguishable from a truncated file.
    pub fn ensure_records(&self, count: u64, record_size: u64) -> Result<()> {
        let need = count.checked_mul(record_size).ok_or(Error::InvalidRange)?;
        if need > self.remaining() {
            return Err(Error::UnexpectedEof);
        }
        Ok(())
    }

    /// Seek to an absolute position in `[0, len]`.
    pub fn seek_to(&mut self, offset: u64) -> Result<()> {
        if offset > self.len {
            return Err(Error::InvalidRange);
        }
        self.inner.seek(SeekFrom::Start(offset))?;
        self.pos = offset;
        Ok(())
    }

    /// Seek to `n` bytes before the end of the source (footer access).
    pub fn seek_back_from_end(&mut self, n: u64) -> Result<()> {
        let offset = self.len.checked_sub(n).ok_or(Error::InvalidRange)?;
        self.seek_to(offset)
    }

    /// Advance the position by `n` bytes without reading them.
    pub fn skip(&mut self, n: u64) -> Result<()> {
        let target = self.pos.checked_add(n).ok_or(Error::InvalidRange)?;
        if target > self.len {
            return Err(Error::UnexpectedEof);
        }
        self.inner.seek(SeekFrom::Start(target))?;
        self.pos = target;
        Ok(())
    }

    /// Run `f` with the cursor temporarily moved to `offset`, restoring the
    /// saved position afterwards.
    ///
    /// This is the offset-chasing primitive: a record that stores only a
    /// pointer to an out-of-line field resolves it through here. The restore
    /// happens on every exit path, including when `f` fails, so a chase can
    /// never corrupt the decode of sibling fields or subsequent records.
    pub fn with_pos<T, F>(&mut self, offset: u64, f: F) -> Result<T>
    where
        F: FnOnce(&mut Self) -> Result<T>,
    {
        self.check_offset(offset)?;
        let saved = self.pos;
        self.seek_to(offset)?;
        let result = f(self);
        self.seek_to(saved)?;
        result
    }

    fn read_into(&mut self, buf: &mut [u8]) -> Result<()> {
        if buf.len() as u64 > self.remaining() {
            return Err(Error::UnexpectedEof);
        }
        self.inner.read_exact(buf)?;
        self.pos += buf.len() as u64;
        Ok(())
    }

    /// Read one byte.
    pub fn u8(&mut self) -> Result<u8> {
        let mut b = [0u8; 1];
        self.read_into(&mut b)?;
        Ok(b[0])
    }

    /// Read a little-endian `u16`.
    pub fn le_u16(&mut self) -> Result<u16> {
        let mut b = [0u8; 2];
        self.read_into(&mut b)?;
        Ok(u16::from_le_bytes(b))
    }

    /// Read a little-endian `u32`.
    pub fn le_u32(&mut self) -> Result<u32> {
        let mut b = [0u8; 4];
        self.read_into(&mut b)?;
        Ok(u32::from_le_bytes(b))
    }

    /// Read a little-endian `i32`.
    pub fn le_i32(&mut self) -> Result<i32> {
        let mut b = [0u8; 4];
        self.read_into(&mut b)?;
        Ok(i32::from_le_bytes(b))
    }

    /// Read a little-endian `u64`.
    pub fn le_u64(&mut self) -> Result<u64> {
        let mut b = [0u8; 8];
        self.read_into(&mut b)?;
        Ok(u64::from_le_bytes(b))
    }

    /// Read exactly `N` bytes into a fixed-size array.
    pub fn bytesa<const N: usize>(&mut self) -> Result<[u8; N]> {
        let mut b = [0u8; N];
        self.read_into(&mut b)?;
        Ok(b)
    }

    /// Read exactly `len` bytes into a `Vec`.
    pub fn bytesv(&mut self, len: usize) -> Result<Vec<u8>> {
        if len as u64 > self.remaining() {
            return Err(Error::UnexpectedEof);
        }
        let mut b = vec![0u8; len];
        self.inner.read_exact(&mut b)?;
        self.pos += len as u64;
        Ok(b)
    }

    /// Verify that the next `N` bytes in the stream match `expected`.
    ///
    /// Returns [`Error::BadMagic`] on mismatch.
    pub fn magic<const N: usize>(&mut self, expected: &[u8; N]) -> Result<()> {
        let got = self.bytesa::<N>()?;
        if &got != expected {
            return Err(Error::BadMagic);
        }
        Ok(())
    }

    /// Read a null-terminated string, stopping at a zero byte or the end of
    /// the source, decoding lossily as UTF-8.
    pub fn null_string(&mut self) -> Result<String> {
        let mut bytes = Vec::new();
        while self.pos < self.len {
            let b = self.u8()?;
            if b == 0 {
                break;
            }
            bytes.push(b);
        }
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }

    /// Borrow the underlying source.
    pub fn get_ref(&self) -> &R {
        &self.inner
    }

    /// Consume the cursor, returning the underlying source.
    pub fn into_inner(self) -> R {
        self.inner
    }
}

impl<'a> BoundedReader<Cursor<&'a [u8]>> {
    /// Build a cursor over an in-memory buffer, starting at `offset`.
    ///
    /// The window begins at `offset`, so offsets stored inside the container
    /// stay valid as absolute positions. Rejects empty buffers and offsets
    /// outside the buffer.
    pub fn from_bytes(data: &'a [u8], offset: usize) -> Result<Self> {
        if offset >= data.len() {
            return Err(Error::InvalidRange);
        }
        Self::new(Cursor::new(&data[offset..]))
    }
}

impl BoundedReader<BufReader<File>> {
    /// Open a file and build a cursor over it.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::new(BufReader::new(File::open(path)?))
    }
}
