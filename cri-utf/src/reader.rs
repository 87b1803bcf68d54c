//! Endian-aware seekable reader for CRI container data
//!
//! CRI formats are big-endian with a handful of little-endian exceptions
//! (the AFS2 count/alignment/offset tables), so the big-endian reads get the
//! short names.

use byteorder::{BigEndian, LittleEndian, ReadBytesExt};
use std::io::{ErrorKind, Read, Seek, SeekFrom};

use crate::{Error, Result};

/// Typed reads over an in-memory buffer or file handle.
#[derive(Debug)]
pub struct Reader<R> {
    inner: R,
}

fn map_eof(e: std::io::Error) -> Error {
    if e.kind() == ErrorKind::UnexpectedEof {
        Error::ShortRead
    } else {
        Error::Io(e)
    }
}

impl<R: Read + Seek> Reader<R> {
    pub fn new(inner: R) -> Self {
        Self { inner }
    }

    pub fn into_inner(self) -> R {
        self.inner
    }

    /// Current cursor position.
    pub fn position(&mut self) -> Result<u64> {
        Ok(self.inner.stream_position()?)
    }

    pub fn seek_to(&mut self, offset: u64) -> Result<()> {
        self.inner.seek(SeekFrom::Start(offset))?;
        Ok(())
    }

    pub fn skip(&mut self, n: i64) -> Result<()> {
        self.inner.seek(SeekFrom::Current(n))?;
        Ok(())
    }

    /// Advance the cursor until the position is a multiple of `k`.
    pub fn align(&mut self, k: u64) -> Result<()> {
        let pos = self.position()?;
        let rem = pos % k;
        if rem != 0 {
            self.skip((k - rem) as i64)?;
        }
        Ok(())
    }

    pub fn read_u8(&mut self) -> Result<u8> {
        self.inner.read_u8().map_err(map_eof)
    }

    pub fn read_i8(&mut self) -> Result<i8> {
        self.inner.read_i8().map_err(map_eof)
    }

    pub fn read_u16(&mut self) -> Result<u16> {
        self.inner.read_u16::<BigEndian>().map_err(map_eof)
    }

    pub fn read_i16(&mut self) -> Result<i16> {
        self.inner.read_i16::<BigEndian>().map_err(map_eof)
    }

    pub fn read_u32(&mut self) -> Result<u32> {
        self.inner.read_u32::<BigEndian>().map_err(map_eof)
    }

    pub fn read_i32(&mut self) -> Result<i32> {
        self.inner.read_i32::<BigEndian>().map_err(map_eof)
    }

    pub fn read_u64(&mut self) -> Result<u64> {
        self.inner.read_u64::<BigEndian>().map_err(map_eof)
    }

    pub fn read_i64(&mut self) -> Result<i64> {
        self.inner.read_i64::<BigEndian>().map_err(map_eof)
    }

    pub fn read_f32(&mut self) -> Result<f32> {
        self.inner.read_f32::<BigEndian>().map_err(map_eof)
    }

    pub fn read_u16_le(&mut self) -> Result<u16> {
        self.inner.read_u16::<LittleEndian>().map_err(map_eof)
    }

    pub fn read_u32_le(&mut self) -> Result<u32> {
        self.inner.read_u32::<LittleEndian>().map_err(map_eof)
    }

    pub fn read_bytes(&mut self, n: usize) -> Result<Vec<u8>> {
        let mut buf = vec![0; n];
        self.inner.read_exact(&mut buf).map_err(map_eof)?;
        Ok(buf)
    }

    /// Read bytes until (and excluding) a NUL terminator.
    pub fn read_cstring(&mut self) -> Result<Vec<u8>> {
        let mut buf = Vec::new();
        loop {
            let b = self.read_u8()?;
            if b == 0 {
                return Ok(buf);
            }
            buf.push(b);
        }
    }

    /// Read `n` bytes at an absolute offset, restoring the cursor afterwards.
    pub fn read_bytes_at(&mut self, n: usize, offset: u64) -> Result<Vec<u8>> {
        let back = self.position()?;
        self.seek_to(offset)?;
        let result = self.read_bytes(n);
        self.seek_to(back)?;
        result
    }

    /// Read a NUL-terminated byte string at an absolute offset, restoring the
    /// cursor afterwards.
    pub fn read_cstring_at(&mut self, offset: u64) -> Result<Vec<u8>> {
        let back = self.position()?;
        self.seek_to(offset)?;
        let result = self.read_cstring();
        self.seek_to(back)?;
        result
    }
}
