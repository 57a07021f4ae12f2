//! Input device - random-access byte sources
//!
//! The parser front-end requires seekable input because cross-reference
//! discovery starts at end-of-file and walks backward. Both an in-memory
//! device backed by `bytes::Bytes` and a memory-mapped file device are
//! provided.

use crate::error::{Error, ErrorKind, Result};
use bytes::Bytes;
use memmap2::Mmap;
use std::fs::File;
use std::io::SeekFrom;
use std::path::Path;

/// Random-access byte source
///
/// All read operations advance the position; `peek` does not. Positions are
/// absolute byte offsets from the start of the source.
pub trait Device {
    /// Read up to `buf.len()` bytes, returning the count read.
    fn read(&mut self, buf: &mut [u8]) -> Result<usize>;

    /// Seek to a position, returning the new absolute position.
    fn seek(&mut self, pos: SeekFrom) -> Result<u64>;

    /// Current absolute position.
    fn position(&self) -> u64;

    /// Total size of the source in bytes.
    fn size(&self) -> u64;

    /// Look at the next byte without consuming it.
    fn peek(&mut self) -> Result<Option<u8>>;

    /// Read a single byte, `None` at end of input.
    fn read_byte(&mut self) -> Result<Option<u8>> {
        let mut byte = [0u8; 1];
        match self.read(&mut byte)? {
            0 => Ok(None),
            _ => Ok(Some(byte[0])),
        }
    }

    /// Read exactly `buf.len()` bytes or fail with `UnexpectedEof`.
    fn read_exact(&mut self, buf: &mut [u8]) -> Result<()> {
        let mut filled = 0;
        while filled < buf.len() {
            let n = self.read(&mut buf[filled..])?;
            if n == 0 {
                return Err(Error::with_message(
                    ErrorKind::UnexpectedEof,
                    format!("expected {} more bytes", buf.len() - filled),
                ));
            }
            filled += n;
        }
        Ok(())
    }
}

fn resolve_seek(pos: SeekFrom, current: u64, size: u64) -> Result<u64> {
    let target = match pos {
        SeekFrom::Start(offset) => offset as i128,
        SeekFrom::End(offset) => size as i128 + offset as i128,
        SeekFrom::Current(offset) => current as i128 + offset as i128,
    };
    if target < 0 {
        return Err(Error::with_message(
            ErrorKind::ValueOutOfRange,
            "seek before start of device",
        ));
    }
    Ok((target as u64).min(size))
}

/// In-memory device over `bytes::Bytes`
pub struct MemoryDevice {
    data: Bytes,
    pos: usize,
}

impl MemoryDevice {
    /// Wrap a byte buffer.
    pub fn new(data: impl Into<Bytes>) -> Self {
        Self {
            data: data.into(),
            pos: 0,
        }
    }

    /// Borrow the full backing buffer.
    pub fn as_slice(&self) -> &[u8] {
        &self.data
    }
}

impl Device for MemoryDevice {
    fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        let remaining = &self.data[self.pos..];
        let n = buf.len().min(remaining.len());
        buf[..n].copy_from_slice(&remaining[..n]);
        self.pos += n;
        Ok(n)
    }

    fn seek(&mut self, pos: SeekFrom) -> Result<u64> {
        let new_pos = resolve_seek(pos, self.pos as u64, self.data.len() as u64)?;
        self.pos = new_pos as usize;
        Ok(new_pos)
    }

    fn position(&self) -> u64 {
        self.pos as u64
    }

    fn size(&self) -> u64 {
        self.data.len() as u64
    }

    fn peek(&mut self) -> Result<Option<u8>> {
        Ok(self.data.get(self.pos).copied())
    }
}

/// Memory-mapped file device
pub struct FileDevice {
    map: Mmap,
    pos: usize,
}

impl FileDevice {
    /// Map a file read-only.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = File::open(path)?;
        // Safety: the mapping is read-only and the file handle is held for
        // the lifetime of the map.
        let map = unsafe { Mmap::map(&file)? };
        Ok(Self { map, pos: 0 })
    }
}

impl Device for FileDevice {
    fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        let remaining = &self.map[self.pos..];
        let n = buf.len().min(remaining.len());
        buf[..n].copy_from_slice(&remaining[..n]);
        self.pos += n;
        Ok(n)
    }

    fn seek(&mut self, pos: SeekFrom) -> Result<u64> {
        let new_pos = resolve_seek(pos, self.pos as u64, self.map.len() as u64)?;
        self.pos = new_pos as usize;
        Ok(new_pos)
    }

    fn position(&self) -> u64 {
        self.pos as u64
    }

    fn size(&self) -> u64 {
        self.map.len() as u64
    }

    fn peek(&mut self) -> Result<Option<u8>> {
        Ok(self.map.get(self.pos).copied())
    }
}
