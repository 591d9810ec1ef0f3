//! Linear, byte-addressed program memory.

use std::fs;
use std::io;
use std::path::Path;

use thiserror::Error;

/// A read that ran past the end of memory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("cannot read {len} bytes at offset {offset:#x}")]
pub struct OutOfBounds {
    pub offset: u64,
    pub len: usize,
}

/// Read-only view of the memory an engine executes from.
///
/// Implementors only provide exact-length reads; the typed helpers decode
/// little-endian fields on top of them.
pub trait Memory {
    /// Fill `buf` from `offset`, or fail without a partial result.
    fn read_exact_at(&self, offset: u64, buf: &mut [u8]) -> Result<(), OutOfBounds>;

    /// Total size in bytes.
    fn size(&self) -> u64;

    fn read_u16(&self, offset: u64) -> Result<u16, OutOfBounds> {
        let mut buf = [0u8; 2];
        self.read_exact_at(offset, &mut buf)?;
        Ok(u16::from_le_bytes(buf))
    }

    fn read_i16(&self, offset: u64) -> Result<i16, OutOfBounds> {
        let mut buf = [0u8; 2];
        self.read_exact_at(offset, &mut buf)?;
        Ok(i16::from_le_bytes(buf))
    }

    fn read_i64(&self, offset: u64) -> Result<i64, OutOfBounds> {
        let mut buf = [0u8; 8];
        self.read_exact_at(offset, &mut buf)?;
        Ok(i64::from_le_bytes(buf))
    }

    fn read_bytes(&self, offset: u64, len: usize) -> Result<Vec<u8>, OutOfBounds> {
        let mut buf = vec![0u8; len];
        self.read_exact_at(offset, &mut buf)?;
        Ok(buf)
    }
}

impl Memory for [u8] {
    fn read_exact_at(&self, offset: u64, buf: &mut [u8]) -> Result<(), OutOfBounds> {
        let err = OutOfBounds {
            offset,
            len: buf.len(),
        };
        let start = usize::try_from(offset).map_err(|_| err)?;
        let end = start.checked_add(buf.len()).ok_or(err)?;
        let src = self.get(start..end).ok_or(err)?;
        buf.copy_from_slice(src);
        Ok(())
    }

    fn size(&self) -> u64 {
        self.len() as u64
    }
}

impl Memory for Vec<u8> {
    fn read_exact_at(&self, offset: u64, buf: &mut [u8]) -> Result<(), OutOfBounds> {
        self.as_slice().read_exact_at(offset, buf)
    }

    fn size(&self) -> u64 {
        self.len() as u64
    }
}

impl<M: Memory + ?Sized> Memory for &M {
    fn read_exact_at(&self, offset: u64, buf: &mut [u8]) -> Result<(), OutOfBounds> {
        (**self).read_exact_at(offset, buf)
    }

    fn size(&self) -> u64 {
        (**self).size()
    }
}

/// An owned memory image, typically loaded from a program file.
#[derive(Debug, Clone, Default)]
pub struct ByteMemory {
    bytes: Vec<u8>,
}

impl ByteMemory {
    pub fn new(bytes: Vec<u8>) -> Self {
        Self { bytes }
    }

    /// Load a raw image from disk.
    pub fn load(path: &Path) -> io::Result<Self> {
        fs::read(path).map(Self::new)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }
}

impl From<Vec<u8>> for ByteMemory {
    fn from(bytes: Vec<u8>) -> Self {
        Self::new(bytes)
    }
}

impl Memory for ByteMemory {
    fn read_exact_at(&self, offset: u64, buf: &mut [u8]) -> Result<(), OutOfBounds> {
        self.bytes.as_slice().read_exact_at(offset, buf)
    }

    fn size(&self) -> u64 {
        self.bytes.len() as u64
    }
}
