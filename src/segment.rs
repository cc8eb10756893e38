//! Code segments handed to the decoder
//!
//! A segment is a borrowed, read-only view of untrusted code plus the
//! virtual address it will be mapped at. The decoder never mutates it.

use crate::error::{DecoderError, Result};

/// Read-only code bytes and their base virtual address
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CodeSegment<'a> {
    /// Code bytes, owned by the caller
    bytes: &'a [u8],
    /// Virtual address of `bytes[0]`
    base: u64,
}

impl<'a> CodeSegment<'a> {
    /// Create a segment, checking that `base + len` fits in 64 bits
    pub fn new(bytes: &'a [u8], base: u64) -> Result<Self> {
        let size = bytes.len();
        match u64::try_from(size).ok().and_then(|len| base.checked_add(len)) {
            Some(_) => Ok(Self { bytes, base }),
            None => Err(DecoderError::AddressOverflow { base, size }),
        }
    }

    /// Base virtual address of the segment
    #[inline]
    pub fn base(&self) -> u64 {
        self.base
    }

    /// Declared size in bytes
    #[inline]
    pub fn size(&self) -> usize {
        self.bytes.len()
    }

    /// True if the segment holds no bytes
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// The code bytes
    #[inline]
    pub fn bytes(&self) -> &'a [u8] {
        self.bytes
    }

    /// Virtual address one past the last byte
    #[inline]
    pub fn limit(&self) -> u64 {
        // Cannot overflow, checked in `new`.
        self.base + self.bytes.len() as u64
    }

    /// Virtual address of the byte at `offset`
    #[inline]
    pub fn address_of(&self, offset: usize) -> u64 {
        self.base.wrapping_add(offset as u64)
    }

    /// Shrink the segment to its first `size` bytes
    pub fn truncate(&mut self, size: usize) -> Result<()> {
        if size > self.bytes.len() {
            return Err(DecoderError::InvalidResize {
                size: self.bytes.len(),
                requested: size,
            });
        }
        self.bytes = &self.bytes[..size];
        Ok(())
    }
}
