//! Byte cursor and per-instruction byte cache for sfi_decoder_rs
//!
//! [`ByteCursor`] reads a code segment with saturating zero-fill past the end.
//! [`InstructionByteCache`] memoizes the bytes pulled through the cursor for
//! the instruction currently being matched, and [`CacheView`] extracts
//! little-endian fields from those bytes after matching.

use crate::error::{InternalError, internal_error};
use log::warn;

/// Maximum length of an x86 instruction in bytes
pub const MAX_INSTRUCTION_LENGTH: usize = 15;

/// Value returned for reads at or past the end of the segment
const MEMORY_OVERFLOW: u8 = 0x00;

/// Bounded reader over the bytes of a code segment
#[derive(Debug, Clone)]
pub struct ByteCursor<'a> {
    /// Segment bytes
    memory: &'a [u8],
    /// Offset of the first byte of the current instruction
    inst_start: usize,
    /// Offset of the next byte to read
    pos: usize,
    /// Bytes actually read for the current instruction
    read_length: u8,
    /// Zero bytes supplied past the end for the current instruction
    overflow_count: u8,
}

impl<'a> ByteCursor<'a> {
    /// Create a cursor positioned at the start of `memory`
    pub fn new(memory: &'a [u8]) -> Self {
        Self {
            memory,
            inst_start: 0,
            pos: 0,
            read_length: 0,
            overflow_count: 0,
        }
    }

    /// Byte `n` positions past the read point, or 0 past the end
    #[inline]
    pub fn peek(&self, n: usize) -> u8 {
        self.pos
            .checked_add(n)
            .and_then(|index| self.memory.get(index))
            .copied()
            .unwrap_or(MEMORY_OVERFLOW)
    }

    /// Read the next byte. Past the end this yields 0 and bumps the overflow count.
    pub fn read(&mut self) -> u8 {
        match self.memory.get(self.pos) {
            Some(&byte) => {
                self.pos += 1;
                self.read_length = self.read_length.saturating_add(1);
                byte
            }
            None => {
                if self.overflow_count == 0 {
                    warn!(
                        "read past end of memory segment at offset {:#x}",
                        self.pos
                    );
                }
                self.overflow_count = self.overflow_count.saturating_add(1);
                MEMORY_OVERFLOW
            }
        }
    }

    /// Move the read point back to the start of the current instruction
    pub fn reset(&mut self) {
        self.pos = self.inst_start;
        self.read_length = 0;
        self.overflow_count = 0;
    }

    /// Commit the bytes read so far; the read point starts the next instruction
    pub fn advance(&mut self) {
        self.inst_start = self.pos;
        self.read_length = 0;
        self.overflow_count = 0;
    }

    /// Bytes read from the segment for the current instruction
    #[inline]
    pub fn read_length(&self) -> usize {
        self.read_length as usize
    }

    /// Zero-fill reads past the end for the current instruction
    #[inline]
    pub fn overflow_count(&self) -> usize {
        self.overflow_count as usize
    }

    /// Offset of the start of the current instruction
    #[inline]
    pub fn inst_start(&self) -> usize {
        self.inst_start
    }

    /// Offset of the next byte to be read
    #[inline]
    pub fn position(&self) -> usize {
        self.pos
    }

    /// Bytes left in the segment from the start of the current instruction
    #[inline]
    pub fn remaining(&self) -> usize {
        self.memory.len().saturating_sub(self.inst_start)
    }

    /// Total size of the underlying segment
    #[inline]
    pub fn segment_len(&self) -> usize {
        self.memory.len()
    }
}

/// Fixed-capacity copy of the bytes of one instruction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct InstBytes {
    byte: [u8; MAX_INSTRUCTION_LENGTH],
    length: u8,
}

impl InstBytes {
    /// Number of recorded bytes
    #[inline]
    pub fn len(&self) -> usize {
        self.length as usize
    }

    /// True if no bytes are recorded
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.length == 0
    }

    /// The recorded bytes
    #[inline]
    pub fn as_slice(&self) -> &[u8] {
        &self.byte[..self.len()]
    }

    /// Recorded byte at `index`, if any
    #[inline]
    pub fn get(&self, index: usize) -> Option<u8> {
        self.as_slice().get(index).copied()
    }

    /// Append one byte. Overflowing the capacity is an internal error.
    fn push(&mut self, byte: u8) {
        if self.len() >= MAX_INSTRUCTION_LENGTH {
            internal_error(InternalError::InstBufferOverflow);
        }
        self.byte[self.len()] = byte;
        self.length += 1;
    }

    fn clear(&mut self) {
        self.byte = [0; MAX_INSTRUCTION_LENGTH];
        self.length = 0;
    }
}

/// Instruction byte cache layered over a [`ByteCursor`]
#[derive(Debug, Clone)]
pub struct InstructionByteCache<'a> {
    bytes: InstBytes,
    cursor: ByteCursor<'a>,
}

impl<'a> InstructionByteCache<'a> {
    /// Create an empty cache reading through `cursor`
    pub fn new(cursor: ByteCursor<'a>) -> Self {
        Self {
            bytes: InstBytes::default(),
            cursor,
        }
    }

    /// The underlying cursor
    #[inline]
    pub fn cursor(&self) -> &ByteCursor<'a> {
        &self.cursor
    }

    /// The recorded bytes
    #[inline]
    pub fn bytes(&self) -> &InstBytes {
        &self.bytes
    }

    /// Number of bytes in the cache
    #[inline]
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    /// True if nothing has been read for this instruction
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Look `n` bytes past the read point without caching
    #[inline]
    pub fn peek(&self, n: usize) -> u8 {
        self.cursor.peek(n)
    }

    /// Byte `n` of the instruction, from the cache if already read,
    /// otherwise by looking ahead in the segment
    #[inline]
    pub fn byte_at(&self, n: usize) -> u8 {
        match self.bytes.get(n) {
            Some(byte) => byte,
            None => self.cursor.peek(n - self.bytes.len()),
        }
    }

    /// Read one byte through the cursor and append it to the cache
    pub fn read_into_cache(&mut self) -> u8 {
        let byte = self.cursor.read();
        self.bytes.push(byte);
        byte
    }

    /// Read `n` bytes into the cache
    pub fn read_bytes(&mut self, n: usize) {
        for _ in 0..n {
            self.read_into_cache();
        }
    }

    /// Empty the cache and rewind the cursor to the start of the instruction
    pub fn reset(&mut self) {
        self.bytes.clear();
        self.cursor.reset();
    }

    /// Empty the cache and start a new instruction at the cursor's read point
    pub fn begin_instruction(&mut self) {
        self.bytes.clear();
        self.cursor.advance();
    }

    /// Read-only view at the first cached byte
    #[inline]
    pub fn view(&self) -> CacheView<'_> {
        CacheView::new(&self.bytes)
    }
}

/// Sign handling for multi-byte reads through a [`CacheView`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Extension {
    Zero,
    Sign,
}

/// Non-owning position within an instruction's cached bytes
#[derive(Debug, Clone, Copy)]
pub struct CacheView<'b> {
    bytes: &'b InstBytes,
    pos: usize,
}

impl<'b> CacheView<'b> {
    /// View at the first byte of `bytes`
    pub fn new(bytes: &'b InstBytes) -> Self {
        Self::at(bytes, 0)
    }

    /// View at `pos`. A position past the recorded length is an internal error.
    pub fn at(bytes: &'b InstBytes, pos: usize) -> Self {
        if pos > bytes.len() {
            internal_error(InternalError::InstBufferUnderread {
                index: pos,
                length: bytes.len(),
            });
        }
        Self { bytes, pos }
    }

    /// New view `n` bytes past this one
    pub fn offset(&self, n: usize) -> Self {
        Self::at(self.bytes, self.pos + n)
    }

    /// Position of the view within the instruction
    #[inline]
    pub fn pos(&self) -> usize {
        self.pos
    }

    /// Bytes between the view and the end of the recorded instruction
    #[inline]
    pub fn remaining(&self) -> usize {
        self.bytes.len() - self.pos
    }

    /// Move the view forward by `n` bytes
    pub fn advance(&mut self, n: usize) {
        *self = self.offset(n);
    }

    /// Byte `n` past the view
    pub fn byte(&self, n: usize) -> u8 {
        let index = self.pos + n;
        match self.bytes.get(index) {
            Some(byte) => byte,
            None => internal_error(InternalError::InstBufferUnderread {
                index,
                length: self.bytes.len(),
            }),
        }
    }

    /// Little-endian integer of `width` bytes (1, 2, 3, 4, 6 or 8)
    pub fn read_le(&self, width: usize, extension: Extension) -> u64 {
        if !matches!(width, 1 | 2 | 3 | 4 | 6 | 8) {
            internal_error(InternalError::BadIntegerWidth(width));
        }
        let mut value = 0u64;
        for i in (0..width).rev() {
            value = (value << 8) | u64::from(self.byte(i));
        }
        let bits = width * 8;
        match extension {
            Extension::Sign if bits < 64 => {
                let shift = 64 - bits;
                (((value << shift) as i64) >> shift) as u64
            }
            _ => value,
        }
    }

    /// Sign-extended little-endian integer of `width` bytes
    #[inline]
    pub fn read_signed(&self, width: usize) -> i64 {
        self.read_le(width, Extension::Sign) as i64
    }

    /// Zero-extended little-endian integer of `width` bytes
    #[inline]
    pub fn read_unsigned(&self, width: usize) -> u64 {
        self.read_le(width, Extension::Zero)
    }

    /// The four bytes at the view as a signed 32-bit value
    #[inline]
    pub fn int32(&self) -> i32 {
        self.read_signed(4) as i32
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TEST_DATA: [u8; 10] = [0x01, 0x02, 0x03, 0x04, 0x05, 0x06, 0x07, 0x08, 0x09, 0x0a];

    fn cache_over(data: &[u8]) -> InstructionByteCache<'_> {
        InstructionByteCache::new(ByteCursor::new(data))
    }

    #[test]
    fn peek_gets_data_then_zero() {
        let cursor = ByteCursor::new(&TEST_DATA);
        for (i, &byte) in TEST_DATA.iter().enumerate() {
            assert_eq!(cursor.peek(i), byte);
        }
        assert_eq!(cursor.peek(TEST_DATA.len()), 0);
        assert_eq!(cursor.peek(TEST_DATA.len() + 100), 0);
        assert_eq!(cursor.peek(usize::MAX), 0);
        assert_eq!(cursor.read_length(), 0);
    }

    #[test]
    fn read_past_end_counts_overflow() {
        let mut cursor = ByteCursor::new(&TEST_DATA[..2]);
        assert_eq!(cursor.read(), 0x01);
        assert_eq!(cursor.read(), 0x02);
        assert_eq!(cursor.read(), 0x00);
        assert_eq!(cursor.read(), 0x00);
        assert_eq!(cursor.read_length(), 2);
        assert_eq!(cursor.overflow_count(), 2);
        assert_eq!(cursor.position(), 2);
    }

    #[test]
    fn reset_and_advance() {
        let mut cursor = ByteCursor::new(&TEST_DATA);
        cursor.read();
        cursor.read();
        cursor.advance();
        assert_eq!(cursor.inst_start(), 2);
        assert_eq!(cursor.read(), 0x03);
        assert_eq!(cursor.read(), 0x04);
        cursor.reset();
        assert_eq!(cursor.position(), 2);
        assert_eq!(cursor.read_length(), 0);
        assert_eq!(cursor.read(), 0x03);
        assert_eq!(cursor.remaining(), 8);
    }

    #[test]
    fn read_into_cache_mirrors_cursor() {
        let mut cache = cache_over(&TEST_DATA);
        for &expected in &TEST_DATA {
            assert_eq!(cache.read_into_cache(), expected);
        }
        assert_eq!(cache.bytes().as_slice(), &TEST_DATA);
        for _ in TEST_DATA.len()..MAX_INSTRUCTION_LENGTH {
            assert_eq!(cache.read_into_cache(), 0);
        }
        assert_eq!(cache.len(), MAX_INSTRUCTION_LENGTH);
        assert_eq!(cache.cursor().overflow_count(), 5);
    }

    #[test]
    #[should_panic(expected = "instruction buffer overflow")]
    fn cache_overflow_is_fatal() {
        let data = [0x90u8; 32];
        let mut cache = cache_over(&data);
        cache.read_bytes(MAX_INSTRUCTION_LENGTH + 1);
    }

    #[test]
    fn cache_reset_rewinds() {
        let mut cache = cache_over(&TEST_DATA);
        cache.read_bytes(3);
        cache.begin_instruction();
        cache.read_bytes(2);
        assert_eq!(cache.bytes().as_slice(), &[0x04, 0x05]);
        cache.reset();
        assert!(cache.is_empty());
        assert_eq!(cache.cursor().read_length(), 0);
        assert_eq!(cache.read_into_cache(), 0x04);
    }

    #[test]
    fn byte_at_falls_back_to_lookahead() {
        let mut cache = cache_over(&TEST_DATA);
        cache.read_bytes(2);
        assert_eq!(cache.byte_at(1), 0x02);
        assert_eq!(cache.byte_at(2), 0x03);
        assert_eq!(cache.byte_at(40), 0x00);
    }

    #[test]
    fn view_reads_little_endian() {
        let data = [0xff, 0xfe, 0x80, 0x01, 0x02, 0x03, 0x04, 0x05, 0x06];
        let mut cache = cache_over(&data);
        cache.read_bytes(data.len());
        let view = cache.view();
        assert_eq!(view.read_unsigned(1), 0xff);
        assert_eq!(view.read_signed(1), -1);
        assert_eq!(view.read_unsigned(2), 0xfeff);
        assert_eq!(view.read_signed(2), -257);
        assert_eq!(view.read_unsigned(3), 0x80feff);
        assert_eq!(view.read_signed(3), 0x80feffu32 as i64 - 0x100_0000);
        assert_eq!(view.offset(3).read_unsigned(4), 0x0403_0201);
        assert_eq!(view.offset(3).read_unsigned(6), 0x0605_0403_0201);
        assert_eq!(view.offset(1).read_unsigned(8), 0x0605_0403_0201_80fe);
        assert_eq!(view.offset(3).int32(), 0x0403_0201);
    }

    #[test]
    #[should_panic(expected = "read past end of instruction buffer")]
    fn view_past_length_is_fatal() {
        let mut cache = cache_over(&TEST_DATA);
        cache.read_bytes(2);
        cache.view().read_unsigned(4);
    }

    #[test]
    fn view_positions() {
        let mut cache = cache_over(&TEST_DATA);
        cache.read_bytes(4);
        let mut view = cache.view().offset(1);
        assert_eq!(view.pos(), 1);
        assert_eq!(view.remaining(), 3);
        view.advance(2);
        assert_eq!(view.byte(0), 0x04);
        assert_eq!(view.remaining(), 1);
    }
}
