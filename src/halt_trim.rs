//! Trimming trailing halts off the last code segment
//!
//! Loaders pad the end of the text segment with `hlt` bytes up to a page
//! boundary. Validating all of them is wasted work, so the segment is cut
//! back to the last real instruction plus a margin of halts, rounded up to
//! the bundle alignment. The margin guarantees the final instruction is
//! always followed by at least one full instruction's worth of halts.

use crate::buffer::MAX_INSTRUCTION_LENGTH;
use crate::error::{DecoderError, Result};
use crate::segment::CodeSegment;
use log::debug;

/// Single-byte `hlt`
pub const HALT_OPCODE: u8 = 0xf4;

/// Halts always kept after the last non-halt byte
pub const MIN_HALT_KEEP: usize = MAX_INSTRUCTION_LENGTH + 1;

/// Size `segment` can be cut down to by dropping trailing halts.
///
/// Returns the original size when there is nothing worth dropping, when
/// `alignment` is zero, or when rounding up to `alignment` would reach the
/// end of the segment anyway. Never returns more than the original size.
pub fn trim_halts(segment: &CodeSegment<'_>, alignment: u8) -> usize {
    trimmed_size(segment.bytes(), segment.base(), alignment)
}

fn trimmed_size(bytes: &[u8], base: u64, alignment: u8) -> usize {
    let size = bytes.len();
    if size == 0 || alignment == 0 {
        return size;
    }
    // The first byte is never counted as a halt.
    let kept = bytes[1..]
        .iter()
        .rposition(|&b| b != HALT_OPCODE)
        .map_or(1, |last| last + 2);
    let halts = size - kept;
    if halts <= MIN_HALT_KEEP {
        return size;
    }

    let limit = base + size as u64;
    let mut end = base + (kept + MIN_HALT_KEEP) as u64;
    let overflow = end % u64::from(alignment);
    if overflow != 0 {
        match end.checked_add(u64::from(alignment) - overflow) {
            Some(rounded) if rounded < limit => end = rounded,
            _ => {
                debug!("halt trim at {base:#x}: rounding reaches segment end, keeping {size} bytes");
                return size;
            }
        }
    }
    let trimmed = (end - base) as usize;
    debug!("halt trim at {base:#x}: {halts} trailing halts, {size} -> {trimmed} bytes");
    trimmed
}

/// Trim the trailing code segment in place.
///
/// Only applies when `segment` ends exactly at `vlimit`, i.e. it is the last
/// segment of the image; otherwise nothing changes. On success both the
/// segment and `vlimit` shrink by the same amount. Returns the new size.
pub fn trim_segment(segment: &mut CodeSegment<'_>, vlimit: &mut u64, alignment: u8) -> Result<usize> {
    if alignment == 0 {
        return Err(DecoderError::ZeroAlignment);
    }
    if *vlimit != segment.limit() {
        return Ok(segment.size());
    }
    let size = segment.size();
    let trimmed = trim_halts(segment, alignment);
    if trimmed < size {
        segment.truncate(trimmed)?;
        *vlimit -= (size - trimmed) as u64;
    }
    Ok(trimmed)
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALIGN: u8 = 32;

    fn trim(bytes: &[u8], base: u64, vlimit: u64) -> (usize, u64) {
        let mut segment = CodeSegment::new(bytes, base).expect("segment");
        let mut vlimit = vlimit;
        let size = trim_segment(&mut segment, &mut vlimit, ALIGN).expect("trim");
        assert_eq!(size, segment.size());
        (size, vlimit)
    }

    #[test]
    fn short_halt_run_is_kept() {
        let code = [HALT_OPCODE; 4];
        assert_eq!(trim(&code, 0, 4), (4, 4));
    }

    #[test]
    fn long_halt_run_rounds_to_bundle() {
        let code = [HALT_OPCODE; 100];
        for base in 0..MIN_HALT_KEEP as u64 {
            let tail = &code[base as usize..];
            assert_eq!(trim(tail, base, 100), (32 - base as usize, 32), "base {base}");
        }
        for base in MIN_HALT_KEEP as u64..MIN_HALT_KEEP as u64 + 32 {
            let tail = &code[base as usize..];
            assert_eq!(trim(tail, base, 100), (64 - base as usize, 64), "base {base}");
        }
    }

    #[test]
    fn later_bundles_round_further() {
        let code = [HALT_OPCODE; 100];
        let base = MIN_HALT_KEEP as u64 + 32;
        let tail = &code[base as usize..];
        assert_eq!(trim(tail, base, 100), (base as usize, 96));
    }

    #[test]
    fn small_tail_trims_to_one_bundle() {
        let code = [HALT_OPCODE; 40];
        assert_eq!(trim(&code, 0, 40), (32, 32));
    }

    #[test]
    fn rounding_past_the_end_abandons_trim() {
        let code = [HALT_OPCODE; 20];
        assert_eq!(trim(&code, 30, 50), (20, 50));
    }

    #[test]
    fn code_before_halts_is_kept() {
        let mut code = vec![0x90u8; 10];
        code.extend_from_slice(&[HALT_OPCODE; 60]);
        let segment = CodeSegment::new(&code, 0x1000).expect("segment");
        // 10 code bytes + 16 halts = 26, rounded up to 32
        assert_eq!(trim_halts(&segment, ALIGN), 32);
    }

    #[test]
    fn only_trailing_segment_is_trimmed() {
        let code = [HALT_OPCODE; 100];
        assert_eq!(trim(&code, 0, 0x1000), (100, 0x1000));
    }

    #[test]
    fn zero_alignment() {
        let code = [HALT_OPCODE; 64];
        let mut segment = CodeSegment::new(&code, 0).expect("segment");
        assert_eq!(trim_halts(&segment, 0), 64);
        let mut vlimit = 64;
        assert!(matches!(
            trim_segment(&mut segment, &mut vlimit, 0),
            Err(DecoderError::ZeroAlignment)
        ));
        assert_eq!(segment.size(), 64);
    }

    #[test]
    fn empty_and_tiny_segments() {
        assert_eq!(trimmed_size(&[], 0, ALIGN), 0);
        assert_eq!(trimmed_size(&[HALT_OPCODE], 0, ALIGN), 1);
    }
}
