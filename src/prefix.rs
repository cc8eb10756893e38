//! Legacy and REX prefix recognition
//!
//! The prefix-mask table maps every byte value to the prefix class it
//! selects, or to the empty mask if the byte is not a prefix in the given
//! execution mode.

use crate::config::ExecutionMode;
use bitflags::bitflags;

bitflags! {
    /// Prefix classes seen on an instruction
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct PrefixMask: u32 {
        const SEG_CS = 1 << 0;
        const SEG_SS = 1 << 1;
        const SEG_FS = 1 << 2;
        const SEG_GS = 1 << 3;
        const SEG_ES = 1 << 4;
        const SEG_DS = 1 << 5;
        /// 0x66 operand-size override
        const DATA16 = 1 << 6;
        /// 0x67 address-size override
        const ADDR16 = 1 << 7;
        const REPNE = 1 << 8;
        const REP = 1 << 9;
        const LOCK = 1 << 10;
        /// 0x40..0x4F, long mode only
        const REX = 1 << 11;
    }
}

impl PrefixMask {
    /// All segment override classes
    pub const SEGMENTS: PrefixMask = PrefixMask::SEG_CS
        .union(PrefixMask::SEG_SS)
        .union(PrefixMask::SEG_FS)
        .union(PrefixMask::SEG_GS)
        .union(PrefixMask::SEG_ES)
        .union(PrefixMask::SEG_DS);
}

pub const VALUE_SEG_CS: u8 = 0x2e;
pub const VALUE_SEG_SS: u8 = 0x36;
pub const VALUE_SEG_DS: u8 = 0x3e;
pub const VALUE_SEG_ES: u8 = 0x26;
pub const VALUE_SEG_FS: u8 = 0x64;
pub const VALUE_SEG_GS: u8 = 0x65;
pub const VALUE_DATA16: u8 = 0x66;
pub const VALUE_ADDR16: u8 = 0x67;
pub const VALUE_REPNE: u8 = 0xf2;
pub const VALUE_REP: u8 = 0xf3;
pub const VALUE_LOCK: u8 = 0xf0;

/// Byte-indexed prefix class lookup for one execution mode
#[derive(Debug, Clone)]
pub struct PrefixTable {
    masks: [PrefixMask; 256],
}

impl PrefixTable {
    /// Build the table for `mode`
    pub fn new(mode: ExecutionMode) -> Self {
        let mut masks = [PrefixMask::empty(); 256];
        masks[VALUE_SEG_CS as usize] = PrefixMask::SEG_CS;
        masks[VALUE_SEG_SS as usize] = PrefixMask::SEG_SS;
        masks[VALUE_SEG_DS as usize] = PrefixMask::SEG_DS;
        masks[VALUE_SEG_ES as usize] = PrefixMask::SEG_ES;
        masks[VALUE_SEG_FS as usize] = PrefixMask::SEG_FS;
        masks[VALUE_SEG_GS as usize] = PrefixMask::SEG_GS;
        masks[VALUE_DATA16 as usize] = PrefixMask::DATA16;
        masks[VALUE_ADDR16 as usize] = PrefixMask::ADDR16;
        masks[VALUE_REPNE as usize] = PrefixMask::REPNE;
        masks[VALUE_REP as usize] = PrefixMask::REP;
        masks[VALUE_LOCK as usize] = PrefixMask::LOCK;
        if mode.is_64() {
            for rex in 0x40..=0x4f {
                masks[rex] = PrefixMask::REX;
            }
        }
        Self { masks }
    }

    /// Prefix class of `byte`, empty if it is not a prefix
    #[inline]
    pub fn lookup(&self, byte: u8) -> PrefixMask {
        self.masks[byte as usize]
    }
}

/// Decoded bits of a REX prefix byte
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Rex(pub u8);

impl Rex {
    #[inline]
    pub fn present(self) -> bool {
        self.0 & 0xf0 == 0x40
    }

    #[inline]
    pub fn w(self) -> bool {
        self.present() && self.0 & 0x08 != 0
    }

    #[inline]
    pub fn r(self) -> bool {
        self.present() && self.0 & 0x04 != 0
    }

    #[inline]
    pub fn x(self) -> bool {
        self.present() && self.0 & 0x02 != 0
    }

    #[inline]
    pub fn b(self) -> bool {
        self.present() && self.0 & 0x01 != 0
    }
}

/// Prefix state accumulated for the instruction being matched
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PrefixDescriptor {
    /// Union of all prefix classes seen
    pub mask: PrefixMask,
    /// Number of prefix bytes consumed
    pub count: u8,
    /// Last REX byte, or 0 if none
    pub rex: Rex,
    /// Number of REX bytes seen
    pub rex_count: u8,
    /// A prefix class appeared more than once
    pub has_duplicates: bool,
    /// Two distinct segment overrides appeared
    pub has_ambiguous_segment: bool,
    /// A legacy prefix followed a REX byte
    pub rex_not_last: bool,
}

impl PrefixDescriptor {
    /// Record one prefix byte of class `form`
    pub fn record(&mut self, byte: u8, form: PrefixMask) {
        if self.mask.intersects(form) {
            self.has_duplicates = true;
        } else if form.intersects(PrefixMask::SEGMENTS) && self.mask.intersects(PrefixMask::SEGMENTS) {
            self.has_ambiguous_segment = true;
        }
        if form == PrefixMask::REX {
            self.rex = Rex(byte);
            self.rex_count += 1;
        } else if self.rex_count > 0 {
            self.rex_not_last = true;
        }
        self.mask |= form;
        self.count += 1;
    }

    /// True if the prefix class was seen
    #[inline]
    pub fn has(&self, form: PrefixMask) -> bool {
        self.mask.contains(form)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rex_is_prefix_only_in_long_mode() {
        let t64 = PrefixTable::new(ExecutionMode::Bits64);
        let t32 = PrefixTable::new(ExecutionMode::Bits32);
        assert_eq!(t64.lookup(0x48), PrefixMask::REX);
        assert!(t32.lookup(0x48).is_empty());
        assert_eq!(t32.lookup(0x66), PrefixMask::DATA16);
        assert!(t64.lookup(0x90).is_empty());
        assert!(t64.lookup(0x0f).is_empty());
    }

    #[test]
    fn every_legacy_prefix_maps_to_one_class() {
        let table = PrefixTable::new(ExecutionMode::Bits64);
        let count = (0..=255u8)
            .filter(|&b| !table.lookup(b).is_empty())
            .inspect(|&b| assert_eq!(table.lookup(b).bits().count_ones(), 1))
            .count();
        assert_eq!(count, 11 + 16);
    }

    #[test]
    fn records_duplicates_and_ambiguous_segments() {
        let mut desc = PrefixDescriptor::default();
        desc.record(0x66, PrefixMask::DATA16);
        desc.record(0x2e, PrefixMask::SEG_CS);
        assert!(!desc.has_duplicates);
        desc.record(0x64, PrefixMask::SEG_FS);
        assert!(desc.has_ambiguous_segment);
        assert!(!desc.has_duplicates);
        desc.record(0x66, PrefixMask::DATA16);
        assert!(desc.has_duplicates);
        assert_eq!(desc.count, 4);
    }

    #[test]
    fn tracks_rex_position() {
        let mut desc = PrefixDescriptor::default();
        desc.record(0x48, PrefixMask::REX);
        assert!(desc.rex.w());
        assert!(!desc.rex.b());
        assert!(!desc.rex_not_last);
        desc.record(0x66, PrefixMask::DATA16);
        assert!(desc.rex_not_last);
        desc.record(0x41, PrefixMask::REX);
        assert_eq!(desc.rex_count, 2);
        assert!(desc.has_duplicates);
        assert!(desc.rex.b());
    }
}
