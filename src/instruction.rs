//! Instruction descriptors for sfi_decoder_rs
//!
//! An [`InstructionDescriptor`] is one recognized opcode form: which opcode
//! map and byte select it, which operand and address sizes it accepts, how
//! it uses the ModRM byte, how many immediate bytes follow, and the operand
//! list used to build expression trees.

use crate::config::CpuFeatures;
use bitflags::bitflags;
use std::fmt;

/// Opcode map an instruction lives in, keyed by escape bytes and mandatory prefix
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum OpcodeMap {
    /// One-byte opcodes
    NoPrefix,
    /// 0F xx
    Prefix0F,
    /// 66 0F xx
    Prefix660F,
    /// F2 0F xx
    PrefixF20F,
    /// F3 0F xx
    PrefixF30F,
    /// 0F 38 xx
    Prefix0F38,
    /// 66 0F 38 xx
    Prefix660F38,
    /// F2 0F 38 xx
    PrefixF20F38,
    /// 0F 3A xx
    Prefix0F3A,
    /// 66 0F 3A xx
    Prefix660F3A,
    /// x87 escape D8..DF, keyed on the second byte
    PrefixD8,
    PrefixD9,
    PrefixDA,
    PrefixDB,
    PrefixDC,
    PrefixDD,
    PrefixDE,
    PrefixDF,
}

/// Step down the fallback chain: the less specific map to try, and how many
/// opcode bytes to give back before looking it up
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Fallback {
    pub map: OpcodeMap,
    pub rewind: usize,
}

impl OpcodeMap {
    /// Every map, in table order
    pub const ALL: [OpcodeMap; 18] = [
        OpcodeMap::NoPrefix,
        OpcodeMap::Prefix0F,
        OpcodeMap::Prefix660F,
        OpcodeMap::PrefixF20F,
        OpcodeMap::PrefixF30F,
        OpcodeMap::Prefix0F38,
        OpcodeMap::Prefix660F38,
        OpcodeMap::PrefixF20F38,
        OpcodeMap::Prefix0F3A,
        OpcodeMap::Prefix660F3A,
        OpcodeMap::PrefixD8,
        OpcodeMap::PrefixD9,
        OpcodeMap::PrefixDA,
        OpcodeMap::PrefixDB,
        OpcodeMap::PrefixDC,
        OpcodeMap::PrefixDD,
        OpcodeMap::PrefixDE,
        OpcodeMap::PrefixDF,
    ];

    /// Number of maps
    pub const COUNT: usize = Self::ALL.len();

    /// Position in [`OpcodeMap::ALL`]
    #[inline]
    pub fn index(self) -> usize {
        self as usize
    }

    /// x87 escape map for opcode byte `D8 + n`
    pub fn x87(opcode: u8) -> Option<OpcodeMap> {
        match opcode {
            0xd8 => Some(OpcodeMap::PrefixD8),
            0xd9 => Some(OpcodeMap::PrefixD9),
            0xda => Some(OpcodeMap::PrefixDA),
            0xdb => Some(OpcodeMap::PrefixDB),
            0xdc => Some(OpcodeMap::PrefixDC),
            0xdd => Some(OpcodeMap::PrefixDD),
            0xde => Some(OpcodeMap::PrefixDE),
            0xdf => Some(OpcodeMap::PrefixDF),
            _ => None,
        }
    }

    /// Next map in the fallback chain, or `None` if this map is terminal.
    ///
    /// A mandatory 66 prefix degrades to the plain escape map, where the 66
    /// acts as an operand-size override. An x87 register-form map degrades to
    /// the one-byte map and gives back the second opcode byte, which is then
    /// reinterpreted as a ModRM byte.
    pub fn fallback(self) -> Option<Fallback> {
        let (map, rewind) = match self {
            OpcodeMap::Prefix660F => (OpcodeMap::Prefix0F, 0),
            OpcodeMap::Prefix660F38 => (OpcodeMap::Prefix0F38, 0),
            OpcodeMap::Prefix660F3A => (OpcodeMap::Prefix0F3A, 0),
            OpcodeMap::PrefixD8
            | OpcodeMap::PrefixD9
            | OpcodeMap::PrefixDA
            | OpcodeMap::PrefixDB
            | OpcodeMap::PrefixDC
            | OpcodeMap::PrefixDD
            | OpcodeMap::PrefixDE
            | OpcodeMap::PrefixDF => (OpcodeMap::NoPrefix, 1),
            _ => return None,
        };
        Some(Fallback { map, rewind })
    }

    /// Number of fallback steps before the chain ends
    pub fn fallback_depth(self) -> usize {
        let mut depth = 0;
        let mut map = self;
        while let Some(next) = map.fallback() {
            depth += 1;
            map = next.map;
        }
        depth
    }
}

impl fmt::Display for OpcodeMap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            OpcodeMap::NoPrefix => "",
            OpcodeMap::Prefix0F => "0F",
            OpcodeMap::Prefix660F => "660F",
            OpcodeMap::PrefixF20F => "F20F",
            OpcodeMap::PrefixF30F => "F30F",
            OpcodeMap::Prefix0F38 => "0F38",
            OpcodeMap::Prefix660F38 => "660F38",
            OpcodeMap::PrefixF20F38 => "F20F38",
            OpcodeMap::Prefix0F3A => "0F3A",
            OpcodeMap::Prefix660F3A => "660F3A",
            OpcodeMap::PrefixD8 => "D8",
            OpcodeMap::PrefixD9 => "D9",
            OpcodeMap::PrefixDA => "DA",
            OpcodeMap::PrefixDB => "DB",
            OpcodeMap::PrefixDC => "DC",
            OpcodeMap::PrefixDD => "DD",
            OpcodeMap::PrefixDE => "DE",
            OpcodeMap::PrefixDF => "DF",
        };
        f.write_str(name)
    }
}

bitflags! {
    /// Matching constraints of an instruction descriptor
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct InstFlags: u32 {
        /// A ModRM byte follows the opcode
        const MODRM = 1 << 0;
        /// Byte operands; operand size is always 1
        const OPERAND_SIZE_B = 1 << 1;
        /// Accepts 16-bit operand size
        const OPERAND_SIZE_W = 1 << 2;
        /// Accepts 32-bit operand size
        const OPERAND_SIZE_V = 1 << 3;
        /// Accepts 64-bit operand size
        const OPERAND_SIZE_O = 1 << 4;
        /// Accepts 16-bit addressing
        const ADDRESS_SIZE_W = 1 << 5;
        /// Accepts 32-bit addressing
        const ADDRESS_SIZE_V = 1 << 6;
        /// Accepts 64-bit addressing
        const ADDRESS_SIZE_O = 1 << 7;
        /// Long mode operand size defaults to 64 bits
        const DEFAULT_IS_64 = 1 << 8;
        /// Long mode operand size is always 64 bits
        const FORCE_64 = 1 << 9;
        /// A 66 prefix does not change the operand size
        const SIZE_IGNORES_DATA16 = 1 << 10;
        /// ModRM must select a register
        const MODRM_MOD_IS_0X3 = 1 << 11;
        /// ModRM must select memory
        const MODRM_MOD_ISNT_0X3 = 1 << 12;
        /// ModRM reg names a segment register (0..=5)
        const MODRM_REG_S_OPERAND = 1 << 13;
        /// LOCK is allowed with a memory destination
        const LOCKABLE = 1 << 14;
        /// A REX prefix must have W set
        const USES_REX_W = 1 << 15;
        /// A REX prefix must have R set
        const HAS_REX_R = 1 << 16;
        /// Not encodable in long mode
        const ONLY_32 = 1 << 17;
        /// Only encodable in long mode
        const ONLY_64 = 1 << 18;
        /// REX.W does not change the operand size
        const SIZE_IGNORES_REX_W = 1 << 19;
    }
}

impl InstFlags {
    pub const OPERAND_SIZE_WV: InstFlags = InstFlags::OPERAND_SIZE_W.union(InstFlags::OPERAND_SIZE_V);
    pub const OPERAND_SIZE_WVO: InstFlags = InstFlags::OPERAND_SIZE_WV.union(InstFlags::OPERAND_SIZE_O);
    pub const OPERAND_SIZES: InstFlags = InstFlags::OPERAND_SIZE_WVO;
    pub const ADDRESS_SIZES: InstFlags = InstFlags::ADDRESS_SIZE_W
        .union(InstFlags::ADDRESS_SIZE_V)
        .union(InstFlags::ADDRESS_SIZE_O);
}

/// Part of the opcode held in the ModRM byte
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OpcodeExt {
    #[default]
    None,
    /// ModRM.reg must equal the value (`/n` notation)
    Reg(u8),
    /// ModRM.reg and ModRM.rm must equal the values
    RegRm(u8, u8),
}

/// Size of an immediate field
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Immediate {
    #[default]
    None,
    /// 1 byte
    B,
    /// 2 bytes
    W,
    /// 4 bytes
    V,
    /// 8 bytes
    O,
    /// 2 bytes with 16-bit operands, otherwise 4
    Z,
    /// Same as the operand size
    OperandSize,
    /// Same as the address size
    AddressSize,
}

impl Immediate {
    /// Byte count for the resolved operand and address sizes
    pub fn bytes(self, operand_size: u8, address_size: u8) -> usize {
        match self {
            Immediate::None => 0,
            Immediate::B => 1,
            Immediate::W => 2,
            Immediate::V => 4,
            Immediate::O => 8,
            Immediate::Z => {
                if operand_size == 2 {
                    2
                } else {
                    4
                }
            }
            Immediate::OperandSize => operand_size as usize,
            Immediate::AddressSize => address_size as usize / 8,
        }
    }
}

/// Register file an operand selects from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegFile {
    /// 8-bit general purpose
    Gpr8,
    Gpr16,
    Gpr32,
    Gpr64,
    /// General purpose, width follows the operand size
    GprV,
    /// General purpose, width follows the address size
    GprA,
    /// General purpose, width of the execution mode
    GprN,
    Segment,
    Mmx,
    Xmm,
    X87,
    Control,
    Debug,
}

/// Width of a memory-only operand
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Width {
    Byte,
    Word,
    Dword,
    Qword,
    Tbyte,
    Xmmword,
    /// Follows the operand size
    OperandSize,
    /// No natural width (lea, fxsave, descriptor tables)
    Unsized,
}

/// Where an operand comes from in the encoding
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperandKind {
    /// ModRM.rm: register if mod is 3, else memory
    Rm(RegFile),
    /// ModRM.rm, memory only
    M(Width),
    /// ModRM.reg
    Reg(RegFile),
    /// Low three bits of the last opcode byte
    OpcodeReg(RegFile),
    /// Implicit register
    Fixed(RegFile, u8),
    /// First immediate
    Imm,
    /// First immediate, sign-extended to the operand size
    SImm,
    /// Second immediate
    Imm2,
    /// Branch target relative to the next instruction
    Rel,
    /// Absolute memory offset held in the immediate
    MemOffset(RegFile),
    /// ds:[rsi] string source
    StringSrc(RegFile),
    /// es:[rdi] string destination
    StringDst(RegFile),
    /// Constant 1 of shift-by-one forms
    One,
    /// Immediate far pointer selector:offset
    FarPtr,
}

bitflags! {
    /// How an instruction uses an operand
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct OpFlags: u8 {
        const DEST = 1 << 0;
        const SRC = 1 << 1;
        const IMPLICIT = 1 << 2;
    }
}

/// One operand of a descriptor
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OperandDesc {
    pub kind: OperandKind,
    pub flags: OpFlags,
}

impl OperandDesc {
    /// Written operand
    pub const fn dst(kind: OperandKind) -> Self {
        Self { kind, flags: OpFlags::DEST }
    }

    /// Read operand
    pub const fn src(kind: OperandKind) -> Self {
        Self { kind, flags: OpFlags::SRC }
    }

    /// Read and written operand
    pub const fn rw(kind: OperandKind) -> Self {
        Self {
            kind,
            flags: OpFlags::DEST.union(OpFlags::SRC),
        }
    }

    /// Mark the operand as not shown in the encoding
    pub const fn implicit(mut self) -> Self {
        self.flags = self.flags.union(OpFlags::IMPLICIT);
        self
    }
}

/// One recognized opcode form
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstructionDescriptor {
    /// Mnemonic
    pub name: &'static str,
    /// Map holding the final opcode byte
    pub map: OpcodeMap,
    /// Final opcode byte
    pub opcode: u8,
    pub flags: InstFlags,
    pub ext: OpcodeExt,
    /// First immediate
    pub imm: Immediate,
    /// Second immediate (enter, far pointers)
    pub imm2: Immediate,
    /// Extensions the host must support, empty for the base set
    pub feature: CpuFeatures,
    pub operands: Vec<OperandDesc>,
}

impl InstructionDescriptor {
    /// Descriptor with no constraints in the one-byte map
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            map: OpcodeMap::NoPrefix,
            opcode: 0,
            flags: InstFlags::empty(),
            ext: OpcodeExt::None,
            imm: Immediate::None,
            imm2: Immediate::None,
            feature: CpuFeatures::empty(),
            operands: Vec::new(),
        }
    }

    /// True if a ModRM byte follows the opcode
    #[inline]
    pub fn uses_modrm(&self) -> bool {
        self.flags.contains(InstFlags::MODRM)
    }

    /// True if the host feature set enables this descriptor
    #[inline]
    pub fn is_supported(&self, features: CpuFeatures) -> bool {
        features.contains(self.feature)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fallback_chain_matches_escape_rules() {
        let step = |map: OpcodeMap| map.fallback().map(|f| (f.map, f.rewind));
        assert_eq!(step(OpcodeMap::Prefix660F), Some((OpcodeMap::Prefix0F, 0)));
        assert_eq!(step(OpcodeMap::Prefix660F38), Some((OpcodeMap::Prefix0F38, 0)));
        assert_eq!(step(OpcodeMap::Prefix660F3A), Some((OpcodeMap::Prefix0F3A, 0)));
        assert_eq!(step(OpcodeMap::PrefixDB), Some((OpcodeMap::NoPrefix, 1)));
        for terminal in [
            OpcodeMap::NoPrefix,
            OpcodeMap::Prefix0F,
            OpcodeMap::PrefixF20F,
            OpcodeMap::PrefixF30F,
            OpcodeMap::Prefix0F38,
            OpcodeMap::PrefixF20F38,
            OpcodeMap::Prefix0F3A,
        ] {
            assert_eq!(step(terminal), None, "{terminal:?}");
        }
    }

    #[test]
    fn fallback_depth_is_bounded() {
        for map in OpcodeMap::ALL {
            assert!(map.fallback_depth() <= 1);
            assert_eq!(OpcodeMap::ALL[map.index()], map);
        }
    }

    #[test]
    fn x87_maps() {
        assert_eq!(OpcodeMap::x87(0xd8), Some(OpcodeMap::PrefixD8));
        assert_eq!(OpcodeMap::x87(0xdf), Some(OpcodeMap::PrefixDF));
        assert_eq!(OpcodeMap::x87(0xd7), None);
        assert_eq!(OpcodeMap::x87(0xe0), None);
    }

    #[test]
    fn immediate_sizes() {
        assert_eq!(Immediate::Z.bytes(2, 64), 2);
        assert_eq!(Immediate::Z.bytes(8, 64), 4);
        assert_eq!(Immediate::OperandSize.bytes(8, 64), 8);
        assert_eq!(Immediate::AddressSize.bytes(4, 32), 4);
        assert_eq!(Immediate::AddressSize.bytes(4, 64), 8);
        assert_eq!(Immediate::None.bytes(4, 32), 0);
    }
}
