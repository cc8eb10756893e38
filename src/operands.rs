//! Operand expression trees
//!
//! Once a candidate has consumed its ModRM, SIB, displacement and immediate
//! bytes, each [`OperandDesc`] of the descriptor is translated into an
//! [`Operand`]: a register, a memory reference, an immediate, a branch
//! target or a far pointer. The LOCK check and the debug printer both work
//! on these trees.

use crate::instruction::{OpFlags, OperandDesc, OperandKind, RegFile, Width};
use crate::prefix::{PrefixMask, Rex};
use std::fmt;

const GPR64: [&str; 16] = [
    "rax", "rcx", "rdx", "rbx", "rsp", "rbp", "rsi", "rdi", "r8", "r9", "r10", "r11", "r12", "r13",
    "r14", "r15",
];
const GPR32: [&str; 16] = [
    "eax", "ecx", "edx", "ebx", "esp", "ebp", "esi", "edi", "r8d", "r9d", "r10d", "r11d", "r12d",
    "r13d", "r14d", "r15d",
];
const GPR16: [&str; 16] = [
    "ax", "cx", "dx", "bx", "sp", "bp", "si", "di", "r8w", "r9w", "r10w", "r11w", "r12w", "r13w",
    "r14w", "r15w",
];
const GPR8_REX: [&str; 16] = [
    "al", "cl", "dl", "bl", "spl", "bpl", "sil", "dil", "r8b", "r9b", "r10b", "r11b", "r12b",
    "r13b", "r14b", "r15b",
];
const GPR8_LEGACY: [&str; 8] = ["al", "cl", "dl", "bl", "ah", "ch", "dh", "bh"];
const SEGMENTS: [&str; 8] = ["es", "cs", "ss", "ds", "fs", "gs", "seg6", "seg7"];

pub const SEG_ES: u8 = 0;
pub const SEG_CS: u8 = 1;
pub const SEG_SS: u8 = 2;
pub const SEG_DS: u8 = 3;
pub const SEG_FS: u8 = 4;
pub const SEG_GS: u8 = 5;

/// A machine register
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Register {
    /// General purpose register of `width` bytes
    Gpr { index: u8, width: u8 },
    /// AH, CH, DH or BH (index 4..=7 without REX)
    ByteHigh(u8),
    Segment(u8),
    Mmx(u8),
    Xmm(u8),
    St(u8),
    Control(u8),
    Debug(u8),
    /// Instruction pointer, base of RIP-relative addressing
    Rip,
}

impl Register {
    /// General purpose register of the given width in bytes
    pub fn gpr(index: u8, width: u8) -> Self {
        Register::Gpr { index, width }
    }
}

impl fmt::Display for Register {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Register::Gpr { index, width } => {
                let i = (index & 0x0f) as usize;
                let name = match width {
                    1 => GPR8_REX[i],
                    2 => GPR16[i],
                    4 => GPR32[i],
                    _ => GPR64[i],
                };
                f.write_str(name)
            }
            Register::ByteHigh(index) => f.write_str(GPR8_LEGACY[(index & 7) as usize]),
            Register::Segment(index) => f.write_str(SEGMENTS[(index & 7) as usize]),
            Register::Mmx(index) => write!(f, "mm{}", index & 7),
            Register::Xmm(index) => write!(f, "xmm{index}"),
            Register::St(index) => write!(f, "st({})", index & 7),
            Register::Control(index) => write!(f, "cr{index}"),
            Register::Debug(index) => write!(f, "dr{index}"),
            Register::Rip => f.write_str("rip"),
        }
    }
}

/// Effective address of a memory operand
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MemoryRef {
    /// Explicit segment override, or the implied segment of string operands
    pub segment: Option<Register>,
    pub base: Option<Register>,
    pub index: Option<Register>,
    /// 1, 2, 4 or 8
    pub scale: u8,
    pub displacement: i64,
    /// Access width in bytes, if the instruction has one
    pub size: Option<u8>,
    pub rip_relative: bool,
}

/// Expression tree of one decoded operand
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Expr {
    Register(Register),
    Memory(MemoryRef),
    /// Immediate value, already extended to 64 bits
    Immediate { value: u64, size: u8 },
    /// Absolute branch target
    RelativeTarget(u64),
    FarPointer { selector: u16, offset: u32 },
}

/// Decoded operand and its use
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Operand {
    pub expr: Expr,
    pub flags: OpFlags,
}

impl Operand {
    /// True if the operand is written
    #[inline]
    pub fn is_dest(&self) -> bool {
        self.flags.contains(OpFlags::DEST)
    }

    /// True if the operand is a memory reference
    #[inline]
    pub fn is_memory(&self) -> bool {
        matches!(self.expr, Expr::Memory(_))
    }
}

/// Everything operand translation needs from the decode state
#[derive(Debug, Clone, Copy)]
pub struct OperandContext {
    pub long_mode: bool,
    pub operand_size: u8,
    /// In bits
    pub address_size: u8,
    pub rex: Rex,
    pub prefixes: PrefixMask,
    pub modrm: Option<u8>,
    pub sib: Option<u8>,
    pub displacement: i64,
    pub imm: u64,
    pub imm_bytes: u8,
    pub imm2: u64,
    pub imm2_bytes: u8,
    /// Last opcode byte
    pub opcode: u8,
    /// Address of the following instruction
    pub next_address: u64,
}

#[inline]
fn modrm_mod(modrm: u8) -> u8 {
    modrm >> 6
}

#[inline]
fn modrm_reg(modrm: u8) -> u8 {
    (modrm >> 3) & 7
}

#[inline]
fn modrm_rm(modrm: u8) -> u8 {
    modrm & 7
}

fn sign_extend(value: u64, bytes: u8) -> u64 {
    match bytes {
        0 | 8.. => value,
        n => {
            let shift = 64 - u32::from(n) * 8;
            (((value << shift) as i64) >> shift) as u64
        }
    }
}

impl OperandContext {
    /// Translate every operand of a descriptor
    pub fn translate_all(&self, operands: &[OperandDesc]) -> Vec<Operand> {
        operands.iter().map(|desc| self.translate(desc)).collect()
    }

    /// Translate one operand
    pub fn translate(&self, desc: &OperandDesc) -> Operand {
        let modrm = self.modrm.unwrap_or(0);
        let expr = match desc.kind {
            OperandKind::Rm(file) => {
                if modrm_mod(modrm) == 3 {
                    Expr::Register(self.register(file, modrm_rm(modrm), self.rex.b()))
                } else {
                    Expr::Memory(self.effective_address(self.file_width(file)))
                }
            }
            OperandKind::M(width) => Expr::Memory(self.effective_address(self.width_bytes(width))),
            OperandKind::Reg(file) => Expr::Register(self.register(file, modrm_reg(modrm), self.rex.r())),
            OperandKind::OpcodeReg(file) => Expr::Register(self.register(file, self.opcode & 7, self.rex.b())),
            OperandKind::Fixed(file, index) => Expr::Register(self.register(file, index, false)),
            OperandKind::Imm => Expr::Immediate {
                value: self.imm,
                size: self.imm_bytes,
            },
            OperandKind::SImm => Expr::Immediate {
                value: sign_extend(self.imm, self.imm_bytes),
                size: self.operand_size,
            },
            OperandKind::Imm2 => Expr::Immediate {
                value: self.imm2,
                size: self.imm2_bytes,
            },
            OperandKind::Rel => {
                let delta = sign_extend(self.imm, self.imm_bytes);
                let mut target = self.next_address.wrapping_add(delta);
                if !self.long_mode {
                    target &= 0xffff_ffff;
                }
                Expr::RelativeTarget(target)
            }
            OperandKind::MemOffset(file) => Expr::Memory(MemoryRef {
                segment: self.segment_override(),
                displacement: self.imm as i64,
                size: self.file_width(file),
                scale: 1,
                ..MemoryRef::default()
            }),
            OperandKind::StringSrc(file) => Expr::Memory(MemoryRef {
                segment: Some(self.segment_override().unwrap_or(Register::Segment(SEG_DS))),
                base: Some(Register::gpr(6, self.address_size / 8)),
                scale: 1,
                size: self.file_width(file),
                ..MemoryRef::default()
            }),
            OperandKind::StringDst(file) => Expr::Memory(MemoryRef {
                segment: Some(Register::Segment(SEG_ES)),
                base: Some(Register::gpr(7, self.address_size / 8)),
                scale: 1,
                size: self.file_width(file),
                ..MemoryRef::default()
            }),
            OperandKind::One => Expr::Immediate { value: 1, size: 1 },
            OperandKind::FarPtr => Expr::FarPointer {
                selector: self.imm2 as u16,
                offset: self.imm as u32,
            },
        };
        Operand { expr, flags: desc.flags }
    }

    fn gpr_width(&self, file: RegFile) -> u8 {
        match file {
            RegFile::Gpr8 => 1,
            RegFile::Gpr16 => 2,
            RegFile::Gpr32 => 4,
            RegFile::Gpr64 => 8,
            RegFile::GprV => self.operand_size,
            RegFile::GprA => self.address_size / 8,
            RegFile::GprN => {
                if self.long_mode {
                    8
                } else {
                    4
                }
            }
            _ => 0,
        }
    }

    /// Memory access width implied by a register file
    fn file_width(&self, file: RegFile) -> Option<u8> {
        match file {
            RegFile::Segment => Some(2),
            RegFile::Mmx => Some(8),
            RegFile::Xmm => Some(16),
            RegFile::X87 | RegFile::Control | RegFile::Debug => None,
            gpr => Some(self.gpr_width(gpr)),
        }
    }

    fn width_bytes(&self, width: Width) -> Option<u8> {
        match width {
            Width::Byte => Some(1),
            Width::Word => Some(2),
            Width::Dword => Some(4),
            Width::Qword => Some(8),
            Width::Tbyte => Some(10),
            Width::Xmmword => Some(16),
            Width::OperandSize => Some(self.operand_size),
            Width::Unsized => None,
        }
    }

    /// Register `index` of `file`, with `extend` as the REX extension bit
    fn register(&self, file: RegFile, index: u8, extend: bool) -> Register {
        let full = index | if extend { 8 } else { 0 };
        match file {
            RegFile::Segment => Register::Segment(index),
            RegFile::Mmx => Register::Mmx(index),
            RegFile::Xmm => Register::Xmm(full),
            RegFile::X87 => Register::St(index),
            RegFile::Control => Register::Control(full),
            RegFile::Debug => Register::Debug(full),
            gpr => {
                let width = self.gpr_width(gpr);
                if width == 1 && !self.rex.present() && (4..8).contains(&index) {
                    Register::ByteHigh(index)
                } else {
                    Register::gpr(full, width)
                }
            }
        }
    }

    fn segment_override(&self) -> Option<Register> {
        let segments = [
            (PrefixMask::SEG_ES, SEG_ES),
            (PrefixMask::SEG_CS, SEG_CS),
            (PrefixMask::SEG_SS, SEG_SS),
            (PrefixMask::SEG_DS, SEG_DS),
            (PrefixMask::SEG_FS, SEG_FS),
            (PrefixMask::SEG_GS, SEG_GS),
        ];
        segments
            .iter()
            .find(|(mask, _)| self.prefixes.contains(*mask))
            .map(|&(_, index)| Register::Segment(index))
    }

    /// Memory reference selected by ModRM/SIB and the displacement
    fn effective_address(&self, size: Option<u8>) -> MemoryRef {
        let modrm = self.modrm.unwrap_or(0);
        let mut mem = MemoryRef {
            segment: self.segment_override(),
            displacement: self.displacement,
            scale: 1,
            size,
            ..MemoryRef::default()
        };
        if self.address_size == 16 {
            const BASES: [(Option<u8>, Option<u8>); 8] = [
                (Some(3), Some(6)),
                (Some(3), Some(7)),
                (Some(5), Some(6)),
                (Some(5), Some(7)),
                (Some(6), None),
                (Some(7), None),
                (Some(5), None),
                (Some(3), None),
            ];
            let rm = modrm_rm(modrm);
            if !(modrm_mod(modrm) == 0 && rm == 6) {
                let (base, index) = BASES[rm as usize];
                mem.base = base.map(|r| Register::gpr(r, 2));
                mem.index = index.map(|r| Register::gpr(r, 2));
            }
            return mem;
        }

        let width = self.address_size / 8;
        let rm = modrm_rm(modrm);
        match (rm, self.sib) {
            (4, Some(sib)) => {
                let base = sib & 7;
                let index = ((sib >> 3) & 7) | if self.rex.x() { 8 } else { 0 };
                if !(base == 5 && modrm_mod(modrm) == 0) {
                    mem.base = Some(Register::gpr(base | if self.rex.b() { 8 } else { 0 }, width));
                }
                if index != 4 {
                    mem.index = Some(Register::gpr(index, width));
                    mem.scale = 1 << (sib >> 6);
                }
            }
            (5, _) if modrm_mod(modrm) == 0 => {
                if self.long_mode {
                    mem.base = Some(Register::Rip);
                    mem.rip_relative = true;
                }
            }
            _ => {
                mem.base = Some(Register::gpr(rm | if self.rex.b() { 8 } else { 0 }, width));
            }
        }
        mem
    }
}

fn ptr_name(size: u8) -> Option<&'static str> {
    match size {
        1 => Some("byte"),
        2 => Some("word"),
        4 => Some("dword"),
        8 => Some("qword"),
        10 => Some("tbyte"),
        16 => Some("xmmword"),
        _ => None,
    }
}

impl fmt::Display for MemoryRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(name) = self.size.and_then(ptr_name) {
            write!(f, "{name} ptr ")?;
        }
        if let Some(segment) = self.segment {
            write!(f, "{segment}:")?;
        }
        f.write_str("[")?;
        let mut wrote = false;
        if let Some(base) = self.base {
            write!(f, "{base}")?;
            wrote = true;
        }
        if let Some(index) = self.index {
            if wrote {
                f.write_str("+")?;
            }
            if self.scale == 1 {
                write!(f, "{index}")?;
            } else {
                write!(f, "{index}*{}", self.scale)?;
            }
            wrote = true;
        }
        if !wrote {
            write!(f, "{:#x}", self.displacement as u64)?;
        } else if self.displacement < 0 {
            write!(f, "-{:#x}", self.displacement.unsigned_abs())?;
        } else if self.displacement > 0 {
            write!(f, "+{:#x}", self.displacement)?;
        }
        f.write_str("]")
    }
}

impl fmt::Display for Operand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.expr {
            Expr::Register(reg) => write!(f, "{reg}"),
            Expr::Memory(mem) => write!(f, "{mem}"),
            Expr::Immediate { value, size } => {
                let masked = match size {
                    1 => value & 0xff,
                    2 => value & 0xffff,
                    4 => value & 0xffff_ffff,
                    _ => value,
                };
                write!(f, "{masked:#x}")
            }
            Expr::RelativeTarget(target) => write!(f, "{target:#x}"),
            Expr::FarPointer { selector, offset } => write!(f, "{selector:#x}:{offset:#x}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn context() -> OperandContext {
        OperandContext {
            long_mode: true,
            operand_size: 4,
            address_size: 64,
            rex: Rex::default(),
            prefixes: PrefixMask::empty(),
            modrm: None,
            sib: None,
            displacement: 0,
            imm: 0,
            imm_bytes: 0,
            imm2: 0,
            imm2_bytes: 0,
            opcode: 0,
            next_address: 0x1000,
        }
    }

    #[test]
    fn byte_registers_depend_on_rex() {
        let mut ctx = context();
        ctx.modrm = Some(0xe0); // mod 3, reg 4, rm 0
        let reg = OperandDesc::src(OperandKind::Reg(RegFile::Gpr8));
        assert_eq!(ctx.translate(&reg).expr, Expr::Register(Register::ByteHigh(4)));
        ctx.rex = Rex(0x40);
        assert_eq!(ctx.translate(&reg).to_string(), "spl");
        ctx.rex = Rex(0x44);
        assert_eq!(ctx.translate(&reg).to_string(), "r12b");
    }

    #[test]
    fn sib_with_rex_extensions() {
        let mut ctx = context();
        ctx.modrm = Some(0x44); // mod 1, rm 4
        ctx.sib = Some(0x88); // scale 4, index 1, base 0
        ctx.displacement = -8;
        ctx.rex = Rex(0x43);
        let op = ctx.translate(&OperandDesc::dst(OperandKind::Rm(RegFile::GprV)));
        assert!(op.is_memory());
        assert!(op.is_dest());
        assert_eq!(op.to_string(), "dword ptr [r8+r9*4-0x8]");
    }

    #[test]
    fn rip_relative_only_in_long_mode() {
        let mut ctx = context();
        ctx.modrm = Some(0x05);
        ctx.displacement = 0x10;
        let desc = OperandDesc::src(OperandKind::M(Width::Unsized));
        assert_eq!(ctx.translate(&desc).to_string(), "[rip+0x10]");
        ctx.long_mode = false;
        ctx.address_size = 32;
        assert_eq!(ctx.translate(&desc).to_string(), "[0x10]");
    }

    #[test]
    fn sixteen_bit_addressing() {
        let mut ctx = context();
        ctx.long_mode = false;
        ctx.address_size = 16;
        ctx.modrm = Some(0x42); // mod 1, rm 2
        ctx.displacement = 4;
        let op = ctx.translate(&OperandDesc::src(OperandKind::M(Width::Word)));
        assert_eq!(op.to_string(), "word ptr [bp+si+0x4]");
    }

    #[test]
    fn relative_target_sign_extends() {
        let mut ctx = context();
        ctx.imm = 0xfe;
        ctx.imm_bytes = 1;
        ctx.next_address = 0x2002;
        let op = ctx.translate(&OperandDesc::src(OperandKind::Rel));
        assert_eq!(op.expr, Expr::RelativeTarget(0x2000));
    }

    #[test]
    fn string_operands_use_segment_defaults() {
        let mut ctx = context();
        ctx.prefixes = PrefixMask::SEG_FS;
        let src = ctx.translate(&OperandDesc::src(OperandKind::StringSrc(RegFile::Gpr8)));
        let dst = ctx.translate(&OperandDesc::dst(OperandKind::StringDst(RegFile::Gpr8)));
        assert_eq!(src.to_string(), "byte ptr fs:[rsi]");
        assert_eq!(dst.to_string(), "byte ptr es:[rdi]");
    }
}
