//! Static decode tables
//!
//! One [`DecodeTables`] exists per execution mode. It is built on first use
//! and never mutated afterwards, so every decoder of that mode shares it by
//! reference. Each `(map, opcode)` slot holds the candidate descriptors for
//! that byte, tried in order by the pipeline.

use crate::config::{CpuFeatures, ExecutionMode};
use crate::hardcoded::HardcodedTrie;
use crate::instruction::OpcodeMap::*;
use crate::instruction::OperandKind::*;
use crate::instruction::RegFile::*;
use crate::instruction::{
    Immediate, InstFlags, InstructionDescriptor, OpcodeExt, OpcodeMap, OperandDesc, OperandKind, Width,
};
use crate::prefix::{PrefixMask, PrefixTable};
use log::{debug, trace};
use std::sync::LazyLock;

static TABLES_32: LazyLock<DecodeTables> = LazyLock::new(|| DecodeTables::build(ExecutionMode::Bits32));
static TABLES_64: LazyLock<DecodeTables> = LazyLock::new(|| DecodeTables::build(ExecutionMode::Bits64));

/// Prefix, opcode and hardcoded-sequence tables for one execution mode
#[derive(Debug)]
pub struct DecodeTables {
    mode: ExecutionMode,
    prefixes: PrefixTable,
    slots: Vec<Vec<InstructionDescriptor>>,
    hardcoded: HardcodedTrie,
}

/// Outcome of walking the fallback chain for one opcode
#[derive(Debug, Clone, Copy)]
pub struct Selection<'t> {
    /// Map the candidates were found in
    pub map: OpcodeMap,
    /// Instruction bytes up to and including the matched opcode byte
    pub length: usize,
    /// Fallback steps taken
    pub steps: usize,
    pub candidates: &'t [InstructionDescriptor],
}

impl DecodeTables {
    /// Shared tables for `mode`
    pub fn for_mode(mode: ExecutionMode) -> &'static DecodeTables {
        match mode {
            ExecutionMode::Bits32 => LazyLock::force(&TABLES_32),
            ExecutionMode::Bits64 => LazyLock::force(&TABLES_64),
        }
    }

    /// Build fresh tables for `mode`
    pub fn build(mode: ExecutionMode) -> Self {
        let mut builder = TableBuilder::new(mode);
        one_byte(&mut builder);
        x87(&mut builder);
        two_byte(&mut builder);
        sse(&mut builder);
        mmx_sse2_integer(&mut builder);
        three_byte(&mut builder);
        let tables = Self {
            mode,
            prefixes: PrefixTable::new(mode),
            slots: builder.slots,
            hardcoded: HardcodedTrie::for_mode(mode),
        };
        debug!(
            "built {:?} decode tables: {} descriptors, {} hardcoded sequences",
            mode,
            tables.descriptor_count(),
            tables.hardcoded.len()
        );
        tables
    }

    #[inline]
    pub fn mode(&self) -> ExecutionMode {
        self.mode
    }

    /// Prefix class of `byte`, empty if it is not a prefix in this mode
    #[inline]
    pub fn prefix_mask(&self, byte: u8) -> PrefixMask {
        self.prefixes.lookup(byte)
    }

    /// Candidates registered for exactly `(map, opcode)`
    #[inline]
    pub fn candidates(&self, map: OpcodeMap, opcode: u8) -> &[InstructionDescriptor] {
        &self.slots[map.index() * 256 + opcode as usize]
    }

    /// Fixed-sequence trie
    #[inline]
    pub fn hardcoded(&self) -> &HardcodedTrie {
        &self.hardcoded
    }

    /// Total number of table entries
    pub fn descriptor_count(&self) -> usize {
        self.slots.iter().map(Vec::len).sum()
    }

    /// Find the most specific non-empty slot for the opcode ending `bytes`.
    ///
    /// Starting at `map`, each empty slot steps to the map's fallback,
    /// giving back opcode bytes where the fallback asks for it. Returns
    /// `None` once a terminal map is also empty.
    pub fn select(&self, map: OpcodeMap, bytes: &[u8]) -> Option<Selection<'_>> {
        let mut map = map;
        let mut length = bytes.len();
        let mut steps = 0;
        loop {
            let opcode = *bytes.get(length.checked_sub(1)?)?;
            let candidates = self.candidates(map, opcode);
            if !candidates.is_empty() {
                return Some(Selection {
                    map,
                    length,
                    steps,
                    candidates,
                });
            }
            let next = map.fallback()?;
            trace!("no entry for {map} {opcode:02x}, falling back to {:?}", next.map);
            length = length.checked_sub(next.rewind)?;
            map = next.map;
            steps += 1;
        }
    }
}

/// Descriptor under construction
#[derive(Clone)]
struct Op(InstructionDescriptor);

fn op(name: &'static str) -> Op {
    Op(InstructionDescriptor::new(name))
}

impl Op {
    fn flag(mut self, flags: InstFlags) -> Self {
        self.0.flags |= flags;
        self
    }

    fn modrm(self) -> Self {
        self.flag(InstFlags::MODRM)
    }

    /// `/n`: ModRM.reg holds part of the opcode
    fn ext(mut self, reg: u8) -> Self {
        self.0.ext = OpcodeExt::Reg(reg);
        self.modrm()
    }

    /// Register form selected by both ModRM.reg and ModRM.rm
    fn ext_rm(mut self, reg: u8, rm: u8) -> Self {
        self.0.ext = OpcodeExt::RegRm(reg, rm);
        self.mod3()
    }

    fn mem(self) -> Self {
        self.flag(InstFlags::MODRM | InstFlags::MODRM_MOD_ISNT_0X3)
    }

    fn mod3(self) -> Self {
        self.flag(InstFlags::MODRM | InstFlags::MODRM_MOD_IS_0X3)
    }

    fn b(self) -> Self {
        self.flag(InstFlags::OPERAND_SIZE_B)
    }

    fn w(self) -> Self {
        self.flag(InstFlags::OPERAND_SIZE_W)
    }

    fn v(self) -> Self {
        self.flag(InstFlags::OPERAND_SIZE_V)
    }

    fn o(self) -> Self {
        self.flag(InstFlags::OPERAND_SIZE_O)
    }

    fn wv(self) -> Self {
        self.flag(InstFlags::OPERAND_SIZE_WV)
    }

    fn vo(self) -> Self {
        self.flag(InstFlags::OPERAND_SIZE_V | InstFlags::OPERAND_SIZE_O)
    }

    fn wvo(self) -> Self {
        self.flag(InstFlags::OPERAND_SIZE_WVO)
    }

    fn d64(self) -> Self {
        self.flag(InstFlags::DEFAULT_IS_64)
    }

    fn f64(self) -> Self {
        self.flag(InstFlags::FORCE_64)
    }

    fn ign66(self) -> Self {
        self.flag(InstFlags::SIZE_IGNORES_DATA16)
    }

    /// Port I/O: no 64-bit form, REX.W is dropped
    fn ignw(self) -> Self {
        self.flag(InstFlags::SIZE_IGNORES_REX_W)
    }

    fn lock(self) -> Self {
        self.flag(InstFlags::LOCKABLE)
    }

    fn only32(self) -> Self {
        self.flag(InstFlags::ONLY_32)
    }

    fn only64(self) -> Self {
        self.flag(InstFlags::ONLY_64)
    }

    fn imm(mut self, imm: Immediate) -> Self {
        self.0.imm = imm;
        self
    }

    fn imm2(mut self, imm: Immediate) -> Self {
        self.0.imm2 = imm;
        self
    }

    fn cpu(mut self, feature: CpuFeatures) -> Self {
        self.0.feature |= feature;
        self
    }

    fn ops(mut self, operands: &[OperandDesc]) -> Self {
        self.0.operands = operands.to_vec();
        self
    }
}

struct TableBuilder {
    mode: ExecutionMode,
    slots: Vec<Vec<InstructionDescriptor>>,
}

impl TableBuilder {
    fn new(mode: ExecutionMode) -> Self {
        Self {
            mode,
            slots: vec![Vec::new(); OpcodeMap::COUNT * 256],
        }
    }

    /// Append a candidate to `(map, opcode)` unless it is not encodable in this mode
    fn add(&mut self, map: OpcodeMap, opcode: u8, op: Op) {
        let mut desc = op.0;
        let excluded = match self.mode {
            ExecutionMode::Bits32 => InstFlags::ONLY_64,
            ExecutionMode::Bits64 => InstFlags::ONLY_32,
        };
        if desc.flags.contains(excluded) {
            return;
        }
        desc.map = map;
        desc.opcode = opcode;
        self.slots[map.index() * 256 + opcode as usize].push(desc);
    }

    /// Register at `base..base + 8`, register number in the low opcode bits
    fn plus_r(&mut self, map: OpcodeMap, base: u8, op: Op) {
        for i in 0..8 {
            self.add(map, base + i, op.clone());
        }
    }
}

fn dst(kind: OperandKind) -> OperandDesc {
    OperandDesc::dst(kind)
}

fn src(kind: OperandKind) -> OperandDesc {
    OperandDesc::src(kind)
}

fn rw(kind: OperandKind) -> OperandDesc {
    OperandDesc::rw(kind)
}

const EB: OperandKind = Rm(Gpr8);
const EW: OperandKind = Rm(Gpr16);
const ED: OperandKind = Rm(Gpr32);
const EQ: OperandKind = Rm(Gpr64);
const EV: OperandKind = Rm(GprV);
const GB: OperandKind = Reg(Gpr8);
const GD: OperandKind = Reg(Gpr32);
const GV: OperandKind = Reg(GprV);
const AL: OperandKind = Fixed(Gpr8, 0);
const CL: OperandKind = Fixed(Gpr8, 1);
const RAX: OperandKind = Fixed(GprV, 0);
const DX: OperandKind = Fixed(Gpr16, 2);
const ST0: OperandKind = Fixed(X87, 0);
const STI: OperandKind = OpcodeReg(X87);
const PQ: OperandKind = Reg(Mmx);
const QQ: OperandKind = Rm(Mmx);
const VX: OperandKind = Reg(Xmm);
const WX: OperandKind = Rm(Xmm);
const MEM: OperandKind = M(Width::Unsized);

const ALU: [&str; 8] = ["add", "or", "adc", "sbb", "and", "sub", "xor", "cmp"];
const SHIFTS: [&str; 8] = ["rol", "ror", "rcl", "rcr", "shl", "shr", "sal", "sar"];
const JCC: [&str; 16] = [
    "jo", "jno", "jb", "jae", "jz", "jnz", "jbe", "ja", "js", "jns", "jp", "jnp", "jl", "jge", "jle", "jg",
];
const CMOV: [&str; 16] = [
    "cmovo", "cmovno", "cmovb", "cmovae", "cmovz", "cmovnz", "cmovbe", "cmova", "cmovs", "cmovns",
    "cmovp", "cmovnp", "cmovl", "cmovge", "cmovle", "cmovg",
];
const SETCC: [&str; 16] = [
    "seto", "setno", "setb", "setae", "setz", "setnz", "setbe", "seta", "sets", "setns", "setp",
    "setnp", "setl", "setge", "setle", "setg",
];

fn one_byte(t: &mut TableBuilder) {
    for (i, &name) in ALU.iter().enumerate() {
        let base = i as u8 * 8;
        let writes = name != "cmp";
        let first = |kind| if writes { rw(kind) } else { src(kind) };
        let alu = |op: Op| if writes { op.lock() } else { op };
        t.add(NoPrefix, base, alu(op(name).modrm().b()).ops(&[first(EB), src(GB)]));
        t.add(NoPrefix, base + 1, alu(op(name).modrm().wvo()).ops(&[first(EV), src(GV)]));
        t.add(NoPrefix, base + 2, op(name).modrm().b().ops(&[first(GB), src(EB)]));
        t.add(NoPrefix, base + 3, op(name).modrm().wvo().ops(&[first(GV), src(EV)]));
        t.add(NoPrefix, base + 4, op(name).b().imm(Immediate::B).ops(&[first(AL), src(Imm)]));
        t.add(NoPrefix, base + 5, op(name).wvo().imm(Immediate::Z).ops(&[first(RAX), src(SImm)]));

        let reg = i as u8;
        let group = |op: Op| alu(op.ext(reg));
        t.add(NoPrefix, 0x80, group(op(name).b().imm(Immediate::B)).ops(&[first(EB), src(Imm)]));
        t.add(NoPrefix, 0x81, group(op(name).wvo().imm(Immediate::Z)).ops(&[first(EV), src(SImm)]));
        t.add(NoPrefix, 0x82, group(op(name).b().imm(Immediate::B).only32()).ops(&[first(EB), src(Imm)]));
        t.add(NoPrefix, 0x83, group(op(name).wvo().imm(Immediate::B)).ops(&[first(EV), src(SImm)]));
    }

    for (opcode, name, seg) in [
        (0x06, "push", 0),
        (0x07, "pop", 0),
        (0x0e, "push", 1),
        (0x16, "push", 2),
        (0x17, "pop", 2),
        (0x1e, "push", 3),
        (0x1f, "pop", 3),
    ] {
        let operand = if name == "push" { src(Fixed(Segment, seg)) } else { dst(Fixed(Segment, seg)) };
        t.add(NoPrefix, opcode, op(name).only32().ops(&[operand]));
    }
    for (opcode, name) in [(0x27, "daa"), (0x2f, "das"), (0x37, "aaa"), (0x3f, "aas")] {
        t.add(NoPrefix, opcode, op(name).only32().ops(&[rw(AL).implicit()]));
    }

    t.plus_r(NoPrefix, 0x40, op("inc").wv().only32().ops(&[rw(OpcodeReg(GprV))]));
    t.plus_r(NoPrefix, 0x48, op("dec").wv().only32().ops(&[rw(OpcodeReg(GprV))]));
    t.plus_r(NoPrefix, 0x50, op("push").wvo().d64().ops(&[src(OpcodeReg(GprV))]));
    t.plus_r(NoPrefix, 0x58, op("pop").wvo().d64().ops(&[dst(OpcodeReg(GprV))]));

    t.add(NoPrefix, 0x60, op("pusha").w().only32());
    t.add(NoPrefix, 0x60, op("pushad").v().only32());
    t.add(NoPrefix, 0x61, op("popa").w().only32());
    t.add(NoPrefix, 0x61, op("popad").v().only32());
    t.add(NoPrefix, 0x62, op("bound").mem().wv().only32().ops(&[src(GV), src(MEM)]));
    t.add(NoPrefix, 0x63, op("arpl").modrm().only32().ops(&[rw(EW), src(Reg(Gpr16))]));
    t.add(NoPrefix, 0x63, op("movsxd").modrm().wvo().only64().ops(&[dst(GV), src(ED)]));
    t.add(NoPrefix, 0x68, op("push").d64().imm(Immediate::Z).ops(&[src(SImm)]));
    t.add(NoPrefix, 0x69, op("imul").modrm().wvo().imm(Immediate::Z).ops(&[dst(GV), src(EV), src(SImm)]));
    t.add(NoPrefix, 0x6a, op("push").d64().imm(Immediate::B).ops(&[src(SImm)]));
    t.add(NoPrefix, 0x6b, op("imul").modrm().wvo().imm(Immediate::B).ops(&[dst(GV), src(EV), src(SImm)]));
    t.add(NoPrefix, 0x6c, op("insb").ops(&[dst(StringDst(Gpr8)), src(DX)]));
    t.add(NoPrefix, 0x6d, op("insw").w().ignw().ops(&[dst(StringDst(GprV)), src(DX)]));
    t.add(NoPrefix, 0x6d, op("insd").v().ignw().ops(&[dst(StringDst(GprV)), src(DX)]));
    t.add(NoPrefix, 0x6e, op("outsb").ops(&[src(DX), src(StringSrc(Gpr8))]));
    t.add(NoPrefix, 0x6f, op("outsw").w().ignw().ops(&[src(DX), src(StringSrc(GprV))]));
    t.add(NoPrefix, 0x6f, op("outsd").v().ignw().ops(&[src(DX), src(StringSrc(GprV))]));

    for (i, &name) in JCC.iter().enumerate() {
        t.add(NoPrefix, 0x70 + i as u8, op(name).f64().imm(Immediate::B).ops(&[src(Rel)]));
    }

    t.add(NoPrefix, 0x84, op("test").modrm().b().ops(&[src(EB), src(GB)]));
    t.add(NoPrefix, 0x85, op("test").modrm().wvo().ops(&[src(EV), src(GV)]));
    t.add(NoPrefix, 0x86, op("xchg").modrm().b().lock().ops(&[rw(EB), rw(GB)]));
    t.add(NoPrefix, 0x87, op("xchg").modrm().wvo().lock().ops(&[rw(EV), rw(GV)]));
    t.add(NoPrefix, 0x88, op("mov").modrm().b().ops(&[dst(EB), src(GB)]));
    t.add(NoPrefix, 0x89, op("mov").modrm().wvo().ops(&[dst(EV), src(GV)]));
    t.add(NoPrefix, 0x8a, op("mov").modrm().b().ops(&[dst(GB), src(EB)]));
    t.add(NoPrefix, 0x8b, op("mov").modrm().wvo().ops(&[dst(GV), src(EV)]));
    t.add(
        NoPrefix,
        0x8c,
        op("mov")
            .modrm()
            .wvo()
            .flag(InstFlags::MODRM_REG_S_OPERAND)
            .ops(&[dst(EV), src(Reg(Segment))]),
    );
    t.add(NoPrefix, 0x8d, op("lea").mem().wvo().ops(&[dst(GV), src(MEM)]));
    t.add(
        NoPrefix,
        0x8e,
        op("mov")
            .modrm()
            .flag(InstFlags::MODRM_REG_S_OPERAND)
            .ops(&[dst(Reg(Segment)), src(EW)]),
    );
    t.add(NoPrefix, 0x8f, op("pop").ext(0).wvo().d64().ops(&[dst(EV)]));
    t.plus_r(NoPrefix, 0x90, op("xchg").wvo().ops(&[rw(OpcodeReg(GprV)), rw(RAX)]));

    t.add(NoPrefix, 0x98, op("cbw").w().ops(&[rw(RAX).implicit()]));
    t.add(NoPrefix, 0x98, op("cwde").v().ops(&[rw(RAX).implicit()]));
    t.add(NoPrefix, 0x98, op("cdqe").o().only64().ops(&[rw(RAX).implicit()]));
    t.add(NoPrefix, 0x99, op("cwd").w());
    t.add(NoPrefix, 0x99, op("cdq").v());
    t.add(NoPrefix, 0x99, op("cqo").o().only64());
    t.add(NoPrefix, 0x9a, op("call").only32().imm(Immediate::Z).imm2(Immediate::W).ops(&[src(FarPtr)]));
    t.add(NoPrefix, 0x9b, op("fwait").cpu(CpuFeatures::X87));
    t.add(NoPrefix, 0x9c, op("pushf").w().d64());
    t.add(NoPrefix, 0x9c, op("pushfd").v().only32());
    t.add(NoPrefix, 0x9c, op("pushfq").o().d64().only64());
    t.add(NoPrefix, 0x9d, op("popf").w().d64());
    t.add(NoPrefix, 0x9d, op("popfd").v().only32());
    t.add(NoPrefix, 0x9d, op("popfq").o().d64().only64());
    t.add(NoPrefix, 0x9e, op("sahf"));
    t.add(NoPrefix, 0x9f, op("lahf"));

    t.add(NoPrefix, 0xa0, op("mov").b().imm(Immediate::AddressSize).ops(&[dst(AL), src(MemOffset(Gpr8))]));
    t.add(NoPrefix, 0xa1, op("mov").wvo().imm(Immediate::AddressSize).ops(&[dst(RAX), src(MemOffset(GprV))]));
    t.add(NoPrefix, 0xa2, op("mov").b().imm(Immediate::AddressSize).ops(&[dst(MemOffset(Gpr8)), src(AL)]));
    t.add(NoPrefix, 0xa3, op("mov").wvo().imm(Immediate::AddressSize).ops(&[dst(MemOffset(GprV)), src(RAX)]));

    let strings: [(u8, [&'static str; 4], [OperandDesc; 2], [OperandDesc; 2]); 5] = [
        (
            0xa4,
            ["movsb", "movsw", "movsd", "movsq"],
            [dst(StringDst(Gpr8)), src(StringSrc(Gpr8))],
            [dst(StringDst(GprV)), src(StringSrc(GprV))],
        ),
        (
            0xa6,
            ["cmpsb", "cmpsw", "cmpsd", "cmpsq"],
            [src(StringSrc(Gpr8)), src(StringDst(Gpr8))],
            [src(StringSrc(GprV)), src(StringDst(GprV))],
        ),
        (
            0xaa,
            ["stosb", "stosw", "stosd", "stosq"],
            [dst(StringDst(Gpr8)), src(AL)],
            [dst(StringDst(GprV)), src(RAX)],
        ),
        (
            0xac,
            ["lodsb", "lodsw", "lodsd", "lodsq"],
            [dst(AL), src(StringSrc(Gpr8))],
            [dst(RAX), src(StringSrc(GprV))],
        ),
        (
            0xae,
            ["scasb", "scasw", "scasd", "scasq"],
            [src(AL), src(StringDst(Gpr8))],
            [src(RAX), src(StringDst(GprV))],
        ),
    ];
    for (opcode, [byte, word, dword, qword], narrow, wide) in strings {
        t.add(NoPrefix, opcode, op(byte).b().ops(&narrow));
        t.add(NoPrefix, opcode + 1, op(word).w().ops(&wide));
        t.add(NoPrefix, opcode + 1, op(dword).v().ops(&wide));
        t.add(NoPrefix, opcode + 1, op(qword).o().only64().ops(&wide));
    }
    t.add(NoPrefix, 0xa8, op("test").b().imm(Immediate::B).ops(&[src(AL), src(Imm)]));
    t.add(NoPrefix, 0xa9, op("test").wvo().imm(Immediate::Z).ops(&[src(RAX), src(SImm)]));

    t.plus_r(NoPrefix, 0xb0, op("mov").b().imm(Immediate::B).ops(&[dst(OpcodeReg(Gpr8)), src(Imm)]));
    t.plus_r(
        NoPrefix,
        0xb8,
        op("mov").wvo().imm(Immediate::OperandSize).ops(&[dst(OpcodeReg(GprV)), src(Imm)]),
    );

    for (i, &name) in SHIFTS.iter().enumerate() {
        let reg = i as u8;
        t.add(NoPrefix, 0xc0, op(name).ext(reg).b().imm(Immediate::B).ops(&[rw(EB), src(Imm)]));
        t.add(NoPrefix, 0xc1, op(name).ext(reg).wvo().imm(Immediate::B).ops(&[rw(EV), src(Imm)]));
        t.add(NoPrefix, 0xd0, op(name).ext(reg).b().ops(&[rw(EB), src(One)]));
        t.add(NoPrefix, 0xd1, op(name).ext(reg).wvo().ops(&[rw(EV), src(One)]));
        t.add(NoPrefix, 0xd2, op(name).ext(reg).b().ops(&[rw(EB), src(CL)]));
        t.add(NoPrefix, 0xd3, op(name).ext(reg).wvo().ops(&[rw(EV), src(CL)]));
    }

    t.add(NoPrefix, 0xc2, op("ret").f64().imm(Immediate::W).ops(&[src(Imm)]));
    t.add(NoPrefix, 0xc3, op("ret").f64());
    t.add(NoPrefix, 0xc4, op("les").mem().wv().only32().ops(&[dst(GV), src(MEM)]));
    t.add(NoPrefix, 0xc5, op("lds").mem().wv().only32().ops(&[dst(GV), src(MEM)]));
    t.add(NoPrefix, 0xc6, op("mov").ext(0).b().imm(Immediate::B).ops(&[dst(EB), src(Imm)]));
    t.add(NoPrefix, 0xc7, op("mov").ext(0).wvo().imm(Immediate::Z).ops(&[dst(EV), src(SImm)]));
    t.add(
        NoPrefix,
        0xc8,
        op("enter").d64().imm(Immediate::W).imm2(Immediate::B).ops(&[src(Imm), src(Imm2)]),
    );
    t.add(NoPrefix, 0xc9, op("leave").d64());
    t.add(NoPrefix, 0xca, op("retf").imm(Immediate::W).ops(&[src(Imm)]));
    t.add(NoPrefix, 0xcb, op("retf"));
    t.add(NoPrefix, 0xcc, op("int3"));
    t.add(NoPrefix, 0xcd, op("int").imm(Immediate::B).ops(&[src(Imm)]));
    t.add(NoPrefix, 0xce, op("into").only32());
    t.add(NoPrefix, 0xcf, op("iret").w());
    t.add(NoPrefix, 0xcf, op("iretd").v());
    t.add(NoPrefix, 0xcf, op("iretq").o().only64());
    t.add(NoPrefix, 0xd4, op("aam").only32().imm(Immediate::B).ops(&[src(Imm)]));
    t.add(NoPrefix, 0xd5, op("aad").only32().imm(Immediate::B).ops(&[src(Imm)]));
    t.add(NoPrefix, 0xd7, op("xlat"));

    for (opcode, name) in [(0xe0, "loopne"), (0xe1, "loope"), (0xe2, "loop")] {
        t.add(NoPrefix, opcode, op(name).f64().imm(Immediate::B).ops(&[src(Rel)]));
    }
    let jcxz = |name, size| op(name).f64().flag(size).imm(Immediate::B).ops(&[src(Rel)]);
    t.add(NoPrefix, 0xe3, jcxz("jcxz", InstFlags::ADDRESS_SIZE_W));
    t.add(NoPrefix, 0xe3, jcxz("jecxz", InstFlags::ADDRESS_SIZE_V));
    t.add(NoPrefix, 0xe3, jcxz("jrcxz", InstFlags::ADDRESS_SIZE_O));
    t.add(NoPrefix, 0xe4, op("in").b().imm(Immediate::B).ops(&[dst(AL), src(Imm)]));
    t.add(NoPrefix, 0xe5, op("in").wv().ignw().imm(Immediate::B).ops(&[dst(RAX), src(Imm)]));
    t.add(NoPrefix, 0xe6, op("out").b().imm(Immediate::B).ops(&[src(Imm), src(AL)]));
    t.add(NoPrefix, 0xe7, op("out").wv().ignw().imm(Immediate::B).ops(&[src(Imm), src(RAX)]));
    t.add(NoPrefix, 0xe8, op("call").f64().imm(Immediate::Z).ops(&[src(Rel)]));
    t.add(NoPrefix, 0xe9, op("jmp").f64().imm(Immediate::Z).ops(&[src(Rel)]));
    t.add(NoPrefix, 0xea, op("jmp").only32().imm(Immediate::Z).imm2(Immediate::W).ops(&[src(FarPtr)]));
    t.add(NoPrefix, 0xeb, op("jmp").f64().imm(Immediate::B).ops(&[src(Rel)]));
    t.add(NoPrefix, 0xec, op("in").b().ops(&[dst(AL), src(DX)]));
    t.add(NoPrefix, 0xed, op("in").wv().ignw().ops(&[dst(RAX), src(DX)]));
    t.add(NoPrefix, 0xee, op("out").b().ops(&[src(DX), src(AL)]));
    t.add(NoPrefix, 0xef, op("out").wv().ignw().ops(&[src(DX), src(RAX)]));

    t.add(NoPrefix, 0xf1, op("int1"));
    t.add(NoPrefix, 0xf4, op("hlt"));
    t.add(NoPrefix, 0xf5, op("cmc"));
    t.add(NoPrefix, 0xf6, op("test").ext(0).b().imm(Immediate::B).ops(&[src(EB), src(Imm)]));
    t.add(NoPrefix, 0xf7, op("test").ext(0).wvo().imm(Immediate::Z).ops(&[src(EV), src(SImm)]));
    for (reg, name, locks) in [
        (2, "not", true),
        (3, "neg", true),
        (4, "mul", false),
        (5, "imul", false),
        (6, "div", false),
        (7, "idiv", false),
    ] {
        let unary = |op: Op| if locks { op.lock() } else { op };
        let first = |kind| if locks { rw(kind) } else { src(kind) };
        t.add(NoPrefix, 0xf6, unary(op(name).ext(reg).b()).ops(&[first(EB)]));
        t.add(NoPrefix, 0xf7, unary(op(name).ext(reg).wvo()).ops(&[first(EV)]));
    }
    for (opcode, name) in [(0xf8, "clc"), (0xf9, "stc"), (0xfa, "cli"), (0xfb, "sti"), (0xfc, "cld"), (0xfd, "std")] {
        t.add(NoPrefix, opcode, op(name));
    }
    t.add(NoPrefix, 0xfe, op("inc").ext(0).b().lock().ops(&[rw(EB)]));
    t.add(NoPrefix, 0xfe, op("dec").ext(1).b().lock().ops(&[rw(EB)]));
    t.add(NoPrefix, 0xff, op("inc").ext(0).wvo().lock().ops(&[rw(EV)]));
    t.add(NoPrefix, 0xff, op("dec").ext(1).wvo().lock().ops(&[rw(EV)]));
    t.add(NoPrefix, 0xff, op("call").ext(2).wvo().f64().ops(&[src(EV)]));
    t.add(NoPrefix, 0xff, op("call").ext(3).mem().ops(&[src(MEM)]));
    t.add(NoPrefix, 0xff, op("jmp").ext(4).wvo().f64().ops(&[src(EV)]));
    t.add(NoPrefix, 0xff, op("jmp").ext(5).mem().ops(&[src(MEM)]));
    t.add(NoPrefix, 0xff, op("push").ext(6).wvo().d64().ops(&[src(EV)]));
}

fn x87(t: &mut TableBuilder) {
    let fpu = |name| op(name).cpu(CpuFeatures::X87);
    let mem = |name, reg, width| fpu(name).ext(reg).mem().ops(&[src(M(width))]);
    let store = |name, reg, width| fpu(name).ext(reg).mem().ops(&[dst(M(width))]);

    const ARITH: [&str; 8] = ["fadd", "fmul", "fcom", "fcomp", "fsub", "fsubr", "fdiv", "fdivr"];
    const IARITH: [&str; 8] = ["fiadd", "fimul", "ficom", "ficomp", "fisub", "fisubr", "fidiv", "fidivr"];
    for reg in 0..8u8 {
        t.add(NoPrefix, 0xd8, mem(ARITH[reg as usize], reg, Width::Dword));
        t.add(NoPrefix, 0xdc, mem(ARITH[reg as usize], reg, Width::Qword));
        t.add(NoPrefix, 0xda, mem(IARITH[reg as usize], reg, Width::Dword));
        t.add(NoPrefix, 0xde, mem(IARITH[reg as usize], reg, Width::Word));
        t.plus_r(PrefixD8, 0xc0 + reg * 8, fpu(ARITH[reg as usize]).ops(&[rw(ST0), src(STI)]));
    }

    t.add(NoPrefix, 0xd9, mem("fld", 0, Width::Dword));
    t.add(NoPrefix, 0xd9, store("fst", 2, Width::Dword));
    t.add(NoPrefix, 0xd9, store("fstp", 3, Width::Dword));
    t.add(NoPrefix, 0xd9, mem("fldenv", 4, Width::Unsized));
    t.add(NoPrefix, 0xd9, mem("fldcw", 5, Width::Word));
    t.add(NoPrefix, 0xd9, store("fnstenv", 6, Width::Unsized));
    t.add(NoPrefix, 0xd9, store("fnstcw", 7, Width::Word));
    t.add(NoPrefix, 0xdb, mem("fild", 0, Width::Dword));
    t.add(NoPrefix, 0xdb, store("fisttp", 1, Width::Dword).cpu(CpuFeatures::SSE3));
    t.add(NoPrefix, 0xdb, store("fist", 2, Width::Dword));
    t.add(NoPrefix, 0xdb, store("fistp", 3, Width::Dword));
    t.add(NoPrefix, 0xdb, mem("fld", 5, Width::Tbyte));
    t.add(NoPrefix, 0xdb, store("fstp", 7, Width::Tbyte));
    t.add(NoPrefix, 0xdd, mem("fld", 0, Width::Qword));
    t.add(NoPrefix, 0xdd, store("fisttp", 1, Width::Qword).cpu(CpuFeatures::SSE3));
    t.add(NoPrefix, 0xdd, store("fst", 2, Width::Qword));
    t.add(NoPrefix, 0xdd, store("fstp", 3, Width::Qword));
    t.add(NoPrefix, 0xdd, mem("frstor", 4, Width::Unsized));
    t.add(NoPrefix, 0xdd, store("fnsave", 6, Width::Unsized));
    t.add(NoPrefix, 0xdd, store("fnstsw", 7, Width::Word));
    t.add(NoPrefix, 0xdf, mem("fild", 0, Width::Word));
    t.add(NoPrefix, 0xdf, store("fisttp", 1, Width::Word).cpu(CpuFeatures::SSE3));
    t.add(NoPrefix, 0xdf, store("fist", 2, Width::Word));
    t.add(NoPrefix, 0xdf, store("fistp", 3, Width::Word));
    t.add(NoPrefix, 0xdf, mem("fbld", 4, Width::Tbyte));
    t.add(NoPrefix, 0xdf, mem("fild", 5, Width::Qword));
    t.add(NoPrefix, 0xdf, store("fbstp", 6, Width::Tbyte));
    t.add(NoPrefix, 0xdf, store("fistp", 7, Width::Qword));

    t.plus_r(PrefixD9, 0xc0, fpu("fld").ops(&[src(STI)]));
    t.plus_r(PrefixD9, 0xc8, fpu("fxch").ops(&[rw(STI)]));
    t.add(PrefixD9, 0xd0, fpu("fnop"));
    const D9_NULLARY: [(u8, &str); 27] = [
        (0xe0, "fchs"),
        (0xe1, "fabs"),
        (0xe4, "ftst"),
        (0xe5, "fxam"),
        (0xe8, "fld1"),
        (0xe9, "fldl2t"),
        (0xea, "fldl2e"),
        (0xeb, "fldpi"),
        (0xec, "fldlg2"),
        (0xed, "fldln2"),
        (0xee, "fldz"),
        (0xf0, "f2xm1"),
        (0xf1, "fyl2x"),
        (0xf2, "fptan"),
        (0xf3, "fpatan"),
        (0xf4, "fxtract"),
        (0xf5, "fprem1"),
        (0xf6, "fdecstp"),
        (0xf7, "fincstp"),
        (0xf8, "fprem"),
        (0xf9, "fyl2xp1"),
        (0xfa, "fsqrt"),
        (0xfb, "fsincos"),
        (0xfc, "frndint"),
        (0xfd, "fscale"),
        (0xfe, "fsin"),
        (0xff, "fcos"),
    ];
    for (opcode, name) in D9_NULLARY {
        t.add(PrefixD9, opcode, fpu(name));
    }

    let fcmov = |name| fpu(name).cpu(CpuFeatures::CMOV).ops(&[dst(ST0), src(STI)]);
    t.plus_r(PrefixDA, 0xc0, fcmov("fcmovb"));
    t.plus_r(PrefixDA, 0xc8, fcmov("fcmove"));
    t.plus_r(PrefixDA, 0xd0, fcmov("fcmovbe"));
    t.plus_r(PrefixDA, 0xd8, fcmov("fcmovu"));
    t.add(PrefixDA, 0xe9, fpu("fucompp"));
    t.plus_r(PrefixDB, 0xc0, fcmov("fcmovnb"));
    t.plus_r(PrefixDB, 0xc8, fcmov("fcmovne"));
    t.plus_r(PrefixDB, 0xd0, fcmov("fcmovnbe"));
    t.plus_r(PrefixDB, 0xd8, fcmov("fcmovnu"));
    t.add(PrefixDB, 0xe2, fpu("fnclex"));
    t.add(PrefixDB, 0xe3, fpu("fninit"));
    t.plus_r(PrefixDB, 0xe8, fpu("fucomi").cpu(CpuFeatures::CMOV).ops(&[src(ST0), src(STI)]));
    t.plus_r(PrefixDB, 0xf0, fpu("fcomi").cpu(CpuFeatures::CMOV).ops(&[src(ST0), src(STI)]));

    for (base, name) in [(0xc0, "fadd"), (0xc8, "fmul"), (0xe0, "fsubr"), (0xe8, "fsub"), (0xf0, "fdivr"), (0xf8, "fdiv")] {
        t.plus_r(PrefixDC, base, fpu(name).ops(&[rw(STI), src(ST0)]));
    }
    t.plus_r(PrefixDD, 0xc0, fpu("ffree").ops(&[src(STI)]));
    t.plus_r(PrefixDD, 0xd0, fpu("fst").ops(&[dst(STI)]));
    t.plus_r(PrefixDD, 0xd8, fpu("fstp").ops(&[dst(STI)]));
    t.plus_r(PrefixDD, 0xe0, fpu("fucom").ops(&[src(STI)]));
    t.plus_r(PrefixDD, 0xe8, fpu("fucomp").ops(&[src(STI)]));
    for (base, name) in [(0xc0, "faddp"), (0xc8, "fmulp"), (0xe0, "fsubrp"), (0xe8, "fsubp"), (0xf0, "fdivrp"), (0xf8, "fdivp")] {
        t.plus_r(PrefixDE, base, fpu(name).ops(&[rw(STI), src(ST0)]));
    }
    t.add(PrefixDE, 0xd9, fpu("fcompp"));
    t.add(PrefixDF, 0xe0, fpu("fnstsw").ops(&[dst(Fixed(Gpr16, 0))]));

    // Undocumented register-form aliases
    t.plus_r(PrefixD9, 0xd8, fpu("fstp").ops(&[dst(STI)]));
    t.add(PrefixDB, 0xe0, fpu("fneni"));
    t.add(PrefixDB, 0xe1, fpu("fndisi"));
    t.add(PrefixDB, 0xe4, fpu("fnsetpm"));
    t.plus_r(PrefixDC, 0xd0, fpu("fcom").ops(&[src(ST0), src(STI)]));
    t.plus_r(PrefixDC, 0xd8, fpu("fcomp").ops(&[src(ST0), src(STI)]));
    t.plus_r(PrefixDD, 0xc8, fpu("fxch").ops(&[rw(STI)]));
    t.plus_r(PrefixDE, 0xd0, fpu("fcomp").ops(&[src(ST0), src(STI)]));
    t.plus_r(PrefixDF, 0xc0, fpu("ffreep").ops(&[src(STI)]));
    t.plus_r(PrefixDF, 0xc8, fpu("fxch").ops(&[rw(STI)]));
    t.plus_r(PrefixDF, 0xd0, fpu("fstp").ops(&[dst(STI)]));
    t.plus_r(PrefixDF, 0xd8, fpu("fstp").ops(&[dst(STI)]));
    t.plus_r(PrefixDF, 0xe8, fpu("fucomip").cpu(CpuFeatures::CMOV).ops(&[src(ST0), src(STI)]));
    t.plus_r(PrefixDF, 0xf0, fpu("fcomip").cpu(CpuFeatures::CMOV).ops(&[src(ST0), src(STI)]));
}

fn two_byte(t: &mut TableBuilder) {
    for (reg, name, writes) in [
        (0, "sldt", true),
        (1, "str", true),
        (2, "lldt", false),
        (3, "ltr", false),
        (4, "verr", false),
        (5, "verw", false),
    ] {
        let operand = if writes { dst(EW) } else { src(EW) };
        t.add(Prefix0F, 0x00, op(name).ext(reg).ops(&[operand]));
    }
    t.add(Prefix0F, 0x01, op("sgdt").ext(0).mem().ops(&[dst(MEM)]));
    t.add(Prefix0F, 0x01, op("sidt").ext(1).mem().ops(&[dst(MEM)]));
    t.add(Prefix0F, 0x01, op("lgdt").ext(2).mem().ops(&[src(MEM)]));
    t.add(Prefix0F, 0x01, op("lidt").ext(3).mem().ops(&[src(MEM)]));
    t.add(Prefix0F, 0x01, op("smsw").ext(4).ops(&[dst(EW)]));
    t.add(Prefix0F, 0x01, op("lmsw").ext(6).ops(&[src(EW)]));
    t.add(Prefix0F, 0x01, op("invlpg").ext(7).mem().ops(&[src(MEM)]));
    t.add(Prefix0F, 0x01, op("monitor").ext_rm(1, 0).cpu(CpuFeatures::MONITOR));
    t.add(Prefix0F, 0x01, op("mwait").ext_rm(1, 1).cpu(CpuFeatures::MONITOR));
    t.add(Prefix0F, 0x01, op("xgetbv").ext_rm(2, 0));
    t.add(Prefix0F, 0x01, op("swapgs").ext_rm(7, 0).only64());
    t.add(Prefix0F, 0x01, op("rdtscp").ext_rm(7, 1).cpu(CpuFeatures::RDTSCP));
    t.add(Prefix0F, 0x02, op("lar").modrm().wvo().ops(&[dst(GV), src(EW)]));
    t.add(Prefix0F, 0x03, op("lsl").modrm().wvo().ops(&[dst(GV), src(EW)]));
    t.add(Prefix0F, 0x05, op("syscall").cpu(CpuFeatures::SYSCALL));
    t.add(Prefix0F, 0x06, op("clts"));
    t.add(Prefix0F, 0x07, op("sysret").cpu(CpuFeatures::SYSCALL));
    t.add(Prefix0F, 0x08, op("invd"));
    t.add(Prefix0F, 0x09, op("wbinvd"));
    t.add(Prefix0F, 0x0b, op("ud2"));
    for (reg, name) in [(0, "prefetchnta"), (1, "prefetcht0"), (2, "prefetcht1"), (3, "prefetcht2")] {
        t.add(Prefix0F, 0x18, op(name).ext(reg).mem().cpu(CpuFeatures::SSE).ops(&[src(M(Width::Byte))]));
    }
    t.add(Prefix0F, 0x1f, op("nop").ext(0).wvo().ops(&[src(EV)]));
    t.add(PrefixF30F, 0x1e, op("endbr64").ext_rm(7, 2).cpu(CpuFeatures::CET));
    t.add(PrefixF30F, 0x1e, op("endbr32").ext_rm(7, 3).cpu(CpuFeatures::CET));

    t.add(Prefix0F, 0x20, op("mov").mod3().ops(&[dst(Rm(GprN)), src(Reg(Control))]));
    t.add(Prefix0F, 0x21, op("mov").mod3().ops(&[dst(Rm(GprN)), src(Reg(Debug))]));
    t.add(Prefix0F, 0x22, op("mov").mod3().ops(&[dst(Reg(Control)), src(Rm(GprN))]));
    t.add(Prefix0F, 0x23, op("mov").mod3().ops(&[dst(Reg(Debug)), src(Rm(GprN))]));

    t.add(Prefix0F, 0x30, op("wrmsr").cpu(CpuFeatures::MSR));
    t.add(Prefix0F, 0x31, op("rdtsc").cpu(CpuFeatures::TSC));
    t.add(Prefix0F, 0x32, op("rdmsr").cpu(CpuFeatures::MSR));
    t.add(Prefix0F, 0x33, op("rdpmc"));
    t.add(Prefix0F, 0x34, op("sysenter"));
    t.add(Prefix0F, 0x35, op("sysexit"));

    for i in 0..16u8 {
        t.add(
            Prefix0F,
            0x40 + i,
            op(CMOV[i as usize]).modrm().wvo().cpu(CpuFeatures::CMOV).ops(&[dst(GV), src(EV)]),
        );
        t.add(Prefix0F, 0x80 + i, op(JCC[i as usize]).f64().imm(Immediate::Z).ops(&[src(Rel)]));
        t.add(Prefix0F, 0x90 + i, op(SETCC[i as usize]).modrm().b().ops(&[dst(EB)]));
    }

    t.add(Prefix0F, 0xa0, op("push").d64().ops(&[src(Fixed(Segment, 4))]));
    t.add(Prefix0F, 0xa1, op("pop").d64().ops(&[dst(Fixed(Segment, 4))]));
    t.add(Prefix0F, 0xa2, op("cpuid"));
    t.add(Prefix0F, 0xa3, op("bt").modrm().wvo().ops(&[src(EV), src(GV)]));
    t.add(Prefix0F, 0xa4, op("shld").modrm().wvo().imm(Immediate::B).ops(&[rw(EV), src(GV), src(Imm)]));
    t.add(Prefix0F, 0xa5, op("shld").modrm().wvo().ops(&[rw(EV), src(GV), src(CL)]));
    t.add(Prefix0F, 0xa8, op("push").d64().ops(&[src(Fixed(Segment, 5))]));
    t.add(Prefix0F, 0xa9, op("pop").d64().ops(&[dst(Fixed(Segment, 5))]));
    t.add(Prefix0F, 0xaa, op("rsm"));
    t.add(Prefix0F, 0xab, op("bts").modrm().wvo().lock().ops(&[rw(EV), src(GV)]));
    t.add(Prefix0F, 0xac, op("shrd").modrm().wvo().imm(Immediate::B).ops(&[rw(EV), src(GV), src(Imm)]));
    t.add(Prefix0F, 0xad, op("shrd").modrm().wvo().ops(&[rw(EV), src(GV), src(CL)]));
    t.add(Prefix0F, 0xae, op("fxsave").ext(0).mem().cpu(CpuFeatures::FXSR).ops(&[dst(MEM)]));
    t.add(Prefix0F, 0xae, op("fxrstor").ext(1).mem().cpu(CpuFeatures::FXSR).ops(&[src(MEM)]));
    t.add(Prefix0F, 0xae, op("ldmxcsr").ext(2).mem().cpu(CpuFeatures::SSE).ops(&[src(M(Width::Dword))]));
    t.add(Prefix0F, 0xae, op("stmxcsr").ext(3).mem().cpu(CpuFeatures::SSE).ops(&[dst(M(Width::Dword))]));
    t.add(Prefix0F, 0xae, op("lfence").ext(5).mod3().cpu(CpuFeatures::SSE2));
    t.add(Prefix0F, 0xae, op("mfence").ext(6).mod3().cpu(CpuFeatures::SSE2));
    t.add(Prefix0F, 0xae, op("sfence").ext(7).mod3().cpu(CpuFeatures::SSE));
    t.add(Prefix0F, 0xae, op("clflush").ext(7).mem().cpu(CpuFeatures::CLFLUSH).ops(&[src(M(Width::Byte))]));
    t.add(Prefix0F, 0xaf, op("imul").modrm().wvo().ops(&[rw(GV), src(EV)]));

    t.add(Prefix0F, 0xb0, op("cmpxchg").modrm().b().lock().ops(&[rw(EB), src(GB)]));
    t.add(Prefix0F, 0xb1, op("cmpxchg").modrm().wvo().lock().ops(&[rw(EV), src(GV)]));
    t.add(Prefix0F, 0xb2, op("lss").mem().wvo().ops(&[dst(GV), src(MEM)]));
    t.add(Prefix0F, 0xb3, op("btr").modrm().wvo().lock().ops(&[rw(EV), src(GV)]));
    t.add(Prefix0F, 0xb4, op("lfs").mem().wvo().ops(&[dst(GV), src(MEM)]));
    t.add(Prefix0F, 0xb5, op("lgs").mem().wvo().ops(&[dst(GV), src(MEM)]));
    t.add(Prefix0F, 0xb6, op("movzx").modrm().wvo().ops(&[dst(GV), src(EB)]));
    t.add(Prefix0F, 0xb7, op("movzx").modrm().wvo().ops(&[dst(GV), src(EW)]));
    t.add(PrefixF30F, 0xb8, op("popcnt").modrm().wvo().cpu(CpuFeatures::POPCNT).ops(&[dst(GV), src(EV)]));
    t.add(Prefix0F, 0xba, op("bt").ext(4).wvo().imm(Immediate::B).ops(&[src(EV), src(Imm)]));
    for (reg, name) in [(5, "bts"), (6, "btr"), (7, "btc")] {
        t.add(Prefix0F, 0xba, op(name).ext(reg).wvo().lock().imm(Immediate::B).ops(&[rw(EV), src(Imm)]));
    }
    t.add(Prefix0F, 0xbb, op("btc").modrm().wvo().lock().ops(&[rw(EV), src(GV)]));
    t.add(Prefix0F, 0xbc, op("bsf").modrm().wvo().ops(&[dst(GV), src(EV)]));
    t.add(Prefix0F, 0xbd, op("bsr").modrm().wvo().ops(&[dst(GV), src(EV)]));
    t.add(PrefixF30F, 0xbd, op("lzcnt").modrm().wvo().cpu(CpuFeatures::LZCNT).ops(&[dst(GV), src(EV)]));
    t.add(Prefix0F, 0xbe, op("movsx").modrm().wvo().ops(&[dst(GV), src(EB)]));
    t.add(Prefix0F, 0xbf, op("movsx").modrm().wvo().ops(&[dst(GV), src(EW)]));

    t.add(Prefix0F, 0xc0, op("xadd").modrm().b().lock().ops(&[rw(EB), rw(GB)]));
    t.add(Prefix0F, 0xc1, op("xadd").modrm().wvo().lock().ops(&[rw(EV), rw(GV)]));
    t.add(
        Prefix0F,
        0xc3,
        op("movnti").mem().vo().cpu(CpuFeatures::SSE2).ops(&[dst(M(Width::OperandSize)), src(GV)]),
    );
    t.add(
        Prefix0F,
        0xc7,
        op("cmpxchg8b").ext(1).mem().v().lock().cpu(CpuFeatures::CX8).ops(&[rw(M(Width::Qword))]),
    );
    t.add(
        Prefix0F,
        0xc7,
        op("cmpxchg16b")
            .ext(1)
            .mem()
            .o()
            .lock()
            .flag(InstFlags::USES_REX_W)
            .only64()
            .cpu(CpuFeatures::CX16)
            .ops(&[rw(M(Width::Xmmword))]),
    );
    t.plus_r(Prefix0F, 0xc8, op("bswap").vo().ops(&[rw(OpcodeReg(GprV))]));
}

/// Packed/scalar single and double precision forms: (opcode, [ps, pd, ss, sd])
const SSE_FP: [(u8, [&str; 4]); 9] = [
    (0x51, ["sqrtps", "sqrtpd", "sqrtss", "sqrtsd"]),
    (0x58, ["addps", "addpd", "addss", "addsd"]),
    (0x59, ["mulps", "mulpd", "mulss", "mulsd"]),
    (0x5a, ["cvtps2pd", "cvtpd2ps", "cvtss2sd", "cvtsd2ss"]),
    (0x5c, ["subps", "subpd", "subss", "subsd"]),
    (0x5d, ["minps", "minpd", "minss", "minsd"]),
    (0x5e, ["divps", "divpd", "divss", "divsd"]),
    (0x5f, ["maxps", "maxpd", "maxss", "maxsd"]),
    (0x10, ["movups", "movupd", "movss", "movsd"]),
];

/// Packed-only forms: (opcode, ps, pd)
const SSE_PACKED: [(u8, &str, &str); 9] = [
    (0x14, "unpcklps", "unpcklpd"),
    (0x15, "unpckhps", "unpckhpd"),
    (0x28, "movaps", "movapd"),
    (0x2e, "ucomiss", "ucomisd"),
    (0x2f, "comiss", "comisd"),
    (0x54, "andps", "andpd"),
    (0x55, "andnps", "andnpd"),
    (0x56, "orps", "orpd"),
    (0x57, "xorps", "xorpd"),
];

fn sse(t: &mut TableBuilder) {
    let sse = |name| op(name).modrm().cpu(CpuFeatures::SSE);
    let sse2 = |name| op(name).modrm().cpu(CpuFeatures::SSE2);
    let sse3 = |name| op(name).modrm().cpu(CpuFeatures::SSE3);
    let load = [rw(VX), src(WX)];
    let store = [dst(WX), src(VX)];

    for (opcode, [ps, pd, ss, sd]) in SSE_FP {
        t.add(Prefix0F, opcode, sse(ps).ops(&load));
        t.add(Prefix660F, opcode, sse2(pd).ops(&load));
        let scalar = if opcode == 0x5a { sse2(ss) } else { sse(ss) };
        t.add(PrefixF30F, opcode, scalar.ops(&load));
        t.add(PrefixF20F, opcode, sse2(sd).ops(&load));
    }
    t.add(Prefix0F, 0x11, sse("movups").ops(&store));
    t.add(Prefix660F, 0x11, sse2("movupd").ops(&store));
    t.add(PrefixF30F, 0x11, sse("movss").ops(&store));
    t.add(PrefixF20F, 0x11, sse2("movsd").ops(&store));
    for (opcode, ps, pd) in SSE_PACKED {
        t.add(Prefix0F, opcode, sse(ps).ops(&load));
        t.add(Prefix660F, opcode, sse2(pd).ops(&load));
    }
    t.add(Prefix0F, 0x29, sse("movaps").ops(&store));
    t.add(Prefix660F, 0x29, sse2("movapd").ops(&store));
    t.add(Prefix0F, 0x52, sse("rsqrtps").ops(&load));
    t.add(PrefixF30F, 0x52, sse("rsqrtss").ops(&load));
    t.add(Prefix0F, 0x53, sse("rcpps").ops(&load));
    t.add(PrefixF30F, 0x53, sse("rcpss").ops(&load));

    t.add(Prefix0F, 0x12, sse("movlps").mem().ops(&[rw(VX), src(M(Width::Qword))]));
    t.add(Prefix0F, 0x12, sse("movhlps").mod3().ops(&load));
    t.add(Prefix660F, 0x12, sse2("movlpd").mem().ops(&[rw(VX), src(M(Width::Qword))]));
    t.add(PrefixF20F, 0x12, sse3("movddup").ops(&load));
    t.add(PrefixF30F, 0x12, sse3("movsldup").ops(&load));
    t.add(Prefix0F, 0x13, sse("movlps").mem().ops(&[dst(M(Width::Qword)), src(VX)]));
    t.add(Prefix660F, 0x13, sse2("movlpd").mem().ops(&[dst(M(Width::Qword)), src(VX)]));
    t.add(Prefix0F, 0x16, sse("movhps").mem().ops(&[rw(VX), src(M(Width::Qword))]));
    t.add(Prefix0F, 0x16, sse("movlhps").mod3().ops(&load));
    t.add(Prefix660F, 0x16, sse2("movhpd").mem().ops(&[rw(VX), src(M(Width::Qword))]));
    t.add(PrefixF30F, 0x16, sse3("movshdup").ops(&load));
    t.add(Prefix0F, 0x17, sse("movhps").mem().ops(&[dst(M(Width::Qword)), src(VX)]));
    t.add(Prefix660F, 0x17, sse2("movhpd").mem().ops(&[dst(M(Width::Qword)), src(VX)]));

    t.add(Prefix0F, 0x2a, sse("cvtpi2ps").ops(&[rw(VX), src(QQ)]));
    t.add(Prefix660F, 0x2a, sse2("cvtpi2pd").ops(&[dst(VX), src(QQ)]));
    t.add(PrefixF30F, 0x2a, sse("cvtsi2ss").vo().ops(&[rw(VX), src(EV)]));
    t.add(PrefixF20F, 0x2a, sse2("cvtsi2sd").vo().ops(&[rw(VX), src(EV)]));
    t.add(Prefix0F, 0x2b, sse("movntps").mem().ops(&[dst(M(Width::Xmmword)), src(VX)]));
    t.add(Prefix660F, 0x2b, sse2("movntpd").mem().ops(&[dst(M(Width::Xmmword)), src(VX)]));
    for (opcode, [ps, pd, ss, sd]) in [
        (0x2c, ["cvttps2pi", "cvttpd2pi", "cvttss2si", "cvttsd2si"]),
        (0x2d, ["cvtps2pi", "cvtpd2pi", "cvtss2si", "cvtsd2si"]),
    ] {
        t.add(Prefix0F, opcode, sse(ps).ops(&[dst(PQ), src(WX)]));
        t.add(Prefix660F, opcode, sse2(pd).ops(&[dst(PQ), src(WX)]));
        t.add(PrefixF30F, opcode, sse(ss).vo().ops(&[dst(GV), src(WX)]));
        t.add(PrefixF20F, opcode, sse2(sd).vo().ops(&[dst(GV), src(WX)]));
    }
    t.add(Prefix0F, 0x50, sse("movmskps").mod3().ops(&[dst(GD), src(WX)]));
    t.add(Prefix660F, 0x50, sse2("movmskpd").mod3().ops(&[dst(GD), src(WX)]));
    t.add(Prefix0F, 0x5b, sse2("cvtdq2ps").ops(&[dst(VX), src(WX)]));
    t.add(Prefix660F, 0x5b, sse2("cvtps2dq").ops(&[dst(VX), src(WX)]));
    t.add(PrefixF30F, 0x5b, sse2("cvttps2dq").ops(&[dst(VX), src(WX)]));

    t.add(Prefix0F, 0xc2, sse("cmpps").imm(Immediate::B).ops(&[rw(VX), src(WX), src(Imm)]));
    t.add(Prefix660F, 0xc2, sse2("cmppd").imm(Immediate::B).ops(&[rw(VX), src(WX), src(Imm)]));
    t.add(PrefixF30F, 0xc2, sse("cmpss").imm(Immediate::B).ops(&[rw(VX), src(WX), src(Imm)]));
    t.add(PrefixF20F, 0xc2, sse2("cmpsd").imm(Immediate::B).ops(&[rw(VX), src(WX), src(Imm)]));
    t.add(Prefix0F, 0xc6, sse("shufps").imm(Immediate::B).ops(&[rw(VX), src(WX), src(Imm)]));
    t.add(Prefix660F, 0xc6, sse2("shufpd").imm(Immediate::B).ops(&[rw(VX), src(WX), src(Imm)]));

    t.add(Prefix660F, 0x7c, sse3("haddpd").ops(&load));
    t.add(PrefixF20F, 0x7c, sse3("haddps").ops(&load));
    t.add(Prefix660F, 0x7d, sse3("hsubpd").ops(&load));
    t.add(PrefixF20F, 0x7d, sse3("hsubps").ops(&load));
    t.add(Prefix660F, 0xd0, sse3("addsubpd").ops(&load));
    t.add(PrefixF20F, 0xd0, sse3("addsubps").ops(&load));
    t.add(PrefixF20F, 0xf0, sse3("lddqu").mem().ops(&[dst(VX), src(M(Width::Xmmword))]));
    t.add(Prefix660F, 0xe6, sse2("cvttpd2dq").ops(&[dst(VX), src(WX)]));
    t.add(PrefixF20F, 0xe6, sse2("cvtpd2dq").ops(&[dst(VX), src(WX)]));
    t.add(PrefixF30F, 0xe6, sse2("cvtdq2pd").ops(&[dst(VX), src(WX)]));
}

/// Integer forms present in both the MMX (0F) and SSE2 (66 0F) maps
const INTEGER_OPS: [(u8, &str); 55] = [
    (0x60, "punpcklbw"),
    (0x61, "punpcklwd"),
    (0x62, "punpckldq"),
    (0x63, "packsswb"),
    (0x64, "pcmpgtb"),
    (0x65, "pcmpgtw"),
    (0x66, "pcmpgtd"),
    (0x67, "packuswb"),
    (0x68, "punpckhbw"),
    (0x69, "punpckhwd"),
    (0x6a, "punpckhdq"),
    (0x6b, "packssdw"),
    (0x74, "pcmpeqb"),
    (0x75, "pcmpeqw"),
    (0x76, "pcmpeqd"),
    (0xd1, "psrlw"),
    (0xd2, "psrld"),
    (0xd3, "psrlq"),
    (0xd4, "paddq"),
    (0xd5, "pmullw"),
    (0xd8, "psubusb"),
    (0xd9, "psubusw"),
    (0xda, "pminub"),
    (0xdb, "pand"),
    (0xdc, "paddusb"),
    (0xdd, "paddusw"),
    (0xde, "pmaxub"),
    (0xdf, "pandn"),
    (0xe0, "pavgb"),
    (0xe1, "psraw"),
    (0xe2, "psrad"),
    (0xe3, "pavgw"),
    (0xe4, "pmulhuw"),
    (0xe5, "pmulhw"),
    (0xe8, "psubsb"),
    (0xe9, "psubsw"),
    (0xea, "pminsw"),
    (0xeb, "por"),
    (0xec, "paddsb"),
    (0xed, "paddsw"),
    (0xee, "pmaxsw"),
    (0xef, "pxor"),
    (0xf1, "psllw"),
    (0xf2, "pslld"),
    (0xf3, "psllq"),
    (0xf4, "pmuludq"),
    (0xf5, "pmaddwd"),
    (0xf6, "psadbw"),
    (0xf8, "psubb"),
    (0xf9, "psubw"),
    (0xfa, "psubd"),
    (0xfb, "psubq"),
    (0xfc, "paddb"),
    (0xfd, "paddw"),
    (0xfe, "paddd"),
];

fn mmx_sse2_integer(t: &mut TableBuilder) {
    let mmx = |name| op(name).modrm().cpu(CpuFeatures::MMX);
    let sse2 = |name| op(name).modrm().cpu(CpuFeatures::SSE2);

    for (opcode, name) in INTEGER_OPS {
        t.add(Prefix0F, opcode, mmx(name).ops(&[rw(PQ), src(QQ)]));
        t.add(Prefix660F, opcode, sse2(name).ops(&[rw(VX), src(WX)]));
    }
    t.add(Prefix660F, 0x6c, sse2("punpcklqdq").ops(&[rw(VX), src(WX)]));
    t.add(Prefix660F, 0x6d, sse2("punpckhqdq").ops(&[rw(VX), src(WX)]));
    t.add(Prefix660F, 0xd6, sse2("movq").ops(&[dst(WX), src(VX)]));
    t.add(PrefixF20F, 0xd6, sse2("movdq2q").mod3().ops(&[dst(PQ), src(WX)]));
    t.add(PrefixF30F, 0xd6, sse2("movq2dq").mod3().ops(&[dst(VX), src(QQ)]));
    t.add(Prefix0F, 0xd7, mmx("pmovmskb").mod3().ops(&[dst(GD), src(QQ)]));
    t.add(Prefix660F, 0xd7, sse2("pmovmskb").mod3().ops(&[dst(GD), src(WX)]));
    t.add(Prefix0F, 0xe7, mmx("movntq").mem().ops(&[dst(M(Width::Qword)), src(PQ)]));
    t.add(Prefix660F, 0xe7, sse2("movntdq").mem().ops(&[dst(M(Width::Xmmword)), src(VX)]));
    t.add(Prefix0F, 0xf7, mmx("maskmovq").mod3().ops(&[src(PQ), src(QQ)]));
    t.add(Prefix660F, 0xf7, sse2("maskmovdqu").mod3().ops(&[src(VX), src(WX)]));
    t.add(Prefix0F, 0x77, op("emms").cpu(CpuFeatures::MMX));

    // movd/movq share an opcode; REX.W selects the 64-bit form
    for (map, reg, feature) in [(Prefix0F, PQ, CpuFeatures::MMX), (Prefix660F, VX, CpuFeatures::SSE2)] {
        let movd = op("movd").modrm().v().ign66().cpu(feature);
        let movq = op("movq")
            .modrm()
            .o()
            .flag(InstFlags::USES_REX_W)
            .only64()
            .cpu(feature);
        t.add(map, 0x6e, movd.clone().ops(&[dst(reg), src(ED)]));
        t.add(map, 0x6e, movq.clone().ops(&[dst(reg), src(EQ)]));
        t.add(map, 0x7e, movd.ops(&[dst(ED), src(reg)]));
        t.add(map, 0x7e, movq.ops(&[dst(EQ), src(reg)]));
    }
    t.add(PrefixF30F, 0x7e, sse2("movq").ops(&[dst(VX), src(WX)]));

    t.add(Prefix0F, 0x6f, mmx("movq").ops(&[dst(PQ), src(QQ)]));
    t.add(Prefix0F, 0x7f, mmx("movq").ops(&[dst(QQ), src(PQ)]));
    t.add(Prefix660F, 0x6f, sse2("movdqa").ops(&[dst(VX), src(WX)]));
    t.add(Prefix660F, 0x7f, sse2("movdqa").ops(&[dst(WX), src(VX)]));
    t.add(PrefixF30F, 0x6f, sse2("movdqu").ops(&[dst(VX), src(WX)]));
    t.add(PrefixF30F, 0x7f, sse2("movdqu").ops(&[dst(WX), src(VX)]));

    let shuffle = [dst(VX), src(WX), src(Imm)];
    t.add(
        Prefix0F,
        0x70,
        op("pshufw").modrm().imm(Immediate::B).cpu(CpuFeatures::SSE).ops(&[dst(PQ), src(QQ), src(Imm)]),
    );
    t.add(Prefix660F, 0x70, sse2("pshufd").imm(Immediate::B).ops(&shuffle));
    t.add(PrefixF30F, 0x70, sse2("pshufhw").imm(Immediate::B).ops(&shuffle));
    t.add(PrefixF20F, 0x70, sse2("pshuflw").imm(Immediate::B).ops(&shuffle));
    t.add(
        Prefix0F,
        0xc4,
        op("pinsrw").modrm().imm(Immediate::B).cpu(CpuFeatures::SSE).ops(&[rw(PQ), src(ED), src(Imm)]),
    );
    t.add(Prefix660F, 0xc4, sse2("pinsrw").imm(Immediate::B).ops(&[rw(VX), src(ED), src(Imm)]));
    t.add(
        Prefix0F,
        0xc5,
        op("pextrw").mod3().imm(Immediate::B).cpu(CpuFeatures::SSE).ops(&[dst(GD), src(QQ), src(Imm)]),
    );
    t.add(Prefix660F, 0xc5, sse2("pextrw").mod3().imm(Immediate::B).ops(&[dst(GD), src(WX), src(Imm)]));

    for (opcode, forms) in [
        (0x71u8, &[(2u8, "psrlw"), (4, "psraw"), (6, "psllw")][..]),
        (0x72, &[(2, "psrld"), (4, "psrad"), (6, "pslld")][..]),
        (0x73, &[(2, "psrlq"), (6, "psllq")][..]),
    ] {
        for &(reg, name) in forms {
            t.add(Prefix0F, opcode, mmx(name).ext(reg).mod3().imm(Immediate::B).ops(&[rw(QQ), src(Imm)]));
            t.add(Prefix660F, opcode, sse2(name).ext(reg).mod3().imm(Immediate::B).ops(&[rw(WX), src(Imm)]));
        }
    }
    t.add(Prefix660F, 0x73, sse2("psrldq").ext(3).mod3().imm(Immediate::B).ops(&[rw(WX), src(Imm)]));
    t.add(Prefix660F, 0x73, sse2("pslldq").ext(7).mod3().imm(Immediate::B).ops(&[rw(WX), src(Imm)]));
}

fn three_byte(t: &mut TableBuilder) {
    const SSSE3: [(u8, &str); 15] = [
        (0x00, "pshufb"),
        (0x01, "phaddw"),
        (0x02, "phaddd"),
        (0x03, "phaddsw"),
        (0x04, "pmaddubsw"),
        (0x05, "phsubw"),
        (0x06, "phsubd"),
        (0x07, "phsubsw"),
        (0x08, "psignb"),
        (0x09, "psignw"),
        (0x0a, "psignd"),
        (0x0b, "pmulhrsw"),
        (0x1c, "pabsb"),
        (0x1d, "pabsw"),
        (0x1e, "pabsd"),
    ];
    for (opcode, name) in SSSE3 {
        t.add(Prefix0F38, opcode, op(name).modrm().cpu(CpuFeatures::SSSE3).ops(&[rw(PQ), src(QQ)]));
        t.add(Prefix660F38, opcode, op(name).modrm().cpu(CpuFeatures::SSSE3).ops(&[rw(VX), src(WX)]));
    }

    const SSE41: [(u8, &str); 29] = [
        (0x10, "pblendvb"),
        (0x14, "blendvps"),
        (0x15, "blendvpd"),
        (0x17, "ptest"),
        (0x20, "pmovsxbw"),
        (0x21, "pmovsxbd"),
        (0x22, "pmovsxbq"),
        (0x23, "pmovsxwd"),
        (0x24, "pmovsxwq"),
        (0x25, "pmovsxdq"),
        (0x28, "pmuldq"),
        (0x29, "pcmpeqq"),
        (0x2b, "packusdw"),
        (0x30, "pmovzxbw"),
        (0x31, "pmovzxbd"),
        (0x32, "pmovzxbq"),
        (0x33, "pmovzxwd"),
        (0x34, "pmovzxwq"),
        (0x35, "pmovzxdq"),
        (0x38, "pminsb"),
        (0x39, "pminsd"),
        (0x3a, "pminuw"),
        (0x3b, "pminud"),
        (0x3c, "pmaxsb"),
        (0x3d, "pmaxsd"),
        (0x3e, "pmaxuw"),
        (0x3f, "pmaxud"),
        (0x40, "pmulld"),
        (0x41, "phminposuw"),
    ];
    for (opcode, name) in SSE41 {
        t.add(Prefix660F38, opcode, op(name).modrm().cpu(CpuFeatures::SSE41).ops(&[rw(VX), src(WX)]));
    }
    t.add(Prefix660F38, 0x37, op("pcmpgtq").modrm().cpu(CpuFeatures::SSE42).ops(&[rw(VX), src(WX)]));
    t.add(
        Prefix660F38,
        0x2a,
        op("movntdqa").mem().cpu(CpuFeatures::SSE41).ops(&[dst(VX), src(M(Width::Xmmword))]),
    );
    t.add(
        Prefix0F38,
        0xf0,
        op("movbe").mem().wvo().cpu(CpuFeatures::MOVBE).ops(&[dst(GV), src(M(Width::OperandSize))]),
    );
    t.add(
        Prefix0F38,
        0xf1,
        op("movbe").mem().wvo().cpu(CpuFeatures::MOVBE).ops(&[dst(M(Width::OperandSize)), src(GV)]),
    );
    t.add(PrefixF20F38, 0xf0, op("crc32").modrm().b().cpu(CpuFeatures::SSE42).ops(&[rw(Reg(GprN)), src(EB)]));
    t.add(PrefixF20F38, 0xf1, op("crc32").modrm().wvo().cpu(CpuFeatures::SSE42).ops(&[rw(Reg(GprN)), src(EV)]));

    let imm8 = |name, feature| op(name).modrm().imm(Immediate::B).cpu(feature);
    t.add(Prefix0F3A, 0x0f, imm8("palignr", CpuFeatures::SSSE3).ops(&[rw(PQ), src(QQ), src(Imm)]));
    t.add(Prefix660F3A, 0x0f, imm8("palignr", CpuFeatures::SSSE3).ops(&[rw(VX), src(WX), src(Imm)]));
    for (opcode, name) in [
        (0x08, "roundps"),
        (0x09, "roundpd"),
        (0x0a, "roundss"),
        (0x0b, "roundsd"),
        (0x0c, "blendps"),
        (0x0d, "blendpd"),
        (0x0e, "pblendw"),
        (0x21, "insertps"),
        (0x40, "dpps"),
        (0x41, "dppd"),
        (0x42, "mpsadbw"),
    ] {
        t.add(Prefix660F3A, opcode, imm8(name, CpuFeatures::SSE41).ops(&[rw(VX), src(WX), src(Imm)]));
    }
    t.add(Prefix660F3A, 0x14, imm8("pextrb", CpuFeatures::SSE41).ops(&[dst(ED), src(VX), src(Imm)]));
    t.add(Prefix660F3A, 0x15, imm8("pextrw", CpuFeatures::SSE41).ops(&[dst(ED), src(VX), src(Imm)]));
    t.add(Prefix660F3A, 0x16, imm8("pextrd", CpuFeatures::SSE41).v().ign66().ops(&[dst(ED), src(VX), src(Imm)]));
    t.add(
        Prefix660F3A,
        0x16,
        imm8("pextrq", CpuFeatures::SSE41)
            .o()
            .flag(InstFlags::USES_REX_W)
            .only64()
            .ops(&[dst(EQ), src(VX), src(Imm)]),
    );
    t.add(Prefix660F3A, 0x17, imm8("extractps", CpuFeatures::SSE41).ops(&[dst(ED), src(VX), src(Imm)]));
    t.add(Prefix660F3A, 0x20, imm8("pinsrb", CpuFeatures::SSE41).ops(&[rw(VX), src(ED), src(Imm)]));
    t.add(Prefix660F3A, 0x22, imm8("pinsrd", CpuFeatures::SSE41).v().ign66().ops(&[rw(VX), src(ED), src(Imm)]));
    t.add(
        Prefix660F3A,
        0x22,
        imm8("pinsrq", CpuFeatures::SSE41)
            .o()
            .flag(InstFlags::USES_REX_W)
            .only64()
            .ops(&[rw(VX), src(EQ), src(Imm)]),
    );
    for (opcode, name) in [(0x60, "pcmpestrm"), (0x61, "pcmpestri"), (0x62, "pcmpistrm"), (0x63, "pcmpistri")] {
        t.add(Prefix660F3A, opcode, imm8(name, CpuFeatures::SSE42).ops(&[src(VX), src(WX), src(Imm)]));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(tables: &DecodeTables, map: OpcodeMap, opcode: u8) -> Vec<&'static str> {
        tables.candidates(map, opcode).iter().map(|d| d.name).collect()
    }

    #[test]
    fn mode_specific_entries_are_filtered() {
        let t32 = DecodeTables::for_mode(ExecutionMode::Bits32);
        let t64 = DecodeTables::for_mode(ExecutionMode::Bits64);
        assert_eq!(names(t32, NoPrefix, 0x40), ["inc"]);
        assert!(t64.candidates(NoPrefix, 0x40).is_empty());
        assert_eq!(names(t32, NoPrefix, 0x63), ["arpl"]);
        assert_eq!(names(t64, NoPrefix, 0x63), ["movsxd"]);
        assert_eq!(names(t64, NoPrefix, 0x98), ["cbw", "cwde", "cdqe"]);
        assert_eq!(names(t32, NoPrefix, 0x98), ["cbw", "cwde"]);
        assert!(t64.candidates(NoPrefix, 0x06).is_empty());
    }

    #[test]
    fn group_opcodes_hold_every_extension() {
        let tables = DecodeTables::for_mode(ExecutionMode::Bits64);
        assert_eq!(names(tables, NoPrefix, 0x80), ALU);
        assert_eq!(names(tables, NoPrefix, 0xc1), SHIFTS);
        assert!(tables.candidates(NoPrefix, 0x82).is_empty());
        let exts: Vec<_> = tables.candidates(NoPrefix, 0xff).iter().map(|d| d.ext).collect();
        assert_eq!(exts.len(), 7);
        assert!(exts.iter().all(|ext| matches!(ext, OpcodeExt::Reg(_))));
    }

    #[test]
    fn descriptors_record_their_slot() {
        let tables = DecodeTables::for_mode(ExecutionMode::Bits64);
        for map in OpcodeMap::ALL {
            for opcode in 0..=255u8 {
                for desc in tables.candidates(map, opcode) {
                    assert_eq!((desc.map, desc.opcode), (map, opcode), "{}", desc.name);
                    assert!(!desc.flags.contains(InstFlags::ONLY_32), "{}", desc.name);
                    if desc.ext != OpcodeExt::None {
                        assert!(desc.uses_modrm(), "{}", desc.name);
                    }
                }
            }
        }
    }

    #[test]
    fn prefix_bytes_have_no_one_byte_entries() {
        let tables = DecodeTables::for_mode(ExecutionMode::Bits64);
        for byte in 0..=255u8 {
            if !tables.prefix_mask(byte).is_empty() {
                assert!(tables.candidates(NoPrefix, byte).is_empty(), "{byte:#x}");
            }
        }
        assert!(tables.candidates(NoPrefix, 0x0f).is_empty());
    }

    #[test]
    fn select_walks_the_fallback_chain() {
        let tables = DecodeTables::for_mode(ExecutionMode::Bits64);
        let nop = tables.select(Prefix660F, &[0x66, 0x0f, 0x1f]).expect("nop");
        assert_eq!((nop.map, nop.length, nop.steps), (Prefix0F, 3, 1));
        assert_eq!(nop.candidates[0].name, "nop");

        let movdqa = tables.select(Prefix660F, &[0x66, 0x0f, 0x6f]).expect("movdqa");
        assert_eq!((movdqa.map, movdqa.steps), (Prefix660F, 0));

        let fld = tables.select(PrefixD9, &[0xd9, 0x00]).expect("fld m32");
        assert_eq!((fld.map, fld.length, fld.steps), (NoPrefix, 1, 1));
        let fld1 = tables.select(PrefixD9, &[0xd9, 0xe8]).expect("fld1");
        assert_eq!((fld1.map, fld1.length), (PrefixD9, 2));
        assert_eq!(fld1.candidates[0].name, "fld1");

        assert!(tables.select(PrefixF30F, &[0xf3, 0x0f, 0x1f]).is_none());
        assert!(tables.select(Prefix0F, &[0x0f, 0x04]).is_none());
    }

    #[test]
    fn hardcoded_trie_is_attached() {
        let tables = DecodeTables::for_mode(ExecutionMode::Bits32);
        assert!(tables.hardcoded().len() > 10);
        assert_eq!(tables.mode(), ExecutionMode::Bits32);
    }
}
