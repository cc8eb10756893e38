//! Table-driven x86 instruction decoder
//!
//! [`Decoder::decode_next`] runs one instruction through a fixed sequence of
//! stages: fixed-sequence match, prefixes, opcode and escape bytes,
//! candidate selection, operand and address size, ModRM, SIB, displacement,
//! immediates, operand translation and flag validation. Each stage either
//! consumes bytes through the instruction cache or rejects the position.
//! The length limit for every read is the smaller of the maximum instruction
//! length and the bytes left in the segment, so no stage reads past the end.

use crate::buffer::{ByteCursor, InstBytes, InstructionByteCache, MAX_INSTRUCTION_LENGTH};
use crate::config::{DecoderConfig, ExecutionMode};
use crate::error::{DecodeReject, RejectReason, Result};
use crate::instruction::{InstFlags, InstructionDescriptor, OpFlags, OpcodeExt, OpcodeMap};
use crate::operands::{Operand, OperandContext};
use crate::prefix::{PrefixDescriptor, PrefixMask};
use crate::segment::CodeSegment;
use crate::tables::DecodeTables;
use log::{debug, trace};
use std::fmt;

/// At least one opcode byte must fit after the prefixes
const MAX_PREFIX_BYTES: usize = MAX_INSTRUCTION_LENGTH - 1;

/// Outcome of one pipeline stage
type Stage<T = ()> = std::result::Result<T, RejectReason>;

/// One accepted instruction
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedInstruction {
    /// Matched table entry
    pub descriptor: &'static InstructionDescriptor,
    /// Virtual address of the first byte
    pub address: u64,
    /// Offset of the first byte within the segment
    pub offset: usize,
    /// Every byte consumed, prefixes included
    pub bytes: InstBytes,
    /// Prefix bytes seen before the opcode
    pub prefix: PrefixDescriptor,
    /// Effective operand size in bytes (0 for fixed sequences)
    pub operand_size: u8,
    /// Effective address size in bits
    pub address_size: u8,
    /// ModRM byte, if the opcode takes one
    pub modrm: Option<u8>,
    /// SIB byte, if the ModRM addressing form calls for one
    pub sib: Option<u8>,
    /// Displacement width in bytes (0, 1, 2 or 4)
    pub num_disp_bytes: u8,
    /// Width of the first immediate in bytes
    pub num_imm_bytes: u8,
    /// Width of the second immediate (`enter`, far pointers)
    pub num_imm2_bytes: u8,
    /// Translated operands in table order, implicit ones included
    pub operands: Vec<Operand>,
    /// Matched as a fixed byte sequence, bypassing the pipeline
    pub hardcoded: bool,
}

impl DecodedInstruction {
    /// Total length in bytes
    #[inline]
    pub fn length(&self) -> usize {
        self.bytes.len()
    }

    #[inline]
    pub fn name(&self) -> &'static str {
        self.descriptor.name
    }

    /// Address of the following instruction
    #[inline]
    pub fn next_address(&self) -> u64 {
        self.address.wrapping_add(self.length() as u64)
    }

    /// True if the prefix class was present
    #[inline]
    pub fn has_prefix(&self, form: PrefixMask) -> bool {
        self.prefix.has(form)
    }
}

impl fmt::Display for DecodedInstruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.has_prefix(PrefixMask::LOCK) {
            f.write_str("lock ")?;
        }
        f.write_str(self.name())?;
        let mut explicit = self.operands.iter().filter(|op| !op.flags.contains(OpFlags::IMPLICIT));
        if let Some(first) = explicit.next() {
            write!(f, " {first}")?;
            for op in explicit {
                write!(f, ", {op}")?;
            }
        }
        Ok(())
    }
}

/// Per-instruction decode state
#[derive(Debug, Clone, Default)]
struct InstState {
    prefix: PrefixDescriptor,
    operand_size: u8,
    address_size: u8,
    modrm: Option<u8>,
    sib: Option<u8>,
    displacement: i64,
    num_disp_bytes: u8,
    imm: u64,
    num_imm_bytes: u8,
    imm2: u64,
    num_imm2_bytes: u8,
    operands: Vec<Operand>,
}

impl InstState {
    /// Forget everything about the current instruction
    fn reset(&mut self) {
        *self = Self::default();
    }

    /// Forget what the previous candidate matched, keeping the prefixes
    fn reset_candidate(&mut self) {
        let prefix = self.prefix;
        self.reset();
        self.prefix = prefix;
    }
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

/// Decoder walking one code segment forward
#[derive(Debug, Clone)]
pub struct Decoder<'a> {
    segment: CodeSegment<'a>,
    config: DecoderConfig,
    tables: &'static DecodeTables,
    cache: InstructionByteCache<'a>,
    state: InstState,
    /// Length limit of the current instruction
    limit: usize,
}

impl<'a> Decoder<'a> {
    /// Decoder positioned at the start of `segment`
    pub fn new(segment: CodeSegment<'a>, config: DecoderConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            segment,
            config,
            tables: DecodeTables::for_mode(config.mode),
            cache: InstructionByteCache::new(ByteCursor::new(segment.bytes())),
            state: InstState::default(),
            limit: 0,
        })
    }

    /// Decoder for `mode` with every CPU feature enabled
    pub fn with_mode(segment: CodeSegment<'a>, mode: ExecutionMode) -> Result<Self> {
        Self::new(segment, DecoderConfig { mode, ..DecoderConfig::default() })
    }

    #[inline]
    pub fn config(&self) -> &DecoderConfig {
        &self.config
    }

    #[inline]
    pub fn segment(&self) -> &CodeSegment<'a> {
        &self.segment
    }

    /// Offset of the next instruction to decode
    #[inline]
    pub fn offset(&self) -> usize {
        self.cache.cursor().inst_start()
    }

    /// True while bytes remain in the segment
    #[inline]
    pub fn has_next(&self) -> bool {
        self.offset() < self.segment.size()
    }

    #[inline]
    fn long_mode(&self) -> bool {
        self.config.mode.is_64()
    }

    /// Decode the instruction at the current offset and move past it.
    ///
    /// On rejection the offset does not move, so calling again yields the
    /// same rejection.
    pub fn decode_next(&mut self) -> std::result::Result<DecodedInstruction, DecodeReject> {
        let offset = self.offset();
        match self.decode_at(offset) {
            Ok(inst) => {
                self.cache.begin_instruction();
                debug!("{:#x}: {} ({} bytes)", inst.address, inst, inst.length());
                Ok(inst)
            }
            Err(reason) => {
                self.cache.reset();
                let reject = DecodeReject {
                    address: self.segment.address_of(offset),
                    offset,
                    reason,
                };
                debug!("{reject}");
                Err(reject)
            }
        }
    }

    fn decode_at(&mut self, offset: usize) -> Stage<DecodedInstruction> {
        let remaining = self.cache.cursor().remaining();
        if remaining == 0 {
            return Err(RejectReason::EndOfSegment);
        }
        self.limit = remaining.min(MAX_INSTRUCTION_LENGTH);
        self.state.reset();
        self.cache.reset();

        if let Some(inst) = self.match_hardcoded(offset) {
            return Ok(inst);
        }

        self.consume_prefixes();
        let map = self.consume_opcode()?;
        trace!("opcode bytes {:02x?} in map {map:?}", self.cache.bytes().as_slice());

        let tables = self.tables;
        let selection = tables
            .select(map, self.cache.bytes().as_slice())
            .ok_or(RejectReason::UnknownOpcode)?;
        if selection.map != map {
            trace!("matched in fallback map {:?}", selection.map);
        }

        // The candidate that got furthest into the bytes names the rejection.
        let features = self.config.features;
        let mut deepest: Option<(usize, RejectReason)> = None;
        for desc in selection.candidates.iter().filter(|desc| desc.is_supported(features)) {
            self.rewind_to(selection.length);
            match self.match_candidate(desc, offset) {
                Ok(()) => {
                    self.check_prefix_hygiene()?;
                    return Ok(self.finish(desc, offset, false));
                }
                Err(why) => {
                    let depth = self.cache.len();
                    trace!("candidate {} rejected after {depth} bytes: {why}", desc.name);
                    if deepest.is_none_or(|(best, _)| depth > best) {
                        deepest = Some((depth, why));
                    }
                }
            }
        }
        Err(deepest.map_or(RejectReason::UnsupportedFeature, |(_, why)| why))
    }

    /// Drop everything read after the first `length` bytes
    fn rewind_to(&mut self, length: usize) {
        self.cache.reset();
        self.cache.read_bytes(length);
        self.state.reset_candidate();
    }

    fn match_hardcoded(&mut self, offset: usize) -> Option<DecodedInstruction> {
        let tables = self.tables;
        let cache = &self.cache;
        let (length, desc) = tables.hardcoded().longest_match(self.limit, |n| cache.byte_at(n))?;
        trace!("fixed sequence {} of {length} bytes", desc.name);
        self.cache.read_bytes(length);
        self.state.address_size = self.config.mode.bits();
        Some(self.finish(desc, offset, true))
    }

    fn consume_prefixes(&mut self) {
        while usize::from(self.state.prefix.count) < MAX_PREFIX_BYTES && self.cache.len() < self.limit {
            let byte = self.cache.peek(0);
            let form = self.tables.prefix_mask(byte);
            if form.is_empty() {
                break;
            }
            self.cache.read_into_cache();
            self.state.prefix.record(byte, form);
            trace!("prefix {byte:02x} {form:?}");
        }
    }

    /// Read one opcode byte, failing at the length limit
    fn read_opcode_byte(&mut self) -> Stage<u8> {
        if self.cache.len() >= self.limit {
            return Err(RejectReason::Truncated);
        }
        Ok(self.cache.read_into_cache())
    }

    /// Consume the opcode and escape bytes, returning the most specific map
    fn consume_opcode(&mut self) -> Stage<OpcodeMap> {
        let byte = self.read_opcode_byte()?;
        if byte == 0x0f {
            let second = self.read_opcode_byte()?;
            let prefix = self.state.prefix;
            let rep = prefix.has(PrefixMask::REP);
            let repne = prefix.has(PrefixMask::REPNE);
            let data16 = prefix.has(PrefixMask::DATA16);
            return match second {
                0x38 => {
                    self.read_opcode_byte()?;
                    match (repne, rep) {
                        (_, true) => Err(RejectReason::UnknownOpcode),
                        (true, false) => Ok(OpcodeMap::PrefixF20F38),
                        _ if data16 => Ok(OpcodeMap::Prefix660F38),
                        _ => Ok(OpcodeMap::Prefix0F38),
                    }
                }
                0x3a => {
                    self.read_opcode_byte()?;
                    if rep || repne {
                        Err(RejectReason::UnknownOpcode)
                    } else if data16 {
                        Ok(OpcodeMap::Prefix660F3A)
                    } else {
                        Ok(OpcodeMap::Prefix0F3A)
                    }
                }
                _ => match (repne, rep) {
                    (true, true) => Err(RejectReason::UnknownOpcode),
                    (true, false) => Ok(OpcodeMap::PrefixF20F),
                    (false, true) => Ok(OpcodeMap::PrefixF30F),
                    _ if data16 => Ok(OpcodeMap::Prefix660F),
                    _ => Ok(OpcodeMap::Prefix0F),
                },
            };
        }
        if let Some(map) = OpcodeMap::x87(byte) {
            // Without room for a second byte only the one-byte forms remain.
            if self.cache.len() < self.limit {
                self.cache.read_into_cache();
                return Ok(map);
            }
        }
        Ok(OpcodeMap::NoPrefix)
    }

    /// Run every per-candidate stage; the cache holds prefixes and opcode on entry
    fn match_candidate(&mut self, desc: &InstructionDescriptor, offset: usize) -> Stage {
        self.resolve_operand_size(desc)?;
        self.resolve_address_size(desc)?;
        self.consume_modrm(desc)?;
        self.consume_sib()?;
        self.consume_displacement()?;
        self.consume_immediates(desc)?;
        self.translate_operands(desc, offset);
        self.validate_flags(desc)
    }

    fn resolve_operand_size(&mut self, desc: &InstructionDescriptor) -> Stage {
        let flags = desc.flags;
        let long_mode = self.long_mode();
        let prefix = &self.state.prefix;
        let size = if flags.contains(InstFlags::OPERAND_SIZE_B) {
            1
        } else if long_mode
            && ((prefix.rex.w() && !flags.contains(InstFlags::SIZE_IGNORES_REX_W)) || flags.contains(InstFlags::FORCE_64))
        {
            8
        } else if prefix.has(PrefixMask::DATA16) && !flags.contains(InstFlags::SIZE_IGNORES_DATA16) {
            2
        } else if long_mode && flags.contains(InstFlags::DEFAULT_IS_64) {
            8
        } else {
            4
        };
        if flags.intersects(InstFlags::OPERAND_SIZES) {
            let class = match size {
                2 => InstFlags::OPERAND_SIZE_W,
                4 => InstFlags::OPERAND_SIZE_V,
                8 => InstFlags::OPERAND_SIZE_O,
                _ => InstFlags::empty(),
            };
            if !flags.intersects(class) {
                return Err(RejectReason::OperandSizeMismatch);
            }
        }
        self.state.operand_size = size;
        Ok(())
    }

    fn resolve_address_size(&mut self, desc: &InstructionDescriptor) -> Stage {
        let addr16 = self.state.prefix.has(PrefixMask::ADDR16);
        let bits = match (self.long_mode(), addr16) {
            (true, false) => 64,
            (true, true) => 32,
            (false, false) => 32,
            (false, true) => 16,
        };
        if desc.flags.intersects(InstFlags::ADDRESS_SIZES) {
            let class = match bits {
                16 => InstFlags::ADDRESS_SIZE_W,
                32 => InstFlags::ADDRESS_SIZE_V,
                _ => InstFlags::ADDRESS_SIZE_O,
            };
            if !desc.flags.intersects(class) {
                return Err(RejectReason::AddressSizeMismatch);
            }
        }
        self.state.address_size = bits;
        Ok(())
    }

    fn consume_modrm(&mut self, desc: &InstructionDescriptor) -> Stage {
        if !desc.uses_modrm() {
            return Ok(());
        }
        if self.cache.len() >= self.limit {
            return Err(RejectReason::Truncated);
        }
        let modrm = self.cache.peek(0);
        let flags = desc.flags;
        if flags.contains(InstFlags::MODRM_MOD_IS_0X3) && modrm_mod(modrm) != 3 {
            return Err(RejectReason::ModRmConstraint);
        }
        if flags.contains(InstFlags::MODRM_MOD_ISNT_0X3) && modrm_mod(modrm) == 3 {
            return Err(RejectReason::ModRmConstraint);
        }
        if flags.contains(InstFlags::MODRM_REG_S_OPERAND) && modrm_reg(modrm) > 5 {
            return Err(RejectReason::ModRmConstraint);
        }
        self.cache.read_into_cache();
        self.state.modrm = Some(modrm);
        match desc.ext {
            OpcodeExt::Reg(reg) if reg != modrm_reg(modrm) => Err(RejectReason::OpcodeExtensionMismatch),
            OpcodeExt::RegRm(reg, rm) if reg != modrm_reg(modrm) || rm != modrm_rm(modrm) => {
                Err(RejectReason::OpcodeExtensionMismatch)
            }
            _ => Ok(()),
        }
    }

    fn consume_sib(&mut self) -> Stage {
        let Some(modrm) = self.state.modrm else {
            return Ok(());
        };
        if self.state.address_size == 16 || modrm_rm(modrm) != 4 || modrm_mod(modrm) == 3 {
            return Ok(());
        }
        if self.cache.len() >= self.limit {
            return Err(RejectReason::Truncated);
        }
        self.state.sib = Some(self.cache.read_into_cache());
        Ok(())
    }

    /// Read `width` bytes into the cache, returning where they start
    fn read_field(&mut self, width: usize) -> Stage<usize> {
        let start = self.cache.len();
        if start + width > self.limit {
            return Err(RejectReason::Truncated);
        }
        self.cache.read_bytes(width);
        Ok(start)
    }

    fn consume_displacement(&mut self) -> Stage {
        let Some(modrm) = self.state.modrm else {
            return Ok(());
        };
        let (mode, rm) = (modrm_mod(modrm), modrm_rm(modrm));
        let width = if self.state.address_size == 16 {
            match (mode, rm) {
                (0, 6) => 2,
                (1, _) => 1,
                (2, _) => 2,
                _ => 0,
            }
        } else {
            let sib_base = self.state.sib.map(|sib| sib & 7);
            match mode {
                0 if rm == 5 || sib_base == Some(5) => 4,
                1 => 1,
                2 => 4,
                _ => 0,
            }
        };
        if width == 0 {
            return Ok(());
        }
        let start = self.read_field(width)?;
        self.state.displacement = self.cache.view().offset(start).read_signed(width);
        self.state.num_disp_bytes = width as u8;
        Ok(())
    }

    fn consume_immediates(&mut self, desc: &InstructionDescriptor) -> Stage {
        let (operand_size, address_size) = (self.state.operand_size, self.state.address_size);
        let width = desc.imm.bytes(operand_size, address_size);
        if width > 0 {
            let start = self.read_field(width)?;
            self.state.imm = self.cache.view().offset(start).read_unsigned(width);
            self.state.num_imm_bytes = width as u8;
        }
        let width = desc.imm2.bytes(operand_size, address_size);
        if width > 0 {
            let start = self.read_field(width)?;
            self.state.imm2 = self.cache.view().offset(start).read_unsigned(width);
            self.state.num_imm2_bytes = width as u8;
        }
        Ok(())
    }

    fn translate_operands(&mut self, desc: &InstructionDescriptor, offset: usize) {
        let state = &self.state;
        let context = OperandContext {
            long_mode: self.long_mode(),
            operand_size: state.operand_size,
            address_size: state.address_size,
            rex: state.prefix.rex,
            prefixes: state.prefix.mask,
            modrm: state.modrm,
            sib: state.sib,
            displacement: state.displacement,
            imm: state.imm,
            imm_bytes: state.num_imm_bytes,
            imm2: state.imm2,
            imm2_bytes: state.num_imm2_bytes,
            opcode: desc.opcode,
            next_address: self.segment.address_of(offset + self.cache.len()),
        };
        self.state.operands = context.translate_all(&desc.operands);
    }

    fn validate_flags(&self, desc: &InstructionDescriptor) -> Stage {
        let prefix = &self.state.prefix;
        if prefix.has(PrefixMask::LOCK) {
            let locks_memory = desc.flags.contains(InstFlags::LOCKABLE)
                && self.state.operands.iter().any(|op| op.is_dest() && op.is_memory());
            if !locks_memory {
                return Err(RejectReason::IllegalLock);
            }
        }
        if prefix.has(PrefixMask::REX) {
            if desc.flags.contains(InstFlags::USES_REX_W) && !prefix.rex.w() {
                return Err(RejectReason::RexMismatch);
            }
            if desc.flags.contains(InstFlags::HAS_REX_R) && !prefix.rex.r() {
                return Err(RejectReason::RexMismatch);
            }
        }
        Ok(())
    }

    fn check_prefix_hygiene(&self) -> Stage {
        let prefix = &self.state.prefix;
        if prefix.rex_count > 1 {
            Err(RejectReason::MultipleRexPrefixes)
        } else if prefix.rex_not_last {
            Err(RejectReason::RexNotLast)
        } else if prefix.has_duplicates {
            Err(RejectReason::DuplicatePrefix)
        } else if prefix.has_ambiguous_segment {
            Err(RejectReason::AmbiguousSegmentPrefix)
        } else {
            Ok(())
        }
    }

    fn finish(&mut self, desc: &'static InstructionDescriptor, offset: usize, hardcoded: bool) -> DecodedInstruction {
        let state = &mut self.state;
        DecodedInstruction {
            descriptor: desc,
            address: self.segment.address_of(offset),
            offset,
            bytes: *self.cache.bytes(),
            prefix: state.prefix,
            operand_size: state.operand_size,
            address_size: state.address_size,
            modrm: state.modrm,
            sib: state.sib,
            num_disp_bytes: state.num_disp_bytes,
            num_imm_bytes: state.num_imm_bytes,
            num_imm2_bytes: state.num_imm2_bytes,
            operands: std::mem::take(&mut state.operands),
            hardcoded,
        }
    }
}
