//! sfi-decoder-rs: the instruction decoder core of an x86 SFI validator
//!
//! Untrusted code is checked at load time, one instruction at a time. This
//! crate is the part of that validator that turns raw segment bytes into
//! instructions: it finds where each instruction starts and ends, which
//! table entry it matched, and what sizes and operands it resolved to.
//! Sandbox policy is left to the caller.
//!
//! # Features
//!
//! - **Table driven**: static per-mode decode tables with an explicit
//!   prefix-class fallback chain, shared by every decoder.
//! - **Strict**: anything the tables do not describe, anything truncated by
//!   the segment end, and ambiguous prefix combinations are rejected.
//! - **x86-32 and x86-64**: one table set per execution mode.
//! - **Halt trimming**: trailing `hlt` padding of the last segment can be
//!   cut down before validation.
//!
//! # Example
//!
//! ```rust
//! use sfi_decoder_rs::*;
//!
//! fn main() -> Result<()> {
//!     // push rbp; mov rbp, rsp; pop rbp; ret
//!     let code = [0x55, 0x48, 0x89, 0xe5, 0x5d, 0xc3];
//!     let segment = CodeSegment::new(&code, 0x10000)?;
//!
//!     let mut decoder = Decoder::new(segment, DecoderConfig::for_mode(ExecutionMode::Bits64))?;
//!     while decoder.has_next() {
//!         let inst = decoder.decode_next()?;
//!         println!("{:#x}: {}", inst.address, inst);
//!     }
//!     Ok(())
//! }
//! ```
//!
//! # Threading
//!
//! A [`Decoder`] walks one segment on one thread. The decode tables are
//! built once per mode and are read-only afterwards, so any number of
//! decoders may run in parallel on separate segments.

pub mod buffer;
pub mod config;
pub mod disasm;
pub mod error;
pub mod halt_trim;
pub mod hardcoded;
pub mod instruction;
pub mod iter;
pub mod operands;
pub mod prefix;
pub mod segment;
pub mod tables;

// Re-export the main API
pub use buffer::{ByteCursor, CacheView, InstructionByteCache, MAX_INSTRUCTION_LENGTH};
pub use config::{CpuFeatures, DecoderConfig, ExecutionMode};
pub use disasm::{DecodedInstruction, Decoder};
pub use error::{DecodeReject, DecoderError, RejectReason, Result};
pub use halt_trim::{trim_halts, trim_segment};
pub use iter::InstIter;
pub use segment::CodeSegment;
pub use tables::DecodeTables;

/// Library version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Get library information
pub fn get_version() -> &'static str {
    VERSION
}
