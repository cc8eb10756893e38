//! Error handling for sfi_decoder_rs
//!
//! Two classes of failure exist. A [`DecodeReject`] is the ordinary outcome
//! "no valid instruction at this position" and is returned to the validator.
//! An [`InternalError`] means the decode tables or the pipeline broke one of
//! their own invariants; it is never returned, it aborts through
//! [`internal_error`].

use thiserror::Error;

/// Result type for decoder operations that are not per-instruction decodes
pub type Result<T> = std::result::Result<T, DecoderError>;

/// Reason codes attached to a rejected instruction position
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(i32)]
pub enum RejectReason {
    /// Unknown reason (should not be returned)
    Unknown = -1,

    /// The instruction runs past the end of the code segment
    Truncated = 1,

    /// No table entry exists for the opcode bytes under any prefix class
    UnknownOpcode = 2,

    /// Every candidate for the opcode needs a CPU feature that is disabled
    UnsupportedFeature = 3,

    /// The derived operand size is not one the candidate accepts
    OperandSizeMismatch = 4,

    /// The derived address size is not one the candidate accepts
    AddressSizeMismatch = 5,

    /// The ModRM `mod`/`reg` fields violate the candidate's constraints
    ModRmConstraint = 6,

    /// The opcode extension held in ModRM does not match the candidate
    OpcodeExtensionMismatch = 7,

    /// The SIB byte encodes a reserved form. Reserved: a SIB byte only
    /// follows ModRM with `mod != 3`, and every base/index pairing there is
    /// valid, so the decoder never reports it.
    InvalidSib = 8,

    /// LOCK prefix on an instruction that does not allow it
    IllegalLock = 9,

    /// REX.W / REX.R bits inconsistent with the candidate
    RexMismatch = 10,

    /// The same prefix byte class appears twice
    DuplicatePrefix = 11,

    /// More than one distinct segment override prefix
    AmbiguousSegmentPrefix = 12,

    /// More than one REX prefix
    MultipleRexPrefixes = 13,

    /// A legacy prefix follows a REX prefix
    RexNotLast = 14,

    /// Decode requested with no bytes left in the segment
    EndOfSegment = 15,
}

impl RejectReason {
    /// Convert reason to string representation
    pub fn as_str(self) -> &'static str {
        match self {
            RejectReason::Unknown => "Unknown rejection",
            RejectReason::Truncated => "Instruction truncated by end of segment",
            RejectReason::UnknownOpcode => "Unrecognized opcode",
            RejectReason::UnsupportedFeature => "Instruction requires unsupported CPU feature",
            RejectReason::OperandSizeMismatch => "Operand size not allowed",
            RejectReason::AddressSizeMismatch => "Address size not allowed",
            RejectReason::ModRmConstraint => "ModRM byte not allowed",
            RejectReason::OpcodeExtensionMismatch => "Opcode extension mismatch",
            RejectReason::InvalidSib => "Invalid SIB byte",
            RejectReason::IllegalLock => "Illegal LOCK prefix",
            RejectReason::RexMismatch => "REX prefix does not match instruction",
            RejectReason::DuplicatePrefix => "Duplicate prefix",
            RejectReason::AmbiguousSegmentPrefix => "Ambiguous segment prefix",
            RejectReason::MultipleRexPrefixes => "Multiple REX prefixes",
            RejectReason::RexNotLast => "REX prefix must immediately precede the opcode",
            RejectReason::EndOfSegment => "No bytes left in segment",
        }
    }

    /// Convert from numeric reason code
    pub fn from_code(code: i32) -> Self {
        match code {
            1 => RejectReason::Truncated,
            2 => RejectReason::UnknownOpcode,
            3 => RejectReason::UnsupportedFeature,
            4 => RejectReason::OperandSizeMismatch,
            5 => RejectReason::AddressSizeMismatch,
            6 => RejectReason::ModRmConstraint,
            7 => RejectReason::OpcodeExtensionMismatch,
            8 => RejectReason::InvalidSib,
            9 => RejectReason::IllegalLock,
            10 => RejectReason::RexMismatch,
            11 => RejectReason::DuplicatePrefix,
            12 => RejectReason::AmbiguousSegmentPrefix,
            13 => RejectReason::MultipleRexPrefixes,
            14 => RejectReason::RexNotLast,
            15 => RejectReason::EndOfSegment,
            _ => RejectReason::Unknown,
        }
    }

    /// Numeric code of the reason
    pub fn code(self) -> i32 {
        self as i32
    }
}

impl std::fmt::Display for RejectReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// No valid instruction at this position
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("no valid instruction at {address:#x} (offset {offset}): {reason}")]
pub struct DecodeReject {
    /// Virtual address of the rejected position
    pub address: u64,
    /// Offset of the rejected position from the segment start
    pub offset: usize,
    /// Why the position was rejected
    pub reason: RejectReason,
}

/// Errors outside of per-instruction decoding
#[derive(Debug, Error)]
pub enum DecoderError {
    /// `base + size` does not fit in the address width
    #[error("code segment at {base:#x} with size {size:#x} overflows the address space")]
    AddressOverflow { base: u64, size: usize },

    /// Bundle alignment of zero cannot be rounded to
    #[error("bundle alignment must be non-zero")]
    ZeroAlignment,

    /// Requested size is larger than the segment
    #[error("cannot resize segment of {size} bytes to {requested} bytes")]
    InvalidResize { size: usize, requested: usize },

    /// Configuration could not be parsed
    #[error("invalid decoder configuration: {0}")]
    Config(#[from] serde_json::Error),

    /// A position in the segment did not decode
    #[error(transparent)]
    Reject(#[from] DecodeReject),
}

/// Invariant violations inside the decoder itself
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum InternalError {
    /// More than the maximum instruction length was pulled into the cache
    #[error("internal error: instruction buffer overflow")]
    InstBufferOverflow,

    /// A cache view reached past the bytes recorded for the instruction
    #[error("internal error: read past end of instruction buffer (index {index}, length {length})")]
    InstBufferUnderread { index: usize, length: usize },

    /// Unsupported integer width requested from a cache view
    #[error("internal error: unsupported integer width {0}")]
    BadIntegerWidth(usize),
}

/// Report an internal invariant violation and abort decoding.
///
/// Continuing with a corrupted instruction cache would make every later
/// validation decision unreliable, so this never returns.
#[cold]
#[track_caller]
pub fn internal_error(error: InternalError) -> ! {
    log::error!("*ERROR* {error}");
    panic!("{error}");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reason_codes_round_trip() {
        for code in 1..=15 {
            let reason = RejectReason::from_code(code);
            assert_ne!(reason, RejectReason::Unknown);
            assert_eq!(reason.code(), code);
        }
        assert_eq!(RejectReason::from_code(99), RejectReason::Unknown);
        assert_eq!(RejectReason::from_code(0), RejectReason::Unknown);
    }

    #[test]
    fn reject_display_mentions_reason() {
        let reject = DecodeReject {
            address: 0x1000,
            offset: 4,
            reason: RejectReason::IllegalLock,
        };
        let text = reject.to_string();
        assert!(text.contains("0x1000"));
        assert!(text.contains("Illegal LOCK prefix"));
    }

    #[test]
    #[should_panic(expected = "instruction buffer overflow")]
    fn internal_error_panics() {
        internal_error(InternalError::InstBufferOverflow);
    }
}
