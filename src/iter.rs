//! Walking a whole segment
//!
//! [`InstIter`] wraps a [`Decoder`] and stops for good at the first
//! rejection: once a position fails to decode, the decoder's notion of where
//! the next instruction starts can no longer be trusted.

use crate::config::DecoderConfig;
use crate::disasm::{DecodedInstruction, Decoder};
use crate::error::{DecodeReject, Result};
use crate::segment::CodeSegment;
use std::iter::FusedIterator;

/// Instruction iterator over one code segment
#[derive(Debug, Clone)]
pub struct InstIter<'a> {
    decoder: Decoder<'a>,
    /// Instructions accepted so far
    decoded: usize,
    rejected: Option<DecodeReject>,
}

impl<'a> InstIter<'a> {
    /// Iterator from the start of `segment`
    pub fn new(segment: CodeSegment<'a>, config: DecoderConfig) -> Result<Self> {
        Ok(Self::from_decoder(Decoder::new(segment, config)?))
    }

    /// Continue from wherever `decoder` currently is
    pub fn from_decoder(decoder: Decoder<'a>) -> Self {
        Self {
            decoder,
            decoded: 0,
            rejected: None,
        }
    }

    /// True if another instruction can be decoded
    #[inline]
    pub fn has_next(&self) -> bool {
        self.rejected.is_none() && self.decoder.has_next()
    }

    /// Decode the next instruction. After a rejection, returns that rejection again.
    pub fn decode_next(&mut self) -> std::result::Result<DecodedInstruction, DecodeReject> {
        if let Some(reject) = self.rejected {
            return Err(reject);
        }
        match self.decoder.decode_next() {
            Ok(inst) => {
                self.decoded += 1;
                Ok(inst)
            }
            Err(reject) => {
                self.rejected = Some(reject);
                Err(reject)
            }
        }
    }

    /// Number of instructions accepted so far
    #[inline]
    pub fn decoded_count(&self) -> usize {
        self.decoded
    }

    /// Offset of the current instruction
    #[inline]
    pub fn offset(&self) -> usize {
        self.decoder.offset()
    }

    /// The rejection that ended the walk, if any
    #[inline]
    pub fn rejection(&self) -> Option<&DecodeReject> {
        self.rejected.as_ref()
    }
}

impl Iterator for InstIter<'_> {
    type Item = std::result::Result<DecodedInstruction, DecodeReject>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.has_next() {
            Some(self.decode_next())
        } else {
            None
        }
    }
}

impl FusedIterator for InstIter<'_> {}
