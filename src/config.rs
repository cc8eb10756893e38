//! Decoder configuration
//!
//! The configuration is fixed when a decoder is created: the execution mode
//! picks the prefix and opcode tables, and the CPU feature set disables table
//! entries for extensions the host is not certified to support.

use crate::error::{DecoderError, Result};
use bitflags::bitflags;
use serde::{Deserialize, Serialize};

/// Default instruction bundle size of the sandbox
pub const DEFAULT_BUNDLE_ALIGNMENT: u8 = 32;

/// Processor mode the code will execute in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionMode {
    /// x86-32 protected mode
    Bits32,
    /// x86-64 long mode
    #[default]
    Bits64,
}

impl ExecutionMode {
    /// Width of a general purpose register in bits
    #[inline]
    pub fn bits(self) -> u8 {
        match self {
            ExecutionMode::Bits32 => 32,
            ExecutionMode::Bits64 => 64,
        }
    }

    /// True in long mode
    #[inline]
    pub fn is_64(self) -> bool {
        self == ExecutionMode::Bits64
    }
}

bitflags! {
    /// Instruction-set extensions the decode tables may use
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
    pub struct CpuFeatures: u32 {
        const X87 = 1 << 0;
        const MMX = 1 << 1;
        const SSE = 1 << 2;
        const SSE2 = 1 << 3;
        const SSE3 = 1 << 4;
        const SSSE3 = 1 << 5;
        const SSE41 = 1 << 6;
        const SSE42 = 1 << 7;
        const CMOV = 1 << 8;
        const CX8 = 1 << 9;
        const CX16 = 1 << 10;
        const POPCNT = 1 << 11;
        const LZCNT = 1 << 12;
        const MOVBE = 1 << 13;
        const CLFLUSH = 1 << 14;
        const FXSR = 1 << 15;
        const TSC = 1 << 16;
        const MSR = 1 << 17;
        const SYSCALL = 1 << 18;
        const MONITOR = 1 << 19;
        const CET = 1 << 20;
        const RDTSCP = 1 << 21;
    }
}

impl Default for CpuFeatures {
    fn default() -> Self {
        CpuFeatures::all()
    }
}

/// Settings fixed for the lifetime of a decoder
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DecoderConfig {
    /// Execution mode of the untrusted code
    pub mode: ExecutionMode,
    /// Supported instruction-set extensions
    pub features: CpuFeatures,
    /// Block size used when trimming trailing halts
    pub bundle_alignment: u8,
}

impl Default for DecoderConfig {
    fn default() -> Self {
        Self {
            mode: ExecutionMode::default(),
            features: CpuFeatures::default(),
            bundle_alignment: DEFAULT_BUNDLE_ALIGNMENT,
        }
    }
}

impl DecoderConfig {
    /// Configuration for `mode` with every feature enabled
    pub fn for_mode(mode: ExecutionMode) -> Self {
        Self {
            mode,
            ..Self::default()
        }
    }

    /// Replace the feature set
    pub fn with_features(mut self, features: CpuFeatures) -> Self {
        self.features = features;
        self
    }

    /// Parse and validate a JSON configuration
    pub fn from_json(text: &str) -> Result<Self> {
        let config: DecoderConfig = serde_json::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Serialize to JSON
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Check values serde cannot
    pub fn validate(&self) -> Result<()> {
        if self.bundle_alignment == 0 {
            return Err(DecoderError::ZeroAlignment);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_64bit_with_everything() {
        let config = DecoderConfig::default();
        assert_eq!(config.mode, ExecutionMode::Bits64);
        assert_eq!(config.features, CpuFeatures::all());
        assert_eq!(config.bundle_alignment, 32);
    }

    #[test]
    fn parses_partial_json() {
        let config = DecoderConfig::from_json(r#"{"mode":"bits32","features":"X87 | SSE | SSE2"}"#)
            .expect("valid config");
        assert_eq!(config.mode, ExecutionMode::Bits32);
        assert!(config.features.contains(CpuFeatures::SSE2));
        assert!(!config.features.contains(CpuFeatures::SSE41));
        assert_eq!(config.bundle_alignment, DEFAULT_BUNDLE_ALIGNMENT);
    }

    #[test]
    fn json_round_trip() {
        let config = DecoderConfig::for_mode(ExecutionMode::Bits32)
            .with_features(CpuFeatures::X87 | CpuFeatures::CMOV);
        let text = config.to_json().expect("serialize");
        assert_eq!(DecoderConfig::from_json(&text).expect("parse"), config);
    }

    #[test]
    fn rejects_zero_alignment_and_bad_json() {
        assert!(matches!(
            DecoderConfig::from_json(r#"{"bundle_alignment":0}"#),
            Err(DecoderError::ZeroAlignment)
        ));
        assert!(matches!(
            DecoderConfig::from_json(r#"{"mode":"bits16"}"#),
            Err(DecoderError::Config(_))
        ));
    }
}
