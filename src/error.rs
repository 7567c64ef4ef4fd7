//! Error types for the firmware inspector.
//!
//! Only two things abort an analysis: failing to read the input and an
//! image too short to hold the first two vector table words. Everything a
//! component can get wrong after that is reported inside
//! [`AnalysisResult`](crate::AnalysisResult) using the reason enums below.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Primary error type for the inspector.
#[derive(Debug, Error)]
pub enum InspectError {
    /// IO error during file operations.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// The image is too small to contain a vector table.
    #[error("File too small: expected at least {expected} bytes, got {actual}")]
    FileTooSmall { expected: usize, actual: usize },

    /// The candidate offset table violates its invariants.
    #[error("Invalid offset table: {message}")]
    InvalidOffsetTable { message: String },

    /// Configuration error.
    #[error("Configuration error: {message}")]
    ConfigError { message: String },
}

/// Result type alias for inspector operations.
pub type Result<T> = std::result::Result<T, InspectError>;

/// Reasons a vector table fails its plausibility checks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Error, Serialize, Deserialize)]
#[serde(tag = "fault", content = "value", rename_all = "snake_case")]
pub enum VectorTableFault {
    /// Initial stack pointer is zero.
    #[error("initial stack pointer is 0x00000000")]
    StackPointerZero,

    /// Initial stack pointer reads as erased flash.
    #[error("initial stack pointer is 0xFFFFFFFF (erased flash)")]
    StackPointerErased,

    /// Initial stack pointer is not inside SRAM or a RAM alias.
    #[error("initial stack pointer 0x{0:08X} is outside the SRAM range")]
    StackPointerOutsideRam(u32),

    /// Reset vector reads as erased flash.
    #[error("reset vector is 0xFFFFFFFF (erased flash)")]
    ResetVectorErased,

    /// Reset vector has the Thumb bit clear.
    #[error("reset vector 0x{0:08X} has the Thumb bit clear")]
    ResetVectorNotThumb(u32),

    /// Reset vector points into RAM.
    #[error("reset vector 0x{0:08X} points into RAM")]
    ResetVectorInRam(u32),

    /// Reset vector is neither in flash nor in the boot alias of flash.
    #[error("reset vector 0x{0:08X} is outside the flash range")]
    ResetVectorOutsideFlash(u32),
}

impl VectorTableFault {
    /// True for faults raised by the initial stack pointer check.
    pub fn is_stack_pointer(&self) -> bool {
        matches!(
            self,
            VectorTableFault::StackPointerZero
                | VectorTableFault::StackPointerErased
                | VectorTableFault::StackPointerOutsideRam(_)
        )
    }
}

/// Why the bootloader offset could not be pinned to a single candidate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Error, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnresolvedReason {
    /// No embedded dictionary stream was found to anchor the search.
    #[error("no configuration dictionary stream found to anchor the pointer search")]
    NoDictionaryAnchor,

    /// No candidate's hypothesised pointer occurs in the image.
    #[error("no candidate offset produced a dictionary pointer match")]
    NoMatch,

    /// Every candidate that matched did so too often to be a literal pool entry.
    #[error("every matching candidate exceeded the duplicate literal bound")]
    ExcessiveMatches,
}

/// Reasons the configuration dictionary is unavailable.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[serde(tag = "reason", content = "detail", rename_all = "snake_case")]
pub enum DictionaryError {
    /// The bootloader offset was not resolved, so the stream cannot be located.
    #[error("bootloader offset unresolved; dictionary location unknown")]
    OffsetUnresolved,

    /// The resolved pointer maps outside the image.
    #[error("dictionary pointer maps to file offset 0x{0:X}, outside the image")]
    OutOfBounds(u64),

    /// The stream failed to inflate.
    #[error("decompression failed: {0}")]
    Decompress(String),

    /// The stream inflated past the configured size cap.
    #[error("decompressed dictionary exceeds {0} bytes")]
    TooLarge(usize),

    /// The inflated bytes are not a JSON object.
    #[error("decode failed: {0}")]
    Decode(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = InspectError::FileTooSmall {
            expected: 8,
            actual: 3,
        };
        assert!(err.to_string().contains('8'));
        assert!(err.to_string().contains('3'));
    }

    #[test]
    fn test_fault_display() {
        let fault = VectorTableFault::ResetVectorNotThumb(0x0800_2100);
        assert!(fault.to_string().contains("08002100"));
        assert!(fault.to_string().contains("Thumb"));
    }

    #[test]
    fn test_dictionary_error_serializes_tagged() {
        let err = DictionaryError::Decompress("corrupt deflate stream".to_string());
        let json = serde_json::to_value(&err).unwrap();
        assert_eq!(json["reason"], "decompress");
        assert_eq!(json["detail"], "corrupt deflate stream");
    }
}
