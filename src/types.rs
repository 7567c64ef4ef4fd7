//! Core types for the firmware inspector.
//!
//! This module defines the borrowed image view every component reads from,
//! the options that configure an analysis, and the aggregate result handed
//! to formatters.

use byteorder::{ByteOrder, LittleEndian};
use memchr::memmem;
use serde::{Deserialize, Serialize};

use crate::cortex_m::vector_table::VectorTableReport;
use crate::cortex_m::MemoryMap;
use crate::dictionary::{ConfigDictionary, DictionaryOutcome};
use crate::error::{InspectError, Result};
use crate::offsets::{OffsetCandidate, OffsetTable};
use crate::resolver::{OffsetResolution, ResolvedOffset};

/// Read-only view over a flat firmware image.
///
/// The orchestrator owns the bytes; every component borrows this view and
/// none of them ever writes through it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FirmwareImage<'a> {
    data: &'a [u8],
}

impl<'a> FirmwareImage<'a> {
    /// Smallest image that still holds the MSP and reset words.
    pub const MIN_LEN: usize = 8;

    /// Wrap a byte buffer, rejecting buffers too short for a vector table.
    pub fn new(data: &'a [u8]) -> Result<Self> {
        if data.len() < Self::MIN_LEN {
            return Err(InspectError::FileTooSmall {
                expected: Self::MIN_LEN,
                actual: data.len(),
            });
        }
        Ok(Self { data })
    }

    /// The underlying bytes.
    pub fn bytes(&self) -> &'a [u8] {
        self.data
    }

    /// Image length in bytes.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Always false for a constructed image; present for API symmetry.
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Read a little-endian word at `offset`, if it fits.
    pub fn read_u32(&self, offset: usize) -> Option<u32> {
        let end = offset.checked_add(4)?;
        self.data.get(offset..end).map(LittleEndian::read_u32)
    }

    /// Bytes from `offset` to the end of the image.
    pub fn tail(&self, offset: usize) -> Option<&'a [u8]> {
        self.data.get(offset..)
    }

    /// Every file offset at which `value` occurs as a little-endian word.
    ///
    /// Overlapping and unaligned occurrences are all reported, ascending.
    pub fn find_u32(&self, value: u32) -> Vec<usize> {
        let mut needle = [0u8; 4];
        LittleEndian::write_u32(&mut needle, value);

        let finder = memmem::Finder::new(&needle);
        let mut hits = Vec::new();
        let mut pos = 0;
        while let Some(hit) = finder.find(&self.data[pos..]) {
            hits.push(pos + hit);
            pos += hit + 1;
        }
        hits
    }
}

/// Where the configuration dictionary's compressed stream starts in the file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "mode", content = "offset", rename_all = "snake_case")]
pub enum DictionaryLocation {
    /// Recover the position by scanning for a zlib stream holding a dictionary.
    #[default]
    Scan,
    /// Use a fixed file offset taken from the firmware's build convention.
    Fixed(u32),
}

/// Options for analysis behavior.
#[derive(Debug, Clone, PartialEq)]
pub struct AnalyzerOptions {
    /// Target memory layout
    pub memory: MemoryMap,
    /// Known bootloader offsets searched by the resolver
    pub offsets: OffsetTable,
    /// How the dictionary stream is anchored
    pub dictionary: DictionaryLocation,
    /// Most duplicate literal-pool hits one candidate may produce
    pub max_literal_matches: usize,
    /// Cap on inflated dictionary size
    pub max_dictionary_size: usize,
    /// Vector table words captured for display
    pub vector_table_words: usize,
}

impl Default for AnalyzerOptions {
    fn default() -> Self {
        Self::new()
    }
}

impl AnalyzerOptions {
    /// Create options with default settings.
    pub fn new() -> Self {
        Self {
            memory: MemoryMap::stm32(),
            offsets: OffsetTable::klipper(),
            dictionary: DictionaryLocation::Scan,
            max_literal_matches: 8,
            max_dictionary_size: 1024 * 1024, // 1MB
            vector_table_words: 16,
        }
    }

    /// Create options that accept only a single literal match per candidate.
    pub fn strict() -> Self {
        Self {
            max_literal_matches: 1,
            ..Self::new()
        }
    }

    /// Pin the dictionary to a fixed file offset.
    pub fn with_dictionary_offset(mut self, offset: u32) -> Self {
        self.dictionary = DictionaryLocation::Fixed(offset);
        self
    }

    /// Replace the candidate table.
    pub fn with_offsets(mut self, offsets: OffsetTable) -> Self {
        self.offsets = offsets;
        self
    }

    /// Replace the memory map.
    pub fn with_memory(mut self, memory: MemoryMap) -> Self {
        self.memory = memory;
        self
    }

    /// Check option values that would make an analysis meaningless.
    pub fn validate(&self) -> Result<()> {
        if self.vector_table_words < 2 {
            return Err(InspectError::ConfigError {
                message: format!(
                    "vector_table_words must be at least 2, got {}",
                    self.vector_table_words
                ),
            });
        }
        if self.max_literal_matches == 0 {
            return Err(InspectError::ConfigError {
                message: "max_literal_matches must be at least 1".to_string(),
            });
        }
        if self.max_dictionary_size == 0 {
            return Err(InspectError::ConfigError {
                message: "max_dictionary_size must be non-zero".to_string(),
            });
        }
        self.memory.validate()
    }
}

/// Complete analysis of one firmware image.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisResult {
    /// Image size in bytes
    pub image_len: usize,
    /// Vector table verdict and raw words
    pub vector_table: VectorTableReport,
    /// Bootloader offset resolution with per-candidate evidence
    pub offset: OffsetResolution,
    /// Decoded configuration dictionary, or why it is unavailable
    pub dictionary: DictionaryOutcome,
    /// Analysis notes and warnings
    pub notes: Vec<Note>,
}

impl AnalysisResult {
    /// The resolved bootloader candidate, if exactly one matched.
    pub fn bootloader(&self) -> Option<&OffsetCandidate> {
        match &self.offset.outcome {
            ResolvedOffset::Resolved { candidate, .. } => Some(candidate),
            _ => None,
        }
    }

    /// The resolved bootloader offset in bytes.
    pub fn bootloader_offset(&self) -> Option<u32> {
        self.bootloader().map(|c| c.offset)
    }

    /// The resolved flash link base.
    pub fn link_base(&self) -> Option<u32> {
        match &self.offset.outcome {
            ResolvedOffset::Resolved { link_base, .. } => Some(*link_base),
            _ => None,
        }
    }

    /// The decoded dictionary, if extraction succeeded.
    pub fn config(&self) -> Option<&ConfigDictionary> {
        self.dictionary.dictionary()
    }

    /// True when the vector table passed its plausibility checks.
    pub fn vector_table_valid(&self) -> bool {
        self.vector_table.verdict.is_valid()
    }
}

/// Analysis note or warning.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Note {
    /// Severity level
    pub level: NoteLevel,
    /// Note message
    pub message: String,
    /// Optional context (e.g., "resolver")
    pub context: Option<String>,
}

impl Note {
    /// Create an info note.
    pub fn info(message: impl Into<String>) -> Self {
        Self {
            level: NoteLevel::Info,
            message: message.into(),
            context: None,
        }
    }

    /// Create a warning note.
    pub fn warning(message: impl Into<String>) -> Self {
        Self {
            level: NoteLevel::Warning,
            message: message.into(),
            context: None,
        }
    }

    /// Create an error note.
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            level: NoteLevel::Error,
            message: message.into(),
            context: None,
        }
    }

    /// Add context to the note.
    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        self.context = Some(context.into());
        self
    }
}

/// Note severity level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NoteLevel {
    /// Informational
    Info,
    /// Warning (non-fatal issue)
    Warning,
    /// Error (component failed, analysis continued)
    Error,
}
