//! Klipper Inspect - static analysis of Cortex-M Klipper firmware images
//!
//! This library recovers three facts from a flat firmware binary built for
//! an STM32/GD32-class Cortex-M microcontroller running Klipper:
//!
//! - **Vector table validity**: whether the image starts with a plausible
//!   initial stack pointer and Thumb reset handler
//! - **Bootloader offset**: the flash address the image was linked for,
//!   recovered from the literal pool pointer to the build dictionary
//! - **Build dictionary**: the zlib-compressed JSON the firmware embeds,
//!   with its MCU, clock, pin and serial settings
//!
//! The three components are independent functions over a shared read-only
//! [`FirmwareImage`]; only dictionary extraction consumes another
//! component's output.
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use klipper_inspect::{analyze_file, summary};
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let result = analyze_file("klipper.bin")?;
//!     println!("{}", summary::verdict(&result).title);
//!     if let Some(offset) = result.bootloader_offset() {
//!         println!("Bootloader offset: 0x{:04X}", offset);
//!     }
//!     if let Some(mcu) = result.config().and_then(|d| d.mcu()) {
//!         println!("MCU: {}", mcu);
//!     }
//!     Ok(())
//! }
//! ```
//!
//! # Pinning the dictionary position
//!
//! By default the dictionary stream is found by scanning the image. When
//! the build places it at a known file offset, pin it instead:
//!
//! ```rust
//! use klipper_inspect::{analyze_bytes_with_options, AnalyzerOptions};
//!
//! let mut image = vec![0u8; 0x1000];
//! image[0..4].copy_from_slice(&0x2000_1000u32.to_le_bytes());
//! image[4..8].copy_from_slice(&0x0800_2101u32.to_le_bytes());
//!
//! let options = AnalyzerOptions::new().with_dictionary_offset(0x0800);
//! let result = analyze_bytes_with_options(&image, &options).unwrap();
//! assert!(result.vector_table_valid());
//! assert!(result.bootloader_offset().is_none());
//! ```

#![warn(missing_docs)]
#![deny(unsafe_code)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::cast_possible_truncation)]

#[cfg(feature = "batch")]
pub mod batch;
pub mod cortex_m;
pub mod dictionary;
pub mod error;
pub mod formatter;
pub mod offsets;
pub mod resolver;
pub mod summary;
pub mod types;

#[cfg(test)]
pub(crate) mod fixtures;

pub use cortex_m::vector_table::{VectorTable, VectorTableReport, VectorTableVerdict};
pub use cortex_m::{MemoryMap, Region};
pub use dictionary::{extract_dictionary, ConfigDictionary, DictionaryOutcome};
pub use error::{DictionaryError, InspectError, Result, UnresolvedReason, VectorTableFault};
pub use offsets::{OffsetCandidate, OffsetTable};
pub use resolver::{resolve_offset, CandidateProbe, OffsetResolution, ResolvedOffset};
pub use types::{
    AnalysisResult, AnalyzerOptions, DictionaryLocation, FirmwareImage, Note, NoteLevel,
};

use std::path::Path;

/// Analyze a firmware file by path.
///
/// # Example
///
/// ```rust,no_run
/// use klipper_inspect::analyze_file;
///
/// let result = analyze_file("out/klipper.bin")?;
/// println!("vector table valid: {}", result.vector_table_valid());
/// # Ok::<(), klipper_inspect::InspectError>(())
/// ```
pub fn analyze_file<P: AsRef<Path>>(path: P) -> Result<AnalysisResult> {
    let data = std::fs::read(path)?;
    analyze_bytes(&data)
}

/// Analyze an in-memory image with default options.
pub fn analyze_bytes(data: &[u8]) -> Result<AnalysisResult> {
    analyze_bytes_with_options(data, &AnalyzerOptions::new())
}

/// Analyze an in-memory image.
///
/// Fails only for invalid options or an image too short to hold the MSP and
/// reset words. Component failures are reported inside the result; an
/// invalid vector table, for instance, does not stop the offset resolver.
pub fn analyze_bytes_with_options(
    data: &[u8],
    options: &AnalyzerOptions,
) -> Result<AnalysisResult> {
    options.validate()?;
    let image = FirmwareImage::new(data)?;

    let vector_table = validate_vector_table(&image, options);
    let offset = resolve_offset(&image, options);
    let dictionary = extract_dictionary(&image, &offset, options);
    let notes = collect_notes(&vector_table, &offset, &dictionary);

    Ok(AnalysisResult {
        image_len: image.len(),
        vector_table,
        offset,
        dictionary,
        notes,
    })
}

/// Validate the vector table at the start of the image.
pub fn validate_vector_table(
    image: &FirmwareImage<'_>,
    options: &AnalyzerOptions,
) -> VectorTableReport {
    cortex_m::vector_table::validate(image, &options.memory, options.vector_table_words)
}

fn collect_notes(
    vector_table: &VectorTableReport,
    offset: &OffsetResolution,
    dictionary: &DictionaryOutcome,
) -> Vec<Note> {
    let mut notes = Vec::new();

    for fault in vector_table.verdict.faults() {
        notes.push(Note::error(fault.to_string()).with_context("vector_table"));
    }
    if offset.image_origin != 0 {
        notes.push(
            Note::info(format!(
                "full flash dump: application vector table at file offset 0x{:X}",
                offset.image_origin
            ))
            .with_context("vector_table"),
        );
    }

    let rejected: Vec<String> = offset
        .probes
        .iter()
        .filter(|p| p.rejected)
        .map(|p| format!("0x{:04X} ({} hits)", p.candidate.offset, p.matches.len()))
        .collect();
    if !rejected.is_empty() {
        notes.push(
            Note::warning(format!(
                "discarded coincidental pointer matches for {}",
                rejected.join(", ")
            ))
            .with_context("resolver"),
        );
    }

    match &offset.outcome {
        ResolvedOffset::Resolved { matches, .. } if matches.len() > 1 => notes.push(
            Note::info(format!(
                "dictionary pointer duplicated in {} literal pools",
                matches.len()
            ))
            .with_context("resolver"),
        ),
        ResolvedOffset::Resolved { .. } => {}
        ResolvedOffset::Ambiguous { candidates } => {
            let offsets: Vec<String> = candidates
                .iter()
                .map(|c| format!("0x{:04X}", c.offset))
                .collect();
            notes.push(
                Note::warning(format!(
                    "ambiguous bootloader offset; candidates {} all matched",
                    offsets.join(", ")
                ))
                .with_context("resolver"),
            );
        }
        ResolvedOffset::Unresolved { reason } => {
            notes.push(Note::warning(reason.to_string()).with_context("resolver"));
        }
    }

    match dictionary.error() {
        None | Some(DictionaryError::OffsetUnresolved) => {}
        Some(err) => notes.push(Note::error(err.to_string()).with_context("dictionary")),
    }

    notes
}

/// Get version information for this library.
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
