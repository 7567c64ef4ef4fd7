//! Bootloader offset resolution.
//!
//! The link base of a flat image is recorded nowhere in the file. Klipper's
//! identify command handler, however, loads the absolute flash address of
//! the compressed build dictionary from a literal pool. That address is
//! `flash_base + bootloader_offset + dictionary_offset`, so for each known
//! bootloader offset we compute the address the literal *would* hold and
//! search the image for it. The right candidate finds its literal; the
//! wrong ones compute arbitrary addresses that do not occur.
//!
//! Two simpler methods are deliberately absent. Rounding the reset handler
//! down to a page fails because the compiler places it anywhere. Taking the
//! lowest flash-looking word fails because data coincidentally matches.

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::cortex_m::vector_table;
use crate::dictionary::find_dictionary_stream;
use crate::error::UnresolvedReason;
use crate::offsets::OffsetCandidate;
use crate::types::{AnalyzerOptions, DictionaryLocation, FirmwareImage};

/// Evidence gathered for one candidate offset.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CandidateProbe {
    /// The candidate tested
    pub candidate: OffsetCandidate,
    /// Hypothesised link base, `flash_base + offset`
    pub link_base: u32,
    /// Address the dictionary pointer would hold, if representable
    pub dictionary_address: Option<u32>,
    /// File offsets where that address occurs, ascending
    pub matches: Vec<usize>,
    /// Matches exceeded the duplicate literal bound and were discarded
    pub rejected: bool,
}

impl CandidateProbe {
    /// True when this probe counts as evidence for its candidate.
    pub fn is_hit(&self) -> bool {
        !self.matches.is_empty() && !self.rejected
    }
}

/// Decision over all probes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ResolvedOffset {
    /// Exactly one candidate matched
    Resolved {
        /// The matching candidate
        candidate: OffsetCandidate,
        /// Flash link base of the application
        link_base: u32,
        /// Absolute address of the dictionary stream
        dictionary_address: u32,
        /// File offsets of the pointer literal
        matches: Vec<usize>,
    },
    /// Two or more distinct candidates matched; none is picked
    ///
    /// Match locations stay in [`OffsetResolution::probes`].
    Ambiguous {
        /// Every candidate with at least one match, rejected ones included, ascending
        candidates: Vec<OffsetCandidate>,
    },
    /// No candidate could be confirmed
    Unresolved {
        /// Why
        reason: UnresolvedReason,
    },
}

impl ResolvedOffset {
    /// True for [`ResolvedOffset::Resolved`].
    pub fn is_resolved(&self) -> bool {
        matches!(self, ResolvedOffset::Resolved { .. })
    }
}

/// Full resolver output: decision plus the evidence behind it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OffsetResolution {
    /// File offset of the application vector table (non-zero for flash dumps)
    pub image_origin: usize,
    /// File offset of the dictionary stream the pointer refers to
    pub dictionary_file_offset: Option<usize>,
    /// One probe per candidate, in table order
    pub probes: Vec<CandidateProbe>,
    /// The decision
    pub outcome: ResolvedOffset,
}

impl OffsetResolution {
    fn without_anchor(image_origin: usize) -> Self {
        Self {
            image_origin,
            dictionary_file_offset: None,
            probes: Vec::new(),
            outcome: ResolvedOffset::Unresolved {
                reason: UnresolvedReason::NoDictionaryAnchor,
            },
        }
    }
}

/// Resolve the bootloader offset an image was linked for.
///
/// Deterministic and stateless: the same bytes and options always produce
/// the same resolution, and candidate evaluation order only affects the
/// order of `probes`.
pub fn resolve_offset(image: &FirmwareImage<'_>, options: &AnalyzerOptions) -> OffsetResolution {
    let image_origin = vector_table::locate(image, &options.memory, &options.offsets);

    let anchor = match options.dictionary {
        DictionaryLocation::Fixed(offset) => Some(offset as usize),
        DictionaryLocation::Scan => {
            find_dictionary_stream(image, options.max_dictionary_size).map(|s| s.file_offset)
        }
    };
    let Some(dictionary_file_offset) = anchor else {
        debug!("no dictionary anchor; offset left unresolved");
        return OffsetResolution::without_anchor(image_origin);
    };

    let probes: Vec<CandidateProbe> = options
        .offsets
        .iter()
        .map(|candidate| {
            probe(
                image,
                candidate,
                options.memory.flash_base,
                dictionary_file_offset,
                image_origin,
                options.max_literal_matches,
            )
        })
        .collect();

    let outcome = decide(&probes);
    match &outcome {
        ResolvedOffset::Resolved {
            candidate, matches, ..
        } => info!(
            "bootloader offset 0x{:04X} confirmed by {} literal(s)",
            candidate.offset,
            matches.len()
        ),
        ResolvedOffset::Ambiguous { candidates } => warn!(
            "ambiguous bootloader offset: {} candidates matched",
            candidates.len()
        ),
        ResolvedOffset::Unresolved { reason } => debug!("offset unresolved: {}", reason),
    }

    OffsetResolution {
        image_origin,
        dictionary_file_offset: Some(dictionary_file_offset),
        probes,
        outcome,
    }
}

/// Hypothesise `candidate` and search for the pointer it implies.
pub fn probe(
    image: &FirmwareImage<'_>,
    candidate: &OffsetCandidate,
    flash_base: u32,
    dictionary_file_offset: usize,
    image_origin: usize,
    max_matches: usize,
) -> CandidateProbe {
    let link_base = flash_base.wrapping_add(candidate.offset);
    let dictionary_address = dictionary_file_offset
        .checked_sub(image_origin)
        .and_then(|relative| u32::try_from(relative).ok())
        .and_then(|relative| flash_base.checked_add(candidate.offset)?.checked_add(relative));

    let matches = dictionary_address
        .map(|address| image.find_u32(address))
        .unwrap_or_default();
    let rejected = matches.len() > max_matches;

    debug!(
        "candidate 0x{:04X}: pointer {} -> {} match(es){}",
        candidate.offset,
        dictionary_address.map_or_else(|| "n/a".to_string(), |a| format!("0x{:08X}", a)),
        matches.len(),
        if rejected { " (rejected)" } else { "" }
    );

    CandidateProbe {
        candidate: candidate.clone(),
        link_base,
        dictionary_address,
        matches,
        rejected,
    }
}

/// Turn probes into a decision. Never picks among several hits.
///
/// A candidate over the duplicate bound is not evidence on its own, but it
/// still contradicts a single hit elsewhere, so the two together are
/// ambiguous.
pub fn decide(probes: &[CandidateProbe]) -> ResolvedOffset {
    let hits: Vec<&CandidateProbe> = probes.iter().filter(|p| p.is_hit()).collect();
    let any_rejected = probes.iter().any(|p| p.rejected);

    match hits.as_slice() {
        [] => ResolvedOffset::Unresolved {
            reason: if any_rejected {
                UnresolvedReason::ExcessiveMatches
            } else {
                UnresolvedReason::NoMatch
            },
        },
        [hit] if !any_rejected => ResolvedOffset::Resolved {
            candidate: hit.candidate.clone(),
            link_base: hit.link_base,
            dictionary_address: hit.dictionary_address.unwrap_or_default(),
            matches: hit.matches.clone(),
        },
        _ => {
            let mut candidates: Vec<OffsetCandidate> = probes
                .iter()
                .filter(|p| !p.matches.is_empty())
                .map(|p| p.candidate.clone())
                .collect();
            candidates.sort_by_key(|c| c.offset);
            ResolvedOffset::Ambiguous { candidates }
        }
    }
}
