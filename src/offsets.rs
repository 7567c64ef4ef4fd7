//! Known bootloader offsets.
//!
//! The resolver only ever reports an offset that appears in an
//! [`OffsetTable`]; an image linked anywhere else comes back unresolved.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{InspectError, Result};

/// Granularity every candidate offset must be a multiple of (one 4 KiB page).
pub const SECTOR_GRANULARITY: u32 = 0x1000;

/// Bootloader sizes seen on Klipper-supported STM32/GD32 boards.
const KLIPPER_OFFSETS: &[(u32, &str)] = &[
    (0x0000, "No bootloader (direct flash)"),
    (0x1000, "Minimal / custom 4 KiB bootloader"),
    (0x2000, "HID / stm32duino bootloader"),
    (0x3000, "Creality K1 / K1 SE / K1 Max (GD32F303)"),
    (0x5000, "DFU 20 KiB (uncommon)"),
    (0x7000, "Creality/Klipper custom 28 KiB bootloader"),
    (0x8000, "DFU 32 KiB standard"),
];

/// One known bootloader size.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OffsetCandidate {
    /// Flash byte offset at which the application starts
    pub offset: u32,
    /// Human-readable bootloader description
    pub label: String,
}

impl OffsetCandidate {
    /// Create a candidate.
    pub fn new(offset: u32, label: impl Into<String>) -> Self {
        Self {
            offset,
            label: label.into(),
        }
    }

    /// Bootloader size in KiB.
    pub fn kib(&self) -> u32 {
        self.offset / 1024
    }
}

impl fmt::Display for OffsetCandidate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:04X} ({} KiB) - {}", self.offset, self.kib(), self.label)
    }
}

/// Immutable, ascending set of candidate offsets.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "Vec<OffsetCandidate>", into = "Vec<OffsetCandidate>")]
pub struct OffsetTable {
    candidates: Vec<OffsetCandidate>,
}

impl Default for OffsetTable {
    fn default() -> Self {
        Self::klipper()
    }
}

impl OffsetTable {
    /// The table of bootloaders found on Klipper-supported boards.
    pub fn klipper() -> Self {
        Self {
            candidates: KLIPPER_OFFSETS
                .iter()
                .map(|&(offset, label)| OffsetCandidate::new(offset, label))
                .collect(),
        }
    }

    /// Build a table, sorting ascending.
    ///
    /// Empty tables, duplicates and offsets off the sector grid are rejected.
    pub fn new(mut candidates: Vec<OffsetCandidate>) -> Result<Self> {
        if candidates.is_empty() {
            return Err(InspectError::InvalidOffsetTable {
                message: "table is empty".to_string(),
            });
        }
        if let Some(bad) = candidates
            .iter()
            .find(|c| c.offset % SECTOR_GRANULARITY != 0)
        {
            return Err(InspectError::InvalidOffsetTable {
                message: format!(
                    "offset 0x{:X} is not a multiple of 0x{:X}",
                    bad.offset, SECTOR_GRANULARITY
                ),
            });
        }

        candidates.sort_by_key(|c| c.offset);
        if let Some(pair) = candidates.windows(2).find(|w| w[0].offset == w[1].offset) {
            return Err(InspectError::InvalidOffsetTable {
                message: format!("duplicate offset 0x{:X}", pair[0].offset),
            });
        }

        Ok(Self { candidates })
    }

    /// A copy of this table with one more candidate.
    pub fn with_candidate(&self, candidate: OffsetCandidate) -> Result<Self> {
        let mut candidates = self.candidates.clone();
        candidates.push(candidate);
        Self::new(candidates)
    }

    /// Candidates in ascending offset order.
    pub fn candidates(&self) -> &[OffsetCandidate] {
        &self.candidates
    }

    /// Iterate candidates in ascending offset order.
    pub fn iter(&self) -> std::slice::Iter<'_, OffsetCandidate> {
        self.candidates.iter()
    }

    /// Number of candidates.
    pub fn len(&self) -> usize {
        self.candidates.len()
    }

    /// Always false for a constructed table.
    pub fn is_empty(&self) -> bool {
        self.candidates.is_empty()
    }

    /// The candidate with exactly this offset.
    pub fn get(&self, offset: u32) -> Option<&OffsetCandidate> {
        self.candidates
            .binary_search_by_key(&offset, |c| c.offset)
            .ok()
            .map(|i| &self.candidates[i])
    }

    /// Label of a known offset.
    pub fn label_for(&self, offset: u32) -> Option<&str> {
        self.get(offset).map(|c| c.label.as_str())
    }
}

impl TryFrom<Vec<OffsetCandidate>> for OffsetTable {
    type Error = InspectError;

    fn try_from(candidates: Vec<OffsetCandidate>) -> Result<Self> {
        Self::new(candidates)
    }
}

impl From<OffsetTable> for Vec<OffsetCandidate> {
    fn from(table: OffsetTable) -> Self {
        table.candidates
    }
}

impl<'a> IntoIterator for &'a OffsetTable {
    type Item = &'a OffsetCandidate;
    type IntoIter = std::slice::Iter<'a, OffsetCandidate>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_klipper_table_ascending() {
        let table = OffsetTable::klipper();
        let offsets: Vec<u32> = table.iter().map(|c| c.offset).collect();
        assert_eq!(
            offsets,
            vec![0x0000, 0x1000, 0x2000, 0x3000, 0x5000, 0x7000, 0x8000]
        );
        assert!(table.iter().all(|c| c.offset % SECTOR_GRANULARITY == 0));
    }

    #[test]
    fn test_klipper_table_passes_validation() {
        let rebuilt = OffsetTable::new(OffsetTable::klipper().candidates().to_vec()).unwrap();
        assert_eq!(rebuilt, OffsetTable::klipper());
    }

    #[test]
    fn test_label_lookup() {
        let table = OffsetTable::klipper();
        assert_eq!(table.label_for(0x2000), Some("HID / stm32duino bootloader"));
        assert_eq!(table.label_for(0x4000), None);
        assert_eq!(table.get(0x7000).unwrap().kib(), 28);
    }

    #[test]
    fn test_new_sorts_and_rejects_duplicates() {
        let table = OffsetTable::new(vec![
            OffsetCandidate::new(0x8000, "b"),
            OffsetCandidate::new(0x0000, "a"),
        ])
        .unwrap();
        assert_eq!(table.candidates()[0].offset, 0);

        let err = OffsetTable::new(vec![
            OffsetCandidate::new(0x1000, "a"),
            OffsetCandidate::new(0x1000, "b"),
        ])
        .unwrap_err();
        assert!(err.to_string().contains("duplicate"));
    }

    #[test]
    fn test_new_rejects_unaligned_and_empty() {
        assert!(OffsetTable::new(vec![OffsetCandidate::new(0x1800, "half page")]).is_err());
        assert!(OffsetTable::new(Vec::new()).is_err());
    }

    #[test]
    fn test_with_candidate_extends_copy() {
        let base = OffsetTable::klipper();
        let extended = base
            .with_candidate(OffsetCandidate::new(0x4000, "custom 16 KiB"))
            .unwrap();
        assert_eq!(base.len(), 7);
        assert_eq!(extended.len(), 8);
        assert_eq!(extended.candidates()[4].offset, 0x4000);
    }

    #[test]
    fn test_deserialize_validates() {
        let table: OffsetTable =
            serde_json::from_str(r#"[{"offset":8192,"label":"b"},{"offset":0,"label":"a"}]"#)
                .unwrap();
        assert_eq!(table.candidates()[1].offset, 0x2000);
        assert!(serde_json::from_str::<OffsetTable>(r#"[{"offset":100,"label":"x"}]"#).is_err());
    }

    #[test]
    fn test_candidate_display() {
        let c = OffsetCandidate::new(0x3000, "Creality K1");
        assert_eq!(c.to_string(), "0x3000 (12 KiB) - Creality K1");
    }
}
