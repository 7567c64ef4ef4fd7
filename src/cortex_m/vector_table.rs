//! ARM Cortex-M vector table view and structural validation.
//!
//! Word 0 holds the initial main stack pointer and word 1 the reset
//! handler. Both are checked against the [`MemoryMap`]; the remaining
//! words are captured for display only.

use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{addresses, MemoryMap, Region};
use crate::error::VectorTableFault;
use crate::offsets::OffsetTable;
use crate::types::FirmwareImage;

/// Architecture-defined names of the first sixteen vector slots.
pub const SLOT_NAMES: [&str; 16] = [
    "MSP",
    "Reset",
    "NMI",
    "HardFault",
    "MemManage",
    "BusFault",
    "UsageFault",
    "Reserved",
    "Reserved",
    "Reserved",
    "Reserved",
    "SVCall",
    "DebugMonitor",
    "Reserved",
    "PendSV",
    "SysTick",
];

/// Name of the vector slot at `index`; slots past the core exceptions are IRQs.
pub fn slot_name(index: usize) -> String {
    match SLOT_NAMES.get(index) {
        Some(name) => (*name).to_string(),
        None => format!("IRQ{}", index - SLOT_NAMES.len()),
    }
}

/// One word of the vector table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VectorEntry {
    /// Slot index
    pub index: usize,
    /// Slot name
    pub name: String,
    /// File offset of the word
    pub file_offset: usize,
    /// Little-endian word value
    pub value: u32,
    /// Raw bytes as they appear in the file, upper-case hex
    pub bytes: String,
}

/// The leading words of an image interpreted as a vector table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VectorTable {
    /// File offset the table was read from
    pub file_offset: usize,
    /// Captured words, at least MSP and reset
    pub entries: Vec<VectorEntry>,
}

impl VectorTable {
    /// Read up to `words` words at `file_offset`.
    ///
    /// Returns `None` unless at least the MSP and reset words fit.
    pub fn read(image: &FirmwareImage<'_>, file_offset: usize, words: usize) -> Option<Self> {
        let entries: Vec<VectorEntry> = (0..words.max(2))
            .map_while(|index| {
                let offset = file_offset.checked_add(index * 4)?;
                let value = image.read_u32(offset)?;
                Some(VectorEntry {
                    index,
                    name: slot_name(index),
                    file_offset: offset,
                    value,
                    bytes: hex::encode_upper(&image.bytes()[offset..offset + 4]),
                })
            })
            .collect();

        if entries.len() < 2 {
            return None;
        }
        Some(Self {
            file_offset,
            entries,
        })
    }

    /// Initial main stack pointer.
    pub fn msp(&self) -> u32 {
        self.entries[0].value
    }

    /// Reset handler address, Thumb bit included.
    pub fn reset(&self) -> u32 {
        self.entries[1].value
    }
}

/// Outcome of the structural check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum VectorTableVerdict {
    /// MSP and reset vector are both plausible
    Valid,
    /// At least one check failed
    Invalid {
        /// Every failed check, MSP faults first
        faults: Vec<VectorTableFault>,
    },
}

impl VectorTableVerdict {
    /// Returns true for [`VectorTableVerdict::Valid`].
    pub fn is_valid(&self) -> bool {
        matches!(self, VectorTableVerdict::Valid)
    }

    /// The recorded faults, empty when valid.
    pub fn faults(&self) -> &[VectorTableFault] {
        match self {
            VectorTableVerdict::Valid => &[],
            VectorTableVerdict::Invalid { faults } => faults,
        }
    }
}

/// Vector table words together with the verdict on them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VectorTableReport {
    /// Table read from file offset 0
    pub table: VectorTable,
    /// Region the MSP points into
    pub msp_region: Region,
    /// Region the reset handler points into
    pub reset_region: Region,
    /// Thumb bit of the reset vector
    pub thumb: bool,
    /// Overall verdict
    pub verdict: VectorTableVerdict,
}

impl VectorTableReport {
    /// True when the MSP passed its checks.
    pub fn msp_ok(&self) -> bool {
        !self.verdict.faults().iter().any(|f| f.is_stack_pointer())
    }

    /// True when the reset vector passed its checks.
    pub fn reset_ok(&self) -> bool {
        self.verdict.faults().iter().all(|f| f.is_stack_pointer())
    }
}

/// Check an initial stack pointer.
pub fn check_msp(msp: u32, memory: &MemoryMap) -> Option<VectorTableFault> {
    match msp {
        0 => Some(VectorTableFault::StackPointerZero),
        addresses::ERASED => Some(VectorTableFault::StackPointerErased),
        _ if memory.region_of(msp).is_ram() => None,
        _ => Some(VectorTableFault::StackPointerOutsideRam(msp)),
    }
}

/// Check a reset vector.
pub fn check_reset(reset: u32, memory: &MemoryMap) -> Option<VectorTableFault> {
    if reset == addresses::ERASED {
        return Some(VectorTableFault::ResetVectorErased);
    }
    if reset & 1 == 0 {
        return Some(VectorTableFault::ResetVectorNotThumb(reset));
    }
    let region = memory.region_of(reset & !1);
    if region.is_flash() {
        None
    } else if region.is_ram() {
        Some(VectorTableFault::ResetVectorInRam(reset))
    } else {
        Some(VectorTableFault::ResetVectorOutsideFlash(reset))
    }
}

/// Faults for an MSP/reset pair, MSP first.
pub fn check_words(msp: u32, reset: u32, memory: &MemoryMap) -> Vec<VectorTableFault> {
    check_msp(msp, memory)
        .into_iter()
        .chain(check_reset(reset, memory))
        .collect()
}

/// Validate the vector table at the start of the image.
///
/// A failed check is reported in the verdict; it never stops the other
/// components from running.
pub fn validate(image: &FirmwareImage<'_>, memory: &MemoryMap, words: usize) -> VectorTableReport {
    // FirmwareImage guarantees at least two words at offset 0.
    let table = VectorTable::read(image, 0, words).unwrap_or_else(|| VectorTable {
        file_offset: 0,
        entries: Vec::new(),
    });
    let (msp, reset) = match (table.entries.first(), table.entries.get(1)) {
        (Some(msp), Some(reset)) => (msp.value, reset.value),
        _ => (0, 0),
    };

    let faults = check_words(msp, reset, memory);
    debug!(
        "vector table checked: msp=0x{:08X} reset=0x{:08X} faults={}",
        msp,
        reset,
        faults.len()
    );

    let verdict = if faults.is_empty() {
        VectorTableVerdict::Valid
    } else {
        VectorTableVerdict::Invalid { faults }
    };

    VectorTableReport {
        msp_region: memory.region_of(msp),
        reset_region: memory.region_of(reset & !1),
        thumb: reset & 1 == 1,
        table,
        verdict,
    }
}

/// True when the two words at `file_offset` form a plausible vector table.
pub fn is_valid_at(image: &FirmwareImage<'_>, file_offset: usize, memory: &MemoryMap) -> bool {
    let Some(end) = file_offset.checked_add(8) else {
        return false;
    };
    if end > image.len() {
        return false;
    }
    match (image.read_u32(file_offset), image.read_u32(file_offset + 4)) {
        (Some(msp), Some(reset)) => check_words(msp, reset, memory).is_empty(),
        _ => false,
    }
}

/// File offset of the application's vector table.
///
/// Zero for application-only images. For a full flash dump the table at
/// offset zero belongs to the bootloader or is missing, so the candidate
/// offsets are tried in ascending order and the first valid table wins.
pub fn locate(image: &FirmwareImage<'_>, memory: &MemoryMap, offsets: &OffsetTable) -> usize {
    if is_valid_at(image, 0, memory) {
        return 0;
    }
    offsets
        .iter()
        .map(|c| c.offset as usize)
        .filter(|&offset| offset != 0)
        .find(|&offset| is_valid_at(image, offset, memory))
        .map(|offset| {
            debug!("vector table located at file offset 0x{:X}", offset);
            offset
        })
        .unwrap_or(0)
}
