//! ARM Cortex-M memory layout.
//!
//! Address windows used to judge whether vector table words are plausible
//! for an STM32/GD32-class part.

pub mod vector_table;

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{InspectError, Result};

/// Canonical memory addresses for STM32F1/F4 and GD32F303 parts.
pub mod addresses {
    /// Start of main flash.
    pub const FLASH_BASE: u32 = 0x0800_0000;
    /// Flash window accepted for reset vectors (512 KiB).
    pub const FLASH_SIZE: u32 = 0x0008_0000;
    /// Start of SRAM.
    pub const SRAM_START: u32 = 0x2000_0000;
    /// Highest accepted initial stack pointer (128 KiB above SRAM start).
    pub const SRAM_END: u32 = 0x2002_0000;
    /// Start of core-coupled RAM on F4 parts.
    pub const CCM_START: u32 = 0x1000_0000;
    /// Highest accepted CCM stack pointer (64 KiB).
    pub const CCM_END: u32 = 0x1001_0000;
    /// Erased flash word.
    pub const ERASED: u32 = 0xFFFF_FFFF;
}

/// Memory region an address falls into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Region {
    /// Main flash at its canonical base
    Flash,
    /// Flash aliased at address zero (boot from main flash)
    FlashAlias,
    /// On-chip SRAM
    Sram,
    /// Core-coupled RAM
    CcmRam,
    /// None of the above
    Unmapped,
}

impl Region {
    /// Returns true for code-executable flash regions.
    pub fn is_flash(self) -> bool {
        matches!(self, Region::Flash | Region::FlashAlias)
    }

    /// Returns true for RAM regions.
    pub fn is_ram(self) -> bool {
        matches!(self, Region::Sram | Region::CcmRam)
    }
}

impl fmt::Display for Region {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Region::Flash => "flash",
            Region::FlashAlias => "flash alias",
            Region::Sram => "SRAM",
            Region::CcmRam => "CCM RAM",
            Region::Unmapped => "unmapped",
        };
        write!(f, "{}", name)
    }
}

/// Address windows of the target part.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemoryMap {
    /// Flash base address
    pub flash_base: u32,
    /// Flash window size in bytes
    pub flash_size: u32,
    /// SRAM start (inclusive)
    pub sram_start: u32,
    /// SRAM end (inclusive; a full-descending stack starts at the top)
    pub sram_end: u32,
    /// CCM start (inclusive)
    pub ccm_start: u32,
    /// CCM end (inclusive)
    pub ccm_end: u32,
}

impl Default for MemoryMap {
    fn default() -> Self {
        Self::stm32()
    }
}

impl MemoryMap {
    /// Layout shared by STM32F1/F4 and GD32F303.
    pub const fn stm32() -> Self {
        Self {
            flash_base: addresses::FLASH_BASE,
            flash_size: addresses::FLASH_SIZE,
            sram_start: addresses::SRAM_START,
            sram_end: addresses::SRAM_END,
            ccm_start: addresses::CCM_START,
            ccm_end: addresses::CCM_END,
        }
    }

    /// Classify an address.
    ///
    /// The stack windows are inclusive at the top; the flash windows are
    /// half-open.
    pub fn region_of(&self, addr: u32) -> Region {
        let flash_end = u64::from(self.flash_base) + u64::from(self.flash_size);
        if addr >= self.flash_base && u64::from(addr) < flash_end {
            Region::Flash
        } else if addr < self.flash_size {
            Region::FlashAlias
        } else if (self.sram_start..=self.sram_end).contains(&addr) {
            Region::Sram
        } else if (self.ccm_start..=self.ccm_end).contains(&addr) {
            Region::CcmRam
        } else {
            Region::Unmapped
        }
    }

    /// Reject windows that are empty or inverted.
    pub fn validate(&self) -> Result<()> {
        if self.flash_size == 0 {
            return Err(InspectError::ConfigError {
                message: "flash_size must be non-zero".to_string(),
            });
        }
        if u64::from(self.flash_base) + u64::from(self.flash_size) > 1u64 << 32 {
            return Err(InspectError::ConfigError {
                message: format!(
                    "flash window 0x{:08X}+0x{:X} exceeds the 32-bit address space",
                    self.flash_base, self.flash_size
                ),
            });
        }
        if self.sram_start > self.sram_end || self.ccm_start > self.ccm_end {
            return Err(InspectError::ConfigError {
                message: "RAM window start is above its end".to_string(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_region_of() {
        let map = MemoryMap::stm32();
        assert_eq!(map.region_of(0x0800_2101), Region::Flash);
        assert_eq!(map.region_of(0x0807_FFFF), Region::Flash);
        assert_eq!(map.region_of(0x0808_0000), Region::Unmapped);
        assert_eq!(map.region_of(0x0000_2101), Region::FlashAlias);
        assert_eq!(map.region_of(0x2000_1000), Region::Sram);
        assert_eq!(map.region_of(0x2002_0000), Region::Sram);
        assert_eq!(map.region_of(0x2002_0004), Region::Unmapped);
        assert_eq!(map.region_of(0x1000_8000), Region::CcmRam);
        assert_eq!(map.region_of(0xE000_ED00), Region::Unmapped);
    }

    #[test]
    fn test_region_predicates() {
        assert!(Region::FlashAlias.is_flash());
        assert!(!Region::Sram.is_flash());
        assert!(Region::CcmRam.is_ram());
        assert_eq!(Region::Sram.to_string(), "SRAM");
    }

    #[test]
    fn test_validate_rejects_overflowing_flash() {
        let map = MemoryMap {
            flash_base: 0xFFFF_0000,
            flash_size: 0x0010_0000,
            ..MemoryMap::stm32()
        };
        assert!(map.validate().is_err());
        assert!(MemoryMap::stm32().validate().is_ok());
    }
}
