//! External crystal inference from the configured CPU clock.

use serde::Serialize;

/// Clock frequencies with a well-known crystal/PLL combination.
const CRYSTAL_MAP: &[(u64, &str, &str)] = &[
    (72_000_000, "8 MHz", "8 MHz x PLL x9 = 72 MHz, standard STM32F103/GD32F303"),
    (64_000_000, "8 MHz", "8 MHz x PLL x8 = 64 MHz"),
    (48_000_000, "8 MHz", "8 MHz x PLL x6 = 48 MHz"),
    (24_000_000, "8 MHz", "8 MHz x PLL x3 = 24 MHz"),
    (120_000_000, "8 MHz", "8 MHz x PLL x15 = 120 MHz, GD32F303 high-speed mode"),
    (180_000_000, "12 MHz", "12 MHz x PLL x15, likely STM32F4xx"),
    (168_000_000, "8/12 MHz", "STM32F4, check PCB crystal"),
];

/// Best guess at the board crystal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CrystalInference {
    /// Crystal frequency, when the clock maps to a known PLL setup
    pub crystal: Option<&'static str>,
    /// How the guess was made
    pub note: String,
}

/// Infer the crystal from `CLOCK_FREQ`.
pub fn infer_crystal(clock_freq: u64) -> CrystalInference {
    match CRYSTAL_MAP.iter().find(|(freq, _, _)| *freq == clock_freq) {
        Some(&(_, crystal, note)) => CrystalInference {
            crystal: Some(crystal),
            note: note.to_string(),
        },
        None => CrystalInference {
            crystal: None,
            note: format!("{} Hz, crystal unknown", crate::summary::group_thousands(clock_freq)),
        },
    }
}
