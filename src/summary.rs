//! Human-facing verdict and `make menuconfig` recommendations.
//!
//! Everything here is derived from an [`AnalysisResult`]; nothing reads the
//! image again.

use serde::{Deserialize, Serialize};

use crate::dictionary::crystal::infer_crystal;
use crate::types::AnalysisResult;

/// Offset of the Creality K1 family bootloader, which gets its own title.
const CREALITY_K1_OFFSET: u32 = 0x3000;

/// Severity of the overall verdict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VerdictLevel {
    /// A decoded Klipper image
    Ok,
    /// A plausible ARM image without a recoverable dictionary
    Warning,
    /// Not a usable Cortex-M image
    Error,
}

/// One-paragraph judgement on the image.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Verdict {
    /// Severity
    pub level: VerdictLevel,
    /// Headline
    pub title: String,
    /// Supporting sentence(s)
    pub detail: String,
}

/// Build the verdict for an analysis.
pub fn verdict(result: &AnalysisResult) -> Verdict {
    if !result.vector_table_valid() {
        return Verdict {
            level: VerdictLevel::Error,
            title: "Invalid or unrecognised ARM Cortex-M image".to_string(),
            detail: "The vector table is not consistent with a valid ARM Cortex-M firmware. \
                     Verify this is a raw .bin, not ELF, DFU-wrapped or encrypted."
                .to_string(),
        };
    }

    let Some(dict) = result.config() else {
        return Verdict {
            level: VerdictLevel::Warning,
            title: "Valid ARM image - no Klipper dictionary found".to_string(),
            detail: "The vector table is valid but no embedded Klipper config dictionary \
                     was recovered. This may be a bootloader binary or non-Klipper firmware."
                .to_string(),
        };
    };

    let bootloader = result.bootloader();
    let title = match bootloader {
        Some(c) if c.offset == CREALITY_K1_OFFSET => {
            "Valid Klipper firmware - Creality K1/K1 SE/K1 Max (GD32F303)".to_string()
        }
        Some(c) => format!(
            "Valid Klipper firmware - bootloader offset 0x{:04X} ({} KiB)",
            c.offset,
            c.kib()
        ),
        None => "Valid Klipper firmware - bootloader offset unknown".to_string(),
    };

    let mut detail = String::from("Config dictionary decoded.");
    if let Some(c) = bootloader.filter(|c| c.offset == CREALITY_K1_OFFSET) {
        detail.push_str(&format!(
            " Bootloader offset confirmed: {} KiB (0x{:04X}).",
            c.kib(),
            c.offset
        ));
    }
    detail.push_str(&format!(" MCU: {}.", dict.mcu().unwrap_or("?")));
    if let Some(guess) = dict.clock_freq().map(infer_crystal) {
        if let Some(crystal) = guess.crystal {
            detail.push_str(&format!(" Crystal: {} ({}).", crystal, guess.note));
        }
    }
    if let (Some(pins), Some(baud)) = (dict.serial_pins(), dict.serial_baud()) {
        detail.push_str(&format!(
            " Serial: {} at {} baud.",
            pins,
            group_thousands(baud)
        ));
    }

    Verdict {
        level: VerdictLevel::Ok,
        title,
        detail,
    }
}

/// One `make menuconfig` setting recovered from the image.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Recommendation {
    /// Setting name as shown in menuconfig
    pub setting: String,
    /// Recommended value
    pub value: String,
    /// The value could not be recovered and needs manual inspection
    pub warn: bool,
}

impl Recommendation {
    fn known(setting: &str, value: impl Into<String>) -> Self {
        Self {
            setting: setting.to_string(),
            value: value.into(),
            warn: false,
        }
    }

    fn unknown(setting: &str, value: impl Into<String>) -> Self {
        Self {
            setting: setting.to_string(),
            value: value.into(),
            warn: true,
        }
    }
}

/// Settings to enter in `make menuconfig` to rebuild a compatible image.
pub fn recommendations(result: &AnalysisResult) -> Vec<Recommendation> {
    let dict = result.config();
    let mut rows = Vec::new();

    match dict.and_then(|d| d.mcu()) {
        Some(mcu) => rows.push(Recommendation::known("Processor model", mcu)),
        None => rows.push(Recommendation::unknown("Processor model", "Unknown")),
    }

    match result.bootloader() {
        Some(c) => rows.push(Recommendation::known(
            "Bootloader offset",
            format!("0x{:04X} ({} KiB) - {}", c.offset, c.kib(), c.label),
        )),
        None => rows.push(Recommendation::unknown(
            "Bootloader offset",
            "Could not determine",
        )),
    }

    let guess = dict.and_then(|d| d.clock_freq()).map(infer_crystal);
    match guess {
        Some(g) if g.crystal.is_some() => {
            rows.push(Recommendation::known(
                "Crystal frequency",
                g.crystal.unwrap_or_default(),
            ));
            rows.push(Recommendation::known("Crystal note", g.note));
        }
        _ => rows.push(Recommendation::unknown(
            "Crystal frequency",
            "Unknown, inspect PCB crystal",
        )),
    }

    if let Some(d) = dict {
        if let Some(pins) = d.serial_pins() {
            rows.push(Recommendation::known(
                "Communication interface",
                format!("Serial USART - pins {}", pins),
            ));
        }
        if let Some(baud) = d.serial_baud() {
            rows.push(Recommendation::known(
                "Baud rate (SERIAL_BAUD)",
                group_thousands(baud),
            ));
        }
        if let Some(pins) = d.initial_pins() {
            rows.push(Recommendation::known("Initial pins (INITIAL_PINS)", pins));
        }
    }

    rows
}

/// Format with comma thousands separators: `250000` -> `250,000`.
pub fn group_thousands(value: u64) -> String {
    let digits = value.to_string();
    let mut out = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, ch) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push(',');
        }
        out.push(ch);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures;
    use crate::types::AnalyzerOptions;
    use crate::{analyze_bytes, analyze_bytes_with_options};
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn test_group_thousands() {
        assert_eq!(group_thousands(0), "0");
        assert_eq!(group_thousands(999), "999");
        assert_eq!(group_thousands(1000), "1,000");
        assert_eq!(group_thousands(250_000), "250,000");
        assert_eq!(group_thousands(72_000_000), "72,000,000");
    }

    #[test]
    fn test_invalid_vector_table_is_error() {
        let data = fixtures::image_with_vectors(0x100, 0, 0x0800_2100);
        let result = analyze_bytes(&data).unwrap();
        let v = verdict(&result);
        assert_eq!(v.level, VerdictLevel::Error);
        assert_eq!(v.title, "Invalid or unrecognised ARM Cortex-M image");
    }

    #[test]
    fn test_no_dictionary_is_warning() {
        let data = fixtures::image_with_vectors(0x1000, fixtures::MSP, fixtures::RESET);
        let result = analyze_bytes(&data).unwrap();
        assert_eq!(verdict(&result).level, VerdictLevel::Warning);

        let rows = recommendations(&result);
        assert_eq!(
            rows,
            vec![
                Recommendation::unknown("Processor model", "Unknown"),
                Recommendation::unknown("Bootloader offset", "Could not determine"),
                Recommendation::unknown("Crystal frequency", "Unknown, inspect PCB crystal"),
            ]
        );
    }

    #[test]
    fn test_decoded_image_verdict_and_rows() {
        let dict = fixtures::sample_dictionary_json();
        let data = fixtures::klipper_image(0x2000, 0x1800, 0x400, &dict);
        let result = analyze_bytes(&data).unwrap();

        let v = verdict(&result);
        assert_eq!(v.level, VerdictLevel::Ok);
        assert_eq!(
            v.title,
            "Valid Klipper firmware - bootloader offset 0x2000 (8 KiB)"
        );
        assert!(v.detail.contains("MCU: stm32f103xe."));
        assert!(v.detail.contains("Serial: PA10,PA9 at 250,000 baud."));

        let rows = recommendations(&result);
        let settings: Vec<&str> = rows.iter().map(|r| r.setting.as_str()).collect();
        assert_eq!(
            settings,
            vec![
                "Processor model",
                "Bootloader offset",
                "Crystal frequency",
                "Crystal note",
                "Communication interface",
                "Baud rate (SERIAL_BAUD)",
                "Initial pins (INITIAL_PINS)",
            ]
        );
        assert_eq!(rows[1].value, "0x2000 (8 KiB) - HID / stm32duino bootloader");
        assert_eq!(rows[2].value, "8 MHz");
        assert_eq!(rows[4].value, "Serial USART - pins PA10,PA9");
        assert!(rows.iter().all(|r| !r.warn));
    }

    #[test]
    fn test_creality_k1_title() {
        let dict = json!({
            "config": {"MCU": "gd32f303xe", "CLOCK_FREQ": 120000000, "SERIAL_BAUD": 230400,
                       "RESERVE_PINS_serial": "PA3,PA2"}
        });
        let data = fixtures::klipper_image(0x3000, 0x2400, 0x500, &dict);
        let options = AnalyzerOptions::new().with_dictionary_offset(0x2400);
        let result = analyze_bytes_with_options(&data, &options).unwrap();

        let v = verdict(&result);
        assert_eq!(
            v.title,
            "Valid Klipper firmware - Creality K1/K1 SE/K1 Max (GD32F303)"
        );
        assert!(v
            .detail
            .contains("Bootloader offset confirmed: 12 KiB (0x3000)."));
        assert!(v.detail.contains("Crystal: 8 MHz"));
    }
}
