//! Output formatters for analysis results.
//!
//! This module provides trait-based formatters for rendering an
//! [`AnalysisResult`] in various output formats (human-readable, JSON,
//! compact).

use std::path::Path;

use crate::cortex_m::vector_table::VectorTableReport;
use crate::dictionary::crystal::infer_crystal;
use crate::dictionary::DictionaryOutcome;
use crate::resolver::{OffsetResolution, ResolvedOffset};
use crate::summary::{self, group_thousands, Recommendation, Verdict, VerdictLevel};
use crate::types::{AnalysisResult, Note, NoteLevel};

/// Trait for formatting analysis results.
///
/// Implementors provide methods for rendering each component of a result,
/// plus a method to render the complete report.
pub trait ReportFormatter {
    /// Format the file header.
    fn format_file(&self, path: &Path, size: usize) -> String;

    /// Format the overall verdict.
    fn format_verdict(&self, verdict: &Verdict) -> Option<String>;

    /// Format the vector table words and checks.
    ///
    /// `resolution` places file offsets in the flash address space.
    fn format_vector_table(
        &self,
        report: &VectorTableReport,
        resolution: &OffsetResolution,
    ) -> Option<String>;

    /// Format the bootloader offset resolution.
    fn format_offset(&self, resolution: &OffsetResolution) -> Option<String>;

    /// Format the configuration dictionary.
    fn format_dictionary(&self, outcome: &DictionaryOutcome) -> Option<String>;

    /// Format `make menuconfig` recommendations.
    fn format_recommendations(&self, rows: &[Recommendation]) -> Option<String>;

    /// Format analysis notes.
    fn format_notes(&self, notes: &[Note]) -> Option<String>;

    /// Format the complete report.
    ///
    /// Default implementation concatenates all component outputs.
    fn format_report(&self, result: &AnalysisResult, path: &Path) -> String {
        let mut parts = vec![self.format_file(path, result.image_len)];

        let verdict = summary::verdict(result);
        let rows = summary::recommendations(result);
        let sections = [
            self.format_verdict(&verdict),
            self.format_vector_table(&result.vector_table, &result.offset),
            self.format_offset(&result.offset),
            self.format_dictionary(&result.dictionary),
            self.format_recommendations(&rows),
            self.format_notes(&result.notes),
        ];
        parts.extend(sections.into_iter().flatten());

        parts.join("")
    }

    /// Format a file that could not be analyzed.
    fn format_failure(&self, path: &Path, error: &str) -> String {
        format!("{}: error: {}\n", path.display(), error)
    }
}

/// Human-readable output formatter.
#[derive(Debug, Clone, Default)]
pub struct HumanFormatter {
    /// Show verbose output (probes, full vector table, raw dictionary)
    pub verbose: bool,
    /// Quiet mode (minimal output)
    pub quiet: bool,
}

impl HumanFormatter {
    /// Create a new human formatter with default settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a verbose formatter.
    pub fn verbose() -> Self {
        Self {
            verbose: true,
            quiet: false,
        }
    }

    /// Create a quiet formatter.
    pub fn quiet() -> Self {
        Self {
            verbose: false,
            quiet: true,
        }
    }
}

impl ReportFormatter for HumanFormatter {
    fn format_file(&self, path: &Path, size: usize) -> String {
        if self.quiet {
            String::new()
        } else {
            format!("File: {} ({} bytes)\n", path.display(), group_thousands(size as u64))
        }
    }

    fn format_verdict(&self, verdict: &Verdict) -> Option<String> {
        let icon = match verdict.level {
            VerdictLevel::Ok => "[ok]",
            VerdictLevel::Warning => "[~]",
            VerdictLevel::Error => "[!]",
        };
        if self.quiet {
            return Some(format!("{} {}\n", icon, verdict.title));
        }
        Some(format!(
            "  {} {}\n      {}\n",
            icon, verdict.title, verdict.detail
        ))
    }

    fn format_vector_table(
        &self,
        report: &VectorTableReport,
        resolution: &OffsetResolution,
    ) -> Option<String> {
        if self.quiet {
            return None;
        }

        let mut s = String::from("  Vector table:\n");
        let flag = |ok: bool| if ok { "" } else { "  <-- invalid" };
        s.push_str(&format!(
            "    MSP:    0x{:08X} ({}){}\n",
            report.table.msp(),
            report.msp_region,
            flag(report.msp_ok())
        ));
        s.push_str(&format!(
            "    Reset:  0x{:08X} ({}, {}){}\n",
            report.table.reset(),
            report.reset_region,
            if report.thumb { "Thumb" } else { "ARM" },
            flag(report.reset_ok())
        ));
        for fault in report.verdict.faults() {
            s.push_str(&format!("    ! {}\n", fault));
        }

        if self.verbose {
            for entry in &report.table.entries {
                let address = match flash_address(resolution, entry.file_offset) {
                    Some(address) => format!("0x{:08X}", address),
                    None => format!("+0x{:04X}", entry.file_offset),
                };
                s.push_str(&format!(
                    "      {}  {}  0x{:08X}  {}\n",
                    address, entry.bytes, entry.value, entry.name
                ));
            }
        }
        Some(s)
    }

    fn format_offset(&self, resolution: &OffsetResolution) -> Option<String> {
        if self.quiet {
            return None;
        }

        let mut s = match &resolution.outcome {
            ResolvedOffset::Resolved {
                candidate,
                link_base,
                ..
            } => format!(
                "  Bootloader: {}\n  Link base:  0x{:08X}\n",
                candidate, link_base
            ),
            ResolvedOffset::Ambiguous { candidates } => {
                let offsets: Vec<String> = candidates
                    .iter()
                    .map(|c| format!("0x{:04X}", c.offset))
                    .collect();
                format!("  Bootloader: ambiguous ({})\n", offsets.join(", "))
            }
            ResolvedOffset::Unresolved { reason } => {
                format!("  Bootloader: could not determine ({})\n", reason)
            }
        };
        if resolution.image_origin != 0 {
            s.push_str(&format!(
                "  Origin:     file offset 0x{:X} (full flash dump)\n",
                resolution.image_origin
            ));
        }

        if self.verbose && !resolution.probes.is_empty() {
            s.push_str("  Probes:\n");
            for probe in &resolution.probes {
                let pointer = probe
                    .dictionary_address
                    .map_or_else(|| "n/a".to_string(), |a| format!("0x{:08X}", a));
                let status = match (probe.matches.len(), probe.rejected) {
                    (0, _) => "-".to_string(),
                    (n, true) => format!("rejected ({} hits)", n),
                    (_, false) => {
                        let at: Vec<String> =
                            probe.matches.iter().map(|m| format!("0x{:X}", m)).collect();
                        format!("MATCH at {}", at.join(", "))
                    }
                };
                s.push_str(&format!(
                    "    0x{:04X} {:>3} KiB  {}  {:<42} {}\n",
                    probe.candidate.offset,
                    probe.candidate.kib(),
                    pointer,
                    probe.candidate.label,
                    status
                ));
            }
        }
        Some(s)
    }

    fn format_dictionary(&self, outcome: &DictionaryOutcome) -> Option<String> {
        if self.quiet {
            return None;
        }

        let (file_offset, compressed_len, dict) = match outcome {
            DictionaryOutcome::Decoded {
                file_offset,
                compressed_len,
                dictionary,
            } => (file_offset, compressed_len, dictionary),
            DictionaryOutcome::Unavailable { reason } => {
                return Some(format!("  Dictionary: unavailable ({})\n", reason));
            }
        };

        let dash = || "-".to_string();
        let mut s = format!(
            "  Dictionary: file offset 0x{:X}, {} bytes compressed\n",
            file_offset, compressed_len
        );
        s.push_str(&format!("    MCU:          {}\n", dict.mcu().unwrap_or("-")));
        s.push_str(&format!(
            "    Clock:        {}\n",
            dict.clock_freq()
                .map_or_else(dash, |f| format!("{} Hz", group_thousands(f)))
        ));
        if let Some(freq) = dict.clock_freq() {
            let guess = infer_crystal(freq);
            s.push_str(&format!(
                "    Crystal:      {} ({})\n",
                guess.crystal.unwrap_or("unknown"),
                guess.note
            ));
        }
        s.push_str(&format!(
            "    Serial baud:  {}\n",
            dict.serial_baud().map_or_else(dash, group_thousands)
        ));
        s.push_str(&format!(
            "    Serial pins:  {}\n",
            dict.serial_pins().unwrap_or_else(dash)
        ));
        s.push_str(&format!(
            "    Initial pins: {}\n",
            dict.initial_pins().unwrap_or_else(dash)
        ));
        s.push_str(&format!("    Version:      {}\n", dict.version().unwrap_or("-")));
        s.push_str(&format!(
            "    Toolchain:    {}\n",
            dict.build_versions().unwrap_or("-")
        ));

        if self.verbose {
            if let Ok(pretty) = serde_json::to_string_pretty(dict) {
                for line in pretty.lines() {
                    s.push_str("      ");
                    s.push_str(line);
                    s.push('\n');
                }
            }
        }
        Some(s)
    }

    fn format_recommendations(&self, rows: &[Recommendation]) -> Option<String> {
        if rows.is_empty() || self.quiet {
            return None;
        }

        let mut s = String::from("  make menuconfig:\n");
        for row in rows {
            s.push_str(&format!(
                "    {:<28} {}{}\n",
                row.setting,
                row.value,
                if row.warn { "  (check)" } else { "" }
            ));
        }
        Some(s)
    }

    fn format_notes(&self, notes: &[Note]) -> Option<String> {
        if notes.is_empty() {
            return None;
        }

        // Only show warnings/errors unless verbose
        let to_show: Vec<_> = if self.verbose {
            notes.iter().collect()
        } else {
            notes
                .iter()
                .filter(|n| n.level != NoteLevel::Info)
                .collect()
        };

        if to_show.is_empty() {
            return None;
        }

        let mut s = String::new();
        for note in to_show {
            let prefix = match note.level {
                NoteLevel::Info => "  [info]",
                NoteLevel::Warning => "  [warn]",
                NoteLevel::Error => "  [error]",
            };
            s.push_str(&format!("{} {}\n", prefix, note.message));
        }
        Some(s)
    }

    fn format_report(&self, result: &AnalysisResult, path: &Path) -> String {
        let verdict = summary::verdict(result);
        if self.quiet {
            // Quiet mode: just "path: title"
            return format!("{}: {}\n", path.display(), verdict.title);
        }

        let rows = summary::recommendations(result);
        let mut parts = vec![self.format_file(path, result.image_len)];
        let sections = [
            self.format_verdict(&verdict),
            self.format_vector_table(&result.vector_table, &result.offset),
            self.format_offset(&result.offset),
            self.format_dictionary(&result.dictionary),
            self.format_recommendations(&rows),
            self.format_notes(&result.notes),
        ];
        parts.extend(sections.into_iter().flatten());
        parts.push(String::from("\n")); // Trailing newline

        parts.join("")
    }
}

/// Flash address of `file_offset`, if the link base is known.
///
/// The link base is the address of `image_origin`, which is non-zero for
/// full flash dumps.
fn flash_address(resolution: &OffsetResolution, file_offset: usize) -> Option<u64> {
    let ResolvedOffset::Resolved { link_base, .. } = &resolution.outcome else {
        return None;
    };
    (u64::from(*link_base) + file_offset as u64).checked_sub(resolution.image_origin as u64)
}

/// JSON output formatter.
#[derive(Debug, Clone)]
pub struct JsonFormatter {
    /// Pretty-print JSON
    pub pretty: bool,
}

impl Default for JsonFormatter {
    fn default() -> Self {
        Self { pretty: true }
    }
}

impl JsonFormatter {
    /// Create a new JSON formatter with pretty printing.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a compact JSON formatter.
    pub fn compact() -> Self {
        Self { pretty: false }
    }

    fn render<T: serde::Serialize>(&self, value: &T) -> String {
        let rendered = if self.pretty {
            serde_json::to_string_pretty(value)
        } else {
            serde_json::to_string(value)
        };
        rendered.unwrap_or_else(|_| "{}".to_string())
    }
}

impl ReportFormatter for JsonFormatter {
    fn format_file(&self, _path: &Path, _size: usize) -> String {
        String::new() // Handled in format_report
    }

    fn format_verdict(&self, _verdict: &Verdict) -> Option<String> {
        None
    }

    fn format_vector_table(
        &self,
        _report: &VectorTableReport,
        _resolution: &OffsetResolution,
    ) -> Option<String> {
        None
    }

    fn format_offset(&self, _resolution: &OffsetResolution) -> Option<String> {
        None
    }

    fn format_dictionary(&self, _outcome: &DictionaryOutcome) -> Option<String> {
        None
    }

    fn format_recommendations(&self, _rows: &[Recommendation]) -> Option<String> {
        None
    }

    fn format_notes(&self, _notes: &[Note]) -> Option<String> {
        None
    }

    fn format_report(&self, result: &AnalysisResult, path: &Path) -> String {
        #[derive(serde::Serialize)]
        struct JsonOutput<'a> {
            file: String,
            verdict: Verdict,
            bootloader_offset: Option<u32>,
            recommendations: Vec<Recommendation>,
            #[serde(flatten)]
            result: &'a AnalysisResult,
        }

        let output = JsonOutput {
            file: path.display().to_string(),
            verdict: summary::verdict(result),
            bootloader_offset: result.bootloader_offset(),
            recommendations: summary::recommendations(result),
            result,
        };
        let mut s = self.render(&output);
        s.push('\n');
        s
    }

    fn format_failure(&self, path: &Path, error: &str) -> String {
        let mut s = self.render(&serde_json::json!({
            "file": path.display().to_string(),
            "error": error,
        }));
        s.push('\n');
        s
    }
}

/// Compact single-line output formatter.
///
/// Columns: path, verdict level, bootloader offset, MCU.
#[derive(Debug, Clone, Default)]
pub struct ShortFormatter;

impl ShortFormatter {
    /// Create a new short formatter.
    pub fn new() -> Self {
        Self
    }
}

impl ReportFormatter for ShortFormatter {
    fn format_file(&self, _path: &Path, _size: usize) -> String {
        String::new() // Handled in format_report
    }

    fn format_verdict(&self, _verdict: &Verdict) -> Option<String> {
        None
    }

    fn format_vector_table(
        &self,
        _report: &VectorTableReport,
        _resolution: &OffsetResolution,
    ) -> Option<String> {
        None
    }

    fn format_offset(&self, _resolution: &OffsetResolution) -> Option<String> {
        None
    }

    fn format_dictionary(&self, _outcome: &DictionaryOutcome) -> Option<String> {
        None
    }

    fn format_recommendations(&self, _rows: &[Recommendation]) -> Option<String> {
        None
    }

    fn format_notes(&self, _notes: &[Note]) -> Option<String> {
        None
    }

    fn format_report(&self, result: &AnalysisResult, path: &Path) -> String {
        let level = match summary::verdict(result).level {
            VerdictLevel::Ok => "ok",
            VerdictLevel::Warning => "warn",
            VerdictLevel::Error => "error",
        };
        let offset = match &result.offset.outcome {
            ResolvedOffset::Resolved { candidate, .. } => format!("0x{:04X}", candidate.offset),
            ResolvedOffset::Ambiguous { .. } => "ambiguous".to_string(),
            ResolvedOffset::Unresolved { .. } => "-".to_string(),
        };
        let mcu = result.config().and_then(|d| d.mcu()).unwrap_or("-");
        format!("{}\t{}\t{}\t{}\n", path.display(), level, offset, mcu)
    }

    fn format_failure(&self, path: &Path, error: &str) -> String {
        format!("{}\terror\t-\t-\t{}\n", path.display(), error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures;
    use crate::{analyze_bytes, analyze_bytes_with_options, AnalyzerOptions};
    use std::path::PathBuf;

    fn decoded() -> AnalysisResult {
        let dict = fixtures::sample_dictionary_json();
        let data = fixtures::klipper_image(0x2000, 0x1800, 0x0400, &dict);
        analyze_bytes(&data).unwrap()
    }

    fn path() -> PathBuf {
        PathBuf::from("out/klipper.bin")
    }

    #[test]
    fn test_human_formatter() {
        let output = HumanFormatter::new().format_report(&decoded(), &path());
        assert!(output.contains("File: out/klipper.bin (65,536 bytes)"));
        assert!(output.contains("Valid Klipper firmware - bootloader offset 0x2000 (8 KiB)"));
        assert!(output.contains("Bootloader: 0x2000 (8 KiB) - HID / stm32duino bootloader"));
        assert!(output.contains("Link base:  0x08002000"));
        assert!(output.contains("MCU:          stm32f103xe"));
        assert!(output.contains("Clock:        72,000,000 Hz"));
        assert!(output.contains("make menuconfig:"));
        assert!(!output.contains("Probes:"));
    }

    #[test]
    fn test_human_verbose_shows_probes_and_words() {
        let output = HumanFormatter::verbose().format_report(&decoded(), &path());
        assert!(output.contains("Probes:"));
        assert!(output.contains("MATCH at 0x400"));
        assert!(output.contains("0x08002004  01210008  0x08002101  Reset"));
        assert!(output.contains("\"MCU\": \"stm32f103xe\""));
    }

    #[test]
    fn test_human_verbose_full_flash_dump_addresses() {
        // Erased bootloader area, application linked at 0x0800_2000.
        let mut data = vec![0xFFu8; 0x10000];
        fixtures::put_u32(&mut data, 0x2000, fixtures::MSP);
        fixtures::put_u32(&mut data, 0x2004, fixtures::RESET);
        data[0x2008..0x3000].fill(0);
        fixtures::put_u32(&mut data, 0x2400, 0x0800_2000 + 0x3040);
        let options = AnalyzerOptions::new().with_dictionary_offset(0x5040);
        let result = analyze_bytes_with_options(&data, &options).unwrap();
        assert_eq!(result.offset.image_origin, 0x2000);
        assert_eq!(result.link_base(), Some(0x0800_2000));

        let output = HumanFormatter::verbose().format_report(&result, &path());
        assert!(output.contains("0x08000000  FFFFFFFF  0xFFFFFFFF  MSP"), "{}", output);
        assert!(output.contains("0x08000004  FFFFFFFF  0xFFFFFFFF  Reset"), "{}", output);
        assert!(!output.contains("0x08002000  FFFFFFFF"));
    }

    #[test]
    fn test_human_quiet() {
        let output = HumanFormatter::quiet().format_report(&decoded(), &path());
        assert_eq!(
            output,
            "out/klipper.bin: Valid Klipper firmware - bootloader offset 0x2000 (8 KiB)\n"
        );
    }

    #[test]
    fn test_human_unresolved_and_invalid() {
        let data = fixtures::image_with_vectors(0x1000, 0xFFFF_FFFF, 0xFFFF_FFFF);
        let options = AnalyzerOptions::new().with_dictionary_offset(0x800);
        let result = analyze_bytes_with_options(&data, &options).unwrap();
        let output = HumanFormatter::new().format_report(&result, &path());
        assert!(output.contains("[!] Invalid or unrecognised ARM Cortex-M image"));
        assert!(output.contains("MSP:    0xFFFFFFFF (unmapped)  <-- invalid"));
        assert!(output.contains("Bootloader: could not determine"));
        assert!(output.contains("Dictionary: unavailable"));
        assert!(output.contains("[error] initial stack pointer is 0xFFFFFFFF"));
    }

    #[test]
    fn test_json_formatter() {
        let output = JsonFormatter::new().format_report(&decoded(), &path());
        let value: serde_json::Value = serde_json::from_str(&output).unwrap();
        assert_eq!(value["file"], "out/klipper.bin");
        assert_eq!(value["bootloader_offset"], 0x2000);
        assert_eq!(value["verdict"]["level"], "ok");
        assert_eq!(value["image_len"], 65536);
        assert_eq!(value["offset"]["outcome"]["status"], "resolved");
        assert_eq!(value["dictionary"]["status"], "decoded");
        assert_eq!(
            value["dictionary"]["dictionary"]["config"]["MCU"],
            "stm32f103xe"
        );
        assert_eq!(value["vector_table"]["verdict"]["status"], "valid");
    }

    #[test]
    fn test_json_compact_is_single_line() {
        let output = JsonFormatter::compact().format_report(&decoded(), &path());
        assert_eq!(output.trim_end().lines().count(), 1);
        let failure = JsonFormatter::compact().format_failure(&path(), "File too small");
        assert_eq!(
            failure,
            "{\"error\":\"File too small\",\"file\":\"out/klipper.bin\"}\n"
        );
    }

    #[test]
    fn test_short_formatter() {
        let output = ShortFormatter::new().format_report(&decoded(), &path());
        assert_eq!(output, "out/klipper.bin\tok\t0x2000\tstm32f103xe\n");

        let data = fixtures::image_with_vectors(0x100, fixtures::MSP, fixtures::RESET);
        let result = analyze_bytes(&data).unwrap();
        let output = ShortFormatter::new().format_report(&result, &path());
        assert_eq!(output, "out/klipper.bin\twarn\t-\t-\n");
    }
}
