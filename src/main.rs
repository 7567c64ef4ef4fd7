//! Klipper Inspect CLI
//!
//! Command-line tool for checking Cortex-M Klipper firmware images before
//! flashing them.

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use klipper_inspect::batch::{analyze_paths, collect_inputs, BatchOutcome, BatchReport};
use klipper_inspect::formatter::{HumanFormatter, JsonFormatter, ReportFormatter, ShortFormatter};
use klipper_inspect::{AnalyzerOptions, OffsetCandidate};
use std::io::Write;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

/// Static analyzer for Klipper firmware binaries.
///
/// Validates the Cortex-M vector table, recovers the bootloader offset the
/// image was linked for and decodes the embedded build dictionary.
#[derive(Parser, Debug)]
#[command(name = "klipper-inspect")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Firmware file(s) or directories to analyze
    #[arg(required = true)]
    files: Vec<PathBuf>,

    /// Output format
    #[arg(short, long, default_value = "human")]
    format: OutputFormat,

    /// Write the report to this file instead of stdout
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// File offset of the compressed dictionary (scan the image when unset)
    #[arg(long, env = "KLIPPER_DICT_OFFSET", value_parser = parse_u32)]
    dict_offset: Option<u32>,

    /// Flash base address
    #[arg(long, value_parser = parse_u32)]
    flash_base: Option<u32>,

    /// Flash size in bytes
    #[arg(long, value_parser = parse_u32)]
    flash_size: Option<u32>,

    /// Additional bootloader offset to try (repeatable)
    #[arg(long = "extra-offset", value_parser = parse_u32)]
    extra_offsets: Vec<u32>,

    /// Most pointer matches a single candidate may have
    #[arg(long)]
    max_matches: Option<usize>,

    /// Accept a single pointer match per candidate only
    #[arg(long)]
    strict: bool,

    /// Worker threads for multiple files (default: all cores)
    #[arg(short, long)]
    jobs: Option<usize>,

    /// Descend into subdirectories
    #[arg(short, long)]
    recursive: bool,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,

    /// Quiet mode (only output essential info)
    #[arg(short, long)]
    quiet: bool,
}

/// Output format options.
#[derive(Debug, Clone, Copy, ValueEnum)]
enum OutputFormat {
    /// Human-readable output
    Human,
    /// JSON output
    Json,
    /// Compact single-line output
    Short,
}

/// Parse a `0x`-prefixed hexadecimal or plain decimal number.
fn parse_u32(s: &str) -> std::result::Result<u32, String> {
    let s = s.trim().replace('_', "");
    let parsed = match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        Some(hex) => u32::from_str_radix(hex, 16),
        None => s.parse(),
    };
    parsed.map_err(|e| format!("invalid number '{}': {}", s, e))
}

fn main() -> ExitCode {
    let args = Args::parse();
    init_logging(args.verbose);

    match run(&args) {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

fn init_logging(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("klipper_inspect=debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn build_options(args: &Args) -> Result<AnalyzerOptions> {
    let mut options = if args.strict {
        AnalyzerOptions::strict()
    } else {
        AnalyzerOptions::new()
    };

    if let Some(max) = args.max_matches {
        options.max_literal_matches = max;
    }
    if let Some(base) = args.flash_base {
        options.memory.flash_base = base;
    }
    if let Some(size) = args.flash_size {
        options.memory.flash_size = size;
    }
    if let Some(offset) = args.dict_offset {
        options = options.with_dictionary_offset(offset);
    }
    for &offset in &args.extra_offsets {
        let label = format!("custom {} KiB bootloader", offset / 1024);
        let candidate = OffsetCandidate::new(offset, label);
        options.offsets = options
            .offsets
            .with_candidate(candidate)
            .with_context(|| format!("cannot add offset 0x{:X}", offset))?;
    }

    options.validate().context("invalid analysis options")?;
    Ok(options)
}

fn run(args: &Args) -> Result<bool> {
    let options = build_options(args)?;
    let inputs = collect_inputs(&args.files, args.recursive).context("cannot list inputs")?;
    if inputs.is_empty() {
        anyhow::bail!("no firmware files found");
    }

    let report = analyze_paths(&inputs, &options, args.jobs)?;
    let rendered = render(&report, args)?;

    match &args.output {
        Some(path) => std::fs::write(path, rendered)
            .with_context(|| format!("cannot write {}", path.display()))?,
        None => std::io::stdout()
            .lock()
            .write_all(rendered.as_bytes())
            .context("cannot write to stdout")?,
    }

    Ok(report.failures() == 0)
}

fn render(report: &BatchReport, args: &Args) -> Result<String> {
    // Several files as JSON become one document.
    if matches!(args.format, OutputFormat::Json) && report.entries.len() > 1 {
        let mut s = serde_json::to_string_pretty(report)?;
        s.push('\n');
        return Ok(s);
    }

    let formatter: Box<dyn ReportFormatter> = match args.format {
        OutputFormat::Human if args.quiet => Box::new(HumanFormatter::quiet()),
        OutputFormat::Human if args.verbose => Box::new(HumanFormatter::verbose()),
        OutputFormat::Human => Box::new(HumanFormatter::new()),
        OutputFormat::Json => Box::new(JsonFormatter::new()),
        OutputFormat::Short => Box::new(ShortFormatter::new()),
    };

    let mut out = String::new();
    for entry in &report.entries {
        match &entry.outcome {
            BatchOutcome::Analyzed { result } => {
                out.push_str(&formatter.format_report(result, &entry.path));
            }
            BatchOutcome::Failed { error } => {
                out.push_str(&formatter.format_failure(&entry.path, error));
            }
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use klipper_inspect::DictionaryLocation;

    #[test]
    fn test_args_parsing() {
        let args = Args::try_parse_from(["klipper-inspect", "klipper.bin"]).unwrap();
        assert_eq!(args.files.len(), 1);
        assert!(!args.verbose);
        assert!(args.extra_offsets.is_empty());
    }

    #[test]
    fn test_format_options() {
        let args =
            Args::try_parse_from(["klipper-inspect", "-f", "json", "a.bin", "b.bin"]).unwrap();
        assert!(matches!(args.format, OutputFormat::Json));
        assert_eq!(args.files.len(), 2);
    }

    #[test]
    fn test_parse_u32() {
        assert_eq!(parse_u32("0x1040"), Ok(0x1040));
        assert_eq!(parse_u32("0X8000"), Ok(0x8000));
        assert_eq!(parse_u32("4160"), Ok(4160));
        assert_eq!(parse_u32("0x0800_0000"), Ok(0x0800_0000));
        assert!(parse_u32("0xZZ").is_err());
        assert!(parse_u32("-1").is_err());
    }

    #[test]
    fn test_options_from_flags() {
        let args = Args::try_parse_from([
            "klipper-inspect",
            "--dict-offset",
            "0x1040",
            "--extra-offset",
            "0x4000",
            "--extra-offset",
            "0xC000",
            "--strict",
            "klipper.bin",
        ])
        .unwrap();
        let options = build_options(&args).unwrap();
        assert_eq!(options.dictionary, DictionaryLocation::Fixed(0x1040));
        assert_eq!(options.max_literal_matches, 1);
        assert_eq!(options.offsets.len(), 9);
        assert_eq!(
            options.offsets.label_for(0x4000),
            Some("custom 16 KiB bootloader")
        );
    }

    #[test]
    fn test_duplicate_extra_offset_rejected() {
        let args =
            Args::try_parse_from(["klipper-inspect", "--extra-offset", "0x2000", "klipper.bin"])
                .unwrap();
        assert!(build_options(&args).is_err());
    }
}
