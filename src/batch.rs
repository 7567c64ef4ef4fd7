//! Batch analysis of many firmware files.
//!
//! Inputs are expanded from files and directories, analyzed on a rayon
//! pool and returned in input order. A file that cannot be read or is too
//! short becomes a failed entry; it never aborts the batch.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, warn};
use walkdir::WalkDir;

use crate::error::{InspectError, Result};
use crate::types::{AnalysisResult, AnalyzerOptions};

/// Extension picked up when walking directories.
const FIRMWARE_EXTENSION: &str = "bin";

/// Outcome for one input file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum BatchOutcome {
    /// Analysis ran
    Analyzed {
        /// The analysis
        result: Box<AnalysisResult>,
    },
    /// The file could not be analyzed
    Failed {
        /// Error message
        error: String,
    },
}

/// One analyzed file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchEntry {
    /// Input path
    pub path: PathBuf,
    /// File size in bytes, when readable
    pub size: Option<u64>,
    /// Lower-case hex SHA-256 of the contents, when readable
    pub sha256: Option<String>,
    /// Result or error
    pub outcome: BatchOutcome,
}

impl BatchEntry {
    /// The analysis, if it ran.
    pub fn result(&self) -> Option<&AnalysisResult> {
        match &self.outcome {
            BatchOutcome::Analyzed { result } => Some(result.as_ref()),
            BatchOutcome::Failed { .. } => None,
        }
    }

    /// The error message, if the file failed.
    pub fn error(&self) -> Option<&str> {
        match &self.outcome {
            BatchOutcome::Analyzed { .. } => None,
            BatchOutcome::Failed { error } => Some(error),
        }
    }
}

/// A serializable record of a batch run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchReport {
    /// When the batch finished
    pub generated_at: DateTime<Utc>,
    /// Version of this library
    pub tool_version: String,
    /// Entries in input order
    pub entries: Vec<BatchEntry>,
}

impl BatchReport {
    /// Wrap entries, stamping the current time.
    pub fn new(entries: Vec<BatchEntry>) -> Self {
        Self {
            generated_at: Utc::now(),
            tool_version: crate::version().to_string(),
            entries,
        }
    }

    /// Number of entries that failed.
    pub fn failures(&self) -> usize {
        self.entries.iter().filter(|e| e.error().is_some()).count()
    }
}

/// Expand `paths` into a sorted, de-duplicated list of files.
///
/// Files are taken as given whatever their extension. Directories
/// contribute their `*.bin` files, descending into subdirectories only
/// when `recursive` is set.
pub fn collect_inputs<P: AsRef<Path>>(paths: &[P], recursive: bool) -> Result<Vec<PathBuf>> {
    let mut inputs = BTreeSet::new();

    for path in paths {
        let path = path.as_ref();
        if !path.is_dir() {
            inputs.insert(path.to_path_buf());
            continue;
        }

        let walker = WalkDir::new(path)
            .follow_links(true)
            .max_depth(if recursive { usize::MAX } else { 1 });
        for entry in walker {
            let entry = entry.map_err(|e| InspectError::Io(e.into()))?;
            let is_firmware = entry.file_type().is_file()
                && entry
                    .path()
                    .extension()
                    .is_some_and(|ext| ext.eq_ignore_ascii_case(FIRMWARE_EXTENSION));
            if is_firmware {
                inputs.insert(entry.into_path());
            }
        }
    }

    debug!("collected {} input file(s)", inputs.len());
    Ok(inputs.into_iter().collect())
}

/// Analyze every path on a pool of `jobs` threads (all cores when `None`).
pub fn analyze_paths(
    paths: &[PathBuf],
    options: &AnalyzerOptions,
    jobs: Option<usize>,
) -> Result<BatchReport> {
    let threads = jobs.unwrap_or_else(num_cpus::get).max(1);
    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(threads)
        .build()
        .map_err(|e| InspectError::ConfigError {
            message: format!("cannot start {} worker threads: {}", threads, e),
        })?;

    debug!("analyzing {} file(s) on {} thread(s)", paths.len(), threads);
    let entries = pool.install(|| {
        paths
            .par_iter()
            .map(|path| analyze_path(path, options))
            .collect()
    });

    Ok(BatchReport::new(entries))
}

/// Analyze one file into a batch entry.
pub fn analyze_path(path: &Path, options: &AnalyzerOptions) -> BatchEntry {
    let data = match std::fs::read(path) {
        Ok(data) => data,
        Err(e) => {
            warn!("{}: {}", path.display(), e);
            return BatchEntry {
                path: path.to_path_buf(),
                size: None,
                sha256: None,
                outcome: BatchOutcome::Failed {
                    error: InspectError::from(e).to_string(),
                },
            };
        }
    };

    let outcome = match crate::analyze_bytes_with_options(&data, options) {
        Ok(result) => BatchOutcome::Analyzed {
            result: Box::new(result),
        },
        Err(e) => BatchOutcome::Failed {
            error: e.to_string(),
        },
    };

    BatchEntry {
        path: path.to_path_buf(),
        size: Some(data.len() as u64),
        sha256: Some(sha256_hex(&data)),
        outcome,
    }
}

fn sha256_hex(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}
