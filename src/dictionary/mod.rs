//! Embedded build-configuration dictionary.
//!
//! Klipper firmware carries a zlib-compressed JSON document describing its
//! own build: MCU model, clock, pins, protocol commands, toolchain versions.
//! This module decodes that document and exposes the fields a board
//! configuration needs.

pub mod crystal;
pub mod stream;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, trace};

use crate::error::DictionaryError;
use crate::resolver::{OffsetResolution, ResolvedOffset};
use crate::types::{AnalyzerOptions, FirmwareImage};

/// Keys whose presence marks a JSON object as a Klipper build dictionary.
pub const IDENTIFYING_KEYS: [&str; 3] = ["MCU", "CLOCK_FREQ", "SERIAL_BAUD"];

/// Decoded configuration dictionary.
///
/// Unknown keys are kept verbatim; missing keys simply return `None` from
/// the accessors.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConfigDictionary(Map<String, Value>);

impl ConfigDictionary {
    /// Wrap a JSON object.
    pub fn new(map: Map<String, Value>) -> Self {
        Self(map)
    }

    /// Parse inflated dictionary bytes.
    pub fn decode(bytes: &[u8]) -> Result<Self, DictionaryError> {
        let text = std::str::from_utf8(bytes)
            .map_err(|e| DictionaryError::Decode(format!("invalid UTF-8: {}", e)))?;
        let text = text.trim_matches(|c: char| c.is_whitespace() || c == '\0');

        match serde_json::from_str::<Value>(text) {
            Ok(Value::Object(map)) => Ok(Self(map)),
            Ok(other) => Err(DictionaryError::Decode(format!(
                "expected a JSON object, found {}",
                json_kind(&other)
            ))),
            Err(e) => Err(DictionaryError::Decode(e.to_string())),
        }
    }

    /// The whole mapping.
    pub fn as_map(&self) -> &Map<String, Value> {
        &self.0
    }

    /// Top-level value for `key`.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    /// Number of top-level keys.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// True when the mapping has no keys.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// The `config` section, or the root when the dictionary is flat.
    pub fn config(&self) -> &Map<String, Value> {
        match self.0.get("config") {
            Some(Value::Object(config)) => config,
            _ => &self.0,
        }
    }

    /// True when the config section carries any identifying key.
    pub fn is_klipper(&self) -> bool {
        let config = self.config();
        IDENTIFYING_KEYS.iter().any(|k| config.contains_key(*k))
    }

    /// MCU model, e.g. `stm32f103xe`.
    pub fn mcu(&self) -> Option<&str> {
        self.config().get("MCU").and_then(Value::as_str)
    }

    /// CPU clock frequency in Hz.
    pub fn clock_freq(&self) -> Option<u64> {
        self.config().get("CLOCK_FREQ").and_then(as_integer)
    }

    /// Serial baud rate.
    pub fn serial_baud(&self) -> Option<u64> {
        self.config().get("SERIAL_BAUD").and_then(as_integer)
    }

    /// Pins reserved for the serial interface.
    pub fn serial_pins(&self) -> Option<String> {
        let config = self.config();
        config
            .get("RESERVE_PINS_serial")
            .or_else(|| config.get("BUS_PINS_serial"))
            .and_then(as_text)
    }

    /// Pins driven at startup.
    pub fn initial_pins(&self) -> Option<String> {
        self.config().get("INITIAL_PINS").and_then(as_text)
    }

    /// Firmware version string.
    pub fn version(&self) -> Option<&str> {
        self.0.get("version").and_then(Value::as_str)
    }

    /// Toolchain identifiers recorded at build time.
    pub fn build_versions(&self) -> Option<&str> {
        self.0.get("build_versions").and_then(Value::as_str)
    }
}

fn as_integer(value: &Value) -> Option<u64> {
    match value {
        Value::Number(n) => n
            .as_u64()
            .or_else(|| n.as_f64().filter(|f| *f >= 0.0).map(|f| f as u64)),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn as_text(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

/// A dictionary stream found by scanning.
#[derive(Debug, Clone, PartialEq)]
pub struct LocatedStream {
    /// File offset of the zlib header
    pub file_offset: usize,
    /// Compressed length in bytes
    pub compressed_len: usize,
    /// Decoded contents
    pub dictionary: ConfigDictionary,
}

/// Find the first zlib stream that decodes to a Klipper dictionary.
///
/// Streams that fail to inflate, fail to parse, or parse to a JSON object
/// without any identifying key are skipped.
pub fn find_dictionary_stream(image: &FirmwareImage<'_>, limit: usize) -> Option<LocatedStream> {
    const SCAN_START: usize = 4;
    let data = image.bytes();
    let haystack = data.get(SCAN_START..)?;

    memchr::memchr_iter(stream::ZLIB_CMF, haystack)
        .map(|i| i + SCAN_START)
        .filter(|&offset| stream::is_zlib_header(&data[offset..]))
        .find_map(|offset| {
            let inflated = stream::inflate(&data[offset..], limit).ok()?;
            let dictionary = ConfigDictionary::decode(&inflated.bytes).ok()?;
            if !dictionary.is_klipper() {
                trace!("zlib stream at 0x{:X} is not a build dictionary", offset);
                return None;
            }
            debug!(
                "dictionary stream at file offset 0x{:X} ({} bytes compressed)",
                offset, inflated.consumed
            );
            Some(LocatedStream {
                file_offset: offset,
                compressed_len: inflated.consumed,
                dictionary,
            })
        })
}

/// Result of dictionary extraction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum DictionaryOutcome {
    /// The dictionary was located and decoded
    Decoded {
        /// File offset of the compressed stream
        file_offset: usize,
        /// Compressed length in bytes
        compressed_len: usize,
        /// Decoded contents
        dictionary: ConfigDictionary,
    },
    /// The dictionary could not be recovered
    Unavailable {
        /// Why
        reason: DictionaryError,
    },
}

impl DictionaryOutcome {
    /// The decoded dictionary, if any.
    pub fn dictionary(&self) -> Option<&ConfigDictionary> {
        match self {
            DictionaryOutcome::Decoded { dictionary, .. } => Some(dictionary),
            DictionaryOutcome::Unavailable { .. } => None,
        }
    }

    /// The failure reason, if any.
    pub fn error(&self) -> Option<&DictionaryError> {
        match self {
            DictionaryOutcome::Decoded { .. } => None,
            DictionaryOutcome::Unavailable { reason } => Some(reason),
        }
    }
}

/// Locate, inflate and decode the dictionary using a resolved offset.
///
/// The stream position is recovered from the matched pointer literal and
/// the resolved link base; nothing is attempted when the offset is
/// ambiguous or unresolved.
pub fn extract_dictionary(
    image: &FirmwareImage<'_>,
    resolution: &OffsetResolution,
    options: &AnalyzerOptions,
) -> DictionaryOutcome {
    let ResolvedOffset::Resolved {
        link_base,
        dictionary_address,
        ..
    } = &resolution.outcome
    else {
        return DictionaryOutcome::Unavailable {
            reason: DictionaryError::OffsetUnresolved,
        };
    };

    let file_offset = u64::from(dictionary_address.wrapping_sub(*link_base))
        + resolution.image_origin as u64;
    let Some(tail) = usize::try_from(file_offset)
        .ok()
        .and_then(|offset| image.tail(offset))
        .filter(|tail| !tail.is_empty())
    else {
        return DictionaryOutcome::Unavailable {
            reason: DictionaryError::OutOfBounds(file_offset),
        };
    };
    let file_offset = file_offset as usize;

    let decoded = stream::inflate(tail, options.max_dictionary_size).and_then(|inflated| {
        ConfigDictionary::decode(&inflated.bytes).map(|dictionary| (inflated.consumed, dictionary))
    });

    match decoded {
        Ok((compressed_len, dictionary)) => {
            debug!(
                "decoded dictionary at 0x{:X}: {} keys",
                file_offset,
                dictionary.len()
            );
            DictionaryOutcome::Decoded {
                file_offset,
                compressed_len,
                dictionary,
            }
        }
        Err(reason) => {
            debug!("dictionary at 0x{:X} unavailable: {}", file_offset, reason);
            DictionaryOutcome::Unavailable { reason }
        }
    }
}
