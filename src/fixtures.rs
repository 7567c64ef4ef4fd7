//! Synthetic firmware images shared by unit tests.

use std::io::Write;

use byteorder::{ByteOrder, LittleEndian};
use flate2::write::ZlibEncoder;
use flate2::Compression;
use serde_json::{json, Value};

/// Initial stack pointer used by most fixtures.
pub const MSP: u32 = 0x2000_1000;

/// Reset handler (Thumb) used by most fixtures.
pub const RESET: u32 = 0x0800_2101;

/// Write a little-endian word into `data` at `offset`.
pub fn put_u32(data: &mut [u8], offset: usize, value: u32) {
    LittleEndian::write_u32(&mut data[offset..offset + 4], value);
}

/// A zero-filled image of `len` bytes starting with an MSP and reset word.
pub fn image_with_vectors(len: usize, msp: u32, reset: u32) -> Vec<u8> {
    let mut data = vec![0u8; len];
    put_u32(&mut data, 0, msp);
    put_u32(&mut data, 4, reset);
    data
}

/// zlib-compress `payload` at the default level.
pub fn compress(payload: &[u8]) -> Vec<u8> {
    let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(payload).unwrap();
    encoder.finish().unwrap()
}

/// A dictionary shaped like a real STM32F103 build.
pub fn sample_dictionary_json() -> Value {
    json!({
        "app": "Klipper",
        "version": "v0.12.0-155-g4cfa2663",
        "build_versions": "gcc: (15:10.3-2021.07-4) 10.3.1 binutils: (2.38-4ubuntu2+15) 2.38",
        "license": "GNU GPLv3",
        "config": {
            "MCU": "stm32f103xe",
            "CLOCK_FREQ": 72000000,
            "SERIAL_BAUD": 250000,
            "RESERVE_PINS_serial": "PA10,PA9",
            "INITIAL_PINS": "!PA14",
            "ADC_MAX": 4095,
            "STATS_SUMSQ_BASE": 256
        },
        "commands": {
            "identify offset=%u count=%c": 1,
            "get_uptime": 2
        },
        "responses": {
            "identify_response offset=%u data=%.*s": 0
        }
    })
}

/// A complete application image.
///
/// Valid vector table, compressed `dictionary` at `dict_offset` and the
/// pointer literal for a `bootloader_offset` link base at `literal_offset`.
pub fn klipper_image(
    bootloader_offset: u32,
    dict_offset: usize,
    literal_offset: usize,
    dictionary: &Value,
) -> Vec<u8> {
    let stream = compress(dictionary.to_string().as_bytes());
    let len = 0x10000.max(dict_offset + stream.len() + 0x100);
    let mut data = image_with_vectors(len, MSP, RESET);
    data[dict_offset..dict_offset + stream.len()].copy_from_slice(&stream);
    put_u32(
        &mut data,
        literal_offset,
        0x0800_0000 + bootloader_offset + dict_offset as u32,
    );
    data
}
