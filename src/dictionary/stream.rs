//! zlib stream detection and bounded inflate.

use flate2::{Decompress, FlushDecompress, Status};

use crate::error::DictionaryError;

/// zlib CMF byte for deflate with a 32 KiB window.
pub const ZLIB_CMF: u8 = 0x78;

/// FLG bytes emitted by zlib at its four compression levels.
pub const ZLIB_FLG: [u8; 4] = [0x01, 0x5E, 0x9C, 0xDA];

const CHUNK: usize = 16 * 1024;

/// True when `data` starts with a zlib header the firmware build could emit.
pub fn is_zlib_header(data: &[u8]) -> bool {
    matches!(data, [ZLIB_CMF, flg, ..] if ZLIB_FLG.contains(flg))
}

/// A fully inflated stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Inflated {
    /// Decompressed bytes
    pub bytes: Vec<u8>,
    /// Compressed bytes consumed, header and checksum included
    pub consumed: usize,
}

/// Inflate the zlib stream at the start of `data`.
///
/// Trailing bytes after the stream are ignored. A stream that runs off the
/// end of `data` is an error, as is one inflating past `limit` bytes.
pub fn inflate(data: &[u8], limit: usize) -> Result<Inflated, DictionaryError> {
    let mut inflater = Decompress::new(true);
    // One byte of headroom past the cap tells "exactly at the cap" apart
    // from "over it".
    let ceiling = limit.saturating_add(1);
    let mut out: Vec<u8> = Vec::with_capacity(CHUNK.min(ceiling));

    loop {
        if out.len() > limit {
            return Err(DictionaryError::TooLarge(limit));
        }
        if out.len() == out.capacity() {
            out.reserve_exact(CHUNK.min(ceiling - out.len()));
        }

        let in_before = inflater.total_in();
        let out_before = inflater.total_out();
        let input = &data[in_before as usize..];

        let status = inflater
            .decompress_vec(input, &mut out, FlushDecompress::None)
            .map_err(|e| DictionaryError::Decompress(e.to_string()))?;

        if status == Status::StreamEnd {
            break;
        }

        let progressed = inflater.total_in() != in_before || inflater.total_out() != out_before;
        if !progressed && out.len() < out.capacity() {
            return Err(DictionaryError::Decompress(format!(
                "stream truncated after {} compressed bytes",
                inflater.total_in()
            )));
        }
    }

    if out.len() > limit {
        return Err(DictionaryError::TooLarge(limit));
    }

    Ok(Inflated {
        bytes: out,
        consumed: inflater.total_in() as usize,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures;

    #[test]
    fn test_header_detection() {
        assert!(is_zlib_header(&[0x78, 0x9C, 0x00]));
        assert!(is_zlib_header(&[0x78, 0xDA]));
        assert!(!is_zlib_header(&[0x78, 0x00]));
        assert!(!is_zlib_header(&[0x78]));
        assert!(!is_zlib_header(&[]));
    }

    #[test]
    fn test_inflate_ignores_trailing_bytes() {
        let payload = b"{\"config\":{\"MCU\":\"stm32f103xe\"}}";
        let mut data = fixtures::compress(payload);
        let compressed_len = data.len();
        data.extend_from_slice(&[0xFF; 64]);

        let inflated = inflate(&data, 1024).unwrap();
        assert_eq!(inflated.bytes, payload.to_vec());
        assert_eq!(inflated.consumed, compressed_len);
    }

    #[test]
    fn test_inflate_truncated_stream() {
        let payload = fixtures::sample_dictionary_json().to_string();
        let data = fixtures::compress(payload.as_bytes());
        let err = inflate(&data[..data.len() / 2], 1 << 20).unwrap_err();
        assert!(matches!(err, DictionaryError::Decompress(_)));
    }

    #[test]
    fn test_inflate_corrupt_stream() {
        let err = inflate(&[0x78, 0x9C, 0xFF, 0xFF, 0xFF, 0xFF], 1024).unwrap_err();
        assert!(matches!(err, DictionaryError::Decompress(_)));
    }

    #[test]
    fn test_inflate_size_cap() {
        let payload = vec![b'a'; 100_000];
        let data = fixtures::compress(&payload);
        assert_eq!(
            inflate(&data, 4096).unwrap_err(),
            DictionaryError::TooLarge(4096)
        );
        assert_eq!(inflate(&data, 100_000).unwrap().bytes.len(), 100_000);
    }
}
