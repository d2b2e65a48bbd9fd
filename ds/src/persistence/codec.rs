//! Gzip payload codec

use std::io::{Read, Write};

use flate2::Compression;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;

const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

pub fn compress(payload: &[u8]) -> std::io::Result<Vec<u8>> {
    let mut encoder = GzEncoder::new(Vec::with_capacity(payload.len() / 4), Compression::default());
    encoder.write_all(payload)?;
    encoder.finish()
}

pub fn decompress(bytes: &[u8]) -> std::io::Result<Vec<u8>> {
    let mut decoder = GzDecoder::new(bytes);
    let mut out = Vec::with_capacity(bytes.len() * 4);
    decoder.read_to_end(&mut out)?;
    Ok(out)
}

/// Whether `bytes` starts with the gzip header
pub fn is_gzip(bytes: &[u8]) -> bool {
    bytes.starts_with(&GZIP_MAGIC)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_compress_is_transparent() {
        let payload = br#"{"schemaVersion":1,"timestamp":5}"#.repeat(200);
        let packed = compress(&payload).unwrap();
        assert!(is_gzip(&packed));
        assert!(packed.len() < payload.len());
        assert_eq!(decompress(&packed).unwrap(), payload);
    }

    #[test]
    fn test_empty_payload() {
        let packed = compress(b"").unwrap();
        assert!(decompress(&packed).unwrap().is_empty());
    }

    #[test]
    fn test_decompress_rejects_garbage() {
        assert!(decompress(b"definitely not gzip").is_err());
        assert!(!is_gzip(b"{}"));
    }

    proptest! {
        #[test]
        fn test_any_payload_survives_compression(payload in proptest::collection::vec(any::<u8>(), 0..4096)) {
            let packed = compress(&payload).unwrap();
            prop_assert!(is_gzip(&packed));
            prop_assert_eq!(decompress(&packed).unwrap(), payload);
        }
    }
}
