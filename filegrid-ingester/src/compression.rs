//! Upload compression.
//!
//! Clients can ask for their upload to be stored compressed. Compression
//! happens here, before placement, so the stored artifact — the bytes the
//! checksum and file size describe — is the compressed body. Two codecs are
//! offered:
//!
//! - **gzip**: broad tooling compatibility, fast
//! - **brotli**: better ratio on text-heavy payloads, slower
//!
//! The receipt and the attribute sidecar record which codec was used so the
//! client can decompress after download.

use bytes::Bytes;
use filegrid_core::CompressionAlgorithm;
use std::io::Write;
use tracing::debug;

use crate::errors::IngestError;

const BROTLI_BUFFER: usize = 4096;
const BROTLI_QUALITY: u32 = 5;
const BROTLI_WINDOW: u32 = 22;

pub fn compress(data: &[u8], algorithm: CompressionAlgorithm) -> Result<Bytes, IngestError> {
    let compressed = match algorithm {
        CompressionAlgorithm::Gzip => {
            let mut encoder =
                flate2::write::GzEncoder::new(Vec::new(), flate2::Compression::default());
            encoder
                .write_all(data)
                .and_then(|_| encoder.finish())
                .map_err(|err| IngestError::Compression(format!("gzip: {err}")))?
        }
        CompressionAlgorithm::Brotli => {
            let mut out = Vec::new();
            {
                let mut writer = brotli::CompressorWriter::new(
                    &mut out,
                    BROTLI_BUFFER,
                    BROTLI_QUALITY,
                    BROTLI_WINDOW,
                );
                writer
                    .write_all(data)
                    .map_err(|err| IngestError::Compression(format!("brotli: {err}")))?;
            }
            out
        }
    };
    debug!(
        algorithm = algorithm.as_str(),
        original = data.len(),
        compressed = compressed.len(),
        "payload compressed"
    );
    Ok(Bytes::from(compressed))
}

pub fn decompress(data: &[u8], algorithm: CompressionAlgorithm) -> Result<Bytes, IngestError> {
    match algorithm {
        CompressionAlgorithm::Gzip => {
            use std::io::Read;
            let mut decoder = flate2::read::GzDecoder::new(data);
            let mut out = Vec::new();
            decoder
                .read_to_end(&mut out)
                .map_err(|err| IngestError::Compression(format!("gzip: {err}")))?;
            Ok(Bytes::from(out))
        }
        CompressionAlgorithm::Brotli => {
            use std::io::Read;
            let mut decoder = brotli::Decompressor::new(data, BROTLI_BUFFER);
            let mut out = Vec::new();
            decoder
                .read_to_end(&mut out)
                .map_err(|err| IngestError::Compression(format!("brotli: {err}")))?;
            Ok(Bytes::from(out))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gzip_roundtrip() {
        let body = b"the quick brown fox jumps over the lazy dog".repeat(50);
        let compressed = compress(&body, CompressionAlgorithm::Gzip).unwrap();
        assert!(compressed.len() < body.len());
        let restored = decompress(&compressed, CompressionAlgorithm::Gzip).unwrap();
        assert_eq!(&restored[..], &body[..]);
    }

    #[test]
    fn brotli_roundtrip() {
        let body = b"structured text compresses well ".repeat(100);
        let compressed = compress(&body, CompressionAlgorithm::Brotli).unwrap();
        assert!(compressed.len() < body.len());
        let restored = decompress(&compressed, CompressionAlgorithm::Brotli).unwrap();
        assert_eq!(&restored[..], &body[..]);
    }

    #[test]
    fn corrupt_input_fails_cleanly() {
        assert!(decompress(b"not gzip", CompressionAlgorithm::Gzip).is_err());
    }
}
