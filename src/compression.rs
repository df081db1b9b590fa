use crate::error::{Result, UnpackError};
use flate2::{Decompress, FlushDecompress, Status};

pub const DEFAULT_MAX_DECOMPRESSED_SIZE: usize = 512 * 1024 * 1024;

const INITIAL_CAPACITY: usize = 64 * 1024;

/// zlib-framed inflate with an output ceiling.
///
/// Anything short of a complete, checksummed stream is `CorruptData`,
/// including empty input.
#[derive(Debug, Clone)]
pub struct Decompressor {
    max_output: usize,
}

impl Decompressor {
    pub fn new() -> Self {
        Self {
            max_output: DEFAULT_MAX_DECOMPRESSED_SIZE,
        }
    }

    pub fn with_max_output(max_output: usize) -> Self {
        Self { max_output }
    }

    pub fn max_output(&self) -> usize {
        self.max_output
    }

    pub fn decompress(&self, input: &[u8]) -> Result<Vec<u8>> {
        if input.is_empty() {
            return Err(UnpackError::CorruptData("empty compressed stream".to_string()));
        }

        let mut inflater = Decompress::new(true);
        // one byte past the limit so a stream of exactly max_output bytes can finish
        let ceiling = self.max_output.saturating_add(1);
        let initial = input
            .len()
            .saturating_mul(4)
            .clamp(INITIAL_CAPACITY.min(ceiling), ceiling);
        let mut output = Vec::with_capacity(initial);

        loop {
            if output.len() > self.max_output {
                return Err(UnpackError::PayloadTooLarge {
                    size: output.len() as u64,
                    limit: self.max_output as u64,
                });
            }
            if output.len() == output.capacity() {
                let grow = output.capacity().max(1).min(ceiling - output.len());
                output.reserve_exact(grow);
            }

            let before_in = inflater.total_in();
            let before_out = inflater.total_out();
            let consumed = before_in as usize;

            // `Finish` treats the spare capacity as the whole output window
            let status = inflater
                .decompress_vec(&input[consumed..], &mut output, FlushDecompress::None)
                .map_err(|e| UnpackError::CorruptData(format!("invalid deflate stream: {}", e)))?;

            match status {
                Status::StreamEnd => break,
                Status::Ok | Status::BufError => {
                    let stalled = inflater.total_in() == before_in && inflater.total_out() == before_out;
                    if stalled && output.len() < output.capacity() {
                        return Err(UnpackError::CorruptData(format!(
                            "truncated deflate stream after {} of {} input bytes",
                            inflater.total_in(),
                            input.len()
                        )));
                    }
                }
            }
        }

        if output.len() > self.max_output {
            return Err(UnpackError::PayloadTooLarge {
                size: output.len() as u64,
                limit: self.max_output as u64,
            });
        }

        let trailing = input.len() - inflater.total_in() as usize;
        if trailing > 0 {
            tracing::debug!(trailing, "ignoring bytes after end of deflate stream");
        }

        Ok(output)
    }
}

impl Default for Decompressor {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::write::ZlibEncoder;
    use flate2::Compression;
    use std::io::Write;

    fn zlib(data: &[u8]) -> Vec<u8> {
        let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(data).unwrap();
        encoder.finish().unwrap()
    }

    #[test]
    fn test_decompress_round_trip() {
        let data: Vec<u8> = (0..200_000u32).flat_map(|i| (i % 251).to_le_bytes()).collect();
        let decompressed = Decompressor::new().decompress(&zlib(&data)).unwrap();
        assert_eq!(decompressed, data);
    }

    #[test]
    fn test_decompress_beyond_initial_capacity() {
        // highly repetitive, so the inflated size is far past 4x the input
        let data: Vec<u8> = b"entity method call "
            .iter()
            .copied()
            .cycle()
            .take(800_000)
            .collect();
        let compressed = zlib(&data);
        assert!(data.len() > compressed.len().saturating_mul(4).max(INITIAL_CAPACITY));

        let decompressed = Decompressor::new().decompress(&compressed).unwrap();
        assert_eq!(decompressed, data);
    }

    #[test]
    fn test_empty_input_is_corrupt() {
        let err = Decompressor::new().decompress(&[]).unwrap_err();
        assert!(matches!(err, UnpackError::CorruptData(_)));
    }

    #[test]
    fn test_bad_header() {
        let err = Decompressor::new().decompress(&[0x12, 0x34, 0x56, 0x78]).unwrap_err();
        assert!(matches!(err, UnpackError::CorruptData(_)));
    }

    #[test]
    fn test_truncated_stream() {
        let compressed = zlib(b"some replay packets, repeated, repeated, repeated");
        let err = Decompressor::new()
            .decompress(&compressed[..compressed.len() - 6])
            .unwrap_err();
        assert!(matches!(err, UnpackError::CorruptData(_)));
    }

    #[test]
    fn test_checksum_mismatch() {
        let mut compressed = zlib(b"checksummed payload");
        let last = compressed.len() - 1;
        compressed[last] ^= 0xff;
        let err = Decompressor::new().decompress(&compressed).unwrap_err();
        assert!(matches!(err, UnpackError::CorruptData(_)));
    }

    #[test]
    fn test_trailing_padding_ignored() {
        let mut compressed = zlib(b"padded to a chunk boundary");
        compressed.extend_from_slice(&[0; 7]);
        let decompressed = Decompressor::new().decompress(&compressed).unwrap();
        assert_eq!(decompressed, b"padded to a chunk boundary");
    }

    #[test]
    fn test_output_limit() {
        let compressed = zlib(&[0u8; 10_000]);
        let err = Decompressor::with_max_output(1024).decompress(&compressed).unwrap_err();
        assert!(matches!(err, UnpackError::PayloadTooLarge { limit: 1024, .. }));

        let ok = Decompressor::with_max_output(10_000).decompress(&compressed).unwrap();
        assert_eq!(ok.len(), 10_000);
    }
}
