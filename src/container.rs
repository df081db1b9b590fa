//! Replay container: header, metadata block and encrypted body.
//!
//! ```text
//! 0    magic          u32 LE   (opaque, not validated)
//! 4    block count    u32 LE   (only 1 is supported)
//! 8    block length   i32 LE
//! 12   metadata JSON  `block length` bytes, UTF-8
//! ..   encrypted + compressed body up to end of file
//! ```

use crate::cipher::{DecryptProgress, ReplayCipher};
use crate::compression::Decompressor;
use crate::config::UnpackConfig;
use crate::debug::{format_bytes, hex_preview, is_debug_enabled};
use crate::error::{Result, UnpackError};
use bytes::{Buf, Bytes};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

pub const HEADER_SIZE: usize = 12;
pub const SUPPORTED_BLOCK_COUNT: u32 = 1;
pub const DUMP_SUFFIX: &str = "hex";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReplayHeader {
    pub magic: u32,
    pub block_count: u32,
}

/// Plaintext match metadata. Its schema belongs to the game; it is kept as
/// an opaque JSON document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ArenaInfo(serde_json::Value);

impl ArenaInfo {
    pub fn value(&self) -> &serde_json::Value {
        &self.0
    }

    pub fn into_value(self) -> serde_json::Value {
        self.0
    }

    pub fn get(&self, key: &str) -> Option<&serde_json::Value> {
        self.0.get(key)
    }

    /// True for `{}`, `[]` and `null`.
    pub fn is_empty(&self) -> bool {
        match &self.0 {
            serde_json::Value::Object(map) => map.is_empty(),
            serde_json::Value::Array(items) => items.is_empty(),
            serde_json::Value::Null => true,
            _ => false,
        }
    }
}

#[derive(Debug, Clone)]
pub struct DecodedReplay {
    pub header: ReplayHeader,
    pub arena_info: ArenaInfo,
    /// Decrypted, decompressed packet stream.
    pub data: Bytes,
}

#[derive(Debug)]
struct ContainerParts {
    header: ReplayHeader,
    arena_info: ArenaInfo,
    body: Bytes,
}

fn split_container(mut buf: Bytes) -> Result<ContainerParts> {
    if buf.remaining() < 8 {
        return Err(UnpackError::CorruptHeader(format!(
            "file is {} bytes, too short for a header",
            buf.remaining()
        )));
    }

    let magic = buf.get_u32_le();
    let block_count = buf.get_u32_le();
    if block_count != SUPPORTED_BLOCK_COUNT {
        return Err(UnpackError::UnsupportedFormat(block_count));
    }

    if buf.remaining() < 4 {
        return Err(UnpackError::CorruptHeader("missing metadata block length".to_string()));
    }
    let block_length = buf.get_i32_le();
    let block_length = usize::try_from(block_length)
        .map_err(|_| UnpackError::CorruptHeader(format!("negative metadata block length {}", block_length)))?;
    if block_length > buf.remaining() {
        return Err(UnpackError::CorruptHeader(format!(
            "metadata block claims {} bytes, only {} remain",
            block_length,
            buf.remaining()
        )));
    }

    let metadata = buf.split_to(block_length);
    let arena_info = serde_json::from_slice(&metadata)
        .map(ArenaInfo)
        .map_err(|e| UnpackError::CorruptHeader(format!("metadata block is not valid JSON: {}", e)))?;

    Ok(ContainerParts {
        header: ReplayHeader { magic, block_count },
        arena_info,
        body: buf,
    })
}

/// A replay file on disk, checked to exist but not yet read.
#[derive(Debug, Clone)]
pub struct ReplayFile {
    path: PathBuf,
    config: UnpackConfig,
    progress: Option<DecryptProgress>,
}

impl ReplayFile {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        Self::open_with(path, UnpackConfig::default())
    }

    pub fn open_with(path: impl AsRef<Path>, config: UnpackConfig) -> Result<Self> {
        let path = path.as_ref();
        if !path.is_file() {
            return Err(UnpackError::FileNotFound(path.to_path_buf()));
        }

        Ok(Self {
            path: path.to_path_buf(),
            config,
            progress: None,
        })
    }

    pub fn with_progress(mut self, progress: DecryptProgress) -> Self {
        self.progress = Some(progress);
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn config(&self) -> &UnpackConfig {
        &self.config
    }

    /// Where the diagnostic dump goes: the replay's file name plus `.hex`.
    pub fn dump_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_else(|| "replay".into());
        name.push(".");
        name.push(DUMP_SUFFIX);

        match &self.config.dump_dir {
            Some(dir) => dir.join(name),
            None => PathBuf::from(name),
        }
    }

    /// Read, split, decrypt and inflate the whole replay.
    pub fn decode(&self) -> Result<DecodedReplay> {
        let size = fs::metadata(&self.path)?.len();
        if size > self.config.max_replay_size {
            return Err(UnpackError::PayloadTooLarge {
                size,
                limit: self.config.max_replay_size,
            });
        }

        let raw = Bytes::from(fs::read(&self.path)?);
        let parts = split_container(raw)?;

        tracing::debug!(
            path = %self.path.display(),
            magic = %format!("{:#010x}", parts.header.magic),
            body = %format_bytes(parts.body.len()),
            "split replay container"
        );

        let mut cipher = ReplayCipher::new().with_tail_policy(self.config.tail_policy);
        if let Some(progress) = &self.progress {
            cipher = cipher.with_progress(progress.clone());
        }
        let decrypted = cipher.decrypt(&parts.body)?;

        let data = Decompressor::with_max_output(self.config.max_decompressed_size).decompress(&decrypted)?;

        tracing::debug!(
            decrypted = %format_bytes(decrypted.len()),
            decompressed = %format_bytes(data.len()),
            head = %hex_preview(&data, 16),
            "decoded replay body"
        );

        if self.config.dump_decrypted || is_debug_enabled() {
            self.dump(&data);
        }

        Ok(DecodedReplay {
            header: parts.header,
            arena_info: parts.arena_info,
            data: Bytes::from(data),
        })
    }

    fn dump(&self, data: &[u8]) {
        let target = self.dump_path();
        match fs::write(&target, data) {
            Ok(()) => tracing::info!(path = %target.display(), size = data.len(), "dumped decrypted replay"),
            Err(e) => tracing::warn!(path = %target.display(), error = %e, "cannot dump replay"),
        }
    }
}

/// Decode the replay at `path` with default settings.
pub fn open_replay(path: impl AsRef<Path>) -> Result<(ArenaInfo, Bytes)> {
    open_replay_with(path, UnpackConfig::default())
}

pub fn open_replay_with(path: impl AsRef<Path>, config: UnpackConfig) -> Result<(ArenaInfo, Bytes)> {
    let decoded = ReplayFile::open_with(path, config)?.decode()?;
    Ok((decoded.arena_info, decoded.data))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cipher::{encrypt_for_tests, TailPolicy};
    use flate2::write::ZlibEncoder;
    use flate2::Compression;
    use std::io::Write;

    fn header(block_count: u32, metadata: &[u8]) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(&0x1234_5678u32.to_le_bytes());
        out.extend_from_slice(&block_count.to_le_bytes());
        out.extend_from_slice(&(metadata.len() as i32).to_le_bytes());
        out.extend_from_slice(metadata);
        out
    }

    fn build_replay(metadata: &[u8], packets: &[u8]) -> Vec<u8> {
        let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(packets).unwrap();
        let compressed = encoder.finish().unwrap();

        let mut file = header(1, metadata);
        file.extend(encrypt_for_tests(&compressed, *b"\x00sync\x00\x00\x00"));
        file
    }

    fn write_file(dir: &Path, name: &str, contents: &[u8]) -> PathBuf {
        let path = dir.join(name);
        fs::write(&path, contents).unwrap();
        path
    }

    #[test]
    fn test_open_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let err = open_replay(dir.path().join("nope.wowsreplay")).unwrap_err();
        assert!(matches!(err, UnpackError::FileNotFound(_)));
    }

    #[test]
    fn test_open_directory_is_not_a_replay() {
        let dir = tempfile::tempdir().unwrap();
        let err = open_replay(dir.path()).unwrap_err();
        assert!(matches!(err, UnpackError::FileNotFound(_)));
    }

    #[test]
    fn test_large_packet_stream() {
        let dir = tempfile::tempdir().unwrap();
        let packets: Vec<u8> = (0..800_000u32).map(|i| (i % 97) as u8).collect();
        let path = write_file(dir.path(), "long.wowsreplay", &build_replay(b"{}", &packets));

        let (_, data) = open_replay(&path).unwrap();
        assert_eq!(data.len(), packets.len());
        assert_eq!(&data[..], &packets[..]);
    }

    #[test]
    fn test_full_pipeline() {
        let dir = tempfile::tempdir().unwrap();
        let packets: Vec<u8> = (0..5000u32).flat_map(|i| i.to_le_bytes()).collect();
        let metadata = br#"{"mapName":"spaces/16_OC_bees_to_honey","playersPerTeam":12}"#;
        let path = write_file(dir.path(), "match.wowsreplay", &build_replay(metadata, &packets));

        let (arena_info, data) = open_replay(&path).unwrap();
        assert_eq!(arena_info.get("playersPerTeam"), Some(&serde_json::json!(12)));
        assert_eq!(&data[..], &packets[..]);

        let decoded = ReplayFile::open(&path).unwrap().decode().unwrap();
        assert_eq!(decoded.header.magic, 0x1234_5678);
        assert_eq!(decoded.header.block_count, 1);
    }

    #[test]
    fn test_body_starts_after_metadata_block() {
        let metadata = br#"{"a":[1,2,3]}"#;
        let mut file = header(1, metadata);
        file.extend_from_slice(b"BODYBYTES");

        let parts = split_container(Bytes::from(file)).unwrap();
        assert_eq!(parts.arena_info.value(), &serde_json::json!({"a": [1, 2, 3]}));
        assert_eq!(&parts.body[..], b"BODYBYTES");
    }

    #[test]
    fn test_unsupported_block_count() {
        let file = header(2, b"{}");
        assert!(matches!(
            split_container(Bytes::from(file)),
            Err(UnpackError::UnsupportedFormat(2))
        ));
    }

    #[test]
    fn test_corrupt_headers() {
        assert!(matches!(
            split_container(Bytes::from_static(&[1, 0, 0, 0])),
            Err(UnpackError::CorruptHeader(_))
        ));

        let bad_json = header(1, b"{not json");
        assert!(matches!(split_container(Bytes::from(bad_json)), Err(UnpackError::CorruptHeader(_))));

        let mut overlong = header(1, b"{}");
        overlong[8..12].copy_from_slice(&100i32.to_le_bytes());
        assert!(matches!(split_container(Bytes::from(overlong)), Err(UnpackError::CorruptHeader(_))));

        let mut negative = header(1, b"{}");
        negative[8..12].copy_from_slice(&(-1i32).to_le_bytes());
        assert!(matches!(split_container(Bytes::from(negative)), Err(UnpackError::CorruptHeader(_))));

        let not_utf8 = header(1, &[b'"', 0xff, b'"']);
        assert!(matches!(split_container(Bytes::from(not_utf8)), Err(UnpackError::CorruptHeader(_))));
    }

    #[test]
    fn test_single_chunk_body_is_corrupt_data() {
        let dir = tempfile::tempdir().unwrap();
        let mut file = header(1, b"{}");
        file.extend_from_slice(&[0x5a; 8]);
        let path = write_file(dir.path(), "tiny.wowsreplay", &file);

        let parts = split_container(Bytes::from(file)).unwrap();
        assert!(parts.arena_info.is_empty());
        assert_eq!(parts.body.len(), 8);

        let err = open_replay(&path).unwrap_err();
        assert!(matches!(err, UnpackError::CorruptData(_)));
    }

    #[test]
    fn test_size_limit() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_file(dir.path(), "big.wowsreplay", &build_replay(b"{}", &[7; 256]));

        let config = UnpackConfig::new().with_max_replay_size(16);
        let err = open_replay_with(&path, config).unwrap_err();
        assert!(matches!(err, UnpackError::PayloadTooLarge { limit: 16, .. }));
    }

    #[test]
    fn test_tail_policy_from_config() {
        let dir = tempfile::tempdir().unwrap();
        let mut file = build_replay(b"{}", b"packets");
        file.extend_from_slice(&[1, 2, 3]);
        let path = write_file(dir.path(), "tail.wowsreplay", &file);

        let (_, data) = open_replay(&path).unwrap();
        assert_eq!(&data[..], b"packets");

        let strict = UnpackConfig::new().with_tail_policy(TailPolicy::Reject);
        assert!(matches!(open_replay_with(&path, strict), Err(UnpackError::CorruptData(_))));
    }

    #[test]
    fn test_dump_written_to_dump_dir() {
        let dir = tempfile::tempdir().unwrap();
        let dumps = tempfile::tempdir().unwrap();
        let path = write_file(dir.path(), "dumped.wowsreplay", &build_replay(b"{}", b"stream"));

        let config = UnpackConfig::new().with_dump(true).with_dump_dir(dumps.path());
        let replay = ReplayFile::open_with(&path, config).unwrap();
        assert_eq!(replay.dump_path(), dumps.path().join("dumped.wowsreplay.hex"));

        replay.decode().unwrap();
        assert_eq!(fs::read(dumps.path().join("dumped.wowsreplay.hex")).unwrap(), b"stream");
    }

    #[test]
    fn test_dump_failure_is_not_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_file(dir.path(), "ok.wowsreplay", &build_replay(b"{}", b"stream"));

        let config = UnpackConfig::new()
            .with_dump(true)
            .with_dump_dir(dir.path().join("missing").join("dir"));
        let (_, data) = open_replay_with(&path, config).unwrap();
        assert_eq!(&data[..], b"stream");
    }

    #[test]
    fn test_progress_reports_chunks() {
        let dir = tempfile::tempdir().unwrap();
        let file = build_replay(b"{}", &[3; 100]);
        let body_len = file.len() - HEADER_SIZE - 2;
        let path = write_file(dir.path(), "progress.wowsreplay", &file);

        let progress = DecryptProgress::new();
        ReplayFile::open(&path)
            .unwrap()
            .with_progress(progress.clone())
            .decode()
            .unwrap();
        assert_eq!(progress.chunks(), (body_len / 8) as u64);
    }
}
