//! Chained block decryption of the replay body.
//!
//! The primitive is Blowfish in ECB mode; the chaining lives here. The body
//! is split into 8-byte chunks. The first chunk is decrypted and thrown away:
//! it is never emitted and never enters the chain. Its meaning is unknown
//! (possibly an IV or sync marker) and it is kept that way on purpose. Every
//! later chunk is decrypted, read as a little-endian i64, XORed with the
//! previously emitted value and written out. The first emitted chunk has no
//! predecessor and goes out as decrypted.

use crate::error::{Result, UnpackError};
use blowfish::cipher::{generic_array::GenericArray, BlockDecrypt, KeyInit};
use blowfish::Blowfish;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

pub const BLOCK_SIZE: usize = 8;

pub const REPLAY_KEY: [u8; 16] = [
    0x29, 0xB7, 0xC9, 0x09, 0x38, 0x3F, 0x84, 0x88,
    0xFA, 0x98, 0xEC, 0x4E, 0x13, 0x19, 0x79, 0xFB,
];

const MIN_KEY_LEN: usize = 4;
const MAX_KEY_LEN: usize = 56;

/// What to do with a final chunk shorter than [`BLOCK_SIZE`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TailPolicy {
    /// Silently leave it out of the output. Matches the reference decoder,
    /// at the cost of losing up to 7 trailing bytes.
    #[default]
    Drop,
    /// Fail with `CorruptData`.
    Reject,
}

/// Shared counter of chunks processed so far, for progress display.
#[derive(Debug, Clone, Default)]
pub struct DecryptProgress(Arc<AtomicU64>);

impl DecryptProgress {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn chunks(&self) -> u64 {
        self.0.load(Ordering::Relaxed)
    }

    fn advance(&self) {
        self.0.fetch_add(1, Ordering::Relaxed);
    }
}

#[derive(Debug, Clone)]
pub struct ReplayCipher {
    key: Vec<u8>,
    tail_policy: TailPolicy,
    progress: Option<DecryptProgress>,
}

impl ReplayCipher {
    pub fn new() -> Self {
        Self {
            key: REPLAY_KEY.to_vec(),
            tail_policy: TailPolicy::default(),
            progress: None,
        }
    }

    pub fn with_key(key: impl Into<Vec<u8>>) -> Result<Self> {
        let key = key.into();
        if !(MIN_KEY_LEN..=MAX_KEY_LEN).contains(&key.len()) {
            return Err(UnpackError::Cipher(format!(
                "key length {} outside {}..={} bytes",
                key.len(),
                MIN_KEY_LEN,
                MAX_KEY_LEN
            )));
        }
        Ok(Self { key, ..Self::new() })
    }

    pub fn with_tail_policy(mut self, policy: TailPolicy) -> Self {
        self.tail_policy = policy;
        self
    }

    pub fn with_progress(mut self, progress: DecryptProgress) -> Self {
        self.progress = Some(progress);
        self
    }

    pub fn tail_policy(&self) -> TailPolicy {
        self.tail_policy
    }

    /// Decrypt `payload`. Output length is `(n - 1) * 8` for `n` whole chunks.
    pub fn decrypt(&self, payload: &[u8]) -> Result<Vec<u8>> {
        let blowfish: Blowfish = Blowfish::new_from_slice(&self.key)
            .map_err(|_| UnpackError::Cipher(format!("invalid key length {}", self.key.len())))?;

        let chunks = payload.chunks_exact(BLOCK_SIZE);
        let tail = chunks.remainder().len();
        if tail != 0 {
            match self.tail_policy {
                TailPolicy::Drop => {
                    tracing::debug!(tail, payload = payload.len(), "dropping short trailing chunk");
                }
                TailPolicy::Reject => {
                    return Err(UnpackError::CorruptData(format!(
                        "encrypted body length {} is not a multiple of {}",
                        payload.len(),
                        BLOCK_SIZE
                    )));
                }
            }
        }

        let mut output = Vec::with_capacity(payload.len().saturating_sub(BLOCK_SIZE));
        let mut previous: Option<i64> = None;

        for (index, chunk) in chunks.enumerate() {
            let mut block = GenericArray::clone_from_slice(chunk);
            blowfish.decrypt_block(&mut block);

            if let Some(progress) = &self.progress {
                progress.advance();
            }

            if index == 0 {
                continue;
            }

            let mut raw = [0u8; BLOCK_SIZE];
            raw.copy_from_slice(&block);
            let mut value = i64::from_le_bytes(raw);
            if let Some(prev) = previous {
                value ^= prev;
            }
            previous = Some(value);

            output.extend_from_slice(&value.to_le_bytes());
        }

        Ok(output)
    }
}

impl Default for ReplayCipher {
    fn default() -> Self {
        Self::new()
    }
}

/// Inverse of [`ReplayCipher::decrypt`] for building fixtures. Pads `plain`
/// with zeros to a whole number of chunks.
#[cfg(test)]
pub(crate) fn encrypt_for_tests(plain: &[u8], leading: [u8; BLOCK_SIZE]) -> Vec<u8> {
    use blowfish::cipher::BlockEncrypt;

    let blowfish: Blowfish = Blowfish::new_from_slice(&REPLAY_KEY).unwrap();
    let encrypt = |bytes: [u8; BLOCK_SIZE]| {
        let mut block = GenericArray::clone_from_slice(&bytes);
        blowfish.encrypt_block(&mut block);
        block.to_vec()
    };

    let mut padded = plain.to_vec();
    padded.resize(plain.len().div_ceil(BLOCK_SIZE) * BLOCK_SIZE, 0);

    let mut out = encrypt(leading);
    let mut previous: Option<i64> = None;
    for chunk in padded.chunks_exact(BLOCK_SIZE) {
        let value = i64::from_le_bytes(chunk.try_into().unwrap());
        let chained = match previous {
            Some(prev) => value ^ prev,
            None => value,
        };
        previous = Some(value);
        out.extend(encrypt(chained.to_le_bytes()));
    }
    out
}
