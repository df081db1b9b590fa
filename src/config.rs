use crate::cipher::TailPolicy;
use crate::compression::DEFAULT_MAX_DECOMPRESSED_SIZE;
use std::env;
use std::path::PathBuf;

pub const DEFAULT_MAX_REPLAY_SIZE: u64 = 128 * 1024 * 1024;

pub const ENV_DUMP: &str = "REPLAY_UNPACK_DUMP";
pub const ENV_DUMP_DIR: &str = "REPLAY_UNPACK_DUMP_DIR";
pub const ENV_MAX_SIZE: &str = "REPLAY_UNPACK_MAX_SIZE";

#[derive(Debug, Clone)]
pub struct UnpackConfig {
    /// Write the decrypted stream to `<dump dir>/<replay file name>.hex`.
    pub dump_decrypted: bool,
    /// Directory for dumps; the current directory when unset.
    pub dump_dir: Option<PathBuf>,
    /// Replay files larger than this are refused before being read.
    pub max_replay_size: u64,
    pub max_decompressed_size: usize,
    pub tail_policy: TailPolicy,
}

impl Default for UnpackConfig {
    fn default() -> Self {
        Self {
            dump_decrypted: false,
            dump_dir: None,
            max_replay_size: DEFAULT_MAX_REPLAY_SIZE,
            max_decompressed_size: DEFAULT_MAX_DECOMPRESSED_SIZE,
            tail_policy: TailPolicy::Drop,
        }
    }
}

impl UnpackConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Defaults overridden by `REPLAY_UNPACK_DUMP`, `REPLAY_UNPACK_DUMP_DIR`
    /// and `REPLAY_UNPACK_MAX_SIZE`.
    pub fn from_env() -> Self {
        Self::from_vars(|name| env::var(name).ok())
    }

    fn from_vars(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();

        if let Some(value) = lookup(ENV_DUMP) {
            config.dump_decrypted = !matches!(value.trim(), "" | "0" | "false" | "off");
        }

        if let Some(dir) = lookup(ENV_DUMP_DIR) {
            if !dir.is_empty() {
                config.dump_dir = Some(PathBuf::from(dir));
            }
        }

        if let Some(size) = lookup(ENV_MAX_SIZE) {
            match size.trim().parse::<u64>() {
                Ok(limit) => config.max_replay_size = limit,
                Err(e) => {
                    tracing::warn!(value = %size, error = %e, "ignoring invalid {}", ENV_MAX_SIZE);
                }
            }
        }

        config
    }

    pub fn with_dump(mut self, enabled: bool) -> Self {
        self.dump_decrypted = enabled;
        self
    }

    pub fn with_dump_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.dump_dir = Some(dir.into());
        self
    }

    pub fn with_max_replay_size(mut self, limit: u64) -> Self {
        self.max_replay_size = limit;
        self
    }

    pub fn with_max_decompressed_size(mut self, limit: usize) -> Self {
        self.max_decompressed_size = limit;
        self
    }

    pub fn with_tail_policy(mut self, policy: TailPolicy) -> Self {
        self.tail_policy = policy;
        self
    }
}
