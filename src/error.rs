use crate::protocol::MemberCategory;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum UnpackError {
    #[error("Replay file not found: {}", .0.display())]
    FileNotFound(PathBuf),

    #[error("Unsupported replay layout: expected 1 block, found {0}")]
    UnsupportedFormat(u32),

    #[error("Corrupt replay header: {0}")]
    CorruptHeader(String),

    #[error("Corrupt replay data: {0}")]
    CorruptData(String),

    #[error("Payload too large: {size} bytes exceeds limit of {limit} bytes")]
    PayloadTooLarge { size: u64, limit: u64 },

    #[error("Unknown {category} index {index}")]
    UnknownMember { category: MemberCategory, index: usize },

    #[error("Entity {entity} has no member named {name}")]
    UnknownMemberName { entity: String, name: String },

    #[error("Unknown entity type: {0}")]
    UnknownEntity(String),

    #[error("Argument decode error: {0}")]
    ArgumentDecode(String),

    #[error("Schema error: {0}")]
    Schema(String),

    #[error("Cipher error: {0}")]
    Cipher(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl UnpackError {
    /// Errors confined to a single call record. A stream walker can log these
    /// and move on to the next record instead of aborting the replay.
    pub fn is_call_scoped(&self) -> bool {
        matches!(
            self,
            UnpackError::UnknownMember { .. }
                | UnpackError::UnknownMemberName { .. }
                | UnpackError::UnknownEntity(_)
                | UnpackError::ArgumentDecode(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, UnpackError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_call_scoped_errors() {
        let unknown = UnpackError::UnknownMember {
            category: MemberCategory::Method,
            index: 7,
        };
        assert!(unknown.is_call_scoped());
        assert!(UnpackError::ArgumentDecode("short".to_string()).is_call_scoped());

        assert!(!UnpackError::UnsupportedFormat(2).is_call_scoped());
        assert!(!UnpackError::CorruptData("bad".to_string()).is_call_scoped());
    }

    #[test]
    fn test_error_messages() {
        let err = UnpackError::UnknownMember {
            category: MemberCategory::Property,
            index: 3,
        };
        assert_eq!(err.to_string(), "Unknown property index 3");

        let err = UnpackError::UnsupportedFormat(3);
        assert_eq!(err.to_string(), "Unsupported replay layout: expected 1 block, found 3");
    }
}
