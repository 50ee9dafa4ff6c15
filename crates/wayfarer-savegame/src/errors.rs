//! Save/restore error types.

use chrono::{DateTime, Utc};
use wayfarer_core::ScriptError;

/// Errors raised while encoding, decoding or applying a save file.
#[derive(Debug, thiserror::Error)]
pub enum SaveError {
    /// The stream is not a save file, or its header is malformed.
    #[error("invalid save format: {0}")]
    InvalidFormat(String),

    /// The save belongs to a different cartridge.
    #[error("save file belongs to another cartridge (expected created {expected}, found {found})")]
    ForeignSaveFile {
        /// Creation time of the loaded cartridge.
        expected: DateTime<Utc>,
        /// Creation time recorded in the save.
        found: DateTime<Utc>,
    },

    /// An unknown or misplaced value tag.
    #[error("corrupt stream: unexpected tag {tag}")]
    CorruptStream {
        /// The offending tag byte.
        tag: u8,
    },

    /// The stream ended early.
    #[error("save file truncated")]
    TruncatedFile,

    /// A back-reference to an object outside the declared registry.
    #[error("unresolved object reference {0}")]
    UnresolvedReference(i64),

    /// An existing registry slot holds an object of another class.
    #[error("class mismatch at object {index}: live object is {expected}, save has {found}")]
    ClassMismatch {
        /// Registry index.
        index: usize,
        /// Class of the live object.
        expected: String,
        /// Class recorded in the save.
        found: String,
    },

    /// Underlying I/O failure.
    #[error("I/O error: {0}")]
    Io(#[source] std::io::Error),

    /// The script host rejected an operation.
    #[error(transparent)]
    Script(#[from] ScriptError),
}

impl From<std::io::Error> for SaveError {
    fn from(e: std::io::Error) -> Self {
        if e.kind() == std::io::ErrorKind::UnexpectedEof {
            Self::TruncatedFile
        } else {
            Self::Io(e)
        }
    }
}

impl SaveError {
    /// Short classification string for log fields.
    pub fn category(&self) -> &'static str {
        match self {
            Self::InvalidFormat(_) => "invalid_format",
            Self::ForeignSaveFile { .. } => "foreign_save",
            Self::CorruptStream { .. } => "corrupt_stream",
            Self::TruncatedFile => "truncated",
            Self::UnresolvedReference(_) => "unresolved_reference",
            Self::ClassMismatch { .. } => "class_mismatch",
            Self::Io(_) => "io",
            Self::Script(_) => "script",
        }
    }
}

/// Convenience alias.
pub type Result<T> = std::result::Result<T, SaveError>;
