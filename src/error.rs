use thiserror::Error;

/// Everything that can go wrong while producing or walking an archive.
///
/// Framing errors (bad magic, out-of-sequence records, truncation) are
/// fatal to the current pass. Corruption errors (checksum mismatches) leave
/// the stream realigned on a record boundary so the caller may keep
/// walking after reporting them.
#[derive(Error, Debug)]
pub enum ArchiveError {
    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("bad magic in record preamble")]
    BadMagic,

    #[error("stream ended inside a record")]
    Truncated,

    #[error("unknown record type tag {0}")]
    UnknownRecordType(u8),

    #[error("unknown compression tag {0}")]
    UnknownCompression(u8),

    #[error("flag bits {bits:#06b} are not valid for record type {rtype}")]
    BadFlags { rtype: u8, bits: u16 },

    #[error("metadata checksum mismatch")]
    CorruptMetadata,

    #[error("body checksum mismatch")]
    HashMismatch,

    #[error("archive does not begin with a start-of-archive record")]
    MissingHeader,

    #[error("second start-of-archive record inside an open archive")]
    DuplicateHeader,

    #[error("expected a continuation record, got something else")]
    ExpectedContinuation,

    #[error("too many consecutive shared dictionary records")]
    DictionaryFlood,

    #[error("metadata blob of {0} bytes exceeds the length field")]
    MetadataTooLarge(usize),

    #[error("failed to encode metadata: {0}")]
    MetadataEncode(#[from] ciborium::ser::Error<std::io::Error>),

    #[error("failed to decode metadata: {0}")]
    MetadataDecode(#[from] ciborium::de::Error<std::io::Error>),

    #[error("{0}")]
    State(&'static str),
}

impl ArchiveError {
    /// Checksum failures are recoverable at record granularity, the reader
    /// is already realigned when they surface.
    pub fn is_corruption(&self) -> bool {
        matches!(
            self,
            ArchiveError::CorruptMetadata | ArchiveError::HashMismatch
        )
    }
}

pub type Result<T> = std::result::Result<T, ArchiveError>;
