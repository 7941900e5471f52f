use lz4_flex::block::DecompressError;
use std::sync::Arc;

/// Represents errors that can occur in the merge tree
#[derive(Debug)]
pub enum Error {
    /// I/O error
    Io(std::io::Error),

    /// Decompression failed
    Decompress(DecompressError),

    /// A field carried an unknown type tag on disk
    InvalidFieldTag(u8),

    /// A granule did not match its stored checksum
    ChecksumMismatch,

    /// A column referenced by the merge mode does not exist in the schema
    UnknownColumn(Arc<str>),

    /// A row field did not have the kind the merge mode expects (column index)
    ColumnKindMismatch(usize),

    /// The part set handed to the registry no longer matches its live parts
    Conflict,

    /// An ordinary merge produced no rows; ordinary merges never delete rows
    EmptyMerge,

    /// Not enough unreserved disk space to cover the merge
    SpaceReservation {
        /// Bytes that could not be reserved
        requested: u64,
    },

    /// Candidate violates part invariants (partition span, overlap, ordering)
    InvalidCandidate(&'static str),
}

impl Error {
    /// Whether the operation may simply be retried later
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::SpaceReservation { .. })
    }
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "MergeTreeError: {self:?}")
    }
}

impl std::error::Error for Error {}

impl From<std::io::Error> for Error {
    fn from(value: std::io::Error) -> Self {
        Self::Io(value)
    }
}

impl From<DecompressError> for Error {
    fn from(value: DecompressError) -> Self {
        Self::Decompress(value)
    }
}

/// Merge tree result
pub type Result<T> = std::result::Result<T, Error>;
