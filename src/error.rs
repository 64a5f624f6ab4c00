use thiserror::Error;

use crate::descriptor::{PartitionId, SegmentLocator};

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
#[non_exhaustive]
pub enum Error {
    #[error(transparent)]
    IO(#[from] std::io::Error),
    #[error(transparent)]
    Serialization(#[from] bincode::Error),
    #[error(transparent)]
    IntConversion(#[from] std::num::TryFromIntError),
    #[error("could not open segment {locator}")]
    SegmentOpen {
        locator: SegmentLocator,
        #[source]
        source: std::io::Error,
    },
    #[error("segment {locator} is corrupt: {reason}")]
    CorruptSegment {
        locator: SegmentLocator,
        reason: String,
    },
    #[error("too many open segments (limit is {limit})")]
    TooManyOpenSegments { limit: usize },
    #[error("segment {0} has already been closed")]
    SegmentClosed(SegmentLocator),
    #[error("keys written to a segment must be strictly ascending")]
    UnsortedSegmentInput,
    #[error("index {0} has no partitions")]
    EmptyCatalog(String),
    #[error("key sorts before the first separator key of index {0}")]
    KeyBeforeFirstPartition(String),
    #[error("there is no partition at ordinal {0}")]
    OrdinalOutOfRange(usize),
    #[error("partition {0} does not exist")]
    UnknownPartition(PartitionId),
    #[error("partition {0} already exists")]
    DuplicatePartition(PartitionId),
    #[error("a partition with the same separator key already exists")]
    DuplicateSeparator,
    #[error("split key must lie strictly inside the range of partition {0}")]
    InvalidSplit(PartitionId),
    #[error("{0} is not implemented")]
    NotImplemented(&'static str),
    #[error("iterator is not positioned on an entry")]
    InvalidIteratorState,
}
