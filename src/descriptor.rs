use serde_derive::{Deserialize, Serialize};
use std::fmt;

/// Identifies a partition. Stable and unique within one index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PartitionId(pub u32);

impl fmt::Display for PartitionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Host-local name of a segment file.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SegmentLocator(String);

impl SegmentLocator {
    pub fn new<S: Into<String>>(name: S) -> SegmentLocator {
        SegmentLocator(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SegmentLocator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SegmentState {
    /// Written but not yet promoted, never read.
    Pending,
    /// Part of every read on its partition.
    Live,
    /// Superseded, e.g. by a compaction. Never read and eventually reclaimed.
    Dead,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SegmentDescriptor {
    locator: SegmentLocator,
    state: SegmentState,
}

impl SegmentDescriptor {
    pub fn new(locator: SegmentLocator, state: SegmentState) -> SegmentDescriptor {
        SegmentDescriptor { locator, state }
    }

    pub fn live(locator: SegmentLocator) -> SegmentDescriptor {
        SegmentDescriptor::new(locator, SegmentState::Live)
    }

    pub fn locator(&self) -> &SegmentLocator {
        &self.locator
    }

    pub fn state(&self) -> SegmentState {
        self.state
    }

    pub fn is_live(&self) -> bool {
        self.state == SegmentState::Live
    }

    /// Returns a copy of this descriptor in the [`SegmentState::Dead`] state.
    pub fn retired(&self) -> SegmentDescriptor {
        SegmentDescriptor::new(self.locator.clone(), SegmentState::Dead)
    }
}

/// Describes one partition and the history of its segments.
///
/// Segments are kept in flush order, the most recently flushed one last.
/// Descriptors are never changed in place, every lifecycle transition returns a new descriptor
/// that has to be stored in the catalog.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartitionDescriptor {
    id: PartitionId,
    segments: Vec<SegmentDescriptor>,
}

impl PartitionDescriptor {
    /// Create a partition without any segments.
    pub fn new(id: PartitionId) -> PartitionDescriptor {
        PartitionDescriptor {
            id,
            segments: Vec::new(),
        }
    }

    pub fn with_segments(id: PartitionId, segments: Vec<SegmentDescriptor>) -> PartitionDescriptor {
        PartitionDescriptor { id, segments }
    }

    pub fn id(&self) -> PartitionId {
        self.id
    }

    pub fn segments(&self) -> &[SegmentDescriptor] {
        &self.segments
    }

    /// Number of segments that must be part of a read on this partition.
    pub fn live_count(&self) -> usize {
        self.segments.iter().filter(|s| s.is_live()).count()
    }

    /// The live segments, most recently flushed first.
    pub fn live_segments(&self) -> impl Iterator<Item = &SegmentDescriptor> {
        self.segments.iter().rev().filter(|s| s.is_live())
    }

    pub(crate) fn live_locators(&self) -> Vec<SegmentLocator> {
        self.live_segments().map(|s| s.locator.clone()).collect()
    }

    /// Returns a descriptor where a newly flushed segment is the most recent live segment.
    pub fn flushed(&self, locator: SegmentLocator) -> PartitionDescriptor {
        let mut segments = self.segments.clone();
        segments.push(SegmentDescriptor::live(locator));
        PartitionDescriptor::with_segments(self.id, segments)
    }

    /// Returns a descriptor where the `retired` segments are dead.
    ///
    /// The `replacement` (if any) is placed directly after the most recent retired segment,
    /// so any live segment flushed after the compacted ones still takes precedence.
    pub fn compacted(
        &self,
        retired: &[SegmentLocator],
        replacement: Option<SegmentLocator>,
    ) -> PartitionDescriptor {
        let newest_retired = self
            .segments
            .iter()
            .rposition(|s| s.is_live() && retired.contains(&s.locator));

        let mut segments = Vec::with_capacity(self.segments.len() + 1);
        let mut replacement = replacement;
        for (i, s) in self.segments.iter().enumerate() {
            if s.is_live() && retired.contains(&s.locator) {
                segments.push(s.retired());
            } else {
                segments.push(s.clone());
            }
            if Some(i) == newest_retired {
                if let Some(locator) = replacement.take() {
                    segments.push(SegmentDescriptor::live(locator));
                }
            }
        }
        // Nothing was retired, the replacement is simply the newest segment
        if let Some(locator) = replacement {
            segments.push(SegmentDescriptor::live(locator));
        }
        PartitionDescriptor::with_segments(self.id, segments)
    }
}

/// A resource that is needed to read a partition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResourceMetadata {
    /// The mutable tree that absorbs all writes of the index.
    MutableTree { name: String },
    /// A live segment of the partition.
    Segment(SegmentLocator),
}
